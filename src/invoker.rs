//! The façade tying an execution state to its external collaborators: the
//! services registry's lifecycle hooks, the session store, and the work
//! queue. Single-threaded from the façade's own standpoint — see the crate
//! root docs for the concurrency model this assumes.

use crate::error::Result;
use crate::events::{EngineEvent, EventSink, NullEventSink};
use crate::execution_state::GraphExecutionState;
use crate::graph::Graph;
use crate::invocation::OutputValue;
use crate::services::ServicesRegistry;
use crate::session_store::SessionStore;
use crate::work_queue::{WorkItem, WorkQueue};
use std::sync::Arc;

/// Drives execution states forward by handing ready nodes off to an external
/// work queue, persisting state through an external session store, and
/// fanning lifecycle hooks out to every registered service.
pub struct Invoker {
    services: ServicesRegistry,
    session_store: Arc<dyn SessionStore>,
    work_queue: Arc<dyn WorkQueue>,
    event_sink: Arc<dyn EventSink>,
}

impl Invoker {
    /// Builds a new façade with no event sink (events are dropped) and
    /// starts every lifecycle-registered service exactly once.
    pub async fn new(
        services: ServicesRegistry,
        session_store: Arc<dyn SessionStore>,
        work_queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self::with_event_sink(services, session_store, work_queue, Arc::new(NullEventSink)).await
    }

    /// Builds a new façade reporting lifecycle events to `event_sink`, and
    /// starts every lifecycle-registered service exactly once.
    pub async fn with_event_sink(
        services: ServicesRegistry,
        session_store: Arc<dyn SessionStore>,
        work_queue: Arc<dyn WorkQueue>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        let invoker = Self {
            services,
            session_store,
            work_queue,
            event_sink,
        };
        invoker.start().await;
        invoker
    }

    /// Pulls `state.next()`. If a node is ready, persists `state` and
    /// enqueues `(state.id, invocation.id, invoke_all)` on the work queue,
    /// emitting a `NodePrepared` event, and returns the invoked node's id.
    /// Returns `Ok(None)` with no side effects if nothing was ready.
    pub async fn invoke(&self, state: &mut GraphExecutionState, invoke_all: bool) -> Result<Option<String>> {
        let Some(invocation) = state.next() else {
            return Ok(None);
        };
        let prepared_id = invocation.id().to_string();
        let source_path = state
            .prepared_source_mapping
            .get(&prepared_id)
            .cloned()
            .unwrap_or_else(|| prepared_id.clone());

        self.session_store.set(state.clone()).await?;

        log::info!("queueing invocation {prepared_id} for state {}", state.id);
        self.work_queue
            .enqueue(WorkItem::new(state.id.clone(), prepared_id.clone(), invoke_all))
            .await;
        if let Err(e) = self.event_sink.emit(EngineEvent::NodePrepared {
            state_id: state.id.clone(),
            prepared_id: prepared_id.clone(),
            source_path,
        }) {
            log::warn!("event sink failed to emit NodePrepared for {prepared_id}: {e}");
        }

        Ok(Some(prepared_id))
    }

    /// Records a completed node's output on `state`, emits `NodeCompleted`,
    /// and emits `StateComplete` if that completion finished the state.
    pub fn complete(&self, state: &mut GraphExecutionState, node_id: &str, output: OutputValue) {
        state.complete(node_id, output);
        if let Err(e) = self.event_sink.emit(EngineEvent::NodeCompleted {
            state_id: state.id.clone(),
            prepared_id: node_id.to_string(),
        }) {
            log::warn!("event sink failed to emit NodeCompleted for {node_id}: {e}");
        }
        if state.is_complete() {
            if let Err(e) = self.event_sink.emit(EngineEvent::StateComplete { state_id: state.id.clone() }) {
                log::warn!("event sink failed to emit StateComplete for {}: {e}", state.id);
            }
        }
    }

    /// Records a node's failure on `state` and emits `NodeErrored` followed
    /// by `StateComplete` (an errored state is always complete).
    pub fn fail(&self, state: &mut GraphExecutionState, node_id: &str, message: impl Into<String>) {
        let message = message.into();
        state.set_error(node_id, message.clone());
        if let Err(e) = self.event_sink.emit(EngineEvent::NodeErrored {
            state_id: state.id.clone(),
            prepared_id: node_id.to_string(),
            message,
        }) {
            log::warn!("event sink failed to emit NodeErrored for {node_id}: {e}");
        }
        if let Err(e) = self.event_sink.emit(EngineEvent::StateComplete { state_id: state.id.clone() }) {
            log::warn!("event sink failed to emit StateComplete for {}: {e}", state.id);
        }
    }

    /// Creates a new execution state bound to `graph` (or an empty graph if
    /// `None`), persists it, and returns it.
    pub async fn create_execution_state(&self, id: impl Into<String>, graph: Option<Graph>) -> Result<GraphExecutionState> {
        let state = GraphExecutionState::new(id, graph.unwrap_or_else(|| Graph::new("graph")));
        self.session_store.set(state.clone()).await?;
        log::info!("created execution state {}", state.id);
        Ok(state)
    }

    /// Starts every lifecycle-registered service exactly once. Bug-for-bug
    /// note: the upstream implementation this was distilled from calls each
    /// service's `start`/`stop` twice; this façade calls them once.
    async fn start(&self) {
        for service in self.services.lifecycle_services() {
            service.start().await;
        }
    }

    /// Stops every lifecycle-registered service exactly once, then signals
    /// shutdown on the work queue.
    pub async fn stop(&self) {
        for service in self.services.lifecycle_services() {
            service.stop().await;
        }
        self.work_queue.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::VecEventSink;
    use crate::session_store::InMemorySessionStore;
    use crate::work_queue::{InMemoryWorkQueue, QueueMessage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingService {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl crate::services::Service for CountingService {
        async fn start(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn start_and_stop_fan_out_to_every_service_exactly_once() {
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let mut services = ServicesRegistry::new();
        services.register_lifecycle(Arc::new(CountingService {
            starts: starts.clone(),
            stops: stops.clone(),
        }));

        let invoker = Invoker::new(services, Arc::new(InMemorySessionStore::new()), Arc::new(InMemoryWorkQueue::new())).await;
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        invoker.stop().await;
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invoke_enqueues_the_ready_node_and_persists_state() {
        let session_store = Arc::new(InMemorySessionStore::new());
        let work_queue = Arc::new(InMemoryWorkQueue::new());
        let invoker = Invoker::new(ServicesRegistry::new(), session_store.clone(), work_queue.clone()).await;

        let mut g = Graph::new("g");
        g.add_node(custom_node("a")).unwrap();
        let mut state = invoker.create_execution_state("s1", Some(g)).await.unwrap();

        let invoked = invoker.invoke(&mut state, false).await.unwrap();
        assert!(invoked.is_some());

        let persisted = session_store.get("s1").await.unwrap();
        assert!(persisted.is_some());

        let msg = work_queue.dequeue().await;
        match msg {
            QueueMessage::Work(item) => {
                assert_eq!(item.graph_execution_state_id, "s1");
                assert_eq!(item.invocation_id, invoked.unwrap());
                assert!(!item.invoke_all);
            }
            QueueMessage::Shutdown => panic!("expected work item"),
        }
    }

    #[tokio::test]
    async fn invoke_on_an_empty_graph_is_a_no_op() {
        let invoker = Invoker::new(ServicesRegistry::new(), Arc::new(InMemorySessionStore::new()), Arc::new(InMemoryWorkQueue::new())).await;
        let mut state = invoker.create_execution_state("s2", None).await.unwrap();
        assert!(invoker.invoke(&mut state, false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn complete_emits_node_completed_then_state_complete_once_done() {
        let sink = Arc::new(VecEventSink::new());
        let invoker = Invoker::with_event_sink(
            ServicesRegistry::new(),
            Arc::new(InMemorySessionStore::new()),
            Arc::new(InMemoryWorkQueue::new()),
            sink.clone(),
        )
        .await;

        let mut g = Graph::new("g");
        g.add_node(custom_node("a")).unwrap();
        let mut state = invoker.create_execution_state("s3", Some(g)).await.unwrap();
        let node_id = state.next().unwrap().id().to_string();

        invoker.complete(&mut state, &node_id, OutputValue::new());

        let events = sink.events();
        assert!(matches!(events[0], EngineEvent::NodeCompleted { .. }));
        assert!(matches!(events[1], EngineEvent::StateComplete { .. }));
    }

    fn custom_node(id: &str) -> crate::invocation::Invocation {
        crate::invocation::Invocation::Custom(crate::invocation::CustomInvocation {
            id: id.to_string(),
            node_type: "constant".to_string(),
            data: serde_json::Map::new(),
        })
    }
}
