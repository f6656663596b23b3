//! The external work queue interface: the thing that actually runs `invoke`
//! calls, outside the core's single-writer execution-state machinery. An
//! in-memory reference queue is provided for tests and the demo binary.

use async_trait::async_trait;
use tokio::sync::Mutex;
use std::collections::VecDeque;

/// One unit of dispatched work: "run this invocation, in this execution
/// state". `invoke_all` tells the worker whether to keep draining `next()`
/// on the same state afterward rather than waiting to be re-enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub graph_execution_state_id: String,
    pub invocation_id: String,
    pub invoke_all: bool,
}

impl WorkItem {
    pub fn new(
        graph_execution_state_id: impl Into<String>,
        invocation_id: impl Into<String>,
        invoke_all: bool,
    ) -> Self {
        Self {
            graph_execution_state_id: graph_execution_state_id.into(),
            invocation_id: invocation_id.into(),
            invoke_all,
        }
    }
}

/// A queued message: either real work, or the shutdown sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueMessage {
    Work(WorkItem),
    Shutdown,
}

/// Accepts [`WorkItem`]s for out-of-band execution. Implementations choose
/// their own dispatch and concurrency; the core only ever enqueues.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, item: WorkItem);
    async fn shutdown(&self);
    /// Pulls the next message, blocking until one is available. Returns
    /// `QueueMessage::Shutdown` once, then keeps returning it for every
    /// subsequent caller (the sentinel does not get consumed away).
    async fn dequeue(&self) -> QueueMessage;
}

/// An in-process, FIFO [`WorkQueue`] backed by a `tokio::sync::Mutex` and a
/// condvar-less poll loop via `tokio::task::yield_now`. Sufficient for tests
/// and the demo binary; a production host would swap in a real broker.
#[derive(Default)]
pub struct InMemoryWorkQueue {
    inner: Mutex<VecDeque<WorkItem>>,
    shutting_down: Mutex<bool>,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn enqueue(&self, item: WorkItem) {
        self.inner.lock().await.push_back(item);
    }

    async fn shutdown(&self) {
        *self.shutting_down.lock().await = true;
    }

    async fn dequeue(&self) -> QueueMessage {
        loop {
            if let Some(item) = self.inner.lock().await.pop_front() {
                return QueueMessage::Work(item);
            }
            if *self.shutting_down.lock().await {
                return QueueMessage::Shutdown;
            }
            tokio::task::yield_now().await;
        }
    }
}
