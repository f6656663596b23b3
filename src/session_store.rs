//! Persistence interface for [`crate::execution_state::GraphExecutionState`],
//! plus an in-memory reference implementation used by tests and the demo
//! binary. A real host backs this with a database or a file; the invoker
//! façade only ever talks to the trait.

use crate::error::Result;
use crate::execution_state::GraphExecutionState;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Loads, saves, and deletes execution states by id. Implementations decide
/// their own durability and concurrency story; the trait only promises that
/// a `get` after a `set` with the same id returns what was written.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<GraphExecutionState>>;
    async fn set(&self, state: GraphExecutionState) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// A `HashMap`-backed [`SessionStore`] behind a `tokio::sync::Mutex`, with no
/// durability beyond the process's own memory.
#[derive(Default)]
pub struct InMemorySessionStore {
    states: Mutex<HashMap<String, GraphExecutionState>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<GraphExecutionState>> {
        Ok(self.states.lock().await.get(id).cloned())
    }

    async fn set(&self, state: GraphExecutionState) -> Result<()> {
        self.states.lock().await.insert(state.id.clone(), state);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.states.lock().await.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = InMemorySessionStore::new();
        let state = GraphExecutionState::new("s1", Graph::new("g"));
        store.set(state).await.unwrap();
        let loaded = store.get("s1").await.unwrap();
        assert!(loaded.is_some());
        assert_eq!(loaded.unwrap().id, "s1");
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = InMemorySessionStore::new();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_the_entry() {
        let store = InMemorySessionStore::new();
        store.set(GraphExecutionState::new("s1", Graph::new("g"))).await.unwrap();
        store.delete("s1").await.unwrap();
        assert!(store.get("s1").await.unwrap().is_none());
    }
}
