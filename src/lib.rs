//! A typed dataflow graph engine: a DAG of typed invocation nodes with
//! iterator/collector fan-out and fan-in, nested subgraphs, and a
//! materialize-on-demand execution state machine.
//!
//! - [`graph`] — the authored graph, its node/edge storage, and mutation API.
//! - [`invocation`] — the node (invocation) data model and its tagged-union
//!   persistence.
//! - [`types`] — the typed-field model and port compatibility rules.
//! - [`iter_collect`] — the iterator/collector shape invariants.
//! - [`flat_view`] — the flattened, subgraph-inlined adjacency view used for
//!   cycle detection, topological order, and ancestor/descendant queries.
//! - [`execution_state`] — the expanding execution graph and its
//!   `next`/`complete`/`set_error` state machine.
//! - [`invoker`] — the façade tying an execution state to the session store,
//!   work queue, and services registry.
//!
//! `session_store`, `work_queue`, `services`, and `registry` describe the
//! external collaborators the core depends on as traits, with in-memory
//! reference implementations for tests and the demo binary. `library`
//! provides two illustrative registered node variants standing in for the
//! invocation library a real host would supply.

pub mod error;
pub mod events;
pub mod execution_state;
pub mod flat_view;
pub mod graph;
pub mod invocation;
pub mod invoker;
pub mod iter_collect;
pub mod library;
pub mod registry;
pub mod services;
pub mod session_store;
pub mod types;
pub mod work_queue;

pub use error::{EngineError, Result};
pub use execution_state::GraphExecutionState;
pub use graph::{Edge, EdgeConnection, Graph};
pub use invocation::{
    CollectInvocation, CustomInvocation, GraphInvocation, Invocation, InvocationSchema,
    IterateInvocation, OutputValue, PortSchema,
};
pub use invoker::Invoker;
pub use registry::{InvocationRegistry, NodeExecutor};
pub use services::{Service, ServicesRegistry};
pub use session_store::{InMemorySessionStore, SessionStore};
pub use types::{FieldType, PortTypeChecker, TypeRegistry};
pub use work_queue::{InMemoryWorkQueue, QueueMessage, WorkItem, WorkQueue};
