//! Error types for the dataflow engine

use thiserror::Error;

/// Result type alias using [`EngineError`]
pub type Result<T> = std::result::Result<T, EngineError>;

/// Domain errors raised by the graph and execution-state APIs.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `add_node` / `update_node` attempted to use an id already present in the graph.
    #[error("node already in graph: {0}")]
    NodeAlreadyInGraph(String),

    /// A node path failed to resolve.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// An `add_edge` failed one of the edge-addition checks.
    #[error("invalid edge {0:?} -> {1:?}: {2}")]
    InvalidEdge(crate::graph::EdgeConnection, crate::graph::EdgeConnection, String),

    /// A mutation was attempted through an execution state after the destination
    /// node had already entered preparation.
    #[error("node already executed: {0}")]
    NodeAlreadyExecuted(String),

    /// `update_node` was called with a node of a different variant than the one
    /// it is replacing.
    #[error("type mismatch updating node {0}: {1}")]
    TypeMismatch(String, String),

    /// The external worker's `invoke` failed; surfaced via `set_error`.
    #[error("invocation failed: {0}")]
    InvocationFailure(String),

    /// Serialization/deserialization failure at the persistence boundary.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
