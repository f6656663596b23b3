//! The static registry mapping a variant's `type` discriminator to its field
//! schema and (optionally) an executor, replacing the dynamic type
//! runtime reflection some dataflow engines rely on for field discovery.

use crate::error::Result;
use crate::invocation::{Invocation, InvocationSchema, OutputValue};
use crate::services::ServicesRegistry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Executes exactly one registered invocation variant.
///
/// Engine-defined variants (`iterate`, `collect`) register built-in
/// executors from [`crate::library`]; everything else is registered by the
/// invocation library the core treats as an external collaborator.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn invoke(&self, node: &Invocation, services: &ServicesRegistry) -> Result<OutputValue>;
}

struct RegistryEntry {
    schema: InvocationSchema,
    executor: Option<Arc<dyn NodeExecutor>>,
}

/// Maps a `type` discriminator to its declared field schema and executor.
#[derive(Default)]
pub struct InvocationRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl InvocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a variant's field schema with no executor (metadata-only;
    /// useful for variants whose `invoke` is supplied out of process).
    pub fn register_schema(&mut self, type_tag: impl Into<String>, schema: InvocationSchema) {
        self.entries.insert(
            type_tag.into(),
            RegistryEntry {
                schema,
                executor: None,
            },
        );
    }

    /// Registers a variant's field schema together with an in-process
    /// executor.
    pub fn register(
        &mut self,
        type_tag: impl Into<String>,
        schema: InvocationSchema,
        executor: Arc<dyn NodeExecutor>,
    ) {
        self.entries.insert(
            type_tag.into(),
            RegistryEntry {
                schema,
                executor: Some(executor),
            },
        );
    }

    pub fn schema(&self, type_tag: &str) -> Option<&InvocationSchema> {
        self.entries.get(type_tag).map(|e| &e.schema)
    }

    pub fn executor(&self, type_tag: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.entries.get(type_tag).and_then(|e| e.executor.clone())
    }

    pub fn has_type(&self, type_tag: &str) -> bool {
        self.entries.contains_key(type_tag)
    }

    /// Merges another registry's entries into this one, with `other`'s
    /// entries taking precedence on key collision.
    pub fn merge(&mut self, other: InvocationRegistry) {
        self.entries.extend(other.entries);
    }
}
