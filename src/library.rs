//! Two illustrative registered node variants, standing in for the invocation
//! library the core treats as an external collaborator (see
//! [`crate::registry::InvocationRegistry`]). Used by the end-to-end tests and
//! the demo binary; a real host would register dozens of these instead.

use crate::error::{EngineError, Result};
use crate::invocation::{Invocation, InvocationSchema, PortSchema};
use crate::registry::{InvocationRegistry, NodeExecutor};
use crate::services::ServicesRegistry;
use crate::types::FieldType;
use async_trait::async_trait;
use serde_json::Map;
use std::sync::Arc;

/// Emits the integer stored in its own `value` field. Takes no inputs.
pub struct ConstantExecutor;

#[async_trait]
impl NodeExecutor for ConstantExecutor {
    async fn invoke(&self, node: &Invocation, _services: &ServicesRegistry) -> Result<crate::invocation::OutputValue> {
        let Invocation::Custom(custom) = node else {
            return Err(EngineError::InvocationFailure("constant node is not a custom invocation".into()));
        };
        let value = custom
            .data
            .get("value")
            .cloned()
            .ok_or_else(|| EngineError::InvocationFailure("constant node missing its value".into()))?;
        let mut out = Map::new();
        out.insert("value".to_string(), value);
        Ok(out)
    }
}

/// Sums its two integer inputs `a` and `b` into `sum`.
pub struct AddExecutor;

#[async_trait]
impl NodeExecutor for AddExecutor {
    async fn invoke(&self, node: &Invocation, _services: &ServicesRegistry) -> Result<crate::invocation::OutputValue> {
        let Invocation::Custom(custom) = node else {
            return Err(EngineError::InvocationFailure("add node is not a custom invocation".into()));
        };
        let a = custom
            .data
            .get("a")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| EngineError::InvocationFailure("add node missing input a".into()))?;
        let b = custom
            .data
            .get("b")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| EngineError::InvocationFailure("add node missing input b".into()))?;
        let mut out = Map::new();
        out.insert("sum".to_string(), serde_json::Value::from(a + b));
        Ok(out)
    }
}

/// Registers the `constant` and `add` variants' schemas and executors.
pub fn register_library(registry: &mut InvocationRegistry) {
    registry.register(
        "constant",
        InvocationSchema {
            inputs: vec![],
            outputs: vec![PortSchema::new("value", FieldType::named("int"))],
        },
        Arc::new(ConstantExecutor),
    );
    registry.register(
        "add",
        InvocationSchema {
            inputs: vec![
                PortSchema::new("a", FieldType::named("int")),
                PortSchema::new("b", FieldType::named("int")),
            ],
            outputs: vec![PortSchema::new("sum", FieldType::named("int"))],
        },
        Arc::new(AddExecutor),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::CustomInvocation;

    fn constant(id: &str, value: i64) -> Invocation {
        let mut data = Map::new();
        data.insert("value".to_string(), serde_json::Value::from(value));
        Invocation::Custom(CustomInvocation {
            id: id.to_string(),
            node_type: "constant".to_string(),
            data,
        })
    }

    fn add(id: &str, a: i64, b: i64) -> Invocation {
        let mut data = Map::new();
        data.insert("a".to_string(), serde_json::Value::from(a));
        data.insert("b".to_string(), serde_json::Value::from(b));
        Invocation::Custom(CustomInvocation {
            id: id.to_string(),
            node_type: "add".to_string(),
            data,
        })
    }

    #[tokio::test]
    async fn constant_executor_echoes_its_own_value() {
        let node = constant("c", 7);
        let out = ConstantExecutor.invoke(&node, &ServicesRegistry::new()).await.unwrap();
        assert_eq!(out.get("value"), Some(&serde_json::Value::from(7)));
    }

    #[tokio::test]
    async fn add_executor_sums_its_inputs() {
        let node = add("s", 3, 4);
        let out = AddExecutor.invoke(&node, &ServicesRegistry::new()).await.unwrap();
        assert_eq!(out.get("sum"), Some(&serde_json::Value::from(7)));
    }

    #[test]
    fn register_library_populates_both_variants() {
        let mut registry = InvocationRegistry::new();
        register_library(&mut registry);
        assert!(registry.has_type("constant"));
        assert!(registry.has_type("add"));
        assert!(registry.executor("constant").is_some());
        assert!(registry.executor("add").is_some());
    }
}
