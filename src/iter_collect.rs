//! The iterator and collector shape invariants, checked against a
//! hypothetical edge set: a proposed edge is folded into the node's existing
//! input/output edges before the rule is evaluated, so `add_edge` can reject
//! an edge that would break the shape of an `Iterate`/`Collect` node it
//! touches.

use crate::error::{EngineError, Result};
use crate::graph::{Edge, EdgeConnection, Graph};
use crate::invocation::Invocation;
use crate::registry::InvocationRegistry;
use crate::types::{FieldType, PortTypeChecker, TypeRegistry};

/// Checks whichever iterator/collector invariant the proposed `edge` touches,
/// as if it were already present. Called from `Graph::add_edge`.
pub fn check_hypothetical_edge(
    graph: &Graph,
    edge: &Edge,
    registry: &InvocationRegistry,
    types: &TypeRegistry,
) -> Result<()> {
    let to_node = graph.get_node(&edge.to.node_id);
    let from_node = graph.get_node(&edge.from.node_id);

    if let Some(Invocation::Iterate(_)) = to_node {
        if edge.to.field == "collection"
            && !is_iterator_valid(graph, &edge.to.node_id, registry, types, Some(&edge.from), None)
        {
            return Err(invalid_edge(edge, "would break the iterator's input shape"));
        }
    }
    if let Some(Invocation::Iterate(_)) = from_node {
        if edge.from.field == "item"
            && !is_iterator_valid(graph, &edge.from.node_id, registry, types, None, Some(&edge.to))
        {
            return Err(invalid_edge(edge, "would break the iterator's output shape"));
        }
    }
    if let Some(Invocation::Collect(_)) = to_node {
        if edge.to.field == "item"
            && !is_collector_valid(graph, &edge.to.node_id, registry, types, Some(&edge.from), None)
        {
            return Err(invalid_edge(edge, "would break the collector's input shape"));
        }
    }
    if let Some(Invocation::Collect(_)) = from_node {
        if edge.from.field == "collection"
            && !is_collector_valid(graph, &edge.from.node_id, registry, types, None, Some(&edge.to))
        {
            return Err(invalid_edge(edge, "would break the collector's output shape"));
        }
    }
    Ok(())
}

fn invalid_edge(edge: &Edge, message: &str) -> EngineError {
    EngineError::InvalidEdge(edge.from.clone(), edge.to.clone(), message.to_string())
}

/// Resolves the declared output type of one edge's producer side.
fn output_type(graph: &Graph, conn: &EdgeConnection, registry: &InvocationRegistry) -> Option<FieldType> {
    graph
        .get_node(&conn.node_id)?
        .output_fields(registry)
        .into_iter()
        .find(|p| p.name == conn.field)
        .map(|p| p.field_type)
}

/// Resolves the declared input type of one edge's consumer side.
fn input_type(graph: &Graph, conn: &EdgeConnection, registry: &InvocationRegistry) -> Option<FieldType> {
    graph
        .get_node(&conn.node_id)?
        .input_fields(registry)
        .into_iter()
        .find(|p| p.name == conn.field)
        .map(|p| p.field_type)
}

/// The iterator shape invariant for node `node_path`: exactly one edge into
/// `collection`, whose producer is sequence-typed, and every edge out of
/// `item` compatible with that sequence's element type. `extra_input` /
/// `extra_output` fold in a not-yet-added edge before evaluating.
pub fn is_iterator_valid(
    graph: &Graph,
    node_path: &str,
    registry: &InvocationRegistry,
    types: &TypeRegistry,
    extra_input: Option<&EdgeConnection>,
    extra_output: Option<&EdgeConnection>,
) -> bool {
    let mut inputs: Vec<EdgeConnection> = graph
        .input_edges_for_field(node_path, "collection")
        .into_iter()
        .map(|e| e.from)
        .collect();
    if let Some(extra) = extra_input {
        inputs.push(extra.clone());
    }
    let mut outputs: Vec<EdgeConnection> = graph
        .output_edges_for_field(node_path, "item")
        .into_iter()
        .map(|e| e.to)
        .collect();
    if let Some(extra) = extra_output {
        outputs.push(extra.clone());
    }

    if inputs.len() != 1 {
        return false;
    }
    let Some(input_field_type) = output_type(graph, &inputs[0], registry) else {
        return false;
    };
    let Some(element_type) = input_field_type.element_type().cloned() else {
        return false;
    };

    let checker = PortTypeChecker::new(types);
    outputs.iter().all(|conn| {
        input_type(graph, conn, registry)
            .map(|t| checker.compatible(&element_type, &t))
            .unwrap_or(false)
    })
}

/// The collector shape invariant for node `node_path`: the producer types
/// feeding `item` (sequence producers contributing their element type, the
/// absent-value sentinel excluded) must have exactly one nominal root, and
/// every consumer of `collection` must declare a sequence type whose element
/// type is a supertype of that root.
pub fn is_collector_valid(
    graph: &Graph,
    node_path: &str,
    registry: &InvocationRegistry,
    types: &TypeRegistry,
    extra_input: Option<&EdgeConnection>,
    extra_output: Option<&EdgeConnection>,
) -> bool {
    let mut inputs: Vec<EdgeConnection> = graph
        .input_edges_for_field(node_path, "item")
        .into_iter()
        .map(|e| e.from)
        .collect();
    if let Some(extra) = extra_input {
        inputs.push(extra.clone());
    }
    let mut outputs: Vec<EdgeConnection> = graph
        .output_edges_for_field(node_path, "collection")
        .into_iter()
        .map(|e| e.to)
        .collect();
    if let Some(extra) = extra_output {
        outputs.push(extra.clone());
    }

    let input_types: Vec<FieldType> = inputs
        .iter()
        .filter_map(|conn| output_type(graph, conn, registry))
        .collect();
    if input_types.len() != inputs.len() {
        return false; // an input edge resolved to no declared type at all
    }

    let candidate_names: Vec<String> = input_types
        .iter()
        .filter_map(|t| match t {
            FieldType::Named(n) if !t.is_none_sentinel() => Some(n.clone()),
            FieldType::Sequence(elem) => match elem.as_ref() {
                FieldType::Named(n) => Some(n.clone()),
                _ => None,
            },
            _ => None,
        })
        .collect();
    if candidate_names.len() != input_types.len() {
        return false; // some input wasn't a nominal or sequence-of-nominal type
    }
    let Some(root) = nominal_root(types, &candidate_names) else {
        return false;
    };

    if outputs.is_empty() {
        return true;
    }
    outputs.iter().all(|conn| {
        input_type(graph, conn, registry)
            .and_then(|t| match t {
                FieldType::Sequence(elem) => match *elem {
                    FieldType::Named(n) => Some(n),
                    _ => None,
                },
                _ => None,
            })
            .map(|consumer_elem| types.is_subtype(&root, &consumer_elem) || consumer_elem == root)
            .unwrap_or(false)
    })
}

/// The single nominal root of a set of named types: exactly one name that is
/// a (non-strict) supertype of every other name in the set. Returns `None`
/// if the set is empty or has more than one maximal ancestor.
fn nominal_root(types: &TypeRegistry, names: &[String]) -> Option<String> {
    if names.is_empty() {
        return None;
    }
    let unique: Vec<&String> = {
        let mut seen = std::collections::HashSet::new();
        names.iter().filter(|n| seen.insert(n.as_str())).collect()
    };
    let roots: Vec<&String> = unique
        .iter()
        .filter(|candidate| {
            unique
                .iter()
                .all(|other| *other == **candidate || types.is_subtype(other, candidate))
        })
        .copied()
        .collect();
    if roots.len() == 1 {
        Some(roots[0].clone())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::{CollectInvocation, CustomInvocation, IterateInvocation, InvocationSchema, PortSchema};
    use serde_json::Map;

    fn test_registry() -> InvocationRegistry {
        let mut registry = InvocationRegistry::new();
        registry.register_schema(
            "emitter",
            InvocationSchema {
                inputs: vec![],
                outputs: vec![PortSchema::new("items", FieldType::sequence_of(FieldType::named("int")))],
            },
        );
        registry.register_schema(
            "consumer",
            InvocationSchema {
                inputs: vec![PortSchema::new("value", FieldType::named("int"))],
                outputs: vec![],
            },
        );
        registry.register_schema(
            "collection_consumer",
            InvocationSchema {
                inputs: vec![PortSchema::new(
                    "values",
                    FieldType::sequence_of(FieldType::named("int")),
                )],
                outputs: vec![],
            },
        );
        registry
    }

    fn custom(id: &str, node_type: &str) -> Invocation {
        Invocation::Custom(CustomInvocation {
            id: id.to_string(),
            node_type: node_type.to_string(),
            data: Map::new(),
        })
    }

    #[test]
    fn iterator_requires_sequence_typed_input() {
        let registry = test_registry();
        let types = TypeRegistry::new();
        let mut g = Graph::new("g");
        g.add_node(custom("consumer_only", "consumer")).unwrap();
        g.add_node(Invocation::Iterate(IterateInvocation {
            id: "iter".into(),
            ..Default::default()
        }))
        .unwrap();
        // non-sequence producer feeding `collection` should be rejected
        assert!(!is_iterator_valid(
            &g,
            "iter",
            &registry,
            &types,
            Some(&EdgeConnection::new("consumer_only", "value")),
            None,
        ));
    }

    #[test]
    fn iterator_accepts_sequence_producer_and_compatible_consumer() {
        let registry = test_registry();
        let types = TypeRegistry::new();
        let mut g = Graph::new("g");
        g.add_node(custom("emit", "emitter")).unwrap();
        g.add_node(custom("consume", "consumer")).unwrap();
        g.add_node(Invocation::Iterate(IterateInvocation {
            id: "iter".into(),
            ..Default::default()
        }))
        .unwrap();
        g.add_edge(
            Edge::new(EdgeConnection::new("emit", "items"), EdgeConnection::new("iter", "collection")),
            &registry,
            &types,
        )
        .unwrap();
        assert!(is_iterator_valid(
            &g,
            "iter",
            &registry,
            &types,
            None,
            Some(&EdgeConnection::new("consume", "value")),
        ));
    }

    #[test]
    fn collector_rejects_two_unrelated_producer_types() {
        let mut registry = test_registry();
        registry.register_schema(
            "string_emitter",
            InvocationSchema {
                inputs: vec![],
                outputs: vec![PortSchema::new("value", FieldType::named("string"))],
            },
        );
        registry.register_schema(
            "int_emitter",
            InvocationSchema {
                inputs: vec![],
                outputs: vec![PortSchema::new("value", FieldType::named("int"))],
            },
        );
        let types = TypeRegistry::new();
        let mut g = Graph::new("g");
        g.add_node(custom("s", "string_emitter")).unwrap();
        g.add_node(custom("i", "int_emitter")).unwrap();
        g.add_node(Invocation::Collect(CollectInvocation {
            id: "coll".into(),
            collection: vec![],
        }))
        .unwrap();
        g.add_edge(
            Edge::new(EdgeConnection::new("s", "value"), EdgeConnection::new("coll", "item")),
            &registry,
            &types,
        )
        .unwrap();
        assert!(!is_collector_valid(
            &g,
            "coll",
            &registry,
            &types,
            Some(&EdgeConnection::new("i", "value")),
            None,
        ));
    }

    #[test]
    fn collector_finds_unique_nominal_root_over_subtypes() {
        let mut registry = test_registry();
        registry.register_schema(
            "jpeg_emitter",
            InvocationSchema {
                inputs: vec![],
                outputs: vec![PortSchema::new("value", FieldType::named("Jpeg"))],
            },
        );
        registry.register_schema(
            "png_emitter",
            InvocationSchema {
                inputs: vec![],
                outputs: vec![PortSchema::new("value", FieldType::named("Png"))],
            },
        );
        registry.register_schema(
            "image_collection_consumer",
            InvocationSchema {
                inputs: vec![PortSchema::new(
                    "values",
                    FieldType::sequence_of(FieldType::named("Image")),
                )],
                outputs: vec![],
            },
        );
        let mut types = TypeRegistry::new();
        types.register_subtype("Jpeg", "Image");
        types.register_subtype("Png", "Image");

        let mut g = Graph::new("g");
        g.add_node(custom("j", "jpeg_emitter")).unwrap();
        g.add_node(custom("p", "png_emitter")).unwrap();
        g.add_node(custom("out", "image_collection_consumer")).unwrap();
        g.add_node(Invocation::Collect(CollectInvocation {
            id: "coll".into(),
            collection: vec![],
        }))
        .unwrap();
        g.add_edge(
            Edge::new(EdgeConnection::new("j", "value"), EdgeConnection::new("coll", "item")),
            &registry,
            &types,
        )
        .unwrap();
        g.add_edge(
            Edge::new(EdgeConnection::new("p", "value"), EdgeConnection::new("coll", "item")),
            &registry,
            &types,
        )
        .unwrap();
        assert!(is_collector_valid(
            &g,
            "coll",
            &registry,
            &types,
            None,
            Some(&EdgeConnection::new("out", "values")),
        ));
    }

    #[test]
    fn collector_with_zero_inputs_has_no_nominal_root() {
        let registry = test_registry();
        let types = TypeRegistry::new();
        let g = Graph::new("g");
        assert!(!is_collector_valid(&g, "coll", &registry, &types, None, None));
    }
}
