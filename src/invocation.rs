//! The invocation (node) data model: the closed tagged union of variants the
//! graph can hold, plus the per-variant field schema.
//!
//! Three variants are engine-defined (`GraphInvocation`, `IterateInvocation`,
//! `CollectInvocation`); every other variant is a [`CustomInvocation`] whose
//! field schema is looked up by its `node_type` discriminator in an
//! [`crate::registry::InvocationRegistry`] populated by the invocation library
//! at startup, not discovered by reflection.

use crate::graph::Graph;
use crate::types::FieldType;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// The output record produced by one completed invocation: a bag of named
/// field values.
pub type OutputValue = Map<String, Value>;

/// One named, typed input or output port declared by an invocation variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSchema {
    pub name: String,
    pub field_type: FieldType,
}

impl PortSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// The declared input/output field schema of one invocation variant.
#[derive(Debug, Clone, Default)]
pub struct InvocationSchema {
    pub inputs: Vec<PortSchema>,
    pub outputs: Vec<PortSchema>,
}

impl InvocationSchema {
    pub fn input_type(&self, field: &str) -> Option<&FieldType> {
        self.inputs.iter().find(|p| p.name == field).map(|p| &p.field_type)
    }

    pub fn output_type(&self, field: &str) -> Option<&FieldType> {
        self.outputs.iter().find(|p| p.name == field).map(|p| &p.field_type)
    }
}

/// A `GraphInvocation` embeds a child [`Graph`]. It never enters the flat
/// view directly (its contents are inlined and path-prefixed instead), so it
/// is never invoked itself; its declared output is opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphInvocation {
    pub id: String,
    pub graph: Graph,
}

/// Fans a sequence out into one activation per element. `index` is set during
/// materialization to the 0-based ordinal of the element this prepared copy
/// holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IterateInvocation {
    pub id: String,
    #[serde(default)]
    pub collection: Vec<Value>,
    #[serde(default)]
    pub index: Option<u32>,
}

/// Fans many values in on its `item` port (the only port in the graph
/// allowed more than one inbound edge) and emits the gathered sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CollectInvocation {
    pub id: String,
    #[serde(default)]
    pub collection: Vec<Value>,
}

/// A variant registered by the invocation library at large. Its field schema
/// lives in the [`crate::registry::InvocationRegistry`] under `node_type`;
/// field values are stored generically as a JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CustomInvocation {
    pub id: String,
    pub node_type: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// One node in a [`Graph`]: the closed tagged union of node variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Graph(GraphInvocation),
    Iterate(IterateInvocation),
    Collect(CollectInvocation),
    Custom(CustomInvocation),
}

impl Invocation {
    pub fn id(&self) -> &str {
        match self {
            Invocation::Graph(n) => &n.id,
            Invocation::Iterate(n) => &n.id,
            Invocation::Collect(n) => &n.id,
            Invocation::Custom(n) => &n.id,
        }
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        match self {
            Invocation::Graph(n) => n.id = id,
            Invocation::Iterate(n) => n.id = id,
            Invocation::Collect(n) => n.id = id,
            Invocation::Custom(n) => n.id = id,
        }
    }

    /// The stable discriminator string identifying this node's variant.
    pub fn type_tag(&self) -> &str {
        match self {
            Invocation::Graph(_) => "graph",
            Invocation::Iterate(_) => "iterate",
            Invocation::Collect(_) => "collect",
            Invocation::Custom(n) => &n.node_type,
        }
    }

    /// Declared input fields. For the three engine variants these are fixed;
    /// `Iterate.collection`/`Collect.item` are deliberately declared as
    /// wildcard-typed here — the concrete element type they bind to is
    /// resolved dynamically by the iterator/collector shape checker
    /// (`crate::iter_collect`), not by this static schema.
    pub fn input_fields(&self, registry: &crate::registry::InvocationRegistry) -> Vec<PortSchema> {
        match self {
            Invocation::Graph(_) => Vec::new(),
            Invocation::Iterate(_) => vec![PortSchema::new(
                "collection",
                FieldType::sequence_of(FieldType::Any),
            )],
            Invocation::Collect(_) => vec![PortSchema::new("item", FieldType::Any)],
            Invocation::Custom(n) => registry
                .schema(&n.node_type)
                .map(|s| s.inputs.clone())
                .unwrap_or_default(),
        }
    }

    /// Declared output fields; see [`Invocation::input_fields`] for why the
    /// engine variants' ports are wildcard-typed here.
    pub fn output_fields(&self, registry: &crate::registry::InvocationRegistry) -> Vec<PortSchema> {
        match self {
            Invocation::Graph(_) => vec![PortSchema::new("graph_output", FieldType::Any)],
            Invocation::Iterate(_) => vec![PortSchema::new("item", FieldType::Any)],
            Invocation::Collect(_) => {
                vec![PortSchema::new("collection", FieldType::sequence_of(FieldType::Any))]
            }
            Invocation::Custom(n) => registry
                .schema(&n.node_type)
                .map(|s| s.outputs.clone())
                .unwrap_or_default(),
        }
    }

    /// Assigns a value read from a producer's output to one of this node's
    /// input fields, during input preparation. `Collect.collection`
    /// is assigned as a whole list by the execution state directly, rather
    /// than going through this per-field path, since it fans in from many
    /// edges at once.
    pub fn set_input(&mut self, field: &str, value: Value) {
        match self {
            Invocation::Iterate(n) if field == "collection" => {
                n.collection = value.as_array().cloned().unwrap_or_default();
            }
            Invocation::Custom(n) => {
                n.data.insert(field.to_string(), value);
            }
            _ => {}
        }
    }

    /// Deep-copies the declared fields of this node, assigning it a fresh id.
    /// Prepared copies never share mutable state.
    pub fn materialize(&self, fresh_id: impl Into<String>) -> Invocation {
        let mut copy = self.clone();
        copy.set_id(fresh_id);
        copy
    }
}

/// Invocations are persisted as a tagged-union document: every node carries
/// its `type` discriminator so deserializers can pick the right variant,
/// with unrecognized discriminators falling through to [`CustomInvocation`].
impl Serialize for Invocation {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut value = match self {
            Invocation::Graph(n) => serde_json::to_value(n),
            Invocation::Iterate(n) => serde_json::to_value(n),
            Invocation::Collect(n) => serde_json::to_value(n),
            Invocation::Custom(n) => {
                let mut map = n.data.clone();
                map.insert("id".to_string(), Value::String(n.id.clone()));
                Ok(Value::Object(map))
            }
        }
        .map_err(serde::ser::Error::custom)?;
        if let Value::Object(ref mut map) = value {
            map.insert("type".to_string(), Value::String(self.type_tag().to_string()));
        }
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Invocation {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let type_tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| de::Error::missing_field("type"))?
            .to_string();
        match type_tag.as_str() {
            "graph" => Ok(Invocation::Graph(
                serde_json::from_value(value).map_err(de::Error::custom)?,
            )),
            "iterate" => Ok(Invocation::Iterate(
                serde_json::from_value(value).map_err(de::Error::custom)?,
            )),
            "collect" => Ok(Invocation::Collect(
                serde_json::from_value(value).map_err(de::Error::custom)?,
            )),
            other => {
                let mut obj = match value {
                    Value::Object(m) => m,
                    _ => return Err(de::Error::custom("expected a JSON object")),
                };
                obj.remove("type");
                let id = obj
                    .remove("id")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .ok_or_else(|| de::Error::missing_field("id"))?;
                Ok(Invocation::Custom(CustomInvocation {
                    id,
                    node_type: other.to_string(),
                    data: obj,
                }))
            }
        }
    }
}
