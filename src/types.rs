//! The typed-field model and the port compatibility rules.
//!
//! Every invocation variant declares its input and output fields in terms of
//! [`FieldType`]. The engine never discovers these by runtime reflection (Rust
//! has none to speak of); instead each variant registers its field schema once,
//! up front, in [`crate::invocation::InvocationRegistry`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sentinel standing in for "no value" in a nullable field's type-argument set.
pub const NONE_SENTINEL: &str = "none";

/// The declared type of a node's input or output field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldType {
    /// Compatible with every other type on either side of a connection.
    Any,
    /// A nominal type identified by name; subtyping between names is declared
    /// separately in a [`TypeRegistry`].
    Named(String),
    /// A sequence whose elements are of the given type.
    Sequence(Box<FieldType>),
    /// The union of `inner` and the absent-value sentinel.
    Nullable(Box<FieldType>),
    /// An explicit union of member types.
    Union(Vec<FieldType>),
}

impl FieldType {
    pub fn named(name: impl Into<String>) -> Self {
        FieldType::Named(name.into())
    }

    pub fn sequence_of(elem: FieldType) -> Self {
        FieldType::Sequence(Box::new(elem))
    }

    pub fn nullable(inner: FieldType) -> Self {
        FieldType::Nullable(Box::new(inner))
    }

    /// The element type if this is a sequence, otherwise `None`.
    pub fn element_type(&self) -> Option<&FieldType> {
        match self {
            FieldType::Sequence(elem) => Some(elem),
            _ => None,
        }
    }

    pub fn is_none_sentinel(&self) -> bool {
        matches!(self, FieldType::Named(n) if n == NONE_SENTINEL)
    }

    /// The type arguments exposed by this type for rules 3/4 of `compatible`:
    /// an explicit union's members, or a nullable's inner type plus the
    /// absent-value sentinel. Every other type has no type arguments.
    fn type_args(&self) -> Vec<FieldType> {
        match self {
            FieldType::Union(members) => members.clone(),
            FieldType::Nullable(inner) => {
                vec![(**inner).clone(), FieldType::Named(NONE_SENTINEL.to_string())]
            }
            _ => Vec::new(),
        }
    }
}

/// Declares nominal subtype relationships between named field types.
///
/// Registered once per edge in the type hierarchy (child -> immediate
/// parent); `is_subtype` walks the chain transitively.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    parents: HashMap<String, String>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares that `child` is a direct subtype of `parent`.
    pub fn register_subtype(&mut self, child: impl Into<String>, parent: impl Into<String>) {
        self.parents.insert(child.into(), parent.into());
    }

    /// True if `sub` is `sup`, or a (possibly transitive) subtype of `sup`.
    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        if sub == sup {
            return true;
        }
        let mut current = sub;
        let mut seen = std::collections::HashSet::new();
        while let Some(parent) = self.parents.get(current) {
            if !seen.insert(current.to_string()) {
                break; // malformed cyclic registration; don't loop forever
            }
            if parent == sup {
                return true;
            }
            current = parent;
        }
        false
    }

    /// The nearest common nominal ancestor (including either argument) of two
    /// named types, used by the collector shape invariant to find a unique
    /// nominal root over several producer types. Returns `None` if neither is
    /// an ancestor of the other.
    pub fn nominal_join(&self, a: &str, b: &str) -> Option<String> {
        if self.is_subtype(a, b) {
            Some(b.to_string())
        } else if self.is_subtype(b, a) {
            Some(a.to_string())
        } else {
            None
        }
    }
}

/// Decides whether one node's output field can connect to another's input
/// field, per an ordered set of compatibility rules.
pub struct PortTypeChecker<'a> {
    registry: &'a TypeRegistry,
}

impl<'a> PortTypeChecker<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Self { registry }
    }

    /// `compatible(from_type, to_type)`. Rules are evaluated in order; the
    /// first match wins.
    pub fn compatible(&self, from_type: &FieldType, to_type: &FieldType) -> bool {
        // 1. wildcard on either side
        if matches!(from_type, FieldType::Any) || matches!(to_type, FieldType::Any) {
            return true;
        }
        // 2. equal
        if from_type == to_type {
            return true;
        }
        // 3. from_type is a type argument of to_type
        if to_type.type_args().iter().any(|t| t == from_type) {
            return true;
        }
        // 4. to_type is a type argument of from_type
        if from_type.type_args().iter().any(|t| t == to_type) {
            return true;
        }
        // 5. nominal subtyping
        if let (FieldType::Named(from_name), FieldType::Named(to_name)) = (from_type, to_type) {
            if self.registry.is_subtype(from_name, to_name) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_is_always_compatible() {
        let reg = TypeRegistry::new();
        let checker = PortTypeChecker::new(&reg);
        assert!(checker.compatible(&FieldType::Any, &FieldType::named("Image")));
        assert!(checker.compatible(&FieldType::named("Image"), &FieldType::Any));
    }

    #[test]
    fn equal_types_are_compatible() {
        let reg = TypeRegistry::new();
        let checker = PortTypeChecker::new(&reg);
        assert!(checker.compatible(&FieldType::named("int"), &FieldType::named("int")));
    }

    #[test]
    fn nullable_union_both_directions() {
        let reg = TypeRegistry::new();
        let checker = PortTypeChecker::new(&reg);
        let nullable_int = FieldType::nullable(FieldType::named("int"));
        assert!(checker.compatible(&FieldType::named("int"), &nullable_int));
        assert!(checker.compatible(&nullable_int, &FieldType::named("int")));
        assert!(checker.compatible(
            &FieldType::named(NONE_SENTINEL),
            &nullable_int
        ));
    }

    #[test]
    fn nominal_subtype_is_compatible_one_direction() {
        let mut reg = TypeRegistry::new();
        reg.register_subtype("JpegImage", "Image");
        let checker = PortTypeChecker::new(&reg);
        assert!(checker.compatible(&FieldType::named("JpegImage"), &FieldType::named("Image")));
        assert!(!checker.compatible(&FieldType::named("Image"), &FieldType::named("JpegImage")));
    }

    #[test]
    fn unrelated_named_types_are_incompatible() {
        let reg = TypeRegistry::new();
        let checker = PortTypeChecker::new(&reg);
        assert!(!checker.compatible(&FieldType::named("int"), &FieldType::named("string")));
    }

    #[test]
    fn sequences_are_distinct_from_their_element_type() {
        let reg = TypeRegistry::new();
        let checker = PortTypeChecker::new(&reg);
        let seq_int = FieldType::sequence_of(FieldType::named("int"));
        assert!(!checker.compatible(&seq_int, &FieldType::named("int")));
        assert!(checker.compatible(&seq_int, &seq_int));
    }

    #[test]
    fn nominal_join_finds_common_ancestor() {
        let mut reg = TypeRegistry::new();
        reg.register_subtype("Jpeg", "Image");
        reg.register_subtype("Png", "Image");
        assert_eq!(reg.nominal_join("Jpeg", "Image").as_deref(), Some("Image"));
        assert_eq!(reg.nominal_join("Jpeg", "Png"), None);
    }
}
