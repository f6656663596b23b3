//! The authored graph: node storage, subgraph path resolution, and the
//! mutation operations with their structural invariants.

use crate::error::{EngineError, Result};
use crate::flat_view::FlatGraph;
use crate::invocation::{GraphInvocation, Invocation};
use crate::iter_collect;
use crate::registry::InvocationRegistry;
use crate::types::{PortTypeChecker, TypeRegistry};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One end of a wire: a node path paired with a named field on that node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeConnection {
    pub node_id: String,
    pub field: String,
}

impl EdgeConnection {
    pub fn new(node_id: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            field: field.into(),
        }
    }
}

/// A directed wire from a producer's output field to a consumer's input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: EdgeConnection,
    pub to: EdgeConnection,
}

impl Edge {
    pub fn new(from: EdgeConnection, to: EdgeConnection) -> Self {
        Self { from, to }
    }
}

/// A user-authored directed graph of invocation nodes, field-to-field edges
/// between them, and (via `GraphInvocation` nodes) nested subgraphs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub id: String,
    pub nodes: IndexMap<String, Invocation>,
    pub edges: Vec<Edge>,
}

impl Default for Graph {
    fn default() -> Self {
        Self {
            id: String::new(),
            nodes: IndexMap::new(),
            edges: Vec::new(),
        }
    }
}

impl Graph {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn add_node(&mut self, node: Invocation) -> Result<()> {
        if self.nodes.contains_key(node.id()) {
            return Err(EngineError::NodeAlreadyInGraph(node.id().to_string()));
        }
        self.nodes.insert(node.id().to_string(), node);
        Ok(())
    }

    pub fn has_node(&self, path: &str) -> bool {
        self.get_node(path).is_some()
    }

    pub fn get_node(&self, path: &str) -> Option<&Invocation> {
        let (graph, local) = self.get_graph_and_node(path).ok()?;
        graph.nodes.get(local)
    }

    /// Subgraph path resolution: returns the graph that directly owns
    /// the node at `path`, along with its local id within that graph.
    pub fn get_graph_and_node<'a, 'b>(&'a self, path: &'b str) -> Result<(&'a Graph, &'b str)> {
        if self.nodes.contains_key(path) {
            return Ok((self, path));
        }
        let (head, rest) = path
            .split_once('.')
            .ok_or_else(|| EngineError::NodeNotFound(path.to_string()))?;
        let head_node = self
            .nodes
            .get(head)
            .ok_or_else(|| EngineError::NodeNotFound(path.to_string()))?;
        match head_node {
            Invocation::Graph(g) => g.graph.get_graph_and_node(rest),
            _ => Err(EngineError::NodeNotFound(path.to_string())),
        }
    }

    pub fn get_graph_and_node_mut<'a, 'b>(&'a mut self, path: &'b str) -> Result<(&'a mut Graph, &'b str)> {
        if self.nodes.contains_key(path) {
            return Ok((self, path));
        }
        let (head, rest) = path
            .split_once('.')
            .ok_or_else(|| EngineError::NodeNotFound(path.to_string()))?;
        let head_node = self
            .nodes
            .get_mut(head)
            .ok_or_else(|| EngineError::NodeNotFound(path.to_string()))?;
        match head_node {
            Invocation::Graph(g) => g.graph.get_graph_and_node_mut(rest),
            _ => Err(EngineError::NodeNotFound(path.to_string())),
        }
    }

    /// Every inbound edge at any level whose destination path, resolved
    /// relative to this graph, equals `path` exactly.
    pub fn input_edges(&self, path: &str) -> Vec<Edge> {
        let mut found: Vec<Edge> = self
            .edges
            .iter()
            .filter(|e| e.to.node_id == path)
            .cloned()
            .collect();
        if let Some((head, rest)) = path.split_once('.') {
            if let Some(Invocation::Graph(g)) = self.nodes.get(head) {
                found.extend(g.graph.input_edges(rest));
            }
        }
        found
    }

    /// Every outbound edge at any level whose source path, resolved relative
    /// to this graph, equals `path` exactly.
    pub fn output_edges(&self, path: &str) -> Vec<Edge> {
        let mut found: Vec<Edge> = self
            .edges
            .iter()
            .filter(|e| e.from.node_id == path)
            .cloned()
            .collect();
        if let Some((head, rest)) = path.split_once('.') {
            if let Some(Invocation::Graph(g)) = self.nodes.get(head) {
                found.extend(g.graph.output_edges(rest));
            }
        }
        found
    }

    pub fn input_edges_for_field(&self, path: &str, field: &str) -> Vec<Edge> {
        self.input_edges(path)
            .into_iter()
            .filter(|e| e.to.field == field)
            .collect()
    }

    pub fn output_edges_for_field(&self, path: &str, field: &str) -> Vec<Edge> {
        self.output_edges(path)
            .into_iter()
            .filter(|e| e.from.field == field)
            .collect()
    }

    /// Adds `edge`, checking every invariant in order. On success the
    /// edge is appended (deduplicated).
    pub fn add_edge(
        &mut self,
        edge: Edge,
        registry: &InvocationRegistry,
        types: &TypeRegistry,
    ) -> Result<()> {
        // 1. both endpoints resolve
        let from_node = self
            .get_node(&edge.from.node_id)
            .ok_or_else(|| EngineError::NodeNotFound(edge.from.node_id.clone()))?;
        let to_node = self
            .get_node(&edge.to.node_id)
            .ok_or_else(|| EngineError::NodeNotFound(edge.to.node_id.clone()))?;

        // 2. destination port has no existing inbound edge, unless it's Collect.item
        let existing = self.input_edges_for_field(&edge.to.node_id, &edge.to.field);
        if !existing.is_empty() && !matches!(to_node, Invocation::Collect(_)) {
            return Err(EngineError::InvalidEdge(
                edge.from.clone(),
                edge.to.clone(),
                "destination port already has an inbound edge".to_string(),
            ));
        }

        // 3. the flattened graph stays acyclic with this edge added
        let flat = FlatGraph::build(self);
        if !flat.stays_acyclic_with(&edge.from.node_id, &edge.to.node_id) {
            return Err(EngineError::InvalidEdge(
                edge.from.clone(),
                edge.to.clone(),
                "would introduce a cycle".to_string(),
            ));
        }

        // 4. port types are compatible
        let from_type = from_node
            .output_fields(registry)
            .into_iter()
            .find(|p| p.name == edge.from.field)
            .map(|p| p.field_type)
            .ok_or_else(|| {
                EngineError::NodeNotFound(format!("{}.{}", edge.from.node_id, edge.from.field))
            })?;
        let to_type = to_node
            .input_fields(registry)
            .into_iter()
            .find(|p| p.name == edge.to.field)
            .map(|p| p.field_type)
            .ok_or_else(|| {
                EngineError::NodeNotFound(format!("{}.{}", edge.to.node_id, edge.to.field))
            })?;
        let checker = PortTypeChecker::new(types);
        if !checker.compatible(&from_type, &to_type) {
            return Err(EngineError::InvalidEdge(
                edge.from.clone(),
                edge.to.clone(),
                "incompatible port types".to_string(),
            ));
        }

        // 5. iterator/collector shape rules, with this edge hypothetically present
        iter_collect::check_hypothetical_edge(self, &edge, registry, types)?;

        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
        Ok(())
    }

    /// Silent no-op if the edge isn't present.
    pub fn delete_edge(&mut self, edge: &Edge) {
        if let Some(pos) = self.edges.iter().position(|e| e == edge) {
            self.edges.remove(pos);
        }
    }

    /// Deletes all input/output edges referencing `path` (at whichever level
    /// they live) and then removes the node. Silent no-op if `path` doesn't
    /// resolve.
    pub fn delete_node(&mut self, path: &str) {
        let local = match self.get_graph_and_node(path) {
            Ok((_, local)) => local.to_string(),
            Err(_) => return,
        };
        self.retain_edges_not_referencing(path);
        if let Ok((owner, _)) = self.get_graph_and_node_mut(path) {
            owner.nodes.shift_remove(&local);
        }
    }

    fn retain_edges_not_referencing(&mut self, path: &str) {
        self.edges
            .retain(|e| e.from.node_id != path && e.to.node_id != path);
        if let Some((head, rest)) = path.split_once('.') {
            if let Some(Invocation::Graph(g)) = self.nodes.get_mut(head) {
                g.graph.retain_edges_not_referencing(rest);
            }
        }
    }

    /// Replaces the node at `path` with `new_node`. Fails with
    /// [`EngineError::TypeMismatch`] if the variants differ. If the id
    /// changes, rewires every edge (at any level) referencing the node's old
    /// path, replacing only the renamed node's own path segment and leaving
    /// the rest of each path intact.
    pub fn update_node(&mut self, path: &str, new_node: Invocation) -> Result<()> {
        let new_id = new_node.id().to_string();
        {
            let (owner, local) = self.get_graph_and_node_mut(path)?;
            let local = local.to_string();
            let existing = owner
                .nodes
                .get(&local)
                .ok_or_else(|| EngineError::NodeNotFound(path.to_string()))?;
            if std::mem::discriminant(existing) != std::mem::discriminant(&new_node) {
                return Err(EngineError::TypeMismatch(
                    path.to_string(),
                    format!("{} is not a {}", existing.type_tag(), new_node.type_tag()),
                ));
            }
            if new_id != local && owner.nodes.contains_key(&new_id) {
                return Err(EngineError::NodeAlreadyInGraph(new_id));
            }
            owner.nodes.shift_remove(&local);
            owner.nodes.insert(new_id.clone(), new_node);
        }
        if new_id != *path.rsplit('.').next().unwrap_or(path) {
            self.rewrite_edges_for_rename(path, &new_id);
        }
        Ok(())
    }

    /// Rewrites, at every level from `self` down to the renamed node, any
    /// edge whose node_id exactly equals the (progressively suffix-stripped)
    /// old path, replacing only the last path segment with `new_local_id`.
    fn rewrite_edges_for_rename(&mut self, old_path: &str, new_local_id: &str) {
        let new_path = replace_last_segment(old_path, new_local_id);
        for e in self.edges.iter_mut() {
            if e.from.node_id == old_path {
                e.from.node_id = new_path.clone();
            }
            if e.to.node_id == old_path {
                e.to.node_id = new_path.clone();
            }
        }
        if let Some((head, rest)) = old_path.split_once('.') {
            if let Some(Invocation::Graph(g)) = self.nodes.get_mut(head) {
                g.graph.rewrite_edges_for_rename(rest, new_local_id);
            }
        }
    }

    /// Recursively validates subgraphs, then this graph's own invariants.
    pub fn is_valid(&self, registry: &InvocationRegistry, types: &TypeRegistry) -> bool {
        for node in self.nodes.values() {
            if let Invocation::Graph(g) = node {
                if !g.graph.is_valid(registry, types) {
                    return false;
                }
            }
        }

        let node_ids: std::collections::HashSet<&str> = self
            .edges
            .iter()
            .flat_map(|e| [e.from.node_id.as_str(), e.to.node_id.as_str()])
            .collect();
        if !node_ids.iter().all(|id| self.has_node(id)) {
            return false;
        }

        if FlatGraph::build(self).toposort().is_err() {
            return false;
        }

        let checker = PortTypeChecker::new(types);
        for e in &self.edges {
            let (Some(from), Some(to)) = (self.get_node(&e.from.node_id), self.get_node(&e.to.node_id)) else {
                return false;
            };
            let from_ty = from
                .output_fields(registry)
                .into_iter()
                .find(|p| p.name == e.from.field)
                .map(|p| p.field_type);
            let to_ty = to
                .input_fields(registry)
                .into_iter()
                .find(|p| p.name == e.to.field)
                .map(|p| p.field_type);
            match (from_ty, to_ty) {
                (Some(f), Some(t)) if checker.compatible(&f, &t) => {}
                _ => return false,
            }
        }

        for (id, node) in &self.nodes {
            match node {
                Invocation::Iterate(_) => {
                    if !iter_collect::is_iterator_valid(self, id, registry, types, None, None) {
                        return false;
                    }
                }
                Invocation::Collect(_) => {
                    if !iter_collect::is_collector_valid(self, id, registry, types, None, None) {
                        return false;
                    }
                }
                _ => {}
            }
        }

        true
    }
}

/// Replaces only the final `.`-delimited segment of `path` with `new_local`,
/// leaving everything before it intact. This is the fix for the renamed-node
/// path rewriting bug described in the design notes: the naive approach of
/// slicing from the last `.` onward and re-concatenating can reintroduce a
/// stray leading dot or duplicate the old segment.
fn replace_last_segment(path: &str, new_local: &str) -> String {
    match path.rfind('.') {
        Some(idx) => format!("{}.{}", &path[..idx], new_local),
        None => new_local.to_string(),
    }
}

/// Convenience for constructing a `GraphInvocation` node embedding a subgraph.
impl GraphInvocation {
    pub fn new(id: impl Into<String>, graph: Graph) -> Self {
        Self { id: id.into(), graph }
    }
}
