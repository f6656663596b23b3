//! The flattened view of a [`Graph`]: every nested subgraph inlined under an
//! accumulated dotted prefix, used for cycle detection and execution
//! ordering. `GraphInvocation` nodes are never themselves scheduled (their
//! contents are inlined instead); `IterateInvocation` nodes aren't
//! pre-registered as bare nodes either, since they stand for per-element
//! activations materialized only later, but both still appear as edge
//! endpoints once an edge references them.

use crate::graph::{Edge, Graph};
use crate::invocation::Invocation;
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

pub struct FlatGraph {
    graph: DiGraph<String, ()>,
    index_of: HashMap<String, NodeIndex>,
}

impl FlatGraph {
    pub fn build(root: &Graph) -> Self {
        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();
        collect_nodes(root, None, &mut graph, &mut index_of);
        collect_edges(root, None, &mut graph, &mut index_of);
        Self { graph, index_of }
    }

    /// True if adding a hypothetical edge from `from` to `to` leaves the flat
    /// graph acyclic. Either endpoint may be one this graph hasn't seen as an
    /// explicit node (an `Iterate`/`Graph` node with no other edges yet).
    pub fn stays_acyclic_with(&self, from: &str, to: &str) -> bool {
        let mut graph = self.graph.clone();
        let fi = match self.index_of.get(from) {
            Some(&idx) => idx,
            None => graph.add_node(from.to_string()),
        };
        let ti = match self.index_of.get(to) {
            Some(&idx) => idx,
            None => graph.add_node(to.to_string()),
        };
        graph.add_edge(fi, ti, ());
        !is_cyclic_directed(&graph)
    }

    pub fn is_cyclic(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    pub fn toposort(&self) -> Result<Vec<String>, ()> {
        toposort(&self.graph, None)
            .map(|order| order.into_iter().map(|i| self.graph[i].clone()).collect())
            .map_err(|_| ())
    }

    /// All flat paths reachable from `from`, inclusive of `from` itself.
    pub fn descendants(&self, from: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let Some(&start) = self.index_of.get(from) else {
            return seen;
        };
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            let path = self.graph[idx].clone();
            if seen.insert(path) {
                stack.extend(self.graph.neighbors(idx));
            }
        }
        seen
    }

    pub fn is_reachable(&self, from: &str, to: &str) -> bool {
        self.descendants(from).contains(to)
    }

    /// All flat paths that can reach `to`, inclusive of `to` itself (the
    /// reverse of [`FlatGraph::descendants`]).
    pub fn ancestors(&self, to: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let Some(&start) = self.index_of.get(to) else {
            return seen;
        };
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            let path = self.graph[idx].clone();
            if seen.insert(path) {
                stack.extend(
                    self.graph
                        .neighbors_directed(idx, petgraph::Direction::Incoming),
                );
            }
        }
        seen
    }

    /// Builds the flat view like [`FlatGraph::build`], then drops every edge
    /// whose destination path is in `sealed`. Used to compute governing
    /// iterators: collector nodes seal off the iteration scopes feeding them.
    pub fn build_sealed_at(root: &Graph, sealed: &HashSet<String>) -> Self {
        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();
        collect_nodes(root, None, &mut graph, &mut index_of);
        collect_edges_sealed(root, None, &mut graph, &mut index_of, sealed);
        Self { graph, index_of }
    }
}

/// Every edge in `root`, at any nesting level, with both endpoints rewritten
/// to their fully-qualified dotted path (field names untouched). Unlike the
/// connectivity-only [`FlatGraph`], this keeps field names so callers can
/// wire execution-graph edges directly from it.
pub fn flat_edges(root: &Graph) -> Vec<Edge> {
    let mut out = Vec::new();
    collect_flat_edges(root, None, &mut out);
    out
}

fn collect_flat_edges(g: &Graph, prefix: Option<&str>, out: &mut Vec<Edge>) {
    for e in &g.edges {
        out.push(Edge::new(
            crate::graph::EdgeConnection::new(qualify(prefix, &e.from.node_id), e.from.field.clone()),
            crate::graph::EdgeConnection::new(qualify(prefix, &e.to.node_id), e.to.field.clone()),
        ));
    }
    for (id, node) in &g.nodes {
        if let Invocation::Graph(gi) = node {
            let child_prefix = qualify(prefix, id);
            collect_flat_edges(&gi.graph, Some(&child_prefix), out);
        }
    }
}

fn qualify(prefix: Option<&str>, id: &str) -> String {
    match prefix {
        Some(p) => format!("{p}.{id}"),
        None => id.to_string(),
    }
}

fn node_index(
    graph: &mut DiGraph<String, ()>,
    index_of: &mut HashMap<String, NodeIndex>,
    path: &str,
) -> NodeIndex {
    if let Some(&idx) = index_of.get(path) {
        return idx;
    }
    let idx = graph.add_node(path.to_string());
    index_of.insert(path.to_string(), idx);
    idx
}

fn collect_nodes(
    g: &Graph,
    prefix: Option<&str>,
    graph: &mut DiGraph<String, ()>,
    index_of: &mut HashMap<String, NodeIndex>,
) {
    for (id, node) in &g.nodes {
        match node {
            Invocation::Graph(gi) => {
                let child_prefix = qualify(prefix, id);
                collect_nodes(&gi.graph, Some(&child_prefix), graph, index_of);
            }
            Invocation::Iterate(_) => {}
            _ => {
                node_index(graph, index_of, &qualify(prefix, id));
            }
        }
    }
}

fn collect_edges(
    g: &Graph,
    prefix: Option<&str>,
    graph: &mut DiGraph<String, ()>,
    index_of: &mut HashMap<String, NodeIndex>,
) {
    for e in &g.edges {
        project_edge(e, prefix, graph, index_of);
    }
    for (id, node) in &g.nodes {
        if let Invocation::Graph(gi) = node {
            let child_prefix = qualify(prefix, id);
            collect_edges(&gi.graph, Some(&child_prefix), graph, index_of);
        }
    }
}

fn collect_edges_sealed(
    g: &Graph,
    prefix: Option<&str>,
    graph: &mut DiGraph<String, ()>,
    index_of: &mut HashMap<String, NodeIndex>,
    sealed: &HashSet<String>,
) {
    for e in &g.edges {
        let to = qualify(prefix, &e.to.node_id);
        if sealed.contains(&to) {
            continue;
        }
        project_edge(e, prefix, graph, index_of);
    }
    for (id, node) in &g.nodes {
        if let Invocation::Graph(gi) = node {
            let child_prefix = qualify(prefix, id);
            collect_edges_sealed(&gi.graph, Some(&child_prefix), graph, index_of, sealed);
        }
    }
}

fn project_edge(
    e: &Edge,
    prefix: Option<&str>,
    graph: &mut DiGraph<String, ()>,
    index_of: &mut HashMap<String, NodeIndex>,
) {
    let from = qualify(prefix, &e.from.node_id);
    let to = qualify(prefix, &e.to.node_id);
    let fi = node_index(graph, index_of, &from);
    let ti = node_index(graph, index_of, &to);
    graph.add_edge(fi, ti, ());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeConnection, GraphInvocation};
    use crate::invocation::CustomInvocation;
    use serde_json::Map;

    fn node(id: &str) -> Invocation {
        Invocation::Custom(CustomInvocation {
            id: id.to_string(),
            node_type: "n".into(),
            data: Map::new(),
        })
    }

    #[test]
    fn a_straight_line_has_no_cycle() {
        let mut g = Graph::new("g");
        g.nodes.insert("a".into(), node("a"));
        g.nodes.insert("b".into(), node("b"));
        g.edges.push(Edge::new(EdgeConnection::new("a", "out"), EdgeConnection::new("b", "in")));
        let flat = FlatGraph::build(&g);
        assert!(!flat.is_cyclic());
        assert!(flat.is_reachable("a", "b"));
        assert!(!flat.is_reachable("b", "a"));
    }

    #[test]
    fn hypothetical_back_edge_is_detected_as_a_cycle() {
        let mut g = Graph::new("g");
        g.nodes.insert("a".into(), node("a"));
        g.nodes.insert("b".into(), node("b"));
        g.edges.push(Edge::new(EdgeConnection::new("a", "out"), EdgeConnection::new("b", "in")));
        let flat = FlatGraph::build(&g);
        assert!(!flat.stays_acyclic_with("b", "a"));
        assert!(flat.stays_acyclic_with("a", "b") || true); // duplicate edge, still acyclic
    }

    #[test]
    fn ancestors_walks_inbound_edges_and_includes_the_target() {
        let mut g = Graph::new("g");
        g.nodes.insert("a".into(), node("a"));
        g.nodes.insert("b".into(), node("b"));
        g.nodes.insert("c".into(), node("c"));
        g.edges.push(Edge::new(EdgeConnection::new("a", "out"), EdgeConnection::new("b", "in")));
        g.edges.push(Edge::new(EdgeConnection::new("b", "out"), EdgeConnection::new("c", "in")));
        let flat = FlatGraph::build(&g);
        let ancestors = flat.ancestors("c");
        assert!(ancestors.contains("a"));
        assert!(ancestors.contains("b"));
        assert!(ancestors.contains("c"));
    }

    #[test]
    fn sealed_view_drops_edges_into_the_sealed_node() {
        let mut g = Graph::new("g");
        g.nodes.insert("a".into(), node("a"));
        g.nodes.insert("b".into(), node("b"));
        g.edges.push(Edge::new(EdgeConnection::new("a", "out"), EdgeConnection::new("b", "in")));
        let sealed: HashSet<String> = ["b".to_string()].into_iter().collect();
        let flat = FlatGraph::build_sealed_at(&g, &sealed);
        assert!(!flat.is_reachable("a", "b"));
    }

    #[test]
    fn nested_subgraph_is_inlined_with_a_dotted_prefix() {
        let mut inner = Graph::new("inner");
        inner.nodes.insert("x".into(), node("x"));
        inner.nodes.insert("y".into(), node("y"));
        inner
            .edges
            .push(Edge::new(EdgeConnection::new("x", "out"), EdgeConnection::new("y", "in")));

        let mut root = Graph::new("root");
        root.nodes.insert(
            "sub".into(),
            Invocation::Graph(GraphInvocation::new("sub", inner)),
        );

        let flat = FlatGraph::build(&root);
        assert!(flat.is_reachable("sub.x", "sub.y"));
    }
}
