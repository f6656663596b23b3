//! Owns the expansion of a source [`Graph`] into an execution graph of
//! prepared (per-iteration) node copies, and drives that expansion forward
//! one ready node at a time via `next`/`complete`/`set_error`.

use crate::error::{EngineError, Result};
use crate::flat_view::FlatGraph;
use crate::graph::{Edge, EdgeConnection, Graph};
use crate::invocation::{Invocation, OutputValue};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// The dynamic state of one graph's execution: the expanding execution
/// graph, the bidirectional source/prepared mappings, and the outcomes
/// (`results`/`errors`) recorded so far.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphExecutionState {
    pub id: String,
    pub graph: Graph,
    pub execution_graph: Graph,
    pub executed: HashSet<String>,
    pub executed_history: Vec<String>,
    pub results: IndexMap<String, OutputValue>,
    pub errors: HashMap<String, String>,
    pub prepared_source_mapping: HashMap<String, String>,
    /// Source path -> its prepared copies, in the order they were
    /// materialized (iteration order). A `Collect` node gathers its inputs by
    /// walking this order, so it must not be reshuffled by a hash-based set.
    pub source_prepared_mapping: HashMap<String, IndexSet<String>>,
    next_prepared_ordinal: u64,
}

impl GraphExecutionState {
    pub fn new(id: impl Into<String>, graph: Graph) -> Self {
        Self {
            id: id.into(),
            execution_graph: Graph::new("execution"),
            graph,
            executed: HashSet::new(),
            executed_history: Vec::new(),
            results: IndexMap::new(),
            errors: HashMap::new(),
            prepared_source_mapping: HashMap::new(),
            source_prepared_mapping: HashMap::new(),
            next_prepared_ordinal: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.has_error() || self.graph.nodes.keys().all(|id| self.executed.contains(id))
    }

    pub fn has_error(&self) -> bool {
        !self.errors.is_empty()
    }

    fn fresh_prepared_id(&mut self) -> String {
        let ordinal = self.next_prepared_ordinal;
        self.next_prepared_ordinal += 1;
        format!("{}-prepared-{}", self.id, ordinal)
    }

    /// Returns the next ready node, preparing new execution-graph nodes as
    /// needed until one becomes available or no further preparation is
    /// possible. Once any node has errored, always returns `None`: a node
    /// whose prepared predecessor errored out never becomes "ready" on its
    /// own, so further progress would otherwise stall on it forever.
    pub fn next(&mut self) -> Option<Invocation> {
        if self.has_error() {
            return None;
        }
        loop {
            if let Some(ready_id) = self.next_ready_id() {
                let mut node = self.execution_graph.nodes.get(&ready_id).cloned()?;
                self.prepare_inputs(&mut node);
                self.execution_graph.nodes.insert(ready_id, node.clone());
                return Some(node);
            }
            if self.prepare().is_none() {
                return None;
            }
        }
    }

    /// The first prepared node (by execution-graph topological order) that
    /// hasn't executed yet.
    fn next_ready_id(&self) -> Option<String> {
        let flat = FlatGraph::build(&self.execution_graph);
        let order = flat.toposort().ok()?;
        order.into_iter().find(|id| !self.executed.contains(id))
    }

    /// Fills in a ready node's input fields from the results of its already-
    /// completed prepared predecessors, per the node's variant.
    fn prepare_inputs(&self, node: &mut Invocation) {
        let input_edges: Vec<Edge> = self
            .execution_graph
            .edges
            .iter()
            .filter(|e| e.to.node_id == node.id())
            .cloned()
            .collect();

        if let Invocation::Collect(collect) = node {
            let collected: Vec<serde_json::Value> = input_edges
                .iter()
                .filter(|e| e.to.field == "item")
                .filter_map(|e| {
                    self.results
                        .get(&e.from.node_id)
                        .and_then(|out| out.get(&e.from.field))
                        .cloned()
                })
                .collect();
            collect.collection = collected;
            return;
        }

        for edge in &input_edges {
            if let Some(value) = self
                .results
                .get(&edge.from.node_id)
                .and_then(|out| out.get(&edge.from.field))
            {
                node.set_input(&edge.to.field, value.clone());
            }
        }
    }

    /// Finds the next unprepared source node (in flat topological order)
    /// whose predecessors are all executed, and materializes its execution
    /// copies. Returns the id of one newly-prepared node, or `None` if no
    /// source node was ready (either everything reachable is already
    /// prepared, or an iterator's input collection was empty).
    fn prepare(&mut self) -> Option<String> {
        let source_flat = FlatGraph::build(&self.graph);
        let order = source_flat.toposort().ok()?;

        let next_source_id = order.into_iter().find(|id| {
            !self.source_prepared_mapping.contains_key(id)
                && source_flat
                    .ancestors(id)
                    .iter()
                    .filter(|a| *a != id)
                    .all(|a| self.executed.contains(a))
        })?;

        let input_edges: Vec<Edge> = crate::flat_view::flat_edges(&self.graph)
            .into_iter()
            .filter(|e| e.to.node_id == next_source_id)
            .collect();
        let parents: Vec<String> = {
            let mut seen = HashSet::new();
            input_edges
                .iter()
                .map(|e| e.from.node_id.clone())
                .filter(|p| seen.insert(p.clone()))
                .collect()
        };
        let source_node = self.graph.get_node(&next_source_id)?.clone();

        let mut new_ids = Vec::new();
        if let Invocation::Collect(_) = &source_node {
            let mut mappings = Vec::new();
            for parent in &parents {
                if let Some(prepared) = self.source_prepared_mapping.get(parent) {
                    for p in prepared {
                        mappings.push((parent.clone(), p.clone()));
                    }
                }
            }
            new_ids.extend(self.materialize(&next_source_id, &source_node, &input_edges, &mappings, None));
        } else {
            let iterators = self.governing_iterators(&next_source_id);
            let combinations = cartesian_product(
                &iterators
                    .iter()
                    .map(|it| {
                        self.source_prepared_mapping
                            .get(it)
                            .cloned()
                            .unwrap_or_default()
                            .into_iter()
                            .collect::<Vec<_>>()
                    })
                    .collect::<Vec<_>>(),
            );
            let combinations = if iterators.is_empty() { vec![Vec::new()] } else { combinations };

            let exec_flat = FlatGraph::build(&self.execution_graph);
            for combo in &combinations {
                let iter_tuple: Vec<(String, String)> =
                    iterators.iter().cloned().zip(combo.iter().cloned()).collect();
                let mut mappings = Vec::new();
                for parent in &parents {
                    if let Some(prepared_id) =
                        self.iteration_node(parent, &source_flat, &exec_flat, &iter_tuple)
                    {
                        mappings.push((parent.clone(), prepared_id));
                    }
                }
                new_ids.extend(self.materialize(&next_source_id, &source_node, &input_edges, &mappings, None));
            }
        }

        new_ids.into_iter().next()
    }

    /// Ancestor `IterateInvocation` nodes of `source_id` in the source graph,
    /// with the scope sealed at every `CollectInvocation` node (a collector's
    /// inbound edges are cut before the ancestor search, since it fans
    /// iteration scopes back together).
    fn governing_iterators(&self, source_id: &str) -> Vec<String> {
        let collectors: HashSet<String> = self
            .all_node_paths(&self.graph, None)
            .into_iter()
            .filter(|path| matches!(self.graph.get_node(path), Some(Invocation::Collect(_))))
            .collect();
        let sealed = FlatGraph::build_sealed_at(&self.graph, &collectors);
        let mut iterators: Vec<String> = sealed
            .ancestors(source_id)
            .into_iter()
            .filter(|a| a != source_id)
            .filter(|a| matches!(self.graph.get_node(a), Some(Invocation::Iterate(_))))
            .collect();
        iterators.sort();
        iterators
    }

    fn all_node_paths(&self, g: &Graph, prefix: Option<&str>) -> Vec<String> {
        let mut out = Vec::new();
        for (id, node) in &g.nodes {
            let path = match prefix {
                Some(p) => format!("{p}.{id}"),
                None => id.clone(),
            };
            if let Invocation::Graph(gi) = node {
                out.extend(self.all_node_paths(&gi.graph, Some(&path)));
            } else {
                out.push(path);
            }
        }
        out
    }

    /// Selects the unique prepared copy of `source_path` belonging to the
    /// iteration tuple `iter_tuple` (a list of `(iterator source path,
    /// iterator prepared id)` pairs).
    fn iteration_node(
        &self,
        source_path: &str,
        source_flat: &FlatGraph,
        exec_flat: &FlatGraph,
        iter_tuple: &[(String, String)],
    ) -> Option<String> {
        let prepared = self.source_prepared_mapping.get(source_path)?;
        if prepared.len() == 1 {
            return prepared.iter().next().cloned();
        }

        if let Some((_, prepared_id)) = iter_tuple.iter().find(|(src, _)| src == source_path) {
            return Some(prepared_id.clone());
        }

        let kept: Vec<&(String, String)> = iter_tuple
            .iter()
            .filter(|(src, _)| source_flat.ancestors(source_path).contains(src))
            .collect();

        prepared
            .iter()
            .find(|candidate| {
                kept.iter()
                    .all(|(_, iter_prepared)| exec_flat.is_reachable(iter_prepared, candidate))
            })
            .cloned()
    }

    /// Materializes one execution node per entry needed for `source_id`: a
    /// deep copy of the source node under a fresh id, wired to the chosen
    /// prepared predecessors. `mappings` gives, for every relevant source
    /// parent, the prepared id to wire from; for a plain/iterator node this
    /// is called once per Cartesian-product combination, for a collector
    /// it's called once with every prepared copy of every parent.
    fn materialize(
        &mut self,
        source_id: &str,
        source_node: &Invocation,
        input_edges: &[Edge],
        mappings: &[(String, String)],
        iteration_index: Option<u32>,
    ) -> Vec<String> {
        let iteration_count = if let Invocation::Iterate(_) = source_node {
            match self.resolve_iterator_collection_len(input_edges, mappings) {
                Some(n) => n,
                None => return Vec::new(),
            }
        } else {
            1
        };

        if iteration_count == 0 {
            self.mark_source_with_no_prepared_copies(source_id);
            return Vec::new();
        }

        let mut new_ids = Vec::new();

        for i in 0..iteration_count {
            let prepared_id = self.fresh_prepared_id();
            let mut copy = source_node.materialize(prepared_id.clone());
            if let Invocation::Iterate(it) = &mut copy {
                let idx = iteration_index.unwrap_or(i as u32);
                it.index = Some(idx);
            }

            self.execution_graph
                .add_node(copy)
                .expect("fresh prepared id never collides");
            log::debug!("prepared {prepared_id} from source {source_id}");
            self.prepared_source_mapping
                .insert(prepared_id.clone(), source_id.to_string());
            self.source_prepared_mapping
                .entry(source_id.to_string())
                .or_default()
                .insert(prepared_id.clone());

            for edge in input_edges {
                for (parent, prepared_parent) in mappings {
                    if parent == &edge.from.node_id {
                        let new_edge = Edge::new(
                            EdgeConnection::new(prepared_parent.clone(), edge.from.field.clone()),
                            EdgeConnection::new(prepared_id.clone(), edge.to.field.clone()),
                        );
                        self.execution_graph.edges.push(new_edge);
                    }
                }
            }

            new_ids.push(prepared_id);
        }

        new_ids
    }

    /// An `IterateInvocation`'s iteration count is the length of the
    /// collection value produced by its sole `collection` predecessor.
    fn resolve_iterator_collection_len(
        &self,
        input_edges: &[Edge],
        mappings: &[(String, String)],
    ) -> Option<usize> {
        let collection_edge = input_edges.iter().find(|e| e.to.field == "collection")?;
        let (_, prepared_parent) = mappings
            .iter()
            .find(|(parent, _)| *parent == collection_edge.from.node_id)?;
        let output = self.results.get(prepared_parent)?;
        output
            .get(&collection_edge.from.field)
            .and_then(|v| v.as_array())
            .map(|a| a.len())
    }

    /// An iterator whose input collection was empty never gets a prepared
    /// copy; its source-id is marked executed directly so the terminal
    /// "every source id eventually executed" check still holds.
    fn mark_source_with_no_prepared_copies(&mut self, source_id: &str) {
        self.source_prepared_mapping
            .entry(source_id.to_string())
            .or_default();
        self.executed.insert(source_id.to_string());
        self.executed_history.push(source_id.to_string());
    }

    /// Records a prepared node's output. No-op if `node_id` isn't in the
    /// execution graph. If this was the last outstanding prepared copy of
    /// its source node, marks the source node executed too.
    pub fn complete(&mut self, node_id: &str, output: OutputValue) {
        if !self.execution_graph.nodes.contains_key(node_id) {
            return;
        }
        self.results.insert(node_id.to_string(), output);
        self.executed.insert(node_id.to_string());

        let Some(source_path) = self.prepared_source_mapping.get(node_id).cloned() else {
            return;
        };
        let all_done = self
            .source_prepared_mapping
            .get(&source_path)
            .map(|prepared| prepared.iter().all(|p| self.executed.contains(p)))
            .unwrap_or(false);
        if all_done && !self.executed.contains(&source_path) {
            log::debug!("source {source_path} fully executed");
            self.executed.insert(source_path.clone());
            self.executed_history.push(source_path);
        }
    }

    pub fn set_error(&mut self, node_id: impl Into<String>, message: impl Into<String>) {
        let node_id = node_id.into();
        let message = message.into();
        log::warn!("{node_id} errored: {message}");
        self.errors.insert(node_id, message);
    }

    /// True once `node_path` (a source node) has entered preparation; used to
    /// reject mutations through the execution state to nodes already
    /// materialized.
    fn is_node_updatable(&self, node_path: &str) -> bool {
        !self.source_prepared_mapping.contains_key(node_path)
    }

    pub fn add_node(&mut self, node: Invocation) -> Result<()> {
        self.graph.add_node(node)
    }

    pub fn update_node(&mut self, path: &str, new_node: Invocation) -> Result<()> {
        if !self.is_node_updatable(path) {
            return Err(EngineError::NodeAlreadyExecuted(path.to_string()));
        }
        self.graph.update_node(path, new_node)
    }

    pub fn delete_node(&mut self, path: &str) -> Result<()> {
        if !self.is_node_updatable(path) {
            return Err(EngineError::NodeAlreadyExecuted(path.to_string()));
        }
        self.graph.delete_node(path);
        Ok(())
    }

    pub fn add_edge(
        &mut self,
        edge: Edge,
        registry: &crate::registry::InvocationRegistry,
        types: &crate::types::TypeRegistry,
    ) -> Result<()> {
        if !self.is_node_updatable(&edge.to.node_id) {
            return Err(EngineError::NodeAlreadyExecuted(edge.to.node_id.clone()));
        }
        self.graph.add_edge(edge, registry, types)
    }

    pub fn delete_edge(&mut self, edge: &Edge) -> Result<()> {
        if !self.is_node_updatable(&edge.to.node_id) {
            return Err(EngineError::NodeAlreadyExecuted(edge.to.node_id.clone()));
        }
        self.graph.delete_edge(edge);
        Ok(())
    }
}

/// The Cartesian product of a list of candidate lists. A single empty input
/// list (a governing iterator with no prepared copies yet) yields no
/// combinations at all.
fn cartesian_product(lists: &[Vec<String>]) -> Vec<Vec<String>> {
    lists.iter().fold(vec![Vec::new()], |acc, list| {
        acc.into_iter()
            .flat_map(|prefix| {
                list.iter().map(move |item| {
                    let mut next = prefix.clone();
                    next.push(item.clone());
                    next
                })
            })
            .collect()
    })
}
