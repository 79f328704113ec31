//! Directed graph over aggregated events.
//!
//! The event graph is the "directly follows" view of a job: one node per
//! event type, one edge wherever an outgoing event set evidences
//! reachability. Loop folding later replaces whole strongly connected
//! components with opaque loop nodes, so graph nodes are a closed sum of
//! plain events and loop events.

use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use petgraph::visit::IntoEdgeReferences;
use rustc_hash::FxHashSet;
use uuid::Uuid;

use crate::errors::ModelError;
use crate::events::{Event, EventModel};
use crate::loops::LoopEvent;

/// Index of a node in an [`EventGraph`].
pub type EventIx = petgraph::stable_graph::NodeIndex;

/// A node of the event graph: either a plain aggregated event or an opaque
/// loop event carrying its interior as a nested sub-graph.
#[derive(Clone, Debug)]
pub enum GraphEvent {
    Plain(Event),
    Loop(LoopEvent),
}

impl GraphEvent {
    /// The aggregated event data, independent of node kind.
    #[must_use]
    pub fn event(&self) -> &Event {
        match self {
            GraphEvent::Plain(event) => event,
            GraphEvent::Loop(loop_event) => &loop_event.event,
        }
    }

    pub fn event_mut(&mut self) -> &mut Event {
        match self {
            GraphEvent::Plain(event) => event,
            GraphEvent::Loop(loop_event) => &mut loop_event.event,
        }
    }

    #[must_use]
    pub fn as_loop(&self) -> Option<&LoopEvent> {
        match self {
            GraphEvent::Plain(_) => None,
            GraphEvent::Loop(loop_event) => Some(loop_event),
        }
    }

    #[must_use]
    pub fn is_loop(&self) -> bool {
        matches!(self, GraphEvent::Loop(_))
    }
}

/// Directed graph of [`GraphEvent`] nodes.
///
/// Backed by a stable graph so loop folding can remove and insert nodes
/// without invalidating the indices of untouched nodes.
#[derive(Clone, Debug, Default)]
pub struct EventGraph {
    graph: StableDiGraph<GraphEvent, ()>,
}

impl EventGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph from a per-job model.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownEventType`] if any outgoing event set references
    /// a type that is not itself an event in the model.
    pub fn from_model(model: &EventModel) -> Result<Self, ModelError> {
        let mut graph = EventGraph::new();
        for event in model.events() {
            graph.add_event(event.clone());
        }
        for event in model.events() {
            let from = graph
                .find_by_type(event.event_type())
                .expect("just inserted");
            let mut out_types: Vec<String> = event
                .reduced_event_sets()
                .into_iter()
                .flatten()
                .collect::<FxHashSet<_>>()
                .into_iter()
                .collect();
            out_types.sort();
            for out_type in out_types {
                let to = graph.find_by_type(&out_type).ok_or_else(|| {
                    ModelError::UnknownEventType {
                        source_event: event.event_type().to_string(),
                        event_type: out_type.clone(),
                    }
                })?;
                graph.add_edge(from, to);
            }
        }
        tracing::debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "built event graph"
        );
        Ok(graph)
    }

    pub fn add_event(&mut self, event: Event) -> EventIx {
        self.graph.add_node(GraphEvent::Plain(event))
    }

    pub fn add_loop_event(&mut self, loop_event: LoopEvent) -> EventIx {
        self.graph.add_node(GraphEvent::Loop(loop_event))
    }

    /// Adds an edge unless it already exists; the edge set is a simple
    /// directed graph.
    pub fn add_edge(&mut self, from: EventIx, to: EventIx) {
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
    }

    pub fn remove_edge(&mut self, from: EventIx, to: EventIx) {
        if let Some(edge) = self.graph.find_edge(from, to) {
            self.graph.remove_edge(edge);
        }
    }

    pub fn remove_node(&mut self, ix: EventIx) {
        self.graph.remove_node(ix);
    }

    #[must_use]
    pub fn contains(&self, ix: EventIx) -> bool {
        self.graph.contains_node(ix)
    }

    #[must_use]
    pub fn has_edge(&self, from: EventIx, to: EventIx) -> bool {
        self.graph.find_edge(from, to).is_some()
    }

    #[must_use]
    pub fn node(&self, ix: EventIx) -> &GraphEvent {
        &self.graph[ix]
    }

    pub fn node_mut(&mut self, ix: EventIx) -> &mut GraphEvent {
        &mut self.graph[ix]
    }

    /// The aggregated event at `ix`.
    #[must_use]
    pub fn event(&self, ix: EventIx) -> &Event {
        self.graph[ix].event()
    }

    pub fn event_mut(&mut self, ix: EventIx) -> &mut Event {
        self.graph[ix].event_mut()
    }

    #[must_use]
    pub fn event_type(&self, ix: EventIx) -> &str {
        self.event(ix).event_type()
    }

    #[must_use]
    pub fn find_by_type(&self, event_type: &str) -> Option<EventIx> {
        self.graph
            .node_indices()
            .find(|&ix| self.event(ix).event_type() == event_type)
    }

    #[must_use]
    pub fn find_by_uid(&self, uid: Uuid) -> Option<EventIx> {
        self.graph.node_indices().find(|&ix| self.event(ix).uid() == uid)
    }

    pub fn node_indices(&self) -> impl Iterator<Item = EventIx> + '_ {
        self.graph.node_indices()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn edges(&self) -> impl Iterator<Item = (EventIx, EventIx)> + '_ {
        self.graph
            .edge_references()
            .map(|edge| (edge.source(), edge.target()))
    }

    #[must_use]
    pub fn out_neighbors(&self, ix: EventIx) -> Vec<EventIx> {
        let mut neighbors: Vec<EventIx> = self
            .graph
            .neighbors_directed(ix, Direction::Outgoing)
            .collect();
        neighbors.sort_by_key(|&n| self.event_type(n).to_string());
        neighbors
    }

    #[must_use]
    pub fn in_neighbors(&self, ix: EventIx) -> Vec<EventIx> {
        let mut neighbors: Vec<EventIx> = self
            .graph
            .neighbors_directed(ix, Direction::Incoming)
            .collect();
        neighbors.sort_by_key(|&n| self.event_type(n).to_string());
        neighbors
    }

    #[must_use]
    pub fn has_path(&self, from: EventIx, to: EventIx) -> bool {
        has_path_connecting(&self.graph, from, to, None)
    }

    /// The unique walk root: the first node without incoming edges, in
    /// event-type order.
    #[must_use]
    pub fn root(&self) -> Option<EventIx> {
        let mut roots: Vec<EventIx> = self
            .graph
            .externals(Direction::Incoming)
            .collect();
        roots.sort_by_key(|&ix| self.event_type(ix).to_string());
        roots.first().copied()
    }

    /// Removes every node without a path from `root`. Loop folding can
    /// orphan break targets; those must not survive into the walk stage.
    pub fn prune_unreachable(&mut self, root: EventIx) {
        let unreachable: Vec<EventIx> = self
            .graph
            .node_indices()
            .filter(|&ix| ix != root && !self.has_path(root, ix))
            .collect();
        for ix in unreachable {
            tracing::debug!(event = self.event_type(ix), "pruning unreachable event");
            self.graph.remove_node(ix);
        }
    }

    pub(crate) fn inner(&self) -> &StableDiGraph<GraphEvent, ()> {
        &self.graph
    }
}

/// The minimal Markov-chain view of a model: event types connected wherever
/// an event set indicates reachability, with no aggregation payload.
#[must_use]
pub fn markov_graph(model: &EventModel) -> petgraph::graph::DiGraph<String, ()> {
    let mut graph = petgraph::graph::DiGraph::new();
    let mut indices = std::collections::BTreeMap::new();
    for event in model.events() {
        let ix = graph.add_node(event.event_type().to_string());
        indices.insert(event.event_type().to_string(), ix);
    }
    for event in model.events() {
        let from = indices[event.event_type()];
        for support in event.reduced_event_sets() {
            for out_type in support {
                if let Some(&to) = indices.get(&out_type) {
                    if graph.find_edge(from, to).is_none() {
                        graph.add_edge(from, to, ());
                    }
                }
            }
        }
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventModel;

    fn linear_model() -> EventModel {
        let mut model = EventModel::new();
        model.record_outgoing("A", &["B"]);
        model.record_outgoing("B", &["C"]);
        model.record_incoming("B", &["A"]);
        model.record_incoming("C", &["B"]);
        model.ensure_event("C");
        model
    }

    #[test]
    fn graph_has_edge_per_event_set_entry() {
        let graph = linear_model().graph().unwrap();
        let a = graph.find_by_type("A").unwrap();
        let b = graph.find_by_type("B").unwrap();
        let c = graph.find_by_type("C").unwrap();
        assert!(graph.has_edge(a, b));
        assert!(graph.has_edge(b, c));
        assert!(!graph.has_edge(a, c));
    }

    #[test]
    fn unknown_event_type_is_fatal() {
        let mut model = EventModel::new();
        model.record_outgoing("A", &["GHOST"]);
        let err = model.graph().unwrap_err();
        assert_eq!(
            err,
            ModelError::UnknownEventType {
                source_event: "A".into(),
                event_type: "GHOST".into(),
            }
        );
    }

    #[test]
    fn root_is_the_node_without_incoming_edges() {
        let graph = linear_model().graph().unwrap();
        let root = graph.root().unwrap();
        assert_eq!(graph.event_type(root), "A");
    }

    #[test]
    fn markov_graph_mirrors_reachability() {
        let markov = markov_graph(&linear_model());
        assert_eq!(markov.node_count(), 3);
        assert_eq!(markov.edge_count(), 2);
    }

    #[test]
    fn prune_drops_detached_nodes() {
        let mut model = linear_model();
        model.ensure_event("ORPHAN");
        let mut graph = model.graph().unwrap();
        let root = graph.root().unwrap();
        assert_eq!(graph.event_type(root), "A");
        graph.prune_unreachable(root);
        assert!(graph.find_by_type("ORPHAN").is_none());
        assert_eq!(graph.node_count(), 3);
    }
}
