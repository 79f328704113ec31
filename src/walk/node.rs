//! Arena-backed generic node graph used by the diagram walker.
//!
//! Nodes live in a flat arena addressed by [`NodeId`]; edges are adjacency
//! lists on the nodes themselves. Logic-operator nodes sit in the same arena
//! but are connected through the separate `outgoing_logic` lists rather than
//! graph edges. A loop node owns its interior as a nested [`NodeGraph`];
//! nesting forms a strict tree, so ownership stays acyclic.

use rustc_hash::FxHashSet;
use uuid::Uuid;

use crate::events::EventSet;
use crate::types::{EventFlags, GateKind};

/// Index of a node in a [`NodeGraph`] arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// What a node is: an event or a logic operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeClass {
    Event { event_type: String },
    Operator { kind: GateKind },
}

/// A node of the walkable graph.
///
/// Graph structure (`incoming`/`outgoing`) and logic structure
/// (`incoming_logic`/`outgoing_logic`) are kept separately: the former is
/// plain sequencing, the latter the subset of neighbors participating in the
/// node's inferred gate tree. `is_loop_kill_path` parallels
/// `outgoing_logic`; a `true` entry marks a logic path that can never rejoin
/// its block and must end in a kill or break.
#[derive(Clone, Debug)]
pub struct Node {
    pub uid: Uuid,
    pub class: NodeClass,
    pub flags: EventFlags,
    /// Fixed concurrent-occurrence count annotation, when above one.
    pub branch_count: Option<u32>,
    pub incoming: Vec<NodeId>,
    pub outgoing: Vec<NodeId>,
    pub incoming_logic: Vec<NodeId>,
    pub outgoing_logic: Vec<NodeId>,
    /// Created to stand in for an event type referenced by a gate tree but
    /// absent from the graph.
    pub is_stub: bool,
    pub eventsets_incoming: FxHashSet<EventSet>,
    pub is_loop_kill_path: Vec<bool>,
    pub sub_graph: Option<Box<SubGraph>>,
}

/// Interior of a loop node, with the identities of its boundary points.
#[derive(Clone, Debug)]
pub struct SubGraph {
    pub graph: NodeGraph,
    pub start_uid: Uuid,
    pub end_uid: Uuid,
    pub break_uids: FxHashSet<Uuid>,
}

impl Node {
    pub fn event(event_type: impl Into<String>, uid: Uuid) -> Self {
        Self {
            uid,
            class: NodeClass::Event {
                event_type: event_type.into(),
            },
            flags: EventFlags::default(),
            branch_count: None,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            incoming_logic: Vec::new(),
            outgoing_logic: Vec::new(),
            is_stub: false,
            eventsets_incoming: FxHashSet::default(),
            is_loop_kill_path: Vec::new(),
            sub_graph: None,
        }
    }

    pub fn operator(kind: GateKind) -> Self {
        Self {
            uid: Uuid::new_v4(),
            class: NodeClass::Operator { kind },
            flags: EventFlags::default(),
            branch_count: None,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            incoming_logic: Vec::new(),
            outgoing_logic: Vec::new(),
            is_stub: false,
            eventsets_incoming: FxHashSet::default(),
            is_loop_kill_path: Vec::new(),
            sub_graph: None,
        }
    }

    #[must_use]
    pub fn event_type(&self) -> Option<&str> {
        match &self.class {
            NodeClass::Event { event_type } => Some(event_type),
            NodeClass::Operator { .. } => None,
        }
    }

    #[must_use]
    pub fn operator_kind(&self) -> Option<GateKind> {
        match &self.class {
            NodeClass::Event { .. } => None,
            NodeClass::Operator { kind } => Some(*kind),
        }
    }

    #[must_use]
    pub fn is_event(&self) -> bool {
        matches!(self.class, NodeClass::Event { .. })
    }

    #[must_use]
    pub fn is_operator(&self) -> bool {
        matches!(self.class, NodeClass::Operator { .. })
    }

    /// Appends a logic path. Keeps `is_loop_kill_path` aligned with
    /// `outgoing_logic`.
    pub fn push_outgoing_logic(&mut self, target: NodeId) {
        self.outgoing_logic.push(target);
        self.is_loop_kill_path.push(false);
    }

    /// Whether every logic path of this node is a kill path.
    #[must_use]
    pub fn all_paths_are_loop_kill(&self) -> bool {
        !self.is_loop_kill_path.is_empty() && self.is_loop_kill_path.iter().all(|&kill| kill)
    }

    /// The single logic path that is not a kill path, when all others are.
    /// Such a path may merge at any point ("lonely merge").
    #[must_use]
    pub fn lonely_merge(&self) -> Option<NodeId> {
        if self.is_loop_kill_path.len() <= 1 {
            return None;
        }
        let mut lonely = None;
        for (index, &is_kill) in self.is_loop_kill_path.iter().enumerate() {
            if !is_kill {
                if lonely.is_some() {
                    return None;
                }
                lonely = Some(self.outgoing_logic[index]);
            }
        }
        lonely
    }
}

/// Arena of [`Node`]s with adjacency-list edges.
#[derive(Clone, Debug, Default)]
pub struct NodeGraph {
    nodes: Vec<Node>,
}

impl NodeGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + use<> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Adds a graph edge, updating both adjacency lists. Parallel duplicate
    /// edges are ignored.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        if !self.nodes[from.0].outgoing.contains(&to) {
            self.nodes[from.0].outgoing.push(to);
        }
        if !self.nodes[to.0].incoming.contains(&from) {
            self.nodes[to.0].incoming.push(from);
        }
    }

    /// The walk root: the first non-stub event node without incoming edges.
    #[must_use]
    pub fn root(&self) -> Option<NodeId> {
        self.ids().find(|&id| {
            let node = self.node(id);
            node.is_event() && !node.is_stub && node.incoming.is_empty()
        })
    }

    #[must_use]
    pub fn find_by_uid(&self, uid: Uuid) -> Option<NodeId> {
        self.ids().find(|&id| self.node(id).uid == uid)
    }

    /// Whether `to` is reachable from `from` along graph edges.
    #[must_use]
    pub fn has_path(&self, from: NodeId, to: NodeId) -> bool {
        if from == to {
            return true;
        }
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            for &succ in &self.node(id).outgoing {
                if succ == to {
                    return true;
                }
                stack.push(succ);
            }
        }
        false
    }

    /// The event leaves under a node's logic structure: the node itself when
    /// it is an event, otherwise the leaves of all its logic children.
    #[must_use]
    pub fn logic_leaves(&self, id: NodeId) -> Vec<NodeId> {
        let node = self.node(id);
        if node.is_event() {
            return vec![id];
        }
        node.outgoing_logic
            .iter()
            .flat_map(|&child| self.logic_leaves(child))
            .collect()
    }

    /// Marks logic paths whose leaves all belong to `kill_uids` as loop-kill
    /// paths, recursing into nested operators.
    pub fn update_loop_kill_paths_from_leaves(&mut self, id: NodeId, kill_uids: &FxHashSet<Uuid>) {
        let children: Vec<NodeId> = self.node(id).outgoing_logic.clone();
        for (index, &child) in children.iter().enumerate() {
            let leaves = self.logic_leaves(child);
            let all_kill = !leaves.is_empty()
                && leaves
                    .iter()
                    .all(|&leaf| kill_uids.contains(&self.node(leaf).uid));
            if all_kill {
                self.node_mut(id).is_loop_kill_path[index] = true;
            } else if self.node(child).is_operator() {
                self.update_loop_kill_paths_from_leaves(child, kill_uids);
                let propagated = self.node(child).all_paths_are_loop_kill();
                self.node_mut(id).is_loop_kill_path[index] = propagated;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(graph: &mut NodeGraph, name: &str) -> NodeId {
        graph.push(Node::event(name, Uuid::new_v4()))
    }

    #[test]
    fn edges_update_both_sides_without_duplicates() {
        let mut graph = NodeGraph::new();
        let a = event(&mut graph, "A");
        let b = event(&mut graph, "B");
        graph.add_edge(a, b);
        graph.add_edge(a, b);
        assert_eq!(graph.node(a).outgoing, vec![b]);
        assert_eq!(graph.node(b).incoming, vec![a]);
    }

    #[test]
    fn root_skips_operators_and_stubs() {
        let mut graph = NodeGraph::new();
        let op = graph.push(Node::operator(GateKind::And));
        let mut stub = Node::event("S", Uuid::new_v4());
        stub.is_stub = true;
        let stub = graph.push(stub);
        let a = event(&mut graph, "A");
        let b = event(&mut graph, "B");
        graph.add_edge(a, b);
        assert_eq!(graph.root(), Some(a));
        let _ = (op, stub);
    }

    #[test]
    fn logic_leaves_flatten_nested_operators() {
        let mut graph = NodeGraph::new();
        let b = event(&mut graph, "B");
        let c = event(&mut graph, "C");
        let inner = graph.push(Node::operator(GateKind::Xor));
        graph.node_mut(inner).push_outgoing_logic(b);
        graph.node_mut(inner).push_outgoing_logic(c);
        let outer = graph.push(Node::operator(GateKind::And));
        graph.node_mut(outer).push_outgoing_logic(inner);
        assert_eq!(graph.logic_leaves(outer), vec![b, c]);
    }

    #[test]
    fn kill_marking_propagates_through_operators() {
        let mut graph = NodeGraph::new();
        let a = event(&mut graph, "A");
        let b = event(&mut graph, "B");
        let c = event(&mut graph, "C");
        let op = graph.push(Node::operator(GateKind::Xor));
        graph.node_mut(op).push_outgoing_logic(b);
        graph.node_mut(op).push_outgoing_logic(c);
        graph.node_mut(a).push_outgoing_logic(op);

        let kill_uids: FxHashSet<Uuid> = [graph.node(b).uid].into_iter().collect();
        graph.update_loop_kill_paths_from_leaves(a, &kill_uids);
        assert_eq!(graph.node(op).is_loop_kill_path, vec![true, false]);
        assert_eq!(graph.node(a).is_loop_kill_path, vec![false]);
    }

    #[test]
    fn lonely_merge_requires_single_surviving_path() {
        let mut graph = NodeGraph::new();
        let b = event(&mut graph, "B");
        let c = event(&mut graph, "C");
        let op = graph.push(Node::operator(GateKind::And));
        graph.node_mut(op).push_outgoing_logic(b);
        graph.node_mut(op).push_outgoing_logic(c);
        assert_eq!(graph.node(op).lonely_merge(), None);
        graph.node_mut(op).is_loop_kill_path[0] = true;
        assert_eq!(graph.node(op).lonely_merge(), Some(c));
    }
}
