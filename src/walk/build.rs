//! Construction of the walkable node graph from a loop-folded event graph.
//!
//! Pure bottom-up construction: every event becomes a node, every graph edge
//! an adjacency entry, and every inferred gate tree is loaded into the
//! node's logic lists, creating operator nodes and stubs for event types the
//! tree references but the graph lacks. Loop events recurse into their
//! interior, after which break points are flagged and logic paths that
//! cannot reach the loop's end point are marked as kill paths.

use rustc_hash::{FxHashMap, FxHashSet};
use uuid::Uuid;

use crate::errors::OutputFlag;
use crate::events::{EventGraph, EventIx};
use crate::logic::{GateTree, infer_gate_tree_with_fallback};
use crate::types::GateKind;
use crate::walk::node::{Node, NodeGraph, NodeId, SubGraph};

/// Builds the node graph for a folded event graph, returning it together
/// with any flags raised by gate inference along the way.
pub fn build_node_graph(event_graph: &EventGraph) -> (NodeGraph, Vec<OutputFlag>) {
    let mut graph = NodeGraph::new();
    let mut flags = Vec::new();
    let mut id_of: FxHashMap<EventIx, NodeId> = FxHashMap::default();

    let mut indices: Vec<EventIx> = event_graph.node_indices().collect();
    indices.sort_by_key(|&ix| event_graph.event_type(ix).to_string());

    for &ix in &indices {
        let graph_event = event_graph.node(ix);
        let event = graph_event.event();
        let mut node = Node::event(event.event_type(), event.uid());
        node.eventsets_incoming = event.in_event_sets.clone();
        if graph_event.is_loop() {
            node.flags.loop_node = true;
        }
        if !event.in_event_sets.is_empty() {
            let (in_tree, flag) = infer_gate_tree_with_fallback(&event.in_event_sets);
            if let Some(flag) = flag {
                flags.push(flag);
            }
            if let Some(in_tree) = in_tree
                && in_tree.kind() == Some(GateKind::Branch)
            {
                node.flags.merge = true;
            }
        }
        id_of.insert(ix, graph.push(node));
    }

    for &ix in &indices {
        for succ in event_graph.out_neighbors(ix) {
            graph.add_edge(id_of[&ix], id_of[&succ]);
        }
    }

    for &ix in &indices {
        let sets = &event_graph.event(ix).event_sets;
        if sets.is_empty() {
            continue;
        }
        let (tree, flag) = infer_gate_tree_with_fallback(sets);
        if let Some(flag) = flag {
            flags.push(flag);
        }
        if let Some(tree) = tree {
            load_outgoing_logic(&mut graph, id_of[&ix], &tree);
        }
    }

    populate_incoming_logic(&mut graph);

    for &ix in &indices {
        let Some(loop_event) = event_graph.node(ix).as_loop() else {
            continue;
        };
        let (mut sub_graph, sub_flags) = build_node_graph(&loop_event.sub_graph);
        flags.extend(sub_flags);
        mark_break_points(&mut sub_graph, &loop_event.break_uids);
        mark_loop_kill_paths(&mut sub_graph, loop_event.end_uid);
        graph.node_mut(id_of[&ix]).sub_graph = Some(Box::new(SubGraph {
            graph: sub_graph,
            start_uid: loop_event.start_uid,
            end_uid: loop_event.end_uid,
            break_uids: loop_event.break_uids.clone(),
        }));
    }

    (graph, flags)
}

/// Loads a gate tree into a node's outgoing logic lists. A bare leaf is
/// plain sequencing and creates no logic entries; its repeat count still
/// annotates the successor.
fn load_outgoing_logic(graph: &mut NodeGraph, root: NodeId, tree: &GateTree) {
    match tree {
        GateTree::Leaf { event_type, count } => {
            let target = ensure_target(graph, root, event_type);
            if *count > 1 {
                graph.node_mut(target).branch_count = Some(*count);
            }
        }
        GateTree::Gate {
            kind: GateKind::Branch,
            children,
        } => {
            graph.node_mut(root).flags.branch = true;
            for child in children {
                load_outgoing_logic(graph, root, child);
            }
        }
        GateTree::Gate { kind, children } => {
            let operator = graph.push(Node::operator(*kind));
            for child in children {
                load_into_operator(graph, operator, root, child);
            }
            graph.node_mut(root).push_outgoing_logic(operator);
        }
    }
}

fn load_into_operator(graph: &mut NodeGraph, operator: NodeId, root: NodeId, tree: &GateTree) {
    match tree {
        GateTree::Leaf { event_type, count } => {
            let target = ensure_target(graph, root, event_type);
            if *count > 1 {
                graph.node_mut(target).branch_count = Some(*count);
            }
            graph.node_mut(operator).outgoing.push(target);
            graph.node_mut(operator).push_outgoing_logic(target);
        }
        GateTree::Gate {
            kind: GateKind::Branch,
            children,
        } => {
            graph.node_mut(root).flags.branch = true;
            for child in children {
                load_into_operator(graph, operator, root, child);
            }
        }
        GateTree::Gate { kind, children } => {
            let inner = graph.push(Node::operator(*kind));
            for child in children {
                load_into_operator(graph, inner, root, child);
            }
            graph.node_mut(operator).push_outgoing_logic(inner);
        }
    }
}

/// Finds the graph successor carrying `event_type`, or creates a stub for a
/// type the gate tree references without graph support.
fn ensure_target(graph: &mut NodeGraph, root: NodeId, event_type: &str) -> NodeId {
    let existing = graph
        .node(root)
        .outgoing
        .iter()
        .copied()
        .find(|&id| graph.node(id).event_type() == Some(event_type));
    if let Some(id) = existing {
        return id;
    }
    let mut stub = Node::event(event_type, Uuid::new_v4());
    stub.is_stub = true;
    let stub = graph.push(stub);
    graph.node_mut(root).outgoing.push(stub);
    tracing::debug!(event_type, "created stub node for logic-only successor");
    stub
}

/// Fills each node's incoming-logic list with the incoming neighbors that
/// participate in its incoming gate structure (more than one predecessor
/// observed together).
fn populate_incoming_logic(graph: &mut NodeGraph) {
    let ids: Vec<NodeId> = graph.ids().collect();
    for id in ids {
        let node = graph.node(id);
        let logic_types: FxHashSet<String> = node
            .eventsets_incoming
            .iter()
            .filter(|set| set.len() > 1 || node.eventsets_incoming.len() > 1)
            .flat_map(|set| set.support())
            .collect();
        if logic_types.is_empty() {
            continue;
        }
        let logic_neighbors: Vec<NodeId> = graph
            .node(id)
            .incoming
            .iter()
            .copied()
            .filter(|&pred| {
                graph
                    .node(pred)
                    .event_type()
                    .map(|ty| logic_types.contains(ty))
                    .unwrap_or(false)
            })
            .collect();
        graph.node_mut(id).incoming_logic = logic_neighbors;
    }
}

fn mark_break_points(graph: &mut NodeGraph, break_uids: &FxHashSet<Uuid>) {
    let ids: Vec<NodeId> = graph.ids().collect();
    for id in ids {
        if break_uids.contains(&graph.node(id).uid) {
            graph.node_mut(id).flags.break_point = true;
        }
    }
}

/// Marks logic paths that cannot reach the loop's end point: branches that
/// leave the loop's bounds must kill rather than merge.
fn mark_loop_kill_paths(graph: &mut NodeGraph, end_uid: Uuid) {
    let Some(end_id) = graph.find_by_uid(end_uid) else {
        return;
    };
    let kill_uids: FxHashSet<Uuid> = graph
        .ids()
        .filter(|&id| {
            let node = graph.node(id);
            node.is_event() && !node.is_stub && !graph.has_path(id, end_id)
        })
        .map(|id| graph.node(id).uid)
        .collect();
    if kill_uids.is_empty() {
        return;
    }
    let with_logic: Vec<NodeId> = graph
        .ids()
        .filter(|&id| graph.node(id).is_event() && !graph.node(id).outgoing_logic.is_empty())
        .collect();
    for id in with_logic {
        graph.update_loop_kill_paths_from_leaves(id, &kill_uids);
    }
}
