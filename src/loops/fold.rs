//! Extraction of a loop's interior and substitution of the loop event into
//! the parent graph.
//!
//! The interior becomes a self-contained event graph: member events are
//! cloned, event sets referencing the outside world are dropped, the
//! loop-carrying edges are removed together with the event-set entries that
//! evidenced them, and synthetic start/end markers stand in for the real
//! start/end points' external connections when those are not unique.
//!
//! Substitution rewrites the surrounding events' sets to reference the new
//! loop event type. When the surrounding sets show varying counts for the
//! replaced types, every occurrence is substituted (the loop itself is
//! branched); otherwise the whole overlap collapses into a single
//! occurrence.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::events::{Event, EventGraph, EventIx, EventSet, GraphEvent};
use crate::loops::{Loop, LoopEvent};
use crate::types::{DUMMY_END_EVENT, DUMMY_START_EVENT, LOOP_EVENT_TYPE_PREFIX};

/// Copies the loop interior into a standalone graph, removes loop-carrying
/// edges, and inserts synthetic start/end markers where needed. Returns the
/// sub-graph and the uids of its start point, end point and break points.
pub(crate) fn extract_loop_sub_graph(
    loop_parts: &Loop,
    graph: &EventGraph,
) -> (EventGraph, Uuid, Uuid, FxHashSet<Uuid>) {
    let member_types = loop_parts.member_types(graph);
    let mut sub = EventGraph::new();
    let mut mapping: FxHashMap<EventIx, EventIx> = FxHashMap::default();

    let mut members: Vec<EventIx> = loop_parts.nodes.iter().copied().collect();
    members.sort_by_key(|&ix| graph.event_type(ix).to_string());
    for &ix in &members {
        let mut node = graph.node(ix).clone();
        let event = node.event_mut();
        event
            .event_sets
            .retain(|set| set.support().iter().all(|ty| member_types.contains(ty)));
        event
            .in_event_sets
            .retain(|set| set.support().iter().all(|ty| member_types.contains(ty)));
        let new_ix = match node {
            GraphEvent::Plain(event) => sub.add_event(event),
            GraphEvent::Loop(loop_event) => sub.add_loop_event(loop_event),
        };
        mapping.insert(ix, new_ix);
    }

    for &from in &members {
        for to in graph.out_neighbors(from) {
            if !loop_parts.nodes.contains(&to) {
                continue;
            }
            if loop_parts.loop_edges.contains(&(from, to)) {
                continue;
            }
            sub.add_edge(mapping[&from], mapping[&to]);
        }
    }

    // the event-set entries that evidenced the removed loop edges go with
    // them
    for &(from, to) in &loop_parts.loop_edges {
        let to_type = graph.event_type(to).to_string();
        let from_type = graph.event_type(from).to_string();
        sub.event_mut(mapping[&from])
            .remove_event_type_from_event_sets(&to_type);
        sub.event_mut(mapping[&to])
            .remove_event_type_from_in_event_sets(&from_type);
    }

    let start_uid = synthetic_marker(
        &mut sub,
        &mapping,
        &loop_parts.start_nodes,
        graph,
        MarkerKind::Start,
    );
    let end_uid = synthetic_marker(
        &mut sub,
        &mapping,
        &loop_parts.end_nodes,
        graph,
        MarkerKind::End,
    );

    let break_uids: FxHashSet<Uuid> = loop_parts
        .break_nodes
        .iter()
        .filter_map(|ix| mapping.get(ix))
        .map(|&sub_ix| sub.event(sub_ix).uid())
        .collect();

    (sub, start_uid, end_uid, break_uids)
}

enum MarkerKind {
    Start,
    End,
}

/// The uid identifying a loop boundary inside the sub-graph. Unique
/// boundaries keep their own uid; multiple boundaries get a synthetic
/// marker event substituted for their external connections.
fn synthetic_marker(
    sub: &mut EventGraph,
    mapping: &FxHashMap<EventIx, EventIx>,
    boundary: &FxHashSet<EventIx>,
    graph: &EventGraph,
    kind: MarkerKind,
) -> Uuid {
    let mut nodes: Vec<EventIx> = boundary.iter().filter_map(|ix| mapping.get(ix)).copied().collect();
    nodes.sort_by_key(|&ix| sub.event_type(ix).to_string());
    if nodes.len() == 1 {
        return sub.event(nodes[0]).uid();
    }
    match kind {
        MarkerKind::Start => {
            let mut dummy = Event::new(DUMMY_START_EVENT);
            for &ix in &nodes {
                let ty = sub.event_type(ix).to_string();
                dummy.update_event_sets(&[ty]);
            }
            let uid = dummy.uid();
            let dummy_ix = sub.add_event(dummy);
            for &ix in &nodes {
                sub.event_mut(ix)
                    .update_in_event_sets(&[DUMMY_START_EVENT.to_string()]);
                sub.add_edge(dummy_ix, ix);
            }
            uid
        }
        MarkerKind::End => {
            let mut dummy = Event::new(DUMMY_END_EVENT);
            for &ix in &nodes {
                let ty = sub.event_type(ix).to_string();
                dummy.update_in_event_sets(&[ty]);
            }
            let uid = dummy.uid();
            let dummy_ix = sub.add_event(dummy);
            for &ix in &nodes {
                sub.event_mut(ix)
                    .update_event_sets(&[DUMMY_END_EVENT.to_string()]);
                sub.add_edge(ix, dummy_ix);
            }
            uid
        }
    }
}

/// Builds the loop event facade the parent graph will see: the next free
/// `LOOP_n` type name, incoming sets taken from the start points' external
/// predecessors and outgoing sets from the end and break points' external
/// successors.
pub(crate) fn create_loop_event(
    loop_parts: &Loop,
    graph: &EventGraph,
    sub_graph: EventGraph,
    start_uid: Uuid,
    end_uid: Uuid,
    break_uids: FxHashSet<Uuid>,
) -> LoopEvent {
    let member_types = loop_parts.member_types(graph);
    let mut event = Event::new(next_loop_event_type(graph));

    let mut starts: Vec<EventIx> = loop_parts.start_nodes.iter().copied().collect();
    starts.sort_by_key(|&ix| graph.event_type(ix).to_string());
    for &start in &starts {
        let mut sets: Vec<&EventSet> = graph.event(start).in_event_sets.iter().collect();
        sets.sort();
        for set in sets {
            if set.support().iter().all(|ty| !member_types.contains(ty)) {
                event.update_in_event_sets(&set.to_list());
            }
        }
    }

    let mut outs: Vec<EventIx> = loop_parts
        .end_nodes
        .union(&loop_parts.break_nodes)
        .copied()
        .collect();
    outs.sort_by_key(|&ix| graph.event_type(ix).to_string());
    for &out in &outs {
        let mut sets: Vec<&EventSet> = graph.event(out).event_sets.iter().collect();
        sets.sort();
        for set in sets {
            if set.support().iter().all(|ty| !member_types.contains(ty)) {
                event.update_event_sets(&set.to_list());
            }
        }
    }

    LoopEvent {
        event,
        sub_graph,
        start_uid,
        end_uid,
        break_uids,
    }
}

fn next_loop_event_type(graph: &EventGraph) -> String {
    let prefix = format!("{LOOP_EVENT_TYPE_PREFIX}_");
    let max_seen = graph
        .node_indices()
        .filter_map(|ix| graph.event_type(ix).strip_prefix(&prefix))
        .filter_map(|suffix| suffix.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    format!("{prefix}{}", max_seen + 1)
}

/// Replaces the whole component with the loop event in the parent graph,
/// rewriting the surrounding events' sets and pruning anything the fold
/// orphaned.
pub(crate) fn fold_loop_into_graph(
    loop_parts: &Loop,
    loop_event: LoopEvent,
    mut graph: EventGraph,
) -> EventGraph {
    let root = graph.root();
    let loop_type = loop_event.event.event_type().to_string();
    let loop_ix = graph.add_loop_event(loop_event);

    // external predecessors of start points
    let start_types = loop_parts.types_of(&loop_parts.start_nodes, &graph);
    let mut external_preds: Vec<EventIx> = Vec::new();
    for &start in &loop_parts.start_nodes {
        for pred in graph.in_neighbors(start) {
            if !loop_parts.nodes.contains(&pred) && !external_preds.contains(&pred) {
                external_preds.push(pred);
            }
        }
    }
    external_preds.sort_by_key(|&ix| graph.event_type(ix).to_string());
    for &pred in &external_preds {
        rewrite_outgoing_sets(graph.event_mut(pred), &start_types, &loop_type);
        for &start in &loop_parts.start_nodes {
            graph.remove_edge(pred, start);
        }
        graph.add_edge(pred, loop_ix);
    }

    // external successors of end and break points
    let end_types = loop_parts.types_of(&loop_parts.end_nodes, &graph);
    let break_types = loop_parts.types_of(&loop_parts.break_nodes, &graph);
    let rewire_successors = |graph: &mut EventGraph,
                                 sources: &FxHashSet<EventIx>,
                                 source_types: &BTreeSet<String>| {
        let mut external_succs: Vec<EventIx> = Vec::new();
        for &source in sources {
            for succ in graph.out_neighbors(source) {
                if !loop_parts.nodes.contains(&succ) && !external_succs.contains(&succ) {
                    external_succs.push(succ);
                }
            }
        }
        external_succs.sort_by_key(|&ix| graph.event_type(ix).to_string());
        for &succ in &external_succs {
            rewrite_incoming_sets(graph.event_mut(succ), source_types, &loop_type);
            for &source in sources {
                graph.remove_edge(source, succ);
            }
            graph.add_edge(loop_ix, succ);
        }
    };
    rewire_successors(&mut graph, &loop_parts.end_nodes, &end_types);
    rewire_successors(&mut graph, &loop_parts.break_nodes, &break_types);

    // any exit edge left over belongs to a node that is neither an end nor a
    // break point; its target loses the matching in-set entries
    for &member in &loop_parts.nodes {
        for succ in graph.out_neighbors(member) {
            if loop_parts.nodes.contains(&succ) {
                continue;
            }
            let member_type = graph.event_type(member).to_string();
            graph
                .event_mut(succ)
                .remove_event_type_from_in_event_sets(&member_type);
        }
    }

    for &member in &loop_parts.nodes {
        graph.remove_node(member);
    }

    if let Some(root) = root
        && graph.contains(root)
    {
        graph.prune_unreachable(root);
    }
    graph
}

/// Overlap between a family of event sets and a type set.
fn types_overlap(sets: &FxHashSet<EventSet>, types: &BTreeSet<String>) -> BTreeSet<String> {
    let mut overlap = BTreeSet::new();
    for set in sets {
        for ty in set.support() {
            if types.contains(&ty) {
                overlap.insert(ty);
            }
        }
    }
    overlap
}

/// Whether the sets show varying counts for any of the given types, which
/// means the types are branched and each occurrence must be substituted
/// individually.
fn sets_indicate_branch(sets: &FxHashSet<EventSet>, types: &BTreeSet<String>) -> bool {
    for ty in types {
        let counts: FxHashSet<u32> = sets
            .iter()
            .map(|set| set.count(ty))
            .filter(|&count| count > 0)
            .collect();
        if counts.len() > 1 {
            return true;
        }
    }
    false
}

fn substituted_list(
    set: &EventSet,
    overlap: &BTreeSet<String>,
    loop_type: &str,
    is_branch: bool,
) -> Vec<String> {
    let mut out = Vec::new();
    for ty in set.to_list() {
        if overlap.contains(&ty) {
            if is_branch {
                out.push(loop_type.to_string());
            }
        } else {
            out.push(ty);
        }
    }
    if !is_branch {
        out.push(loop_type.to_string());
    }
    out
}

fn rewrite_outgoing_sets(event: &mut Event, replaced_types: &BTreeSet<String>, loop_type: &str) {
    let overlap = types_overlap(&event.event_sets, replaced_types);
    if overlap.is_empty() {
        return;
    }
    let is_branch = sets_indicate_branch(&event.event_sets, &overlap);
    let mut to_add: Vec<Vec<String>> = Vec::new();
    let mut sets: Vec<&EventSet> = event.event_sets.iter().collect();
    sets.sort();
    for set in sets {
        if set.support().iter().any(|ty| overlap.contains(ty)) {
            to_add.push(substituted_list(set, &overlap, loop_type, is_branch));
        }
    }
    for list in to_add {
        event.update_event_sets(&list);
    }
    for ty in &overlap {
        event.remove_event_type_from_event_sets(ty);
    }
}

fn rewrite_incoming_sets(event: &mut Event, replaced_types: &BTreeSet<String>, loop_type: &str) {
    let overlap = types_overlap(&event.in_event_sets, replaced_types);
    if overlap.is_empty() {
        return;
    }
    let is_branch = sets_indicate_branch(&event.in_event_sets, &overlap);
    let mut to_add: Vec<Vec<String>> = Vec::new();
    let mut sets: Vec<&EventSet> = event.in_event_sets.iter().collect();
    sets.sort();
    for set in sets {
        if set.support().iter().any(|ty| overlap.contains(ty)) {
            to_add.push(substituted_list(set, &overlap, loop_type, is_branch));
        }
    }
    for list in to_add {
        event.update_in_event_sets(&list);
    }
    for ty in &overlap {
        event.remove_event_type_from_in_event_sets(ty);
    }
}
