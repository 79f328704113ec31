//! Decomposition of a strongly connected component into loop components.
//!
//! Start points are the component's entries from the rest of the graph,
//! loop-back points are the nodes that re-enter a start point, end points
//! are selected among the loop-back points by a pairwise reachability
//! criterion, and break points are exit-capable nodes whose exits leave the
//! loop without reaching an end point.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;

use crate::errors::LoopError;
use crate::events::{EventGraph, EventIx};
use crate::logic::infer_gate_tree_with_fallback;

/// One detected loop, expressed over parent-graph indices.
#[derive(Clone, Debug)]
pub(crate) struct Loop {
    pub nodes: FxHashSet<EventIx>,
    pub start_nodes: FxHashSet<EventIx>,
    pub loop_back_nodes: FxHashSet<EventIx>,
    pub end_nodes: FxHashSet<EventIx>,
    pub break_nodes: FxHashSet<EventIx>,
    /// Loop-carrying edges from loop-back points into start points.
    pub loop_edges: FxHashSet<(EventIx, EventIx)>,
}

impl Loop {
    /// Event types of all member nodes, ordered.
    pub fn member_types(&self, graph: &EventGraph) -> BTreeSet<String> {
        self.nodes
            .iter()
            .map(|&ix| graph.event_type(ix).to_string())
            .collect()
    }

    pub fn types_of(&self, nodes: &FxHashSet<EventIx>, graph: &EventGraph) -> BTreeSet<String> {
        nodes
            .iter()
            .map(|&ix| graph.event_type(ix).to_string())
            .collect()
    }
}

/// Computes the loop components for a strongly connected component.
///
/// # Errors
///
/// [`LoopError::UnreachableLoop`] if no component node has an incoming edge
/// from outside the component.
pub(crate) fn calc_loop_components(
    scc: &FxHashSet<EventIx>,
    graph: &EventGraph,
) -> Result<Loop, LoopError> {
    let start_nodes: FxHashSet<EventIx> = scc
        .iter()
        .copied()
        .filter(|&ix| {
            graph
                .in_neighbors(ix)
                .iter()
                .any(|pred| !scc.contains(pred))
        })
        .collect();
    if start_nodes.is_empty() {
        let mut events: Vec<String> = scc
            .iter()
            .map(|&ix| graph.event_type(ix).to_string())
            .collect();
        events.sort();
        return Err(LoopError::UnreachableLoop {
            events: events.join(", "),
        });
    }

    let loop_back_nodes: FxHashSet<EventIx> = scc
        .iter()
        .copied()
        .filter(|&ix| {
            graph
                .out_neighbors(ix)
                .iter()
                .any(|succ| start_nodes.contains(succ))
        })
        .collect();

    let trimmed = trimmed_adjacency(scc, &start_nodes, graph);
    let end_nodes = end_nodes_from_loop_backs(&loop_back_nodes, &trimmed);

    let exit_nodes: FxHashSet<EventIx> = scc
        .iter()
        .copied()
        .filter(|&ix| {
            graph
                .out_neighbors(ix)
                .iter()
                .any(|succ| !scc.contains(succ))
        })
        .collect();

    let break_nodes = calc_break_nodes(scc, &end_nodes, &exit_nodes, &trimmed, graph);

    let mut loop_edges: FxHashSet<(EventIx, EventIx)> = FxHashSet::default();
    for &from in &loop_back_nodes {
        for to in graph.out_neighbors(from) {
            if start_nodes.contains(&to) {
                loop_edges.insert((from, to));
            }
        }
    }

    Ok(Loop {
        nodes: scc.clone(),
        start_nodes,
        loop_back_nodes,
        end_nodes,
        break_nodes,
        loop_edges,
    })
}

/// Adjacency of the component with every edge into a start point removed.
/// Reachability questions about the loop interior are asked on this view so
/// that answers cannot cheat by travelling around the loop.
fn trimmed_adjacency(
    scc: &FxHashSet<EventIx>,
    start_nodes: &FxHashSet<EventIx>,
    graph: &EventGraph,
) -> FxHashMap<EventIx, Vec<EventIx>> {
    let mut adjacency: FxHashMap<EventIx, Vec<EventIx>> = FxHashMap::default();
    for &ix in scc {
        let successors: Vec<EventIx> = graph
            .out_neighbors(ix)
            .into_iter()
            .filter(|succ| scc.contains(succ) && !start_nodes.contains(succ))
            .collect();
        adjacency.insert(ix, successors);
    }
    adjacency
}

fn reaches(adjacency: &FxHashMap<EventIx, Vec<EventIx>>, from: EventIx, to: EventIx) -> bool {
    if from == to {
        return true;
    }
    let mut visited: FxHashSet<EventIx> = FxHashSet::default();
    let mut stack = vec![from];
    while let Some(node) = stack.pop() {
        if !visited.insert(node) {
            continue;
        }
        if let Some(successors) = adjacency.get(&node) {
            for &succ in successors {
                if succ == to {
                    return true;
                }
                stack.push(succ);
            }
        }
    }
    false
}

/// Selects end points among the loop-back points with the pairwise
/// reachability matrix criterion: a loop-back point is an end point iff
/// every other loop-back point reaches it at least as much as it reaches
/// them. Mutually-reaching loop-back points qualify as co-equal end points.
fn end_nodes_from_loop_backs(
    loop_back_nodes: &FxHashSet<EventIx>,
    trimmed: &FxHashMap<EventIx, Vec<EventIx>>,
) -> FxHashSet<EventIx> {
    let candidates: Vec<EventIx> = loop_back_nodes.iter().copied().collect();
    let n = candidates.len();
    let mut reach = vec![vec![false; n]; n];
    for (i, &a) in candidates.iter().enumerate() {
        for (j, &b) in candidates.iter().enumerate() {
            reach[i][j] = reaches(trimmed, a, b);
        }
    }
    candidates
        .iter()
        .enumerate()
        .filter(|&(i, _)| {
            (0..n).all(|j| i32::from(reach[j][i]) - i32::from(reach[i][j]) >= 0)
        })
        .map(|(_, &ix)| ix)
        .collect()
}

/// Break points: exit-capable non-end nodes whose exits leave the loop
/// without rejoining the normal end-point flow.
///
/// When no end point can exit, every exit-capable node is a break point
/// (breaking is the only way out). Otherwise a candidate is kept if it
/// cannot reach an end point once loop-back travel is forbidden, or if its
/// gate tree shows an AND/OR overlap between the in-loop continuation and
/// the exit (the exit fires alongside the continuation, so it cannot be
/// the loop's own exit path).
fn calc_break_nodes(
    scc: &FxHashSet<EventIx>,
    end_nodes: &FxHashSet<EventIx>,
    exit_nodes: &FxHashSet<EventIx>,
    trimmed: &FxHashMap<EventIx, Vec<EventIx>>,
    graph: &EventGraph,
) -> FxHashSet<EventIx> {
    if exit_nodes.is_empty() {
        return FxHashSet::default();
    }
    let candidates: FxHashSet<EventIx> = exit_nodes
        .difference(end_nodes)
        .copied()
        .collect();
    let ends_with_exits: FxHashSet<EventIx> =
        end_nodes.intersection(exit_nodes).copied().collect();
    if ends_with_exits.is_empty() {
        return candidates;
    }

    let member_types: BTreeSet<String> = scc
        .iter()
        .map(|&ix| graph.event_type(ix).to_string())
        .collect();
    candidates
        .into_iter()
        .filter(|&candidate| {
            let reaches_an_end = end_nodes
                .iter()
                .any(|&end| reaches(trimmed, candidate, end));
            if !reaches_an_end {
                return true;
            }
            let (tree, _) =
                infer_gate_tree_with_fallback(&graph.event(candidate).event_sets);
            tree.map(|tree| tree.has_overlapping_gate_across(&member_types))
                .unwrap_or(false)
        })
        .collect()
}
