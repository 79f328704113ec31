//! SCC-based loop detection and folding.
//!
//! Loops are strongly connected components of the event graph. Each
//! non-trivial component is decomposed into start, end and break points,
//! extracted into a self-contained sub-graph with its loop-carrying edges
//! removed, and replaced in the parent graph by a single opaque
//! [`LoopEvent`] node. The procedure recurses into each extracted sub-graph,
//! so nested loops fold from the inside out; it terminates because every
//! replacement strictly shrinks the graph under consideration.
//!
//! Folding is idempotent: running [`detect_loops`] on an already-folded
//! graph finds no further non-trivial components.
//!
//! # Examples
//!
//! ```
//! use causeway::events::EventModel;
//! use causeway::loops::detect_loops;
//!
//! // B repeats before the job moves on to C.
//! let mut model = EventModel::new();
//! model.record_outgoing("A", &["B"]);
//! model.record_outgoing("B", &["B"]);
//! model.record_outgoing("B", &["C"]);
//! model.record_incoming("B", &["A"]);
//! model.record_incoming("B", &["B"]);
//! model.record_incoming("C", &["B"]);
//! model.ensure_event("C");
//!
//! let folded = detect_loops(model.graph().unwrap()).unwrap();
//! // The self-loop on B is now an opaque loop node.
//! assert!(folded.find_by_type("B").is_none());
//! assert!(folded.find_by_type("LOOP_1").is_some());
//! ```

mod components;
mod fold;

pub(crate) use components::Loop;

use petgraph::algo::tarjan_scc;
use rustc_hash::FxHashSet;
use uuid::Uuid;

use crate::errors::LoopError;
use crate::events::{Event, EventGraph, EventIx};

/// Opaque replacement for a detected loop in the parent graph.
///
/// Carries the aggregated [`Event`] facade the parent graph sees (with
/// in/out event sets rewritten to reference the loop), the self-contained
/// interior sub-graph, and the identities of the interior's start, end and
/// break points.
#[derive(Clone, Debug)]
pub struct LoopEvent {
    pub event: Event,
    pub sub_graph: EventGraph,
    pub start_uid: Uuid,
    pub end_uid: Uuid,
    pub break_uids: FxHashSet<Uuid>,
}

/// Detects all loops in the graph and returns the graph with every loop
/// folded into a [`LoopEvent`] node, recursively.
///
/// # Errors
///
/// [`LoopError::UnreachableLoop`] when a strongly connected component has no
/// incoming edge from outside itself.
pub fn detect_loops(graph: EventGraph) -> Result<EventGraph, LoopError> {
    let mut graph = graph;
    let sccs = tarjan_scc(graph.inner());
    for scc in sccs {
        if scc.iter().any(|&ix| !graph.contains(ix)) {
            // folding an earlier component pruned part of this one
            continue;
        }
        if scc.len() == 1 && !graph.has_edge(scc[0], scc[0]) {
            continue;
        }
        let members: FxHashSet<EventIx> = scc.iter().copied().collect();
        let loop_parts = components::calc_loop_components(&members, &graph)?;
        tracing::debug!(
            size = members.len(),
            starts = loop_parts.start_nodes.len(),
            loop_backs = loop_parts.loop_back_nodes.len(),
            ends = loop_parts.end_nodes.len(),
            breaks = loop_parts.break_nodes.len(),
            "folding strongly connected component"
        );
        let (sub_graph, start_uid, end_uid, break_uids) =
            fold::extract_loop_sub_graph(&loop_parts, &graph);
        let sub_graph = detect_loops(sub_graph)?;
        let loop_event = fold::create_loop_event(
            &loop_parts,
            &graph,
            sub_graph,
            start_uid,
            end_uid,
            break_uids,
        );
        graph = fold::fold_loop_into_graph(&loop_parts, loop_event, graph);
    }
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventModel;

    fn self_loop_model() -> EventModel {
        let mut model = EventModel::new();
        model.record_outgoing("A", &["B"]);
        model.record_outgoing("B", &["B"]);
        model.record_outgoing("B", &["C"]);
        model.record_incoming("B", &["A"]);
        model.record_incoming("B", &["B"]);
        model.record_incoming("C", &["B"]);
        model.ensure_event("C");
        model
    }

    fn two_node_cycle_model() -> EventModel {
        let mut model = EventModel::new();
        model.record_outgoing("A", &["B"]);
        model.record_outgoing("B", &["C"]);
        model.record_outgoing("C", &["B"]);
        model.record_outgoing("C", &["D"]);
        model.record_incoming("B", &["A"]);
        model.record_incoming("B", &["C"]);
        model.record_incoming("C", &["B"]);
        model.record_incoming("D", &["C"]);
        model.ensure_event("D");
        model
    }

    #[test]
    fn self_loop_folds_into_loop_event() {
        let folded = detect_loops(self_loop_model().graph().unwrap()).unwrap();
        let loop_ix = folded.find_by_type("LOOP_1").unwrap();
        let a = folded.find_by_type("A").unwrap();
        let c = folded.find_by_type("C").unwrap();
        assert!(folded.has_edge(a, loop_ix));
        assert!(folded.has_edge(loop_ix, c));
        let loop_event = folded.node(loop_ix).as_loop().unwrap();
        assert_eq!(loop_event.sub_graph.node_count(), 1);
        assert_eq!(loop_event.start_uid, loop_event.end_uid);
    }

    #[test]
    fn two_node_cycle_folds_with_interior_edge() {
        let folded = detect_loops(two_node_cycle_model().graph().unwrap()).unwrap();
        let loop_ix = folded.find_by_type("LOOP_1").unwrap();
        let loop_event = folded.node(loop_ix).as_loop().unwrap();
        assert_eq!(loop_event.sub_graph.node_count(), 2);
        let b = loop_event.sub_graph.find_by_type("B").unwrap();
        let c = loop_event.sub_graph.find_by_type("C").unwrap();
        assert!(loop_event.sub_graph.has_edge(b, c));
        // the loop-carrying edge C -> B is gone from the interior
        assert!(!loop_event.sub_graph.has_edge(c, b));
        assert_eq!(loop_event.start_uid, loop_event.sub_graph.event(b).uid());
        assert_eq!(loop_event.end_uid, loop_event.sub_graph.event(c).uid());
    }

    #[test]
    fn folding_is_idempotent() {
        let folded = detect_loops(self_loop_model().graph().unwrap()).unwrap();
        let node_count = folded.node_count();
        let refolded = detect_loops(folded).unwrap();
        assert_eq!(refolded.node_count(), node_count);
        assert!(refolded.find_by_type("LOOP_2").is_none());
    }

    #[test]
    fn detached_cycle_is_fatal() {
        let mut model = EventModel::new();
        model.record_outgoing("X", &["Y"]);
        model.record_outgoing("Y", &["X"]);
        model.record_incoming("X", &["Y"]);
        model.record_incoming("Y", &["X"]);
        let err = detect_loops(model.graph().unwrap()).unwrap_err();
        assert!(matches!(err, LoopError::UnreachableLoop { .. }));
    }

    #[test]
    fn surrounding_event_sets_reference_the_loop() {
        let folded = detect_loops(self_loop_model().graph().unwrap()).unwrap();
        let a_ix = folded.find_by_type("A").unwrap();
        let a = folded.event(a_ix);
        assert!(
            a.event_sets
                .iter()
                .any(|set| set.contains("LOOP_1") && !set.contains("B"))
        );
    }
}
