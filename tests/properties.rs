mod common;

use common::*;

use causeway::events::CausalEvent;
use causeway::loops::detect_loops;
use causeway::pipeline::{build_diagram, build_event_model};
use causeway::puml::PumlGraph;
use proptest::prelude::*;

/// Whether an event with this name appears anywhere in the diagram,
/// including inside nested loop sub-diagrams.
fn diagram_contains_event(diagram: &PumlGraph, name: &str) -> bool {
    diagram.nodes().any(|(_, node)| {
        node.as_event()
            .map(|event| {
                event.name == name
                    || event
                        .sub_graph
                        .as_ref()
                        .map(|sub| diagram_contains_event(sub, name))
                        .unwrap_or(false)
            })
            .unwrap_or(false)
    })
}

/// A randomly shaped but always well-formed job: a linear spine of events,
/// optionally with a two-way concurrent fan-out that rejoins, and
/// optionally a repeated event forming a self-loop.
fn arbitrary_trace() -> impl Strategy<Value = Vec<CausalEvent>> {
    (2usize..6, any::<bool>(), any::<bool>()).prop_map(|(spine, fan_out, self_loop)| {
        let mut events: Vec<CausalEvent> = Vec::new();
        let mut next_id = 0usize;
        let mut fresh = |events: &mut Vec<CausalEvent>, ty: String, previous: Vec<String>| {
            next_id += 1;
            let id = next_id.to_string();
            events.push(CausalEvent {
                event_id: id.clone(),
                event_type: ty,
                previous_event_ids: previous,
            });
            id
        };
        let mut tail = fresh(&mut events, "E0".to_string(), vec![]);
        for step in 1..spine {
            if self_loop && step == 1 {
                // repeat the previous event type once before moving on
                let looped = fresh(&mut events, format!("E{}", step - 1), vec![tail.clone()]);
                tail = looped;
            }
            tail = fresh(&mut events, format!("E{step}"), vec![tail.clone()]);
        }
        if fan_out {
            let left = fresh(&mut events, "L".to_string(), vec![tail.clone()]);
            let right = fresh(&mut events, "R".to_string(), vec![tail.clone()]);
            fresh(&mut events, "J".to_string(), vec![left, right]);
        }
        events
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn diagrams_build_with_matched_operator_pairs(run in arbitrary_trace()) {
        let job = trace("prop", vec![run.clone(), run]);
        let diagram = build_diagram(&job).unwrap();
        prop_assert!(diagram.operator_pairs_balanced());
    }

    #[test]
    fn kill_nodes_never_gain_outgoing_edges(run in arbitrary_trace()) {
        let job = trace("prop", vec![run]);
        let diagram = build_diagram(&job).unwrap();
        for (ix, node) in diagram.nodes() {
            if node.is_kill() {
                prop_assert_eq!(diagram.out_degree(ix), 0);
            }
        }
    }

    #[test]
    fn loop_folding_is_idempotent(run in arbitrary_trace()) {
        let job = trace("prop", vec![run]);
        let model = build_event_model(&job);
        let folded = detect_loops(model.graph().unwrap()).unwrap();
        let nodes = folded.node_count();
        let edges = folded.edge_count();
        let refolded = detect_loops(folded).unwrap();
        prop_assert_eq!(refolded.node_count(), nodes);
        prop_assert_eq!(refolded.edge_count(), edges);
    }

    #[test]
    fn observed_event_types_survive_into_the_diagram(run in arbitrary_trace()) {
        let job = trace("prop", vec![run.clone(), run]);
        let diagram = build_diagram(&job).unwrap();
        for event in job.sequences.iter().flatten() {
            prop_assert!(
                diagram_contains_event(&diagram, &event.event_type),
                "event type {} lost", event.event_type
            );
        }
    }
}
