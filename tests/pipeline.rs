mod common;

use common::*;

use causeway::errors::FlagKind;
use causeway::logic::infer_gate_tree;
use causeway::pipeline::{build_diagram, build_diagram_string};
use causeway::types::GateKind;
use rustc_hash::FxHashSet;

#[test]
fn and_branches_rejoin_at_common_successor() {
    // A -> AND {B, C}, both rejoin at D
    let run = sequence(&[
        ("1", "A", &[]),
        ("2", "B", &["1"]),
        ("3", "C", &["1"]),
        ("4", "D", &["2", "3"]),
    ]);
    let job = trace("and_rejoin", vec![run.clone(), run]);
    let diagram = build_diagram(&job).unwrap();
    assert!(diagram.operator_pairs_balanced());

    let blocks = diagram.write_uml_blocks(0, 4);
    let fork = blocks.iter().position(|line| line == "fork").unwrap();
    let end_fork = blocks.iter().position(|line| line == "end fork").unwrap();
    let b = blocks.iter().position(|line| line.contains(":B;")).unwrap();
    let c = blocks.iter().position(|line| line.contains(":C;")).unwrap();
    let d = blocks.iter().position(|line| line.contains(":D;")).unwrap();
    assert!(fork < b && b < end_fork);
    assert!(fork < c && c < end_fork);
    assert!(end_fork < d);
}

#[test]
fn self_loop_wraps_event_in_repeat_block() {
    // B repeats, then the job moves on to C
    let run = sequence(&[
        ("1", "A", &[]),
        ("2", "B", &["1"]),
        ("3", "B", &["2"]),
        ("4", "C", &["3"]),
    ]);
    let job = trace("self_loop", vec![run]);
    let diagram = build_diagram(&job).unwrap();
    let blocks = diagram.write_uml_blocks(0, 4);
    assert_eq!(
        blocks,
        vec![
            ":A;".to_string(),
            "repeat".to_string(),
            "    :B;".to_string(),
            "repeat while".to_string(),
            ":C;".to_string(),
        ]
    );
}

#[test]
fn overlapping_event_sets_infer_and_of_common_and_xor() {
    // {B,C} and {D,C} observed after A: C always fires, one of B or D
    let runs = vec![
        sequence(&[
            ("1", "A", &[]),
            ("2", "B", &["1"]),
            ("3", "C", &["1"]),
        ]),
        sequence(&[
            ("1", "A", &[]),
            ("2", "D", &["1"]),
            ("3", "C", &["1"]),
        ]),
    ];
    let job = trace("worked_example", runs);
    let model = causeway::pipeline::build_event_model(&job);
    let a = model.event("A").unwrap();
    let gate = infer_gate_tree(&a.event_sets).unwrap().unwrap();
    assert_eq!(gate.kind(), Some(GateKind::And));
    let display = gate.to_string();
    assert!(display.contains("XOR"), "expected nested XOR in {display}");
    assert!(display.contains('C'));

    let diagram = build_diagram(&job).unwrap();
    let blocks = diagram.write_uml_blocks(0, 4);
    let fork = blocks.iter().position(|line| line == "fork").unwrap();
    let xor = blocks
        .iter()
        .position(|line| line.contains("if (XOR) then"))
        .unwrap();
    let end_fork = blocks.iter().position(|line| line == "end fork").unwrap();
    assert!(fork < xor && xor < end_fork);
    assert!(diagram.operator_pairs_balanced());
}

#[test]
fn triple_occurrence_emits_single_annotated_event() {
    // three concurrent Bs after A become one B with branch count 3
    let run = sequence(&[
        ("1", "A", &[]),
        ("2", "B", &["1"]),
        ("3", "B", &["1"]),
        ("4", "B", &["1"]),
    ]);
    let job = trace("branch_count", vec![run]);
    let diagram = build_diagram(&job).unwrap();
    let blocks = diagram.write_uml_blocks(0, 4);
    let b_lines = blocks.iter().filter(|line| line.contains(":B;")).count();
    assert_eq!(b_lines, 1);
    assert!(blocks.contains(&"repeat while (BC3)".to_string()));
}

#[test]
fn repeated_runs_on_identical_input_are_deterministic() {
    // two AND blocks back to back; whatever reading the walker picks, it
    // must pick the same one every time
    let run = sequence(&[
        ("1", "A", &[]),
        ("2", "B", &["1"]),
        ("3", "C", &["1"]),
        ("4", "D", &["2", "3"]),
        ("5", "E", &["4"]),
        ("6", "F", &["4"]),
        ("7", "G", &["5", "6"]),
    ]);
    let job = trace("bunched", vec![run.clone(), run]);
    let first = build_diagram_string(&job).unwrap();
    let second = build_diagram_string(&job).unwrap();
    assert_eq!(first, second);
}

#[test]
fn infeasible_gate_partition_degrades_to_flagged_or() {
    // pairwise overlaps with no disjoint cover after X
    let runs = vec![
        sequence(&[("1", "X", &[]), ("2", "A", &["1"]), ("3", "B", &["1"])]),
        sequence(&[("1", "X", &[]), ("2", "A", &["1"]), ("3", "C", &["1"])]),
        sequence(&[("1", "X", &[]), ("2", "B", &["1"]), ("3", "C", &["1"])]),
    ];
    let job = trace("ambiguous", runs);
    let diagram = build_diagram(&job).unwrap();
    assert!(
        diagram
            .flags()
            .iter()
            .any(|flag| flag.kind == FlagKind::AmbiguousLogic)
    );
    // conservative fallback still yields a well-formed block structure
    assert!(diagram.operator_pairs_balanced());
}

#[test]
fn every_observed_event_type_appears_in_the_diagram() {
    let run = sequence(&[
        ("1", "A", &[]),
        ("2", "B", &["1"]),
        ("3", "C", &["2"]),
        ("4", "D", &["3"]),
    ]);
    let job = trace("coverage", vec![run]);
    let diagram = build_diagram(&job).unwrap();
    let mut seen: FxHashSet<String> = FxHashSet::default();
    for (_, node) in diagram.nodes() {
        if let Some(event) = node.as_event() {
            seen.insert(event.name.clone());
        }
    }
    for expected in ["A", "B", "C", "D"] {
        assert!(seen.contains(expected), "missing event {expected}");
    }
}
