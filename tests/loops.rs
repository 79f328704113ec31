mod common;

use common::*;

use causeway::errors::PipelineError;
use causeway::loops::detect_loops;
use causeway::pipeline::build_diagram;

#[test]
fn nested_loops_fold_inside_out() {
    // outer loop B..E re-entered from E; inner self-loop on C
    let model = model_from_observations(
        &[
            ("A", &["B"]),
            ("B", &["C"]),
            ("C", &["C"]),
            ("C", &["E"]),
            ("E", &["B"]),
            ("E", &["F"]),
        ],
        &[
            ("B", &["A"]),
            ("B", &["E"]),
            ("C", &["B"]),
            ("C", &["C"]),
            ("E", &["C"]),
            ("F", &["E"]),
        ],
    );
    let folded = detect_loops(model.graph().unwrap()).unwrap();
    let outer_ix = folded.find_by_type("LOOP_1").unwrap();
    let outer = folded.node(outer_ix).as_loop().unwrap();
    // the inner self-loop was folded while recursing into the outer interior
    let inner_ix = outer
        .sub_graph
        .node_indices()
        .find(|&ix| outer.sub_graph.node(ix).is_loop())
        .expect("inner loop folded inside outer interior");
    let inner = outer.sub_graph.node(inner_ix).as_loop().unwrap();
    assert_eq!(inner.sub_graph.node_count(), 1);
}

#[test]
fn folded_graph_has_no_further_loops() {
    let model = model_from_observations(
        &[
            ("A", &["B"]),
            ("B", &["C"]),
            ("C", &["B"]),
            ("C", &["D"]),
        ],
        &[
            ("B", &["A"]),
            ("B", &["C"]),
            ("C", &["B"]),
            ("D", &["C"]),
        ],
    );
    let folded = detect_loops(model.graph().unwrap()).unwrap();
    let before = folded.node_count();
    let refolded = detect_loops(folded).unwrap();
    assert_eq!(refolded.node_count(), before);
    assert!(refolded.find_by_type("LOOP_2").is_none());
}

#[test]
fn loop_diagram_nests_interior_sequence() {
    // B -> C inside the loop, C loops back to B, exit to D
    let run = sequence(&[
        ("1", "A", &[]),
        ("2", "B", &["1"]),
        ("3", "C", &["2"]),
        ("4", "B", &["3"]),
        ("5", "C", &["4"]),
        ("6", "D", &["5"]),
    ]);
    let job = trace("loop_sequence", vec![run]);
    let diagram = build_diagram(&job).unwrap();
    let blocks = diagram.write_uml_blocks(0, 4);
    assert_eq!(
        blocks,
        vec![
            ":A;".to_string(),
            "repeat".to_string(),
            "    :B;".to_string(),
            "    :C;".to_string(),
            "repeat while".to_string(),
            ":D;".to_string(),
        ]
    );
}

#[test]
fn detached_cycle_aborts_only_its_own_job() {
    let model = model_from_observations(
        &[("X", &["Y"]), ("Y", &["X"])],
        &[("X", &["Y"]), ("Y", &["X"])],
    );
    let err = detect_loops(model.graph().unwrap()).unwrap_err();
    let pipeline_err: PipelineError = err.into();
    assert!(pipeline_err.to_string().contains("no start point"));
}
