use causeway::events::EventModel;
use causeway::loops::detect_loops;
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

/// A chain of `depth` nested two-node loops: each level Bi -> Ci -> Bi with
/// an exit into the next level.
fn nested_loop_model(depth: usize) -> EventModel {
    let mut model = EventModel::new();
    model.record_outgoing("A", &["B0"]);
    model.record_incoming("B0", &["A"]);
    for level in 0..depth {
        let b = format!("B{level}");
        let c = format!("C{level}");
        let next = format!("B{}", level + 1);
        model.record_outgoing(&b, &[&c]);
        model.record_outgoing(&c, &[&b]);
        model.record_outgoing(&c, &[&next]);
        model.record_incoming(&c, &[&b]);
        model.record_incoming(&b, &[&c]);
        model.record_incoming(&next, &[&c]);
    }
    model.ensure_event(&format!("B{depth}"));
    model
}

fn bench_loop_folding(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("loop_folding");
    for depth in [2usize, 8, 16] {
        let model = nested_loop_model(depth);
        group.bench_function(format!("chain_of_{depth}_loops"), |bencher| {
            bencher.iter(|| {
                let graph = model.graph().expect("well-formed model");
                detect_loops(black_box(graph)).expect("no detached cycles")
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_loop_folding);
criterion_main!(benches);
