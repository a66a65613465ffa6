use criterion::*;

use qvnt_dist::prelude::*;
use qvnt_dist::state::ClusterConfig;

fn layered_circuit(num_qubits: usize, num_threads: usize) {
    let config = ClusterConfig::new(num_qubits).with_num_threads(num_threads);
    let mut state = DistributedState::new(
        config,
        0,
        Box::new(qvnt_dist::transport::SingleRankTransport),
        Box::new(qvnt_dist::rng::SeededRng::new(0)),
    )
    .unwrap();

    for q in 0..num_qubits {
        state.apply(Gate::H(q)).unwrap();
    }
    for q in 0..num_qubits - 1 {
        state.apply(Gate::X(q + 1).controlled(vec![q])).unwrap();
    }

    let outcome = state.measure(0).unwrap();
    assert!(outcome == 0 || outcome == 1);
}

fn performance(c: &mut Criterion) {
    let max_threads = rayon::current_num_threads();

    for th_num in 1..=max_threads {
        for qu_num in [16, 18, 20] {
            c.bench_function(format!("evaluate_qu{qu_num}_th{th_num}").as_str(), |b| {
                b.iter(|| layered_circuit(black_box(qu_num), black_box(th_num)))
            });
        }
    }
}

criterion_group!(benches, performance);
criterion_main!(benches);
