use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rem_core::{
    ClusterPartition, ConfusionMatrix, Corrector, MitigationConfig, NoiseModel, ShotSampler,
};

fn bench_correction(c: &mut Criterion) {
    // Benchmark 1: 4 qubits, exact composition
    let matrices: Vec<ConfusionMatrix> = (0..4)
        .map(|q| ConfusionMatrix::from_flip_rates(0.015 + 0.002 * q as f64, 0.025))
        .collect();
    let exact = NoiseModel::compose(
        matrices.clone(),
        ClusterPartition::singletons(4),
        &MitigationConfig::default(),
    )
    .unwrap();
    let mut sampler = ShotSampler::new(Some(42));
    let truth = {
        let mut probs = ndarray::Array1::zeros(16);
        probs[0] = 0.45;
        probs[15] = 0.45;
        probs[5] = 0.10;
        probs
    };
    let table_4q = sampler.sample_experiment(&exact, &truth, 100_000).unwrap();
    let corrector_exact = Corrector::new(&exact);

    c.bench_function("unconstrained_4q_exact", |b| {
        b.iter(|| corrector_exact.correct_unconstrained(black_box(&table_4q)))
    });

    c.bench_function("constrained_4q_exact", |b| {
        b.iter(|| corrector_exact.correct_constrained(black_box(&table_4q)))
    });

    // Benchmark 2: 12 qubits, factorized; the full 4096x4096 matrix is
    // never materialized
    let matrices: Vec<ConfusionMatrix> = (0..12)
        .map(|q| ConfusionMatrix::from_flip_rates(0.01 + 0.001 * q as f64, 0.02))
        .collect();
    let factorized = NoiseModel::compose(
        matrices,
        ClusterPartition::singletons(12),
        &MitigationConfig::default(),
    )
    .unwrap();
    assert!(factorized.is_factorized());
    let table_12q = rem_core::FrequencyTable::from_counts(
        12,
        [(0usize, 48_000u64), (0xFFF, 50_000), (0x0F0, 2_000)],
    )
    .unwrap();
    let corrector_factorized = Corrector::new(&factorized);

    c.bench_function("unconstrained_12q_factorized", |b| {
        b.iter(|| corrector_factorized.correct_unconstrained(black_box(&table_12q)))
    });

    c.bench_function("constrained_12q_factorized", |b| {
        b.iter(|| corrector_factorized.correct_constrained(black_box(&table_12q)))
    });
}

criterion_group!(benches, bench_correction);
criterion_main!(benches);
