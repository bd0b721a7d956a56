//! Benchmarks for the SVM solvers and one t-SNE gradient-descent run

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dalkit::api::Tsne;
use dalkit::core::{SolverMethod, SvmConfig};
use dalkit::data::{CsrMatrix, FeatureTable};
use dalkit::kernel::KernelKind;
use dalkit::optimizer::SvmTrainer;
use std::hint::black_box;

/// Two noisy blobs in 4 dimensions with deterministic pseudo-noise
fn blobs(n: usize) -> (FeatureTable, Vec<f64>) {
    let dim = 4;
    let mut values = Vec::with_capacity(n * dim);
    let mut labels = Vec::with_capacity(n);
    for i in 0..n {
        let label = if i % 2 == 0 { 1.0 } else { -1.0 };
        for d in 0..dim {
            let noise = ((i * 31 + d * 17) as f64 * 0.618).sin();
            values.push(label * 0.8 + noise);
        }
        labels.push(label);
    }
    let table = FeatureTable::from_dense(&values, n, dim).expect("valid table");
    (table, labels)
}

fn ring_affinity(n: usize) -> CsrMatrix {
    let mut offsets = vec![0];
    let mut cols = Vec::with_capacity(2 * n);
    for i in 0..n {
        let mut row = [(i + n - 1) % n, (i + 1) % n];
        row.sort_unstable();
        cols.extend_from_slice(&row);
        offsets.push(cols.len());
    }
    let values = vec![1.0 / (2 * n) as f64; cols.len()];
    CsrMatrix::new(offsets, cols, values).expect("valid affinity")
}

fn bench_solvers(c: &mut Criterion) {
    let mut group = c.benchmark_group("svm_train");
    group.sample_size(10);

    for size in [200, 800].iter() {
        let (table, labels) = blobs(*size);
        group.throughput(Throughput::Elements(*size as u64));
        for method in [SolverMethod::Boser, SolverMethod::Thunder] {
            let config = SvmConfig {
                method,
                ..SvmConfig::default()
            };
            let trainer = SvmTrainer::new(KernelKind::Rbf { sigma: 1.0 }, config);
            group.bench_with_input(
                BenchmarkId::new(format!("{method:?}"), size),
                size,
                |bencher, _| {
                    bencher.iter(|| {
                        let model = trainer
                            .train_table(black_box(&table), &labels, None)
                            .expect("training succeeds");
                        black_box(model);
                    });
                },
            );
        }
    }
    group.finish();
}

fn bench_tsne(c: &mut Criterion) {
    let mut group = c.benchmark_group("tsne_descent");
    group.sample_size(10);

    for size in [1000, 5000].iter() {
        let affinity = ring_affinity(*size);
        let start: Vec<[f64; 2]> = (0..*size)
            .map(|i| {
                let t = i as f64;
                [(t * 0.37).sin() * 1e-2, (t * 0.91).cos() * 1e-2]
            })
            .collect();
        let tsne = Tsne::new().with_max_iter(50).with_exploration_iter(25);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |bencher, _| {
            bencher.iter(|| {
                let mut embedding = start.clone();
                let result = tsne.run(&mut embedding, &affinity).expect("descent succeeds");
                black_box(result);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_solvers, bench_tsne);
criterion_main!(benches);
