//! Backend operation benchmarks.
//!
//! Measures single operations with Criterion's statistics, as a cross-check
//! of the harness numbers.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use crudbench::backends::{Backend, DocumentBackend, SqliteBackend};
use crudbench::fixtures::{self, lookup_value};
use crudbench::operation::{Field, Operation, ResetScope};
use crudbench::stats::summarize;

const RECORDS: usize = 1_000;

fn seeded_backends() -> Vec<Box<dyn Backend>> {
    let mut backends: Vec<Box<dyn Backend>> = vec![
        Box::new(DocumentBackend::temporary().unwrap()),
        Box::new(SqliteBackend::in_memory().unwrap()),
    ];
    for backend in backends.iter_mut() {
        backend
            .reset(&ResetScope::Indexed {
                records: RECORDS,
                field: Field::TestField,
            })
            .unwrap();
    }
    backends
}

fn bench_lookups(c: &mut Criterion) {
    let mut group = c.benchmark_group("operations/lookup");

    let operations = [
        Operation::PointLookup {
            value: lookup_value(RECORDS),
        },
        Operation::PatternLookup {
            prefix: fixtures::PATTERN_PREFIX.to_string(),
        },
        Operation::IndexedLookup {
            field: Field::TestField,
            value: lookup_value(RECORDS),
        },
        Operation::Join {
            limit: fixtures::JOIN_WINDOW,
        },
    ];

    for mut backend in seeded_backends() {
        for op in &operations {
            let id = BenchmarkId::new(backend.name().to_string(), op.name());
            group.bench_function(id, |b| {
                b.iter(|| black_box(backend.execute(op).unwrap()));
            });
        }
        backend.close().unwrap();
    }

    group.finish();
}

fn bench_bulk_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("operations/bulk_insert");
    group.sample_size(10);

    for count in [100, 1_000] {
        let op = Operation::BulkInsert { count };

        group.bench_with_input(BenchmarkId::new("document", count), &op, |b, op| {
            b.iter_batched(
                || DocumentBackend::temporary().unwrap(),
                |mut backend| black_box(backend.execute(op).unwrap()),
                BatchSize::PerIteration,
            );
        });

        group.bench_with_input(BenchmarkId::new("sqlite", count), &op, |b, op| {
            b.iter_batched(
                || SqliteBackend::in_memory().unwrap(),
                |mut backend| black_box(backend.execute(op).unwrap()),
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

fn bench_summarize(c: &mut Criterion) {
    let mut group = c.benchmark_group("stats/summarize");

    for n in [5, 30, 1_000] {
        let samples: Vec<f64> = (0..n).map(|i| 0.001 * (i % 7) as f64 + 0.01).collect();
        group.bench_with_input(BenchmarkId::from_parameter(n), &samples, |b, samples| {
            b.iter(|| black_box(summarize(samples).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_lookups, bench_bulk_insert, bench_summarize);
criterion_main!(benches);
