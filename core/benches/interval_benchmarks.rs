//! Benchmarks for position queries
//!
//! Covers bulk construction and point queries of the interval tree, plus the
//! end-to-end cost of indexing and querying a generated module.

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::criterion_group;
use criterion::criterion_main;
use std::hint::black_box;
use typescope_ast::PythonParser;
use typescope_core::CodePosition;
use typescope_core::IntervalIndex;
use typescope_core::SourceFileIndex;

/// Nested intervals resembling a syntax tree: `width` siblings per level.
fn nested_intervals(count: usize) -> Vec<(u64, u64, usize)> {
    let mut intervals = Vec::with_capacity(count);
    let mut start = 0u64;
    while intervals.len() < count {
        let outer = (start, start + 100, intervals.len());
        intervals.push(outer);
        for offset in (0..90).step_by(10) {
            if intervals.len() == count {
                break;
            }
            intervals.push((start + offset, start + offset + 8, intervals.len()));
        }
        start += 100;
    }
    intervals
}

fn generated_module(functions: usize) -> String {
    (0..functions)
        .map(|i| format!("def f{i}(a, b):\n    total = [a * {i} for _ in range(b)]\n    return sum(total)\n\n"))
        .collect()
}

fn bench_interval_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("interval_build");
    for count in [1_000, 10_000, 100_000] {
        let intervals = nested_intervals(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &intervals, |b, intervals| {
            b.iter(|| IntervalIndex::from_intervals(intervals.iter().copied()));
        });
    }
    group.finish();
}

fn bench_interval_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("interval_queries");
    for count in [1_000, 10_000, 100_000] {
        let index = match IntervalIndex::from_intervals(nested_intervals(count)) {
            Ok(index) => index,
            Err(e) => panic!("failed to build interval index: {e}"),
        };
        let end = (count as u64 / 10) * 100;
        group.bench_with_input(BenchmarkId::new("at", count), &index, |b, index| {
            let mut point = 0;
            b.iter(|| {
                point = (point + 37) % end;
                black_box(index.at(point));
            });
        });
        group.bench_with_input(BenchmarkId::new("envelop", count), &index, |b, index| {
            b.iter(|| black_box(index.envelop(end / 2, end / 2 + 500)));
        });
    }
    group.finish();
}

fn bench_source_file(c: &mut Criterion) {
    let parser = PythonParser::new();
    let source = generated_module(500);

    c.bench_function("source_file_build", |b| {
        b.iter(|| SourceFileIndex::from_source("bench.py", black_box(&source), &parser));
    });

    let index = match SourceFileIndex::from_source("bench.py", &source, &parser) {
        Ok(index) => index,
        Err(e) => panic!("failed to index generated module: {e}"),
    };
    c.bench_function("minimal_node_at", |b| {
        let mut line = 0;
        b.iter(|| {
            line = (line + 7) % 2000;
            black_box(index.minimal_node_at(CodePosition::new(line + 1, 12)));
        });
    });
}

criterion_group!(
    benches,
    bench_interval_build,
    bench_interval_queries,
    bench_source_file
);
criterion_main!(benches);
