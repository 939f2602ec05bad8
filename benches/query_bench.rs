//! Benchmarks for the fleet query engine
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fleetquery::engine::{QueryEngine, QueryOptions};
use fleetquery::query::{parse, tokenize, ExecutorOptions, QueryExecutor};
use fleetquery::source::GeneratedSource;
use std::sync::Arc;

const SIMPLE: &str = "Get Computer Name from all machines";
const FILTERED: &str = "Get Computer Name, CPU Percent from all machines \
    where CPU Percent is greater than 60 and OS Platform contains \"windows\" \
    order by CPU Percent desc limit 20";
const GROUPED: &str = "Get avg(Compliance Score), max(CPU Percent), count() \
    from all machines group by Group";

fn bench_lexer(c: &mut Criterion) {
    let mut group = c.benchmark_group("lexer");

    for (name, query) in [("simple", SIMPLE), ("filtered", FILTERED), ("grouped", GROUPED)] {
        group.bench_function(name, |b| b.iter(|| tokenize(black_box(query)).unwrap()));
    }

    group.finish();
}

fn bench_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser");

    for (name, query) in [("simple", SIMPLE), ("filtered", FILTERED), ("grouped", GROUPED)] {
        group.bench_function(name, |b| b.iter(|| parse(black_box(query)).unwrap()));
    }

    group.finish();
}

fn bench_executor(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("executor");

    for size in [100, 1000, 10000] {
        let records = Arc::new(GeneratedSource::new(size).with_seed(42).generate());
        let executor = QueryExecutor::new(
            records,
            ExecutorOptions {
                max_rows: 0,
                ..Default::default()
            },
        );

        group.throughput(Throughput::Elements(size as u64));

        for (name, query) in [("filtered", FILTERED), ("grouped", GROUPED)] {
            let ast = parse(query).unwrap();
            group.bench_with_input(BenchmarkId::new(name, size), &ast, |b, ast| {
                b.iter(|| rt.block_on(executor.execute(black_box(ast))).unwrap())
            });
        }
    }

    group.finish();
}

fn bench_engine_cache(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("engine");

    let records = GeneratedSource::new(1000).with_seed(42).generate();
    let cached = QueryEngine::builder().records(records.clone()).build();
    let uncached = QueryEngine::builder()
        .records(records)
        .cache_enabled(false)
        .build();
    let options = QueryOptions::default();

    // Warm the result cache
    rt.block_on(cached.query(FILTERED, &options));

    group.bench_function("cache_hit", |b| {
        b.iter(|| rt.block_on(cached.query(black_box(FILTERED), &options)))
    });

    group.bench_function("no_cache", |b| {
        b.iter(|| rt.block_on(uncached.query(black_box(FILTERED), &options)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_lexer,
    bench_parser,
    bench_executor,
    bench_engine_cache
);
criterion_main!(benches);
