//! Benchmarks for the storage engine.
//!
//! Run with: cargo bench --package rill
//!
//! ## Benchmark Categories
//!
//! - **Encoding**: chunk encode/decode throughput
//! - **Insert**: hot-tier insert path, with and without journal fsync
//! - **Compaction**: one full write_chunk round
//! - **Range queries**: index ranges over hot, cold and mixed tiers

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rill::{Datapoint, DatapointArray, EngineConfig, StreamEngine, SyncMode};
use serde_json::json;
use tempfile::TempDir;

fn generate_points(count: usize, start_t: f64) -> DatapointArray {
    (0..count)
        .map(|i| {
            Datapoint::new(
                start_t + i as f64 * 0.1,
                json!({ "value": 50.0 + (i as f64 * 0.1).sin() * 10.0 }),
            )
        })
        .collect::<Vec<_>>()
        .into()
}

fn bench_encoding(c: &mut Criterion) {
    let array = generate_points(1_000, 0.0);
    let encoded = array.encode().unwrap();

    let mut group = c.benchmark_group("encoding");
    group.throughput(Throughput::Elements(1_000));
    group.bench_function("encode_1k", |b| b.iter(|| black_box(&array).encode().unwrap()));
    group.bench_function("decode_1k", |b| {
        b.iter(|| DatapointArray::decode(black_box(&encoded)).unwrap())
    });
    group.finish();
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.throughput(Throughput::Elements(100));

    group.bench_function("insert_100_no_sync", |b| {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::new().with_sync_mode(SyncMode::None);
        let engine = StreamEngine::open(dir.path(), config).unwrap();
        let mut t = 0.0;
        b.iter(|| {
            t += 100.0;
            engine.insert("bench", "", generate_points(100, t), false).unwrap()
        });
    });

    group.bench_function("insert_100_fsync", |b| {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::new().with_sync_mode(SyncMode::Fsync);
        let engine = StreamEngine::open(dir.path(), config).unwrap();
        let mut t = 0.0;
        b.iter(|| {
            t += 100.0;
            engine.insert("bench", "", generate_points(100, t), false).unwrap()
        });
    });

    group.finish();
}

fn bench_compaction(c: &mut Criterion) {
    c.bench_function("write_chunk_round", |b| {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::new()
            .with_batch_size(250)
            .with_sync_mode(SyncMode::None);
        let engine = StreamEngine::open(dir.path(), config).unwrap();
        let mut t = 0.0;
        b.iter(|| {
            t += 1_000.0;
            engine.insert("bench", "", generate_points(1_000, t), false).unwrap();
            while engine.write_chunk().unwrap() > 0 {}
        });
    });
}

fn bench_range_queries(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig::new()
        .with_batch_size(250)
        .with_sync_mode(SyncMode::None);
    let engine = StreamEngine::open(dir.path(), config).unwrap();

    // 10k compacted + 1k still hot
    engine.insert("bench", "", generate_points(10_000, 0.0), false).unwrap();
    engine.write_queue().unwrap();
    while engine.write_chunk().unwrap() > 0 {}
    engine.insert("bench", "", generate_points(1_000, 1_000.0), false).unwrap();

    let mut group = c.benchmark_group("range");
    group.throughput(Throughput::Elements(1_000));

    group.bench_function("index_range_hot_1k", |b| {
        b.iter(|| {
            let mut range = engine.index_range("bench", "", -1_000, 0).unwrap();
            let mut n = 0usize;
            while let Some(point) = range.next().unwrap() {
                black_box(&point);
                n += 1;
            }
            n
        })
    });

    group.bench_function("index_range_cold_1k", |b| {
        b.iter(|| {
            let mut range = engine.index_range("bench", "", 0, 1_000).unwrap();
            let mut n = 0usize;
            while let Some(array) = range.next_array().unwrap() {
                n += array.len();
            }
            n
        })
    });

    group.bench_function("time_range_mixed", |b| {
        b.iter(|| {
            let mut range = engine.time_range("bench", "", 900.0, 1_050.0).unwrap();
            let mut n = 0usize;
            while let Some(array) = range.next_array().unwrap() {
                n += array.len();
            }
            n
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_encoding,
    bench_insert,
    bench_compaction,
    bench_range_queries
);
criterion_main!(benches);
