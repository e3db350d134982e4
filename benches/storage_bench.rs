//! Benchmarks for the tidemark storage engine
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;
use tempfile::tempdir;
use tidemark::pipeline::{decode_document, encode_document};
use tidemark::query::Aggregation;
use tidemark::storage::{route, Frame, Point};
use tidemark::{Tsdb, TsdbConfig};

fn create_test_points(count: usize) -> Vec<Point> {
    (0..count)
        .map(|i| Point::with_timestamp("bench", i as f64 * 0.5, 1_710_504_000_000 + i as i64))
        .collect()
}

fn bench_router(c: &mut Criterion) {
    c.bench_function("route_hour", |b| {
        let dir = std::path::Path::new("/data");
        b.iter(|| route(black_box(1_710_504_000_000), Frame::Hour, dir).unwrap())
    });
}

fn bench_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregation");

    for size in [100, 1_000, 10_000] {
        let points = create_test_points(size);
        group.throughput(Throughput::Elements(size as u64));

        for key in ["average", "median", "percentile_95"] {
            let agg = Aggregation::parse(key).unwrap();
            group.bench_function(format!("{key}_{size}"), |b| {
                b.iter(|| agg.apply(black_box(&points)))
            });
        }
    }

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for size in [100, 1_000] {
        let doc = json!({
            "device": "bench",
            "samples": (0..size).collect::<Vec<i64>>()
        });
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("encode_{size}"), |b| {
            b.iter(|| encode_document(black_box(&doc)).unwrap())
        });

        let text = encode_document(&doc).unwrap();
        group.bench_function(format!("decode_{size}"), |b| {
            b.iter(|| decode_document(black_box(&text)).unwrap())
        });
    }

    group.finish();
}

fn bench_engine(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("engine");

    group.bench_function("write_point", |b| {
        let dir = tempdir().unwrap();
        // A roomy ceiling so the loop measures buffering, not flushing
        let config = TsdbConfig::new(dir.path().join("data")).ram_ceiling_bytes(64 * 1024 * 1024);
        let engine = runtime.block_on(Tsdb::open(config)).unwrap();
        let mut ts = 1_710_504_000_000i64;

        b.iter(|| {
            ts += 1;
            runtime
                .block_on(engine.write_point("bench", 1.0, Some(ts)))
                .unwrap()
        });
    });

    group.bench_function("flush_1000", |b| {
        let dir = tempdir().unwrap();
        let config = TsdbConfig::new(dir.path().join("data")).ram_ceiling_bytes(64 * 1024 * 1024);
        let engine = runtime.block_on(Tsdb::open(config)).unwrap();

        b.iter(|| {
            runtime.block_on(async {
                for i in 0..1_000 {
                    engine
                        .write_point("bench", i as f64, Some(1_710_504_000_000 + i))
                        .await
                        .unwrap();
                }
                engine.flush().await.unwrap();
            })
        });
    });

    group.bench_function("query_day_average", |b| {
        let dir = tempdir().unwrap();
        let config = TsdbConfig::new(dir.path().join("data")).ram_ceiling_bytes(64 * 1024 * 1024);
        let engine = runtime.block_on(Tsdb::open(config)).unwrap();
        runtime.block_on(async {
            for i in 0..5_000i64 {
                engine
                    .write_point("bench", i as f64, Some(1_710_504_000_000 + i * 10_000))
                    .await
                    .unwrap();
            }
            engine.flush().await.unwrap();
        });

        let mut run = 0u32;
        b.iter(|| {
            // Vary the range so the query cache cannot short-circuit
            run += 1;
            runtime
                .block_on(engine.query(
                    1_710_460_800_000,
                    1_710_547_200_000 + i64::from(run),
                    "average",
                ))
                .unwrap()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_router,
    bench_aggregation,
    bench_codec,
    bench_engine
);
criterion_main!(benches);
