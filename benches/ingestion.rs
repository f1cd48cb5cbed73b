//! Ingestion and query benchmarks.
//!
//! Every ingested sample fans out into seven upserts, so ingestion cost is
//! dominated by partition lookup and row-key comparison.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rollup_lib::core::{AggregationKind, Dimensions, Granularity, MetricSample};
use rollup_lib::storage::{BucketCalculator, SampleGenerator};
use rollup_lib::{Config, Warehouse};

fn bench_bucket_fan_out(c: &mut Criterion) {
    let calculator = BucketCalculator::with_offset_minutes(-300).unwrap();
    let ts = Utc.with_ymd_and_hms(2025, 6, 18, 15, 30, 12).unwrap();

    c.bench_function("bucket_fan_out", |b| {
        b.iter(|| black_box(calculator.fan_out(black_box(ts))));
    });
}

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");
    let start = Utc.with_ymd_and_hms(2025, 6, 18, 0, 0, 0).unwrap();

    for batch in [100usize, 1_000] {
        let samples = SampleGenerator::new().batch(batch, start);
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::new("generated", batch), &samples, |b, samples| {
            let warehouse = Warehouse::new(Config::default()).unwrap();
            b.iter(|| {
                for sample in samples {
                    let _ = warehouse.ingest(black_box(sample.clone()));
                }
            });
        });
    }

    group.bench_function("hot_row", |b| {
        let warehouse = Warehouse::new(Config::default()).unwrap();
        let sample = MetricSample::new("revenue", 1.0, start, AggregationKind::Sum)
            .with_dimension("region", "US");
        b.iter(|| warehouse.ingest(black_box(sample.clone())));
    });

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let warehouse = Warehouse::new(Config::default()).unwrap();
    let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    for minute in 0..20_000 {
        let ts = start + ChronoDuration::minutes(minute * 13);
        let region = if minute % 2 == 0 { "US" } else { "EU" };
        let _ = warehouse.ingest(
            MetricSample::new("revenue", 1.0, ts, AggregationKind::Sum).with_dimension("region", region),
        );
    }
    let end = start + ChronoDuration::days(30);
    let filter = Dimensions::new().with("region", "US");

    let mut group = c.benchmark_group("query");
    group.bench_function("hour_range", |b| {
        b.iter(|| warehouse.query("revenue", Granularity::Hour, start, end, None));
    });
    group.bench_function("hour_range_filtered", |b| {
        b.iter(|| warehouse.query("revenue", Granularity::Hour, start, end, Some(&filter)));
    });
    group.finish();
}

criterion_group!(benches, bench_bucket_fan_out, bench_ingest, bench_query);
criterion_main!(benches);
