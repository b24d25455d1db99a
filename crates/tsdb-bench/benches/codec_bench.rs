//! Codec benchmarks: timestamp delta-of-delta, value XOR/Gorilla, and the
//! adaptive class selector over the sample shapes from spec §8 S4.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tsdb_codec::{AdaptiveCodec, TimestampCodec, ValueCodec};

fn counter_series(n: usize) -> Vec<f64> {
    (0..n).map(|i| 100.0 + i as f64).collect()
}

fn constant_series(n: usize) -> Vec<f64> {
    vec![42.0; n]
}

fn gauge_series(n: usize) -> Vec<f64> {
    // Deterministic stand-in for gaussian noise: no RNG dependency needed
    // to exercise the gauge sub-codec's non-monotonic, bounded-delta path.
    (0..n).map(|i| 100.0 + ((i % 17) as f64 - 8.0) * 2.5).collect()
}

fn regular_timestamps(n: usize) -> Vec<i64> {
    (0..n as i64).map(|i| 1_000 + i * 1000).collect()
}

fn bench_timestamp_roundtrip(c: &mut Criterion) {
    let sizes: &[usize] = &[64, 512, 4096];
    let mut group = c.benchmark_group("timestamp_codec");
    let codec = TimestampCodec::default();

    for &size in sizes {
        let timestamps = regular_timestamps(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &size, |b, _| {
            b.iter(|| black_box(codec.encode(&timestamps)));
        });

        let encoded = codec.encode(&timestamps);
        group.bench_with_input(BenchmarkId::new("decode", size), &size, |b, _| {
            b.iter(|| black_box(codec.decode(&encoded).unwrap()));
        });
    }
    group.finish();
}

fn bench_value_roundtrip(c: &mut Criterion) {
    let sizes: &[usize] = &[64, 512, 4096];
    let mut group = c.benchmark_group("value_codec");
    let codec = ValueCodec::new();

    for &size in sizes {
        let values = gauge_series(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &size, |b, _| {
            b.iter(|| black_box(codec.encode(&values)));
        });

        let encoded = codec.encode(&values);
        group.bench_with_input(BenchmarkId::new("decode", size), &size, |b, _| {
            b.iter(|| black_box(codec.decode(&encoded).unwrap()));
        });
    }
    group.finish();
}

fn bench_adaptive_classify_and_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("adaptive_codec");
    let codec = AdaptiveCodec::default();
    let shapes: &[(&str, fn(usize) -> Vec<f64>)] =
        &[("counter", counter_series), ("constant", constant_series), ("gauge", gauge_series)];

    for &(name, shape) in shapes {
        let values = shape(512);
        group.bench_function(BenchmarkId::new("classify", name), |b| {
            b.iter(|| black_box(codec.classify(&values)));
        });
        group.bench_function(BenchmarkId::new("encode", name), |b| {
            b.iter(|| black_box(codec.encode(&values)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_timestamp_roundtrip, bench_value_roundtrip, bench_adaptive_classify_and_encode);
criterion_main!(benches);
