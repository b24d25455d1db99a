//! Inverted index benchmarks: insertion and posting-list intersection at
//! the scale exercised by spec §8 S5 (10,000 series, two-label query).

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use tsdb_core::{LabelMatcher, LabelSet, SeriesId};
use tsdb_index::ShardedIndex;

const NUM_SERIES: usize = 10_000;
const NUM_SHARDS: usize = 8;

fn populated_index() -> ShardedIndex {
    let index = ShardedIndex::new(NUM_SHARDS);
    for i in 0..NUM_SERIES {
        let job = format!("j{}", i % 10);
        let env = if i % 2 == 0 { "prod" } else { "stage" };
        let labels = LabelSet::from_pairs([("__name__", "requests"), ("job", job.as_str()), ("env", env)]).unwrap();
        index.add(SeriesId(i as u64 + 1), labels);
    }
    index
}

fn bench_add(c: &mut Criterion) {
    c.bench_function("sharded_index_add_10k", |b| {
        b.iter(|| {
            let index = ShardedIndex::new(NUM_SHARDS);
            for i in 0..NUM_SERIES {
                let job = format!("j{}", i % 10);
                let labels =
                    LabelSet::from_pairs([("__name__", "requests"), ("job", job.as_str())]).unwrap();
                index.add(SeriesId(i as u64 + 1), labels);
            }
            black_box(&index);
        });
    });
}

fn bench_two_label_intersection(c: &mut Criterion) {
    let index = populated_index();
    let matchers = [LabelMatcher::equal("job", "j3"), LabelMatcher::equal("env", "prod")];

    c.bench_function("sharded_index_find_job_env_10k", |b| {
        b.iter(|| black_box(index.find(&matchers)));
    });
}

fn bench_metric_name_scan(c: &mut Criterion) {
    let index = populated_index();
    let matchers = [LabelMatcher::equal("__name__", "requests")];

    c.bench_function("sharded_index_find_by_metric_name_10k", |b| {
        b.iter(|| black_box(index.find(&matchers)));
    });
}

criterion_group!(benches, bench_add, bench_two_label_intersection, bench_metric_name_scan);
criterion_main!(benches);
