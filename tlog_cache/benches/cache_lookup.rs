//! Lookup throughput for the watermark fast path vs. an LRU hit.

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use tlog_cache::cache::IdCache;
use tlog_common::eid::Eid;

fn bench_watermark_fast_path(c: &mut Criterion) {
    let mut cache = IdCache::new(1024);
    cache.store(Eid(1), tlog_common::eid::TargetEid(100));

    c.bench_function("lookup_unseen_entity_index", |b| {
        b.iter(|| black_box(cache.lookup(Eid(1_000_000))));
    });
}

fn bench_lru_hit(c: &mut Criterion) {
    let mut cache = IdCache::new(1024);
    for i in 0..512 {
        cache.store(Eid(i), tlog_common::eid::TargetEid(i + 1_000_000));
    }

    c.bench_function("lookup_recently_stored_entity", |b| {
        b.iter(|| black_box(cache.lookup(Eid(511))));
    });
}

criterion_group!(benches, bench_watermark_fast_path, bench_lru_hit);
criterion_main!(benches);
