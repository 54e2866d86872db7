//! Response cache benchmarks.
//!
//! Measures get/set throughput on a warm cache and reads under contention
//! from several threads.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sluice_cache::{CacheConfig, ResponseCache};
use sluice_types::Fingerprint;
use std::sync::Arc;

fn warm_cache(entries: usize) -> ResponseCache<Vec<u8>> {
    let cache = ResponseCache::new(CacheConfig {
        max_entries: entries,
        high_water: entries,
        ..Default::default()
    })
    .unwrap();

    for i in 0..entries {
        let key = Fingerprint::request("GET", &format!("/products/{i}"));
        cache.set(&key, vec![0u8; 256], None);
    }
    cache
}

/// Benchmark reads of fresh entries
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_get");

    for entries in [100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(1));

        group.bench_with_input(BenchmarkId::new("hit", entries), entries, |b, &entries| {
            let cache = warm_cache(entries);
            let key = Fingerprint::request("GET", &format!("/products/{}", entries / 2));

            b.iter(|| black_box(cache.get(&key)));
        });

        group.bench_with_input(BenchmarkId::new("miss", entries), entries, |b, &entries| {
            let cache = warm_cache(entries);
            let key = Fingerprint::request("GET", "/absent");

            b.iter(|| black_box(cache.get(&key)));
        });
    }

    group.finish();
}

/// Benchmark writes at the size ceiling, each forcing an eviction
fn bench_set_at_ceiling(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("evicting", |b| {
        let cache = warm_cache(1_000);
        let mut i = 1_000usize;

        b.iter(|| {
            i += 1;
            let key = Fingerprint::request("GET", &format!("/products/{i}"));
            black_box(cache.set(&key, vec![0u8; 256], None))
        });
    });

    group.finish();
}

/// Benchmark reads from several threads sharing one cache
fn bench_contended_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_contended_get");

    for threads in [2, 4, 8].iter() {
        group.throughput(Throughput::Elements(*threads as u64 * 1_000));

        group.bench_with_input(BenchmarkId::new("threads", threads), threads, |b, &threads| {
            let cache = Arc::new(warm_cache(1_000));

            b.iter(|| {
                std::thread::scope(|s| {
                    for t in 0..threads {
                        let cache = Arc::clone(&cache);
                        s.spawn(move || {
                            for i in 0..1_000 {
                                let key = Fingerprint::request(
                                    "GET",
                                    &format!("/products/{}", (i * 7 + t) % 1_000),
                                );
                                black_box(cache.get(&key));
                            }
                        });
                    }
                });
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_get, bench_set_at_ceiling, bench_contended_get);
criterion_main!(benches);
