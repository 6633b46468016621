use cachesim::{Cache, CommonParams, Request};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Deterministic skewed trace: 70% of requests over a hot tenth of the id
/// universe, sizes varying with the id.
fn synthetic_trace(len: usize, universe: u64, seed: u64) -> Vec<Request> {
    let mut rng = fastrand::Rng::with_seed(seed);
    (0..len)
        .map(|t| {
            let obj_id = if rng.u32(..100) < 70 {
                rng.u64(..universe / 10)
            } else {
                rng.u64(..universe)
            };
            Request::new(obj_id, 1 + obj_id % 7, t as u64)
        })
        .collect()
}

fn bench_get_hot_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_hot_path");
    let trace = synthetic_trace(20_000, 2_000, 42);

    for (policy, params) in [
        ("fifo", ""),
        ("lru", ""),
        ("gdsf", ""),
        ("s3fifo", ""),
        ("3l-cache", "sample_rate=8"),
    ] {
        group.bench_with_input(BenchmarkId::new(policy, trace.len()), &trace, |b, trace| {
            b.iter(|| {
                let mut cache = Cache::init(policy, CommonParams::new(2_000), params).unwrap();
                let mut hits = 0u64;
                for req in trace {
                    if cache.get(black_box(req)) {
                        hits += 1;
                    }
                }
                black_box(hits)
            });
        });
    }

    group.finish();
}

fn bench_capacity_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("s3fifo_capacity_scaling");
    let trace = synthetic_trace(20_000, 4_000, 7);

    for capacity in [500u64, 2_000, 8_000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                b.iter(|| {
                    let mut cache =
                        Cache::init("s3fifo", CommonParams::new(capacity), "").unwrap();
                    for req in &trace {
                        cache.get(black_box(req));
                    }
                    black_box(cache.occupied_bytes())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_get_hot_path, bench_capacity_scaling);
criterion_main!(benches);
