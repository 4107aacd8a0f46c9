use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use evacmap::EvacMap;
use std::time::Duration;

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

fn key(n: u64) -> String {
    format!("k{:016x}", n)
}

fn filled(seed: u64, n: usize) -> (EvacMap<String, u64>, Vec<String>) {
    let mut m = EvacMap::new();
    let keys: Vec<_> = lcg(seed).take(n).map(key).collect();
    for (i, k) in keys.iter().enumerate() {
        m.insert(k.clone(), i as u64);
    }
    (m, keys)
}

fn bench_insert(c: &mut Criterion) {
    c.bench_function("evac_map_insert_10k", |b| {
        b.iter_batched(
            || lcg(1).take(10_000).map(key).collect::<Vec<_>>(),
            |keys| {
                let mut m = EvacMap::new();
                for (i, k) in keys.into_iter().enumerate() {
                    m.insert(k, i as u64);
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_insert_presized(c: &mut Criterion) {
    c.bench_function("evac_map_insert_10k_presized", |b| {
        b.iter_batched(
            || lcg(1).take(10_000).map(key).collect::<Vec<_>>(),
            |keys| {
                let mut m = EvacMap::with_capacity(keys.len());
                for (i, k) in keys.into_iter().enumerate() {
                    m.insert(k, i as u64);
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_get_hit(c: &mut Criterion) {
    c.bench_function("evac_map_get_hit", |b| {
        let (m, keys) = filled(7, 20_000);
        let mut it = keys.iter().cycle();
        b.iter(|| {
            let k = it.next().unwrap();
            black_box(m.get(k.as_str()));
        })
    });
}

fn bench_get_miss(c: &mut Criterion) {
    c.bench_function("evac_map_get_miss", |b| {
        let (m, _) = filled(11, 10_000);
        let mut miss = lcg(0xdead_beef);
        b.iter(|| {
            // generate keys unlikely in map
            let k = key(miss.next().unwrap());
            black_box(m.get(k.as_str()));
        })
    });
}

fn bench_churn(c: &mut Criterion) {
    c.bench_function("evac_map_delete_insert_churn", |b| {
        let (mut m, keys) = filled(13, 10_000);
        let mut fresh = lcg(0x5eed).map(key);
        let mut old = keys.into_iter().cycle();
        b.iter(|| {
            // Delete one live key and insert a new one so len stays put.
            let k = old.next().unwrap();
            m.delete(k.as_str());
            let n = fresh.next().unwrap();
            m.insert(n.clone(), 0);
            m.delete(n.as_str());
            m.insert(k, 1);
        })
    });
}

fn bench_iterate(c: &mut Criterion) {
    c.bench_function("evac_map_iterate_10k", |b| {
        let (m, _) = filled(17, 10_000);
        b.iter(|| {
            let mut sum = 0u64;
            for (_, v) in &m {
                sum = sum.wrapping_add(*v);
            }
            black_box(sum)
        })
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(8))
        .warm_up_time(Duration::from_secs(2))
}

criterion_group! {
    name = benches;
    config = bench_config();
    targets = bench_insert, bench_insert_presized, bench_get_hit, bench_get_miss,
        bench_churn, bench_iterate
}
criterion_main!(benches);
