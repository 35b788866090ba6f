//! Microbenchmarks for the index structures behind the keyspace and
//! sorted sets.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use emberkv::hashtable::{str_hash, HMap};
use emberkv::zset::ZSet;

fn bench_hmap(c: &mut Criterion) {
    let mut group = c.benchmark_group("hmap");
    group.throughput(Throughput::Elements(1));

    group.bench_function("insert", |b| {
        let mut map: HMap<Vec<u8>> = HMap::new();
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{i}").into_bytes();
            map.insert(str_hash(&key), key);
            i += 1;
        });
    });

    group.bench_function("get_existing", |b| {
        let mut map: HMap<Vec<u8>> = HMap::new();
        for i in 0..100_000u64 {
            let key = format!("key:{i}").into_bytes();
            map.insert(str_hash(&key), key);
        }
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000).into_bytes();
            black_box(map.get(str_hash(&key), |k| k == &key));
            i += 1;
        });
    });

    group.finish();
}

fn bench_zset(c: &mut Criterion) {
    let mut group = c.benchmark_group("zset");
    group.throughput(Throughput::Elements(1));

    group.bench_function("insert", |b| {
        let mut zset = ZSet::new();
        let mut i = 0u64;
        b.iter(|| {
            let name = format!("member:{i}");
            zset.insert(name.as_bytes(), (i % 1000) as f64);
            i += 1;
        });
    });

    group.bench_function("seek_and_walk_16", |b| {
        let mut zset = ZSet::new();
        for i in 0..100_000u64 {
            let name = format!("member:{i}");
            zset.insert(name.as_bytes(), (i % 1000) as f64);
        }
        let mut i = 0u64;
        b.iter(|| {
            let mut node = zset.seek_ge((i % 1000) as f64, b"");
            for _ in 0..16 {
                let Some(id) = node else { break };
                black_box(zset.member(id));
                node = zset.offset(id, 1);
            }
            i += 1;
        });
    });

    group.finish();
}

criterion_group!(benches, bench_hmap, bench_zset);
criterion_main!(benches);
