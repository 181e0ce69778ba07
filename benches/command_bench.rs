// benches/command_bench.rs

//! Command execution benchmarks.
//!
//! Measures the KV facade's per-operation cost directly against the
//! SQLite backend, bypassing the network stack entirely.

use criterion::{criterion_group, criterion_main, Criterion};
use ppdb::kv::backend::sqlite::SqliteBackend;
use ppdb::kv::KvFacade;
use std::sync::Arc;
use tokio::runtime::Runtime;

async fn new_facade(dir: &tempfile::TempDir) -> KvFacade {
    let db_path = dir.path().join("bench.db");
    let backend = SqliteBackend::open(db_path.to_str().unwrap()).await.unwrap();
    KvFacade::new(Arc::new(backend), 1024 * 1024)
}

fn bench_set(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let facade = rt.block_on(new_facade(&dir));

    c.bench_function("kv_facade_set", |b| {
        b.iter(|| {
            rt.block_on(facade.set("bench_key", b"bench_value".to_vec(), 0, 0))
                .unwrap();
        });
    });
}

fn bench_get(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let facade = rt.block_on(new_facade(&dir));
    rt.block_on(facade.set("bench_key", b"bench_value".to_vec(), 0, 0))
        .unwrap();

    c.bench_function("kv_facade_get", |b| {
        b.iter(|| {
            rt.block_on(facade.get("bench_key")).unwrap();
        });
    });
}

fn bench_incr(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let facade = rt.block_on(new_facade(&dir));
    rt.block_on(facade.set("counter", b"0".to_vec(), 0, 0))
        .unwrap();

    c.bench_function("kv_facade_incr", |b| {
        b.iter(|| {
            rt.block_on(facade.incr("counter", 1)).unwrap();
        });
    });
}

fn bench_append(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let facade = rt.block_on(new_facade(&dir));
    rt.block_on(facade.set("growing", b"x".to_vec(), 0, 0))
        .unwrap();

    c.bench_function("kv_facade_append", |b| {
        b.iter(|| {
            rt.block_on(facade.append("growing", b"y")).unwrap();
        });
    });
}

criterion_group!(benches, bench_set, bench_get, bench_incr, bench_append);
criterion_main!(benches);
