// benches/concurrent_bench.rs

//! Concurrency benchmarks: many simultaneous clients hammering the
//! memcached personality and the forwarder personality at once.

use criterion::{criterion_group, criterion_main, Criterion};
use ppdb::forwarder::rules::ForwardRule;
use ppdb::forwarder::service::handle_connection;
use ppdb::kv::backend::sqlite::SqliteBackend;
use ppdb::kv::KvFacade;
use ppdb::memcached::service::serve_connection;
use ppdb::memcached::stats::MemcachedStats;
use ppdb::mux::health::ConnectionRegistry;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;

const CONCURRENCY: usize = 32;

async fn spawn_memcached_server(dir: &tempfile::TempDir) -> std::net::SocketAddr {
    let db_path = dir.path().join("bench.db");
    let backend = SqliteBackend::open(db_path.to_str().unwrap()).await.unwrap();
    let facade = Arc::new(KvFacade::new(Arc::new(backend), 1024 * 1024));
    let stats = Arc::new(MemcachedStats::default());
    let registry = Arc::new(ConnectionRegistry::new());
    let version: Arc<str> = Arc::from("bench");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            let facade = facade.clone();
            let stats = stats.clone();
            let version = version.clone();
            let registry = registry.clone();
            tokio::spawn(
                async move { serve_connection(stream, facade, stats, version, registry).await },
            );
        }
    });
    addr
}

async fn one_memcached_roundtrip(addr: std::net::SocketAddr, i: usize) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let key = format!("k{i}");
    let req = format!("set {key} 0 0 5\r\nhello\r\n");
    stream.write_all(req.as_bytes()).await.unwrap();
    let mut buf = [0u8; 64];
    let _ = stream.read(&mut buf).await.unwrap();
}

fn bench_concurrent_memcached_sets(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let addr = rt.block_on(spawn_memcached_server(&dir));

    c.bench_function("concurrent_memcached_sets", |b| {
        b.iter(|| {
            rt.block_on(async {
                let tasks: Vec<_> = (0..CONCURRENCY)
                    .map(|i| tokio::spawn(one_memcached_roundtrip(addr, i)))
                    .collect();
                for t in tasks {
                    t.await.unwrap();
                }
            });
        });
    });
}

async fn spawn_forwarder_pair() -> std::net::SocketAddr {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = upstream.accept().await else { break };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1024];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let forwarder_addr = listener.local_addr().unwrap();
    let rule = ForwardRule {
        src_addr: "127.0.0.1".to_string(),
        src_port: forwarder_addr.port(),
        dst_addr: upstream_addr.ip().to_string(),
        dst_port: upstream_addr.port(),
    };
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            let rule = rule.clone();
            tokio::spawn(async move { handle_connection(stream, rule).await });
        }
    });
    forwarder_addr
}

async fn one_forwarder_roundtrip(addr: std::net::SocketAddr) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 16];
    let _ = stream.read(&mut buf).await.unwrap();
}

fn bench_concurrent_forwarder_connections(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let addr = rt.block_on(spawn_forwarder_pair());

    c.bench_function("concurrent_forwarder_connections", |b| {
        b.iter(|| {
            rt.block_on(async {
                let tasks: Vec<_> = (0..CONCURRENCY)
                    .map(|_| tokio::spawn(one_forwarder_roundtrip(addr)))
                    .collect();
                for t in tasks {
                    t.await.unwrap();
                }
            });
        });
    });
}

criterion_group!(
    benches,
    bench_concurrent_memcached_sets,
    bench_concurrent_forwarder_connections
);
criterion_main!(benches);
