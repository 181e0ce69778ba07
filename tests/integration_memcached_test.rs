// tests/integration_memcached_test.rs

//! End-to-end tests for the memcached personality: a real `TcpListener`,
//! a real `tempfile`-backed SQLite store, and a raw client socket
//! speaking the wire protocol exactly as `telnet`/`libmemcached` would.

use ppdb::kv::KvFacade;
use ppdb::kv::backend::sqlite::SqliteBackend;
use ppdb::memcached::service::serve_connection;
use ppdb::memcached::stats::MemcachedStats;
use ppdb::mux::health::ConnectionRegistry;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn spawn_server() -> (std::net::SocketAddr, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("kv.db");
    let backend = SqliteBackend::open(db_path.to_str().unwrap()).await.unwrap();
    let facade = Arc::new(KvFacade::new(Arc::new(backend), 1024 * 1024));
    let stats = Arc::new(MemcachedStats::default());
    let registry = Arc::new(ConnectionRegistry::new());
    let version: Arc<str> = Arc::from("test");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let facade = facade.clone();
            let stats = stats.clone();
            let version = version.clone();
            let registry = registry.clone();
            tokio::spawn(async move {
                serve_connection(stream, facade, stats, version, registry).await;
            });
        }
    });

    (addr, dir)
}

async fn roundtrip(stream: &mut TcpStream, request: &str) -> String {
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut buf = vec![0u8; 4096];
    let n = tokio::time::timeout(std::time::Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("response timed out")
        .unwrap();
    String::from_utf8_lossy(&buf[..n]).to_string()
}

#[tokio::test]
async fn set_then_get_roundtrips_the_value() {
    let (addr, _dir) = spawn_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let resp = roundtrip(&mut stream, "set greeting 0 0 5\r\nhello\r\n").await;
    assert_eq!(resp, "STORED\r\n");

    let resp = roundtrip(&mut stream, "get greeting\r\n").await;
    assert_eq!(resp, "VALUE greeting 0 5\r\nhello\r\nEND\r\n");
}

#[tokio::test]
async fn get_on_missing_key_returns_end_only() {
    let (addr, _dir) = spawn_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let resp = roundtrip(&mut stream, "get nosuchkey\r\n").await;
    assert_eq!(resp, "END\r\n");
}

#[tokio::test]
async fn add_fails_once_key_exists() {
    let (addr, _dir) = spawn_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let resp = roundtrip(&mut stream, "add k 0 0 1\r\nx\r\n").await;
    assert_eq!(resp, "STORED\r\n");

    let resp = roundtrip(&mut stream, "add k 0 0 1\r\ny\r\n").await;
    assert_eq!(resp, "NOT_STORED\r\n");
}

#[tokio::test]
async fn incr_and_decr_update_numeric_values() {
    let (addr, _dir) = spawn_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    roundtrip(&mut stream, "set counter 0 0 1\r\n5\r\n").await;
    let resp = roundtrip(&mut stream, "incr counter 3\r\n").await;
    assert_eq!(resp, "8\r\n");

    let resp = roundtrip(&mut stream, "decr counter 10\r\n").await;
    assert_eq!(resp, "0\r\n");
}

#[tokio::test]
async fn delete_removes_the_key() {
    let (addr, _dir) = spawn_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    roundtrip(&mut stream, "set gone 0 0 1\r\nx\r\n").await;
    let resp = roundtrip(&mut stream, "delete gone\r\n").await;
    assert_eq!(resp, "DELETED\r\n");

    let resp = roundtrip(&mut stream, "get gone\r\n").await;
    assert_eq!(resp, "END\r\n");
}

#[tokio::test]
async fn quit_closes_the_connection() {
    let (addr, _dir) = spawn_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream.write_all(b"quit\r\n").await.unwrap();
    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "server should close the socket after quit");
}

#[tokio::test]
async fn invalid_command_line_yields_an_error_reply() {
    let (addr, _dir) = spawn_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let resp = roundtrip(&mut stream, "bogus_command\r\n").await;
    assert!(resp.starts_with("ERROR"));
}
