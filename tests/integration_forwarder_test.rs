// tests/integration_forwarder_test.rs

//! End-to-end test for the forwarder personality (C7): a real echo
//! upstream, a real forwarding rule, and a raw client socket, matching
//! the `127.0.0.1 20001 127.0.0.1 20002` scenario.

use ppdb::forwarder::rules::ForwardRule;
use ppdb::forwarder::service::handle_connection;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A minimal echo server: every byte read is written straight back.
async fn spawn_echo_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
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
    addr
}

async fn spawn_forwarder(upstream: std::net::SocketAddr) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let forwarder_addr = listener.local_addr().unwrap();
    let rule = ForwardRule {
        src_addr: "127.0.0.1".to_string(),
        src_port: forwarder_addr.port(),
        dst_addr: upstream.ip().to_string(),
        dst_port: upstream.port(),
    };

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let rule = rule.clone();
            tokio::spawn(async move {
                handle_connection(stream, rule).await;
            });
        }
    });
    forwarder_addr
}

#[tokio::test]
async fn forwards_bytes_to_the_upstream_and_back() {
    let upstream = spawn_echo_server().await;
    let forwarder_addr = spawn_forwarder(upstream).await;

    let mut client = TcpStream::connect(forwarder_addr).await.unwrap();
    client.write_all(b"hello through the tunnel").await.unwrap();

    let mut buf = vec![0u8; 64];
    let n = tokio::time::timeout(std::time::Duration::from_secs(2), client.read(&mut buf))
        .await
        .expect("echo timed out")
        .unwrap();
    assert_eq!(&buf[..n], b"hello through the tunnel");
}

#[tokio::test]
async fn multiple_messages_survive_the_same_connection() {
    let upstream = spawn_echo_server().await;
    let forwarder_addr = spawn_forwarder(upstream).await;

    let mut client = TcpStream::connect(forwarder_addr).await.unwrap();
    for i in 0..5 {
        let msg = format!("message-{i}");
        client.write_all(msg.as_bytes()).await.unwrap();

        let mut buf = vec![0u8; 64];
        let n = tokio::time::timeout(std::time::Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("echo timed out")
            .unwrap();
        assert_eq!(&buf[..n], msg.as_bytes());
    }
}

#[tokio::test]
async fn closing_the_client_does_not_hang_the_forwarder() {
    let upstream = spawn_echo_server().await;
    let forwarder_addr = spawn_forwarder(upstream).await;

    let client = TcpStream::connect(forwarder_addr).await.unwrap();
    drop(client);

    // A second connection through the same rule must still work, proving
    // the forwarder did not wedge on the first connection's teardown.
    let mut client2 = TcpStream::connect(forwarder_addr).await.unwrap();
    client2.write_all(b"still alive").await.unwrap();
    let mut buf = vec![0u8; 64];
    let n = tokio::time::timeout(std::time::Duration::from_secs(2), client2.read(&mut buf))
        .await
        .expect("echo timed out")
        .unwrap();
    assert_eq!(&buf[..n], b"still alive");
}
