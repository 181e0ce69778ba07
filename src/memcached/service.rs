// src/memcached/service.rs

//! The memcached personality's per-connection loop (C6 driving C3),
//! following a read → scan → parse → execute → write shape.

use crate::core::PpdbError;
use crate::kv::KvFacade;
use crate::memcached::codec::MemcachedCodec;
use crate::memcached::commands;
use crate::memcached::stats::MemcachedStats;
use crate::mux::health::ConnectionRegistry;
use crate::mux::listener::SOCKET_IO_DEADLINE;
use crate::mux::ConnectionHandle;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

const WRITE_RETRY_ATTEMPTS: u32 = 3;
const WRITE_RETRY_BACKOFF: std::time::Duration = std::time::Duration::from_millis(10);

/// Drives one accepted connection until `quit`, a fatal protocol error,
/// or repeated I/O failure.
pub async fn serve_connection(
    stream: TcpStream,
    facade: Arc<KvFacade>,
    stats: Arc<MemcachedStats>,
    version: Arc<str>,
    registry: Arc<ConnectionRegistry>,
) {
    let peer_addr = stream
        .peer_addr()
        .unwrap_or_else(|_| ([0, 0, 0, 0], 0).into());
    let handle = Arc::new(ConnectionHandle::new(peer_addr));
    handle.touch();
    let key = registry.insert(handle.clone());

    let mut framed = Framed::new(stream, MemcachedCodec);

    loop {
        if handle.is_closing() {
            break;
        }
        let frame = match tokio::time::timeout(SOCKET_IO_DEADLINE, framed.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                warn!(%peer_addr, "protocol error: {e}");
                handle.record_command(true);
                let (response, should_close) = protocol_error_response(&e);
                if !write_with_retries(&mut framed, response).await || should_close {
                    handle.mark_closing();
                    break;
                }
                continue;
            }
            Ok(None) => {
                debug!(%peer_addr, "peer closed connection");
                break;
            }
            Err(_) => {
                debug!(%peer_addr, "connection idle past socket deadline");
                break;
            }
        };

        handle.touch();
        let outcome = commands::execute(frame, &facade, &stats, &version).await;
        handle.record_command(false);

        if !outcome.response.is_empty() && !write_with_retries(&mut framed, outcome.response).await
        {
            handle.mark_closing();
            break;
        }
        if outcome.should_close {
            handle.mark_closing();
            break;
        }
    }

    handle.mark_closing();
    registry.remove(key);
    let final_stats = handle.stats();
    info!(
        %peer_addr,
        lifetime_ms = final_stats.lifetime.as_millis() as u64,
        total_commands = final_stats.total_commands,
        failed_commands = final_stats.failed_commands,
        "connection closed"
    );
}

/// Maps a framing error to the wire response it gets and whether the
/// connection closes afterward. Oversized payloads are fatal; malformed
/// command lines get a `CLIENT_ERROR` and the connection stays open.
fn protocol_error_response(e: &PpdbError) -> (Bytes, bool) {
    match e {
        PpdbError::TooLarge => (
            Bytes::from_static(b"SERVER_ERROR object too large for cache\r\n"),
            true,
        ),
        PpdbError::InvalidData(msg) => (Bytes::from(format!("CLIENT_ERROR {msg}\r\n")), false),
        other => (Bytes::from(format!("SERVER_ERROR {other}\r\n")), true),
    }
}

/// Retries a partial write up to three times with a 10ms backoff.
async fn write_with_retries(
    framed: &mut Framed<TcpStream, MemcachedCodec>,
    response: Bytes,
) -> bool {
    for attempt in 0..WRITE_RETRY_ATTEMPTS {
        match framed.send(response.clone()).await {
            Ok(()) => return true,
            Err(e) if attempt + 1 < WRITE_RETRY_ATTEMPTS => {
                warn!("write attempt {attempt} failed: {e}; retrying");
                tokio::time::sleep(WRITE_RETRY_BACKOFF).await;
            }
            Err(e) => {
                warn!("write failed after {WRITE_RETRY_ATTEMPTS} attempts: {e}");
                return false;
            }
        }
    }
    false
}
