// src/forwarder/service.rs

//! The two-way byte-copy loop (C7), driven by one task per direction
//! over a `tokio::io::split` pair.

use crate::core::metrics;
use crate::forwarder::rules::ForwardRule;
use crate::mux::listener::tune_accepted_socket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::{debug, warn};

const COPY_BUFFER_SIZE: usize = 16 * 1024;
const WRITE_RETRY_ATTEMPTS: u32 = 3;
const WRITE_RETRY_BACKOFF: std::time::Duration = std::time::Duration::from_millis(10);

/// Accepts one client connection for `rule`, dials the upstream, and
/// runs both copy directions until they both fail or the peer closes.
pub async fn handle_connection(client: TcpStream, rule: ForwardRule) {
    if let Err(e) = tune_accepted_socket(&client) {
        warn!("forwarder: failed to tune client socket: {e}");
    }

    let upstream_addr = format!("{}:{}", rule.dst_addr, rule.dst_port);
    let upstream = match TcpStream::connect(&upstream_addr).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("forwarder: failed to connect to upstream {upstream_addr}: {e}");
            return;
        }
    };
    if let Err(e) = tune_accepted_socket(&upstream) {
        warn!("forwarder: failed to tune upstream socket: {e}");
    }

    let (client_read, client_write) = tokio::io::split(client);
    let (upstream_read, upstream_write) = tokio::io::split(upstream);

    let client_failed = Arc::new(AtomicBool::new(false));
    let upstream_failed = Arc::new(AtomicBool::new(false));
    let notify = Arc::new(Notify::new());

    let forward_task = tokio::spawn(copy_direction(
        "client->upstream",
        client_read,
        upstream_write,
        client_failed.clone(),
        upstream_failed.clone(),
        notify.clone(),
    ));
    let reverse_task = tokio::spawn(copy_direction(
        "upstream->client",
        upstream_read,
        client_write,
        upstream_failed,
        client_failed,
        notify,
    ));

    let _ = tokio::join!(forward_task, reverse_task);
}

/// Copies from `read_half` to `write_half` until EOF or a terminal
/// error, then marks `own_failed` and wakes the opposite direction.
/// Does not act on `peer_failed` directly — the first failing
/// direction never force-closes the other; draining in-flight data is
/// allowed to continue until the peer direction fails on its own.
async fn copy_direction<R, W>(
    label: &'static str,
    mut read_half: R,
    mut write_half: W,
    own_failed: Arc<AtomicBool>,
    peer_failed: Arc<AtomicBool>,
    notify: Arc<Notify>,
) where
    R: AsyncReadExt + Unpin,
    W: AsyncWriteExt + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        // `notified()` is always registered as a branch, not gated behind
        // `peer_failed`: gating it meant a wakeup delivered while this
        // direction was blocked in `read_half.read` and not yet
        // subscribed would be lost, so this direction would only learn
        // the peer died once its own read independently returned.
        let read_result = tokio::select! {
            biased;
            _ = notify.notified() => {
                if peer_failed.load(Ordering::SeqCst) {
                    debug!("forwarder[{label}]: peer direction failed, ending");
                    break;
                }
                continue;
            }
            res = read_half.read(&mut buf) => res,
        };

        let n = match read_result {
            Ok(0) => {
                debug!("forwarder[{label}]: EOF");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("forwarder[{label}]: read error: {e}");
                break;
            }
        };

        metrics::FORWARDER_BYTES_TOTAL.with_label_values(&[label]).inc_by(n as f64);

        if !write_with_retries(&mut write_half, &buf[..n]).await {
            break;
        }
    }

    own_failed.store(true, Ordering::SeqCst);
    notify.notify_waiters();
}

async fn write_with_retries<W: AsyncWriteExt + Unpin>(write_half: &mut W, data: &[u8]) -> bool {
    for attempt in 0..WRITE_RETRY_ATTEMPTS {
        match write_half.write_all(data).await {
            Ok(()) => return true,
            Err(e) if attempt + 1 < WRITE_RETRY_ATTEMPTS => {
                warn!("forwarder: write attempt {attempt} failed: {e}; retrying");
                tokio::time::sleep(WRITE_RETRY_BACKOFF).await;
            }
            Err(e) => {
                warn!("forwarder: write failed after {WRITE_RETRY_ATTEMPTS} attempts: {e}");
                return false;
            }
        }
    }
    false
}
