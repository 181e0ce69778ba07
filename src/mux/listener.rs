// src/mux/listener.rs

//! Accept-loop helpers shared by every personality (C1).
//!
//! `tokio`'s reactor already supplies the readiness multiplexing a
//! hand-rolled `poll(2)` loop would otherwise need; what remains is the
//! TCP tuning step of the accept protocol, applied to every freshly
//! accepted socket via `socket2`.

use socket2::{SockRef, TcpKeepalive};
use std::time::Duration;
use tokio::net::TcpStream;

/// 64 KiB send/receive buffers, Nagle disabled, keep-alive enabled with
/// idle/interval/probe where the platform supports it
pub fn tune_accepted_socket(stream: &TcpStream) -> std::io::Result<()> {
    let sock_ref = SockRef::from(stream);
    sock_ref.set_nodelay(true)?;

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(10));
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let keepalive = keepalive.with_retries(5);
    sock_ref.set_tcp_keepalive(&keepalive)?;

    const TUNED_BUFFER_SIZE: usize = 64 * 1024;
    sock_ref.set_recv_buffer_size(TUNED_BUFFER_SIZE)?;
    sock_ref.set_send_buffer_size(TUNED_BUFFER_SIZE)?;
    Ok(())
}

/// Per-socket read/write deadline, applied around individual frame
/// reads/writes rather than as a raw socket option (tokio has no
/// portable per-call socket deadline equivalent).
pub const SOCKET_IO_DEADLINE: Duration = Duration::from_secs(30);
