// src/memcached/mod.rs

//! The memcached-compatible KV server personality (`peer_memkv`): the
//! accept loop (C1) wired to the protocol engine (C6) over the shared
//! multiplexer core.

pub mod codec;
pub mod commands;
pub mod service;
pub mod stats;

use crate::config::Config;
use crate::core::PpdbError;
use crate::kv::KvFacade;
use crate::mux::health::{run_idle_evictor, ConnectionRegistry};
use crate::mux::{drain, listener::tune_accepted_socket, register_service, WorkerPool, DRAIN_GRACE};
use std::sync::Arc;
use std::time::Duration;
use stats::MemcachedStats;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub const SERVICE_NAME: &str = "peer_memkv";

/// Runs the memcached personality until `shutdown_rx` fires, using a
/// biased `tokio::select!` over shutdown, health monitor, accept, and
/// connection-task completion.
pub async fn run(
    config: Arc<Config>,
    version: Arc<str>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), PpdbError> {
    let record = register_service(SERVICE_NAME);
    record.transition_init()?;
    record.transition_start()?;

    let facade = Arc::new(crate::kv::open_facade(&config.kv).await?);
    let stats = Arc::new(MemcachedStats::default());
    let registry = Arc::new(ConnectionRegistry::new());
    let pool = Arc::new(WorkerPool::new(config.worker_pool.max_workers));

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(
        "{SERVICE_NAME}: listening on {}",
        listener.local_addr().map(|a| a.to_string()).unwrap_or_default()
    );

    let idle_timeout = Duration::from_secs(config.worker_pool.idle_timeout_secs);
    let mut health_task = JoinSet::new();
    health_task.spawn(run_idle_evictor(
        SERVICE_NAME,
        registry.clone(),
        idle_timeout,
        shutdown_rx.resubscribe(),
    ));

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                info!("{SERVICE_NAME}: shutdown requested");
                break;
            }

            Some(res) = health_task.join_next() => {
                if let Err(e) = res {
                    error!("{SERVICE_NAME}: health monitor task panicked: {e:?}");
                }
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        if let Err(e) = tune_accepted_socket(&stream) {
                            warn!("{SERVICE_NAME}: failed to tune socket for {addr}: {e}");
                        }
                        match pool.try_admit() {
                            Ok(permit) => {
                                let facade = facade.clone();
                                let stats = stats.clone();
                                let version = version.clone();
                                let registry = registry.clone();
                                crate::core::metrics::CONNECTIONS_RECEIVED_TOTAL.inc();
                                crate::core::metrics::CONNECTED_CLIENTS.inc();
                                connections.spawn(async move {
                                    service::serve_connection(stream, facade, stats, version, registry).await;
                                    crate::core::metrics::CONNECTED_CLIENTS.dec();
                                    drop(permit);
                                });
                            }
                            Err(PpdbError::Busy) => {
                                warn!("{SERVICE_NAME}: worker pool full, rejecting connection from {addr}");
                                crate::core::metrics::CONNECTIONS_REJECTED_TOTAL.inc();
                            }
                            Err(e) => error!("{SERVICE_NAME}: unexpected pool error: {e}"),
                        }
                    }
                    Err(e) => error!("{SERVICE_NAME}: accept failed: {e}"),
                }
            }

            Some(res) = connections.join_next() => {
                if let Err(e) = res {
                    error!("{SERVICE_NAME}: connection task panicked: {e:?}");
                }
            }
        }
    }

    record.transition_stop()?;
    drain(&mut connections, SERVICE_NAME, DRAIN_GRACE).await;
    health_task.shutdown().await;
    if let Err(e) = facade.close().await {
        warn!("{SERVICE_NAME}: backend teardown hint failed: {e}");
    }
    record.mark_stopped();
    Ok(())
}
