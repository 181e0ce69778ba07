// src/forwarder/mod.rs

//! The `rinetd`-style TCP port forwarder personality (C7).

pub mod rules;
pub mod service;

use crate::config::Config;
use crate::core::PpdbError;
use crate::mux::{drain, register_service, WorkerPool, DRAIN_GRACE};
use rules::ForwardRule;
use std::fs;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub const SERVICE_NAME: &str = "rinetd";

/// Runs every configured forwarding rule concurrently until
/// `shutdown_rx` fires.
pub async fn run(config: Arc<Config>, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), PpdbError> {
    let record = register_service(SERVICE_NAME);
    record.transition_init()?;

    let contents = fs::read_to_string(&config.forwarder.rules_file).map_err(|e| {
        PpdbError::InvalidConfig(format!(
            "{}: {e}",
            config.forwarder.rules_file
        ))
    })?;
    let forward_rules = rules::parse_rules(&contents)?;
    if forward_rules.is_empty() {
        warn!("{SERVICE_NAME}: rules file has no forwarding rules configured");
    }

    record.transition_start()?;
    let pool = Arc::new(WorkerPool::new(config.worker_pool.max_workers));
    let mut rule_tasks = JoinSet::new();
    for rule in forward_rules {
        rule_tasks.spawn(run_rule(rule, pool.clone(), shutdown_rx.resubscribe()));
    }

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                info!("{SERVICE_NAME}: shutdown requested");
                break;
            }
            Some(res) = rule_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("{SERVICE_NAME}: rule task failed: {e}"),
                    Err(e) => error!("{SERVICE_NAME}: rule task panicked: {e:?}"),
                }
            }
        }
    }

    record.transition_stop()?;
    drain(&mut rule_tasks, SERVICE_NAME, DRAIN_GRACE).await;
    record.mark_stopped();
    Ok(())
}

async fn run_rule(
    rule: ForwardRule,
    pool: Arc<WorkerPool>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), PpdbError> {
    let listener = TcpListener::bind(rule.src_socket_addr().await?).await?;
    info!(
        "{SERVICE_NAME}: forwarding {}:{} -> {}:{}",
        rule.src_addr, rule.src_port, rule.dst_addr, rule.dst_port
    );

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => match pool.try_admit() {
                        Ok(permit) => {
                            let rule = rule.clone();
                            connections.spawn(async move {
                                service::handle_connection(stream, rule).await;
                                drop(permit);
                            });
                        }
                        Err(PpdbError::Busy) => {
                            warn!("{SERVICE_NAME}: worker pool full, rejecting connection from {addr}");
                        }
                        Err(e) => error!("{SERVICE_NAME}: unexpected pool error: {e}"),
                    },
                    Err(e) => error!("{SERVICE_NAME}: accept failed on rule: {e}"),
                }
            }
            Some(res) = connections.join_next() => {
                if let Err(e) = res {
                    error!("{SERVICE_NAME}: connection task panicked: {e:?}");
                }
            }
        }
    }
    drain(&mut connections, SERVICE_NAME, DRAIN_GRACE).await;
    Ok(())
}
