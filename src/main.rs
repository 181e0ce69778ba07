// src/main.rs

//! The main entry point for the ppdb service host.

use anyhow::Result;
use ppdb::config::{Config, Engine};
use std::env;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() -> Result<()> {
    match run_app().await {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

/// `ppdb <service> [--start | --stop | --status] [--config <path>]
/// [--port <n>] [--db <path>] [--engine sqlite|duckdb] [--plugin <path>]`,
/// hand-parsed rather than reaching for `clap`.
async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("ppdb version {VERSION}");
        return Ok(());
    }

    let Some(service) = args.get(1).cloned() else {
        eprintln!(
            "Usage: ppdb <peer_memkv|rinetd> [--start|--stop|--status] [--config <path>] \
             [--port <n>] [--db <path>] [--engine sqlite|duckdb] [--plugin <path>]"
        );
        std::process::exit(1);
    };

    let flag = |name: &str| args.iter().any(|a| a == name);
    let value_of = |name: &str| {
        args.iter()
            .position(|a| a == name)
            .and_then(|i| args.get(i + 1))
            .cloned()
    };

    let config_path = value_of("--config").unwrap_or_else(|| "config.toml".to_string());
    let mut config = Config::from_file(&config_path).map_err(|e| {
        anyhow::anyhow!("failed to load configuration from \"{config_path}\": {e}")
    })?;

    if let Some(port_str) = value_of("--port") {
        config.port = port_str
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid port number: {port_str}"))?;
    }
    if let Some(db_path) = value_of("--db") {
        config.kv.db_path = db_path;
    }
    if let Some(engine_str) = value_of("--engine") {
        config.kv.engine = match engine_str.as_str() {
            "sqlite" => Engine::Sqlite,
            "duckdb" => Engine::Duckdb,
            other => anyhow::bail!("unknown engine: {other}"),
        };
    }
    if let Some(plugin_path) = value_of("--plugin") {
        config.kv.plugin_path = Some(plugin_path);
    }
    config.validate()?;

    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    let (filter, _reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    if flag("--stop") || flag("--status") {
        // Without a resident supervisor process to signal, `--stop`/
        // `--status` against a service that is not this invocation have
        // nothing to act on; report that plainly rather than pretending
        // to succeed.
        eprintln!("{service}: --stop/--status require a running service instance to signal");
        std::process::exit(1);
    }

    // `--start` requires a config file for rinetd, since the
    // forwarder has nothing to listen on without its rules file.
    if service == "rinetd" && !config.forwarder.enabled && value_of("--config").is_none() {
        anyhow::bail!("rinetd requires --config pointing at a config file with [forwarder] rules");
    }

    let config = Arc::new(config);
    let version: Arc<str> = Arc::from(VERSION);
    let (shutdown_tx, _) = broadcast::channel(1);

    if config.metrics.enabled {
        let metrics_port = config.metrics.port;
        let metrics_shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(ppdb::core::metrics_server::run_metrics_server(
            metrics_port,
            metrics_shutdown_rx,
        ));
    }

    let shutdown_signal = {
        let shutdown_tx = shutdown_tx.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(());
        }
    };
    // Spawned rather than raced against the service future in the same
    // `select!`: racing them would let this branch win the instant
    // ctrl-c resolves, cancelling the service future before it can
    // observe `shutdown_rx` and run its own drain sequence.
    let shutdown_task = tokio::spawn(shutdown_signal);

    let run_result = match service.as_str() {
        "peer_memkv" | "memkv" => {
            ppdb::memcached::run(config, version, shutdown_tx.subscribe()).await
        }
        "rinetd" => ppdb::forwarder::run(config, shutdown_tx.subscribe()).await,
        other => anyhow::bail!("unknown service: {other} (expected peer_memkv or rinetd)"),
    };
    shutdown_task.abort();

    if let Err(e) = &run_result {
        error!("{service}: runtime error: {e}");
    }
    run_result.map_err(anyhow::Error::from)
}
