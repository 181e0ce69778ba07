// src/core/metrics_server.rs

//! A small HTTP server exposing `/metrics` in Prometheus text format.

use crate::core::metrics::gather_metrics;
use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tracing::{error, info};

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}

/// Runs until `shutdown_rx` fires. A bind failure is logged and
/// swallowed rather than propagated — metrics are observability, not a
/// load-bearing part of any personality's contract.
pub async fn run_metrics_server(port: u16, mut shutdown_rx: broadcast::Receiver<()>) {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("metrics server listening on http://{addr}/metrics");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind metrics server on port {port}: {e}");
            return;
        }
    };

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("metrics server shutting down");
        })
        .await;
    if let Err(e) = result {
        error!("metrics server error: {e}");
    }
}
