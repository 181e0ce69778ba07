// src/core/metrics.rs

//! Defines and registers Prometheus metrics for server monitoring.
//!
//! Ambient observability, kept regardless of the service's feature
//! Non-goals: these gauges/counters describe the multiplexer and
//! personalities, not the memcached wire protocol itself (`stats`
//! has its own exact counter set in `memcached::service`).

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, TextEncoder, register_counter, register_counter_vec,
    register_gauge,
};

lazy_static! {
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("ppdb_connected_clients", "Number of currently connected clients.").unwrap();
    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("ppdb_connections_received_total", "Total number of connections accepted.").unwrap();
    pub static ref CONNECTIONS_REJECTED_TOTAL: Counter =
        register_counter!("ppdb_connections_rejected_total", "Total number of connections rejected due to backpressure.").unwrap();
    pub static ref COMMANDS_PROCESSED_TOTAL: CounterVec = register_counter_vec!(
        "ppdb_commands_processed_total",
        "Total number of memcached commands processed, labeled by command name.",
        &["command"]
    )
    .unwrap();
    pub static ref WORKERS_RESTARTED_TOTAL: Counter = register_counter!(
        "ppdb_workers_restarted_total",
        "Total number of workers replaced by the health monitor after a heartbeat timeout."
    )
    .unwrap();
    pub static ref FORWARDER_BYTES_TOTAL: CounterVec = register_counter_vec!(
        "ppdb_forwarder_bytes_total",
        "Total bytes copied by the forwarder personality, labeled by direction.",
        &["direction"]
    )
    .unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
