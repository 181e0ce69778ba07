// src/config.rs

//! Server configuration: loaded from TOML, overridable by CLI flags,
//! validated before use.
//!
//! A `Raw` → resolved → `validate()` pipeline: the file is deserialized
//! into a permissive `RawConfig` with `serde` defaults, then folded
//! into `Config`, then checked for internally consistent values.

use crate::core::PpdbError;
use serde::Deserialize;
use std::fs;

/// Which embedded/dynamic backend the KV facade opens at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Sqlite,
    Duckdb,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerPoolConfig {
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            queue_size: default_queue_size(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

fn default_min_workers() -> usize {
    4
}
fn default_max_workers() -> usize {
    32
}
fn default_queue_size() -> usize {
    1000
}
fn default_idle_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct KvConfig {
    #[serde(default)]
    pub engine: Engine,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Path to the DuckDB shared library, if `engine = "duckdb"`. Left
    /// unset, the bare library name is handed to the platform loader.
    #[serde(default)]
    pub plugin_path: Option<String>,
    #[serde(default)]
    pub allow_fallback: bool,
    #[serde(default = "default_max_value_size")]
    pub max_value_size: usize,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            engine: Engine::default(),
            db_path: default_db_path(),
            plugin_path: None,
            allow_fallback: false,
            max_value_size: default_max_value_size(),
        }
    }
}

fn default_db_path() -> String {
    "ppdb.db".to_string()
}

/// Hard ceiling: default 1 MiB, hard cap 32 MiB.
fn default_max_value_size() -> usize {
    1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForwarderConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_rules_file")]
    pub rules_file: String,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rules_file: default_rules_file(),
        }
    }
}

fn default_rules_file() -> String {
    "forwarder.conf".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    9090
}

/// The raw, permissive shape deserialized directly from `config.toml`.
/// Every field has a default so a mostly-empty file is valid.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub worker_pool: WorkerPoolConfig,
    #[serde(default)]
    pub kv: KvConfig,
    #[serde(default)]
    pub forwarder: ForwarderConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

/// Memcached's conventional default port.
fn default_port() -> u16 {
    11211
}

fn default_log_level() -> String {
    "info".to_string()
}

/// The resolved, validated configuration handed to the rest of the crate.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub worker_pool: WorkerPoolConfig,
    pub kv: KvConfig,
    pub forwarder: ForwarderConfig,
    pub metrics: MetricsConfig,
}

impl Config {
    /// Loads configuration from a TOML file on disk, resolving and
    /// validating it. Falls back to all-default values if the file does
    /// not exist, so a binary with no config file still starts.
    pub fn from_file(path: &str) -> Result<Self, PpdbError> {
        let raw: RawConfig = match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .map_err(|e| PpdbError::InvalidConfig(format!("{path}: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RawConfig::default(),
            Err(e) => return Err(PpdbError::Io(std::sync::Arc::new(e))),
        };

        let config = Self::from_raw(raw);
        config.validate()?;
        Ok(config)
    }

    fn from_raw(raw: RawConfig) -> Self {
        Self {
            host: raw.host,
            port: raw.port,
            log_level: raw.log_level,
            worker_pool: raw.worker_pool,
            kv: raw.kv,
            forwarder: raw.forwarder,
            metrics: raw.metrics,
        }
    }

    /// Checks internal consistency not expressible through `serde` alone.
    pub fn validate(&self) -> Result<(), PpdbError> {
        if self.port == 0 {
            // Port 0 is legal for listeners (the OS assigns a concrete
            // port at bind time) but not as the configured default;
            // reject it here to fail fast on typos.
            return Err(PpdbError::InvalidConfig(
                "port must be non-zero in configuration".to_string(),
            ));
        }
        if self.worker_pool.min_workers == 0 {
            return Err(PpdbError::InvalidConfig(
                "worker_pool.min_workers must be at least 1".to_string(),
            ));
        }
        if self.worker_pool.min_workers > self.worker_pool.max_workers {
            return Err(PpdbError::InvalidConfig(
                "worker_pool.min_workers must not exceed max_workers".to_string(),
            ));
        }
        if self.worker_pool.queue_size == 0 {
            return Err(PpdbError::InvalidConfig(
                "worker_pool.queue_size must be at least 1".to_string(),
            ));
        }
        const HARD_VALUE_SIZE_CEILING: usize = 32 * 1024 * 1024;
        if self.kv.max_value_size == 0 || self.kv.max_value_size > HARD_VALUE_SIZE_CEILING {
            return Err(PpdbError::InvalidConfig(format!(
                "kv.max_value_size must be in 1..={HARD_VALUE_SIZE_CEILING}"
            )));
        }
        if self.kv.engine == Engine::Duckdb && self.kv.plugin_path.is_none() {
            tracing::info!(
                "kv.plugin_path not set; the platform loader will search for the default DuckDB library name"
            );
        }
        if self.forwarder.enabled && self.forwarder.rules_file.trim().is_empty() {
            return Err(PpdbError::InvalidConfig(
                "forwarder.rules_file must be set when forwarder.enabled = true".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_raw(RawConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 11211);
    }

    #[test]
    fn rejects_inverted_worker_bounds() {
        let mut config = Config::default();
        config.worker_pool.min_workers = 10;
        config.worker_pool.max_workers = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_oversized_value_cap() {
        let mut config = Config::default();
        config.kv.max_value_size = 64 * 1024 * 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::from_file("/nonexistent/path/ppdb.toml").unwrap();
        assert_eq!(config.host, "0.0.0.0");
    }
}
