// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Default port announced for metrics scraping.
pub const DEFAULT_METRICS_PORT: u16 = 19090;

/// Default interval between telemetry snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL_SECS: u64 = 30;

/// Default capacity of the lifecycle listener queue.
pub const DEFAULT_LISTENER_QUEUE: usize = 1024;

/// Taskweave core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether telemetry snapshots are produced
    pub metrics_enabled: bool,
    /// Port the external metrics exporter listens on
    pub metrics_port: u16,
    /// Compute units of the local node
    pub node_computing_units: u32,
    /// Interval between telemetry snapshots
    pub snapshot_interval: Duration,
    /// Capacity of the lifecycle listener queue
    pub listener_queue: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `TASKWEAVE_METRICS_ENABLED`: `true`/`1` or `false`/`0` (default: true)
    /// - `TASKWEAVE_METRICS_PORT`: metrics port (default: 19090)
    /// - `TASKWEAVE_NODE_COMPUTING_UNITS`: node compute units (default: host parallelism)
    /// - `TASKWEAVE_SNAPSHOT_INTERVAL_SECS`: snapshot interval (default: 30)
    /// - `TASKWEAVE_LISTENER_QUEUE`: listener queue capacity (default: 1024)
    pub fn from_env() -> Result<Self, ConfigError> {
        let metrics_enabled = match std::env::var("TASKWEAVE_METRICS_ENABLED") {
            Err(_) => true,
            Ok(value) => parse_flag(&value).ok_or(ConfigError::Invalid(
                "TASKWEAVE_METRICS_ENABLED",
                "must be true, false, 1 or 0",
            ))?,
        };

        let metrics_port: u16 = std::env::var("TASKWEAVE_METRICS_PORT")
            .unwrap_or_else(|_| DEFAULT_METRICS_PORT.to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("TASKWEAVE_METRICS_PORT", "must be a valid port number")
            })?;

        let node_computing_units: u32 = match std::env::var("TASKWEAVE_NODE_COMPUTING_UNITS") {
            Err(_) => host_parallelism(),
            Ok(value) => value
                .parse()
                .ok()
                .filter(|units| *units > 0)
                .ok_or(ConfigError::Invalid(
                    "TASKWEAVE_NODE_COMPUTING_UNITS",
                    "must be a positive integer",
                ))?,
        };

        let snapshot_interval_secs: u64 = std::env::var("TASKWEAVE_SNAPSHOT_INTERVAL_SECS")
            .unwrap_or_else(|_| DEFAULT_SNAPSHOT_INTERVAL_SECS.to_string())
            .parse()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or(ConfigError::Invalid(
                "TASKWEAVE_SNAPSHOT_INTERVAL_SECS",
                "must be a positive number of seconds",
            ))?;

        let listener_queue: usize = std::env::var("TASKWEAVE_LISTENER_QUEUE")
            .unwrap_or_else(|_| DEFAULT_LISTENER_QUEUE.to_string())
            .parse()
            .ok()
            .filter(|capacity| *capacity > 0)
            .ok_or(ConfigError::Invalid(
                "TASKWEAVE_LISTENER_QUEUE",
                "must be a positive integer",
            ))?;

        Ok(Self {
            metrics_enabled,
            metrics_port,
            node_computing_units,
            snapshot_interval: Duration::from_secs(snapshot_interval_secs),
            listener_queue,
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Compute units of the host, at least one.
pub fn host_parallelism() -> u32 {
    std::thread::available_parallelism()
        .map(|n| u32::try_from(n.get()).unwrap_or(u32::MAX))
        .unwrap_or(1)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
