// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Taskweave Core - standalone coordination process
//!
//! Runs the coordination runtime for the local node and periodically logs a
//! telemetry snapshot for the external metrics exporter to pick up.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, error, info};

use taskweave_core::config::Config;
use taskweave_core::monitor::{LifecycleListener, LifecycleRecord};
use taskweave_core::runtime::CoordinatorRuntime;
use taskweave_core::telemetry::{CoreGauge, NODE_INFO_GAUGE, TelemetryTable};

/// Writes every lifecycle record to the log.
struct LogListener;

#[async_trait]
impl LifecycleListener for LogListener {
    async fn on_event(&self, record: LifecycleRecord) {
        debug!(
            task_id = %record.task_id,
            core_id = %record.core_id,
            event = record.event,
            state = %record.state,
            attempt = record.attempt,
            value = ?record.value,
            at = %record.at,
            "Lifecycle event"
        );
    }
}

async fn snapshot_loop(telemetry: Arc<TelemetryTable>, interval: Duration) {
    for gauge in CoreGauge::ALL {
        debug!(gauge = gauge.name(), description = gauge.description(), "Core element gauge");
    }
    debug!(gauge = NODE_INFO_GAUGE, "Node gauge");
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match serde_json::to_string(&telemetry.snapshot()) {
            Ok(snapshot) => info!(%snapshot, "Telemetry snapshot"),
            Err(e) => error!("Failed to serialize telemetry snapshot: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("taskweave_core=info".parse()?),
        )
        .init();

    info!("Starting Taskweave Core");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        metrics_enabled = config.metrics_enabled,
        metrics_port = config.metrics_port,
        computing_units = config.node_computing_units,
        snapshot_interval_secs = config.snapshot_interval.as_secs(),
        listener_queue = config.listener_queue,
        "Configuration loaded"
    );

    let runtime = CoordinatorRuntime::builder()
        .config(&config)
        .listener(Arc::new(LogListener))
        .build()?
        .start()
        .await?;

    let snapshot_handle = config.metrics_enabled.then(|| {
        tokio::spawn(snapshot_loop(
            runtime.telemetry().clone(),
            config.snapshot_interval,
        ))
    });

    info!(metrics_port = ?runtime.metrics_port(), "Taskweave Core initialized successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    if let Some(handle) = snapshot_handle {
        handle.abort();
    }
    runtime.shutdown().await?;
    info!("Shutdown complete");

    Ok(())
}
