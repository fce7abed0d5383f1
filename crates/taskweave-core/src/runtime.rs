// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable coordination runtime.
//!
//! [`CoordinatorRuntime`] owns the shared registries (core catalog, telemetry
//! table, object store) and hands out monitored tasks and transfer barriers
//! wired to them. It has an explicit start and shutdown instead of ambient
//! global state.
//!
//! # Example
//!
//! ```rust,ignore
//! use taskweave_core::runtime::CoordinatorRuntime;
//! use taskweave_core::task::TaskOptions;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = CoordinatorRuntime::builder()
//!         .computing_units(8)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let descriptor =
//!         runtime.describe_method("app.Matrix", "multiply", TaskOptions::default(), true, vec![])?;
//!     let task = runtime.new_task(&descriptor);
//!     let barrier = runtime.submit_on_ready(&task);
//!     barrier.enable()?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::barrier::{JobContinuation, JobId, TransferBarrier};
use crate::catalog::{CoreCatalog, CoreElementDefinition, CoreId};
use crate::config::{Config, DEFAULT_LISTENER_QUEUE, DEFAULT_METRICS_PORT, host_parallelism};
use crate::monitor::{LifecycleDispatcher, LifecycleListener, MonitoredTask, SubmitOnReady};
use crate::parameter::Parameter;
use crate::resources::{MethodResourceDescription, ResourceDescription};
use crate::store::{InMemoryObjectStore, ObjectStore};
use crate::task::{TaskDescriptor, TaskId, TaskOptions};
use crate::telemetry::{TelemetrySnapshot, TelemetryTable};

/// Builder for creating a [`CoordinatorRuntime`].
pub struct CoordinatorRuntimeBuilder {
    node: Option<ResourceDescription>,
    listener: Option<Arc<dyn LifecycleListener>>,
    listener_queue: usize,
    object_store: Option<Arc<dyn ObjectStore>>,
    metrics_enabled: bool,
    metrics_port: u16,
}

impl std::fmt::Debug for CoordinatorRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorRuntimeBuilder")
            .field("node", &self.node)
            .field("listener", &self.listener.as_ref().map(|_| "..."))
            .field("listener_queue", &self.listener_queue)
            .field("object_store", &self.object_store.as_ref().map(|_| "..."))
            .field("metrics_enabled", &self.metrics_enabled)
            .field("metrics_port", &self.metrics_port)
            .finish()
    }
}

impl Default for CoordinatorRuntimeBuilder {
    fn default() -> Self {
        Self {
            node: None,
            listener: None,
            listener_queue: DEFAULT_LISTENER_QUEUE,
            object_store: None,
            metrics_enabled: true,
            metrics_port: DEFAULT_METRICS_PORT,
        }
    }
}

impl CoordinatorRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the node, queue and metrics settings of a loaded [`Config`].
    pub fn config(self, config: &Config) -> Self {
        self.computing_units(config.node_computing_units)
            .listener_queue(config.listener_queue)
            .metrics_enabled(config.metrics_enabled)
            .metrics_port(config.metrics_port)
    }

    /// Feed task and node events into the telemetry table.
    ///
    /// Default: true
    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    /// Port advertised to the external metrics exporter.
    ///
    /// Default: 19090
    pub fn metrics_port(mut self, port: u16) -> Self {
        self.metrics_port = port;
        self
    }

    /// Describe the local node.
    ///
    /// Default: a CPU-only node with the host's parallelism.
    pub fn node(mut self, node: impl Into<ResourceDescription>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Shorthand for a CPU-only local node with `units` compute units.
    pub fn computing_units(self, units: u32) -> Self {
        self.node(MethodResourceDescription::with_cpus(units))
    }

    /// Receive lifecycle records of every task created by the runtime.
    pub fn listener(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Capacity of the listener queue.
    ///
    /// Default: 1024
    pub fn listener_queue(mut self, capacity: usize) -> Self {
        self.listener_queue = capacity;
        self
    }

    /// Use a custom object store.
    ///
    /// Default: [`InMemoryObjectStore`]
    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if a setting is out of range.
    pub fn build(self) -> Result<CoordinatorRuntimeConfig> {
        if self.listener_queue == 0 {
            anyhow::bail!("listener queue capacity must be positive");
        }
        let node = self
            .node
            .unwrap_or_else(|| MethodResourceDescription::with_cpus(host_parallelism()).into());
        if node.total_cpu_computing_units() == 0 {
            anyhow::bail!("local node must have at least one compute unit");
        }

        Ok(CoordinatorRuntimeConfig {
            node,
            listener: self.listener,
            listener_queue: self.listener_queue,
            object_store: self
                .object_store
                .unwrap_or_else(|| Arc::new(InMemoryObjectStore::new())),
            metrics_enabled: self.metrics_enabled,
            metrics_port: self.metrics_port,
        })
    }
}

/// Configuration for a [`CoordinatorRuntime`].
pub struct CoordinatorRuntimeConfig {
    node: ResourceDescription,
    listener: Option<Arc<dyn LifecycleListener>>,
    listener_queue: usize,
    object_store: Arc<dyn ObjectStore>,
    metrics_enabled: bool,
    metrics_port: u16,
}

impl std::fmt::Debug for CoordinatorRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorRuntimeConfig")
            .field("node", &self.node)
            .field("listener", &self.listener.as_ref().map(|_| "..."))
            .field("listener_queue", &self.listener_queue)
            .field("object_store", &"...")
            .field("metrics_enabled", &self.metrics_enabled)
            .field("metrics_port", &self.metrics_port)
            .finish()
    }
}

impl CoordinatorRuntimeConfig {
    /// Start the runtime, spawning the listener task if a listener is set.
    pub async fn start(self) -> Result<CoordinatorRuntime> {
        let telemetry = Arc::new(TelemetryTable::new());
        let catalog = if self.metrics_enabled {
            telemetry.on_node_features_changed(&self.node);
            Arc::new(CoreCatalog::with_telemetry(telemetry.clone()))
        } else {
            Arc::new(CoreCatalog::new())
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (dispatcher, listener_handle) = match self.listener {
            Some(listener) => {
                let (dispatcher, handle) =
                    LifecycleDispatcher::spawn(self.listener_queue, listener, shutdown_rx);
                (Some(dispatcher), Some(handle))
            }
            None => (None, None),
        };

        info!(
            computing_units = self.node.total_cpu_computing_units(),
            resource_type = %self.node.resource_type(),
            listener = dispatcher.is_some(),
            metrics_enabled = self.metrics_enabled,
            metrics_port = self.metrics_port,
            "CoordinatorRuntime started"
        );

        Ok(CoordinatorRuntime {
            catalog,
            telemetry,
            object_store: self.object_store,
            node: RwLock::new(self.node),
            dispatcher,
            listener_handle,
            shutdown_tx,
            next_task_id: AtomicU64::new(1),
            next_job_id: AtomicU64::new(1),
            metrics_enabled: self.metrics_enabled,
            metrics_port: self.metrics_port,
        })
    }
}

/// A running coordination runtime that can be embedded in an application.
///
/// The runtime manages:
/// - the core catalog and its telemetry table
/// - id allocation for tasks and jobs
/// - the lifecycle listener task, if any
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct CoordinatorRuntime {
    catalog: Arc<CoreCatalog>,
    telemetry: Arc<TelemetryTable>,
    object_store: Arc<dyn ObjectStore>,
    node: RwLock<ResourceDescription>,
    dispatcher: Option<LifecycleDispatcher>,
    listener_handle: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    next_task_id: AtomicU64,
    next_job_id: AtomicU64,
    metrics_enabled: bool,
    metrics_port: u16,
}

impl CoordinatorRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> CoordinatorRuntimeBuilder {
        CoordinatorRuntimeBuilder::new()
    }

    /// Shared core catalog.
    pub fn catalog(&self) -> &Arc<CoreCatalog> {
        &self.catalog
    }

    /// Shared telemetry table. Stays empty when metrics are disabled.
    pub fn telemetry(&self) -> &Arc<TelemetryTable> {
        &self.telemetry
    }

    /// Port the metrics exporter should serve the telemetry table on,
    /// `None` when metrics are disabled.
    pub fn metrics_port(&self) -> Option<u16> {
        self.metrics_enabled.then_some(self.metrics_port)
    }

    /// Zero every core element gauge, keeping the registered elements.
    pub fn reset_telemetry(&self) {
        self.catalog.reset_telemetry();
    }

    /// Object store for task data.
    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.object_store
    }

    /// Register a core element implementation declared up front.
    pub fn register_core_element(&self, definition: CoreElementDefinition) -> crate::error::Result<CoreId> {
        self.catalog.register_core_element(definition)
    }

    /// Build the descriptor of a method invocation.
    pub fn describe_method(
        &self,
        declaring_class: &str,
        method_name: &str,
        options: TaskOptions,
        has_target: bool,
        parameters: Vec<Parameter>,
    ) -> crate::error::Result<TaskDescriptor> {
        TaskDescriptor::method(
            &self.catalog,
            declaring_class,
            method_name,
            options,
            has_target,
            parameters,
        )
    }

    /// Build the descriptor of a service invocation.
    #[allow(clippy::too_many_arguments)]
    pub fn describe_service(
        &self,
        namespace: &str,
        service: &str,
        port: &str,
        operation: &str,
        priority: bool,
        has_target: bool,
        parameters: Vec<Parameter>,
    ) -> crate::error::Result<TaskDescriptor> {
        TaskDescriptor::service(
            &self.catalog,
            namespace,
            service,
            port,
            operation,
            priority,
            has_target,
            parameters,
        )
    }

    /// Start monitoring a new task instance of `descriptor`.
    pub fn new_task(&self, descriptor: &TaskDescriptor) -> Arc<MonitoredTask> {
        let task_id = TaskId(self.next_task_id.fetch_add(1, Ordering::Relaxed));
        let mut task = MonitoredTask::new(task_id, descriptor.core_id());
        if self.metrics_enabled {
            task = task.with_telemetry(self.telemetry.clone());
        }
        if let Some(dispatcher) = &self.dispatcher {
            task = task.with_dispatcher(dispatcher.clone());
        }
        Arc::new(task)
    }

    /// Create a barrier for a new job.
    pub fn new_barrier(&self, continuation: impl JobContinuation + 'static) -> TransferBarrier {
        let job_id = JobId(self.next_job_id.fetch_add(1, Ordering::Relaxed));
        TransferBarrier::new(job_id, continuation)
    }

    /// Create a barrier that submits `task` once its inputs are in place.
    ///
    /// The barrier is attached to the task: cancelling either one cancels
    /// the other.
    pub fn submit_on_ready(&self, task: &Arc<MonitoredTask>) -> Arc<TransferBarrier> {
        let barrier = Arc::new(self.new_barrier(SubmitOnReady::new(task.clone())));
        task.attach_barrier(&barrier);
        barrier
    }

    /// Current description of the local node.
    pub fn node(&self) -> ResourceDescription {
        self.node.read().clone()
    }

    /// Replace the description of the local node.
    pub fn update_node_features(&self, node: impl Into<ResourceDescription>) {
        let node = node.into();
        if self.metrics_enabled {
            self.telemetry.on_node_features_changed(&node);
        }
        *self.node.write() = node;
    }

    /// Read every telemetry gauge.
    pub fn telemetry_snapshot(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }

    /// Check if the listener task is still running.
    pub fn is_running(&self) -> bool {
        self.listener_handle
            .as_ref()
            .is_none_or(|handle| !handle.is_finished())
            && !*self.shutdown_tx.borrow()
    }

    /// Gracefully shut down the runtime.
    ///
    /// Delivers queued lifecycle records to the listener, waits for it and
    /// clears the telemetry table.
    pub async fn shutdown(self) -> Result<()> {
        info!("CoordinatorRuntime shutting down...");

        // Signal shutdown
        let _ = self.shutdown_tx.send(true);

        let result = match self.listener_handle {
            None => Ok(()),
            Some(handle) => handle.await.map_err(|e| {
                error!("Lifecycle listener task panicked: {}", e);
                anyhow::anyhow!("listener task panicked: {}", e)
            }),
        };

        self.telemetry.clear();
        if result.is_ok() {
            info!("CoordinatorRuntime shutdown complete");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::{BarrierOutcome, DataOperation};
    use crate::monitor::{LifecycleEvent, LifecycleRecord, TaskState};
    use crate::parameter::DataType;
    use crate::resources::ClusterResourceDescription;
    use crate::telemetry::CoreGauge;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Listener collecting every record it receives.
    #[derive(Default)]
    struct RecordingListener {
        records: Mutex<Vec<LifecycleRecord>>,
    }

    #[async_trait]
    impl LifecycleListener for RecordingListener {
        async fn on_event(&self, record: LifecycleRecord) {
            self.records.lock().push(record);
        }
    }

    #[test]
    fn test_builder_default() {
        let builder = CoordinatorRuntimeBuilder::default();
        assert!(builder.node.is_none());
        assert!(builder.listener.is_none());
        assert_eq!(builder.listener_queue, 1024);
    }

    #[test]
    fn test_builder_debug_hides_listener() {
        let builder = CoordinatorRuntimeBuilder::new().listener(Arc::new(RecordingListener::default()));
        let debug_str = format!("{:?}", builder);
        assert!(debug_str.contains("CoordinatorRuntimeBuilder"));
        assert!(debug_str.contains("..."));
    }

    #[test]
    fn test_builder_rejects_empty_queue() {
        let err = CoordinatorRuntimeBuilder::new().listener_queue(0).build().unwrap_err();
        assert!(err.to_string().contains("listener queue"));
    }

    #[test]
    fn test_builder_rejects_node_without_units() {
        let err = CoordinatorRuntimeBuilder::new().computing_units(0).build().unwrap_err();
        assert!(err.to_string().contains("compute unit"));
    }

    #[test]
    fn test_builder_applies_config() {
        let config = Config {
            metrics_enabled: true,
            metrics_port: 9100,
            node_computing_units: 12,
            snapshot_interval: std::time::Duration::from_secs(30),
            listener_queue: 8,
        };
        let built = CoordinatorRuntimeBuilder::new().config(&config).build().unwrap();
        assert_eq!(built.node.total_cpu_computing_units(), 12);
        assert_eq!(built.listener_queue, 8);
        assert!(built.metrics_enabled);
        assert_eq!(built.metrics_port, 9100);
    }

    #[tokio::test]
    async fn test_start_seeds_node_gauge() {
        let runtime = CoordinatorRuntime::builder()
            .computing_units(6)
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        assert_eq!(runtime.telemetry_snapshot().computing_units, 6);
        assert_eq!(runtime.metrics_port(), Some(19090));
        runtime.update_node_features(ClusterResourceDescription::new(
            MethodResourceDescription::with_cpus(32),
            4,
            2,
        ));
        assert_eq!(runtime.telemetry().computing_units(), 32);
        assert_eq!(runtime.node().num_clusters(), Some(2));
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_metrics_leave_table_empty() {
        let runtime = CoordinatorRuntime::builder()
            .computing_units(2)
            .metrics_enabled(false)
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();
        let descriptor = runtime
            .describe_method("app.Tasks", "run", TaskOptions::default(), false, vec![])
            .unwrap();
        let task = runtime.new_task(&descriptor);
        task.handle(LifecycleEvent::Submission).unwrap();

        assert!(runtime.telemetry().is_empty());
        assert_eq!(runtime.metrics_port(), None);
        assert_eq!(runtime.telemetry_snapshot().computing_units, 0);
        assert_eq!(runtime.catalog().len(), 1);
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_task_ids_are_unique() {
        let runtime = CoordinatorRuntime::builder().build().unwrap().start().await.unwrap();
        let descriptor = runtime
            .describe_method("app.Tasks", "run", TaskOptions::default(), false, vec![])
            .unwrap();
        let a = runtime.new_task(&descriptor);
        let b = runtime.new_task(&descriptor);
        assert_ne!(a.task_id(), b.task_id());
        assert_eq!(a.core_id(), b.core_id());
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_barrier_submits_task() {
        let runtime = CoordinatorRuntime::builder().build().unwrap().start().await.unwrap();
        let descriptor = runtime
            .describe_method(
                "app.Matrix",
                "multiply",
                TaskOptions::default(),
                false,
                vec![Parameter::input(DataType::File)],
            )
            .unwrap();
        let task = runtime.new_task(&descriptor);
        task.handle(LifecycleEvent::Creation).unwrap();
        task.handle(LifecycleEvent::Schedule).unwrap();

        let barrier = runtime.submit_on_ready(&task);
        let op = DataOperation::new("d1v1");
        barrier.add_operation().unwrap();
        barrier.enable().unwrap();
        assert_eq!(task.state(), TaskState::Scheduled);

        assert_eq!(barrier.notify_completion(&op).unwrap(), Some(BarrierOutcome::Ready));
        assert_eq!(task.state(), TaskState::Submitted);
        assert_eq!(
            runtime.telemetry().gauge(descriptor.core_id(), CoreGauge::PendingTasks),
            Some(1)
        );
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_flushes_listener() {
        let listener = Arc::new(RecordingListener::default());
        let runtime = CoordinatorRuntime::builder()
            .listener(listener.clone())
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();
        assert!(runtime.is_running());

        let descriptor = runtime
            .describe_method("app.Tasks", "run", TaskOptions::default(), false, vec![])
            .unwrap();
        let task = runtime.new_task(&descriptor);
        task.handle(LifecycleEvent::Creation).unwrap();
        task.handle(LifecycleEvent::Completion).unwrap();

        runtime.shutdown().await.unwrap();

        let records = listener.records.lock();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].state, TaskState::Completed);
    }
}
