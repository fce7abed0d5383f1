// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-core-element telemetry.
//!
//! The table holds one gauge block per registered core element plus a
//! node-wide compute-unit gauge. Gauge blocks are heap-allocated and shared
//! through `Arc`, so growing the table never moves a block that an update is
//! writing to. The outer lock is only taken for writing by [`TelemetryTable::grow_to`]
//! and [`TelemetryTable::clear`]; updates and reads take it shared and then
//! touch atomics.
//!
//! Exporters poll [`TelemetryTable::snapshot`]. Values in a snapshot are
//! individually recent but not atomic across gauges.
//!
//! Telemetry never fails a task: out-of-range ids and missing profiles are
//! logged and the gauges keep their last value.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::catalog::CoreId;
use crate::profile::Profile;
use crate::resources::ResourceDescription;

/// Gauges tracked for every core element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreGauge {
    /// Number of executed tasks.
    ExecutedTasks,
    /// Number of submitted tasks that have not finished an attempt.
    PendingTasks,
    /// Minimum execution time.
    MinTime,
    /// Average execution time.
    AvgTime,
    /// Maximum execution time.
    MaxTime,
}

impl CoreGauge {
    /// All gauges, in storage order.
    pub const ALL: [CoreGauge; 5] = [
        CoreGauge::ExecutedTasks,
        CoreGauge::PendingTasks,
        CoreGauge::MinTime,
        CoreGauge::AvgTime,
        CoreGauge::MaxTime,
    ];

    /// Metric name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExecutedTasks => "taskweave.exec_tasks",
            Self::PendingTasks => "taskweave.pend_tasks",
            Self::MinTime => "taskweave.min_time",
            Self::AvgTime => "taskweave.avg_time",
            Self::MaxTime => "taskweave.max_time",
        }
    }

    /// Human readable description.
    pub fn description(&self) -> &'static str {
        match self {
            Self::ExecutedTasks => "Number of executed tasks",
            Self::PendingTasks => "Number of pending tasks",
            Self::MinTime => "Minimum time to execute task",
            Self::AvgTime => "Average time to execute task",
            Self::MaxTime => "Maximum time to execute task",
        }
    }

    fn slot(&self) -> usize {
        match self {
            Self::ExecutedTasks => 0,
            Self::PendingTasks => 1,
            Self::MinTime => 2,
            Self::AvgTime => 3,
            Self::MaxTime => 4,
        }
    }
}

/// Name of the node-wide compute-unit gauge.
pub const NODE_INFO_GAUGE: &str = "taskweave.node_info";

#[derive(Debug, Default)]
struct GaugeBlock {
    signature: OnceLock<String>,
    values: [AtomicI64; 5],
}

impl GaugeBlock {
    fn get(&self, gauge: CoreGauge) -> i64 {
        self.values[gauge.slot()].load(Ordering::Relaxed)
    }

    fn set(&self, gauge: CoreGauge, value: i64) {
        self.values[gauge.slot()].store(value, Ordering::Relaxed);
    }
}

/// Gauge values of one core element at the time of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoreElementMetrics {
    /// Core element id.
    pub core_id: CoreId,
    /// Core element signature, used as the metric label.
    pub signature: Option<String>,
    /// Executed task count.
    pub executed_tasks: i64,
    /// Pending task count.
    pub pending_tasks: i64,
    /// Minimum execution time (ms).
    pub min_time_ms: i64,
    /// Average execution time (ms).
    pub avg_time_ms: i64,
    /// Maximum execution time (ms).
    pub max_time_ms: i64,
}

/// Point-in-time view of the whole table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    /// Compute units of the local node.
    pub computing_units: u64,
    /// One entry per core element, indexed by id.
    pub core_elements: Vec<CoreElementMetrics>,
}

/// Process-wide table of per-core-element gauges.
#[derive(Debug, Default)]
pub struct TelemetryTable {
    blocks: RwLock<Vec<Arc<GaugeBlock>>>,
    computing_units: AtomicU64,
}

impl TelemetryTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of core elements covered by the table.
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    /// Whether the table covers no core element.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extend the table to cover ids `0..new_count`. Never shrinks.
    pub fn grow_to(&self, new_count: usize) {
        let mut blocks = self.blocks.write();
        let old_count = blocks.len();
        if new_count <= old_count {
            return;
        }
        blocks.resize_with(new_count, Default::default);
        debug!(old_count, new_count, "Telemetry table grown");
    }

    /// Grow to cover `core_id` and attach its signature label.
    ///
    /// The label of an entry is set once; later calls keep the first label.
    pub fn register_core(&self, core_id: CoreId, signature: &str) {
        self.grow_to(core_id.index() + 1);
        if let Some(block) = self.block(core_id) {
            let _ = block.signature.set(signature.to_string());
        }
    }

    fn block(&self, core_id: CoreId) -> Option<Arc<GaugeBlock>> {
        let block = self.blocks.read().get(core_id.index()).cloned();
        if block.is_none() {
            warn!(%core_id, "Telemetry update for unregistered core element ignored");
        }
        block
    }

    /// A task of `core_id` was submitted.
    pub fn on_new_task(&self, core_id: CoreId) {
        if let Some(block) = self.block(core_id) {
            block.values[CoreGauge::PendingTasks.slot()].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A submitted task of `core_id` finished its attempt.
    pub fn on_task_started(&self, core_id: CoreId) {
        if let Some(block) = self.block(core_id) {
            let pending = &block.values[CoreGauge::PendingTasks.slot()];
            let result = pending.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |value| {
                (value > 0).then(|| value - 1)
            });
            if result.is_err() {
                warn!(%core_id, "Pending task gauge already at zero");
            }
        }
    }

    /// Overwrite the execution gauges of `core_id` with the cumulative profile.
    pub fn on_task_finished(&self, core_id: CoreId, profile: Option<&Profile>) {
        let Some(profile) = profile else {
            warn!(%core_id, "Finished task reported without a profile, keeping previous gauges");
            return;
        };
        if let Some(block) = self.block(core_id) {
            block.set(CoreGauge::ExecutedTasks, to_gauge(profile.execution_count()));
            block.set(CoreGauge::MinTime, to_gauge(profile.min_execution_time()));
            block.set(CoreGauge::AvgTime, to_gauge(profile.average_execution_time()));
            block.set(CoreGauge::MaxTime, to_gauge(profile.max_execution_time()));
        }
    }

    /// Overwrite the node compute-unit gauge.
    pub fn on_node_features_changed(&self, description: &ResourceDescription) {
        let units = u64::from(description.total_cpu_computing_units());
        self.computing_units.store(units, Ordering::Relaxed);
        debug!(gauge = NODE_INFO_GAUGE, computing_units = units, "Node features updated");
    }

    /// Drop every core element entry, signature labels included.
    ///
    /// Meant for shutdown. While the catalog is still in use, go through
    /// [`CoreCatalog::reset_telemetry`](crate::catalog::CoreCatalog::reset_telemetry)
    /// so the labels of registered elements come back.
    pub fn clear(&self) {
        self.blocks.write().clear();
        debug!("Telemetry table cleared");
    }

    /// Current value of one gauge, `None` if `core_id` is not covered.
    pub fn gauge(&self, core_id: CoreId, gauge: CoreGauge) -> Option<i64> {
        self.blocks
            .read()
            .get(core_id.index())
            .map(|block| block.get(gauge))
    }

    /// Current compute-unit gauge.
    pub fn computing_units(&self) -> u64 {
        self.computing_units.load(Ordering::Relaxed)
    }

    /// Read every gauge.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let blocks: Vec<Arc<GaugeBlock>> = self.blocks.read().clone();
        let core_elements = blocks
            .iter()
            .enumerate()
            .map(|(index, block)| CoreElementMetrics {
                core_id: CoreId::from_index(index),
                signature: block.signature.get().cloned(),
                executed_tasks: block.get(CoreGauge::ExecutedTasks),
                pending_tasks: block.get(CoreGauge::PendingTasks),
                min_time_ms: block.get(CoreGauge::MinTime),
                avg_time_ms: block.get(CoreGauge::AvgTime),
                max_time_ms: block.get(CoreGauge::MaxTime),
            })
            .collect();

        TelemetrySnapshot {
            computing_units: self.computing_units(),
            core_elements,
        }
    }
}

fn to_gauge(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{ClusterResourceDescription, MethodResourceDescription};

    #[test]
    fn test_grow_preserves_history() {
        let table = TelemetryTable::new();
        table.grow_to(5);
        for index in 0..5 {
            let core_id = CoreId::from_index(index);
            for _ in 0..=index {
                table.on_new_task(core_id);
            }
            table.on_task_finished(core_id, Some(&Profile::from_stats(index as u64, 1, 2, 3)));
        }

        table.grow_to(8);
        assert_eq!(table.len(), 8);
        for index in 0..5 {
            let core_id = CoreId::from_index(index);
            assert_eq!(
                table.gauge(core_id, CoreGauge::PendingTasks),
                Some(index as i64 + 1)
            );
            assert_eq!(
                table.gauge(core_id, CoreGauge::ExecutedTasks),
                Some(index as i64)
            );
            assert_eq!(table.gauge(core_id, CoreGauge::MaxTime), Some(3));
        }
        for index in 5..8 {
            for gauge in CoreGauge::ALL {
                assert_eq!(table.gauge(CoreId::from_index(index), gauge), Some(0));
            }
        }
    }

    #[test]
    fn test_grow_never_shrinks() {
        let table = TelemetryTable::new();
        table.grow_to(4);
        table.grow_to(2);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_pending_gauge_round_trip() {
        let table = TelemetryTable::new();
        table.grow_to(1);
        let core_id = CoreId(0);
        table.on_new_task(core_id);
        table.on_new_task(core_id);
        table.on_task_started(core_id);
        assert_eq!(table.gauge(core_id, CoreGauge::PendingTasks), Some(1));
        table.on_task_started(core_id);
        table.on_task_started(core_id);
        assert_eq!(table.gauge(core_id, CoreGauge::PendingTasks), Some(0));
    }

    #[test]
    fn test_finished_overwrites_not_increments() {
        let table = TelemetryTable::new();
        table.grow_to(1);
        let core_id = CoreId(0);
        table.on_task_finished(core_id, Some(&Profile::from_stats(3, 10, 20, 30)));
        table.on_task_finished(core_id, Some(&Profile::from_stats(4, 5, 18, 30)));
        assert_eq!(table.gauge(core_id, CoreGauge::ExecutedTasks), Some(4));
        assert_eq!(table.gauge(core_id, CoreGauge::MinTime), Some(5));
        assert_eq!(table.gauge(core_id, CoreGauge::AvgTime), Some(18));
    }

    #[test]
    fn test_missing_profile_keeps_values() {
        let table = TelemetryTable::new();
        table.grow_to(1);
        let core_id = CoreId(0);
        table.on_task_finished(core_id, Some(&Profile::from_stats(2, 1, 1, 1)));
        table.on_task_finished(core_id, None);
        assert_eq!(table.gauge(core_id, CoreGauge::ExecutedTasks), Some(2));
    }

    #[test]
    fn test_unknown_core_is_ignored() {
        let table = TelemetryTable::new();
        table.on_new_task(CoreId(9));
        table.on_task_finished(CoreId(9), Some(&Profile::new()));
        assert!(table.is_empty());
        assert_eq!(table.gauge(CoreId(9), CoreGauge::PendingTasks), None);
    }

    #[test]
    fn test_node_features_and_clear() {
        let table = TelemetryTable::new();
        table.register_core(CoreId(0), "inc(INT_T)app.Counter");
        table.on_node_features_changed(&MethodResourceDescription::with_cpus(12).into());
        assert_eq!(table.computing_units(), 12);

        table.on_node_features_changed(
            &ClusterResourceDescription::new(MethodResourceDescription::with_cpus(4), 2, 2).into(),
        );
        assert_eq!(table.computing_units(), 4);

        let snapshot = table.snapshot();
        assert_eq!(snapshot.core_elements.len(), 1);
        assert_eq!(
            snapshot.core_elements[0].signature.as_deref(),
            Some("inc(INT_T)app.Counter")
        );

        table.clear();
        assert!(table.is_empty());
        assert!(table.snapshot().core_elements.is_empty());
        assert_eq!(table.computing_units(), 4);
    }

    #[test]
    fn test_gauge_names_are_unique() {
        let mut names: Vec<_> = CoreGauge::ALL.iter().map(|g| g.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), CoreGauge::ALL.len());
    }
}
