// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Telemetry table growth and concurrent updates.

use std::sync::Arc;

use taskweave_core::catalog::CoreId;
use taskweave_core::profile::Profile;
use taskweave_core::resources::{ClusterResourceDescription, MethodResourceDescription};
use taskweave_core::telemetry::{CoreGauge, TelemetryTable};

#[test]
fn test_growth_preserves_recorded_values() {
    let table = TelemetryTable::new();
    table.grow_to(5);
    for id in 0..5u32 {
        for _ in 0..=id {
            table.on_new_task(CoreId(id));
        }
        table.on_task_finished(CoreId(id), Some(&Profile::from_stats(u64::from(id), 1, 2, 3)));
    }

    table.grow_to(8);

    for id in 0..5u32 {
        assert_eq!(table.gauge(CoreId(id), CoreGauge::PendingTasks), Some(i64::from(id) + 1));
        assert_eq!(table.gauge(CoreId(id), CoreGauge::ExecutedTasks), Some(i64::from(id)));
        assert_eq!(table.gauge(CoreId(id), CoreGauge::AvgTime), Some(2));
    }
    for id in 5..8u32 {
        for gauge in CoreGauge::ALL {
            assert_eq!(table.gauge(CoreId(id), gauge), Some(0));
        }
    }
}

#[test]
fn test_growth_during_updates_loses_nothing() {
    let table = Arc::new(TelemetryTable::new());
    table.grow_to(1);

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let table = &table;
            scope.spawn(move || {
                for _ in 0..1000 {
                    table.on_new_task(CoreId(0));
                }
            });
        }
        let table = &table;
        scope.spawn(move || {
            for count in 2..200 {
                table.grow_to(count);
            }
        });
    });

    assert_eq!(table.len(), 199);
    assert_eq!(table.gauge(CoreId(0), CoreGauge::PendingTasks), Some(4000));
}

#[test]
fn test_snapshot_reports_node_units() {
    let table = TelemetryTable::new();
    table.on_node_features_changed(&MethodResourceDescription::with_cpus(16).into());
    assert_eq!(table.snapshot().computing_units, 16);

    table.on_node_features_changed(
        &ClusterResourceDescription::new(MethodResourceDescription::with_cpus(64), 8, 4).into(),
    );
    let snapshot = table.snapshot();
    assert_eq!(snapshot.computing_units, 64);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["computing_units"], 64);
}

#[test]
fn test_clear_then_regrow_starts_from_zero() {
    let table = TelemetryTable::new();
    table.grow_to(2);
    table.on_new_task(CoreId(1));
    table.clear();
    assert!(table.is_empty());
    assert_eq!(table.gauge(CoreId(1), CoreGauge::PendingTasks), None);

    table.grow_to(2);
    assert_eq!(table.gauge(CoreId(1), CoreGauge::PendingTasks), Some(0));
}
