// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Taskweave Core - Task Execution Coordination
//!
//! This crate is the synchronization backbone of the taskweave runtime.
//! Application calls become tasks; this crate identifies them against a
//! catalog of core elements, tracks them through their lifecycle, gates job
//! submission on input transfers and aggregates per-core-element telemetry.
//!
//! # Architecture
//!
//! ```text
//!  application call
//!        │
//!        ▼
//! ┌──────────────────┐   get_core_id    ┌──────────────────┐  register_core  ┌──────────────────┐
//! │  TaskDescriptor  │─────────────────►│   CoreCatalog    │────────────────►│  TelemetryTable  │
//! │   (task.rs)      │                  │  (catalog.rs)    │                 │  (telemetry.rs)  │
//! └──────────────────┘                  └──────────────────┘                 └──────────────────┘
//!        │                                                                      ▲
//!        │ scheduler (external) picks a resource                                │ pending / executed
//!        ▼                                                                      │ min / avg / max
//! ┌──────────────────┐   ready / failed ┌──────────────────┐                    │
//! │ TransferBarrier  │─────────────────►│  MonitoredTask   │────────────────────┘
//! │  (barrier.rs)    │                  │  (monitor.rs)    │──► LifecycleListener (async)
//! └──────────────────┘                  └──────────────────┘
//!        ▲
//!        │ notify_completion / notify_failure
//!  transport (external)
//! ```
//!
//! # Components
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`parameter`] | Parameter directions and data types, return-value detection |
//! | [`catalog`] | Signature to core element id registry, race-safe and idempotent |
//! | [`task`] | Immutable task descriptors |
//! | [`resources`] | Node and cluster capacity descriptions |
//! | [`profile`] | Execution time statistics |
//! | [`monitor`] | Lifecycle state machine and listener hand-off |
//! | [`barrier`] | Exactly-once transfer completion barrier |
//! | [`telemetry`] | Growable per-core-element gauge table |
//! | [`store`] | Object store interface |
//! | [`runtime`] | Embeddable runtime owning the shared registries |
//!
//! # Task Lifecycle
//!
//! ```text
//!   CREATED ─► ACCESSES_PROCESSED ─► SCHEDULED ─► SUBMITTED ─► DATA_RECEIVED
//!                                        ▲            │
//!                                  retry │            ▼
//!                                        └──── EXECUTED(outcome)
//!                                                     │
//!              any non-terminal ──► CANCELLED         │
//!                                       │             ▼
//!                                       └──► COMPLETED | FAILED
//! ```
//!
//! Exactly one outcome (successful, aborted, error, failed, exception) is
//! accepted per submitted attempt. `COMPLETED` and `FAILED` are final.
//!
//! # Telemetry
//!
//! | Gauge | Updated by |
//! |-------|------------|
//! | `taskweave.pend_tasks` | +1 on submission, -1 when the attempt ends |
//! | `taskweave.exec_tasks` | successful execution (cumulative profile) |
//! | `taskweave.min_time` / `avg_time` / `max_time` | successful execution (cumulative profile) |
//! | `taskweave.node_info` | node feature updates |
//!
//! Telemetry never affects task outcomes: an inconsistent update is logged and
//! the gauge keeps its last value.

#![deny(missing_docs)]

pub mod barrier;
pub mod catalog;
pub mod config;
pub mod error;
pub mod monitor;
pub mod parameter;
pub mod profile;
pub mod resources;
pub mod runtime;
pub mod store;
pub mod task;
pub mod telemetry;

pub use error::{CoreError, Result};
pub use runtime::CoordinatorRuntime;
