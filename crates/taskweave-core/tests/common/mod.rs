// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for taskweave-core integration tests.
//!
//! Provides TestContext for setting up a runtime with a recording listener.

#![allow(dead_code)]

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use taskweave_core::barrier::{FailureReport, JobContinuation, JobId};
use taskweave_core::monitor::{LifecycleListener, LifecycleRecord};
use taskweave_core::runtime::CoordinatorRuntime;

/// Listener that keeps every record it receives.
#[derive(Default)]
pub struct RecordingListener {
    records: Mutex<Vec<LifecycleRecord>>,
}

impl RecordingListener {
    pub fn records(&self) -> Vec<LifecycleRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl LifecycleListener for RecordingListener {
    async fn on_event(&self, record: LifecycleRecord) {
        self.records.lock().push(record);
    }
}

/// Test context holding a started runtime and its listener.
pub struct TestContext {
    pub runtime: CoordinatorRuntime,
    pub listener: Arc<RecordingListener>,
}

impl TestContext {
    pub async fn new() -> Self {
        let listener = Arc::new(RecordingListener::default());
        let runtime = CoordinatorRuntime::builder()
            .computing_units(4)
            .listener(listener.clone())
            .build()
            .expect("valid runtime config")
            .start()
            .await
            .expect("runtime starts");
        Self { runtime, listener }
    }

    /// Shut the runtime down and return every delivered record.
    pub async fn finish(self) -> Vec<LifecycleRecord> {
        self.runtime.shutdown().await.expect("clean shutdown");
        self.listener.records()
    }
}

/// Continuation counting how often each path fired.
#[derive(Default)]
pub struct FireCounter {
    pub ready: AtomicUsize,
    pub failed: AtomicUsize,
    pub cancelled: AtomicUsize,
    pub reported_errors: AtomicUsize,
    pub reported_total: AtomicUsize,
}

impl FireCounter {
    pub fn fired(&self) -> usize {
        self.ready.load(Ordering::SeqCst)
            + self.failed.load(Ordering::SeqCst)
            + self.cancelled.load(Ordering::SeqCst)
    }

    pub fn continuation(self: &Arc<Self>) -> CountingContinuation {
        CountingContinuation(self.clone())
    }
}

pub struct CountingContinuation(Arc<FireCounter>);

impl JobContinuation for CountingContinuation {
    fn ready(self: Box<Self>, _job_id: JobId) {
        self.0.ready.fetch_add(1, Ordering::SeqCst);
    }

    fn failed(self: Box<Self>, _job_id: JobId, report: FailureReport) {
        self.0.reported_errors.store(report.errors, Ordering::SeqCst);
        self.0.reported_total.store(report.total, Ordering::SeqCst);
        self.0.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn cancelled(self: Box<Self>, _job_id: JobId) {
        self.0.cancelled.fetch_add(1, Ordering::SeqCst);
    }
}

/// Transfer failure used as the notification cause.
#[derive(Debug)]
pub struct TransferError(pub String);

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transfer failed: {}", self.0)
    }
}

impl std::error::Error for TransferError {}
