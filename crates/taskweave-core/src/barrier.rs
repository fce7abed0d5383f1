// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Transfer completion barrier.
//!
//! A job cannot be submitted until every input it needs has reached the
//! worker. The owner registers one operation per transfer with
//! [`TransferBarrier::add_operation`], then calls [`TransferBarrier::enable`]
//! once it has registered them all. The transport reports each transfer
//! through [`TransferBarrier::notify_completion`] or
//! [`TransferBarrier::notify_failure`].
//!
//! The barrier fires its [`JobContinuation`] exactly once, when nothing is
//! pending and it has been enabled, whichever happens last:
//!
//! ```text
//!   add_operation ──► pending += 1
//!   notify_*      ──► pending -= 1 (errors += 1 on failure) ──┐
//!   enable        ──► enabled = true ────────────────────────┤
//!                                                            ▼
//!                              pending == 0 && enabled && !fired
//!                                 │                     │
//!                            errors == 0           errors > 0
//!                                 ▼                     ▼
//!                              ready()          failed(errors, total)
//! ```
//!
//! Every mutation and the fire decision happen under one lock. The
//! continuation runs after the lock is released.
//!
//! [`TransferBarrier::enable`] is a promise that no more operations will be
//! added; the barrier does not detect a caller breaking it.

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Role of the data moved by job transfers, used in diagnostics.
pub const JOB_FILE_ROLE: &str = "JOB_FILE";

/// Identifier of a job (one execution attempt of a task on a resource).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A data transfer the barrier waits for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataOperation {
    id: Uuid,
    name: String,
}

impl DataOperation {
    /// Create an operation for the named data (e.g. a renaming like `d3v2`).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }

    /// Unique operation id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name of the transferred data.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Failure summary handed to [`JobContinuation::failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    /// Number of failed transfers.
    pub errors: usize,
    /// Number of transfers registered.
    pub total: usize,
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} transfers failed", self.errors, self.total)
    }
}

/// Terminal outcome of a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BarrierOutcome {
    /// Every transfer completed; the job was submitted.
    Ready,
    /// At least one transfer failed.
    Failed(FailureReport),
    /// The job was cancelled before the barrier quiesced.
    Cancelled,
}

/// What to do once a barrier fires. Exactly one method is called, once.
pub trait JobContinuation: Send {
    /// All inputs are in place: submit the job.
    fn ready(self: Box<Self>, job_id: JobId);

    /// Some inputs could not be transferred.
    fn failed(self: Box<Self>, job_id: JobId, report: FailureReport);

    /// The job was cancelled before its inputs settled.
    fn cancelled(self: Box<Self>, job_id: JobId) {
        debug!(%job_id, "Job cancelled before submission");
    }
}

/// [`JobContinuation`] built from two closures.
pub struct FnContinuation<R, F> {
    on_ready: R,
    on_failed: F,
}

/// Build a continuation from a ready closure and a failure closure.
pub fn continuation<R, F>(on_ready: R, on_failed: F) -> FnContinuation<R, F>
where
    R: FnOnce(JobId) + Send + 'static,
    F: FnOnce(JobId, FailureReport) + Send + 'static,
{
    FnContinuation {
        on_ready,
        on_failed,
    }
}

impl<R, F> JobContinuation for FnContinuation<R, F>
where
    R: FnOnce(JobId) + Send + 'static,
    F: FnOnce(JobId, FailureReport) + Send + 'static,
{
    fn ready(self: Box<Self>, job_id: JobId) {
        (self.on_ready)(job_id)
    }

    fn failed(self: Box<Self>, job_id: JobId, report: FailureReport) {
        (self.on_failed)(job_id, report)
    }
}

/// Counters of a barrier at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BarrierStatus {
    /// Transfers not yet resolved.
    pub pending: usize,
    /// Failed transfers so far.
    pub errors: usize,
    /// Transfers registered so far.
    pub total: usize,
    /// Whether registration is complete.
    pub enabled: bool,
    /// Outcome, once fired.
    pub outcome: Option<BarrierOutcome>,
}

struct BarrierState {
    pending: usize,
    errors: usize,
    total: usize,
    enabled: bool,
    outcome: Option<BarrierOutcome>,
    continuation: Option<Box<dyn JobContinuation>>,
}

type Firing = (Box<dyn JobContinuation>, BarrierOutcome);

impl BarrierState {
    /// Decide whether this step fires the barrier. Must be called under the lock.
    fn settle(&mut self) -> Option<Firing> {
        if self.pending != 0 || !self.enabled || self.outcome.is_some() {
            return None;
        }
        let outcome = if self.errors == 0 {
            BarrierOutcome::Ready
        } else {
            BarrierOutcome::Failed(FailureReport {
                errors: self.errors,
                total: self.total,
            })
        };
        self.outcome = Some(outcome);
        self.continuation.take().map(|continuation| (continuation, outcome))
    }

    fn resolve_one(&mut self, job_id: JobId, operation: &DataOperation) -> Result<()> {
        if self.pending == 0 {
            warn!(
                %job_id,
                operation = %operation.name(),
                "Notification without a pending operation rejected"
            );
            return Err(CoreError::UnmatchedNotification {
                job_id,
                operation: operation.name().to_string(),
            });
        }
        self.pending -= 1;
        Ok(())
    }
}

/// Aggregates the input transfers of one job.
pub struct TransferBarrier {
    job_id: JobId,
    state: Mutex<BarrierState>,
}

impl fmt::Debug for TransferBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferBarrier")
            .field("job_id", &self.job_id)
            .field("status", &self.status())
            .finish()
    }
}

impl TransferBarrier {
    /// Create a disabled barrier with no pending operations.
    pub fn new(job_id: JobId, continuation: impl JobContinuation + 'static) -> Self {
        Self {
            job_id,
            state: Mutex::new(BarrierState {
                pending: 0,
                errors: 0,
                total: 0,
                enabled: false,
                outcome: None,
                continuation: Some(Box::new(continuation)),
            }),
        }
    }

    /// The job this barrier gates.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Register one more pending transfer.
    pub fn add_operation(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.outcome.is_some() {
            warn!(job_id = %self.job_id, "Operation added after the barrier fired");
            return Err(CoreError::BarrierAlreadyFired {
                job_id: self.job_id,
                operation: "add_operation".to_string(),
            });
        }
        state.pending += 1;
        state.total += 1;
        debug!(job_id = %self.job_id, pending = state.pending, "Transfer registered");
        Ok(())
    }

    /// A transfer finished successfully.
    ///
    /// Returns the outcome if this call fired the barrier.
    pub fn notify_completion(&self, operation: &DataOperation) -> Result<Option<BarrierOutcome>> {
        let firing = {
            let mut state = self.state.lock();
            state.resolve_one(self.job_id, operation)?;
            debug!(
                job_id = %self.job_id,
                operation = %operation.name(),
                pending = state.pending,
                "Transfer completed"
            );
            state.settle()
        };
        Ok(self.dispatch(firing))
    }

    /// A transfer failed. The failure is logged and counted.
    ///
    /// Returns the outcome if this call fired the barrier.
    pub fn notify_failure(
        &self,
        operation: &DataOperation,
        cause: &(dyn std::error::Error + 'static),
    ) -> Result<Option<BarrierOutcome>> {
        error!(
            job_id = %self.job_id,
            thread = std::thread::current().name().unwrap_or("unnamed"),
            operation = %operation.name(),
            role = JOB_FILE_ROLE,
            error = %cause,
            "Data operation failed, operation end state is FAILED"
        );
        let firing = {
            let mut state = self.state.lock();
            state.resolve_one(self.job_id, operation)?;
            state.errors += 1;
            state.settle()
        };
        Ok(self.dispatch(firing))
    }

    /// Declare that every operation has been registered.
    ///
    /// Fires immediately if nothing is pending. Returns the outcome if this
    /// call fired the barrier.
    pub fn enable(&self) -> Result<Option<BarrierOutcome>> {
        let firing = {
            let mut state = self.state.lock();
            if let Some(BarrierOutcome::Cancelled) = state.outcome {
                return Err(CoreError::BarrierAlreadyFired {
                    job_id: self.job_id,
                    operation: "enable".to_string(),
                });
            }
            if state.enabled {
                warn!(job_id = %self.job_id, "Barrier enabled twice");
                return Ok(None);
            }
            state.enabled = true;
            debug!(job_id = %self.job_id, pending = state.pending, "Barrier enabled");
            state.settle()
        };
        Ok(self.dispatch(firing))
    }

    /// Cancel the job. Suppresses any later firing.
    ///
    /// Returns true if the cancellation won the race and the continuation's
    /// `cancelled` path ran; false if the barrier had already fired.
    /// Transfers still in flight may keep notifying; they are counted but
    /// never fire.
    pub fn cancel(&self) -> bool {
        let continuation = {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                debug!(job_id = %self.job_id, "Cancellation after the barrier fired ignored");
                return false;
            }
            state.outcome = Some(BarrierOutcome::Cancelled);
            state.continuation.take()
        };
        debug!(job_id = %self.job_id, "Barrier cancelled");
        if let Some(continuation) = continuation {
            continuation.cancelled(self.job_id);
        }
        true
    }

    /// Current counters.
    pub fn status(&self) -> BarrierStatus {
        let state = self.state.lock();
        BarrierStatus {
            pending: state.pending,
            errors: state.errors,
            total: state.total,
            enabled: state.enabled,
            outcome: state.outcome,
        }
    }

    /// Whether the barrier has reached a terminal outcome.
    pub fn is_fired(&self) -> bool {
        self.state.lock().outcome.is_some()
    }

    fn dispatch(&self, firing: Option<Firing>) -> Option<BarrierOutcome> {
        let (continuation, outcome) = firing?;
        match outcome {
            BarrierOutcome::Ready => {
                debug!(job_id = %self.job_id, "All transfers done, submitting job");
                continuation.ready(self.job_id);
            }
            BarrierOutcome::Failed(report) => {
                error!(job_id = %self.job_id, %report, "Job input transfers failed");
                continuation.failed(self.job_id, report);
            }
            BarrierOutcome::Cancelled => continuation.cancelled(self.job_id),
        }
        Some(outcome)
    }
}
