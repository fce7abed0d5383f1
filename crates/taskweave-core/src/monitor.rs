// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task lifecycle monitor.
//!
//! The engine drives every task through a closed set of [`LifecycleEvent`]s.
//! [`TaskLifecycle`] validates the order of those events; [`MonitoredTask`]
//! wraps it, applies the telemetry side effects and hands a
//! [`LifecycleRecord`] to an optional [`LifecycleDispatcher`].
//!
//! Permitted order (a task may skip steps, never go back):
//!
//! ```text
//! Created → AccessesProcessed → Scheduled → Submitted → DataReceived
//!         → ValueGenerated* → <outcome> → Completed | Failed
//! ```
//!
//! After an outcome a retry may schedule and submit again. Cancellation is
//! accepted from any non-terminal state and may only be followed by
//! `Completion` or `Failure`. Nothing is accepted after those two.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::barrier::{FailureReport, JobContinuation, JobId, TransferBarrier};
use crate::catalog::CoreId;
use crate::error::{CoreError, Result};
use crate::parameter::DataType;
use crate::profile::Profile;
use crate::task::TaskId;
use crate::telemetry::TelemetryTable;

/// Per-attempt execution outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionOutcome {
    /// The job ran to completion.
    Successful,
    /// The job was aborted by the execution layer.
    Aborted,
    /// The job ended with an error.
    Error,
    /// The job could not be run.
    Failed,
    /// The task raised an application exception.
    Exception,
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionOutcome::Successful => "SUCCESSFUL",
            ExecutionOutcome::Aborted => "ABORTED",
            ExecutionOutcome::Error => "ERROR",
            ExecutionOutcome::Failed => "FAILED",
            ExecutionOutcome::Exception => "EXCEPTION",
        };
        f.write_str(name)
    }
}

/// State of a monitored task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "state", content = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// No event received yet.
    New,
    /// Task object built and registered.
    Created,
    /// Data dependencies resolved.
    AccessesProcessed,
    /// Resource and implementation chosen.
    Scheduled,
    /// Job handed to the execution layer.
    Submitted,
    /// Worker confirmed the input data.
    DataReceived,
    /// The current attempt ended.
    Executed(ExecutionOutcome),
    /// Cancellation preempted the task.
    Cancelled,
    /// Final success.
    Completed,
    /// Final failure.
    Failed,
}

impl TaskState {
    fn rank(self) -> u8 {
        match self {
            TaskState::New => 0,
            TaskState::Created => 1,
            TaskState::AccessesProcessed => 2,
            TaskState::Scheduled => 3,
            TaskState::Submitted => 4,
            TaskState::DataReceived => 5,
            TaskState::Executed(_) => 6,
            TaskState::Cancelled => 7,
            TaskState::Completed | TaskState::Failed => 8,
        }
    }

    /// Whether no further event may be delivered.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::New => f.write_str("NEW"),
            TaskState::Created => f.write_str("CREATED"),
            TaskState::AccessesProcessed => f.write_str("ACCESSES_PROCESSED"),
            TaskState::Scheduled => f.write_str("SCHEDULED"),
            TaskState::Submitted => f.write_str("SUBMITTED"),
            TaskState::DataReceived => f.write_str("DATA_RECEIVED"),
            TaskState::Executed(outcome) => write!(f, "EXECUTED({outcome})"),
            TaskState::Cancelled => f.write_str("CANCELLED"),
            TaskState::Completed => f.write_str("COMPLETED"),
            TaskState::Failed => f.write_str("FAILED"),
        }
    }
}

/// Where a generated output value ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedValue {
    /// Type of the produced value.
    pub data_type: DataType,
    /// Location of the value (worker path, object id, ...).
    pub location: String,
    /// Data identifier the value was registered under.
    pub data_id: String,
    /// Values generated for the elements of a collection.
    pub sub_values: Vec<GeneratedValue>,
}

impl GeneratedValue {
    /// A value without nested elements.
    pub fn new(data_type: DataType, location: impl Into<String>, data_id: impl Into<String>) -> Self {
        Self {
            data_type,
            location: location.into(),
            data_id: data_id.into(),
            sub_values: Vec::new(),
        }
    }
}

/// Events the engine delivers to a monitored task.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// Task object built and registered.
    Creation,
    /// Data dependencies resolved to concrete producers and versions.
    AccessesProcessed,
    /// Resource and implementation chosen.
    Schedule,
    /// Job handed to the execution layer. Opens an attempt.
    Submission,
    /// Worker confirmed all inputs.
    DataReception,
    /// An output parameter's value is known.
    ValueGenerated {
        /// Index of the output parameter.
        param_index: usize,
        /// Where the value lives.
        value: GeneratedValue,
    },
    /// Attempt succeeded, with the core element's cumulative profile.
    SuccessfulExecution {
        /// Latest cumulative profile, if the worker reported one.
        profile: Option<Profile>,
    },
    /// Attempt aborted.
    AbortedExecution,
    /// Attempt ended with an error.
    ErrorExecution,
    /// Attempt could not run.
    FailedExecution,
    /// Attempt raised an exception.
    Exception,
    /// External cancellation.
    Cancellation,
    /// Task completed.
    Completion,
    /// Task failed.
    Failure,
}

impl LifecycleEvent {
    /// Event name used in logs and records.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Creation => "creation",
            LifecycleEvent::AccessesProcessed => "accesses_processed",
            LifecycleEvent::Schedule => "schedule",
            LifecycleEvent::Submission => "submission",
            LifecycleEvent::DataReception => "data_reception",
            LifecycleEvent::ValueGenerated { .. } => "value_generated",
            LifecycleEvent::SuccessfulExecution { .. } => "successful_execution",
            LifecycleEvent::AbortedExecution => "aborted_execution",
            LifecycleEvent::ErrorExecution => "error_execution",
            LifecycleEvent::FailedExecution => "failed_execution",
            LifecycleEvent::Exception => "exception",
            LifecycleEvent::Cancellation => "cancellation",
            LifecycleEvent::Completion => "completion",
            LifecycleEvent::Failure => "failure",
        }
    }

    fn outcome(&self) -> Option<ExecutionOutcome> {
        match self {
            LifecycleEvent::SuccessfulExecution { .. } => Some(ExecutionOutcome::Successful),
            LifecycleEvent::AbortedExecution => Some(ExecutionOutcome::Aborted),
            LifecycleEvent::ErrorExecution => Some(ExecutionOutcome::Error),
            LifecycleEvent::FailedExecution => Some(ExecutionOutcome::Failed),
            LifecycleEvent::Exception => Some(ExecutionOutcome::Exception),
            _ => None,
        }
    }
}

/// Telemetry consequences of one accepted event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GaugeEffect {
    /// An attempt was opened: one more pending task.
    pub attempt_opened: bool,
    /// The open attempt was closed: one less pending task.
    pub attempt_closed: bool,
    /// The attempt succeeded: refresh the execution gauges.
    pub succeeded: bool,
}

/// Transition validator for one task.
#[derive(Debug, Clone)]
pub struct TaskLifecycle {
    task_id: TaskId,
    state: TaskState,
    attempts: u32,
    attempt_open: bool,
    generated: HashSet<usize>,
    history: Vec<TaskState>,
}

impl TaskLifecycle {
    /// A tracker in state [`TaskState::New`].
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            state: TaskState::New,
            attempts: 0,
            attempt_open: false,
            generated: HashSet::new(),
            history: Vec::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Number of submissions so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether a submitted attempt has not reported its outcome.
    pub fn attempt_open(&self) -> bool {
        self.attempt_open
    }

    /// States entered so far, in order. Value generation does not change state.
    pub fn history(&self) -> &[TaskState] {
        &self.history
    }

    /// Validate `event` against the current state and apply it.
    pub fn apply(&mut self, event: &LifecycleEvent) -> Result<GaugeEffect> {
        if self.state.is_terminal() {
            return Err(CoreError::TaskTerminated {
                task_id: self.task_id,
                event: event.name().to_string(),
            });
        }

        if let LifecycleEvent::ValueGenerated { param_index, .. } = event {
            return self.apply_value(*param_index).map(|()| GaugeEffect::default());
        }

        let next = self
            .next_state(event)
            .ok_or_else(|| self.invalid(event.name()))?;
        let mut effect = GaugeEffect::default();
        match event {
            LifecycleEvent::Submission => {
                self.attempts += 1;
                self.attempt_open = true;
                self.generated.clear();
                effect.attempt_opened = true;
            }
            LifecycleEvent::Cancellation | LifecycleEvent::Completion | LifecycleEvent::Failure => {
                effect.attempt_closed = std::mem::take(&mut self.attempt_open);
            }
            _ if event.outcome().is_some() => {
                effect.attempt_closed = std::mem::take(&mut self.attempt_open);
                effect.succeeded = matches!(event, LifecycleEvent::SuccessfulExecution { .. });
            }
            _ => {}
        }
        self.state = next;
        self.history.push(next);
        Ok(effect)
    }

    fn next_state(&self, event: &LifecycleEvent) -> Option<TaskState> {
        let current = self.state;
        if current == TaskState::Cancelled {
            return match event {
                LifecycleEvent::Completion => Some(TaskState::Completed),
                LifecycleEvent::Failure => Some(TaskState::Failed),
                _ => None,
            };
        }
        let target = match event {
            LifecycleEvent::Cancellation => return Some(TaskState::Cancelled),
            LifecycleEvent::Completion => return Some(TaskState::Completed),
            LifecycleEvent::Failure => return Some(TaskState::Failed),
            LifecycleEvent::Creation => TaskState::Created,
            LifecycleEvent::AccessesProcessed => TaskState::AccessesProcessed,
            LifecycleEvent::Schedule => TaskState::Scheduled,
            LifecycleEvent::Submission => TaskState::Submitted,
            LifecycleEvent::DataReception => TaskState::DataReceived,
            LifecycleEvent::ValueGenerated { .. } => return None,
            other => TaskState::Executed(other.outcome()?),
        };
        let retry = matches!(current, TaskState::Executed(_))
            && matches!(target, TaskState::Scheduled | TaskState::Submitted);
        (retry || target.rank() > current.rank()).then_some(target)
    }

    fn apply_value(&mut self, param_index: usize) -> Result<()> {
        let accepting = matches!(
            self.state,
            TaskState::Submitted | TaskState::DataReceived | TaskState::Executed(_)
        );
        if !accepting {
            return Err(self.invalid("value_generated"));
        }
        if !self.generated.insert(param_index) {
            return Err(CoreError::DuplicateValue {
                task_id: self.task_id,
                param_index,
            });
        }
        Ok(())
    }

    fn invalid(&self, event: &str) -> CoreError {
        CoreError::InvalidTransition {
            task_id: self.task_id,
            state: self.state.to_string(),
            event: event.to_string(),
        }
    }
}

/// What listeners receive for every accepted event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleRecord {
    /// Task the event belongs to.
    pub task_id: TaskId,
    /// Core element of the task.
    pub core_id: CoreId,
    /// Event name.
    pub event: &'static str,
    /// State after the event.
    pub state: TaskState,
    /// Submission attempt the event belongs to.
    pub attempt: u32,
    /// Output index and value carried by a `value_generated` event.
    pub value: Option<(usize, GeneratedValue)>,
    /// When the event was accepted.
    pub at: DateTime<Utc>,
}

/// Consumer of lifecycle records, run off the caller's thread.
#[async_trait]
pub trait LifecycleListener: Send + Sync {
    /// Handle one record.
    async fn on_event(&self, record: LifecycleRecord);
}

/// Bounded, non-blocking hand-off of lifecycle records to a listener.
///
/// Sending never waits. When the queue is full the record is dropped and a
/// warning is logged.
#[derive(Debug, Clone)]
pub struct LifecycleDispatcher {
    tx: mpsc::Sender<LifecycleRecord>,
}

impl LifecycleDispatcher {
    /// Create a dispatcher and the receiving end of its queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<LifecycleRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Create a dispatcher whose records are drained into `listener` by a
    /// spawned task. The task stops once `shutdown` flips to true, after
    /// delivering what is already queued.
    pub fn spawn(
        capacity: usize,
        listener: Arc<dyn LifecycleListener>,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (dispatcher, rx) = Self::channel(capacity);
        let handle = tokio::spawn(drain(rx, listener, shutdown));
        (dispatcher, handle)
    }

    /// Queue a record. Returns false if it was dropped.
    pub fn dispatch(&self, record: LifecycleRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(record)) => {
                warn!(
                    task_id = %record.task_id,
                    event = record.event,
                    "Lifecycle queue full, record dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                debug!(
                    task_id = %record.task_id,
                    event = record.event,
                    "Lifecycle listener gone, record dropped"
                );
                false
            }
        }
    }
}

async fn drain(
    mut rx: mpsc::Receiver<LifecycleRecord>,
    listener: Arc<dyn LifecycleListener>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            record = rx.recv() => {
                match record {
                    Some(record) => listener.on_event(record).await,
                    None => return,
                }
            }
        }
    }

    let mut delivered = 0usize;
    while let Ok(record) = rx.try_recv() {
        listener.on_event(record).await;
        delivered += 1;
    }
    debug!(delivered, "Lifecycle listener drained");
}

/// A task instance under observation.
pub struct MonitoredTask {
    task_id: TaskId,
    core_id: CoreId,
    lifecycle: Mutex<TaskLifecycle>,
    telemetry: Option<Arc<TelemetryTable>>,
    dispatcher: Option<LifecycleDispatcher>,
    barrier: Mutex<Option<Weak<TransferBarrier>>>,
}

impl fmt::Debug for MonitoredTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoredTask")
            .field("task_id", &self.task_id)
            .field("core_id", &self.core_id)
            .field("state", &self.state())
            .finish()
    }
}

impl MonitoredTask {
    /// Monitor a task of the given core element.
    pub fn new(task_id: TaskId, core_id: CoreId) -> Self {
        Self {
            task_id,
            core_id,
            lifecycle: Mutex::new(TaskLifecycle::new(task_id)),
            telemetry: None,
            dispatcher: None,
            barrier: Mutex::new(None),
        }
    }

    /// Feed pending and execution gauges into `telemetry`.
    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryTable>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Forward accepted events to `dispatcher`.
    pub fn with_dispatcher(mut self, dispatcher: LifecycleDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Task id.
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Core element of the task.
    pub fn core_id(&self) -> CoreId {
        self.core_id
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        self.lifecycle.lock().state()
    }

    /// States entered so far.
    pub fn history(&self) -> Vec<TaskState> {
        self.lifecycle.lock().history().to_vec()
    }

    /// Tie the barrier gating this task's next submission to the task.
    ///
    /// Cancelling the task cancels the barrier, so its transfers can no
    /// longer submit the job. A task that is already cancelled cancels the
    /// barrier right away.
    pub fn attach_barrier(&self, barrier: &Arc<TransferBarrier>) {
        *self.barrier.lock() = Some(Arc::downgrade(barrier));
        if self.state() == TaskState::Cancelled {
            self.disarm();
        }
    }

    fn disarm(&self) {
        let barrier = self.barrier.lock().take();
        if let Some(barrier) = barrier.and_then(|weak| weak.upgrade()) {
            if barrier.cancel() {
                debug!(task_id = %self.task_id, job_id = %barrier.job_id(), "Pending job cancelled with its task");
            }
        }
    }

    /// Cancel the task and the job waiting on its inputs, if any.
    pub fn cancel(&self) -> Result<TaskState> {
        self.handle(LifecycleEvent::Cancellation)
    }

    /// Deliver one event.
    ///
    /// Rejected events leave state and telemetry untouched. An accepted
    /// `Cancellation` also cancels the attached barrier.
    pub fn handle(&self, event: LifecycleEvent) -> Result<TaskState> {
        let cancelling = matches!(event, LifecycleEvent::Cancellation);
        let mut lifecycle = self.lifecycle.lock();
        let effect = match lifecycle.apply(&event) {
            Ok(effect) => effect,
            Err(e) => {
                warn!(
                    task_id = %self.task_id,
                    core_id = %self.core_id,
                    event = event.name(),
                    error = %e,
                    "Lifecycle event rejected"
                );
                return Err(e);
            }
        };
        let state = lifecycle.state();

        if let Some(telemetry) = &self.telemetry {
            if effect.attempt_opened {
                telemetry.on_new_task(self.core_id);
            }
            if effect.attempt_closed {
                telemetry.on_task_started(self.core_id);
            }
            if let (true, LifecycleEvent::SuccessfulExecution { profile }) = (effect.succeeded, &event) {
                telemetry.on_task_finished(self.core_id, profile.as_ref());
            }
        }

        match state {
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled => {
                info!(task_id = %self.task_id, core_id = %self.core_id, %state, "Task lifecycle ended");
            }
            _ => {
                debug!(task_id = %self.task_id, event = event.name(), %state, "Lifecycle event accepted");
            }
        }

        if let Some(dispatcher) = &self.dispatcher {
            let name = event.name();
            let value = match event {
                LifecycleEvent::ValueGenerated { param_index, value } => Some((param_index, value)),
                _ => None,
            };
            dispatcher.dispatch(LifecycleRecord {
                task_id: self.task_id,
                core_id: self.core_id,
                event: name,
                state,
                attempt: lifecycle.attempts(),
                value,
                at: Utc::now(),
            });
        }
        drop(lifecycle);

        if cancelling {
            self.disarm();
        }
        Ok(state)
    }
}

/// Barrier continuation that submits a monitored task once its inputs are in
/// place, reports the attempt as failed, or cancels the task with the job.
#[derive(Debug, Clone)]
pub struct SubmitOnReady {
    task: Arc<MonitoredTask>,
}

impl SubmitOnReady {
    /// Continuation for `task`.
    pub fn new(task: Arc<MonitoredTask>) -> Self {
        Self { task }
    }
}

impl JobContinuation for SubmitOnReady {
    fn ready(self: Box<Self>, job_id: JobId) {
        if let Err(e) = self.task.handle(LifecycleEvent::Submission) {
            warn!(%job_id, task_id = %self.task.task_id(), error = %e, "Submission not recorded");
        }
    }

    fn failed(self: Box<Self>, job_id: JobId, report: FailureReport) {
        warn!(%job_id, task_id = %self.task.task_id(), %report, "Job inputs unavailable");
        if let Err(e) = self.task.handle(LifecycleEvent::FailedExecution) {
            warn!(%job_id, task_id = %self.task.task_id(), error = %e, "Failure not recorded");
        }
    }

    fn cancelled(self: Box<Self>, job_id: JobId) {
        let state = self.task.state();
        if state == TaskState::Cancelled || state.is_terminal() {
            debug!(%job_id, task_id = %self.task.task_id(), %state, "Job cancelled");
            return;
        }
        if let Err(e) = self.task.handle(LifecycleEvent::Cancellation) {
            warn!(%job_id, task_id = %self.task.task_id(), error = %e, "Cancellation not recorded");
        }
    }
}
