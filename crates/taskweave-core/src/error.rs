// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for taskweave-core.
//!
//! Provides a unified error type with stable error codes for diagnostics.

use thiserror::Error;

use crate::barrier::JobId;
use crate::catalog::CoreId;
use crate::task::TaskId;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur while coordinating tasks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A task signature could not be registered because it is malformed.
    #[error("Invalid signature '{signature}': {reason}")]
    InvalidSignature {
        /// The offending signature (possibly partial).
        signature: String,
        /// Why the signature was rejected.
        reason: String,
    },

    /// An implementation was registered twice with different definitions.
    #[error("Implementation '{implementation}' of core element '{signature}' conflicts with an existing registration")]
    SignatureConflict {
        /// The core element signature.
        signature: String,
        /// The implementation signature that conflicts.
        implementation: String,
    },

    /// A core element id that was never assigned by the catalog.
    #[error("Core element {core_id} is not registered")]
    UnknownCoreElement {
        /// The unknown core element id.
        core_id: CoreId,
    },

    /// A lifecycle event arrived out of order.
    #[error("Task {task_id} cannot handle '{event}' while '{state}'")]
    InvalidTransition {
        /// The task receiving the event.
        task_id: TaskId,
        /// Lifecycle state at the time of the event.
        state: String,
        /// The rejected event.
        event: String,
    },

    /// A lifecycle event arrived after the task reached Completion or Failure.
    #[error("Task {task_id} already terminated, ignoring '{event}'")]
    TaskTerminated {
        /// The terminated task.
        task_id: TaskId,
        /// The rejected event.
        event: String,
    },

    /// An output parameter reported its generated value twice.
    #[error("Task {task_id} already generated a value for parameter {param_index}")]
    DuplicateValue {
        /// The task reporting the value.
        task_id: TaskId,
        /// The parameter index reported twice.
        param_index: usize,
    },

    /// An operation touched a transfer barrier that has already fired.
    #[error("Transfer barrier of job {job_id} already fired, rejecting '{operation}'")]
    BarrierAlreadyFired {
        /// The job owning the barrier.
        job_id: JobId,
        /// The rejected operation.
        operation: String,
    },

    /// A completion/failure notification without a matching registered operation.
    #[error("Transfer barrier of job {job_id} has no pending operation for '{operation}'")]
    UnmatchedNotification {
        /// The job owning the barrier.
        job_id: JobId,
        /// The data operation that was not registered.
        operation: String,
    },

    /// Input validation failed.
    #[error("Validation error for '{field}': {message}")]
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidSignature { .. } => "INVALID_SIGNATURE",
            Self::SignatureConflict { .. } => "SIGNATURE_CONFLICT",
            Self::UnknownCoreElement { .. } => "UNKNOWN_CORE_ELEMENT",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::TaskTerminated { .. } => "TASK_TERMINATED",
            Self::DuplicateValue { .. } => "DUPLICATE_VALUE",
            Self::BarrierAlreadyFired { .. } => "BARRIER_ALREADY_FIRED",
            Self::UnmatchedNotification { .. } => "UNMATCHED_NOTIFICATION",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
        }
    }

    /// Registration errors are fatal configuration errors and must not be retried.
    pub fn is_registration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidSignature { .. } | Self::SignatureConflict { .. }
        )
    }
}
