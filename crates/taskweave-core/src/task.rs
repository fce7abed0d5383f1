// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task descriptors.
//!
//! A [`TaskDescriptor`] is built once per submitted invocation and never
//! changes afterwards. Building it classifies the parameters and resolves the
//! core element through the [`CoreCatalog`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::{CoreCatalog, CoreId, TaskSignature};
use crate::error::{CoreError, Result};
use crate::parameter::{Parameter, has_return_value, real_parameter_count};

/// Node count of a task that runs on a single node.
pub const SINGLE_NODE: u32 = 1;

/// Identifier of a task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether the task calls a method or a remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskKind {
    /// Method (or function) call.
    Method,
    /// Remote service operation.
    Service,
}

/// What the runtime should do when the task fails. Descriptive only; the
/// policy is applied outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnFailure {
    /// Resubmit the task.
    #[default]
    Retry,
    /// Cancel the tasks depending on this one.
    CancelSuccessors,
    /// Fail the whole application.
    Fail,
    /// Ignore the failure and continue with the successors.
    Ignore,
}

/// Scheduling flags of a method task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Schedule ahead of non-priority tasks.
    pub priority: bool,
    /// Number of nodes the task spans.
    pub num_nodes: u32,
    /// Run the task on every worker.
    pub replicated: bool,
    /// Spread instances of the task across workers.
    pub distributed: bool,
    /// Failure management policy.
    pub on_failure: OnFailure,
    /// Execution time-out.
    pub time_out: Option<Duration>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            priority: false,
            num_nodes: SINGLE_NODE,
            replicated: false,
            distributed: false,
            on_failure: OnFailure::default(),
            time_out: None,
        }
    }
}

/// Immutable description of one task invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskDescriptor {
    kind: TaskKind,
    name: String,
    core_id: CoreId,
    options: TaskOptions,
    parameters: Vec<Parameter>,
    has_target: bool,
    has_return: bool,
}

impl TaskDescriptor {
    /// Describe a method invocation.
    ///
    /// `has_target` tells whether the invocation has a receiver object,
    /// passed as the trailing parameter (before the return slot, if any).
    pub fn method(
        catalog: &CoreCatalog,
        declaring_class: &str,
        method_name: &str,
        options: TaskOptions,
        has_target: bool,
        parameters: Vec<Parameter>,
    ) -> Result<Self> {
        if options.num_nodes < SINGLE_NODE {
            return Err(CoreError::ValidationError {
                field: "num_nodes".to_string(),
                message: "a task needs at least one node".to_string(),
            });
        }
        let signature = TaskSignature::method(declaring_class, method_name);
        Self::build(catalog, TaskKind::Method, signature, options, has_target, parameters)
    }

    /// Describe a service invocation. Service tasks are always single-node,
    /// not replicated and not distributed.
    #[allow(clippy::too_many_arguments)]
    pub fn service(
        catalog: &CoreCatalog,
        namespace: &str,
        service: &str,
        port: &str,
        operation: &str,
        priority: bool,
        has_target: bool,
        parameters: Vec<Parameter>,
    ) -> Result<Self> {
        let signature = TaskSignature::service(namespace, service, port, operation);
        let options = TaskOptions {
            priority,
            ..TaskOptions::default()
        };
        Self::build(catalog, TaskKind::Service, signature, options, has_target, parameters)
    }

    fn build(
        catalog: &CoreCatalog,
        kind: TaskKind,
        signature: TaskSignature,
        options: TaskOptions,
        has_target: bool,
        parameters: Vec<Parameter>,
    ) -> Result<Self> {
        let has_return = has_return_value(&parameters);
        let core_id = catalog.get_core_id(&signature, has_target, has_return, &parameters)?;
        Ok(Self {
            kind,
            name: signature.name().to_string(),
            core_id,
            options,
            parameters,
            has_target,
            has_return,
        })
    }

    /// Method or service task.
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Method or operation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved core element.
    pub fn core_id(&self) -> CoreId {
        self.core_id
    }

    /// Priority flag.
    pub fn has_priority(&self) -> bool {
        self.options.priority
    }

    /// Requested node count.
    pub fn num_nodes(&self) -> u32 {
        self.options.num_nodes
    }

    /// Whether the task runs on a single node.
    pub fn is_single_node(&self) -> bool {
        self.options.num_nodes == SINGLE_NODE
    }

    /// Replication flag.
    pub fn is_replicated(&self) -> bool {
        self.options.replicated
    }

    /// Distribution flag.
    pub fn is_distributed(&self) -> bool {
        self.options.distributed
    }

    /// Failure management policy.
    pub fn on_failure(&self) -> OnFailure {
        self.options.on_failure
    }

    /// Execution time-out.
    pub fn time_out(&self) -> Option<Duration> {
        self.options.time_out
    }

    /// All parameters, including target and return slots.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Parameters of the user-facing call.
    pub fn real_parameters(&self) -> &[Parameter] {
        let count = real_parameter_count(&self.parameters, self.has_target, self.has_return);
        &self.parameters[..count]
    }

    /// Whether the invocation has a receiver object.
    pub fn has_target_object(&self) -> bool {
        self.has_target
    }

    /// Whether the last parameter is a generated return value.
    pub fn has_return_value(&self) -> bool {
        self.has_return
    }
}

impl fmt::Display for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Core id: {}], [Priority: {}], [NumNodes: {}], [MustReplicate: {}], [MustDistribute: {}], [{}(",
            self.core_id,
            self.options.priority,
            self.options.num_nodes,
            self.options.replicated,
            self.options.distributed,
            self.name
        )?;
        for (i, parameter) in self.real_parameters().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", parameter.data_type)?;
        }
        f.write_str(")]")
    }
}
