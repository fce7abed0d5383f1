// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource descriptions.
//!
//! Value types describing what a compute resource offers and what an
//! implementation requires. The scheduler compares the two; this module only
//! answers capacity questions, it never picks a placement.
//!
//! Descriptions are immutable once shared. Updating node features means
//! building a new description and handing the whole value to
//! [`TelemetryTable::on_node_features_changed`](crate::telemetry::TelemetryTable::on_node_features_changed).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of compute unit a processor provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorType {
    /// General purpose cores.
    #[default]
    Cpu,
    /// Graphics accelerator.
    Gpu,
    /// Reconfigurable accelerator.
    Fpga,
    /// Anything else.
    Other,
}

/// A processor of a compute resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Processor {
    /// Processor name, e.g. "MainProcessor".
    pub name: String,
    /// Architecture tag ("x86_64", "aarch64", "[unassigned]").
    pub architecture: String,
    /// Type of compute unit.
    pub processor_type: ProcessorType,
    /// Number of compute units.
    pub computing_units: u32,
}

impl Processor {
    /// A CPU with the given number of cores and no particular architecture.
    pub fn cpu(computing_units: u32) -> Self {
        Self {
            name: "MainProcessor".to_string(),
            architecture: UNASSIGNED.to_string(),
            processor_type: ProcessorType::Cpu,
            computing_units,
        }
    }

    /// A GPU with the given number of compute units.
    pub fn gpu(computing_units: u32) -> Self {
        Self {
            name: "GPU".to_string(),
            architecture: UNASSIGNED.to_string(),
            processor_type: ProcessorType::Gpu,
            computing_units,
        }
    }
}

/// Placeholder for unconstrained string features.
pub const UNASSIGNED: &str = "[unassigned]";

/// Resource type tag. Determines which specialized fields are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResourceType {
    /// Plain worker node.
    Method,
    /// Group of identical members scheduled as one resource.
    Cluster,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method => f.write_str("METHOD"),
            Self::Cluster => f.write_str("CLUSTER"),
        }
    }
}

/// Capacity of a worker node, or requirements of an implementation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodResourceDescription {
    /// Processors of the node.
    #[serde(default)]
    pub processors: Vec<Processor>,
    /// Memory in megabytes; 0 means unspecified.
    #[serde(default)]
    pub memory_size_mb: u64,
}

impl MethodResourceDescription {
    /// A node with a single CPU of `computing_units` cores.
    pub fn with_cpus(computing_units: u32) -> Self {
        Self {
            processors: vec![Processor::cpu(computing_units)],
            memory_size_mb: 0,
        }
    }

    /// Add a processor.
    pub fn processor(mut self, processor: Processor) -> Self {
        self.processors.push(processor);
        self
    }

    /// Set the memory size in megabytes.
    pub fn memory_mb(mut self, memory_size_mb: u64) -> Self {
        self.memory_size_mb = memory_size_mb;
        self
    }

    fn units_of(&self, processor_type: ProcessorType) -> u32 {
        self.processors
            .iter()
            .filter(|p| p.processor_type == processor_type)
            .map(|p| p.computing_units)
            .sum()
    }

    /// Total CPU compute units.
    pub fn total_cpu_computing_units(&self) -> u32 {
        self.units_of(ProcessorType::Cpu)
    }

    /// Total GPU compute units.
    pub fn total_gpu_computing_units(&self) -> u32 {
        self.units_of(ProcessorType::Gpu)
    }

    /// Total FPGA compute units.
    pub fn total_fpga_computing_units(&self) -> u32 {
        self.units_of(ProcessorType::Fpga)
    }

    /// Whether this capacity covers `requirements` at least once.
    pub fn can_host(&self, requirements: &MethodResourceDescription) -> bool {
        self.task_slots(requirements) > 0
    }

    /// How many simultaneous executions of `requirements` fit in this capacity.
    pub fn task_slots(&self, requirements: &MethodResourceDescription) -> u32 {
        if requirements.memory_size_mb > 0 && requirements.memory_size_mb > self.memory_size_mb {
            return 0;
        }
        let mut slots = u32::MAX;
        for kind in [ProcessorType::Cpu, ProcessorType::Gpu, ProcessorType::Fpga] {
            let required = requirements.units_of(kind);
            if required > 0 {
                slots = slots.min(self.units_of(kind) / required);
            }
        }
        if slots == u32::MAX {
            // Nothing required: one slot per CPU core, at least one.
            slots = self.total_cpu_computing_units().max(1);
        }
        if requirements.memory_size_mb > 0 {
            let by_memory = self.memory_size_mb / requirements.memory_size_mb;
            slots = slots.min(u32::try_from(by_memory).unwrap_or(u32::MAX));
        }
        slots
    }
}

/// A cluster resource: `num_clusters` identical members described by `member`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterResourceDescription {
    /// Capacity of one cluster member.
    pub member: MethodResourceDescription,
    /// Maximum concurrent tasks the scheduler may place per member.
    pub limit_of_tasks: u32,
    /// Number of cluster members.
    pub num_clusters: u32,
}

impl ClusterResourceDescription {
    /// Create a cluster description.
    pub fn new(member: MethodResourceDescription, limit_of_tasks: u32, num_clusters: u32) -> Self {
        Self {
            member,
            limit_of_tasks,
            num_clusters,
        }
    }
}

/// Description of a compute resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceDescription {
    /// A plain worker node.
    Method(MethodResourceDescription),
    /// A cluster of identical members.
    Cluster(ClusterResourceDescription),
}

impl ResourceDescription {
    /// The resource type tag.
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Self::Method(_) => ResourceType::Method,
            Self::Cluster(_) => ResourceType::Cluster,
        }
    }

    /// The node-level description (the member description for clusters).
    pub fn node(&self) -> &MethodResourceDescription {
        match self {
            Self::Method(description) => description,
            Self::Cluster(cluster) => &cluster.member,
        }
    }

    /// Total CPU compute units of the node-level description.
    pub fn total_cpu_computing_units(&self) -> u32 {
        self.node().total_cpu_computing_units()
    }

    /// Cluster task limit, `None` for non-cluster resources.
    pub fn limit_of_tasks(&self) -> Option<u32> {
        match self {
            Self::Cluster(cluster) => Some(cluster.limit_of_tasks),
            Self::Method(_) => None,
        }
    }

    /// Number of cluster members, `None` for non-cluster resources.
    pub fn num_clusters(&self) -> Option<u32> {
        match self {
            Self::Cluster(cluster) => Some(cluster.num_clusters),
            Self::Method(_) => None,
        }
    }

    /// How many simultaneous executions of `requirements` this resource admits.
    ///
    /// Clusters admit `limit_of_tasks` per member when a member can host the
    /// requirements at all.
    pub fn task_slots(&self, requirements: &MethodResourceDescription) -> u32 {
        match self {
            Self::Method(description) => description.task_slots(requirements),
            Self::Cluster(cluster) => {
                if cluster.member.can_host(requirements) {
                    cluster.limit_of_tasks.saturating_mul(cluster.num_clusters)
                } else {
                    0
                }
            }
        }
    }

    /// Whether at least one execution of `requirements` fits.
    pub fn can_host(&self, requirements: &MethodResourceDescription) -> bool {
        self.task_slots(requirements) > 0
    }
}

impl From<MethodResourceDescription> for ResourceDescription {
    fn from(description: MethodResourceDescription) -> Self {
        Self::Method(description)
    }
}

impl From<ClusterResourceDescription> for ResourceDescription {
    fn from(cluster: ClusterResourceDescription) -> Self {
        Self::Cluster(cluster)
    }
}
