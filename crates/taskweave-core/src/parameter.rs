// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task parameters and return-value classification.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Direction of a task parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Read by the task.
    In,
    /// Produced by the task.
    Out,
    /// Read and updated by the task.
    InOut,
}

impl Direction {
    /// Returns the string representation of the direction.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "IN",
            Self::Out => "OUT",
            Self::InOut => "INOUT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of data carried by a task parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Boolean primitive.
    Boolean,
    /// Character primitive.
    Char,
    /// String passed by value.
    String,
    /// Byte primitive.
    Byte,
    /// 16-bit integer.
    Short,
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Long,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// File on a shared or transferred location.
    File,
    /// In-memory object.
    Object,
    /// Persistent object living in an external storage backend.
    Psco,
    /// Persistent object referenced only by its external identifier.
    ExternalPsco,
    /// Object managed by a language binding.
    Binding,
    /// Collection of nested parameters.
    Collection,
    /// Stream endpoint.
    Stream,
    /// Absent value.
    Null,
}

impl DataType {
    /// Returns the type tag used in signatures and diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN_T",
            Self::Char => "CHAR_T",
            Self::String => "STRING_T",
            Self::Byte => "BYTE_T",
            Self::Short => "SHORT_T",
            Self::Int => "INT_T",
            Self::Long => "LONG_T",
            Self::Float => "FLOAT_T",
            Self::Double => "DOUBLE_T",
            Self::File => "FILE_T",
            Self::Object => "OBJECT_T",
            Self::Psco => "PSCO_T",
            Self::ExternalPsco => "EXTERNAL_PSCO_T",
            Self::Binding => "BINDING_OBJECT_T",
            Self::Collection => "COLLECTION_T",
            Self::Stream => "STREAM_T",
            Self::Null => "NULL_T",
        }
    }

    /// Whether values of this kind are passed by value rather than by reference.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Boolean
                | Self::Char
                | Self::String
                | Self::Byte
                | Self::Short
                | Self::Int
                | Self::Long
                | Self::Float
                | Self::Double
        )
    }

    /// Whether a trailing OUT parameter of this kind is a generated return value.
    pub fn can_be_returned(&self) -> bool {
        matches!(self, Self::Object | Self::Psco | Self::ExternalPsco)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single task parameter as seen by the coordination layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter direction.
    pub direction: Direction,
    /// Parameter data kind.
    pub data_type: DataType,
    /// Optional parameter name, for diagnostics only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Parameter {
    /// Create an unnamed parameter.
    pub fn new(direction: Direction, data_type: DataType) -> Self {
        Self {
            direction,
            data_type,
            name: None,
        }
    }

    /// Shorthand for an IN parameter.
    pub fn input(data_type: DataType) -> Self {
        Self::new(Direction::In, data_type)
    }

    /// Shorthand for an OUT parameter.
    pub fn output(data_type: DataType) -> Self {
        Self::new(Direction::Out, data_type)
    }

    /// Attach a name to the parameter.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether the task writes this parameter.
    pub fn is_written(&self) -> bool {
        matches!(self.direction, Direction::Out | Direction::InOut)
    }
}

/// Decide whether the last parameter is a generated return value.
///
/// True iff the list is non-empty and its last entry is an OUT object,
/// persistent object or external persistent object.
pub fn has_return_value(parameters: &[Parameter]) -> bool {
    parameters
        .last()
        .map(|last| last.direction == Direction::Out && last.data_type.can_be_returned())
        .unwrap_or(false)
}

/// Number of parameters that belong to the user-facing call, excluding
/// the trailing target and return slots.
pub fn real_parameter_count(parameters: &[Parameter], has_target: bool, has_return: bool) -> usize {
    parameters
        .len()
        .saturating_sub(usize::from(has_target))
        .saturating_sub(usize::from(has_return))
}
