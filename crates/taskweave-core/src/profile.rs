// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution profiles.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Cumulative execution statistics of a core element on a resource.
///
/// Times are in milliseconds. An empty profile reports zero for every field.
///
/// Serialized as the four aggregated values; the running total is rebuilt
/// from `avg * count` when read back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ProfileStats", into = "ProfileStats")]
pub struct Profile {
    execution_count: u64,
    min_time_ms: u64,
    avg_time_ms: u64,
    max_time_ms: u64,
    total_time_ms: u64,
}

#[derive(Serialize, Deserialize)]
struct ProfileStats {
    execution_count: u64,
    min_time_ms: u64,
    avg_time_ms: u64,
    max_time_ms: u64,
}

impl From<ProfileStats> for Profile {
    fn from(stats: ProfileStats) -> Self {
        Profile::from_stats(
            stats.execution_count,
            stats.min_time_ms,
            stats.avg_time_ms,
            stats.max_time_ms,
        )
    }
}

impl From<Profile> for ProfileStats {
    fn from(profile: Profile) -> Self {
        Self {
            execution_count: profile.execution_count,
            min_time_ms: profile.min_time_ms,
            avg_time_ms: profile.avg_time_ms,
            max_time_ms: profile.max_time_ms,
        }
    }
}

impl Profile {
    /// An empty profile.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a profile from already aggregated values.
    pub fn from_stats(execution_count: u64, min_time_ms: u64, avg_time_ms: u64, max_time_ms: u64) -> Self {
        Self {
            execution_count,
            min_time_ms,
            avg_time_ms,
            max_time_ms,
            total_time_ms: avg_time_ms.saturating_mul(execution_count),
        }
    }

    /// Record one finished execution.
    pub fn record(&mut self, elapsed: Duration) {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        if self.execution_count == 0 {
            self.min_time_ms = ms;
            self.max_time_ms = ms;
        } else {
            self.min_time_ms = self.min_time_ms.min(ms);
            self.max_time_ms = self.max_time_ms.max(ms);
        }
        self.execution_count += 1;
        self.total_time_ms = self.total_time_ms.saturating_add(ms);
        self.avg_time_ms = self.total_time_ms / self.execution_count;
    }

    /// Merge another profile into this one.
    pub fn accumulate(&mut self, other: &Profile) {
        if other.execution_count == 0 {
            return;
        }
        if self.execution_count == 0 {
            *self = *other;
            return;
        }
        self.min_time_ms = self.min_time_ms.min(other.min_time_ms);
        self.max_time_ms = self.max_time_ms.max(other.max_time_ms);
        self.execution_count += other.execution_count;
        self.total_time_ms = self.total_time_ms.saturating_add(other.total_time_ms);
        self.avg_time_ms = self.total_time_ms / self.execution_count;
    }

    /// Number of executions recorded.
    pub fn execution_count(&self) -> u64 {
        self.execution_count
    }

    /// Fastest execution, in milliseconds.
    pub fn min_execution_time(&self) -> u64 {
        self.min_time_ms
    }

    /// Mean execution time, in milliseconds.
    pub fn average_execution_time(&self) -> u64 {
        self.avg_time_ms
    }

    /// Slowest execution, in milliseconds.
    pub fn max_execution_time(&self) -> u64 {
        self.max_time_ms
    }
}
