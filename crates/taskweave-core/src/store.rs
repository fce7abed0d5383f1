// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Object store interface and an in-memory backend.
//!
//! The store keeps materialized task data keyed by data identifier
//! (e.g. `d4v2`). Writes are last-writer-wins; there are no transactions.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::Result;

/// Identifier-keyed storage for task data.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `value` under `id`, replacing any previous value.
    async fn store(&self, id: &str, value: Vec<u8>) -> Result<()>;

    /// Value stored under `id`, if any.
    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>>;

    /// Remove the value stored under `id`, returning it.
    async fn remove(&self, id: &str) -> Result<Option<Vec<u8>>>;

    /// Whether a value is stored under `id`.
    async fn exists(&self, id: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    stored_at: DateTime<Utc>,
}

/// [`ObjectStore`] backed by a process-local map.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl InMemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// When the value under `id` was last written.
    pub fn stored_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.objects.read().get(id).map(|object| object.stored_at)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn store(&self, id: &str, value: Vec<u8>) -> Result<()> {
        let size = value.len();
        let replaced = self
            .objects
            .write()
            .insert(
                id.to_string(),
                StoredObject {
                    bytes: value,
                    stored_at: Utc::now(),
                },
            )
            .is_some();
        debug!(data_id = id, size, replaced, "Object stored");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.read().get(id).map(|object| object.bytes.clone()))
    }

    async fn remove(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let removed = self.objects.write().remove(id).map(|object| object.bytes);
        if removed.is_some() {
            debug!(data_id = id, "Object removed");
        }
        Ok(removed)
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.objects.read().contains_key(id))
    }
}
