// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Stowage - In-memory backend
//
// Uses a `BTreeMap` wrapped in an `RwLock` for thread-safe, ordered
// record storage. Nothing survives a drop of the backend. Intended for
// testing, development, and ephemeral datasets; also handy as a
// migration staging area.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use uuid::Uuid;

use crate::backend::{EnumerableBackend, StorageBackend};
use crate::codec::HolderRecord;
use crate::error::StowageResult;

/// An in-memory record backend backed by a sorted `BTreeMap`.
///
/// All data lives in process memory. Thread-safe via `Arc<RwLock<...>>`;
/// clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    records: Arc<RwLock<BTreeMap<Uuid, HolderRecord>>>,
}

impl InMemoryBackend {
    /// Creates a new, empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// True if the backend holds no records.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<Uuid, HolderRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<Uuid, HolderRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StorageBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn prepare(&self) -> StowageResult<()> {
        // Nothing to set up: the map exists from construction.
        Ok(())
    }

    fn save(&self, record: &HolderRecord) -> StowageResult<()> {
        self.write().insert(record.uuid, record.clone());
        Ok(())
    }

    fn load(&self, id: Uuid) -> StowageResult<Option<HolderRecord>> {
        Ok(self.read().get(&id).cloned())
    }

    fn remove(&self, id: Uuid) -> StowageResult<bool> {
        Ok(self.write().remove(&id).is_some())
    }

    fn as_enumerable(&self) -> Option<&dyn EnumerableBackend> {
        Some(self)
    }
}

impl EnumerableBackend for InMemoryBackend {
    fn list_ids(&self) -> StowageResult<BTreeSet<Uuid>> {
        Ok(self.read().keys().copied().collect())
    }
}
