// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Stowage - Store
//
// The store is the session facade: an in-memory cache of live holders in
// front of a swappable storage backend, plus the migration engine that
// moves every record to a different backend. Cache bookkeeping sits
// behind one mutex that is never held across backend I/O, so saves of
// two different holders do not serialize against each other here.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::StorageBackend;
use crate::codec::DecodeMode;
use crate::error::{StowageError, StowageResult};
use crate::holder::Holder;
use crate::registry::TypeRegistry;

/// Store construction options.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// When element payloads are decoded after a record load.
    pub decode_mode: DecodeMode,
}

/// The active backend and the resident holders, guarded together so a
/// backend swap plus cache clear is one atomic step from the point of
/// view of every lookup.
struct CacheState {
    backend: Arc<dyn StorageBackend>,
    holders: HashMap<Uuid, Arc<Holder>>,
}

pub(crate) struct StoreInner {
    registry: Arc<TypeRegistry>,
    config: StoreConfig,
    state: Mutex<CacheState>,
}

/// The session facade over a holder cache and a swappable backend.
///
/// Cloning is cheap and yields a handle to the same session. Holders
/// handed out by a store keep a weak link back to it, so an element deep
/// inside a record can still ask for its holder to be saved.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Creates a store over `backend` with default configuration.
    pub fn new(backend: Arc<dyn StorageBackend>, registry: Arc<TypeRegistry>) -> Self {
        Self::with_config(backend, registry, StoreConfig::default())
    }

    /// Creates a store with explicit configuration.
    pub fn with_config(
        backend: Arc<dyn StorageBackend>,
        registry: Arc<TypeRegistry>,
        config: StoreConfig,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                registry,
                config,
                state: Mutex::new(CacheState {
                    backend,
                    holders: HashMap::new(),
                }),
            }),
        }
    }

    /// Prepares the active backend (directory, table, ...). Idempotent.
    pub fn prepare(&self) -> StowageResult<()> {
        let backend = self.inner.active_backend();
        backend.prepare()?;
        debug!(backend = backend.name(), "storage prepared");
        Ok(())
    }

    /// The shared type registry used to decode records.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Name of the currently active backend.
    pub fn backend_name(&self) -> String {
        self.inner.active_backend().name().to_string()
    }

    /// Builds a holder bound to this store without registering it in the
    /// cache. Pass it to [`Store::add_or_replace`] to make it resident.
    pub fn new_holder(&self, id: Uuid) -> Arc<Holder> {
        Holder::new_arc(id, Arc::downgrade(&self.inner))
    }

    /// Memory-only lookup. Never touches the backend.
    pub fn get(&self, id: Uuid) -> Option<Arc<Holder>> {
        self.inner.lock_cache().holders.get(&id).cloned()
    }

    /// Snapshot of every holder currently resident in the cache.
    pub fn loaded_holders(&self) -> Vec<Arc<Holder>> {
        self.inner.lock_cache().holders.values().cloned().collect()
    }

    /// Cache lookup, falling back to the backend. Returns `Ok(None)` when
    /// neither the cache nor the backend has the record.
    pub fn get_or_load(&self, id: Uuid) -> StowageResult<Option<Arc<Holder>>> {
        self.inner.get_or_load(id)
    }

    /// Like [`Store::get_or_load`], registering a fresh empty holder when
    /// the record exists nowhere. The fresh holder is not persisted until
    /// its first save.
    pub fn get_or_create(&self, id: Uuid) -> StowageResult<Arc<Holder>> {
        self.inner.get_or_create(id)
    }

    /// Makes `holder` resident, evicting any same-id holder.
    pub fn add_or_replace(&self, holder: Arc<Holder>) {
        self.inner.add_or_replace(holder);
    }

    /// Drops the holder from memory without touching the backend.
    /// Returns whether it was resident.
    pub fn unload(&self, id: Uuid) -> bool {
        self.inner.unload(id)
    }

    /// Evicts the holder from memory and removes the record from the
    /// backend. Returns whether the backend had the record.
    pub fn delete(&self, id: Uuid) -> StowageResult<bool> {
        self.inner.delete_record(id)
    }

    /// Persists a holder through the active backend, firing `before_save`
    /// on its decoded elements first.
    pub fn save(&self, holder: &Holder) -> StowageResult<()> {
        self.inner.save_holder(holder)
    }

    /// Moves every record from the active backend to `destination` and
    /// makes `destination` the active backend. See [`StoreInner`] docs on
    /// ordering; failures on individual records are logged and skipped,
    /// never fatal to the run.
    pub fn migrate_to(&self, destination: Arc<dyn StorageBackend>) -> StowageResult<()> {
        self.inner.migrate_to(destination)
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cache = self.inner.lock_cache();
        f.debug_struct("Store")
            .field("backend", &cache.backend.name())
            .field("resident", &cache.holders.len())
            .finish()
    }
}

impl StoreInner {
    fn lock_cache(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active_backend(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.lock_cache().backend)
    }

    fn get_or_load(self: &Arc<Self>, id: Uuid) -> StowageResult<Option<Arc<Holder>>> {
        if let Some(holder) = self.lock_cache().holders.get(&id).cloned() {
            return Ok(Some(holder));
        }
        let backend = self.active_backend();
        let Some(record) = backend.load(id)? else {
            return Ok(None);
        };
        let holder = Holder::from_record(
            record,
            &self.registry,
            self.config.decode_mode,
            Arc::downgrade(self),
        )?;
        debug!(id = %id, backend = backend.name(), "holder loaded");
        let mut cache = self.lock_cache();
        match cache.holders.entry(id) {
            // A racing load registered first; its holder wins.
            Entry::Occupied(entry) => Ok(Some(Arc::clone(entry.get()))),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&holder));
                Ok(Some(holder))
            }
        }
    }

    fn get_or_create(self: &Arc<Self>, id: Uuid) -> StowageResult<Arc<Holder>> {
        if let Some(holder) = self.get_or_load(id)? {
            return Ok(holder);
        }
        let mut cache = self.lock_cache();
        match cache.holders.entry(id) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let holder = Holder::new_arc(id, Arc::downgrade(self));
                entry.insert(Arc::clone(&holder));
                debug!(id = %id, "holder created");
                Ok(holder)
            }
        }
    }

    fn add_or_replace(&self, holder: Arc<Holder>) {
        let id = holder.id();
        let replaced = self.lock_cache().holders.insert(id, holder).is_some();
        debug!(id = %id, replaced, "holder registered");
    }

    fn unload(&self, id: Uuid) -> bool {
        let removed = self.lock_cache().holders.remove(&id).is_some();
        if removed {
            debug!(id = %id, "holder unloaded");
        }
        removed
    }

    pub(crate) fn save_holder(&self, holder: &Holder) -> StowageResult<()> {
        holder.run_before_save();
        let record = holder.to_record()?;
        let backend = self.active_backend();
        backend.save(&record)?;
        debug!(
            id = %holder.id(),
            backend = backend.name(),
            elements = record.data_map.len(),
            "holder saved"
        );
        Ok(())
    }

    pub(crate) fn delete_record(&self, id: Uuid) -> StowageResult<bool> {
        let backend = {
            let mut cache = self.lock_cache();
            cache.holders.remove(&id);
            Arc::clone(&cache.backend)
        };
        let removed = backend.remove(id)?;
        debug!(id = %id, removed, "holder deleted");
        Ok(removed)
    }

    /// Migration, in order: fail fast if the active backend cannot
    /// enumerate; atomically snapshot and clear the cache while swapping
    /// the active backend; prepare both backends; copy every enumerated
    /// record through the normal save path; re-save the snapshot holders.
    fn migrate_to(self: &Arc<Self>, destination: Arc<dyn StorageBackend>) -> StowageResult<()> {
        let started = Instant::now();

        let (source, snapshot) = {
            let mut cache = self.lock_cache();
            if cache.backend.as_enumerable().is_none() {
                return Err(StowageError::NotEnumerable(cache.backend.name().to_string()));
            }
            let source = Arc::clone(&cache.backend);
            let snapshot: Vec<Arc<Holder>> = cache.holders.values().cloned().collect();
            cache.holders.clear();
            cache.backend = Arc::clone(&destination);
            (source, snapshot)
        };

        info!(
            from = source.name(),
            to = destination.name(),
            resident = snapshot.len(),
            "migration started"
        );

        destination.prepare()?;
        source.prepare()?;

        let ids = match source.as_enumerable() {
            Some(enumerable) => enumerable.list_ids()?,
            // Checked before the swap; unreachable unless the backend
            // changes its capability answer between calls.
            None => return Err(StowageError::NotEnumerable(source.name().to_string())),
        };

        let mut transferred = 0usize;
        let mut skipped = 0usize;
        for id in &ids {
            match self.transfer_record(source.as_ref(), *id) {
                Ok(true) => transferred += 1,
                Ok(false) => {} // vanished between listing and loading
                Err(error) => {
                    skipped += 1;
                    warn!(id = %id, error = %error, "record skipped during migration");
                }
            }
        }

        for holder in &snapshot {
            if let Err(error) = self.save_holder(holder) {
                skipped += 1;
                warn!(id = %holder.id(), error = %error, "resident holder skipped during migration");
            }
        }

        info!(
            from = source.name(),
            to = destination.name(),
            transferred,
            resident = snapshot.len(),
            skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "migration finished"
        );
        Ok(())
    }

    /// Loads one record from the old backend and pushes it through the
    /// normal save path, which now targets the destination.
    fn transfer_record(
        self: &Arc<Self>,
        source: &dyn StorageBackend,
        id: Uuid,
    ) -> StowageResult<bool> {
        let Some(record) = source.load(id)? else {
            return Ok(false);
        };
        let holder = Holder::from_record(
            record,
            &self.registry,
            self.config.decode_mode,
            Arc::downgrade(self),
        )?;
        self.save_holder(&holder)?;
        Ok(true)
    }
}
