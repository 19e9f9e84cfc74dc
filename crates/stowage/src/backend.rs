// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Stowage - Storage backend trait
//
// Defines the `StorageBackend` trait that all storage implementations
// must satisfy: whole-record operations keyed by UUID, synchronous and
// blocking. Backends that can enumerate every stored id additionally
// implement `EnumerableBackend`, which is what qualifies them as a
// migration source.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::codec::HolderRecord;
use crate::error::StowageResult;

/// A pluggable record storage backend.
///
/// Records cross this boundary in wire form ([`HolderRecord`]); element
/// typing is entirely the concern of the layer above. All operations are
/// synchronous and may block on I/O.
///
/// Implementations must be safe to share across threads.
pub trait StorageBackend: Send + Sync {
    /// A human-readable name for this backend, used in logging.
    fn name(&self) -> &str;

    /// Prepares the backend for use: create the directory, table, or
    /// whatever the medium needs. Idempotent; calling it on an already
    /// prepared backend is a no-op.
    fn prepare(&self) -> StowageResult<()>;

    /// Stores a record, overwriting any previous record with the same id.
    fn save(&self, record: &HolderRecord) -> StowageResult<()>;

    /// Retrieves the record with the given id.
    ///
    /// Returns `Ok(None)` if no such record exists, rather than an error.
    /// A record that exists but cannot be read or parsed is an error,
    /// never a silent `None`.
    fn load(&self, id: Uuid) -> StowageResult<Option<HolderRecord>>;

    /// Removes the record with the given id.
    ///
    /// Returns `Ok(true)` if a record existed and was removed, `Ok(false)`
    /// if there was nothing to remove.
    fn remove(&self, id: Uuid) -> StowageResult<bool>;

    /// Capability probe: this backend as a migration source, if it can
    /// enumerate every stored id.
    fn as_enumerable(&self) -> Option<&dyn EnumerableBackend> {
        None
    }
}

/// A backend that can enumerate every stored record id.
///
/// Required of the active backend when a migration starts; the
/// destination backend has no such requirement.
pub trait EnumerableBackend: StorageBackend {
    /// Every record id currently stored, in sorted order.
    fn list_ids(&self) -> StowageResult<BTreeSet<Uuid>>;
}
