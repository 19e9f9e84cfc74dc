// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Stowage - Pluggable typed-record persistence
//
// This crate caches typed data elements in uuid-keyed holders and persists
// them through a pluggable storage backend. The core `StorageBackend` trait
// defines the contract all backends implement, so applications can start on
// flat files and migrate to SQLite without touching the code that reads and
// writes elements.
//
// # Modules
//
// - [`element`] -- The `Element` and `ElementType` traits data types implement.
// - [`registry`] -- Maps wire tags to element constructors and codecs.
// - [`holder`] -- The uuid-keyed container elements live in.
// - [`codec`] -- The JSON record format holders serialise to.
// - [`backend`] -- The `StorageBackend` and `EnumerableBackend` traits.
// - [`memory`] -- An in-memory backend for testing and ephemeral workloads.
// - [`flat_file`] -- One JSON file per record in a directory.
// - [`buffered`] -- Flat files with redundant copies for corruption recovery.
// - [`store`] -- The holder cache, backend handle, and migration engine.
// - [`error`] -- The `StowageError` enum covering all failure modes.
//
// # Example
//
// ```rust
// use std::sync::Arc;
//
// use serde::{Deserialize, Serialize};
// use stowage::{Element, ElementType, InMemoryBackend, Store, TypeRegistry};
// use uuid::Uuid;
//
// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
// struct Counter {
//     n: i64,
// }
//
// impl Element for Counter {}
//
// impl ElementType for Counter {
//     const TAG: &'static str = "app.counter";
// }
//
// let mut registry = TypeRegistry::new();
// registry.register::<Counter>();
//
// let store = Store::new(Arc::new(InMemoryBackend::new()), Arc::new(registry));
// store.prepare().unwrap();
//
// let holder = store.get_or_create(Uuid::new_v4()).unwrap();
// holder.attach(Counter { n: 69 });
// holder.save().unwrap();
// ```

pub mod backend;
pub mod buffered;
pub mod codec;
pub mod element;
pub mod error;
pub mod flat_file;
pub mod holder;
pub mod memory;
pub mod registry;
pub mod store;

// Optional persistent backends -- feature-gated to keep the default build lean.
#[cfg(feature = "sqlite-backend")]
pub mod sqlite;

// Re-export the most commonly used types at the crate root for convenience.
pub use backend::{EnumerableBackend, StorageBackend};
pub use buffered::BufferedFileBackend;
pub use codec::{DecodeMode, HolderRecord, RecordEntry};
pub use element::{AsAny, Element, ElementType, HolderRef};
pub use error::{StowageError, StowageResult};
pub use flat_file::FlatFileBackend;
pub use holder::Holder;
pub use memory::InMemoryBackend;
pub use registry::{Registration, TagResolver, TypeRegistry};
pub use store::{Store, StoreConfig};

#[cfg(feature = "sqlite-backend")]
pub use sqlite::{SqliteBackend, SqliteConfig};
