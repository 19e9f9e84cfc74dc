// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integration tests for stowage
//!
//! Exercises full save/load cycles through real backends, legacy tag
//! resolution, corruption recovery, and backend migration.

use std::fs;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use stowage::{
    BufferedFileBackend, DecodeMode, Element, ElementType, FlatFileBackend, HolderRecord,
    HolderRef, InMemoryBackend, RecordEntry, StorageBackend, Store, StoreConfig, StowageError,
    StowageResult, TypeRegistry,
};
use tempfile::TempDir;
use uuid::Uuid;

// ---------- Shared element types ----------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Counter {
    n: i64,
}

impl Element for Counter {}

impl ElementType for Counter {
    const TAG: &'static str = "app.counter";
    const ALIASES: &'static [&'static str] = &["legacy.Counter"];
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Profile {
    display_name: String,
}

impl Element for Profile {}

impl ElementType for Profile {
    const TAG: &'static str = "app.profile";
}

/// Keeps the back-reference handed out on attach, so application code can
/// save through the element later.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Linked {
    edits: u32,
    #[serde(skip)]
    holder: HolderRef,
}

impl Element for Linked {
    fn on_attach(&mut self, holder: &HolderRef) {
        self.holder = holder.clone();
    }
}

impl ElementType for Linked {
    const TAG: &'static str = "app.linked";
}

fn registry() -> Arc<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    registry
        .register::<Counter>()
        .register::<Profile>()
        .register::<Linked>();
    Arc::new(registry)
}

/// Opt-in log output for debugging test runs: `RUST_LOG=stowage=debug`.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init()
        .ok();
}

fn flat_store(dir: &TempDir) -> Store {
    let store = Store::new(Arc::new(FlatFileBackend::new(dir.path())), registry());
    store.prepare().unwrap();
    store
}

// ---------- End-to-end persistence ----------

/// A record saved by one store is readable by a fresh store on the same
/// directory.
#[test]
fn test_flat_file_round_trip_across_stores() {
    let dir = TempDir::new().unwrap();
    let id = Uuid::new_v4();

    {
        let store = flat_store(&dir);
        let holder = store.get_or_create(id).unwrap();
        holder.attach(Counter { n: 69 });
        holder.attach(Profile {
            display_name: "mayuna".to_string(),
        });
        holder.save().unwrap();
    }

    let store = flat_store(&dir);
    let holder = store.get_or_load(id).unwrap().expect("record should exist");
    assert_eq!(
        holder.get_element::<Counter>().unwrap(),
        Some(Counter { n: 69 })
    );
    assert!(holder.has_element::<Profile>());
    let name = holder
        .with_element(|p: &Profile| p.display_name.clone())
        .unwrap();
    assert_eq!(name.as_deref(), Some("mayuna"));
}

/// The holder cache hands out one shared handle per uuid.
#[test]
fn test_holder_cache_identity() {
    let dir = TempDir::new().unwrap();
    let store = flat_store(&dir);
    let id = Uuid::new_v4();

    let created = store.get_or_create(id).unwrap();
    created.attach(Counter { n: 1 });
    created.save().unwrap();

    let looked_up = store.get(id).expect("holder should be resident");
    assert!(Arc::ptr_eq(&created, &looked_up));

    let loaded = store.get_or_load(id).unwrap().unwrap();
    assert!(Arc::ptr_eq(&created, &loaded));
}

/// Elements can save their holder through the captured back-reference.
#[test]
fn test_save_through_back_reference() {
    let dir = TempDir::new().unwrap();
    let id = Uuid::new_v4();

    {
        let store = flat_store(&dir);
        let holder = store.get_or_create(id).unwrap();
        holder.attach(Linked::default());

        let link = holder
            .with_element(|l: &Linked| l.holder.clone())
            .unwrap()
            .unwrap();
        assert_eq!(link.id(), Some(id));

        holder.with_element_mut(|l: &mut Linked| l.edits += 1).unwrap();
        link.save().unwrap();
    }

    let store = flat_store(&dir);
    let holder = store.get_or_load(id).unwrap().unwrap();
    let edits = holder.with_element(|l: &Linked| l.edits).unwrap();
    assert_eq!(edits, Some(1));
}

// ---------- Tag resolution ----------

/// Legacy tags decode to the current type and re-save under the canonical
/// tag.
#[test]
fn test_legacy_tag_resolution() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(FlatFileBackend::new(dir.path()));
    let id = Uuid::new_v4();

    backend.prepare().unwrap();
    backend
        .save(&HolderRecord {
            uuid: id,
            data_map: vec![RecordEntry {
                tag: "legacy.Counter".to_string(),
                data: json!({ "n": 7 }),
            }],
        })
        .unwrap();

    let store = Store::new(backend.clone(), registry());
    let holder = store.get_or_load(id).unwrap().unwrap();
    assert_eq!(
        holder.get_element::<Counter>().unwrap(),
        Some(Counter { n: 7 })
    );

    holder.save().unwrap();
    let raw = backend.load(id).unwrap().unwrap();
    assert_eq!(raw.data_map.len(), 1);
    assert_eq!(raw.data_map[0].tag, "app.counter", "alias should not survive a re-save");
}

/// Lazy decode leaves unknown tags in place and re-emits them on save.
#[test]
fn test_lazy_mode_carries_unknown_tags() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(FlatFileBackend::new(dir.path()));
    let id = Uuid::new_v4();

    backend.prepare().unwrap();
    backend
        .save(&HolderRecord {
            uuid: id,
            data_map: vec![
                RecordEntry {
                    tag: "app.counter".to_string(),
                    data: json!({ "n": 3 }),
                },
                RecordEntry {
                    tag: "ghost.plugin".to_string(),
                    data: json!({ "x": 1 }),
                },
            ],
        })
        .unwrap();

    let store = Store::with_config(
        backend.clone(),
        registry(),
        StoreConfig {
            decode_mode: DecodeMode::Lazy,
        },
    );
    let holder = store.get_or_load(id).unwrap().unwrap();
    assert_eq!(
        holder.get_element::<Counter>().unwrap(),
        Some(Counter { n: 3 })
    );

    holder.save().unwrap();
    let raw = backend.load(id).unwrap().unwrap();
    let ghost = raw
        .data_map
        .iter()
        .find(|entry| entry.tag == "ghost.plugin")
        .expect("unknown tag should survive the round trip");
    assert_eq!(ghost.data, json!({ "x": 1 }));
    assert!(raw.data_map.iter().any(|entry| entry.tag == "app.counter"));
}

/// Eager decode fails the whole load when a tag is unknown.
#[test]
fn test_eager_mode_rejects_unknown_tags() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(FlatFileBackend::new(dir.path()));
    let id = Uuid::new_v4();

    backend.prepare().unwrap();
    backend
        .save(&HolderRecord {
            uuid: id,
            data_map: vec![RecordEntry {
                tag: "ghost.plugin".to_string(),
                data: json!({ "x": 1 }),
            }],
        })
        .unwrap();

    let store = Store::new(backend, registry());
    assert!(matches!(
        store.get_or_load(id),
        Err(StowageError::UnknownTag(tag)) if tag == "ghost.plugin"
    ));
}

// ---------- Corruption recovery ----------

/// A corrupted primary copy is recovered from the redundant copies.
#[test]
fn test_buffered_corruption_recovery() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let id = Uuid::new_v4();

    {
        let store = Store::new(
            Arc::new(BufferedFileBackend::with_default_copies(dir.path())),
            registry(),
        );
        store.prepare().unwrap();
        let holder = store.get_or_create(id).unwrap();
        holder.attach(Counter { n: 1204 });
        holder.save().unwrap();
    }

    // Clobber the first two of the three copies.
    fs::write(dir.path().join(format!("{id}.json")), b"garbage").unwrap();
    fs::write(dir.path().join(format!("{id}_1.json")), b"garbage").unwrap();

    let store = Store::new(
        Arc::new(BufferedFileBackend::with_default_copies(dir.path())),
        registry(),
    );
    let holder = store.get_or_load(id).unwrap().expect("third copy should win");
    assert_eq!(
        holder.get_element::<Counter>().unwrap(),
        Some(Counter { n: 1204 })
    );
}

// ---------- Migration ----------

/// Migration copies every record, flushes resident holders, and leaves the
/// source intact.
#[test]
fn test_migration_to_new_backend() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let source = Arc::new(FlatFileBackend::new(dir.path()));
    let store = Store::new(source.clone(), registry());
    store.prepare().unwrap();

    let saved: Vec<Uuid> = (0..3)
        .map(|n| {
            let id = Uuid::new_v4();
            let holder = store.get_or_create(id).unwrap();
            holder.attach(Counter { n });
            holder.save().unwrap();
            id
        })
        .collect();

    // Resident but never saved; migration must flush it.
    let unsaved = Uuid::new_v4();
    let holder = store.get_or_create(unsaved).unwrap();
    holder.attach(Counter { n: 99 });

    let destination = Arc::new(InMemoryBackend::new());
    store.migrate_to(destination.clone()).unwrap();
    assert_eq!(store.backend_name(), "in-memory");

    // The cache was cleared; records now come from the destination.
    for (n, id) in saved.iter().enumerate() {
        assert!(store.get(*id).is_none(), "cache should be empty after migration");
        let holder = store.get_or_load(*id).unwrap().unwrap();
        assert_eq!(
            holder.get_element::<Counter>().unwrap(),
            Some(Counter { n: n as i64 })
        );
    }
    assert!(destination.load(unsaved).unwrap().is_some());

    // Non-destructive: the flat files are still there.
    for id in &saved {
        assert!(source.load(*id).unwrap().is_some());
    }
}

/// Migration is refused when the active backend cannot enumerate records.
#[test]
fn test_migration_requires_enumerable_source() {
    struct Opaque(InMemoryBackend);

    impl StorageBackend for Opaque {
        fn name(&self) -> &str {
            "opaque"
        }
        fn prepare(&self) -> StowageResult<()> {
            self.0.prepare()
        }
        fn save(&self, record: &HolderRecord) -> StowageResult<()> {
            self.0.save(record)
        }
        fn load(&self, id: Uuid) -> StowageResult<Option<HolderRecord>> {
            self.0.load(id)
        }
        fn remove(&self, id: Uuid) -> StowageResult<bool> {
            self.0.remove(id)
        }
    }

    let store = Store::new(Arc::new(Opaque(InMemoryBackend::new())), registry());
    store.prepare().unwrap();

    let id = Uuid::new_v4();
    let holder = store.get_or_create(id).unwrap();
    holder.attach(Counter { n: 5 });
    holder.save().unwrap();

    let result = store.migrate_to(Arc::new(InMemoryBackend::new()));
    assert!(matches!(result, Err(StowageError::NotEnumerable(_))));

    // The store is untouched and still writable.
    assert_eq!(store.backend_name(), "opaque");
    holder.save().unwrap();
}

// ---------- Deletion ----------

/// Deleting a holder removes it from the cache and the backend.
#[test]
fn test_delete_holder() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(FlatFileBackend::new(dir.path()));
    let store = Store::new(backend.clone(), registry());
    store.prepare().unwrap();

    let id = Uuid::new_v4();
    let holder = store.get_or_create(id).unwrap();
    holder.attach(Counter { n: 8 });
    holder.save().unwrap();

    assert!(store.delete(id).unwrap());
    assert!(store.get(id).is_none());
    assert_eq!(backend.load(id).unwrap(), None);
    assert!(!store.delete(id).unwrap());
}

// ---------- SQLite ----------

#[cfg(feature = "sqlite-backend")]
mod sqlite_integration {
    use super::*;
    use stowage::{EnumerableBackend, SqliteBackend, SqliteConfig};

    /// Full round trip through the SQLite backend.
    #[test]
    fn test_sqlite_round_trip() {
        let dir = TempDir::new().unwrap();
        let config = SqliteConfig::new(dir.path().join("records.db"));
        let id = Uuid::new_v4();

        {
            let store = Store::new(Arc::new(SqliteBackend::open(&config).unwrap()), registry());
            store.prepare().unwrap();
            let holder = store.get_or_create(id).unwrap();
            holder.attach(Counter { n: 69 });
            holder.save().unwrap();
        }

        let store = Store::new(Arc::new(SqliteBackend::open(&config).unwrap()), registry());
        let holder = store.get_or_load(id).unwrap().unwrap();
        assert_eq!(
            holder.get_element::<Counter>().unwrap(),
            Some(Counter { n: 69 })
        );
    }

    /// Migration from flat files into SQLite carries every record.
    #[test]
    fn test_migration_into_sqlite() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(
            Arc::new(FlatFileBackend::new(dir.path().join("flat"))),
            registry(),
        );
        store.prepare().unwrap();

        let ids: Vec<Uuid> = (0..3)
            .map(|n| {
                let id = Uuid::new_v4();
                let holder = store.get_or_create(id).unwrap();
                holder.attach(Counter { n });
                holder.save().unwrap();
                id
            })
            .collect();

        let config = SqliteConfig::new(dir.path().join("records.db"));
        let destination = Arc::new(SqliteBackend::open(&config).unwrap());
        store.migrate_to(destination.clone()).unwrap();
        assert_eq!(store.backend_name(), "sqlite");

        let listed = destination.as_enumerable().unwrap().list_ids().unwrap();
        assert_eq!(listed.len(), 3);
        for id in &ids {
            assert!(listed.contains(id));
            let holder = store.get_or_load(*id).unwrap();
            assert!(holder.is_some(), "record should load from sqlite");
        }
    }
}
