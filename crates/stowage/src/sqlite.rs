// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Stowage - SQLite backend
//
// Stores every record as one row in a single table: the uuid as a
// 36-character primary key, the record JSON as text. Saves are upserts
// (`REPLACE INTO`), so save and overwrite are the same statement.
//
// # Design
//
// - Connections come from an r2d2 pool. The default pool size is 1,
//   which serialises all access through a single handle; raise
//   `max_connections` for read-heavy workloads.
// - The table name is baked into the statements at construction time,
//   so it is validated once, strictly, as a bare SQL identifier.
// - `prepare` creates the table; every other operation assumes it
//   exists and surfaces the SQLite error if it does not.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::PathBuf;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{EnumerableBackend, StorageBackend};
use crate::codec::HolderRecord;
use crate::error::{StowageError, StowageResult};

/// Table name used when [`SqliteConfig`] does not override it.
pub const DEFAULT_TABLE: &str = "stowage";

/// Pool size used when [`SqliteConfig`] does not override it. One
/// connection means every statement runs on the same handle, in order.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 1;

/// Checks that `name` can be spliced into SQL as a bare identifier.
///
/// Statements interpolate the table name directly (placeholders cannot
/// name tables), so anything but `[A-Za-z_][A-Za-z0-9_]*` is rejected.
fn validate_table_name(name: &str) -> StowageResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(StowageError::Config(format!(
            "invalid table name {name:?}: expected a bare SQL identifier"
        )))
    }
}

/// Connection settings for [`SqliteBackend::open`].
///
/// ```rust,no_run
/// use stowage::sqlite::SqliteConfig;
///
/// let config = SqliteConfig::new("/var/lib/app/records.db")
///     .table("records")
///     .max_connections(4);
/// ```
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    path: PathBuf,
    table: String,
    max_connections: u32,
}

impl SqliteConfig {
    /// Creates a config for the database file at `path` with the default
    /// table name and pool size.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table: DEFAULT_TABLE.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Overrides the table records are stored in.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Overrides the connection pool size. Must be at least 1.
    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }
}

/// A backend storing records as rows in a SQLite database.
///
/// Thread-safe: connections are checked out of the pool per operation,
/// and SQLite serialises writers internally.
pub struct SqliteBackend {
    pool: Pool<SqliteConnectionManager>,
    table: String,
}

impl SqliteBackend {
    /// Opens (or creates) the database file named by `config` and builds
    /// a connection pool over it.
    ///
    /// Parent directories are created as needed. Fails with
    /// [`StowageError::Config`] if the table name is not a bare SQL
    /// identifier or the pool size is zero.
    pub fn open(config: &SqliteConfig) -> StowageResult<Self> {
        validate_table_name(&config.table)?;
        if config.max_connections == 0 {
            return Err(StowageError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }

        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(&config.path);
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .build(manager)?;

        debug!(
            path = %config.path.display(),
            table = %config.table,
            max_connections = config.max_connections,
            "sqlite backend opened"
        );

        Ok(Self {
            pool,
            table: config.table.clone(),
        })
    }

    /// Wraps an externally constructed pool. Useful when the application
    /// already manages SQLite connections and wants records in one of
    /// its tables.
    pub fn with_pool(
        pool: Pool<SqliteConnectionManager>,
        table: impl Into<String>,
    ) -> StowageResult<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self { pool, table })
    }

    /// The table this backend stores records in.
    pub fn table(&self) -> &str {
        &self.table
    }

    fn conn(&self) -> StowageResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }
}

impl fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("table", &self.table)
            .field("max_connections", &self.pool.max_size())
            .finish()
    }
}

impl StorageBackend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn prepare(&self) -> StowageResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (uuid VARCHAR(36) PRIMARY KEY NOT NULL, data TEXT NOT NULL)",
            self.table
        );
        self.conn()?.execute(&sql, [])?;
        debug!(table = %self.table, "sqlite schema ready");
        Ok(())
    }

    fn save(&self, record: &HolderRecord) -> StowageResult<()> {
        let json = record.to_json_string()?;
        let sql = format!("REPLACE INTO {} (uuid, data) VALUES (?1, ?2)", self.table);
        self.conn()?
            .execute(&sql, params![record.uuid.to_string(), json])?;
        debug!(id = %record.uuid, "record written");
        Ok(())
    }

    fn load(&self, id: Uuid) -> StowageResult<Option<HolderRecord>> {
        let sql = format!("SELECT data FROM {} WHERE uuid = ?1", self.table);
        let data: Option<String> = self
            .conn()?
            .query_row(&sql, params![id.to_string()], |row| row.get(0))
            .optional()?;

        match data {
            Some(json) => Ok(Some(HolderRecord::from_json_slice(json.as_bytes())?)),
            None => Ok(None),
        }
    }

    fn remove(&self, id: Uuid) -> StowageResult<bool> {
        let sql = format!("DELETE FROM {} WHERE uuid = ?1", self.table);
        let removed = self.conn()?.execute(&sql, params![id.to_string()])?;
        Ok(removed > 0)
    }

    fn as_enumerable(&self) -> Option<&dyn EnumerableBackend> {
        Some(self)
    }
}

impl EnumerableBackend for SqliteBackend {
    fn list_ids(&self) -> StowageResult<BTreeSet<Uuid>> {
        let sql = format!("SELECT uuid FROM {}", self.table);
        let conn = self.conn()?;
        let mut statement = conn.prepare(&sql)?;
        let rows = statement.query_map([], |row| row.get::<_, String>(0))?;

        let mut ids = BTreeSet::new();
        for row in rows {
            let raw = row?;
            match Uuid::parse_str(&raw) {
                Ok(id) => {
                    ids.insert(id);
                }
                Err(_) => {
                    warn!(value = %raw, "skipping row with malformed uuid");
                }
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RecordEntry;
    use serde_json::json;
    use tempfile::TempDir;

    // An in-memory database would give each pooled connection its own
    // empty database, so tests always use a file.
    fn backend() -> (TempDir, SqliteBackend) {
        let dir = TempDir::new().unwrap();
        let config = SqliteConfig::new(dir.path().join("test.db"));
        let backend = SqliteBackend::open(&config).unwrap();
        backend.prepare().unwrap();
        (dir, backend)
    }

    fn record(n: i64) -> HolderRecord {
        HolderRecord {
            uuid: Uuid::new_v4(),
            data_map: vec![RecordEntry {
                tag: "test.counter".to_string(),
                data: json!({ "n": n }),
            }],
        }
    }

    #[test]
    fn test_table_name_validation() {
        assert!(validate_table_name("stowage").is_ok());
        assert!(validate_table_name("_private2").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("2fast").is_err());
        assert!(validate_table_name("drop table;--").is_err());
        assert!(validate_table_name("with space").is_err());
    }

    #[test]
    fn test_open_rejects_bad_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");

        let bad_table = SqliteConfig::new(&path).table("no;semicolons");
        assert!(matches!(
            SqliteBackend::open(&bad_table),
            Err(StowageError::Config(_))
        ));

        let no_connections = SqliteConfig::new(&path).max_connections(0);
        assert!(matches!(
            SqliteBackend::open(&no_connections),
            Err(StowageError::Config(_))
        ));
    }

    #[test]
    fn test_save_load_round_trip() {
        let (_dir, backend) = backend();
        let rec = record(69);
        backend.save(&rec).unwrap();
        assert_eq!(backend.load(rec.uuid).unwrap(), Some(rec));
    }

    #[test]
    fn test_save_is_upsert() {
        let (_dir, backend) = backend();
        let mut rec = record(1);
        backend.save(&rec).unwrap();

        rec.data_map[0].data = json!({ "n": 2 });
        backend.save(&rec).unwrap();

        let loaded = backend.load(rec.uuid).unwrap().unwrap();
        assert_eq!(loaded.data_map[0].data, json!({ "n": 2 }));
    }

    #[test]
    fn test_load_absent_is_none() {
        let (_dir, backend) = backend();
        assert_eq!(backend.load(Uuid::new_v4()).unwrap(), None);
    }

    #[test]
    fn test_remove_reports_prior_existence() {
        let (_dir, backend) = backend();
        let rec = record(1);
        backend.save(&rec).unwrap();

        assert!(backend.remove(rec.uuid).unwrap());
        assert_eq!(backend.load(rec.uuid).unwrap(), None);
        assert!(!backend.remove(rec.uuid).unwrap());
    }

    #[test]
    fn test_list_ids() {
        let (_dir, backend) = backend();
        let first = record(1);
        let second = record(2);
        backend.save(&first).unwrap();
        backend.save(&second).unwrap();

        let ids = backend.as_enumerable().unwrap().list_ids().unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first.uuid));
        assert!(ids.contains(&second.uuid));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = TempDir::new().unwrap();
        let config = SqliteConfig::new(dir.path().join("test.db"));
        let rec = record(42);

        {
            let backend = SqliteBackend::open(&config).unwrap();
            backend.prepare().unwrap();
            backend.save(&rec).unwrap();
        }

        let backend = SqliteBackend::open(&config).unwrap();
        assert_eq!(backend.load(rec.uuid).unwrap(), Some(rec));
    }

    #[test]
    fn test_custom_table_name() {
        let dir = TempDir::new().unwrap();
        let config = SqliteConfig::new(dir.path().join("test.db")).table("custom_records");
        let backend = SqliteBackend::open(&config).unwrap();
        backend.prepare().unwrap();
        assert_eq!(backend.table(), "custom_records");

        let rec = record(7);
        backend.save(&rec).unwrap();
        assert_eq!(backend.load(rec.uuid).unwrap(), Some(rec));
    }

    #[test]
    fn test_with_pool() {
        let dir = TempDir::new().unwrap();
        let manager = SqliteConnectionManager::file(dir.path().join("test.db"));
        let pool = Pool::builder().max_size(2).build(manager).unwrap();

        let backend = SqliteBackend::with_pool(pool, "shared").unwrap();
        backend.prepare().unwrap();

        let rec = record(3);
        backend.save(&rec).unwrap();
        assert_eq!(backend.load(rec.uuid).unwrap(), Some(rec));
    }
}
