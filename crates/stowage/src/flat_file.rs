// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Stowage - Flat-file backend
//
// One record per file, named `{uuid}.json`, in a single directory. The
// simplest durable backend: no redundancy, no index, the directory
// listing is the index. Enumeration parses file names and silently
// ignores anything that does not look like a record.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::backend::{EnumerableBackend, StorageBackend};
use crate::codec::HolderRecord;
use crate::error::StowageResult;

/// The file extension used for record files.
pub const RECORD_EXTENSION: &str = "json";

/// Build the canonical file name for a record.
///
/// Format: `67e55044-10b1-426f-9247-bb680e5fe0c8.json`
pub(crate) fn record_filename(id: Uuid) -> String {
    format!("{id}.{RECORD_EXTENSION}")
}

/// Parse a record id from a flat file name.
///
/// Returns `None` if the name does not match `{uuid}.json`.
pub(crate) fn parse_record_filename(name: &str) -> Option<Uuid> {
    let stem = name.strip_suffix(&format!(".{RECORD_EXTENSION}"))?;
    Uuid::parse_str(stem).ok()
}

/// A backend storing each record as one JSON file in a directory.
#[derive(Debug, Clone)]
pub struct FlatFileBackend {
    dir: PathBuf,
}

impl FlatFileBackend {
    /// Creates a backend rooted at `dir`. The directory itself is created
    /// by [`StorageBackend::prepare`], not here.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory this backend stores records in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(record_filename(id))
    }
}

impl StorageBackend for FlatFileBackend {
    fn name(&self) -> &str {
        "flat-file"
    }

    fn prepare(&self) -> StowageResult<()> {
        fs::create_dir_all(&self.dir)?;
        debug!(dir = %self.dir.display(), "flat-file storage prepared");
        Ok(())
    }

    fn save(&self, record: &HolderRecord) -> StowageResult<()> {
        let json = record.to_json_string()?;
        fs::write(self.record_path(record.uuid), json)?;
        debug!(id = %record.uuid, "record written");
        Ok(())
    }

    fn load(&self, id: Uuid) -> StowageResult<Option<HolderRecord>> {
        let bytes = match fs::read(self.record_path(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(HolderRecord::from_json_slice(&bytes)?))
    }

    fn remove(&self, id: Uuid) -> StowageResult<bool> {
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => {
                debug!(id = %id, "record file removed");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn as_enumerable(&self) -> Option<&dyn EnumerableBackend> {
        Some(self)
    }
}

impl EnumerableBackend for FlatFileBackend {
    fn list_ids(&self) -> StowageResult<BTreeSet<Uuid>> {
        let mut ids = BTreeSet::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let dir_entry = dir_entry?;
            let file_name = dir_entry.file_name();
            let name = file_name.to_string_lossy();
            if let Some(id) = parse_record_filename(&name) {
                ids.insert(id);
            }
        }
        Ok(ids)
    }
}
