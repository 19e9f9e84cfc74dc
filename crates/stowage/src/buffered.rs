// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Stowage - Buffered file backend
//
// Stores every record as N redundant JSON copies: `{uuid}.json`,
// `{uuid}_1.json`, ... `{uuid}_{N-1}.json`. A write that dies midway
// leaves earlier copies intact; load scans the copies in index order and
// takes the first one that parses, logging and skipping damaged copies.
// Load fails only when copies exist and none of them is readable.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{EnumerableBackend, StorageBackend};
use crate::codec::HolderRecord;
use crate::error::{StowageError, StowageResult};
use crate::flat_file::RECORD_EXTENSION;

/// Default number of redundant copies per record.
pub const DEFAULT_COPIES: u32 = 3;

/// Build the file name for copy `index` of a record. Copy 0 carries no
/// suffix, so a one-copy layout is identical to the flat-file backend's.
pub(crate) fn copy_filename(id: Uuid, index: u32) -> String {
    if index == 0 {
        format!("{id}.{RECORD_EXTENSION}")
    } else {
        format!("{id}_{index}.{RECORD_EXTENSION}")
    }
}

/// Parse a record id from a copy file name, accepting both the bare and
/// the `_{index}` suffixed form. Returns `None` for anything else.
pub(crate) fn parse_copy_filename(name: &str) -> Option<Uuid> {
    let stem = name.strip_suffix(&format!(".{RECORD_EXTENSION}"))?;
    let base = match stem.split_once('_') {
        Some((base, index)) => {
            index.parse::<u32>().ok()?;
            base
        }
        None => stem,
    };
    Uuid::parse_str(base).ok()
}

/// A backend keeping N redundant file copies of every record.
///
/// Copies are written sequentially on save; the first write failure
/// aborts the save. On load the lowest-indexed readable copy wins.
#[derive(Debug, Clone)]
pub struct BufferedFileBackend {
    dir: PathBuf,
    copies: u32,
}

impl BufferedFileBackend {
    /// Creates a backend rooted at `dir` keeping `copies` redundant copies
    /// per record. Fails with a configuration error when `copies` is zero.
    pub fn new(dir: impl Into<PathBuf>, copies: u32) -> StowageResult<Self> {
        if copies == 0 {
            return Err(StowageError::Config(
                "buffered backend needs at least one copy per record".to_string(),
            ));
        }
        Ok(Self {
            dir: dir.into(),
            copies,
        })
    }

    /// Creates a backend with [`DEFAULT_COPIES`] copies per record.
    pub fn with_default_copies(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            copies: DEFAULT_COPIES,
        }
    }

    /// The directory this backend stores record copies in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of redundant copies written per record.
    pub fn copies(&self) -> u32 {
        self.copies
    }

    fn copy_path(&self, id: Uuid, index: u32) -> PathBuf {
        self.dir.join(copy_filename(id, index))
    }
}

impl StorageBackend for BufferedFileBackend {
    fn name(&self) -> &str {
        "buffered-file"
    }

    fn prepare(&self) -> StowageResult<()> {
        fs::create_dir_all(&self.dir)?;
        debug!(
            dir = %self.dir.display(),
            copies = self.copies,
            "buffered-file storage prepared"
        );
        Ok(())
    }

    fn save(&self, record: &HolderRecord) -> StowageResult<()> {
        let json = record.to_json_string()?;
        for index in 0..self.copies {
            fs::write(self.copy_path(record.uuid, index), &json)?;
        }
        debug!(id = %record.uuid, copies = self.copies, "record copies written");
        Ok(())
    }

    fn load(&self, id: Uuid) -> StowageResult<Option<HolderRecord>> {
        let mut last_error: Option<StowageError> = None;
        for index in 0..self.copies {
            let path = self.copy_path(id, index);
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(id = %id, copy = index, error = %e, "record copy unreadable");
                    last_error = Some(e.into());
                    continue;
                }
            };
            match HolderRecord::from_json_slice(&bytes) {
                Ok(record) => {
                    if last_error.is_some() {
                        warn!(id = %id, copy = index, "record recovered from redundant copy");
                    }
                    return Ok(Some(record));
                }
                Err(e) => {
                    warn!(id = %id, copy = index, error = %e, "record copy damaged");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            // Copies existed but none survived parsing: a real failure,
            // not an absent record.
            Some(error) => Err(error),
            None => Ok(None),
        }
    }

    fn remove(&self, id: Uuid) -> StowageResult<bool> {
        let mut removed = false;
        for index in 0..self.copies {
            match fs::remove_file(self.copy_path(id, index)) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if removed {
            debug!(id = %id, "record copies removed");
        }
        Ok(removed)
    }

    fn as_enumerable(&self) -> Option<&dyn EnumerableBackend> {
        Some(self)
    }
}

impl EnumerableBackend for BufferedFileBackend {
    fn list_ids(&self) -> StowageResult<BTreeSet<Uuid>> {
        let mut ids = BTreeSet::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let dir_entry = dir_entry?;
            let file_name = dir_entry.file_name();
            let name = file_name.to_string_lossy();
            if let Some(id) = parse_copy_filename(&name) {
                ids.insert(id);
            }
        }
        Ok(ids)
    }
}
