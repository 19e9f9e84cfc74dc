// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Stowage - Wire codec
//
// Defines the wire form of a record and the conversions between wire and
// live form. A record is one JSON object:
//
//   {"uuid": "<uuid>", "dataMap": [{"class": "<tag>", "data": {...}}]}
//
// Element order inside dataMap is unspecified. Decoded elements always
// re-encode under their canonical tag; entries that were never decoded
// are re-emitted byte-for-byte under the tag they arrived with.

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StowageResult;
use crate::holder::Holder;
use crate::registry::TypeRegistry;
use crate::store::StoreInner;

/// When element payloads are decoded after a record is loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodeMode {
    /// Resolve and instantiate every element at load time. A record
    /// carrying an unresolvable tag fails to load.
    #[default]
    Eager,
    /// Keep elements in wire form until first typed access. Untouched
    /// elements survive a save unchanged, and unresolvable tags are
    /// carried along rather than rejected.
    Lazy,
}

/// One record in wire form. Field names are the wire contract and must
/// not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolderRecord {
    pub uuid: Uuid,
    #[serde(rename = "dataMap", default)]
    pub data_map: Vec<RecordEntry>,
}

/// One tagged element payload inside a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEntry {
    #[serde(rename = "class")]
    pub tag: String,
    pub data: Value,
}

impl HolderRecord {
    /// An empty record for the given id.
    pub fn empty(uuid: Uuid) -> Self {
        Self {
            uuid,
            data_map: Vec::new(),
        }
    }

    /// Renders the record as a JSON string (the on-disk and in-database
    /// representation used by the bundled backends).
    pub fn to_json_string(&self) -> StowageResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a record from JSON bytes.
    pub fn from_json_slice(bytes: &[u8]) -> StowageResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl Holder {
    /// Encodes this holder to its wire record.
    pub(crate) fn to_record(&self) -> StowageResult<HolderRecord> {
        let state = self.lock_state();
        let mut data_map = Vec::with_capacity(state.decoded.len() + state.pending.len());
        for (tag, slot) in &state.decoded {
            let data = (slot.encode)(slot.element.as_ref())?;
            data_map.push(RecordEntry {
                tag: (*tag).to_string(),
                data,
            });
        }
        for (tag, value) in &state.pending {
            // A decoded element shadows a same-tagged wire entry.
            if state.decoded.contains_key(tag.as_str()) {
                continue;
            }
            data_map.push(RecordEntry {
                tag: tag.clone(),
                data: value.clone(),
            });
        }
        Ok(HolderRecord {
            uuid: self.id(),
            data_map,
        })
    }

    /// Builds a live holder from a wire record.
    ///
    /// Under [`DecodeMode::Eager`] every entry is resolved through the
    /// registry and instantiated, firing `on_attach` then `on_load`; the
    /// first unresolvable tag or failing payload aborts the whole record.
    /// Under [`DecodeMode::Lazy`] every entry lands in the pending map
    /// untouched.
    pub(crate) fn from_record(
        record: HolderRecord,
        registry: &TypeRegistry,
        mode: DecodeMode,
        store: Weak<StoreInner>,
    ) -> StowageResult<Arc<Holder>> {
        let holder = Holder::new_arc(record.uuid, store);
        match mode {
            DecodeMode::Eager => {
                for entry in record.data_map {
                    let registration = registry.resolve_required(&entry.tag)?;
                    let element = registration.decode(entry.data)?;
                    holder.bind_decoded(registration, element, true);
                }
            }
            DecodeMode::Lazy => {
                for entry in record.data_map {
                    holder.insert_pending(entry.tag, entry.data);
                }
            }
        }
        Ok(holder)
    }
}
