// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Stowage - Holder
//
// A holder is one UUID-keyed record in live form. It carries two tag-keyed
// maps behind a single mutex: decoded elements (live, typed) and pending
// elements (still in wire form, decoded on first typed access). A tag
// moves from pending to decoded at most once; afterwards every access
// hits the same instance.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tracing::trace;
use uuid::Uuid;

use crate::element::{Element, ElementType, HolderRef};
use crate::error::{StowageError, StowageResult};
use crate::registry::{EncodeFn, Registration};
use crate::store::StoreInner;

pub(crate) struct DecodedSlot {
    pub(crate) element: Box<dyn Element>,
    pub(crate) encode: EncodeFn,
}

#[derive(Default)]
pub(crate) struct HolderState {
    /// Live elements, keyed by canonical tag.
    pub(crate) decoded: HashMap<&'static str, DecodedSlot>,
    /// Elements still in wire form, keyed by the tag they arrived under.
    pub(crate) pending: HashMap<String, Value>,
}

/// One record in live form: a UUID identity plus its typed elements.
///
/// Holders are handed out as `Arc<Holder>` by a [`Store`](crate::Store)
/// and stay bound to that store for their whole life. Element access is
/// internally synchronized; clones of the `Arc` can be used from any
/// thread.
pub struct Holder {
    id: Uuid,
    store: Weak<StoreInner>,
    weak_self: Weak<Holder>,
    state: Mutex<HolderState>,
}

impl Holder {
    pub(crate) fn new_arc(id: Uuid, store: Weak<StoreInner>) -> Arc<Holder> {
        Arc::new_cyclic(|weak_self| Holder {
            id,
            store,
            weak_self: weak_self.clone(),
            state: Mutex::new(HolderState::default()),
        })
    }

    /// UUID identity of this record.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, HolderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn back_ref(&self) -> HolderRef {
        HolderRef::bound(self.id, self.weak_self.clone())
    }

    // ---------- Element access ----------

    /// Attaches an element, replacing any element of the same type.
    ///
    /// Fires `on_attach` once. Any wire-form entry under the type's
    /// canonical tag or one of its aliases is discarded in favor of the
    /// attached element.
    pub fn attach<T: ElementType>(&self, element: T) {
        self.bind_decoded(Registration::of::<T>(), Box::new(element), false);
    }

    /// Runs `f` against the element of type `T`, decoding it from wire
    /// form first if necessary. Returns `Ok(None)` when the holder has no
    /// such element.
    pub fn with_element<T: ElementType, R>(
        &self,
        f: impl FnOnce(&T) -> R,
    ) -> StowageResult<Option<R>> {
        self.ensure_decoded::<T>()?;
        let state = self.lock_state();
        Ok(state
            .decoded
            .get(T::TAG)
            .and_then(|slot| slot.element.downcast_ref::<T>())
            .map(f))
    }

    /// Like [`Holder::with_element`], with mutable access. Mutations are
    /// visible to every subsequent access and are picked up by the next
    /// save.
    pub fn with_element_mut<T: ElementType, R>(
        &self,
        f: impl FnOnce(&mut T) -> R,
    ) -> StowageResult<Option<R>> {
        self.ensure_decoded::<T>()?;
        let mut state = self.lock_state();
        Ok(state
            .decoded
            .get_mut(T::TAG)
            .and_then(|slot| slot.element.downcast_mut::<T>())
            .map(f))
    }

    /// Returns a clone of the element of type `T`, if present.
    pub fn get_element<T: ElementType + Clone>(&self) -> StowageResult<Option<T>> {
        self.with_element(T::clone)
    }

    /// Returns a clone of the element of type `T`, attaching a default
    /// instance first when the holder has none.
    pub fn get_or_create_element<T: ElementType + Clone>(&self) -> StowageResult<T> {
        if let Some(existing) = self.get_element::<T>()? {
            return Ok(existing);
        }
        self.attach(T::default());
        Ok(self.get_element::<T>()?.unwrap_or_default())
    }

    /// Detaches the element of type `T`, wire-form or decoded. Returns
    /// whether anything was removed.
    pub fn remove_element<T: ElementType>(&self) -> bool {
        let mut state = self.lock_state();
        let mut removed = state.decoded.remove(T::TAG).is_some();
        removed |= state.pending.remove(T::TAG).is_some();
        for alias in T::ALIASES {
            removed |= state.pending.remove(*alias).is_some();
        }
        removed
    }

    /// True if the holder carries an element of type `T`, decoded or not.
    /// Never triggers a decode.
    pub fn has_element<T: ElementType>(&self) -> bool {
        let state = self.lock_state();
        state.decoded.contains_key(T::TAG)
            || state.pending.contains_key(T::TAG)
            || T::ALIASES.iter().any(|alias| state.pending.contains_key(*alias))
    }

    /// Canonical tags of all decoded elements.
    pub fn decoded_tags(&self) -> Vec<String> {
        self.lock_state()
            .decoded
            .keys()
            .map(|tag| tag.to_string())
            .collect()
    }

    /// Wire tags of all elements still awaiting decode.
    pub fn pending_tags(&self) -> Vec<String> {
        self.lock_state().pending.keys().cloned().collect()
    }

    // ---------- Persistence delegation ----------

    /// Persists this holder through the store it belongs to.
    pub fn save(&self) -> StowageResult<()> {
        match self.store.upgrade() {
            Some(store) => store.save_holder(self),
            None => Err(StowageError::Detached(self.id)),
        }
    }

    /// Deletes this record from its store: evicted from memory and removed
    /// from the backend. Returns whether the backend had the record.
    pub fn delete(&self) -> StowageResult<bool> {
        match self.store.upgrade() {
            Some(store) => store.delete_record(self.id),
            None => Err(StowageError::Detached(self.id)),
        }
    }

    // ---------- Internals ----------

    /// Binds a live element under its canonical tag, firing `on_attach`
    /// (and `on_load` when the element came from wire form). Pending
    /// entries under the canonical tag or any alias are dropped.
    ///
    /// Hooks run before the state lock is taken, so an `on_attach` that
    /// stashes the back-reference cannot deadlock against element access.
    pub(crate) fn bind_decoded(
        &self,
        registration: Registration,
        mut element: Box<dyn Element>,
        loaded: bool,
    ) {
        let back_ref = self.back_ref();
        element.on_attach(&back_ref);
        if loaded {
            element.on_load();
        }
        let slot = DecodedSlot {
            element,
            encode: registration.encode_fn(),
        };
        let mut state = self.lock_state();
        state.pending.remove(registration.tag());
        for alias in registration.aliases() {
            state.pending.remove(*alias);
        }
        state.decoded.insert(registration.tag(), slot);
    }

    pub(crate) fn insert_pending(&self, tag: String, value: Value) {
        self.lock_state().pending.insert(tag, value);
    }

    /// Fires `before_save` on every decoded element. Runs under the state
    /// lock; the hook contract forbids calling back into the holder.
    pub(crate) fn run_before_save(&self) {
        let mut state = self.lock_state();
        for slot in state.decoded.values_mut() {
            slot.element.before_save();
        }
    }

    /// Moves the element of type `T` from wire form to live form if it is
    /// still pending. Memoized: once decoded, later calls are map hits.
    ///
    /// Concurrent first accesses may race the decode; the last bind wins
    /// and every later access sees that one instance.
    fn ensure_decoded<T: ElementType>(&self) -> StowageResult<()> {
        let encoded = {
            let state = self.lock_state();
            if state.decoded.contains_key(T::TAG) {
                return Ok(());
            }
            let hit = if state.pending.contains_key(T::TAG) {
                Some(T::TAG)
            } else {
                T::ALIASES
                    .iter()
                    .copied()
                    .find(|alias| state.pending.contains_key(*alias))
            };
            match hit {
                // Clone rather than remove, so a failed decode leaves the
                // wire form in place for a later retry or re-save.
                Some(tag) => state.pending.get(tag).cloned(),
                None => return Ok(()),
            }
        };
        if let Some(value) = encoded {
            let element = Box::new(T::decode_value(value)?);
            trace!(id = %self.id, tag = T::TAG, "element decoded on first access");
            self.bind_decoded(Registration::of::<T>(), element, true);
        }
        Ok(())
    }
}

impl fmt::Debug for Holder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        let decoded: Vec<&str> = state.decoded.keys().copied().collect();
        let pending: Vec<&String> = state.pending.keys().collect();
        f.debug_struct("Holder")
            .field("id", &self.id)
            .field("decoded", &decoded)
            .field("pending", &pending)
            .finish()
    }
}
