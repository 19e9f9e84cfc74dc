// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Stowage - Element contract
//
// An element is one typed unit of payload inside a holder. Concrete types
// implement `ElementType` (a canonical wire tag, optional legacy aliases,
// and an overridable serde codec); the object-safe `Element` trait carries
// the lifecycle hooks fired as elements move through attach, decode, and
// save.

use std::any::Any;
use std::sync::{Arc, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{StowageError, StowageResult};
use crate::holder::Holder;

/// Object-safe upcast to [`Any`], blanket-implemented for every concrete
/// type so `dyn Element` can be downcast.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A typed unit of payload carried by a holder.
///
/// All hooks default to no-ops. They fire in a fixed order: `on_attach`
/// exactly once when the element is bound into a holder (by direct attach
/// or by decode), `on_load` immediately after `on_attach` when the element
/// came from a decoded record, and `before_save` every time the owning
/// holder is encoded for persistence.
pub trait Element: AsAny + Send + Sync {
    /// Called once when the element is bound into a holder. `holder` is a
    /// non-owning back-reference the element may keep; it is never
    /// serialized and never extends the holder's lifetime.
    fn on_attach(&mut self, holder: &HolderRef) {
        let _ = holder;
    }

    /// Called once after the element has been decoded from its wire form.
    fn on_load(&mut self) {}

    /// Called immediately before the owning holder is encoded for saving.
    fn before_save(&mut self) {}
}

impl dyn Element {
    /// Returns true if the boxed element is a `T`.
    pub fn is<T: Element>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Borrows the element as a concrete `T`, if it is one.
    pub fn downcast_ref<T: Element>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Mutably borrows the element as a concrete `T`, if it is one.
    pub fn downcast_mut<T: Element>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// Static contract for a registrable element type: a canonical wire tag,
/// optional legacy aliases, and a serde-backed wire codec.
///
/// The codec methods are the per-type override point. Types that need
/// field filtering or a custom wire layout override `encode_value` /
/// `decode_value`; everything else inherits the serde defaults.
pub trait ElementType: Element + Default + Serialize + DeserializeOwned + 'static {
    /// Canonical type tag written on the wire.
    const TAG: &'static str;

    /// Legacy tags that resolve to this type during decode. Re-encoding
    /// always emits [`Self::TAG`], never an alias.
    const ALIASES: &'static [&'static str] = &[];

    /// Encodes this element to its wire value.
    fn encode_value(&self) -> StowageResult<Value> {
        serde_json::to_value(self).map_err(StowageError::from)
    }

    /// Decodes an element from its wire value.
    fn decode_value(value: Value) -> StowageResult<Self> {
        serde_json::from_value(value).map_err(|source| StowageError::ElementDecode {
            tag: Self::TAG.to_string(),
            source,
        })
    }
}

// ---------- Holder back-reference ----------

/// Non-owning back-reference from an element to the holder it is attached
/// to, handed to [`Element::on_attach`].
///
/// Holds only weak handles: it never keeps the holder alive. Elements that
/// keep one must exclude it from their wire form (`#[serde(skip)]`); the
/// `Default` value is an unbound reference.
#[derive(Clone, Debug, Default)]
pub struct HolderRef {
    inner: Option<BoundRef>,
}

#[derive(Clone, Debug)]
struct BoundRef {
    id: Uuid,
    holder: Weak<Holder>,
}

impl HolderRef {
    pub(crate) fn bound(id: Uuid, holder: Weak<Holder>) -> Self {
        Self {
            inner: Some(BoundRef { id, holder }),
        }
    }

    /// UUID of the holder this element is attached to, if bound.
    pub fn id(&self) -> Option<Uuid> {
        self.inner.as_ref().map(|r| r.id)
    }

    /// Upgrades to the owning holder, if it is still alive.
    pub fn holder(&self) -> Option<Arc<Holder>> {
        self.inner.as_ref().and_then(|r| r.holder.upgrade())
    }

    /// Persists the owning holder through the store it belongs to.
    ///
    /// Fails with [`StowageError::Detached`] when the holder or its store
    /// has been dropped; an unbound reference reports the nil UUID.
    pub fn save(&self) -> StowageResult<()> {
        let bound = self
            .inner
            .as_ref()
            .ok_or(StowageError::Detached(Uuid::nil()))?;
        match bound.holder.upgrade() {
            Some(holder) => holder.save(),
            None => Err(StowageError::Detached(bound.id)),
        }
    }
}
