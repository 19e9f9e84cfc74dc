// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Stowage - Type registry
//
// Maps wire tags to element registrations. A registration is a small
// record of function pointers (create / decode / encode) captured from a
// concrete `ElementType`, so the registry itself stays object-level while
// decoding stays fully typed. Lookup falls back from canonical tags to
// aliases to an ordered resolver chain.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::element::{Element, ElementType};
use crate::error::{StowageError, StowageResult};

/// Erased encode function for one element type, captured at registration
/// or attach time and carried alongside the live element.
pub(crate) type EncodeFn = fn(&dyn Element) -> StowageResult<Value>;

fn create_erased<T: ElementType>() -> Box<dyn Element> {
    Box::new(T::default())
}

fn decode_erased<T: ElementType>(value: Value) -> StowageResult<Box<dyn Element>> {
    Ok(Box::new(T::decode_value(value)?))
}

pub(crate) fn encode_erased<T: ElementType>(element: &dyn Element) -> StowageResult<Value> {
    match element.downcast_ref::<T>() {
        Some(concrete) => concrete.encode_value(),
        None => Err(StowageError::TypeMismatch(T::TAG.to_string())),
    }
}

/// Factory record for one registered element type.
#[derive(Clone, Copy, Debug)]
pub struct Registration {
    tag: &'static str,
    aliases: &'static [&'static str],
    create: fn() -> Box<dyn Element>,
    decode: fn(Value) -> StowageResult<Box<dyn Element>>,
    encode: EncodeFn,
}

impl Registration {
    /// Builds the registration for a concrete element type.
    pub fn of<T: ElementType>() -> Self {
        Self {
            tag: T::TAG,
            aliases: T::ALIASES,
            create: create_erased::<T>,
            decode: decode_erased::<T>,
            encode: encode_erased::<T>,
        }
    }

    /// Canonical wire tag.
    pub fn tag(&self) -> &'static str {
        self.tag
    }

    /// Legacy tags that resolve to this registration.
    pub fn aliases(&self) -> &'static [&'static str] {
        self.aliases
    }

    /// Instantiates a default-valued element of this type.
    pub fn create(&self) -> Box<dyn Element> {
        (self.create)()
    }

    /// Decodes a wire value into a live element of this type.
    pub fn decode(&self, value: Value) -> StowageResult<Box<dyn Element>> {
        (self.decode)(value)
    }

    pub(crate) fn encode_fn(&self) -> EncodeFn {
        self.encode
    }
}

/// Fallback lookup consulted, in order, when a wire tag matches neither a
/// canonical tag nor an alias. Lets applications bridge tags coming from
/// plugin systems or renamed modules without pre-registering every
/// variant.
pub trait TagResolver: Send + Sync {
    /// Resolves a tag to a registration, or `None` to pass the tag to the
    /// next resolver in the chain.
    fn resolve(&self, tag: &str) -> Option<Registration>;
}

/// Registry of element types addressable by wire tag.
///
/// Applications register every element type up front; the registry is then
/// shared read-only behind an `Arc`. Lookup order for a wire tag:
/// canonical tags, then aliases, then each resolver in insertion order.
/// A tag that falls through the whole chain is unknown, and decoding a
/// record containing it fails.
#[derive(Default)]
pub struct TypeRegistry {
    by_tag: HashMap<&'static str, Registration>,
    aliases: HashMap<&'static str, &'static str>,
    resolvers: Vec<Box<dyn TagResolver>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under its canonical tag and all of its aliases.
    /// Registering the same tag again replaces the earlier entry.
    pub fn register<T: ElementType>(&mut self) -> &mut Self {
        self.insert(Registration::of::<T>());
        self
    }

    /// Inserts a prebuilt registration.
    pub fn insert(&mut self, registration: Registration) {
        for alias in registration.aliases() {
            self.aliases.insert(alias, registration.tag());
        }
        self.by_tag.insert(registration.tag(), registration);
        debug!(
            tag = registration.tag(),
            aliases = registration.aliases().len(),
            "element type registered"
        );
    }

    /// Appends a resolver to the fallback chain.
    pub fn add_resolver(&mut self, resolver: Box<dyn TagResolver>) {
        self.resolvers.push(resolver);
    }

    /// Looks up a wire tag: canonical, then alias, then the resolver chain.
    pub fn resolve(&self, tag: &str) -> Option<Registration> {
        if let Some(registration) = self.by_tag.get(tag) {
            return Some(*registration);
        }
        if let Some(canonical) = self.aliases.get(tag) {
            if let Some(registration) = self.by_tag.get(canonical) {
                return Some(*registration);
            }
        }
        self.resolvers.iter().find_map(|resolver| resolver.resolve(tag))
    }

    /// Like [`TypeRegistry::resolve`], but an unmatched tag is an error.
    pub(crate) fn resolve_required(&self, tag: &str) -> StowageResult<Registration> {
        self.resolve(tag)
            .ok_or_else(|| StowageError::UnknownTag(tag.to_string()))
    }

    /// True if the tag resolves canonically, via alias, or via the chain.
    pub fn contains(&self, tag: &str) -> bool {
        self.resolve(tag).is_some()
    }

    /// Number of canonical registrations.
    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }
}
