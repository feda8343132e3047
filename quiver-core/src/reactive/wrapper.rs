//! Reactive Object Wrappers
//!
//! A [`Reactive`] wraps a raw [`Target`] and intercepts every read and write
//! made through it. Reads subscribe the running computation to the slot that
//! was read; writes that change something notify the slot's subscribers.
//!
//! # Variants
//!
//! | variant            | tracks reads | writes   | nested objects          |
//! |--------------------|--------------|----------|-------------------------|
//! | `Reactive`         | yes          | allowed  | wrapped reactive        |
//! | `ShallowReactive`  | yes          | allowed  | returned as stored      |
//! | `Readonly`         | no           | rejected | wrapped readonly        |
//! | `ShallowReadonly`  | no           | rejected | returned as stored      |
//!
//! A readonly view made from a mutable wrapper (`reactive(x).to_readonly()`)
//! reads through that wrapper, so it still tracks. Rejected writes log a
//! warning and leave the target unchanged.
//!
//! Wrapping is idempotent per (target, variant): see [`Runtime`]. Wrapping
//! an existing wrapper with a mutable variant returns it unchanged, so a
//! readonly wrapper is never upgraded to a mutable one.
//!
//! # Arrays
//!
//! Length-changing methods (`push`, `pop`, `shift`, `unshift`, `splice`,
//! `set_len`) run with tracking paused, apply the whole mutation, then notify
//! every changed index and the length in a single pass.

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use super::context::pause_tracking;
use super::operations::{Key, TrackOp, TriggerOp};
use super::runtime::{Runtime, Slot};
use super::target::{
    array_length, is_index_like, parse_index, Change, Target, TargetData, TargetId, TargetKind,
    MAX_ARRAY_LENGTH,
};
use super::value::{has_changed, HashKey, Value};

/// The four wrapper flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Reactive,
    ShallowReactive,
    Readonly,
    ShallowReadonly,
}

impl Variant {
    pub fn is_readonly(self) -> bool {
        matches!(self, Variant::Readonly | Variant::ShallowReadonly)
    }

    pub fn is_shallow(self) -> bool {
        matches!(self, Variant::ShallowReactive | Variant::ShallowReadonly)
    }
}

pub(crate) struct ReactiveInner {
    target: Target,
    variant: Variant,
    /// The mutable wrapper a readonly view reads through.
    base: Option<Reactive>,
}

impl ReactiveInner {
    fn slot(&self) -> Slot {
        (self.variant, self.base.as_ref().map(Reactive::variant))
    }
}

impl Drop for ReactiveInner {
    fn drop(&mut self) {
        Runtime::evict(self.target.id(), self.slot());
    }
}

/// An intercepting wrapper around a raw target.
///
/// Cloning yields another handle to the same wrapper.
#[derive(Clone)]
pub struct Reactive {
    inner: Arc<ReactiveInner>,
}

fn wrap_target(target: &Target, variant: Variant) -> Reactive {
    Runtime::get_or_insert(target.id(), (variant, None), || {
        Arc::new(ReactiveInner {
            target: target.clone(),
            variant,
            base: None,
        })
    })
}

fn wrap_proxy(proxy: &Reactive, variant: Variant) -> Reactive {
    if !variant.is_readonly() || proxy.is_readonly() {
        return proxy.clone();
    }
    Runtime::get_or_insert(proxy.id(), (variant, Some(proxy.variant())), || {
        Arc::new(ReactiveInner {
            target: proxy.raw(),
            variant,
            base: Some(proxy.clone()),
        })
    })
}

/// Wrap objects with `variant`; other values pass through.
pub(crate) fn wrap_value(value: &Value, variant: Variant) -> Value {
    match value {
        Value::Object(target) => Value::Proxy(wrap_target(target, variant)),
        Value::Proxy(proxy) => Value::Proxy(wrap_proxy(proxy, variant)),
        other => other.clone(),
    }
}

/// Deep mutable wrapper.
///
/// # Example
///
/// ```rust
/// use quiver_core::reactive::{effect, reactive, Target, Value};
///
/// let state = reactive(&Target::object([("count", 0)]));
///
/// let reader = state.clone();
/// let e = effect(move || {
///     println!("count = {:?}", reader.get("count"));
/// });
///
/// state.set("count", 1); // prints "count = Number(1.0)"
/// assert_eq!(state.get("count"), Value::from(1));
/// e.stop();
/// ```
pub fn reactive(target: &Target) -> Reactive {
    wrap_target(target, Variant::Reactive)
}

/// Mutable wrapper whose nested objects are returned as stored.
pub fn shallow_reactive(target: &Target) -> Reactive {
    wrap_target(target, Variant::ShallowReactive)
}

/// Deep readonly wrapper. Reads through it do not track.
pub fn readonly(target: &Target) -> Reactive {
    wrap_target(target, Variant::Readonly)
}

pub fn shallow_readonly(target: &Target) -> Reactive {
    wrap_target(target, Variant::ShallowReadonly)
}

/// Whether `value` is a wrapper that tracks reads.
pub fn is_reactive(value: &Value) -> bool {
    value.is_reactive()
}

pub fn is_readonly(value: &Value) -> bool {
    value.is_readonly()
}

pub fn is_shallow(value: &Value) -> bool {
    value.is_shallow()
}

pub fn is_proxy(value: &Value) -> bool {
    value.is_proxy()
}

/// Strip every wrapper layer from `value`.
pub fn to_raw(value: &Value) -> Value {
    value.to_raw()
}

impl Reactive {
    pub(crate) fn from_inner(inner: Arc<ReactiveInner>) -> Self {
        Self { inner }
    }

    /// The raw target behind every wrapper layer.
    pub fn raw(&self) -> Target {
        self.inner.target.clone()
    }

    pub(crate) fn target(&self) -> &Target {
        &self.inner.target
    }

    /// Identity of the raw target.
    pub fn id(&self) -> TargetId {
        self.inner.target.id()
    }

    pub fn kind(&self) -> TargetKind {
        self.inner.target.kind()
    }

    pub fn variant(&self) -> Variant {
        self.inner.variant
    }

    pub(crate) fn base(&self) -> Option<&Reactive> {
        self.inner.base.as_ref()
    }

    /// Whether reads through this wrapper track: true for mutable wrappers
    /// and for readonly views over them.
    pub fn is_reactive(&self) -> bool {
        !self.inner.variant.is_readonly() || self.inner.base.is_some()
    }

    pub fn is_readonly(&self) -> bool {
        self.inner.variant.is_readonly()
    }

    pub fn is_shallow(&self) -> bool {
        self.inner.variant.is_shallow()
    }

    pub fn ptr_eq(&self, other: &Reactive) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Deep readonly view of this wrapper.
    pub fn to_readonly(&self) -> Reactive {
        wrap_proxy(self, Variant::Readonly)
    }

    pub fn to_shallow_readonly(&self) -> Reactive {
        wrap_proxy(self, Variant::ShallowReadonly)
    }

    // ---- Interception helpers ----

    pub(crate) fn track(&self, op: TrackOp, key: Key) {
        if !self.is_readonly() {
            self.inner.target.track(op, key);
        }
    }

    /// Re-wrap a value read from the target according to the variant.
    pub(crate) fn wrap_child(&self, value: Value) -> Value {
        match self.inner.variant {
            Variant::ShallowReactive | Variant::ShallowReadonly => value,
            Variant::Reactive => wrap_value(&value, Variant::Reactive),
            Variant::Readonly => wrap_value(&value, Variant::Readonly),
        }
    }

    /// Convert a written value to the form stored in the target. Deep
    /// wrappers store raw objects unless the value is a readonly or shallow
    /// wrapper.
    pub(crate) fn incoming(&self, value: Value) -> Value {
        if !self.is_shallow() && !value.is_readonly() && !value.is_shallow() {
            value.to_raw()
        } else {
            value
        }
    }

    /// Warn and return true when this wrapper rejects writes.
    pub(crate) fn reject(&self, op: &str, key: &dyn fmt::Display) -> bool {
        if self.is_readonly() {
            warn!(
                target_id = %self.id(),
                op,
                key = %key,
                "{op} operation on key \"{key}\" failed: target is readonly."
            );
            return true;
        }
        false
    }

    /// Warn about an index past the array limit. Always false.
    fn out_of_range(&self, op: &str, key: &dyn fmt::Display) -> bool {
        warn!(
            target_id = %self.id(),
            op,
            key = %key,
            "{op} operation on key \"{key}\" failed: invalid array index."
        );
        false
    }

    // ---- Property access ----

    /// Read a property. Arrays answer `"length"` and index strings.
    pub fn get(&self, key: &str) -> Value {
        if let Some(base) = self.base() {
            return self.wrap_child(base.get(key));
        }
        match self.kind() {
            TargetKind::Object => {
                self.track(TrackOp::Get, Key::prop(key));
                self.wrap_child(self.inner.target.get(key))
            }
            TargetKind::Array if key == "length" => Value::from(self.len()),
            TargetKind::Array => match parse_index(key) {
                Some(index) => self.at(index),
                None => Value::Undefined,
            },
            TargetKind::Map | TargetKind::Set => Value::Undefined,
        }
    }

    /// Whether a property or index exists.
    pub fn has(&self, key: &str) -> bool {
        if let Some(base) = self.base() {
            return base.has(key);
        }
        match self.kind() {
            TargetKind::Object => {
                self.track(TrackOp::Has, Key::prop(key));
                self.inner
                    .target
                    .with_data(|data| matches!(data, TargetData::Object(props) if props.contains_key(key)))
            }
            TargetKind::Array if key == "length" => true,
            TargetKind::Array => match parse_index(key) {
                Some(index) => {
                    self.track(TrackOp::Has, Key::Index(index));
                    index < self.inner.target.len()
                }
                None => false,
            },
            TargetKind::Map | TargetKind::Set => false,
        }
    }

    /// Property names, or index strings for arrays.
    pub fn keys(&self) -> Vec<Arc<str>> {
        if let Some(base) = self.base() {
            return base.keys();
        }
        self.track_iteration();
        self.inner.target.keys()
    }

    /// Number of properties, elements, entries or members.
    pub fn len(&self) -> usize {
        if let Some(base) = self.base() {
            return base.len();
        }
        self.track_iteration();
        self.inner.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn track_iteration(&self) {
        match self.kind() {
            TargetKind::Array => self.track(TrackOp::Iterate, Key::Length),
            _ => self.track(TrackOp::Iterate, Key::Iterate),
        }
    }

    /// Write a property.
    ///
    /// Returns false when the write was rejected: the wrapper is readonly,
    /// the key is not a property of this kind of target, or an array length
    /// or index is not an integer within [`MAX_ARRAY_LENGTH`].
    pub fn set(&self, key: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        if self.reject("Set", &key) {
            return false;
        }
        match self.kind() {
            TargetKind::Object => {
                let value = self.incoming(value);
                let old = self.inner.target.insert(key, value.clone());
                let op = match &old {
                    None => TriggerOp::Add,
                    Some(old) if has_changed(&value, old) => TriggerOp::Set,
                    Some(_) => return true,
                };
                self.inner
                    .target
                    .trigger(&[Change::new(op, Key::prop(key), Some(value))]);
                true
            }
            TargetKind::Array if key == "length" => match array_length(&value) {
                Some(len) => self.set_len(len),
                None => {
                    warn!(
                        target_id = %self.id(),
                        value = ?value,
                        "Set operation on key \"length\" failed: invalid array length."
                    );
                    false
                }
            },
            TargetKind::Array => match parse_index(key) {
                Some(index) => self.set_at(index, value),
                None if is_index_like(key) => self.out_of_range("Set", &key),
                None => false,
            },
            TargetKind::Map | TargetKind::Set => false,
        }
    }

    /// Remove a property. Array elements are reset to `Undefined`.
    ///
    /// Returns true when something was removed.
    pub fn delete(&self, key: &str) -> bool {
        if self.reject("Delete", &key) {
            return false;
        }
        let slot = match self.kind() {
            TargetKind::Object => Key::prop(key),
            TargetKind::Array => match parse_index(key) {
                Some(index) => Key::Index(index),
                None => return false,
            },
            TargetKind::Map | TargetKind::Set => return false,
        };
        match self.inner.target.remove(key) {
            Some(_) => {
                self.inner
                    .target
                    .trigger(&[Change::new(TriggerOp::Delete, slot, None)]);
                true
            }
            None => false,
        }
    }

    // ---- Arrays ----

    /// Read an element.
    pub fn at(&self, index: usize) -> Value {
        if let Some(base) = self.base() {
            return self.wrap_child(base.at(index));
        }
        self.track(TrackOp::Get, Key::Index(index));
        self.wrap_child(self.inner.target.at(index))
    }

    /// Every element, tracking the length and each index.
    pub fn to_vec(&self) -> Vec<Value> {
        if let Some(base) = self.base() {
            return base
                .to_vec()
                .into_iter()
                .map(|value| self.wrap_child(value))
                .collect();
        }
        self.raw_elements()
            .into_iter()
            .map(|value| self.wrap_child(value))
            .collect()
    }

    /// Raw elements, tracking the length and each index.
    fn raw_elements(&self) -> Vec<Value> {
        if self.kind() != TargetKind::Array {
            return Vec::new();
        }
        self.track(TrackOp::Iterate, Key::Length);
        let items = self.inner.target.with_data(|data| match data {
            TargetData::Array(items) => items.clone(),
            _ => Vec::new(),
        });
        for index in 0..items.len() {
            self.track(TrackOp::Get, Key::Index(index));
        }
        items
    }

    /// Whether the array contains `value` under same-value-zero equality.
    /// Wrappers and their raw targets are interchangeable.
    pub fn includes(&self, value: &Value) -> bool {
        if let Some(base) = self.base() {
            return base.includes(value);
        }
        let needle = HashKey::new(value);
        self.raw_elements()
            .iter()
            .any(|item| HashKey::new(item) == needle)
    }

    /// Position of `value` under strict equality: `NaN` is never found and
    /// `+0` finds `-0`.
    pub fn index_of(&self, value: &Value) -> Option<usize> {
        if let Some(base) = self.base() {
            return base.index_of(value);
        }
        let needle = value.to_raw();
        if needle.as_f64().is_some_and(f64::is_nan) {
            self.raw_elements();
            return None;
        }
        self.raw_elements()
            .iter()
            .position(|item| HashKey::new(item) == HashKey::new(&needle))
    }

    /// Write an element; writing past the end extends the array.
    pub fn set_at(&self, index: usize, value: impl Into<Value>) -> bool {
        if index >= MAX_ARRAY_LENGTH {
            return self.out_of_range("Set", &index);
        }
        let value = self.incoming(value.into());
        self.mutate_array("Set", Key::Index(index), move |items| {
            if index >= items.len() {
                items.resize(index + 1, Value::Undefined);
            }
            items[index] = value;
        })
        .is_some()
    }

    /// Truncate or pad with `Undefined`.
    pub fn set_len(&self, len: usize) -> bool {
        if len > MAX_ARRAY_LENGTH {
            warn!(
                target_id = %self.id(),
                len,
                "Set operation on key \"length\" failed: invalid array length."
            );
            return false;
        }
        self.mutate_array("Set", Key::Length, move |items| {
            items.resize(len, Value::Undefined);
        })
        .is_some()
    }

    /// Append an element and return the new length.
    pub fn push(&self, value: impl Into<Value>) -> usize {
        let value = self.incoming(value.into());
        self.mutate_array("Add", Key::Length, move |items| {
            items.push(value);
            items.len()
        })
        .unwrap_or_else(|| self.inner.target.len())
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Value {
        self.mutate_array("Delete", Key::Length, |items| items.pop().unwrap_or_default())
            .map(|value| self.wrap_child(value))
            .unwrap_or_default()
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Value {
        self.mutate_array("Delete", Key::Index(0), |items| {
            if items.is_empty() {
                Value::Undefined
            } else {
                items.remove(0)
            }
        })
        .map(|value| self.wrap_child(value))
        .unwrap_or_default()
    }

    /// Prepend an element and return the new length.
    pub fn unshift(&self, value: impl Into<Value>) -> usize {
        let value = self.incoming(value.into());
        self.mutate_array("Add", Key::Index(0), move |items| {
            items.insert(0, value);
            items.len()
        })
        .unwrap_or_else(|| self.inner.target.len())
    }

    /// Remove `delete_count` elements at `start`, insert `items` there and
    /// return the removed elements. `start` and `delete_count` are clamped
    /// to the array.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: impl IntoIterator<Item = Value>,
    ) -> Vec<Value> {
        let inserted: Vec<Value> = items.into_iter().map(|item| self.incoming(item)).collect();
        let removed = self.mutate_array("Splice", Key::Index(start), move |elements| {
            let start = start.min(elements.len());
            let end = start.saturating_add(delete_count).min(elements.len());
            elements.splice(start..end, inserted).collect::<Vec<_>>()
        });
        removed
            .unwrap_or_default()
            .into_iter()
            .map(|value| self.wrap_child(value))
            .collect()
    }

    /// Apply `f` to the elements and notify every index whose value changed,
    /// every appended index and the length, in one pass.
    ///
    /// Returns `None` for readonly wrappers and for non-array targets.
    fn mutate_array<R>(&self, op: &str, key: Key, f: impl FnOnce(&mut Vec<Value>) -> R) -> Option<R> {
        if self.kind() != TargetKind::Array || self.reject(op, &key) {
            return None;
        }
        let _paused = pause_tracking();

        let (before, after, result) = self.inner.target.with_data_mut(|data| match data {
            TargetData::Array(items) => {
                let before = items.clone();
                let result = f(items);
                Some((before, items.clone(), result))
            }
            _ => None,
        })?;

        let mut changes = Vec::new();
        for (index, (old, new)) in before.iter().zip(&after).enumerate() {
            if has_changed(new, old) {
                changes.push(Change::new(TriggerOp::Set, Key::Index(index), Some(new.clone())));
            }
        }
        for (index, new) in after.iter().enumerate().skip(before.len()) {
            changes.push(Change::new(TriggerOp::Add, Key::Index(index), Some(new.clone())));
        }
        if before.len() != after.len() {
            changes.push(Change::new(
                TriggerOp::Set,
                Key::Length,
                Some(Value::from(after.len())),
            ));
        }
        self.inner.target.trigger(&changes);
        Some(result)
    }
}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactive")
            .field("target", &self.id())
            .field("kind", &self.kind())
            .field("variant", &self.variant())
            .field("reactive", &self.is_reactive())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
