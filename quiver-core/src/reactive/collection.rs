//! Map and Set Access
//!
//! Maps and sets are mutated through methods rather than properties, so a
//! wrapped collection is used through a [`Collection`] view. Each method does
//! the tracking or triggering a property access would:
//!
//! - `get` and `has` track the entry they look up;
//! - `size`, `values`, `entries` and `for_each` track the whole structure;
//! - `keys` on a map tracks only its key set, so replacing a value does not
//!   re-run a computation that only enumerates keys;
//! - `set`, `add`, `delete` and `clear` trigger the entry and the structure.

use tracing::trace;

use crate::error::{ReactiveError, Result};

use super::operations::{Key, TrackOp, TriggerOp};
use super::target::{Change, TargetData, TargetKind};
use super::value::{has_changed, HashKey, Value};
use super::wrapper::Reactive;

/// Method-based access to a wrapped map or set.
#[derive(Clone, Debug)]
pub struct Collection {
    proxy: Reactive,
}

impl Reactive {
    /// View this wrapper as a map or set.
    pub fn collection(&self) -> Result<Collection> {
        match self.kind() {
            TargetKind::Map | TargetKind::Set => Ok(Collection {
                proxy: self.clone(),
            }),
            found => Err(ReactiveError::NotACollection { found }),
        }
    }
}

impl Collection {
    pub fn proxy(&self) -> &Reactive {
        &self.proxy
    }

    pub fn kind(&self) -> TargetKind {
        self.proxy.kind()
    }

    fn base(&self) -> Option<Collection> {
        self.proxy.base().map(|base| Collection {
            proxy: base.clone(),
        })
    }

    fn wrap(&self, value: Value) -> Value {
        self.proxy.wrap_child(value)
    }

    fn track_structure(&self) {
        self.proxy.track(TrackOp::Iterate, Key::Iterate);
    }

    // ---- Reads ----

    /// Value stored under `key` in a map. Sets have no values.
    pub fn get(&self, key: impl Into<Value>) -> Value {
        let key = HashKey::new(&key.into());
        if let Some(base) = self.base() {
            return self.wrap(base.get(key.into_value()));
        }
        self.proxy.track(TrackOp::Get, Key::Entry(key.clone()));
        let value = self.proxy.target().with_data(|data| match data {
            TargetData::Map(entries) => entries.get(&key).cloned().unwrap_or_default(),
            _ => Value::Undefined,
        });
        self.wrap(value)
    }

    /// Whether a map key or set member is present.
    pub fn has(&self, key: impl Into<Value>) -> bool {
        let key = HashKey::new(&key.into());
        if let Some(base) = self.base() {
            return base.has(key.into_value());
        }
        self.proxy.track(TrackOp::Has, Key::Entry(key.clone()));
        self.proxy.target().with_data(|data| match data {
            TargetData::Map(entries) => entries.contains_key(&key),
            TargetData::Set(members) => members.contains(&key),
            _ => false,
        })
    }

    pub fn size(&self) -> usize {
        if let Some(base) = self.base() {
            return base.size();
        }
        self.track_structure();
        self.proxy.target().len()
    }

    /// Map keys or set members, in insertion order.
    pub fn keys(&self) -> Vec<Value> {
        if let Some(base) = self.base() {
            return base.keys().into_iter().map(|key| self.wrap(key)).collect();
        }
        match self.kind() {
            TargetKind::Map => self.proxy.track(TrackOp::Iterate, Key::MapKeyIterate),
            _ => self.track_structure(),
        }
        let keys = self.proxy.target().with_data(|data| match data {
            TargetData::Map(entries) => entries.keys().map(|key| key.value().clone()).collect(),
            TargetData::Set(members) => members.iter().map(|key| key.value().clone()).collect(),
            _ => Vec::new(),
        });
        keys.into_iter().map(|key| self.wrap(key)).collect()
    }

    /// Map values, or set members.
    pub fn values(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(_, value)| value).collect()
    }

    /// `(key, value)` pairs. A set yields each member as both.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        if let Some(base) = self.base() {
            return base
                .entries()
                .into_iter()
                .map(|(key, value)| (self.wrap(key), self.wrap(value)))
                .collect();
        }
        self.track_structure();
        let entries: Vec<(Value, Value)> = self.proxy.target().with_data(|data| match data {
            TargetData::Map(entries) => entries
                .iter()
                .map(|(key, value)| (key.value().clone(), value.clone()))
                .collect(),
            TargetData::Set(members) => members
                .iter()
                .map(|key| (key.value().clone(), key.value().clone()))
                .collect(),
            _ => Vec::new(),
        });
        entries
            .into_iter()
            .map(|(key, value)| (self.wrap(key), self.wrap(value)))
            .collect()
    }

    /// Call `f(value, key)` for every entry, after releasing the target.
    pub fn for_each(&self, mut f: impl FnMut(Value, Value)) {
        for (key, value) in self.entries() {
            f(value, key);
        }
    }

    // ---- Writes ----

    /// Insert or replace a map entry. Returns false for sets and readonly
    /// wrappers.
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> bool {
        let key = HashKey::new(&key.into());
        if self.proxy.reject("Set", &Key::Entry(key.clone())) || self.kind() != TargetKind::Map {
            return false;
        }
        let value = self.proxy.incoming(value.into());
        let old = self.proxy.target().with_data_mut(|data| match data {
            TargetData::Map(entries) => entries.insert(key.clone(), value.clone()),
            _ => None,
        });
        let op = match &old {
            None => TriggerOp::Add,
            Some(old) if has_changed(&value, old) => TriggerOp::Set,
            Some(_) => return true,
        };
        self.proxy
            .target()
            .trigger(&[Change::new(op, Key::Entry(key), Some(value))]);
        true
    }

    /// Add a set member. Returns false for maps and readonly wrappers.
    pub fn add(&self, value: impl Into<Value>) -> bool {
        let value = self.proxy.incoming(value.into());
        let key = HashKey::new(&value);
        if self.proxy.reject("Add", &Key::Entry(key.clone())) || self.kind() != TargetKind::Set {
            return false;
        }
        let added = self.proxy.target().with_data_mut(|data| match data {
            TargetData::Set(members) => members.insert(key.clone()),
            _ => false,
        });
        if added {
            self.proxy
                .target()
                .trigger(&[Change::new(TriggerOp::Add, Key::Entry(key), Some(value))]);
        }
        true
    }

    /// Remove a map entry or set member. Returns true when one was removed.
    pub fn delete(&self, key: impl Into<Value>) -> bool {
        let key = HashKey::new(&key.into());
        if self.proxy.reject("Delete", &Key::Entry(key.clone())) {
            return false;
        }
        let removed = self.proxy.target().with_data_mut(|data| match data {
            TargetData::Map(entries) => entries.shift_remove(&key).is_some(),
            TargetData::Set(members) => members.shift_remove(&key),
            _ => false,
        });
        if removed {
            self.proxy
                .target()
                .trigger(&[Change::new(TriggerOp::Delete, Key::Entry(key), None)]);
        }
        removed
    }

    /// Remove everything. Returns true when the collection was not empty.
    pub fn clear(&self) -> bool {
        if self.proxy.reject("Clear", &Key::Iterate) {
            return false;
        }
        let removed = self.proxy.target().with_data_mut(|data| match data {
            TargetData::Map(entries) => std::mem::take(entries).len(),
            TargetData::Set(members) => std::mem::take(members).len(),
            _ => 0,
        });
        if removed == 0 {
            return false;
        }
        trace!(target_id = %self.proxy.id(), removed, "cleared collection");
        self.proxy
            .target()
            .trigger(&[Change::new(TriggerOp::Clear, Key::Iterate, None)]);
        true
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
