//! Raw Targets
//!
//! A [`Target`] is the plain, shared object that reactive wrappers intercept:
//! a string-keyed object, an array, a map or a set. Reading or writing a
//! target directly never tracks and never triggers; only the wrappers in
//! [`wrapper`](super::wrapper) and [`collection`](super::collection) do.
//!
//! Each target owns the dependency table for its slots. The table is keyed by
//! [`Key`]. A slot's [`Dep`] is created on the first tracked read of it and
//! removed again when its last subscriber leaves.
//!
//! Arrays hold at most [`MAX_ARRAY_LENGTH`] elements. Length and index writes
//! beyond that are refused with a warning.
//!
//! # Trigger rules
//!
//! A write is described by one or more [`Change`]s. [`Target::trigger`]
//! collects the affected dependency sets and notifies their union once:
//!
//! - `Clear` reaches every slot of the target;
//! - a write to an array's length reaches `Length` and every index at or past
//!   the new length;
//! - every other change reaches its own key, plus:
//!   - `Add` on an array index also reaches `Length`;
//!   - `Add` and `Delete` on objects, maps and sets also reach `Iterate`
//!     (and `MapKeyIterate` for maps);
//!   - `Set` on a map also reaches `Iterate`, since map values are part of
//!     its iteration.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, RwLock};
use tracing::{trace, warn};

use super::dep::{track_effects, trigger_deps, Dep, DepInner};
use super::context::ReactiveContext;
use super::operations::{EventInfo, Key, TrackOp, TriggerOp};
use super::runtime::Runtime;
use super::value::{HashKey, Value};

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a raw target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    fn new() -> Self {
        Self(NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target#{}", self.0)
    }
}

/// Shape of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Object,
    Array,
    Map,
    Set,
}

impl TargetKind {
    /// Maps and sets are mutated through methods rather than properties.
    pub fn is_collection(&self) -> bool {
        matches!(self, TargetKind::Map | TargetKind::Set)
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetKind::Object => "object",
            TargetKind::Array => "array",
            TargetKind::Map => "map",
            TargetKind::Set => "set",
        })
    }
}

/// The data held by a target.
#[derive(Debug, Clone)]
pub enum TargetData {
    /// Insertion-ordered properties.
    Object(IndexMap<Arc<str>, Value>),
    Array(Vec<Value>),
    /// Insertion-ordered entries keyed under same-value-zero.
    Map(IndexMap<HashKey, Value>),
    Set(IndexSet<HashKey>),
}

impl TargetData {
    pub fn kind(&self) -> TargetKind {
        match self {
            TargetData::Object(_) => TargetKind::Object,
            TargetData::Array(_) => TargetKind::Array,
            TargetData::Map(_) => TargetKind::Map,
            TargetData::Set(_) => TargetKind::Set,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TargetData::Object(props) => props.len(),
            TargetData::Array(items) => items.len(),
            TargetData::Map(entries) => entries.len(),
            TargetData::Set(members) => members.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One slot change reported to [`Target::trigger`].
#[derive(Debug, Clone)]
pub(crate) struct Change {
    pub op: TriggerOp,
    pub key: Key,
    pub new_value: Option<Value>,
}

impl Change {
    pub fn new(op: TriggerOp, key: Key, new_value: Option<Value>) -> Self {
        Self { op, key, new_value }
    }
}

struct TargetInner {
    id: TargetId,
    kind: TargetKind,
    data: RwLock<TargetData>,
    deps: Mutex<HashMap<Key, Dep>>,
}

impl TargetInner {
    /// Drop the table entry for `key` if it is still `dep` and still empty.
    fn release_dep(&self, key: &Key, dep: &DepInner) {
        let removed = {
            let mut table = self.deps.lock();
            match table.get(key) {
                Some(current) if current.is(dep) && dep.is_empty() => table.remove(key),
                _ => None,
            }
        };
        drop(removed);
    }
}

impl Drop for TargetInner {
    fn drop(&mut self) {
        Runtime::evict_target(self.id);
    }
}

/// A shared raw object.
///
/// Cloning a `Target` yields another handle to the same object; identity is
/// preserved and compared with [`Target::ptr_eq`].
#[derive(Clone)]
pub struct Target {
    inner: Arc<TargetInner>,
}

/// Largest array length. Valid indices are below it.
pub const MAX_ARRAY_LENGTH: usize = u32::MAX as usize;

/// Parse a canonical array index (`"0"`, `"12"`, not `"01"` or `"+1"`)
/// below [`MAX_ARRAY_LENGTH`].
pub(crate) fn parse_index(key: &str) -> Option<usize> {
    if !is_index_like(key) {
        return None;
    }
    key.parse::<usize>()
        .ok()
        .filter(|index| *index < MAX_ARRAY_LENGTH)
}

/// Digits in canonical form, whatever their magnitude.
pub(crate) fn is_index_like(key: &str) -> bool {
    !key.is_empty()
        && key.bytes().all(|b| b.is_ascii_digit())
        && (key == "0" || !key.starts_with('0'))
}

/// A value usable as an array length: a non-negative integer no greater than
/// [`MAX_ARRAY_LENGTH`].
pub(crate) fn array_length(value: &Value) -> Option<usize> {
    let len = value.as_f64()?;
    (len >= 0.0 && len.fract() == 0.0 && len <= MAX_ARRAY_LENGTH as f64).then_some(len as usize)
}

impl Target {
    fn from_data(data: TargetData) -> Self {
        let id = TargetId::new();
        trace!(target_id = %id, kind = %data.kind(), "created target");
        Self {
            inner: Arc::new(TargetInner {
                id,
                kind: data.kind(),
                data: RwLock::new(data),
                deps: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create a plain object from `(name, value)` pairs.
    pub fn object<K, V>(props: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Arc<str>>,
        V: Into<Value>,
    {
        Self::from_data(TargetData::Object(
            props
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        ))
    }

    pub fn array<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Self::from_data(TargetData::Array(items.into_iter().map(Into::into).collect()))
    }

    /// Create a map. Later duplicates of a key overwrite earlier ones.
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Value>,
        V: Into<Value>,
    {
        Self::from_data(TargetData::Map(
            entries
                .into_iter()
                .map(|(key, value)| (HashKey::new(&key.into()), value.into()))
                .collect(),
        ))
    }

    pub fn set<V: Into<Value>>(members: impl IntoIterator<Item = V>) -> Self {
        Self::from_data(TargetData::Set(
            members
                .into_iter()
                .map(|member| HashKey::new(&member.into()))
                .collect(),
        ))
    }

    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    pub fn kind(&self) -> TargetKind {
        self.inner.kind
    }

    pub fn ptr_eq(&self, other: &Target) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Read the data under the target's lock.
    ///
    /// `f` must not write to this same target.
    pub fn with_data<R>(&self, f: impl FnOnce(&TargetData) -> R) -> R {
        f(&self.inner.data.read())
    }

    pub(crate) fn with_data_mut<R>(&self, f: impl FnOnce(&mut TargetData) -> R) -> R {
        f(&mut self.inner.data.write())
    }

    /// Number of properties, elements, entries or members.
    pub fn len(&self) -> usize {
        self.with_data(TargetData::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Untracked property read.
    ///
    /// Arrays answer `"length"` and canonical index strings. Maps and sets
    /// have no properties and return `Undefined`.
    pub fn get(&self, key: &str) -> Value {
        self.with_data(|data| match data {
            TargetData::Object(props) => props.get(key).cloned().unwrap_or_default(),
            TargetData::Array(items) if key == "length" => Value::from(items.len()),
            TargetData::Array(items) => parse_index(key)
                .and_then(|index| items.get(index).cloned())
                .unwrap_or_default(),
            TargetData::Map(_) | TargetData::Set(_) => Value::Undefined,
        })
    }

    /// Untracked element read.
    pub fn at(&self, index: usize) -> Value {
        self.with_data(|data| match data {
            TargetData::Array(items) => items.get(index).cloned().unwrap_or_default(),
            _ => Value::Undefined,
        })
    }

    /// Untracked property write. Nothing is notified.
    ///
    /// Returns the previous value of an existing property or element.
    /// Writing an array index past the end pads with `Undefined`; writing
    /// `"length"` truncates or pads. A length or index over the array limit
    /// is refused with a warning. Maps and sets are left unchanged.
    pub fn insert(&self, key: &str, value: impl Into<Value>) -> Option<Value> {
        let value = value.into();
        if self.kind() == TargetKind::Array {
            if key == "length" && array_length(&value).is_none() {
                warn!(
                    target_id = %self.id(),
                    value = ?value,
                    "Set operation on key \"length\" failed: invalid array length."
                );
                return None;
            }
            if is_index_like(key) && parse_index(key).is_none() {
                warn!(
                    target_id = %self.id(),
                    key,
                    "Set operation on key \"{key}\" failed: invalid array index."
                );
                return None;
            }
        }
        self.with_data_mut(|data| match data {
            TargetData::Object(props) => props.insert(Arc::from(key), value),
            TargetData::Array(items) if key == "length" => {
                if let Some(len) = array_length(&value) {
                    items.resize(len, Value::Undefined);
                }
                None
            }
            TargetData::Array(items) => {
                let index = parse_index(key)?;
                if index < items.len() {
                    Some(std::mem::replace(&mut items[index], value))
                } else {
                    items.resize(index, Value::Undefined);
                    items.push(value);
                    None
                }
            }
            TargetData::Map(_) | TargetData::Set(_) => None,
        })
    }

    /// Untracked property removal. Array elements are reset to `Undefined`
    /// in place.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.with_data_mut(|data| match data {
            TargetData::Object(props) => props.shift_remove(key),
            TargetData::Array(items) => {
                let slot = items.get_mut(parse_index(key)?)?;
                Some(std::mem::take(slot))
            }
            TargetData::Map(_) | TargetData::Set(_) => None,
        })
    }

    /// Property names in insertion order, or index strings for arrays.
    pub fn keys(&self) -> Vec<Arc<str>> {
        self.with_data(|data| match data {
            TargetData::Object(props) => props.keys().cloned().collect(),
            TargetData::Array(items) => (0..items.len()).map(|i| Arc::from(i.to_string())).collect(),
            TargetData::Map(_) | TargetData::Set(_) => Vec::new(),
        })
    }

    /// Subscribe the running computation to `key`.
    pub(crate) fn track(&self, op: TrackOp, key: Key) {
        let subscribing = ReactiveContext::tracking_effect().is_some_and(|effect| effect.is_active());
        if !subscribing {
            return;
        }
        let dep = self
            .inner
            .deps
            .lock()
            .entry(key.clone())
            .or_insert_with(|| self.slot_dep(&key))
            .clone();
        let info = EventInfo::track(Some(self.id()), op, key.clone());
        track_effects(&dep, &info);

        // Another thread may have released the slot between lookup and
        // subscribe. Follow whatever set the table holds now.
        let current = self
            .inner
            .deps
            .lock()
            .entry(key)
            .or_insert_with(|| dep.clone())
            .clone();
        if !current.ptr_eq(&dep) {
            track_effects(&current, &info);
        }
    }

    /// A dependency set that leaves the table once nobody subscribes to it.
    fn slot_dep(&self, key: &Key) -> Dep {
        let owner = Arc::downgrade(&self.inner);
        let key = key.clone();
        Dep::with_release(move |dep| {
            if let Some(target) = owner.upgrade() {
                target.release_dep(&key, dep);
            }
        })
    }

    /// Notify every computation affected by `changes`, each at most once.
    pub(crate) fn trigger(&self, changes: &[Change]) {
        let Some(first) = changes.first() else {
            return;
        };
        let is_array = self.kind() == TargetKind::Array;
        let is_map = self.kind() == TargetKind::Map;
        let len = self.len();

        let deps = {
            let table = self.inner.deps.lock();
            let mut deps: Vec<Dep> = Vec::new();
            for change in changes {
                if change.op == TriggerOp::Clear {
                    deps.extend(table.values().cloned());
                    continue;
                }
                if is_array && change.key == Key::Length {
                    for (key, dep) in table.iter() {
                        match key {
                            Key::Length => deps.push(dep.clone()),
                            Key::Index(index) if *index >= len => deps.push(dep.clone()),
                            _ => {}
                        }
                    }
                    continue;
                }

                let mut push = |key: &Key| {
                    if let Some(dep) = table.get(key) {
                        deps.push(dep.clone());
                    }
                };
                push(&change.key);
                match change.op {
                    TriggerOp::Add if is_array => {
                        if matches!(change.key, Key::Index(_)) {
                            push(&Key::Length);
                        }
                    }
                    TriggerOp::Add | TriggerOp::Delete if !is_array => {
                        push(&Key::Iterate);
                        if is_map {
                            push(&Key::MapKeyIterate);
                        }
                    }
                    TriggerOp::Set if is_map => push(&Key::Iterate),
                    _ => {}
                }
            }
            deps
        };

        trace!(
            target_id = %self.id(),
            changes = changes.len(),
            deps = deps.len(),
            "triggering target"
        );
        let info = EventInfo::trigger(
            Some(self.id()),
            first.op,
            first.key.clone(),
            first.new_value.clone(),
        );
        trigger_deps(&deps, &info);
    }

    /// Number of slots with a dependency set, for diagnostics.
    pub fn tracked_slot_count(&self) -> usize {
        self.inner.deps.lock().len()
    }

    /// Subscribers of one slot, for diagnostics.
    pub fn subscriber_count(&self, key: &Key) -> usize {
        self.inner
            .deps
            .lock()
            .get(key)
            .map_or(0, Dep::subscriber_count)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("len", &self.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
