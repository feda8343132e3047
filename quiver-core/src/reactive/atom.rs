//! Atom Implementation
//!
//! An Atom is a single-value reactive box. It holds a value and tracks which
//! computations read it.
//!
//! # How Atoms Work
//!
//! 1. When an atom is read within a running computation (memo/effect), the
//!    atom registers that computation in its dependency set.
//!
//! 2. When an atom is written with a value that differs from the current
//!    raw value (same-value equality, so `NaN` over `NaN` is not a change),
//!    every subscriber is notified.
//!
//! 3. Object values are wrapped on the way in. A shallow atom (the default)
//!    wraps with `shallow_reactive`, so writes to top-level properties are
//!    tracked but nested objects are returned raw. A deep atom wraps with
//!    `reactive`, so nested objects are tracked too. A readonly or shallow
//!    wrapper handed to `set` is stored as it is.
//!
//! # Destructuring
//!
//! [`Atom::destruct`] returns one field atom per top-level key. A field atom
//! owns no state: reading it reads the parent atom and then the key through
//! the parent's wrapper, writing it writes the key through the same
//! wrapper. Changes made through a field are therefore visible through the
//! parent and the other way round.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ReactiveError, Result};

use super::context::untracked;
use super::dep::{track_effects, trigger_effects, Dep};
use super::operations::{EventInfo, Key, TrackOp, TriggerOp};
use super::value::{has_changed, Value};
use super::wrapper::{wrap_value, Variant};

/// Options for [`atom_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtomOptions {
    /// Wrap object values deeply. Atoms are shallow by default.
    pub deep: bool,
    /// Reject every write with a warning.
    pub readonly: bool,
}

impl AtomOptions {
    pub fn deep() -> Self {
        Self {
            deep: true,
            ..Self::default()
        }
    }

    pub fn readonly() -> Self {
        Self {
            readonly: true,
            ..Self::default()
        }
    }
}

struct AtomState {
    /// Unwrapped value, compared on every write.
    raw: Value,
    /// Value handed to readers.
    value: Value,
}

struct AtomCell {
    state: RwLock<AtomState>,
    dep: Dep,
    shallow: bool,
    readonly: bool,
}

impl AtomCell {
    /// Split an incoming value into its raw and stored forms.
    fn store(&self, value: Value) -> AtomState {
        if value.is_shallow() || value.is_readonly() {
            return AtomState {
                raw: value.clone(),
                value,
            };
        }
        let raw = value.to_raw();
        let value = if self.shallow {
            wrap_value(&raw, Variant::ShallowReactive)
        } else {
            wrap_value(&raw, Variant::Reactive)
        };
        AtomState { raw, value }
    }
}

struct AtomField {
    parent: Atom,
    key: Arc<str>,
    readonly: bool,
}

#[derive(Clone)]
enum Source {
    Cell(Arc<AtomCell>),
    Field(Arc<AtomField>),
}

/// A reactive value box.
///
/// Cloning an `Atom` yields another handle to the same value.
///
/// # Example
///
/// ```rust
/// use quiver_core::reactive::{atom, Value};
///
/// let count = atom(0);
///
/// // Read the value
/// assert_eq!(count.get(), Value::from(0));
///
/// // Update the value (notifies subscribers)
/// count.set(5);
/// count.update(|n| Value::from(n.as_f64().unwrap_or_default() + 1.0));
/// assert_eq!(count.get(), Value::from(6));
/// ```
#[derive(Clone)]
pub struct Atom {
    source: Source,
}

impl Atom {
    /// Create an atom.
    pub fn new(value: impl Into<Value>, options: AtomOptions) -> Self {
        let cell = AtomCell {
            state: RwLock::new(AtomState {
                raw: Value::Undefined,
                value: Value::Undefined,
            }),
            dep: Dep::new(),
            shallow: !options.deep,
            readonly: options.readonly,
        };
        *cell.state.write() = cell.store(value.into());
        Self {
            source: Source::Cell(Arc::new(cell)),
        }
    }

    /// Read the value, subscribing the running computation.
    pub fn get(&self) -> Value {
        match &self.source {
            Source::Cell(cell) => {
                track_effects(&cell.dep, &EventInfo::track(None, TrackOp::Get, Key::Value));
                cell.state.read().value.clone()
            }
            Source::Field(field) => read_field(&field.parent.get(), &field.key),
        }
    }

    /// Read the value without subscribing.
    pub fn peek(&self) -> Value {
        match &self.source {
            Source::Cell(cell) => cell.state.read().value.clone(),
            Source::Field(_) => untracked(|| self.get()),
        }
    }

    /// Replace the value.
    ///
    /// Readonly atoms warn and keep their value. Otherwise subscribers are
    /// notified when the raw form of `value` differs from the current one.
    pub fn set(&self, value: impl Into<Value>) {
        let value = value.into();
        match &self.source {
            Source::Cell(cell) => {
                if cell.readonly {
                    warn!("Set operation failed: target is readonly.");
                    return;
                }
                let next = cell.store(value);
                let written = next.raw.clone();
                let previous = {
                    let mut state = cell.state.write();
                    if !has_changed(&next.raw, &state.raw) {
                        return;
                    }
                    std::mem::replace(&mut *state, next)
                };
                drop(previous);
                trigger_effects(
                    &cell.dep,
                    &EventInfo::trigger(None, TriggerOp::Set, Key::Value, Some(written)),
                );
            }
            Source::Field(field) => {
                if field.readonly {
                    warn!(key = %field.key, "Set operation failed: target is readonly.");
                    return;
                }
                let container = field.parent.peek();
                match &container {
                    Value::Proxy(proxy) => {
                        proxy.set(&field.key, value);
                    }
                    Value::Object(target) => {
                        target.insert(&field.key, value);
                    }
                    _ => warn!(key = %field.key, "cannot set a field of a primitive value"),
                }
            }
        }
    }

    /// Replace the value with `f` applied to the current raw value.
    pub fn update(&self, f: impl FnOnce(&Value) -> Value) {
        let current = match &self.source {
            Source::Cell(cell) => cell.state.read().raw.clone(),
            Source::Field(_) => self.peek().to_raw(),
        };
        self.set(f(&current));
    }

    /// One field atom per top-level key of the current object value.
    ///
    /// Fails with [`ReactiveError::NotAnObject`] for primitive values.
    /// Arrays yield their index strings; maps and sets have no fields.
    pub fn destruct(&self) -> Result<IndexMap<String, Atom>> {
        let value = self.peek();
        let target = match &value {
            Value::Object(target) => target.clone(),
            Value::Proxy(proxy) => proxy.raw(),
            _ => return Err(ReactiveError::NotAnObject),
        };
        Ok(target
            .keys()
            .into_iter()
            .map(|key| (key.to_string(), self.field(&key)))
            .collect())
    }

    /// A field atom forwarding to `key` of this atom's value.
    pub fn field(&self, key: &str) -> Atom {
        Atom {
            source: Source::Field(Arc::new(AtomField {
                parent: self.clone(),
                key: Arc::from(key),
                readonly: self.is_readonly(),
            })),
        }
    }

    /// A view with no write entry point that reads through this atom.
    pub fn to_readonly(&self) -> ReadonlyAtom {
        ReadonlyAtom {
            source: self.clone(),
        }
    }

    pub fn is_readonly(&self) -> bool {
        match &self.source {
            Source::Cell(cell) => cell.readonly,
            Source::Field(field) => field.readonly,
        }
    }

    pub fn is_shallow(&self) -> bool {
        match &self.source {
            Source::Cell(cell) => cell.shallow,
            Source::Field(field) => field.parent.is_shallow(),
        }
    }

    /// Whether this is a field atom made by [`Atom::field`] or
    /// [`Atom::destruct`].
    pub fn is_field(&self) -> bool {
        matches!(self.source, Source::Field(_))
    }

    /// Whether both handles refer to the same atom.
    pub fn ptr_eq(&self, other: &Atom) -> bool {
        match (&self.source, &other.source) {
            (Source::Cell(a), Source::Cell(b)) => Arc::ptr_eq(a, b),
            (Source::Field(a), Source::Field(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Number of computations subscribed to the value slot. Field atoms
    /// report their root atom's count.
    pub fn subscriber_count(&self) -> usize {
        match &self.source {
            Source::Cell(cell) => cell.dep.subscriber_count(),
            Source::Field(field) => field.parent.subscriber_count(),
        }
    }
}

/// Read `key` from a container value: through the wrapper when there is
/// one, raw otherwise.
fn read_field(container: &Value, key: &str) -> Value {
    match container {
        Value::Proxy(proxy) => proxy.get(key),
        Value::Object(target) => target.get(key),
        _ => Value::Undefined,
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Source::Cell(cell) => f
                .debug_struct("Atom")
                .field("value", &cell.state.read().value)
                .field("shallow", &cell.shallow)
                .field("readonly", &cell.readonly)
                .field("subscriber_count", &cell.dep.subscriber_count())
                .finish(),
            Source::Field(field) => f
                .debug_struct("Atom")
                .field("field", &field.key)
                .field("readonly", &field.readonly)
                .finish(),
        }
    }
}

/// Readonly view over an atom.
///
/// Reads subscribe to the source atom and return readonly-wrapped values.
#[derive(Clone)]
pub struct ReadonlyAtom {
    source: Atom,
}

impl ReadonlyAtom {
    pub fn get(&self) -> Value {
        wrap_value(&self.source.get(), Variant::Readonly)
    }

    pub fn peek(&self) -> Value {
        wrap_value(&self.source.peek(), Variant::Readonly)
    }

    /// Whether both views read the same atom.
    pub fn same_source(&self, atom: &Atom) -> bool {
        self.source.ptr_eq(atom)
    }
}

impl fmt::Debug for ReadonlyAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadonlyAtom")
            .field("source", &self.source)
            .finish()
    }
}

/// Create a shallow, writable atom.
pub fn atom(value: impl Into<Value>) -> Atom {
    Atom::new(value, AtomOptions::default())
}

/// Create an atom with explicit options.
pub fn atom_with(value: impl Into<Value>, options: AtomOptions) -> Atom {
    Atom::new(value, options)
}

/// Readonly view of `atom`.
pub fn to_readonly(atom: &Atom) -> ReadonlyAtom {
    atom.to_readonly()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::effect;
    use crate::reactive::target::Target;
    use crate::reactive::wrapper::{reactive, readonly};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, Ordering};
    use tracing_test::traced_test;

    fn object(json: serde_json::Value) -> Value {
        Value::from_json(json)
    }

    #[test]
    fn atom_get_and_set() {
        let a = atom(1);
        assert_eq!(a.get(), Value::from(1));
        a.set(2);
        assert_eq!(a.get(), Value::from(2));
    }

    #[test]
    fn atom_update_receives_raw_value() {
        let a = atom(10);
        a.update(|n| Value::from(n.as_f64().unwrap_or_default() * 2.0));
        assert_eq!(a.peek(), Value::from(20));

        let target = Target::object([("x", 1)]);
        let b = atom_with(&target, AtomOptions::deep());
        b.update(|current| {
            assert!(current.as_target().is_some_and(|t| t.ptr_eq(&target)));
            current.clone()
        });
    }

    #[test]
    fn atom_reruns_effects_only_on_change() {
        let a = atom(1);
        let calls = Arc::new(AtomicI32::new(0));
        let dummy = Arc::new(AtomicI32::new(0));

        let (reader, calls_clone, dummy_clone) = (a.clone(), calls.clone(), dummy.clone());
        let _e = effect(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            let v = reader.get().as_f64().unwrap_or_default();
            dummy_clone.store(v as i32, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dummy.load(Ordering::SeqCst), 1);

        a.set(2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(dummy.load(Ordering::SeqCst), 2);

        a.set(2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn nan_over_nan_is_not_a_change() {
        let a = atom(f64::NAN);
        let calls = Arc::new(AtomicI32::new(0));
        let (reader, calls_clone) = (a.clone(), calls.clone());
        let _e = effect(move || {
            reader.get();
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        a.set(f64::NAN);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn atom_is_shallow_by_default() {
        let a = atom(object(json!({ "foo": 32, "bar": { "zig": false, "zag": "hello" } })));
        assert!(a.is_shallow());

        let calls = Arc::new(AtomicI32::new(0));
        let seen = Arc::new(Mutex::new((Value::Undefined, Value::Undefined)));
        let (reader, calls_clone, seen_clone) = (a.clone(), calls.clone(), seen.clone());
        let _e = effect(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            let value = reader.get();
            let proxy = value.as_reactive().expect("object atoms hold a wrapper");
            let foo = proxy.get("foo");
            let zag = match proxy.get("bar") {
                Value::Object(bar) => bar.get("zag"),
                other => panic!("shallow atom returned {other:?} for a nested object"),
            };
            *seen_clone.lock() = (foo, zag);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().0, Value::from(32));

        let value = a.get();
        let proxy = value.as_reactive().expect("wrapper");
        proxy.set("foo", 64);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(seen.lock().0, Value::from(64));

        // Nested writes on a shallow atom go to the raw object.
        if let Value::Object(bar) = proxy.get("bar") {
            bar.insert("zag", "world");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(seen.lock().1, Value::from("hello"));
    }

    #[test]
    fn deep_atom_tracks_nested_writes() {
        let a = atom_with(
            object(json!({ "foo": 32, "bar": { "zig": false, "zag": "hello" } })),
            AtomOptions::deep(),
        );
        assert!(!a.is_shallow());

        let calls = Arc::new(AtomicI32::new(0));
        let zag = Arc::new(Mutex::new(Value::Undefined));
        let (reader, calls_clone, zag_clone) = (a.clone(), calls.clone(), zag.clone());
        let _e = effect(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            let value = reader.get();
            let bar = value.as_reactive().expect("wrapper").get("bar");
            *zag_clone.lock() = bar.as_reactive().expect("deep wrapper").get("zag");
        });

        let bar = a.get().as_reactive().expect("wrapper").get("bar");
        bar.as_reactive().expect("deep wrapper").set("zag", "world");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*zag.lock(), Value::from("world"));
    }

    #[test]
    #[traced_test]
    fn readonly_atom_rejects_writes() {
        let a = atom_with(1, AtomOptions::readonly());
        a.set(2);
        assert_eq!(a.get(), Value::from(1));
        assert!(logs_contain("target is readonly"));
    }

    #[test]
    fn setting_a_wrapper_of_the_current_value_is_not_a_change() {
        let target = Target::object([("x", 1)]);
        let a = atom_with(&target, AtomOptions::deep());
        let calls = Arc::new(AtomicI32::new(0));
        let (reader, calls_clone) = (a.clone(), calls.clone());
        let _e = effect(move || {
            reader.get();
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        a.set(reactive(&target));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn readonly_wrappers_are_stored_directly() {
        let target = Target::object([("x", 1)]);
        let view = readonly(&target);
        let a = atom_with(Value::Null, AtomOptions::deep());
        a.set(view.clone());
        assert!(a.peek().as_reactive().is_some_and(|p| p.ptr_eq(&view)));
    }

    #[test]
    fn destruct_fields_share_the_parent() {
        let parent = atom(object(json!({ "foo": 1, "bar": { "nested1": "hello", "zig": false } })));
        let fields = parent.destruct().expect("object atom");
        assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["foo", "bar"]);
        let (foo, bar) = (&fields["foo"], &fields["bar"]);
        assert!(foo.is_field());

        assert_eq!(foo.get(), Value::from(1));
        foo.set(2);
        assert_eq!(foo.get(), Value::from(2));
        assert_eq!(parent.get().as_reactive().expect("wrapper").get("foo"), Value::from(2));

        // The shallow parent hands out the raw nested object.
        let nested = bar.get();
        let nested = nested.as_target().expect("raw nested object");
        nested.insert("nested1", "world");
        let through_parent = parent.get().as_reactive().expect("wrapper").get("bar");
        assert_eq!(
            through_parent.as_target().expect("raw").get("nested1"),
            Value::from("world")
        );

        // Writes through the parent reach the field.
        parent.get().as_reactive().expect("wrapper").set("foo", 6);
        assert_eq!(foo.get(), Value::from(6));
    }

    #[test]
    fn field_reads_are_reactive() {
        let parent = atom(object(json!({ "foo": 1 })));
        let foo = parent.field("foo");
        let calls = Arc::new(AtomicI32::new(0));
        let (reader, calls_clone) = (foo.clone(), calls.clone());
        let _e = effect(move || {
            reader.get();
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        parent.get().as_reactive().expect("wrapper").set("foo", 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        foo.set(3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(foo.subscriber_count(), parent.subscriber_count());
    }

    #[test]
    fn destruct_of_a_primitive_fails() {
        assert_eq!(atom(1).destruct().unwrap_err(), ReactiveError::NotAnObject);
    }

    #[test]
    #[traced_test]
    fn readonly_views_follow_the_source() {
        let a = atom(object(json!({ "foo": 1 })));
        let view = to_readonly(&a);
        assert!(view.same_source(&a));

        let current = view.get();
        assert!(current.is_readonly());
        assert!(!current.as_reactive().expect("wrapper").set("foo", 9));
        assert!(logs_contain("target is readonly"));

        a.get().as_reactive().expect("wrapper").set("foo", 2);
        assert_eq!(
            view.get().as_reactive().expect("wrapper").get("foo"),
            Value::from(2)
        );
    }

    #[test]
    fn readonly_view_tracks_the_source_dep() {
        let a = atom(1);
        let view = a.to_readonly();
        let calls = Arc::new(AtomicI32::new(0));
        let (reader, calls_clone) = (view.clone(), calls.clone());
        let _e = effect(move || {
            reader.get();
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        a.set(2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(view.peek(), Value::from(2));
    }

    #[test]
    #[traced_test]
    fn readonly_destructed_fields_cannot_be_changed() {
        let parent = atom(object(json!({ "foo": 1 })));
        let fields = atom_with(parent.peek(), AtomOptions::readonly())
            .destruct()
            .expect("object atom");
        let foo = &fields["foo"];
        assert!(foo.is_readonly());
        foo.set(2);
        assert_eq!(foo.get(), Value::from(1));
        assert!(logs_contain("target is readonly"));
    }

    #[test]
    fn array_map_and_set_atoms_are_reactive() {
        let list = atom(object(json!([1, 2, 3])));
        let calls = Arc::new(AtomicI32::new(0));
        let (reader, calls_clone) = (list.clone(), calls.clone());
        let _e = effect(move || {
            reader.get().as_reactive().expect("wrapper").at(0);
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        list.get().as_reactive().expect("wrapper").set_at(0, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let map = atom(Target::map([("foo", 1), ("bar", 2)]));
        let map_calls = Arc::new(AtomicI32::new(0));
        let (reader, calls_clone) = (map.clone(), map_calls.clone());
        let _m = effect(move || {
            let view = reader.get().as_reactive().expect("wrapper").collection().expect("map");
            view.get("foo");
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        let view = map.get().as_reactive().expect("wrapper").collection().expect("map");
        view.set("foo", 2);
        assert_eq!(map_calls.load(Ordering::SeqCst), 2);

        let set = atom(Target::set([1, 2, 3]));
        let set_calls = Arc::new(AtomicI32::new(0));
        let (reader, calls_clone) = (set.clone(), set_calls.clone());
        let _s = effect(move || {
            let view = reader.get().as_reactive().expect("wrapper").collection().expect("set");
            view.has(1);
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        let view = set.get().as_reactive().expect("wrapper").collection().expect("set");
        view.delete(1);
        assert_eq!(set_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn array_atom_sees_unshift() {
        let list = atom(object(json!([1, 2, 3])));
        let first = Arc::new(AtomicI32::new(0));
        let calls = Arc::new(AtomicI32::new(0));
        let (reader, first_clone, calls_clone) = (list.clone(), first.clone(), calls.clone());
        let _e = effect(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            let v = reader.get().as_reactive().expect("wrapper").at(0);
            first_clone.store(v.as_f64().unwrap_or(-1.0) as i32, Ordering::SeqCst);
        });

        list.get().as_reactive().expect("wrapper").unshift(0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: AtomOptions = serde_json::from_value(json!({ "deep": true })).expect("valid");
        assert_eq!(options, AtomOptions::deep());
        assert_eq!(AtomOptions::default(), AtomOptions { deep: false, readonly: false });
    }
}
