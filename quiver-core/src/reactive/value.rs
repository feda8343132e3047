//! Dynamic values.
//!
//! Reactive wrappers intercept reads and writes on objects whose shape is
//! only known at runtime, so the data they wrap is expressed as [`Value`]:
//! primitives, raw [`Target`]s and [`Reactive`] wrappers around targets.
//!
//! # Equality
//!
//! `PartialEq` on `Value` is the same-value comparison used by every change
//! check in the crate: `NaN` equals `NaN`, `+0` and `-0` differ, targets
//! compare by identity and wrappers compare by wrapper identity. Map keys and
//! set members use [`HashKey`], which follows same-value-zero instead (`+0`
//! and `-0` are the same key).

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde_json::{Map as JsonMap, Number as JsonNumber, Value as JsonValue};
use tracing::warn;

use super::target::{Target, TargetData, TargetId};
use super::wrapper::{wrap_value, Reactive, Variant};

/// A dynamically typed value stored in atoms and targets.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    /// A raw, unwrapped target. Reading through it never tracks.
    Object(Target),
    /// A reactive or readonly wrapper around a target.
    Proxy(Reactive),
}

impl Value {
    /// Same-value comparison (`Object.is`).
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => {
                (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Proxy(a), Value::Proxy(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Whether the value is a target or a wrapper.
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Proxy(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    /// The raw target, for `Object` values.
    pub fn as_target(&self) -> Option<&Target> {
        match self {
            Value::Object(target) => Some(target),
            _ => None,
        }
    }

    /// The wrapper, for `Proxy` values.
    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Value::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    /// Whether this is a wrapper that tracks reads, directly or through the
    /// mutable wrapper a readonly view was made from.
    pub fn is_reactive(&self) -> bool {
        self.as_reactive().is_some_and(Reactive::is_reactive)
    }

    pub fn is_readonly(&self) -> bool {
        self.as_reactive().is_some_and(Reactive::is_readonly)
    }

    pub fn is_shallow(&self) -> bool {
        self.as_reactive().is_some_and(Reactive::is_shallow)
    }

    /// Whether this is any kind of wrapper.
    pub fn is_proxy(&self) -> bool {
        matches!(self, Value::Proxy(_))
    }

    /// Strip every wrapper layer.
    pub fn to_raw(&self) -> Value {
        match self {
            Value::Proxy(proxy) => Value::Object(proxy.raw()),
            other => other.clone(),
        }
    }

    /// Deep mutable wrapper for objects. Other values pass through with a
    /// warning.
    pub fn to_reactive(&self) -> Value {
        self.wrap_as(Variant::Reactive)
    }

    /// Deep readonly wrapper for objects. Other values pass through with a
    /// warning.
    pub fn to_readonly(&self) -> Value {
        self.wrap_as(Variant::Readonly)
    }

    pub fn to_shallow_reactive(&self) -> Value {
        self.wrap_as(Variant::ShallowReactive)
    }

    pub fn to_shallow_readonly(&self) -> Value {
        self.wrap_as(Variant::ShallowReadonly)
    }

    fn wrap_as(&self, variant: Variant) -> Value {
        if !matches!(self, Value::Object(_) | Value::Proxy(_)) {
            warn!(value = ?self, ?variant, "value cannot be made reactive: {self:?}");
        }
        wrap_value(self, variant)
    }

    /// Build a value from JSON. Objects and arrays become fresh targets.
    pub fn from_json(json: JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Value::String(Arc::from(s)),
            JsonValue::Array(items) => {
                Value::Object(Target::array(items.into_iter().map(Value::from_json)))
            }
            JsonValue::Object(entries) => Value::Object(Target::object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, Value::from_json(value))),
            )),
        }
    }

    /// Snapshot the raw data as JSON without tracking.
    ///
    /// `undefined` and non-finite numbers become `null`; maps become objects
    /// keyed by the JSON text of each key; sets become arrays. A target that
    /// is reached again while it is being serialized becomes `null`.
    pub fn to_json(&self) -> JsonValue {
        let mut visiting = HashSet::new();
        self.to_json_inner(&mut visiting)
    }

    fn to_json_inner(&self, visiting: &mut HashSet<TargetId>) -> JsonValue {
        match self {
            Value::Undefined | Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Number(n) => JsonNumber::from_f64(*n).map_or(JsonValue::Null, JsonValue::Number),
            Value::String(s) => JsonValue::String(s.to_string()),
            Value::Proxy(proxy) => Value::Object(proxy.raw()).to_json_inner(visiting),
            Value::Object(target) => {
                if !visiting.insert(target.id()) {
                    return JsonValue::Null;
                }
                let json = target.with_data(|data| match data {
                    TargetData::Object(props) => JsonValue::Object(
                        props
                            .iter()
                            .map(|(key, value)| (key.to_string(), value.to_json_inner(visiting)))
                            .collect::<JsonMap<_, _>>(),
                    ),
                    TargetData::Array(items) => JsonValue::Array(
                        items.iter().map(|item| item.to_json_inner(visiting)).collect(),
                    ),
                    TargetData::Map(entries) => JsonValue::Object(
                        entries
                            .iter()
                            .map(|(key, value)| {
                                let name = match key.value() {
                                    Value::String(s) => s.to_string(),
                                    other => other.to_json_inner(visiting).to_string(),
                                };
                                (name, value.to_json_inner(visiting))
                            })
                            .collect::<JsonMap<_, _>>(),
                    ),
                    TargetData::Set(members) => JsonValue::Array(
                        members
                            .iter()
                            .map(|member| member.value().to_json_inner(visiting))
                            .collect(),
                    ),
                });
                visiting.remove(&target.id());
                json
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

/// Whether a write of `new` over `old` counts as a change.
pub(crate) fn has_changed(new: &Value, old: &Value) -> bool {
    !new.same_value(old)
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("Undefined"),
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Value::String(s) => f.debug_tuple("String").field(s).finish(),
            Value::Object(target) => f.debug_tuple("Object").field(target).finish(),
            Value::Proxy(proxy) => f.debug_tuple("Proxy").field(proxy).finish(),
        }
    }
}

macro_rules! impl_from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(n: $ty) -> Self {
                    Value::Number(n as f64)
                }
            }
        )*
    };
}

impl_from_number!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64);

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<Arc<str>> for Value {
    fn from(s: Arc<str>) -> Self {
        Value::String(s)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Undefined
    }
}

impl From<Target> for Value {
    fn from(target: Target) -> Self {
        Value::Object(target)
    }
}

impl From<&Target> for Value {
    fn from(target: &Target) -> Self {
        Value::Object(target.clone())
    }
}

impl From<Reactive> for Value {
    fn from(proxy: Reactive) -> Self {
        Value::Proxy(proxy)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Undefined, Into::into)
    }
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        Value::from_json(json)
    }
}

/// A map key or set member under same-value-zero equality.
///
/// Wrappers are stored by their raw target so a key looked up through a
/// wrapper finds the entry inserted with the raw target, and vice versa.
#[derive(Clone)]
pub struct HashKey(Value);

impl HashKey {
    pub fn new(value: &Value) -> Self {
        HashKey(value.to_raw())
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl PartialEq for HashKey {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            // +0 and -0 are the same key.
            (Value::Number(a), Value::Number(b)) => (a.is_nan() && b.is_nan()) || a == b,
            (a, b) => a.same_value(b),
        }
    }
}

impl Eq for HashKey {}

impl Hash for HashKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.0).hash(state);
        match &self.0 {
            Value::Undefined | Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Number(n) => {
                let canonical = if n.is_nan() {
                    f64::NAN
                } else if *n == 0.0 {
                    0.0
                } else {
                    *n
                };
                canonical.to_bits().hash(state);
            }
            Value::String(s) => s.hash(state),
            Value::Object(target) => target.id().hash(state),
            Value::Proxy(proxy) => proxy.raw().id().hash(state),
        }
    }
}

impl fmt::Debug for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Value> for HashKey {
    fn from(value: Value) -> Self {
        HashKey::new(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::hash_map::DefaultHasher;
    use tracing_test::traced_test;

    fn key(value: impl Into<Value>) -> HashKey {
        HashKey::from(value.into())
    }

    fn hash_of(key: &HashKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn same_value_handles_nan_and_signed_zero() {
        assert_eq!(Value::from(f64::NAN), Value::from(f64::NAN));
        assert_ne!(Value::from(0.0), Value::from(-0.0));
        assert_eq!(Value::from(1), Value::from(1.0));
        assert_ne!(Value::from(1), Value::from("1"));
        assert_ne!(Value::Null, Value::Undefined);
    }

    #[test]
    fn objects_compare_by_identity() {
        let a = Target::object([("x", Value::from(1))]);
        let b = Target::object([("x", Value::from(1))]);

        assert_eq!(Value::from(&a), Value::from(&a));
        assert_ne!(Value::from(&a), Value::from(&b));
    }

    #[test]
    fn hash_keys_use_same_value_zero() {
        let zero = key(0.0);
        let negative_zero = key(-0.0);
        assert_eq!(zero, negative_zero);
        assert_eq!(hash_of(&zero), hash_of(&negative_zero));

        let nan = key(f64::NAN);
        assert_eq!(nan, key(f64::NAN));
        assert_eq!(hash_of(&nan), hash_of(&key(f64::NAN)));
    }

    #[test]
    fn hash_keys_unwrap_proxies() {
        let target = Target::object([("x", Value::from(1))]);
        let proxy = crate::reactive::wrapper::reactive(&target);

        let raw_key = key(&target);
        let proxy_key = key(proxy);
        assert_eq!(raw_key, proxy_key);
        assert_eq!(hash_of(&raw_key), hash_of(&proxy_key));
    }

    #[test]
    fn json_round_trip_builds_targets() {
        let value = Value::from_json(json!({ "foo": 32, "bar": { "zag": "hello" }, "list": [1, 2] }));
        let target = value.as_target().expect("object");

        assert_eq!(target.get("foo"), Value::from(32));
        assert!(target.get("bar").as_target().is_some());
        assert_eq!(
            value.to_json(),
            json!({ "foo": 32.0, "bar": { "zag": "hello" }, "list": [1.0, 2.0] })
        );
    }

    #[test]
    fn to_json_breaks_cycles() {
        let target = Target::object([("name", Value::from("loop"))]);
        target.insert("me", &target);

        assert_eq!(
            Value::from(&target).to_json(),
            json!({ "name": "loop", "me": null })
        );
    }

    #[test]
    fn predicates_on_primitives_are_false() {
        let v = Value::from(3);
        assert!(!v.is_reactive());
        assert!(!v.is_readonly());
        assert!(!v.is_proxy());
        assert_eq!(v.to_raw(), v);
        assert_eq!(v.to_reactive(), v);
    }

    #[test]
    #[traced_test]
    fn wrapping_a_primitive_warns_and_passes_it_through() {
        assert_eq!(Value::from("text").to_readonly(), Value::from("text"));
        assert!(logs_contain("value cannot be made reactive"));
    }

    #[test]
    #[traced_test]
    fn reading_primitive_children_does_not_warn() {
        let target = Target::object([("n", Value::from(1)), ("s", Value::from("x"))]);
        let state = Value::from(&target).to_reactive();
        let proxy = state.as_reactive().expect("object wraps");
        assert_eq!(proxy.get("n"), Value::from(1));
        assert_eq!(proxy.to_readonly().get("s"), Value::from("x"));
        assert!(!logs_contain("value cannot be made reactive"));
    }
}
