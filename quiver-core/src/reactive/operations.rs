//! Operation kinds and debugger events.
//!
//! Every tracked read is tagged with a [`TrackOp`] and every invalidating
//! write with a [`TriggerOp`]. The tags decide which dependency sets a write
//! reaches (see `Target::trigger`) and are forwarded to the optional
//! `on_track` / `on_trigger` hooks for tooling.

use std::fmt;
use std::sync::Arc;

use super::subscriber::SubscriberId;
use super::target::TargetId;
use super::value::{HashKey, Value};

/// Kind of read that created a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackOp {
    /// A property, index, entry or container value was read.
    Get,
    /// Presence of a key was tested.
    Has,
    /// Keys, values or size were enumerated.
    Iterate,
}

/// Kind of write that invalidates dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerOp {
    /// An existing slot changed value.
    Set,
    /// A new key, index or entry appeared.
    Add,
    /// A key or entry was removed.
    Delete,
    /// A collection was emptied.
    Clear,
}

/// An observable slot inside a target, or the value slot of a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// The single value slot of an atom, memo or standalone dependency set.
    Value,
    /// A named property of a plain object.
    Prop(Arc<str>),
    /// An array element.
    Index(usize),
    /// The length of an array.
    Length,
    /// Structural enumeration of an object, set or map.
    Iterate,
    /// Enumeration of map keys only. Value-only changes leave it untouched.
    MapKeyIterate,
    /// A map or set entry.
    Entry(HashKey),
}

impl Key {
    pub(crate) fn prop(name: &str) -> Self {
        Key::Prop(Arc::from(name))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Value => f.write_str("value"),
            Key::Prop(name) => write!(f, "{name}"),
            Key::Index(index) => write!(f, "[{index}]"),
            Key::Length => f.write_str("length"),
            Key::Iterate => f.write_str("<iterate>"),
            Key::MapKeyIterate => f.write_str("<map-key-iterate>"),
            Key::Entry(key) => write!(f, "<entry {:?}>", key.value()),
        }
    }
}

/// Whether a debugger event was raised by a read or a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugOp {
    Track(TrackOp),
    Trigger(TriggerOp),
}

/// Payload handed to `on_track` and `on_trigger` hooks.
#[derive(Debug, Clone)]
pub struct DebuggerEvent {
    /// The computation being subscribed or notified.
    pub effect: SubscriberId,
    pub op: DebugOp,
    /// The raw target owning the slot, `None` for atom and memo slots.
    pub target: Option<TargetId>,
    pub key: Key,
    /// The value written, for triggers that carry one.
    pub new_value: Option<Value>,
}

/// Hook invoked with a [`DebuggerEvent`].
pub type DebugHook = Arc<dyn Fn(&DebuggerEvent) + Send + Sync>;

/// Tooling hooks attached to an effect or memo.
#[derive(Clone, Default)]
pub struct DebuggerOptions {
    /// Called when the computation subscribes to a new slot.
    pub on_track: Option<DebugHook>,
    /// Called when a write notifies the computation.
    pub on_trigger: Option<DebugHook>,
}

impl DebuggerOptions {
    pub fn on_track(mut self, hook: impl Fn(&DebuggerEvent) + Send + Sync + 'static) -> Self {
        self.on_track = Some(Arc::new(hook));
        self
    }

    pub fn on_trigger(mut self, hook: impl Fn(&DebuggerEvent) + Send + Sync + 'static) -> Self {
        self.on_trigger = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for DebuggerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebuggerOptions")
            .field("on_track", &self.on_track.is_some())
            .field("on_trigger", &self.on_trigger.is_some())
            .finish()
    }
}

/// Description of a read or write, turned into a [`DebuggerEvent`] only when
/// a hook is installed.
#[derive(Debug, Clone)]
pub(crate) struct EventInfo {
    pub op: DebugOp,
    pub target: Option<TargetId>,
    pub key: Key,
    pub new_value: Option<Value>,
}

impl EventInfo {
    pub fn track(target: Option<TargetId>, op: TrackOp, key: Key) -> Self {
        Self {
            op: DebugOp::Track(op),
            target,
            key,
            new_value: None,
        }
    }

    pub fn trigger(
        target: Option<TargetId>,
        op: TriggerOp,
        key: Key,
        new_value: Option<Value>,
    ) -> Self {
        Self {
            op: DebugOp::Trigger(op),
            target,
            key,
            new_value,
        }
    }

    pub fn to_event(&self, effect: SubscriberId) -> DebuggerEvent {
        DebuggerEvent {
            effect,
            op: self.op,
            target: self.target,
            key: self.key.clone(),
            new_value: self.new_value.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_display_readably() {
        assert_eq!(Key::Value.to_string(), "value");
        assert_eq!(Key::prop("foo").to_string(), "foo");
        assert_eq!(Key::Index(3).to_string(), "[3]");
        assert_eq!(Key::Length.to_string(), "length");
    }

    #[test]
    fn event_info_builds_events() {
        let info = EventInfo::trigger(None, TriggerOp::Set, Key::Value, Some(Value::from(2)));
        let id = SubscriberId::new();
        let event = info.to_event(id);

        assert_eq!(event.effect, id);
        assert_eq!(event.op, DebugOp::Trigger(TriggerOp::Set));
        assert_eq!(event.key, Key::Value);
        assert_eq!(event.new_value, Some(Value::from(2)));
    }

    #[test]
    fn debugger_options_builder_sets_hooks() {
        let options = DebuggerOptions::default().on_track(|_| {});
        assert!(options.on_track.is_some());
        assert!(options.on_trigger.is_none());
    }
}
