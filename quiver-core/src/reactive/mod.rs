//! Reactive Primitives
//!
//! This module implements the reactive engine: atoms, reactive object
//! wrappers, memos, effects and effect scopes.
//!
//! # Concepts
//!
//! ## Atoms
//!
//! An Atom is a single reactive value slot. Reading it inside a running
//! computation subscribes that computation; writing a value that differs
//! under same-value equality notifies every subscriber.
//!
//! ## Reactive wrappers
//!
//! A [`Reactive`] wraps a raw [`Target`] (object, array, map or set) and
//! tracks every keyed read and triggers every keyed write. Wrappers come in
//! four variants: deep or shallow, mutable or readonly. Wrapping is cached
//! per raw target and variant.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. A dependency change
//! only marks it dirty; it recomputes on the next read.
//!
//! ## Effects and scopes
//!
//! An Effect is a side-effecting computation that re-runs whenever a slot it
//! read on its last run changes. Effect scopes group effects, memos and
//! cleanup callbacks so they can be disposed together. Slots refer to the
//! effects subscribed to them weakly, so an effect lives only as long as its
//! handle or its scope.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to detect
//! dependencies. When a slot is read, we check if there is an active
//! tracking context and, if so, register the dependency.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos.

mod atom;
mod collection;
mod context;
mod dep;
mod effect;
mod memo;
mod operations;
mod runtime;
mod scope;
mod subscriber;
mod target;
mod value;
mod wrapper;

pub use atom::{atom, atom_with, to_readonly, Atom, AtomOptions, ReadonlyAtom};
pub use collection::Collection;
pub use context::{enable_tracking, pause_tracking, untracked, ReactiveContext, TrackingGuard};
pub use dep::Dep;
pub use effect::{effect, effect_with, stop, Effect, EffectOptions, Scheduler, StopHook};
pub use memo::{memo, memo_with_setter, Memo, MemoOptions, MemoState};
pub use operations::{DebugHook, DebugOp, DebuggerEvent, DebuggerOptions, Key, TrackOp, TriggerOp};
pub use runtime::Runtime;
pub use scope::{
    effect_scope, get_current_scope, on_scope_dispose, record_effect, EffectScope,
    ScopeCleanupFn,
};
pub use subscriber::SubscriberId;
pub use target::{Target, TargetData, TargetId, TargetKind, MAX_ARRAY_LENGTH};
pub use value::{HashKey, Value};
pub use wrapper::{
    is_proxy, is_reactive, is_readonly, is_shallow, readonly, reactive, shallow_reactive,
    shallow_readonly, to_raw, Reactive, Variant,
};
