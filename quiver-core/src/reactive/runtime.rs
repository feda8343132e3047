//! Reactive Runtime
//!
//! The runtime owns the association table that makes wrapping idempotent:
//! wrapping the same raw target with the same variant returns the same
//! wrapper for as long as any handle to that wrapper is alive.
//!
//! # How It Works
//!
//! 1. The table maps a raw target's [`TargetId`] to its wrappers, keyed by
//!    [`Slot`]: the wrapper's variant plus, for a readonly view over a mutable
//!    wrapper, the variant of that inner wrapper.
//!
//! 2. Entries are weak references, so the table never keeps a target or a
//!    wrapper alive.
//!
//! 3. A wrapper evicts its own entry when it is dropped, and a target evicts
//!    every entry filed under it when it is dropped. A dead entry found by a
//!    later lookup is simply replaced.
//!
//! # Thread Safety
//!
//! The table is a process-wide `RwLock`. No user code runs while it is held,
//! and nothing that could drop a wrapper or a target happens under the lock,
//! since those drops re-enter the table to evict themselves.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::RwLock;
use tracing::trace;

use super::target::TargetId;
use super::wrapper::{Reactive, ReactiveInner, Variant};

/// Registry key for one wrapper of a target.
pub(crate) type Slot = (Variant, Option<Variant>);

type Table = HashMap<TargetId, HashMap<Slot, Weak<ReactiveInner>>>;

/// The global association table.
pub struct Runtime;

static REGISTRY: OnceLock<RwLock<Table>> = OnceLock::new();

fn get_registry() -> &'static RwLock<Table> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

impl Runtime {
    /// Return the live wrapper for `(target, slot)`, or register the one
    /// built by `create`.
    ///
    /// `create` runs under the table's write lock and must only allocate.
    pub(crate) fn get_or_insert(
        target: TargetId,
        slot: Slot,
        create: impl FnOnce() -> Arc<ReactiveInner>,
    ) -> Reactive {
        let mut table = get_registry().write();
        let wrappers = table.entry(target).or_default();

        if let Some(existing) = wrappers.get(&slot).and_then(Weak::upgrade) {
            return Reactive::from_inner(existing);
        }

        let inner = create();
        wrappers.insert(slot, Arc::downgrade(&inner));
        trace!(target_id = %target, variant = ?slot.0, "registered wrapper");
        Reactive::from_inner(inner)
    }

    /// Look up a live wrapper without creating one.
    #[cfg(test)]
    pub(crate) fn lookup(target: TargetId, slot: Slot) -> Option<Reactive> {
        let upgraded = get_registry()
            .read()
            .get(&target)
            .and_then(|wrappers| wrappers.get(&slot))
            .and_then(Weak::upgrade);
        upgraded.map(Reactive::from_inner)
    }

    /// Remove the entry for `(target, slot)` if its wrapper is gone.
    ///
    /// A live entry means a newer wrapper already replaced the dying one.
    pub(crate) fn evict(target: TargetId, slot: Slot) {
        let mut table = get_registry().write();
        let Some(wrappers) = table.get_mut(&target) else {
            return;
        };
        if wrappers
            .get(&slot)
            .is_some_and(|weak| weak.strong_count() == 0)
        {
            wrappers.remove(&slot);
        }
        if wrappers.is_empty() {
            table.remove(&target);
        }
    }

    /// Forget every wrapper filed under a dropped target.
    pub(crate) fn evict_target(target: TargetId) {
        let removed = get_registry().write().remove(&target);
        if removed.is_some() {
            trace!(target_id = %target, "evicted target wrappers");
        }
    }

    /// Whether a live wrapper of any variant exists for `target`.
    pub fn is_registered(target: TargetId) -> bool {
        get_registry().read().get(&target).is_some_and(|wrappers| {
            wrappers.values().any(|weak| weak.strong_count() > 0)
        })
    }

    /// Number of live wrappers across all targets.
    pub fn wrapper_count() -> usize {
        get_registry()
            .read()
            .values()
            .flat_map(HashMap::values)
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::target::Target;
    use crate::reactive::wrapper::{reactive, readonly};

    #[test]
    fn wrapping_twice_returns_the_same_wrapper() {
        let target = Target::object([("x", 1)]);
        let a = reactive(&target);
        let b = reactive(&target);
        assert!(a.ptr_eq(&b));
        assert!(Runtime::is_registered(target.id()));
    }

    #[test]
    fn variants_get_distinct_wrappers() {
        let target = Target::object([("x", 1)]);
        let mutable = reactive(&target);
        let view = readonly(&target);
        assert!(!mutable.ptr_eq(&view));
        assert!(Runtime::lookup(target.id(), (Variant::Reactive, None)).is_some());
        assert!(Runtime::lookup(target.id(), (Variant::Readonly, None)).is_some());
    }

    #[test]
    fn dropping_the_wrapper_evicts_it() {
        let target = Target::object([("x", 1)]);
        let proxy = reactive(&target);
        assert!(Runtime::is_registered(target.id()));

        drop(proxy);
        assert!(!Runtime::is_registered(target.id()));
        assert!(Runtime::lookup(target.id(), (Variant::Reactive, None)).is_none());

        // A fresh wrapper is registered on the next wrap.
        let again = reactive(&target);
        assert!(Runtime::lookup(target.id(), (Variant::Reactive, None))
            .is_some_and(|found| found.ptr_eq(&again)));
    }

    #[test]
    fn dropping_the_target_clears_its_entries() {
        let id = {
            let target = Target::object([("x", 1)]);
            let _proxy = reactive(&target);
            target.id()
        };
        assert!(!Runtime::is_registered(id));
        assert!(Runtime::lookup(id, (Variant::Reactive, None)).is_none());
    }
}
