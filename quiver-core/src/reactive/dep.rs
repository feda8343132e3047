//! Dependency Sets
//!
//! A [`Dep`] is the subscriber list of one observable slot: the value slot of
//! an atom or memo, or one key of a wrapped target. Dependency sets and
//! computations form a many-to-many graph:
//!
//! - a `Dep` holds weak references to its subscribers, keyed by
//!   [`SubscriberId`] so a computation appears at most once per set;
//! - a computation holds weak references back to every `Dep` it joined, so it
//!   can detach before re-running or when stopped without keeping the slot
//!   alive.
//!
//! Neither side owns the other. Computations are owned by their handles,
//! their scope, or the memo they drive; slots are owned by whatever holds the
//! atom or target. A computation that is dropped leaves every set it joined.
//!
//! # Trigger passes
//!
//! [`trigger_effects`] snapshots the subscribers before notifying anyone, so
//! computations may subscribe or unsubscribe while the pass runs. Memo
//! computations are notified first: they only mark themselves dirty, and
//! doing that before any plain effect runs guarantees effects never read a
//! stale memo. Plain effects reached through a memo (a memo's own readers)
//! are deferred to the end of the outermost pass and merged with the direct
//! subscribers, so a computation that depends on one slot through several
//! memos still runs once. A computation that already re-ran after the pass
//! began is not run a second time.

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::trace;

use super::context::ReactiveContext;
use super::effect::{Effect, ReactiveEffect};
use super::operations::{EventInfo, Key, TrackOp, TriggerOp};
use super::SubscriberId;

/// Subscriber list for one observable slot.
///
/// Cloning a `Dep` yields another handle to the same set.
#[derive(Clone, Default)]
pub struct Dep {
    inner: Arc<DepInner>,
}

/// Called with the set once its last subscriber leaves.
pub(crate) type ReleaseHook = Box<dyn Fn(&DepInner) + Send + Sync>;

#[derive(Default)]
pub(crate) struct DepInner {
    subscribers: Mutex<IndexMap<SubscriberId, Weak<ReactiveEffect>>>,
    on_empty: Option<ReleaseHook>,
}

impl DepInner {
    /// Remove a subscriber, then run the release hook if the set is now
    /// empty. The hook runs without the subscriber lock held.
    pub(crate) fn remove(&self, id: SubscriberId) {
        let emptied = {
            let mut subscribers = self.subscribers.lock();
            let removed = subscribers.shift_remove(&id).is_some();
            subscribers.retain(|_, effect| effect.strong_count() > 0);
            removed && subscribers.is_empty()
        };
        if emptied {
            if let Some(release) = &self.on_empty {
                release(self);
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.subscribers.lock().values().all(|effect| effect.strong_count() == 0)
    }
}

impl Dep {
    /// Create an empty dependency set.
    pub fn new() -> Self {
        Self::default()
    }

    /// A set that calls `release` whenever its last subscriber leaves, so the
    /// owning table can drop the entry.
    pub(crate) fn with_release(release: impl Fn(&DepInner) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(DepInner {
                subscribers: Mutex::default(),
                on_empty: Some(Box::new(release)),
            }),
        }
    }

    /// Register the running computation, if any, as a subscriber.
    ///
    /// This is the hook for custom reactive sources built outside this crate.
    pub fn track(&self) {
        track_effects(self, &EventInfo::track(None, TrackOp::Get, Key::Value));
    }

    /// Notify every subscriber that the slot changed.
    pub fn trigger(&self) {
        trigger_effects(self, &EventInfo::trigger(None, TriggerOp::Set, Key::Value, None));
    }

    /// Number of live subscribed computations.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .values()
            .filter(|effect| effect.strong_count() > 0)
            .count()
    }

    /// Whether the computation with `id` is subscribed.
    pub fn has_subscriber(&self, id: SubscriberId) -> bool {
        self.inner
            .subscribers
            .lock()
            .get(&id)
            .is_some_and(|effect| effect.strong_count() > 0)
    }

    pub(crate) fn downgrade(&self) -> Weak<DepInner> {
        Arc::downgrade(&self.inner)
    }

    /// Whether both handles share one set.
    pub fn ptr_eq(&self, other: &Dep) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether this handle points at `inner`.
    pub(crate) fn is(&self, inner: &DepInner) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.inner), inner)
    }

    /// Upgrade the live subscribers and prune the dropped ones.
    fn snapshot(&self) -> Vec<Arc<ReactiveEffect>> {
        let mut live = Vec::new();
        self.inner.subscribers.lock().retain(|_, effect| match effect.upgrade() {
            Some(effect) => {
                live.push(effect);
                true
            }
            None => false,
        });
        live
    }
}

impl std::fmt::Debug for Dep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dep")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Subscribe the running computation to `dep`.
///
/// No-op when tracking is paused, when nothing is running, when the running
/// computation has been stopped, or when it is already subscribed.
pub(crate) fn track_effects(dep: &Dep, info: &EventInfo) {
    let Some(effect) = ReactiveContext::tracking_effect() else {
        return;
    };
    if !effect.is_active() {
        return;
    }

    let inserted = {
        let mut subscribers = dep.inner.subscribers.lock();
        if subscribers.contains_key(&effect.id()) {
            false
        } else {
            subscribers.insert(effect.id(), Arc::downgrade(&effect));
            true
        }
    };

    if inserted {
        effect.add_dep(dep);
        effect.notify_track(info);
    }
}

/// Notify every subscriber of `dep`.
pub(crate) fn trigger_effects(dep: &Dep, info: &EventInfo) {
    run_triggered(dep.snapshot(), info);
}

/// Notify the union of the subscribers of `deps`, each at most once.
pub(crate) fn trigger_deps(deps: &[Dep], info: &EventInfo) {
    match deps {
        [] => {}
        [dep] => trigger_effects(dep, info),
        _ => {
            let mut effects: IndexMap<SubscriberId, Arc<ReactiveEffect>> = IndexMap::new();
            for dep in deps {
                for effect in dep.snapshot() {
                    effects.entry(effect.id()).or_insert(effect);
                }
            }
            run_triggered(effects.into_values().collect(), info);
        }
    }
}

thread_local! {
    /// Plain effects reached through a memo invalidation, waiting for the
    /// outermost pass. `None` outside a memo notification phase.
    static DEFERRED: RefCell<Option<Vec<(Arc<ReactiveEffect>, EventInfo)>>> =
        const { RefCell::new(None) };
}

/// Opens the deferral queue for a memo notification phase and closes it on
/// drop, including on unwind.
struct DeferGuard;

impl DeferGuard {
    fn enter() -> Self {
        DEFERRED.with(|queue| *queue.borrow_mut() = Some(Vec::new()));
        Self
    }

    fn finish(self) -> Vec<(Arc<ReactiveEffect>, EventInfo)> {
        DEFERRED.with(|queue| queue.borrow_mut().take().unwrap_or_default())
    }
}

impl Drop for DeferGuard {
    fn drop(&mut self) {
        let leftover = DEFERRED.with(|queue| queue.borrow_mut().take());
        drop(leftover);
    }
}

fn run_triggered(effects: Vec<Arc<ReactiveEffect>>, info: &EventInfo) {
    if effects.is_empty() {
        return;
    }
    let pass = ReactiveContext::epoch();
    trace!(count = effects.len(), key = %info.key, "triggering subscribers");

    let (computed, plain): (Vec<_>, Vec<_>) =
        effects.into_iter().partition(|effect| effect.is_computed());

    // Inside an outer memo phase: mark memos dirty now, leave plain effects
    // to the outer pass so they run once, after every memo is dirty.
    let nested = DEFERRED.with(|queue| queue.borrow().is_some());
    if nested {
        for effect in &computed {
            trigger_effect(effect, info, pass);
        }
        DEFERRED.with(|queue| {
            if let Some(queue) = queue.borrow_mut().as_mut() {
                queue.extend(plain.into_iter().map(|effect| (effect, info.clone())));
            }
        });
        return;
    }

    let mut pending: IndexMap<SubscriberId, (Arc<ReactiveEffect>, EventInfo)> = plain
        .into_iter()
        .map(|effect| (effect.id(), (effect, info.clone())))
        .collect();
    if !computed.is_empty() {
        let phase = DeferGuard::enter();
        for effect in &computed {
            trigger_effect(effect, info, pass);
        }
        for (effect, reason) in phase.finish() {
            pending.entry(effect.id()).or_insert((effect, reason));
        }
    }

    for (effect, reason) in pending.into_values() {
        trigger_effect(&effect, &reason, pass);
    }
}

fn trigger_effect(effect: &Arc<ReactiveEffect>, info: &EventInfo, pass: u64) {
    // Stopped by an earlier subscriber of this pass.
    if !effect.is_active() {
        return;
    }
    // A computation writing a slot it reads must not re-enter itself.
    if ReactiveContext::is_running(effect.id()) && !effect.allow_recurse() {
        return;
    }
    // Already re-ran after this pass started, so it saw the write.
    if effect.last_epoch() > pass {
        return;
    }

    effect.notify_trigger(info);
    match effect.scheduler() {
        Some(scheduler) => scheduler(&Effect::from_inner(Arc::clone(effect))),
        None => effect.run(),
    }
}
