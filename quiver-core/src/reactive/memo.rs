//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when it is read
//! after one of its dependencies changed.
//!
//! # How Memos Work
//!
//! 1. Creating a memo runs nothing. The getter runs on first access and the
//!    result is cached.
//!
//! 2. The getter runs inside an internal computation, so every slot it reads
//!    subscribes that computation.
//!
//! 3. When a dependency changes, the computation does not re-run. Its
//!    scheduler marks the memo dirty and notifies the memo's own readers.
//!    A memo that is already dirty notifies nobody.
//!
//! 4. The next read sees the dirty flag and recomputes. Readers before that
//!    read see the stale value, readers after see the fresh one.
//!
//! # Why This Matters
//!
//! - An atom changes
//! - 10 memos depend on it
//! - Only the memos actually read will recompute
//! - Memos that are never read stay dirty
//!
//! # Thread Safety
//!
//! The cached value sits behind a `parking_lot` lock that is never held
//! while the getter runs.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::warn;

use super::context::untracked;
use super::dep::{trigger_effects, Dep};
use super::effect::{Effect, EffectOptions, ReactiveEffect};
use super::operations::{DebuggerOptions, EventInfo, Key, TriggerOp};
use super::scope::record_effect_scope;
use super::subscriber::SubscriberId;

type Getter<T> = Box<dyn Fn() -> T + Send + Sync>;
type Setter<T> = Box<dyn Fn(T) + Send + Sync>;

/// Dirty state for a memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency changed, or the memo was never read.
    Dirty,
}

/// Options for [`Memo::with_options`].
#[derive(Clone, Debug)]
pub struct MemoOptions {
    /// Hooks for the memo's internal computation.
    pub debugger: DebuggerOptions,
    /// When off, every read recomputes and nothing is subscribed.
    pub cacheable: bool,
}

impl Default for MemoOptions {
    fn default() -> Self {
        Self {
            debugger: DebuggerOptions::default(),
            cacheable: true,
        }
    }
}

struct MemoInner<T> {
    getter: Getter<T>,
    setter: Option<Setter<T>>,
    value: RwLock<Option<T>>,
    dirty: AtomicBool,
    cacheable: bool,
    dep: Dep,
    effect: Arc<ReactiveEffect>,
}

impl<T> MemoInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn compute(&self) {
        let value = (self.getter)();
        let previous = self.value.write().replace(value);
        drop(previous);
    }

    fn invalidate(&self) {
        if !self.dirty.swap(true, Ordering::SeqCst) {
            trigger_effects(
                &self.dep,
                &EventInfo::trigger(None, TriggerOp::Set, Key::Value, None),
            );
        }
    }

    fn refresh(&self) {
        if !self.dirty.swap(false, Ordering::SeqCst) && self.cacheable {
            return;
        }
        let _reset = DirtyOnUnwind(&self.dirty);
        self.effect.run();
    }
}

impl<T> Drop for MemoInner<T> {
    fn drop(&mut self) {
        self.effect.stop();
    }
}

/// Puts the dirty flag back when the getter panics, so the next read retries.
struct DirtyOnUnwind<'a>(&'a AtomicBool);

impl Drop for DirtyOnUnwind<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.store(true, Ordering::SeqCst);
        }
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Type Parameters
///
/// - `T`: The type of the computed value. Must be Clone + Send + Sync.
///
/// Cloning a `Memo` yields another handle to the same cache.
///
/// # Example
///
/// ```rust
/// use quiver_core::reactive::{atom, memo};
///
/// let count = atom(2);
/// let reader = count.clone();
/// let doubled = memo(move || reader.get().as_f64().unwrap_or(0.0) * 2.0);
///
/// assert_eq!(doubled.get(), 4.0);
/// count.set(5);
/// assert_eq!(doubled.get(), 10.0);
/// ```
pub struct Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<MemoInner<T>>,
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new memo with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(Box::new(getter), None, MemoOptions::default())
    }

    /// Create a writable memo. Writes go to `setter`; the cache is only
    /// refreshed through the getter.
    pub fn with_setter<F, S>(getter: F, setter: S) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        S: Fn(T) + Send + Sync + 'static,
    {
        Self::build(Box::new(getter), Some(Box::new(setter)), MemoOptions::default())
    }

    /// Create a memo with debugger hooks or caching disabled.
    pub fn with_options<F>(getter: F, options: MemoOptions) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(Box::new(getter), None, options)
    }

    /// Create a writable memo with debugger hooks or caching disabled.
    pub fn with_setter_options<F, S>(getter: F, setter: S, options: MemoOptions) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        S: Fn(T) + Send + Sync + 'static,
    {
        Self::build(Box::new(getter), Some(Box::new(setter)), options)
    }

    fn build(getter: Getter<T>, setter: Option<Setter<T>>, options: MemoOptions) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<MemoInner<T>>| {
            let run = weak.clone();
            let schedule = weak.clone();
            let effect_options = EffectOptions {
                lazy: true,
                scheduler: Some(Arc::new(move |_: &Effect| {
                    if let Some(memo) = schedule.upgrade() {
                        memo.invalidate();
                    }
                })),
                debugger: options.debugger.clone(),
                ..Default::default()
            };
            let effect = ReactiveEffect::new(
                Box::new(move || {
                    if let Some(memo) = run.upgrade() {
                        memo.compute();
                    }
                }),
                &effect_options,
                true,
            );

            MemoInner {
                getter,
                setter,
                value: RwLock::new(None),
                dirty: AtomicBool::new(true),
                cacheable: options.cacheable,
                dep: Dep::new(),
                effect,
            }
        });

        if !inner.cacheable {
            // An inactive computation runs its getter untracked.
            inner.effect.stop();
        }
        record_effect_scope(&inner.effect, None);

        Self { inner }
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Subscribes the running computation to this memo.
    pub fn get(&self) -> T {
        self.inner.dep.track();
        self.inner.refresh();
        self.inner
            .value
            .read()
            .clone()
            .expect("memo should have a value after refresh")
    }

    /// Read the value without subscribing the running computation.
    pub fn peek(&self) -> T {
        untracked(|| self.get())
    }

    /// Write through the setter.
    ///
    /// A memo created without a setter warns and ignores the write.
    pub fn set(&self, value: T) {
        match &self.inner.setter {
            Some(setter) => setter(value),
            None => warn!("Write operation failed: computed value is readonly"),
        }
    }

    /// Write `f(current)` through the setter.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.peek());
        self.set(next);
    }

    /// Whether the next read recomputes.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst) || !self.inner.cacheable
    }

    pub fn state(&self) -> MemoState {
        if self.is_dirty() {
            MemoState::Dirty
        } else {
            MemoState::Clean
        }
    }

    pub fn is_writable(&self) -> bool {
        self.inner.setter.is_some()
    }

    pub fn is_cacheable(&self) -> bool {
        self.inner.cacheable
    }

    /// Whether a value has ever been computed.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }

    /// ID of the internal computation.
    pub fn id(&self) -> SubscriberId {
        self.inner.effect.id()
    }

    /// Number of computations reading this memo.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dep.subscriber_count()
    }

    /// Number of slots the getter read on its last run.
    pub fn dependency_count(&self) -> usize {
        self.inner.effect.dep_count()
    }

    /// Detach the internal computation. The cached value is kept and no
    /// longer invalidated.
    pub fn stop(&self) {
        self.inner.effect.stop();
    }

    pub fn ptr_eq(&self, other: &Memo<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("value", &*self.inner.value.read())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Create a readonly memo.
pub fn memo<T, F>(getter: F) -> Memo<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Memo::new(getter)
}

/// Create a memo whose writes are forwarded to `setter`.
pub fn memo_with_setter<T, F, S>(getter: F, setter: S) -> Memo<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
    S: Fn(T) + Send + Sync + 'static,
{
    Memo::with_setter(getter, setter)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::atom::atom;
    use crate::reactive::effect::effect;
    use crate::reactive::operations::{DebugOp, DebuggerEvent};
    use crate::reactive::scope::effect_scope;
    use crate::reactive::value::Value;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicI32;
    use tracing_test::traced_test;

    fn number(value: Value) -> f64 {
        value.as_f64().unwrap_or(f64::NAN)
    }

    #[test]
    fn memo_computes_on_first_access() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let memo = Memo::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        // Not computed yet
        assert!(!memo.has_value());
        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        // First access triggers computation
        assert_eq!(memo.get(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert!(memo.has_value());
    }

    #[test]
    fn memo_caches_value_when_clean() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let memo = Memo::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert_eq!(memo.get(), 42);
        assert_eq!(memo.get(), 42);
        assert_eq!(memo.get(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn memo_stays_lazy_after_invalidation() {
        let source = atom(1);
        let call_count = Arc::new(AtomicI32::new(0));

        let (reader, call_count_clone) = (source.clone(), call_count.clone());
        let doubled = memo(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            number(reader.get()) * 2.0
        });

        assert_eq!(doubled.get(), 2.0);
        assert_eq!(doubled.state(), MemoState::Clean);

        source.set(2);
        source.set(3);
        // Marked dirty, but nothing recomputed yet.
        assert_eq!(doubled.state(), MemoState::Dirty);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        assert_eq!(doubled.get(), 6.0);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn memo_state_transitions() {
        let source = atom(0);
        let reader = source.clone();
        let memo = Memo::new(move || number(reader.get()));

        // Starts dirty
        assert_eq!(memo.state(), MemoState::Dirty);

        memo.get();
        assert_eq!(memo.state(), MemoState::Clean);

        source.set(1);
        assert_eq!(memo.state(), MemoState::Dirty);

        memo.get();
        assert_eq!(memo.state(), MemoState::Clean);
    }

    #[test]
    fn memo_triggers_reading_effect() {
        let source = atom(1);
        let reader = source.clone();
        let plus_one = memo(move || number(reader.get()) + 1.0);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (memo_clone, seen_clone) = (plus_one.clone(), seen.clone());
        let _e = effect(move || seen_clone.lock().push(memo_clone.get()));

        source.set(10);
        assert_eq!(*seen.lock(), vec![2.0, 11.0]);
        assert_eq!(plus_one.subscriber_count(), 1);
    }

    #[test]
    fn dirty_memo_notifies_readers_once() {
        let source = atom(1);
        let reader = source.clone();
        let m = memo(move || number(reader.get()));

        let runs = Arc::new(AtomicI32::new(0));
        let (memo_clone, runs_clone) = (m.clone(), runs.clone());
        // Reads the memo only on the first run.
        let _e = effect(move || {
            if runs_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                memo_clone.get();
            }
        });

        source.set(2);
        source.set(3);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn effect_reading_sibling_memos_runs_once_per_write() {
        let source = atom(1);
        let (left_reader, right_reader) = (source.clone(), source.clone());
        let left = memo(move || number(left_reader.get()));
        let right = memo(move || number(right_reader.get()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (l, r, seen_clone) = (left.clone(), right.clone(), seen.clone());
        let _e = effect(move || seen_clone.lock().push((l.get(), r.get())));

        source.set(2);
        // Both memos were dirty before the effect re-ran.
        assert_eq!(*seen.lock(), vec![(1.0, 1.0), (2.0, 2.0)]);
    }

    #[test]
    fn chained_memos_recompute_in_order() {
        let source = atom(1);
        let reader = source.clone();
        let a = memo(move || number(reader.get()) * 10.0);
        let a_reader = a.clone();
        let b = memo(move || a_reader.get() + 1.0);

        assert_eq!(b.get(), 11.0);
        source.set(2);
        assert!(a.is_dirty());
        assert!(b.is_dirty());
        assert_eq!(b.get(), 21.0);
    }

    #[test]
    fn peek_does_not_subscribe() {
        let m = memo(|| 7);
        let memo_clone = m.clone();
        let _e = effect(move || {
            memo_clone.peek();
        });
        assert_eq!(m.subscriber_count(), 0);
        assert_eq!(m.peek(), 7);
    }

    #[test]
    #[traced_test]
    fn writing_readonly_memo_warns() {
        let m = memo(|| 1);
        m.set(5);
        assert_eq!(m.get(), 1);
        assert!(!m.is_writable());
        assert!(logs_contain("computed value is readonly"));
    }

    #[test]
    fn setter_receives_writes() {
        let source = atom(1);
        let (reader, writer) = (source.clone(), source.clone());
        let doubled = memo_with_setter(
            move || number(reader.get()) * 2.0,
            move |value: f64| writer.set(value / 2.0),
        );

        assert_eq!(doubled.get(), 2.0);
        doubled.set(8.0);
        assert_eq!(source.peek(), Value::from(4.0));
        assert_eq!(doubled.get(), 8.0);

        doubled.update(|current| current + 2.0);
        assert_eq!(doubled.get(), 10.0);
    }

    #[test]
    fn uncacheable_memo_recomputes_every_read() {
        let call_count = Arc::new(AtomicI32::new(0));
        let source = atom(1);
        let (reader, call_count_clone) = (source.clone(), call_count.clone());

        let m = Memo::with_options(
            move || {
                call_count_clone.fetch_add(1, Ordering::SeqCst);
                number(reader.get())
            },
            MemoOptions {
                cacheable: false,
                ..Default::default()
            },
        );

        assert_eq!(m.get(), 1.0);
        assert_eq!(m.get(), 1.0);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
        // Nothing was subscribed.
        assert_eq!(source.subscriber_count(), 0);
        assert!(m.is_dirty());
    }

    #[test]
    fn debugger_hooks_see_internal_computation() {
        let events: Arc<Mutex<Vec<DebugOp>>> = Arc::new(Mutex::new(Vec::new()));
        let source = atom(1);

        let (reader, on_track, on_trigger) = (source.clone(), events.clone(), events.clone());
        let m = Memo::with_options(
            move || number(reader.get()),
            MemoOptions {
                debugger: DebuggerOptions::default()
                    .on_track(move |event: &DebuggerEvent| on_track.lock().push(event.op))
                    .on_trigger(move |event: &DebuggerEvent| on_trigger.lock().push(event.op)),
                ..Default::default()
            },
        );

        m.get();
        source.set(2);
        let events = events.lock();
        assert!(matches!(events.first(), Some(DebugOp::Track(_))));
        assert!(matches!(events.last(), Some(DebugOp::Trigger(_))));
    }

    #[test]
    fn writable_memo_reports_to_debugger_hooks() {
        let tracks = Arc::new(AtomicI32::new(0));
        let triggers = Arc::new(AtomicI32::new(0));
        let source = atom(1);

        let (reader, writer) = (source.clone(), source.clone());
        let (tracks_clone, triggers_clone) = (tracks.clone(), triggers.clone());
        let m = Memo::with_setter_options(
            move || number(reader.get()) * 10.0,
            move |value: f64| writer.set(value / 10.0),
            MemoOptions {
                debugger: DebuggerOptions::default()
                    .on_track(move |_: &DebuggerEvent| {
                        tracks_clone.fetch_add(1, Ordering::SeqCst);
                    })
                    .on_trigger(move |_: &DebuggerEvent| {
                        triggers_clone.fetch_add(1, Ordering::SeqCst);
                    }),
                ..Default::default()
            },
        );
        assert!(m.is_writable());

        assert_eq!(m.get(), 10.0);
        assert_eq!(tracks.load(Ordering::SeqCst), 1);

        m.set(30.0);
        assert_eq!(source.peek(), Value::from(3));
        assert_eq!(triggers.load(Ordering::SeqCst), 1);
        assert_eq!(m.get(), 30.0);
        assert_eq!(tracks.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stopped_scope_freezes_memo() {
        let source = atom(1);
        let scope = effect_scope();
        let reader = source.clone();
        let m = scope
            .run(move || memo(move || number(reader.get())))
            .expect("scope should be active");

        assert_eq!(m.get(), 1.0);
        scope.stop();

        source.set(2);
        assert_eq!(m.get(), 1.0);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn dropping_memo_detaches_it() {
        let source = atom(1);
        let reader = source.clone();
        let m = memo(move || number(reader.get()));
        m.get();
        assert_eq!(source.subscriber_count(), 1);

        drop(m);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn panicking_getter_retries_on_next_read() {
        let fail = Arc::new(AtomicBool::new(true));
        let fail_clone = fail.clone();
        let m = memo(move || {
            if fail_clone.load(Ordering::SeqCst) {
                panic!("getter failed");
            }
            3
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| m.get()));
        assert!(result.is_err());

        fail.store(false, Ordering::SeqCst);
        assert_eq!(m.get(), 3);
    }
}
