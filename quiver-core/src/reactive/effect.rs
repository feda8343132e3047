//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies (unless created lazily).
//!
//! 2. Before every run, the effect detaches from all dependency sets it joined
//!    during the previous run. Only the slots actually read this time are
//!    subscribed again, so a branch that is no longer taken stops causing
//!    re-runs.
//!
//! 3. When any dependency changes, the effect re-runs synchronously, or hands
//!    itself to its scheduler if one was supplied.
//!
//! # Lifecycle
//!
//! An effect is owned by its [`Effect`] handles and by the scope that recorded
//! it. Dependency sets only refer to it weakly, so an effect outside any
//! scope is dropped with its last handle: it leaves every dependency set and
//! releases whatever its function captured. Inside a scope it lives until the
//! scope stops. [`Effect::stop`] ends it early. A stopped or dropped effect is
//! never re-invoked by a write.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not. [`Effect::run`] returns `()`, so a
//!   caller that needs the function's result reads it from a memo or from
//!   state the function writes.
//! - Memos are lazy (compute on access); effects are eager (run when deps change).
//! - Memos cache results; effects just run their side effect.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

use super::context::{pause_tracking, ReactiveContext};
use super::dep::{Dep, DepInner};
use super::operations::{DebuggerOptions, EventInfo};
use super::scope::{record_effect_scope, EffectScope};
use super::subscriber::SubscriberId;

/// Hook that replaces the synchronous re-run of an effect.
///
/// It receives the effect so it can queue it and call [`Effect::run`] later.
pub type Scheduler = Arc<dyn Fn(&Effect) + Send + Sync>;

/// Callback run once when an effect is stopped.
pub type StopHook = Arc<dyn Fn() + Send + Sync>;

/// Options for [`effect_with`].
#[derive(Clone, Default)]
pub struct EffectOptions {
    /// Do not run on creation; the first run happens on [`Effect::run`].
    pub lazy: bool,
    /// Called instead of re-running when a dependency changes.
    pub scheduler: Option<Scheduler>,
    /// Scope to record the effect in. Defaults to the current scope.
    pub scope: Option<EffectScope>,
    /// Let a write performed by the effect itself re-run it.
    pub allow_recurse: bool,
    pub on_stop: Option<StopHook>,
    pub debugger: DebuggerOptions,
}

impl std::fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectOptions")
            .field("lazy", &self.lazy)
            .field("scheduler", &self.scheduler.is_some())
            .field("scope", &self.scope.is_some())
            .field("allow_recurse", &self.allow_recurse)
            .field("on_stop", &self.on_stop.is_some())
            .field("debugger", &self.debugger)
            .finish()
    }
}

/// The computation behind an [`Effect`] handle. Dropping it detaches it from
/// every dependency set it joined.
pub(crate) struct ReactiveEffect {
    id: SubscriberId,
    func: Box<dyn Fn() + Send + Sync>,
    deps: Mutex<SmallVec<[Weak<DepInner>; 4]>>,
    active: AtomicBool,
    /// Epoch of the latest run start.
    epoch: AtomicU64,
    run_count: AtomicUsize,
    scheduler: Option<Scheduler>,
    allow_recurse: bool,
    /// Set for the computation behind a memo.
    computed: bool,
    on_stop: Option<StopHook>,
    debugger: DebuggerOptions,
}

impl Drop for ReactiveEffect {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl ReactiveEffect {
    pub(crate) fn new(
        func: Box<dyn Fn() + Send + Sync>,
        options: &EffectOptions,
        computed: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: SubscriberId::new(),
            func,
            deps: Mutex::new(SmallVec::new()),
            active: AtomicBool::new(true),
            epoch: AtomicU64::new(0),
            run_count: AtomicUsize::new(0),
            scheduler: options.scheduler.clone(),
            allow_recurse: options.allow_recurse,
            computed,
            on_stop: options.on_stop.clone(),
            debugger: options.debugger.clone(),
        })
    }

    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn is_computed(&self) -> bool {
        self.computed
    }

    pub(crate) fn allow_recurse(&self) -> bool {
        self.allow_recurse
    }

    pub(crate) fn scheduler(&self) -> Option<&Scheduler> {
        self.scheduler.as_ref()
    }

    pub(crate) fn last_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn run_count(&self) -> usize {
        self.run_count.load(Ordering::SeqCst)
    }

    pub(crate) fn dep_count(&self) -> usize {
        self.deps
            .lock()
            .iter()
            .filter(|dep| dep.strong_count() > 0)
            .count()
    }

    pub(crate) fn add_dep(&self, dep: &Dep) {
        self.deps.lock().push(dep.downgrade());
    }

    /// Run the function, re-collecting dependencies.
    ///
    /// A stopped computation runs its function untracked. A computation that
    /// is already on the running stack is not re-entered.
    pub(crate) fn run(self: &Arc<Self>) {
        if !self.is_active() {
            let _paused = pause_tracking();
            (self.func)();
            return;
        }
        if ReactiveContext::contains(self.id) {
            return;
        }

        self.cleanup();

        let _ctx = ReactiveContext::enter(Arc::clone(self));
        self.epoch.store(ReactiveContext::next_epoch(), Ordering::SeqCst);
        self.run_count.fetch_add(1, Ordering::SeqCst);
        trace!(effect = %self.id, computed = self.computed, "running effect");

        (self.func)();
    }

    /// Detach from every dependency set joined so far.
    fn cleanup(&self) {
        let deps = std::mem::take(&mut *self.deps.lock());
        for dep in deps {
            if let Some(dep) = dep.upgrade() {
                dep.remove(self.id);
            }
        }
    }

    /// Detach and deactivate. Idempotent.
    pub(crate) fn stop(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cleanup();
        trace!(effect = %self.id, "stopped effect");
        if let Some(on_stop) = &self.on_stop {
            on_stop();
        }
    }

    pub(crate) fn notify_track(&self, info: &EventInfo) {
        if let Some(hook) = &self.debugger.on_track {
            hook(&info.to_event(self.id));
        }
    }

    pub(crate) fn notify_trigger(&self, info: &EventInfo) {
        if let Some(hook) = &self.debugger.on_trigger {
            hook(&info.to_event(self.id));
        }
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use quiver_core::reactive::{atom, effect};
///
/// let count = atom(0);
///
/// let reader = count.clone();
/// let e = effect(move || {
///     println!("Count is: {:?}", reader.get());
/// });
///
/// count.set(5);  // Prints: "Count is: Number(5.0)"
/// e.stop();
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Arc<ReactiveEffect>,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_options(run, EffectOptions::default())
    }

    /// Create a new effect without running it immediately.
    ///
    /// Useful for cases where you want to control when the effect first runs.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_options(
            run,
            EffectOptions {
                lazy: true,
                ..Default::default()
            },
        )
    }

    /// Create an effect with explicit options.
    pub fn with_options<F>(run: F, options: EffectOptions) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let inner = ReactiveEffect::new(Box::new(run), &options, false);
        record_effect_scope(&inner, options.scope.as_ref());

        let effect = Self { inner };
        if !options.lazy {
            effect.run();
        }
        effect
    }

    pub(crate) fn from_inner(inner: Arc<ReactiveEffect>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<ReactiveEffect> {
        &self.inner
    }

    /// Get the effect's subscriber ID.
    pub fn id(&self) -> SubscriberId {
        self.inner.id()
    }

    /// Execute the effect function now, re-collecting dependencies.
    ///
    /// Returns nothing: the function is `Fn()`. Use a [`Memo`] for a derived
    /// value.
    ///
    /// A panic in the function propagates to the caller after the tracking
    /// context has been restored; the effect stays usable.
    ///
    /// [`Memo`]: super::memo::Memo
    pub fn run(&self) {
        self.inner.run();
    }

    /// Stop the effect.
    ///
    /// After stopping, the effect will not run again in response to writes.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Check if the effect is still active.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Get the number of tracked runs so far.
    pub fn run_count(&self) -> usize {
        self.inner.run_count()
    }

    /// Get the number of dependency sets the effect is subscribed to.
    pub fn dep_count(&self) -> usize {
        self.inner.dep_count()
    }

    pub fn ptr_eq(&self, other: &Effect) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dep_count())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Create and run an effect.
pub fn effect<F>(run: F) -> Effect
where
    F: Fn() + Send + Sync + 'static,
{
    Effect::new(run)
}

/// Create an effect with options.
pub fn effect_with<F>(run: F, options: EffectOptions) -> Effect
where
    F: Fn() + Send + Sync + 'static,
{
    Effect::with_options(run, options)
}

/// Stop an effect.
pub fn stop(effect: &Effect) {
    effect.stop();
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
