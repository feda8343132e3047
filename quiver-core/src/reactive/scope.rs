//! Effect Scopes
//!
//! A scope groups computations and cleanup callbacks so they can be disposed
//! together. Scopes form a tree: a scope created while another one is
//! current becomes its child, unless it is created detached.
//!
//! # Disposal order
//!
//! [`EffectScope::stop`] disposes child scopes first, then walks the scope's
//! own members (computations and `on_scope_dispose` callbacks) in
//! registration order, then detaches from its parent. Stopping an already
//! stopped scope, including from inside one of its own callbacks, does
//! nothing.
//!
//! The current scope is thread-local, like the reactive context. It is set
//! for the duration of [`EffectScope::run`] and restored by a guard, so a
//! panic inside `run` leaves the previous scope current.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{trace, warn};

use super::effect::{Effect, ReactiveEffect};

thread_local! {
    static CURRENT_SCOPE: RefCell<Option<EffectScope>> = const { RefCell::new(None) };
}

/// Disposal callback registered with [`on_scope_dispose`].
pub type ScopeCleanupFn = Box<dyn FnOnce() + Send>;

enum ScopeMember {
    Effect(Arc<ReactiveEffect>),
    Cleanup(ScopeCleanupFn),
}

struct ScopeInner {
    active: AtomicBool,
    detached: bool,
    members: Mutex<Vec<ScopeMember>>,
    children: Mutex<Vec<EffectScope>>,
    parent: Option<Weak<ScopeInner>>,
}

/// A disposable group of effects, memos and cleanup callbacks.
#[derive(Clone)]
pub struct EffectScope {
    inner: Arc<ScopeInner>,
}

impl EffectScope {
    /// Create a scope.
    ///
    /// Unless `detached`, the scope becomes a child of the current scope and
    /// is stopped with it.
    pub fn new(detached: bool) -> Self {
        let parent = if detached { None } else { get_current_scope() };
        let scope = Self {
            inner: Arc::new(ScopeInner {
                active: AtomicBool::new(true),
                detached,
                members: Mutex::new(Vec::new()),
                children: Mutex::new(Vec::new()),
                parent: parent.as_ref().map(|parent| Arc::downgrade(&parent.inner)),
            }),
        };

        if let Some(parent) = parent {
            parent.inner.children.lock().push(scope.clone());
        }
        scope
    }

    /// Whether the scope has not been stopped yet.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn is_detached(&self) -> bool {
        self.inner.detached
    }

    /// Run `f` with this scope as the current scope.
    ///
    /// Computations created inside `f` are recorded in this scope. Returns
    /// `None` with a warning when the scope has been stopped.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        if !self.is_active() {
            warn!("cannot run an inactive effect scope");
            return None;
        }
        let _current = ScopeGuard::enter(self.clone());
        Some(f())
    }

    /// Stop every child scope, member computation and cleanup callback.
    pub fn stop(&self) {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return;
        }

        let children = std::mem::take(&mut *self.inner.children.lock());
        for child in children {
            child.stop();
        }

        let members = std::mem::take(&mut *self.inner.members.lock());
        trace!(members = members.len(), "disposing effect scope");
        for member in members {
            match member {
                ScopeMember::Effect(effect) => effect.stop(),
                ScopeMember::Cleanup(cleanup) => cleanup(),
            }
        }

        if let Some(parent) = self.inner.parent.as_ref().and_then(Weak::upgrade) {
            parent
                .children
                .lock()
                .retain(|child| !Arc::ptr_eq(&child.inner, &self.inner));
        }
    }

    /// Number of computations recorded and not yet disposed.
    pub fn effect_count(&self) -> usize {
        self.inner
            .members
            .lock()
            .iter()
            .filter(|member| matches!(member, ScopeMember::Effect(_)))
            .count()
    }

    /// Number of live child scopes.
    pub fn child_count(&self) -> usize {
        self.inner.children.lock().len()
    }

    pub fn ptr_eq(&self, other: &EffectScope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn push(&self, member: ScopeMember) {
        self.inner.members.lock().push(member);
    }
}

impl std::fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectScope")
            .field("active", &self.is_active())
            .field("detached", &self.is_detached())
            .field("effect_count", &self.effect_count())
            .field("child_count", &self.child_count())
            .finish()
    }
}

/// Restores the previously current scope on drop.
struct ScopeGuard {
    previous: Option<EffectScope>,
}

impl ScopeGuard {
    fn enter(scope: EffectScope) -> Self {
        let previous = CURRENT_SCOPE.with(|current| current.borrow_mut().replace(scope));
        Self { previous }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let replaced = CURRENT_SCOPE.with(|current| std::mem::replace(&mut *current.borrow_mut(), previous));
        drop(replaced);
    }
}

/// Create an attached scope.
pub fn effect_scope() -> EffectScope {
    EffectScope::new(false)
}

/// The scope set by the innermost [`EffectScope::run`] on this thread.
pub fn get_current_scope() -> Option<EffectScope> {
    CURRENT_SCOPE.with(|current| current.borrow().clone())
}

/// Register `cleanup` to run when the current scope is stopped.
///
/// Warns and does nothing when no scope is current.
pub fn on_scope_dispose(cleanup: impl FnOnce() + Send + 'static) {
    match get_current_scope() {
        Some(scope) if scope.is_active() => scope.push(ScopeMember::Cleanup(Box::new(cleanup))),
        _ => warn!(
            "on_scope_dispose() is called when there is no active effect scope to be associated with."
        ),
    }
}

/// Record a computation in `scope`, or in the current scope when `None`.
pub(crate) fn record_effect_scope(effect: &Arc<ReactiveEffect>, scope: Option<&EffectScope>) {
    let scope = match scope {
        Some(scope) => Some(scope.clone()),
        None => get_current_scope(),
    };
    if let Some(scope) = scope.filter(EffectScope::is_active) {
        scope.push(ScopeMember::Effect(Arc::clone(effect)));
    }
}

/// Record an existing effect in `scope`.
pub fn record_effect(effect: &Effect, scope: &EffectScope) {
    record_effect_scope(effect.inner(), Some(scope));
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
