//! Reactive Context
//!
//! The reactive context tracks which computation is currently running and
//! whether reads should be recorded at all. When a reactive slot is read, we
//! register the current computation as a dependent, unless tracking has been
//! paused.
//!
//! # Implementation
//!
//! Two thread-local stacks hold the state:
//!
//! - the *active stack*: computations push themselves when they start running
//!   and pop when they finish, so nested computations (an effect created
//!   inside another effect, a memo read from an effect) see the innermost one;
//! - the *tracking stack*: [`pause_tracking`] and [`enable_tracking`] push a
//!   frame and the returned guard pops it. Entering a computation pushes an
//!   enabled frame so that a computation started from an untracked block still
//!   records its own reads.
//!
//! Every push is paired with a guard whose `Drop` pops, so the previous frame
//! is restored on every exit path, including unwinding out of a panicking
//! user function.
//!
//! A process-wide epoch counter is bumped each time a computation starts a
//! run. Trigger passes use it to recognise computations that already re-ran
//! after the write that started the pass.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::effect::ReactiveEffect;
use super::SubscriberId;

thread_local! {
    /// The stack of running computations on this thread.
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = RefCell::new(Vec::new());

    /// Nested pause/enable frames. An empty stack means tracking is enabled.
    static TRACK_STACK: RefCell<Vec<bool>> = RefCell::new(Vec::new());
}

/// Global run epoch.
static EPOCH: AtomicU64 = AtomicU64::new(0);

/// An entry in the reactive context stack.
struct ContextEntry {
    effect: Arc<ReactiveEffect>,
}

/// Guard that pops the context when dropped.
///
/// This ensures the context stack is properly maintained even if
/// the computation panics.
pub struct ReactiveContext {
    subscriber_id: SubscriberId,
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given computation.
    ///
    /// While this context is active, tracked reads register the computation
    /// as a dependent. The context is exited when the guard is dropped.
    pub(crate) fn enter(effect: Arc<ReactiveEffect>) -> Self {
        let subscriber_id = effect.id();
        let depth = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(ContextEntry { effect });
            stack.len()
        });
        TRACK_STACK.with(|stack| stack.borrow_mut().push(true));

        Self {
            subscriber_id,
            depth,
            _not_send: PhantomData,
        }
    }

    /// Check if there is a running computation on this thread.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Get the innermost running computation's ID, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().map(|entry| entry.effect.id()))
    }

    /// Whether reads are currently recorded.
    pub fn should_track() -> bool {
        TRACK_STACK.with(|stack| stack.borrow().last().copied().unwrap_or(true))
    }

    /// Whether a read right now would create a dependency.
    pub fn is_tracking() -> bool {
        Self::should_track() && Self::is_active()
    }

    /// The computation a read should subscribe, if tracking is enabled.
    pub(crate) fn tracking_effect() -> Option<Arc<ReactiveEffect>> {
        if !Self::should_track() {
            return None;
        }
        CONTEXT_STACK.with(|stack| stack.borrow().last().map(|entry| Arc::clone(&entry.effect)))
    }

    /// Whether `id` is the innermost running computation.
    pub(crate) fn is_running(id: SubscriberId) -> bool {
        Self::current_subscriber() == Some(id)
    }

    /// Whether `id` is anywhere on the running stack.
    pub(crate) fn contains(id: SubscriberId) -> bool {
        CONTEXT_STACK.with(|stack| stack.borrow().iter().any(|entry| entry.effect.id() == id))
    }

    /// Current value of the global epoch.
    pub fn epoch() -> u64 {
        EPOCH.load(Ordering::SeqCst)
    }

    /// Advance the global epoch and return the new value.
    pub(crate) fn next_epoch() -> u64 {
        EPOCH.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Depth of the running stack, for diagnostics.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        TRACK_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });

        let popped = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(
                stack.len(),
                self.depth,
                "ReactiveContext dropped out of order"
            );
            stack.pop()
        });

        // Verify we're popping the right context.
        // This helps catch bugs where contexts are mismatched.
        if let Some(entry) = popped {
            debug_assert_eq!(
                entry.effect.id(),
                self.subscriber_id,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.subscriber_id,
                entry.effect.id()
            );
        }
    }
}

/// Guard returned by [`pause_tracking`] and [`enable_tracking`].
///
/// Dropping it restores the previous tracking state.
#[must_use = "tracking is restored as soon as the guard is dropped"]
pub struct TrackingGuard {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

fn push_tracking(enabled: bool) -> TrackingGuard {
    let depth = TRACK_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        stack.push(enabled);
        stack.len()
    });
    TrackingGuard {
        depth,
        _not_send: PhantomData,
    }
}

/// Stop recording reads until the guard is dropped.
pub fn pause_tracking() -> TrackingGuard {
    push_tracking(false)
}

/// Record reads again, even inside a paused block, until the guard is dropped.
pub fn enable_tracking() -> TrackingGuard {
    push_tracking(true)
}

impl Drop for TrackingGuard {
    fn drop(&mut self) {
        TRACK_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(stack.len(), self.depth, "TrackingGuard dropped out of order");
            stack.pop();
        });
    }
}

/// Run `f` without recording any reads.
pub fn untracked<T>(f: impl FnOnce() -> T) -> T {
    let _paused = pause_tracking();
    f()
}
