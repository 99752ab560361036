//! Computed Implementation
//!
//! A Computed is a cached derived value that recomputes lazily, only when a
//! dependency has changed since the last read.
//!
//! # How Computed Values Work
//!
//! 1. Creation builds a lazy effect over the getter. Nothing runs yet; the
//!    value starts dirty.
//!
//! 2. On read, a dirty computed runs its effect, caches the result and marks
//!    itself clean. A clean computed returns the cached value without
//!    calling the getter.
//!
//! 3. When a dependency is written, the effect's scheduler only flips the
//!    dirty flag. Recomputation waits for the next read.
//!
//! # Reading From Effects
//!
//! A computed is also a trackable target with a single key, `"value"`.
//! Reading it tracks that key for the running effect, and the clean-to-dirty
//! transition triggers it. An outer effect that reads a computed therefore
//! re-runs when anything upstream changes.

use std::fmt::{self, Debug};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::effect::{Effect, EffectOptions, Scheduler};
use super::runtime::{Runtime, WeakRuntime};
use super::subscriber::{EffectId, TargetId};

/// The single key a computed value is tracked under.
pub const VALUE_KEY: &str = "value";

struct ComputedState<T> {
    /// Cached result (None if never computed).
    value: Option<T>,
    dirty: bool,
}

struct ComputedInner<T> {
    target: TargetId,
    runtime: WeakRuntime,
    effect: Effect<T>,
    state: Arc<Mutex<ComputedState<T>>>,
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.stop_effect(self.effect.id());
            runtime.forget_target(self.target);
        }
    }
}

/// A lazily recomputed, memoized derived value.
///
/// # Example
///
/// ```
/// use trellis_core::Runtime;
///
/// let rt = Runtime::new();
/// let state = rt.reactive([("foo", 1), ("bar", 2)]);
///
/// let s = state.clone();
/// let sum = rt.computed(move || s.get_i64("foo").unwrap_or(0) + s.get_i64("bar").unwrap_or(0));
///
/// assert_eq!(sum.get(), 3);
/// state.set("foo", 2);
/// assert_eq!(sum.get(), 4);
/// ```
pub struct Computed<T> {
    inner: Arc<ComputedInner<T>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + 'static,
{
    /// The identity this computed is tracked under.
    pub fn id(&self) -> TargetId {
        self.inner.target
    }

    /// The effect that evaluates the getter.
    pub fn effect_id(&self) -> EffectId {
        self.inner.effect.id()
    }

    /// Read the value, recomputing first if it is dirty.
    ///
    /// Inside an effect, this subscribes the effect to the computed. A panic
    /// in the getter propagates and leaves the computed dirty.
    pub fn get(&self) -> T {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.track(self.inner.target, VALUE_KEY);
        }

        {
            let state = self.inner.state.lock();
            if !state.dirty {
                if let Some(value) = &state.value {
                    return value.clone();
                }
            }
        }

        trace!(target = %self.inner.target, "recomputing");
        // The lock is released while the getter runs; it may read other
        // computed values or trigger writes.
        let value = self.inner.effect.run();

        let mut state = self.inner.state.lock();
        state.value = Some(value.clone());
        state.dirty = false;
        value
    }

    /// Whether the next read will call the getter.
    pub fn is_dirty(&self) -> bool {
        self.inner.state.lock().dirty
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The value's own Debug may read this computed; format unlocked.
        let (dirty, value) = {
            let state = self.inner.state.lock();
            (state.dirty, state.value.clone())
        };
        f.debug_struct("Computed")
            .field("id", &self.inner.target)
            .field("dirty", &dirty)
            .field("value", &value)
            .finish()
    }
}

impl Runtime {
    /// Create a computed value over `getter`.
    ///
    /// The getter does not run until the first read.
    pub fn computed<T, F>(&self, getter: F) -> Computed<T>
    where
        T: Clone + Send + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let target = TargetId::new();
        let state = Arc::new(Mutex::new(ComputedState {
            value: None,
            dirty: true,
        }));

        let scheduler = {
            let state = Arc::clone(&state);
            let runtime = self.downgrade();
            Scheduler::custom(move |_effect| {
                let became_dirty = {
                    let mut state = state.lock();
                    !std::mem::replace(&mut state.dirty, true)
                };
                if became_dirty {
                    if let Some(runtime) = runtime.upgrade() {
                        runtime.trigger(target, VALUE_KEY);
                    }
                }
            })
        };

        let effect = self.effect_with(getter, EffectOptions::default().lazy().scheduler(scheduler));

        Computed {
            inner: Arc::new(ComputedInner {
                target,
                runtime: self.downgrade(),
                effect,
                state,
            }),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
