//! Effect Implementation
//!
//! An Effect is a re-runnable computation that is re-executed whenever a
//! property it read on its most recent run is written.
//!
//! # How Effects Work
//!
//! Each run of an effect:
//!
//! 1. Removes the effect from every dependency set recorded on its previous
//!    run. Conditional reads (`if a { x.p } else { x.q }`) therefore never
//!    leave it subscribed to a branch it no longer takes.
//!
//! 2. Pushes the effect onto the active-effect stack, so nested effects each
//!    track their own reads.
//!
//! 3. Runs the function; every tracked read subscribes this effect.
//!
//! 4. Pops the stack, restoring the previous tracking target.
//!
//! 5. Returns the function's result, so lazy callers (computed values,
//!    watchers) can use it.
//!
//! Cleanup in step 1 is committed before the function runs. If the function
//! panics the panic propagates to the caller and the effect is left with
//! whatever it tracked before the panic.
//!
//! # Options
//!
//! - `lazy`: do not run on creation; the caller triggers the first run.
//! - `scheduler`: when a dependency is written, hand the effect to the
//!   scheduler instead of running it directly.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use super::context::ActiveEffectGuard;
use super::runtime::{Runtime, WeakRuntime};
use super::subscriber::EffectId;

/// Type-erased body of an effect, as stored in the arena.
pub(crate) type Runner = Arc<dyn Fn() + Send + Sync>;

/// Where a triggered effect goes instead of running directly.
#[derive(Clone)]
pub enum Scheduler {
    /// The runtime's deduplicating job queue, flushed at the next checkpoint.
    Queue,

    /// Arbitrary host code deciding when and how to run the effect.
    Custom(Arc<dyn Fn(EffectHandle) + Send + Sync>),
}

impl Scheduler {
    pub fn custom<F>(schedule: F) -> Self
    where
        F: Fn(EffectHandle) + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(schedule))
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue => f.write_str("Queue"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Options accepted by [`Runtime::effect_with`].
#[derive(Debug, Clone, Default)]
pub struct EffectOptions {
    /// Skip the initial run.
    pub lazy: bool,

    /// Receives the effect when a dependency is written.
    pub scheduler: Option<Scheduler>,
}

impl EffectOptions {
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Batch re-runs through the runtime's job queue.
    pub fn queued(self) -> Self {
        self.scheduler(Scheduler::Queue)
    }
}

/// Type-erased view of an effect, as passed to schedulers and queued jobs.
#[derive(Clone)]
pub struct EffectHandle {
    id: EffectId,
    runner: Runner,
}

impl EffectHandle {
    pub(crate) fn new(id: EffectId, runner: Runner) -> Self {
        Self { id, runner }
    }

    pub fn id(&self) -> EffectId {
        self.id
    }

    /// Run the effect, discarding its result.
    pub fn run(&self) {
        (self.runner)();
    }
}

impl fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectHandle").field("id", &self.id).finish()
    }
}

/// A re-runnable computation with automatic dependency tracking.
///
/// The runtime keeps the effect alive; dropping this handle does not stop
/// it. Call [`Effect::stop`] to unsubscribe it for good.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use trellis_core::Runtime;
///
/// let rt = Runtime::new();
/// let state = rt.reactive([("foo", 1)]);
/// let runs = Arc::new(AtomicUsize::new(0));
///
/// let (s, r) = (state.clone(), runs.clone());
/// rt.effect(move || {
///     s.get("foo");
///     r.fetch_add(1, Ordering::SeqCst);
/// });
///
/// state.update("foo", |v| v.and_then(|v| v.as_i64()).unwrap_or(0).saturating_add(1).into());
/// assert_eq!(runs.load(Ordering::SeqCst), 2);
/// ```
pub struct Effect<T> {
    id: EffectId,
    runtime: WeakRuntime,
    func: Arc<dyn Fn() -> T + Send + Sync>,
}

impl<T> Effect<T> {
    pub fn id(&self) -> EffectId {
        self.id
    }
}

impl<T: 'static> Effect<T> {
    /// Run the effect, re-deriving its dependencies, and return the result.
    ///
    /// A stopped effect, or one whose runtime is gone, still runs its
    /// function but tracks nothing.
    pub fn run(&self) -> T {
        let Some(runtime) = self.runtime.upgrade() else {
            return (self.func)();
        };

        runtime.cleanup(self.id);
        trace!(effect = %self.id, depth = runtime.stack_depth(), "running effect");

        let _active = ActiveEffectGuard::enter(&runtime, self.id);
        (self.func)()
    }

    /// Type-erased handle that runs this effect.
    pub fn handle(&self) -> EffectHandle {
        let effect = self.clone();
        EffectHandle::new(self.id, Arc::new(move || {
            effect.run();
        }))
    }

    /// Unsubscribe the effect from everything and release it.
    ///
    /// Returns `false` if it was already stopped.
    pub fn stop(&self) -> bool {
        self.runtime
            .upgrade()
            .is_some_and(|runtime| runtime.stop_effect(self.id))
    }

    /// Whether the effect is still registered with a live runtime.
    pub fn is_active(&self) -> bool {
        self.runtime
            .upgrade()
            .is_some_and(|runtime| runtime.is_registered(self.id))
    }

    /// Number of `(target, key)` pairs read on the most recent run.
    pub fn dependency_count(&self) -> usize {
        self.runtime
            .upgrade()
            .map_or(0, |runtime| runtime.dependency_count(self.id))
    }
}

impl<T> Clone for Effect<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            runtime: self.runtime.clone(),
            func: Arc::clone(&self.func),
        }
    }
}

impl<T: 'static> fmt::Debug for Effect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

impl Runtime {
    /// Create an effect and run it immediately.
    pub fn effect<T, F>(&self, f: F) -> Effect<T>
    where
        T: 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.effect_with(f, EffectOptions::default())
    }

    /// Create an effect with explicit options.
    pub fn effect_with<T, F>(&self, f: F, options: EffectOptions) -> Effect<T>
    where
        T: 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let effect = Effect {
            id: EffectId::new(),
            runtime: self.downgrade(),
            func: Arc::new(f),
        };

        let runner: Runner = {
            let effect = effect.clone();
            Arc::new(move || {
                effect.run();
            })
        };
        self.register_effect(effect.id, runner, options.scheduler);

        if !options.lazy {
            effect.run();
        }
        effect
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Value;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn effect_runs_on_creation() {
        let runtime = Runtime::new();
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let _effect = runtime.effect(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        // Effect should have run once on creation
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn effect_lazy_does_not_run_on_creation() {
        let runtime = Runtime::new();
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let effect = runtime.effect_with(
            move || run_count_clone.fetch_add(1, Ordering::SeqCst) + 1,
            EffectOptions::default().lazy(),
        );

        assert_eq!(run_count.load(Ordering::SeqCst), 0);

        // Manually run; the result is returned to the caller
        assert_eq!(effect.run(), 1);
        assert_eq!(effect.run(), 2);
    }

    #[test]
    fn effect_reruns_when_dependency_written() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("foo", 1)]);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (s, log) = (state.clone(), seen.clone());
        runtime.effect(move || {
            log.lock().push(s.get_i64("foo"));
        });

        state.set("foo", 2);
        assert_eq!(*seen.lock(), vec![Some(1), Some(2)]);
    }

    #[test]
    fn branch_switch_drops_stale_dependency() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("ok", Value::from(true)), ("text", Value::from("hello"))]);
        let run_count = Arc::new(AtomicI32::new(0));

        let (s, runs) = (state.clone(), run_count.clone());
        let effect = runtime.effect(move || {
            runs.fetch_add(1, Ordering::SeqCst);
            if s.get_bool("ok").unwrap_or(false) {
                s.get("text");
            }
        });
        assert_eq!(effect.dependency_count(), 2);

        state.set("ok", false);
        assert_eq!(run_count.load(Ordering::SeqCst), 2);
        assert_eq!(effect.dependency_count(), 1);

        // No longer read, so no re-run
        state.set("text", "world");
        assert_eq!(run_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn self_write_does_not_recurse() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("foo", 1)]);
        let run_count = Arc::new(AtomicI32::new(0));

        let (s, runs) = (state.clone(), run_count.clone());
        runtime.effect(move || {
            runs.fetch_add(1, Ordering::SeqCst);
            let next = s.get_i64("foo").unwrap_or(0) + 1;
            s.set("foo", next);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(state.get_i64("foo"), Some(2));
    }

    #[test]
    fn custom_scheduler_receives_effect() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("foo", 1)]);
        let parked: Arc<Mutex<Vec<EffectHandle>>> = Arc::new(Mutex::new(Vec::new()));
        let run_count = Arc::new(AtomicI32::new(0));

        let (s, runs, sink) = (state.clone(), run_count.clone(), parked.clone());
        let effect = runtime.effect_with(
            move || {
                s.get("foo");
                runs.fetch_add(1, Ordering::SeqCst);
            },
            EffectOptions::default().scheduler(Scheduler::custom(move |handle| {
                sink.lock().push(handle);
            })),
        );

        state.set("foo", 2);
        assert_eq!(run_count.load(Ordering::SeqCst), 1);

        let handles: Vec<_> = std::mem::take(&mut *parked.lock());
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].id(), effect.id());

        handles[0].run();
        assert_eq!(run_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stopped_effect_no_longer_tracks() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("foo", 1)]);
        let run_count = Arc::new(AtomicI32::new(0));

        let (s, runs) = (state.clone(), run_count.clone());
        let effect = runtime.effect(move || {
            s.get("foo");
            runs.fetch_add(1, Ordering::SeqCst);
        });

        assert!(effect.stop());
        assert!(!effect.is_active());
        assert!(!effect.stop());
        assert_eq!(runtime.subscriber_count(state.id(), "foo"), 0);

        state.set("foo", 2);
        assert_eq!(run_count.load(Ordering::SeqCst), 1);

        // Explicit runs still execute, untracked
        effect.run();
        assert_eq!(run_count.load(Ordering::SeqCst), 2);
        assert_eq!(runtime.subscriber_count(state.id(), "foo"), 0);
    }

    #[test]
    fn panicking_effect_propagates_and_restores_stack() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("foo", 1)]);

        let s = state.clone();
        runtime.effect(move || {
            if s.get_i64("foo") == Some(2) {
                panic!("foo must not be 2");
            }
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            state.set("foo", 2);
        }));

        assert!(result.is_err());
        assert_eq!(runtime.stack_depth(), 0);
    }

    #[test]
    fn effect_clone_shares_identity() {
        let runtime = Runtime::new();
        let effect1 = runtime.effect(|| {});
        let effect2 = effect1.clone();

        assert_eq!(effect1.id(), effect2.id());

        effect1.stop();
        assert!(!effect2.is_active());
    }

    #[test]
    fn effect_outlives_runtime() {
        let runtime = Runtime::new();
        let effect = runtime.effect_with(|| 7, EffectOptions::default().lazy());
        drop(runtime);

        assert!(!effect.is_active());
        assert_eq!(effect.run(), 7);
    }
}
