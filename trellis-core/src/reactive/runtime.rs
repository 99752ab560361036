//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects reactive objects,
//! effects, computed values and watchers. It owns the dependency bucket,
//! the effect arena, the active-effect stack and the scheduler queues.
//!
//! # How It Works
//!
//! 1. When an effect runs, it first removes itself from every dependency set
//!    it joined on its previous run, then pushes itself onto the stack.
//!
//! 2. Every property read while it is on top of the stack calls `track`,
//!    which adds the effect to the `(target, key)` subscriber set and records
//!    that set on the effect so the next run can leave it again.
//!
//! 3. When a property is written, `trigger` snapshots the subscribers of
//!    `(target, key)` and, for each one other than the running effect:
//!    a. hands it to its scheduler, if it has one
//!    b. otherwise runs it synchronously, in subscription order
//!
//! 4. A subscriber that already re-ran after the snapshot was taken, for
//!    example through a computed value it reads, has seen the write and is
//!    skipped. One write never runs an effect twice.
//!
//! # Ownership
//!
//! Dependency sets hold `EffectId`s, not effects. The arena maps ids back to
//! type-erased runners. Objects and effects keep only a weak reference to the
//! runtime, so closures that capture reactive objects never keep the runtime
//! alive through a cycle.
//!
//! # Threading
//!
//! A runtime is `Send + Sync`, but it models a single cooperative thread of
//! execution: the active-effect stack is shared by everyone holding the
//! runtime. Drive each runtime from one thread at a time. Locks are never
//! held while user code runs, so effects may freely read and write state.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexSet;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tokio::sync::Notify;
use tracing::{debug, trace};

use super::effect::{EffectHandle, Runner, Scheduler};
use super::subscriber::{EffectId, TargetId};
use crate::config::RuntimeConfig;
use crate::scheduler::{JobQueue, MicrotaskQueue};

/// A `(target, key)` pair an effect is subscribed to.
type Dep = (TargetId, Arc<str>);

/// Subscriber sets keep insertion order so direct effects run in the order
/// they subscribed.
type SubscriberSet = IndexSet<EffectId>;

/// An effect as stored in the arena.
pub(crate) struct EffectSlot {
    runner: Runner,
    scheduler: Option<Scheduler>,
    /// Every subscriber set this effect joined during its most recent run.
    deps: SmallVec<[Dep; 4]>,
    /// Number of runs started so far.
    runs: u64,
}

/// Mutable runtime state, guarded by a single lock.
#[derive(Default)]
pub(crate) struct RuntimeState {
    bucket: HashMap<TargetId, HashMap<Arc<str>, SubscriberSet>>,
    effects: HashMap<EffectId, EffectSlot>,
    stack: Vec<EffectId>,
    pub(crate) jobs: JobQueue,
    pub(crate) microtasks: MicrotaskQueue,
}

pub(crate) struct RuntimeInner {
    pub(crate) config: RuntimeConfig,
    pub(crate) state: Mutex<RuntimeState>,
    /// Signalled whenever a microtask is enqueued.
    pub(crate) wakeup: Notify,
}

/// Handle to a reactive runtime.
///
/// Cloning is cheap; all clones share the same bucket, arena and queues.
/// Independent runtimes never see each other's effects.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicI64, Ordering};
/// use trellis_core::Runtime;
///
/// let rt = Runtime::new();
/// let state = rt.reactive([("foo", 1)]);
///
/// let seen = Arc::new(AtomicI64::new(0));
/// let (s, obs) = (state.clone(), seen.clone());
/// rt.effect(move || obs.store(s.get_i64("foo").unwrap_or(0), Ordering::SeqCst));
///
/// state.set("foo", 2);
/// assert_eq!(seen.load(Ordering::SeqCst), 2);
/// ```
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Arc<RuntimeInner>,
}

/// Weak reference to a runtime, held by everything the runtime manages.
#[derive(Clone, Default)]
pub(crate) struct WeakRuntime(Weak<RuntimeInner>);

impl WeakRuntime {
    pub(crate) fn upgrade(&self) -> Option<Runtime> {
        self.0.upgrade().map(|inner| Runtime { inner })
    }
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                state: Mutex::new(RuntimeState::default()),
                wakeup: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub(crate) fn downgrade(&self) -> WeakRuntime {
        WeakRuntime(Arc::downgrade(&self.inner))
    }

    /// Whether two handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------------
    // Dependency bucket
    // ------------------------------------------------------------------------

    /// Record that the active effect depends on `(target, key)`.
    ///
    /// No-op when no effect is running, or when the running effect has been
    /// stopped.
    pub fn track(&self, target: TargetId, key: &str) {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let Some(&active) = state.stack.last() else {
            return;
        };
        let Some(slot) = state.effects.get_mut(&active) else {
            return;
        };

        let key: Arc<str> = Arc::from(key);
        let subscribers = state
            .bucket
            .entry(target)
            .or_default()
            .entry(Arc::clone(&key))
            .or_default();

        if subscribers.insert(active) {
            trace!(effect = %active, %target, key = %key, "tracked");
            slot.deps.push((target, key));
        }
    }

    /// Notify the subscribers of `(target, key)` that it was written.
    ///
    /// The running effect is skipped, so an effect that reads and writes the
    /// same property does not recurse into itself. Panics raised by directly
    /// invoked effects propagate to the caller; remaining subscribers are not
    /// visited in that case.
    pub fn trigger(&self, target: TargetId, key: &str) {
        let pending: Vec<(EffectHandle, Option<Scheduler>, u64)> = {
            let state = self.inner.state.lock();
            let Some(subscribers) = state.bucket.get(&target).and_then(|keys| keys.get(key)) else {
                return;
            };
            let active = state.stack.last().copied();

            subscribers
                .iter()
                .filter(|id| Some(**id) != active)
                .filter_map(|id| {
                    state.effects.get(id).map(|slot| {
                        (
                            EffectHandle::new(*id, Arc::clone(&slot.runner)),
                            slot.scheduler.clone(),
                            slot.runs,
                        )
                    })
                })
                .collect()
        };

        if pending.is_empty() {
            return;
        }
        debug!(%target, key, subscribers = pending.len(), "trigger");

        for (handle, scheduler, runs) in pending {
            // Re-ran (or stopped) since the snapshot
            if self.run_count(handle.id()) != Some(runs) {
                trace!(effect = %handle.id(), %target, key, "already up to date");
                continue;
            }
            match scheduler {
                None => handle.run(),
                Some(Scheduler::Queue) => self.queue_job(handle),
                Some(Scheduler::Custom(schedule)) => schedule(handle),
            }
        }
    }

    /// Remove `effect` from every dependency set it joined, and forget them.
    pub(crate) fn cleanup(&self, effect: EffectId) {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let Some(slot) = state.effects.get_mut(&effect) else {
            return;
        };
        slot.runs += 1;
        for (target, key) in slot.deps.drain(..) {
            if let Some(subscribers) = state
                .bucket
                .get_mut(&target)
                .and_then(|keys| keys.get_mut(&key))
            {
                subscribers.shift_remove(&effect);
            }
        }
    }

    /// Drop every bucket entry for `target`.
    ///
    /// Effects that were subscribed to it simply stop hearing about it; the
    /// stale references in their dependency lists are discarded on their next
    /// run.
    pub(crate) fn forget_target(&self, target: TargetId) {
        let removed = self.inner.state.lock().bucket.remove(&target);
        if removed.is_some() {
            debug!(%target, "dropped bucket entry");
        }
    }

    /// Number of effects subscribed to `(target, key)`.
    pub fn subscriber_count(&self, target: TargetId, key: &str) -> usize {
        self.inner
            .state
            .lock()
            .bucket
            .get(&target)
            .and_then(|keys| keys.get(key))
            .map_or(0, IndexSet::len)
    }

    /// Whether the bucket holds an entry for `target`.
    pub fn is_tracked(&self, target: TargetId) -> bool {
        self.inner.state.lock().bucket.contains_key(&target)
    }

    // ------------------------------------------------------------------------
    // Effect arena
    // ------------------------------------------------------------------------

    pub(crate) fn register_effect(
        &self,
        id: EffectId,
        runner: Runner,
        scheduler: Option<Scheduler>,
    ) {
        self.inner.state.lock().effects.insert(
            id,
            EffectSlot {
                runner,
                scheduler,
                deps: SmallVec::new(),
                runs: 0,
            },
        );
    }

    /// Unsubscribe `effect` everywhere and remove it from the arena.
    ///
    /// Returns `false` if it was already gone.
    pub(crate) fn stop_effect(&self, effect: EffectId) -> bool {
        self.cleanup(effect);
        let slot = self.inner.state.lock().effects.remove(&effect);
        // The slot owns user closures; drop them outside the lock.
        let stopped = slot.is_some();
        drop(slot);

        if stopped {
            debug!(%effect, "effect stopped");
        }
        stopped
    }

    pub(crate) fn is_registered(&self, effect: EffectId) -> bool {
        self.inner.state.lock().effects.contains_key(&effect)
    }

    fn run_count(&self, effect: EffectId) -> Option<u64> {
        self.inner.state.lock().effects.get(&effect).map(|slot| slot.runs)
    }

    pub(crate) fn dependency_count(&self, effect: EffectId) -> usize {
        self.inner
            .state
            .lock()
            .effects
            .get(&effect)
            .map_or(0, |slot| slot.deps.len())
    }

    /// Number of live effects, including those behind computeds and watchers.
    pub fn effect_count(&self) -> usize {
        self.inner.state.lock().effects.len()
    }

    // ------------------------------------------------------------------------
    // Active-effect stack
    // ------------------------------------------------------------------------

    pub(crate) fn push_active(&self, effect: EffectId) {
        self.inner.state.lock().stack.push(effect);
    }

    pub(crate) fn pop_active(&self) -> Option<EffectId> {
        self.inner.state.lock().stack.pop()
    }

    /// The effect currently being tracked, if any.
    pub fn active_effect(&self) -> Option<EffectId> {
        self.inner.state.lock().stack.last().copied()
    }

    /// Current nesting depth of running effects.
    pub fn stack_depth(&self) -> usize {
        self.inner.state.lock().stack.len()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Runtime")
            .field("targets", &state.bucket.len())
            .field("effects", &state.effects.len())
            .field("stack_depth", &state.stack.len())
            .field("queued_jobs", &state.jobs.len())
            .field("microtasks", &state.microtasks.len())
            .finish()
    }
}
