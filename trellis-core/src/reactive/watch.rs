//! Watchers
//!
//! A watcher calls back with `(new, old)` whenever the value it observes
//! changes. It is a lazy effect over a getter, plus a scheduler that decides
//! when the callback runs:
//!
//! - [`Flush::Sync`]: inside the write that triggered it.
//! - [`Flush::Pre`]: through the runtime's job queue, so a burst of writes
//!   produces one callback at the next checkpoint.
//! - [`Flush::Post`]: one deferred microtask per trigger, run at the next
//!   checkpoint after the current burst of writes.
//!
//! Object sources are watched deeply: the getter walks every reachable
//! property so that any nested write re-runs it.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::Deserialize;

use super::effect::{Effect, EffectHandle, EffectOptions, Scheduler};
use super::object::ReactiveObject;
use super::runtime::Runtime;
use super::subscriber::{EffectId, TargetId};
use super::value::Value;

/// When a watcher's callback runs relative to the triggering write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flush {
    #[default]
    Sync,
    Pre,
    Post,
}

/// Options accepted by [`Runtime::watch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Call back once right away, with no old value.
    pub immediate: bool,
    pub flush: Flush,
}

impl WatchOptions {
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn flush(mut self, flush: Flush) -> Self {
        self.flush = flush;
        self
    }
}

type Callback<T> = Box<dyn Fn(T, Option<T>) + Send + Sync>;

/// Re-evaluates the getter and reports the change.
struct WatchJob<T> {
    effect: OnceLock<Effect<T>>,
    old: Mutex<Option<T>>,
    callback: Callback<T>,
}

impl<T> WatchJob<T>
where
    T: Clone + Send + 'static,
{
    fn run(&self) {
        let Some(effect) = self.effect.get() else {
            return;
        };

        let new = effect.run();
        let old = self.old.lock().clone();
        (self.callback)(new.clone(), old);
        *self.old.lock() = Some(new);
    }
}

/// Handle to a running watcher.
///
/// Dropping the handle does not stop the watcher; call [`Watcher::stop`].
pub struct Watcher<T> {
    effect: Effect<T>,
    job: Arc<WatchJob<T>>,
}

impl<T> Watcher<T>
where
    T: Clone + Send + 'static,
{
    pub fn effect_id(&self) -> EffectId {
        self.effect.id()
    }

    /// The value passed as `new` to the most recent callback, or the
    /// baseline captured at creation.
    pub fn last_value(&self) -> Option<T> {
        self.job.old.lock().clone()
    }

    /// Stop watching. Already deferred callbacks still run.
    pub fn stop(&self) -> bool {
        self.effect.stop()
    }

    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }
}

impl<T> fmt::Debug for Watcher<T>
where
    T: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("effect", &self.effect.id())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Read every property reachable from `value`, so that the running effect
/// depends on all of them. Each object is visited once.
pub fn traverse(value: &Value) {
    traverse_inner(value, &mut HashSet::new());
}

fn traverse_inner(value: &Value, seen: &mut HashSet<TargetId>) {
    match value {
        Value::Object(obj) => {
            if !seen.insert(obj.id()) {
                return;
            }
            for key in obj.keys() {
                if let Some(child) = obj.get(&key) {
                    traverse_inner(&child, seen);
                }
            }
        }
        Value::List(items) => {
            for item in items {
                traverse_inner(item, seen);
            }
        }
        _ => {}
    }
}

impl Runtime {
    /// Watch the value returned by `getter`.
    ///
    /// Only what the getter reads is tracked. Unless `immediate` is set, the
    /// getter runs once now to capture the baseline and the callback first
    /// fires on the next change.
    pub fn watch<T, G, C>(&self, getter: G, callback: C, options: WatchOptions) -> Watcher<T>
    where
        T: Clone + Send + 'static,
        G: Fn() -> T + Send + Sync + 'static,
        C: Fn(T, Option<T>) + Send + Sync + 'static,
    {
        let job = Arc::new(WatchJob {
            effect: OnceLock::new(),
            old: Mutex::new(None),
            callback: Box::new(callback),
        });

        let scheduler = {
            let job = Arc::clone(&job);
            let runtime = self.downgrade();
            let flush = options.flush;
            Scheduler::custom(move |effect: EffectHandle| match flush {
                Flush::Sync => job.run(),
                Flush::Pre => {
                    if let Some(runtime) = runtime.upgrade() {
                        let job = Arc::clone(&job);
                        let runner = Arc::new(move || job.run());
                        runtime.queue_job(EffectHandle::new(effect.id(), runner));
                    }
                }
                Flush::Post => {
                    if let Some(runtime) = runtime.upgrade() {
                        let job = Arc::clone(&job);
                        runtime.defer_for(Some(effect.id()), move || job.run());
                    }
                }
            })
        };

        let effect = self.effect_with(
            getter,
            EffectOptions::default().lazy().scheduler(scheduler),
        );
        // Freshly created, so the cell is empty.
        let _ = job.effect.set(effect.clone());

        if options.immediate {
            job.run();
        } else {
            let baseline = effect.run();
            *job.old.lock() = Some(baseline);
        }

        Watcher { effect, job }
    }

    /// Watch every property reachable from `object`.
    ///
    /// The callback receives the object itself as both `new` and `old`.
    pub fn watch_object<C>(
        &self,
        object: &ReactiveObject,
        callback: C,
        options: WatchOptions,
    ) -> Watcher<ReactiveObject>
    where
        C: Fn(ReactiveObject, Option<ReactiveObject>) + Send + Sync + 'static,
    {
        let object = object.clone();
        self.watch(
            move || {
                traverse(&Value::Object(object.clone()));
                object.clone()
            },
            callback,
            options,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    type Log = Arc<Mutex<Vec<(i64, Option<i64>)>>>;

    fn recorder() -> (Log, impl Fn(i64, Option<i64>) + Send + Sync + 'static) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |new, old| sink.lock().push((new, old)))
    }

    #[test]
    fn sync_watch_reports_new_and_old() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("bar", 2)]);
        let (log, callback) = recorder();

        let s = state.clone();
        let watcher = runtime.watch(
            move || s.get_i64("bar").unwrap_or(0),
            callback,
            WatchOptions::default(),
        );
        assert!(log.lock().is_empty());
        assert_eq!(watcher.last_value(), Some(2));

        state.set("bar", 3);
        state.set("bar", 4);
        assert_eq!(*log.lock(), vec![(3, Some(2)), (4, Some(3))]);
        assert_eq!(watcher.last_value(), Some(4));
    }

    #[test]
    fn immediate_watch_fires_at_creation() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("bar", 2)]);
        let (log, callback) = recorder();

        let s = state.clone();
        runtime.watch(
            move || s.get_i64("bar").unwrap_or(0),
            callback,
            WatchOptions::default().immediate(),
        );
        assert_eq!(*log.lock(), vec![(2, None)]);

        state.set("bar", 3);
        assert_eq!(*log.lock(), vec![(2, None), (3, Some(2))]);
    }

    #[test]
    fn getter_watch_ignores_unread_properties() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("foo", 1), ("bar", 2)]);
        let (log, callback) = recorder();

        let s = state.clone();
        runtime.watch(move || s.get_i64("bar").unwrap_or(0), callback, WatchOptions::default());

        state.set("foo", 10);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn post_watch_waits_for_checkpoint() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("bar", 2)]);
        let (log, callback) = recorder();

        let s = state.clone();
        runtime.watch(
            move || s.get_i64("bar").unwrap_or(0),
            callback,
            WatchOptions::default().flush(Flush::Post),
        );

        state.set("bar", 3);
        assert!(log.lock().is_empty());

        assert_eq!(runtime.flush().unwrap(), 1);
        assert_eq!(*log.lock(), vec![(3, Some(2))]);
    }

    #[test]
    fn pre_watch_coalesces_a_burst() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("bar", 2)]);
        let (log, callback) = recorder();

        let s = state.clone();
        runtime.watch(
            move || s.get_i64("bar").unwrap_or(0),
            callback,
            WatchOptions::default().flush(Flush::Pre),
        );

        state.set("bar", 3);
        state.set("bar", 4);
        assert!(log.lock().is_empty());

        runtime.flush().unwrap();
        assert_eq!(*log.lock(), vec![(4, Some(2))]);
    }

    #[test]
    fn object_watch_is_deep() {
        let runtime = Runtime::new();
        let state = runtime
            .reactive_from_json(serde_json::json!({ "foo": 1, "nested": { "bar": 2 } }))
            .unwrap();
        let calls = Arc::new(AtomicI32::new(0));

        let c = calls.clone();
        let watched = state.clone();
        runtime.watch_object(
            &state,
            move |new, old| {
                assert!(new.ptr_eq(&watched));
                assert!(old.is_some_and(|old| old.ptr_eq(&watched)));
                c.fetch_add(1, Ordering::SeqCst);
            },
            WatchOptions::default(),
        );

        state.set("foo", 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let nested = state
            .get_untracked("nested")
            .and_then(|v| v.as_object().cloned())
            .unwrap();
        nested.set("bar", 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn traverse_survives_cycles() {
        let runtime = Runtime::new();
        let obj = runtime.reactive([("n", 1)]);
        obj.set("me", obj.clone());

        let o = obj.clone();
        let effect = runtime.effect(move || traverse(&Value::Object(o.clone())));
        assert_eq!(effect.dependency_count(), 2);

        effect.stop();
        obj.remove("me");
    }

    #[test]
    fn stopped_watcher_is_silent() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("bar", 2)]);
        let (log, callback) = recorder();

        let s = state.clone();
        let watcher = runtime.watch(
            move || s.get_i64("bar").unwrap_or(0),
            callback,
            WatchOptions::default(),
        );
        assert!(watcher.stop());
        assert!(!watcher.is_active());

        state.set("bar", 3);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn getter_runs_under_watcher_effect() {
        let runtime = Runtime::new();
        let observed = Arc::new(Mutex::new(Vec::new()));

        let (rt, obs) = (runtime.downgrade(), observed.clone());
        let watcher = runtime.watch(
            move || obs.lock().push(rt.upgrade().and_then(|rt| rt.active_effect())),
            |_, _| {},
            WatchOptions::default(),
        );

        assert_eq!(*observed.lock(), vec![Some(watcher.effect_id())]);
    }

    #[test]
    fn options_deserialize_from_lowercase() {
        let options: WatchOptions =
            serde_json::from_str(r#"{ "flush": "post" }"#).unwrap();
        assert_eq!(options, WatchOptions::default().flush(Flush::Post));
    }
}
