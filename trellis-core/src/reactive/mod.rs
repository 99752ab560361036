//! Reactive Primitives
//!
//! This module implements the core reactive system: reactive objects,
//! effects, computed values and watchers, all coordinated by a [`Runtime`].
//!
//! # Concepts
//!
//! ## Reactive Objects
//!
//! A reactive object is a string-keyed record of [`Value`]s. Reading a
//! property inside a running effect records a dependency on that
//! `(object, key)` pair; writing the property re-runs every effect that
//! depends on it.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that re-runs whenever its
//! dependencies change. Before every run it drops the dependencies of the
//! previous run, so conditional branches that are no longer taken stop
//! triggering it. An effect may carry a scheduler that decides how a
//! re-run happens instead of running it inline.
//!
//! ## Computed
//!
//! A Computed is a derived value that caches its result and recomputes
//! lazily, only when read after a dependency changed.
//!
//! ## Watchers
//!
//! A watcher calls back with the new and previous value of a getter, or
//! of a whole object graph, when it changes.
//!
//! # Implementation Notes
//!
//! Dependency tracking uses an explicit active-effect stack owned by the
//! runtime rather than a thread-local, so several runtimes can coexist and
//! nested effects restore the outer effect when they finish.

mod subscriber;
mod context;
mod runtime;
mod value;
mod object;
mod effect;
mod computed;
mod watch;

pub use subscriber::{EffectId, TargetId};
pub use runtime::Runtime;
pub use value::Value;
pub use object::ReactiveObject;
pub use effect::{Effect, EffectHandle, EffectOptions, Scheduler};
pub use computed::{Computed, VALUE_KEY};
pub use watch::{traverse, Flush, WatchOptions, Watcher};
