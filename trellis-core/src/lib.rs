//! Trellis Core
//!
//! This crate provides a fine-grained reactivity runtime. It implements:
//!
//! - Reactive objects with per-property dependency tracking
//! - Effects with dynamic dependency re-collection and nesting
//! - Pluggable schedulers and a deduplicating job queue
//! - Lazily recomputed, cached computed values
//! - Watchers with immediate and deferred callbacks
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Reactive primitives and dependency tracking
//! - `scheduler`: Job queue, microtask queue and checkpoints
//! - `config`: Runtime limits
//! - `error`: Error types shared by the crate
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicI64, Ordering};
//! use trellis_core::Runtime;
//!
//! let rt = Runtime::new();
//!
//! // Create reactive state
//! let state = rt.reactive([("count", 0)]);
//!
//! // Create a derived value
//! let s = state.clone();
//! let doubled = rt.computed(move || s.get_i64("count").unwrap_or(0) * 2);
//!
//! // Create an effect
//! let seen = Arc::new(AtomicI64::new(-1));
//! let (d, obs) = (doubled.clone(), seen.clone());
//! rt.effect(move || obs.store(d.get(), Ordering::SeqCst));
//!
//! // Update the state; the effect re-runs synchronously
//! state.set("count", 5);
//! assert_eq!(seen.load(Ordering::SeqCst), 10);
//! ```

pub mod config;
pub mod error;
pub mod reactive;
pub mod scheduler;

pub use config::RuntimeConfig;
pub use error::{ReactiveError, Result, TaskFailure};
pub use reactive::{
    Computed, Effect, EffectHandle, EffectId, EffectOptions, Flush, ReactiveObject, Runtime,
    Scheduler, TargetId, Value, WatchOptions, Watcher,
};
