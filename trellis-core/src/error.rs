//! Error types for the reactive runtime.
//!
//! User code running inside an effect body is never wrapped: a panic raised
//! by a directly invoked effect unwinds to whoever invoked it (an explicit
//! `run()`, a `Computed::get()`, or the `set()` that triggered it). Errors
//! here cover the runtime's own operations: checkpoint flushes, JSON
//! conversion, and configuration.

use std::fmt;

use thiserror::Error;

use crate::reactive::{EffectId, TargetId};

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors surfaced by the reactive runtime.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// One or more tasks panicked during a checkpoint flush.
    ///
    /// Every other task in the same flush still ran.
    #[error("{} task(s) failed during flush: {}", .0.len(), summarize(.0))]
    TasksFailed(Vec<TaskFailure>),

    /// Jobs kept re-queueing each other past the configured round limit.
    #[error("job queue did not settle after {rounds} flush rounds")]
    FlushLimitExceeded { rounds: usize },

    /// A single checkpoint ran more microtasks than allowed.
    #[error("checkpoint exceeded {limit} microtasks")]
    MicrotaskLimitExceeded { limit: usize },

    /// A reactive object can only be built from a JSON object.
    #[error("expected a JSON object, found {found}")]
    NotAnObject { found: &'static str },

    /// Snapshotting found an object that contains itself.
    #[error("value graph contains a cycle through object {0}")]
    CyclicValue(TargetId),

    /// The runtime configuration could not be parsed.
    #[error("invalid runtime configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// A task that panicked while the scheduler was flushing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// The effect the task belonged to, if it was a queued job.
    pub effect: Option<EffectId>,
    /// The panic payload, rendered as text.
    pub message: String,
}

impl TaskFailure {
    pub(crate) fn from_panic(
        effect: Option<EffectId>,
        payload: &(dyn std::any::Any + Send),
    ) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { effect, message }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.effect {
            Some(id) => write!(f, "effect {}: {}", id, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

fn summarize(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
