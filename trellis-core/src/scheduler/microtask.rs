//! Microtask Queue
//!
//! The asynchronous checkpoint is modelled as a FIFO of deferred tasks that
//! the host drains with [`Runtime::flush`](crate::reactive::Runtime::flush).
//! Tasks enqueued while draining run in the same checkpoint, after everything
//! that was already queued.

use std::collections::VecDeque;

use crate::reactive::EffectId;

pub(crate) enum Microtask {
    /// Run every job in the job queue.
    FlushJobs,

    /// Run an arbitrary deferred closure.
    Run {
        effect: Option<EffectId>,
        task: Box<dyn FnOnce() + Send>,
    },
}

#[derive(Default)]
pub(crate) struct MicrotaskQueue {
    tasks: VecDeque<Microtask>,
}

impl MicrotaskQueue {
    pub(crate) fn push(&mut self, task: Microtask) {
        self.tasks.push_back(task);
    }

    pub(crate) fn pop(&mut self) -> Option<Microtask> {
        self.tasks.pop_front()
    }

    /// Remove every pending task, handing them back so the caller can drop
    /// them outside any lock.
    pub(crate) fn take_all(&mut self) -> VecDeque<Microtask> {
        std::mem::take(&mut self.tasks)
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
