//! Update Scheduler
//!
//! The scheduler decides when queued work actually runs. It has two parts:
//!
//! - the **job queue**, a deduplicating set of effects that want to re-run;
//! - the **microtask queue**, a FIFO of deferred tasks drained at the next
//!   checkpoint.
//!
//! # Algorithm
//!
//! 1. `queue_job` inserts an effect into the job queue. If no flush is
//!    scheduled yet it marks one scheduled and enqueues a single
//!    "flush jobs" microtask; otherwise it only inserts.
//!
//! 2. The host reaches a checkpoint by calling [`Runtime::flush`] (or one of
//!    the async helpers). Microtasks run in FIFO order.
//!
//! 3. The "flush jobs" microtask runs every queued job in first-insertion
//!    order. Jobs queued while it runs are picked up in another round of the
//!    same flush, up to `max_flush_rounds`.
//!
//! 4. The "flush scheduled" flag is cleared when the flush ends, on every
//!    exit path, so one failing job can never wedge the queue.
//!
//! Each job and microtask runs under `catch_unwind`. A panic is logged and
//! recorded; its siblings still run; the checkpoint then reports every
//! failure at once.

mod job;
mod microtask;

pub(crate) use job::JobQueue;
pub(crate) use microtask::{Microtask, MicrotaskQueue};

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, error};

use crate::error::{ReactiveError, Result, TaskFailure};
use crate::reactive::{EffectHandle, EffectId, Runtime};

/// Clears the "flush scheduled" flag when dropped.
struct FlushRelease<'a> {
    runtime: &'a Runtime,
}

impl Drop for FlushRelease<'_> {
    fn drop(&mut self) {
        self.runtime.inner.state.lock().jobs.release();
    }
}

impl Runtime {
    /// Queue an effect to run at the next checkpoint.
    ///
    /// Queueing the same effect again before the flush is a no-op, and at
    /// most one flush is ever scheduled. This is what
    /// [`Scheduler::Queue`](crate::reactive::Scheduler::Queue) calls.
    pub fn queue_job(&self, job: EffectHandle) {
        let needs_flush = self.inner.state.lock().jobs.push(job);
        if needs_flush {
            debug!("flush scheduled");
            self.enqueue_microtask(Microtask::FlushJobs);
        }
    }

    /// Run `task` at the next checkpoint, after everything already queued.
    pub fn defer<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.defer_for(None, task);
    }

    pub(crate) fn defer_for<F>(&self, effect: Option<EffectId>, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue_microtask(Microtask::Run {
            effect,
            task: Box::new(task),
        });
    }

    fn enqueue_microtask(&self, task: Microtask) {
        self.inner.state.lock().microtasks.push(task);
        self.inner.wakeup.notify_one();
    }

    /// Whether a checkpoint would have anything to do.
    pub fn has_pending_tasks(&self) -> bool {
        !self.inner.state.lock().microtasks.is_empty()
    }

    /// Whether a job flush is scheduled or running.
    pub fn is_flush_scheduled(&self) -> bool {
        self.inner.state.lock().jobs.is_flush_scheduled()
    }

    /// Number of jobs waiting for the next flush.
    pub fn queued_jobs(&self) -> usize {
        self.inner.state.lock().jobs.len()
    }

    /// Run the checkpoint: drain the microtask queue, including tasks queued
    /// while draining, and return how many ran.
    ///
    /// Every task runs even if an earlier one panicked; failures are
    /// reported together as [`ReactiveError::TasksFailed`].
    pub fn flush(&self) -> Result<usize> {
        let limit = self.inner.config.max_microtasks;
        let mut ran = 0;
        let mut failures = Vec::new();
        let mut fatal = None;

        loop {
            let next = self.inner.state.lock().microtasks.pop();
            let Some(task) = next else {
                break;
            };

            if ran == limit {
                error!(limit, "microtask limit exceeded, dropping pending tasks");
                self.abandon_pending(task);
                fatal = Some(ReactiveError::MicrotaskLimitExceeded { limit });
                break;
            }
            ran += 1;

            match task {
                Microtask::FlushJobs => {
                    if let Err(err) = self.flush_jobs(&mut failures) {
                        fatal.get_or_insert(err);
                    }
                }
                Microtask::Run { effect, task } => {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                        let failure = TaskFailure::from_panic(effect, payload.as_ref());
                        error!(%failure, "deferred task panicked");
                        failures.push(failure);
                    }
                }
            }
        }

        if let Some(err) = fatal {
            return Err(err);
        }
        if failures.is_empty() {
            Ok(ran)
        } else {
            Err(ReactiveError::TasksFailed(failures))
        }
    }

    /// Run every queued job, in rounds, until the queue stays empty.
    fn flush_jobs(&self, failures: &mut Vec<TaskFailure>) -> Result<()> {
        let _release = FlushRelease { runtime: self };
        let max_rounds = self.inner.config.max_flush_rounds;

        for round in 0.. {
            let batch = self.inner.state.lock().jobs.take();
            if batch.is_empty() {
                break;
            }
            if round == max_rounds {
                error!(rounds = max_rounds, dropped = batch.len(), "job queue did not settle");
                return Err(ReactiveError::FlushLimitExceeded { rounds: max_rounds });
            }

            debug!(round, jobs = batch.len(), "flushing jobs");
            for job in batch {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| job.run())) {
                    let failure = TaskFailure::from_panic(Some(job.id()), payload.as_ref());
                    error!(%failure, "queued job panicked");
                    failures.push(failure);
                }
            }
        }
        Ok(())
    }

    /// Drop `current` and everything still queued, leaving the scheduler idle.
    fn abandon_pending(&self, current: Microtask) {
        let (tasks, jobs) = {
            let mut state = self.inner.state.lock();
            let tasks = state.microtasks.take_all();
            let jobs = state.jobs.take();
            state.jobs.release();
            (tasks, jobs)
        };
        // Tasks own user closures; drop them outside the lock.
        drop((current, tasks, jobs));
    }

    /// Yield to the async executor once, then run the checkpoint.
    ///
    /// Lets an async host write `state.set(..); rt.checkpoint().await?;` the
    /// way it would await a resolved promise.
    pub async fn checkpoint(&self) -> Result<usize> {
        tokio::task::yield_now().await;
        self.flush()
    }

    /// Wait until at least one microtask is pending, then run the checkpoint.
    ///
    /// A host event loop is `loop { rt.pump().await?; }`.
    pub async fn pump(&self) -> Result<usize> {
        loop {
            if self.has_pending_tasks() {
                return self.flush();
            }
            self.inner.wakeup.notified().await;
        }
    }
}
