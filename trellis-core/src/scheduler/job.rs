//! Job Queue
//!
//! A deduplicating, insertion-ordered set of pending effects plus the
//! "flush scheduled" flag. The runtime holds exactly one.

use indexmap::IndexMap;

use crate::reactive::{EffectHandle, EffectId};

#[derive(Default)]
pub(crate) struct JobQueue {
    jobs: IndexMap<EffectId, EffectHandle>,
    flush_scheduled: bool,
}

impl JobQueue {
    /// Queue `job` unless an entry for the same effect is already pending.
    ///
    /// Returns `true` when no flush was scheduled yet; the caller must then
    /// schedule exactly one.
    pub(crate) fn push(&mut self, job: EffectHandle) -> bool {
        self.jobs.entry(job.id()).or_insert(job);

        if self.flush_scheduled {
            false
        } else {
            self.flush_scheduled = true;
            true
        }
    }

    /// Remove and return every pending job, oldest first.
    pub(crate) fn take(&mut self) -> Vec<EffectHandle> {
        self.jobs.drain(..).map(|(_, job)| job).collect()
    }

    /// Clear the flag once a flush has finished, however it finished.
    pub(crate) fn release(&mut self) {
        self.flush_scheduled = false;
    }

    pub(crate) fn is_flush_scheduled(&self) -> bool {
        self.flush_scheduled
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }
}
