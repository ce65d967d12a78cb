//! In-memory registry of retrain jobs.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::JobError;
use crate::jobs::job::RetrainJob;

struct Entry {
    seq: u64,
    job: RetrainJob,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    jobs: HashMap<String, Entry>,
}

/// Holds every known job. Readers always receive whole cloned records;
/// all mutation happens under the write lock.
pub struct JobRegistry {
    inner: RwLock<Inner>,
    max_retained: usize,
}

impl JobRegistry {
    pub fn new(max_retained: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_retained: max_retained.max(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        match self.inner.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        match self.inner.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn record(&self, job: RetrainJob) {
        let mut inner = self.write();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(job.job_id.clone(), Entry { seq, job });
        self.evict(&mut inner);
    }

    pub fn get(&self, job_id: &str) -> Result<RetrainJob, JobError> {
        self.read()
            .jobs
            .get(job_id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Vec<RetrainJob> {
        let inner = self.read();
        let mut entries: Vec<&Entry> = inner.jobs.values().collect();
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));
        entries.into_iter().map(|e| e.job.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies `mutate` to the job under the write lock. A status change
    /// that is not a forward transition is rejected and the stored record
    /// is left untouched.
    pub fn update<F>(&self, job_id: &str, mutate: F) -> Result<RetrainJob, JobError>
    where
        F: FnOnce(&mut RetrainJob),
    {
        let mut inner = self.write();
        let entry = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

        let mut updated = entry.job.clone();
        mutate(&mut updated);

        let from = entry.job.status;
        if updated.status != from && !from.can_transition_to(updated.status) {
            return Err(JobError::InvalidTransition {
                job_id: job_id.to_string(),
                from: from.to_string(),
                to: updated.status.to_string(),
            });
        }
        // identity never changes
        updated.job_id = entry.job.job_id.clone();

        entry.job = updated.clone();
        Ok(updated)
    }

    fn evict(&self, inner: &mut Inner) {
        if inner.jobs.len() <= self.max_retained {
            return;
        }
        let mut terminal: Vec<(u64, String)> = inner
            .jobs
            .iter()
            .filter(|(_, e)| e.job.is_finished())
            .map(|(id, e)| (e.seq, id.clone()))
            .collect();
        terminal.sort_unstable();

        let excess = inner.jobs.len() - self.max_retained;
        for (_, id) in terminal.into_iter().take(excess) {
            inner.jobs.remove(&id);
            log::debug!("Evicted retrain job {}", id);
        }
    }
}
