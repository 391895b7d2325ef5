//! Persistence contract the scheduler core consumes.
//!
//! The store owns durable truth: queues hold weak in-memory copies of
//! ready jobs only, and every mutation path writes through the store
//! before the in-memory copy is considered authoritative. Backends are
//! external collaborators; the crate ships [`MemoryJobStore`] for tests
//! and embedded use.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::job::{Job, JobStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(String),
    /// Transient durability failure; retryable.
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Durable map of jobs by id, with secondary lookups by correlation id,
/// by status, and by suspended flag per activity type.
///
/// All operations are issued from async context; a blocking backend is
/// expected to run them on a worker thread. Two `store` calls on the same
/// id issued from the same coordinator lane must be persisted in order.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Job, StoreError>;

    /// Load the root job of a correlation group.
    async fn load_by_correlation(&self, correlation_id: &str) -> Result<Job, StoreError>;

    /// Finite scan used only at boot.
    async fn load_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError>;

    /// Upsert one job.
    async fn store(&self, job: &Job) -> Result<(), StoreError>;

    /// Upsert a batch atomically with respect to reader queries.
    async fn store_batch(&self, jobs: &[Job]) -> Result<(), StoreError>;

    /// Up to `max` suspended jobs of the given activity type, in FIFO
    /// insertion order. The caller clears the suspended flag.
    async fn load_suspended(&self, activity_type: &str, max: usize)
        -> Result<Vec<Job>, StoreError>;

    /// Same, for the default queue: suspended jobs whose activity type is
    /// not in `exclude_types`.
    async fn load_suspended_excluding(
        &self,
        exclude_types: &[String],
        max: usize,
    ) -> Result<Vec<Job>, StoreError>;

    async fn count_suspended(&self, activity_type: &str) -> Result<usize, StoreError>;

    async fn count_suspended_excluding(&self, exclude_types: &[String])
        -> Result<usize, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<String, (u64, Job)>,
    next_seq: u64,
}

/// In-memory store backend. Insertion order is tracked per job so
/// suspended scans return FIFO order; updates keep the original sequence.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn suspended_matching<F>(&self, max: usize, mut pred: F) -> Vec<Job>
    where
        F: FnMut(&Job) -> bool,
    {
        let state = self.state.lock().unwrap();
        let mut matches: Vec<(u64, Job)> = state
            .jobs
            .values()
            .filter(|(_, job)| job.suspended && pred(job))
            .cloned()
            .collect();
        matches.sort_by_key(|(seq, _)| *seq);
        matches.into_iter().take(max).map(|(_, job)| job).collect()
    }

    fn count_matching<F>(&self, mut pred: F) -> usize
    where
        F: FnMut(&Job) -> bool,
    {
        let state = self.state.lock().unwrap();
        state
            .jobs
            .values()
            .filter(|(_, job)| job.suspended && pred(job))
            .count()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn load(&self, id: &str) -> Result<Job, StoreError> {
        let state = self.state.lock().unwrap();
        state
            .jobs
            .get(id)
            .map(|(_, job)| job.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn load_by_correlation(&self, correlation_id: &str) -> Result<Job, StoreError> {
        let state = self.state.lock().unwrap();
        state
            .jobs
            .values()
            .map(|(_, job)| job)
            .find(|job| job.correlation_id == correlation_id && job.parent_id.is_none())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(correlation_id.to_string()))
    }

    async fn load_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut matches: Vec<(u64, Job)> = state
            .jobs
            .values()
            .filter(|(_, job)| job.status == status)
            .cloned()
            .collect();
        matches.sort_by_key(|(seq, _)| *seq);
        Ok(matches.into_iter().map(|(_, job)| job).collect())
    }

    async fn store(&self, job: &Job) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let seq = match state.jobs.get(&job.id) {
            Some((seq, _)) => *seq,
            None => {
                state.next_seq += 1;
                state.next_seq
            }
        };
        state.jobs.insert(job.id.clone(), (seq, job.clone()));
        Ok(())
    }

    async fn store_batch(&self, jobs: &[Job]) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        for job in jobs {
            let seq = match state.jobs.get(&job.id) {
                Some((seq, _)) => *seq,
                None => {
                    state.next_seq += 1;
                    state.next_seq
                }
            };
            state.jobs.insert(job.id.clone(), (seq, job.clone()));
        }
        Ok(())
    }

    async fn load_suspended(
        &self,
        activity_type: &str,
        max: usize,
    ) -> Result<Vec<Job>, StoreError> {
        Ok(self.suspended_matching(max, |job| job.activity_type == activity_type))
    }

    async fn load_suspended_excluding(
        &self,
        exclude_types: &[String],
        max: usize,
    ) -> Result<Vec<Job>, StoreError> {
        Ok(self.suspended_matching(max, |job| {
            !exclude_types.iter().any(|t| *t == job.activity_type)
        }))
    }

    async fn count_suspended(&self, activity_type: &str) -> Result<usize, StoreError> {
        Ok(self.count_matching(|job| job.activity_type == activity_type))
    }

    async fn count_suspended_excluding(
        &self,
        exclude_types: &[String],
    ) -> Result<usize, StoreError> {
        Ok(self.count_matching(|job| !exclude_types.iter().any(|t| *t == job.activity_type)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityCall;

    fn suspended_job(activity_type: &str) -> Job {
        let mut job = Job::root(ActivityCall::new(activity_type, "run"), 0);
        job.suspended = true;
        job
    }

    #[tokio::test]
    async fn suspended_scan_is_fifo_by_insertion() {
        let store = MemoryJobStore::new();
        let first = suspended_job("s");
        let second = suspended_job("s");
        store.store(&first).await.unwrap();
        store.store(&second).await.unwrap();

        let loaded = store.load_suspended("s", 10).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, first.id);
        assert_eq!(loaded[1].id, second.id);
    }

    #[tokio::test]
    async fn update_keeps_insertion_order() {
        let store = MemoryJobStore::new();
        let first = suspended_job("s");
        let mut second = suspended_job("s");
        store.store(&first).await.unwrap();
        store.store(&second).await.unwrap();

        // Rewriting the second job must not move it ahead of the first.
        second.dispatch_count = 3;
        store.store(&second).await.unwrap();
        let loaded = store.load_suspended("s", 10).await.unwrap();
        assert_eq!(loaded[0].id, first.id);
    }

    #[tokio::test]
    async fn excluding_scan_skips_named_types() {
        let store = MemoryJobStore::new();
        store.store(&suspended_job("s")).await.unwrap();
        let other = suspended_job("t");
        store.store(&other).await.unwrap();

        let exclude = vec!["s".to_string()];
        let loaded = store.load_suspended_excluding(&exclude, 10).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, other.id);
        assert_eq!(store.count_suspended_excluding(&exclude).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn correlation_lookup_returns_the_root() {
        let store = MemoryJobStore::new();
        let root = Job::root(ActivityCall::new("s", "run"), 0);
        let child = Job::child_of(&root, ActivityCall::new("s", "step"));
        store.store(&root).await.unwrap();
        store.store(&child).await.unwrap();

        let found = store.load_by_correlation(&root.correlation_id).await.unwrap();
        assert_eq!(found.id, root.id);
    }
}
