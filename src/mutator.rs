//! The single write path for job state.
//!
//! Only the mutator may issue `store` calls for status changes. Each
//! mutation validates the transition edge, persists, publishes a
//! snapshot, and hands back the updated record; callers must adopt the
//! returned value as the authoritative copy.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::continuation::Continuation;
use crate::events::{EventStream, OrchestratorEvent};
use crate::job::{Job, JobStatus};
use crate::store::{JobStore, StoreError};

#[derive(Debug, Error)]
pub enum MutatorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Programmer error: the requested edge is not part of the lifecycle
    /// graph.
    #[error("illegal transition {from} -> {to} for job {id}")]
    IllegalTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },
}

pub struct JobMutator {
    store: Arc<dyn JobStore>,
    events: EventStream,
}

impl JobMutator {
    pub fn new(store: Arc<dyn JobStore>, events: EventStream) -> Self {
        Self { store, events }
    }

    /// Move `job` along one edge of the lifecycle graph and persist it.
    pub async fn set_status(&self, mut job: Job, status: JobStatus) -> Result<Job, MutatorError> {
        if !job.status.can_transition_to(status) {
            return Err(MutatorError::IllegalTransition {
                id: job.id,
                from: job.status,
                to: status,
            });
        }
        let from = job.status;
        job.status = status;
        if status.is_terminal() {
            job.continuation = None;
        }
        self.store.store(&job).await?;
        debug!(job_id = %job.id, %from, to = %status, "job transition persisted");
        self.events
            .publish(OrchestratorEvent::StatusChanged(job.snapshot()));
        Ok(job)
    }

    /// `Ready -> Running`, counting the dispatch.
    pub async fn begin_dispatch(&self, mut job: Job) -> Result<Job, MutatorError> {
        if !job.status.can_transition_to(JobStatus::Running) {
            return Err(MutatorError::IllegalTransition {
                id: job.id,
                from: job.status,
                to: JobStatus::Running,
            });
        }
        job.status = JobStatus::Running;
        job.dispatch_count += 1;
        self.store.store(&job).await?;
        debug!(job_id = %job.id, dispatch_count = job.dispatch_count, "job dispatched");
        self.events
            .publish(OrchestratorEvent::StatusChanged(job.snapshot()));
        Ok(job)
    }

    /// `Running -> WaitingForChildren`, attaching the wait structure in
    /// the same persisted write.
    pub async fn set_waiting(
        &self,
        mut job: Job,
        continuation: Continuation,
    ) -> Result<Job, MutatorError> {
        if !job.status.can_transition_to(JobStatus::WaitingForChildren) {
            return Err(MutatorError::IllegalTransition {
                id: job.id,
                from: job.status,
                to: JobStatus::WaitingForChildren,
            });
        }
        job.status = JobStatus::WaitingForChildren;
        job.continuation = Some(continuation);
        self.store.store(&job).await?;
        debug!(job_id = %job.id, "job waiting for children");
        self.events
            .publish(OrchestratorEvent::StatusChanged(job.snapshot()));
        Ok(job)
    }

    /// Persist an updated continuation on a waiting parent without a
    /// status change (continuation state is part of the parent's record).
    pub async fn store_continuation(
        &self,
        mut job: Job,
        continuation: Continuation,
    ) -> Result<Job, MutatorError> {
        job.continuation = Some(continuation);
        self.store.store(&job).await?;
        Ok(job)
    }
}
