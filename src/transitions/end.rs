//! End transition: `ReadyToComplete` to `Completed`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::job::{Job, JobStatus};

use super::Transitions;

impl Transitions {
    /// Drive a job that produced a value, or whose continuation resolved
    /// successfully, through `ReadyToComplete` to `Completed`. Once the
    /// terminal state is durable, the parent (if any) is notified on its
    /// own coordinator lane.
    pub async fn complete(self: &Arc<Self>, job: Job) {
        if job.status == JobStatus::Completed {
            return;
        }
        if job.status != JobStatus::ReadyToComplete
            && !job.status.can_transition_to(JobStatus::ReadyToComplete)
        {
            warn!(job_id = %job.id, status = %job.status, "job cannot complete from this state");
            return;
        }

        let job_id = job.id.clone();
        let parent_id = job.parent_id.clone();
        let mutator = &self.mutator;
        self.recover
            .run(
                &job_id,
                || {
                    let job = job.clone();
                    async move {
                        let staged = if job.status == JobStatus::ReadyToComplete {
                            job
                        } else {
                            mutator.set_status(job, JobStatus::ReadyToComplete).await?
                        };
                        mutator.set_status(staged, JobStatus::Completed).await
                    }
                },
                |completed| async move {
                    debug!(job_id = %completed.id, "job completed");
                    if let Some(parent_id) = parent_id {
                        self.notify_parent(parent_id, completed.id, true);
                    }
                },
            )
            .await;
    }
}
