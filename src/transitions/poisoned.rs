//! Poisoned transition: retry budgets exhausted.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::job::{Job, JobStatus};

use super::Transitions;

impl Transitions {
    /// Drive a job whose budgets ran out through `ReadyToPoison` to
    /// `Poisoned`, notifying the parent of the failure. A configured
    /// poison-retry budget instead grants a failed job a fresh retry
    /// round: its retry count resets and it re-enters `Ready`.
    pub async fn poison(self: &Arc<Self>, job: Job) {
        if job.status == JobStatus::Poisoned {
            return;
        }
        let policy = self.config.activity(&job.activity_type);
        // Poison-retry rounds apply to runtime failures only; a parent
        // whose children failed goes terminal.
        if job.status == JobStatus::Failed && job.poison_retry_count < policy.max_poisoned_retries
        {
            self.poison_retry_round(job).await;
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
                        let staged = if job.status == JobStatus::ReadyToPoison {
                            job
                        } else {
                            mutator.set_status(job, JobStatus::ReadyToPoison).await?
                        };
                        mutator.set_status(staged, JobStatus::Poisoned).await
                    }
                },
                |poisoned| async move {
                    warn!(job_id = %poisoned.id, "job poisoned");
                    if let Some(parent_id) = parent_id {
                        self.notify_parent(parent_id, poisoned.id, false);
                    }
                },
            )
            .await;
    }

    async fn poison_retry_round(self: &Arc<Self>, job: Job) {
        debug!(
            job_id = %job.id,
            round = job.poison_retry_count + 1,
            "granting poison-retry round"
        );
        let mutator = &self.mutator;
        let router = &self.router;
        self.recover
            .run(
                &job.id,
                || {
                    let mut staged = job.clone();
                    staged.poison_retry_count += 1;
                    staged.retry_count = 0;
                    async move { mutator.set_status(staged, JobStatus::Ready).await }
                },
                |ready| async move {
                    if let Err(err) = router.route(ready).await {
                        warn!(%err, "failed to route poison-retried job");
                    }
                },
            )
            .await;
    }
}
