//! Failed transition: user-code errors under the retry policy.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::job::{Job, JobStatus};

use super::Transitions;

impl Transitions {
    /// A dispatch of this job raised an error. The failure is persisted
    /// first (`Running -> Failed`), then the job either re-enters `Ready`
    /// after its retry delay or, with the budget exhausted, goes down the
    /// poison path.
    pub async fn fail(self: &Arc<Self>, job: Job, reason: &str) {
        warn!(job_id = %job.id, %reason, "activity execution failed");
        let policy = self.config.activity(&job.activity_type);
        let mutator = &self.mutator;
        let job_id = job.id.clone();
        self.recover
            .run(
                &job_id,
                || mutator.set_status(job.clone(), JobStatus::Failed),
                |failed| async move {
                    if failed.retry_count < policy.max_retries {
                        self.retry(failed).await;
                    } else {
                        self.poison(failed).await;
                    }
                },
            )
            .await;
    }

    /// `Failed -> Ready` with the retry counted, then back to its queue.
    /// The delay runs on the job's coordinator lane; the job has nothing
    /// else to do while it waits.
    async fn retry(self: &Arc<Self>, job: Job) {
        let policy = self.config.activity(&job.activity_type);
        let delay_ms = if job.retry_delay_ms > 0 {
            job.retry_delay_ms
        } else {
            policy.retry_delay_ms
        };
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        info!(
            job_id = %job.id,
            retry = job.retry_count + 1,
            max_retries = policy.max_retries,
            "retrying failed job"
        );
        let mutator = &self.mutator;
        let router = &self.router;
        self.recover
            .run(
                &job.id,
                || {
                    let mut staged = job.clone();
                    staged.retry_count += 1;
                    async move { mutator.set_status(staged, JobStatus::Ready).await }
                },
                |ready| async move {
                    if let Err(err) = router.route(ready).await {
                        warn!(%err, "failed to route retried job");
                    }
                },
            )
            .await;
    }
}
