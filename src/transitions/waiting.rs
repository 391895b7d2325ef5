//! Waiting transition: a running job returned an activity graph instead
//! of a value.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::activity::Activity;
use crate::convert::convert;
use crate::job::{Job, JobStatus};
use crate::mutator::MutatorError;

use super::Transitions;

impl Transitions {
    /// Convert the returned graph, persist the new children in one batch,
    /// flip the parent to `WaitingForChildren` with the continuation
    /// attached, and dispatch the first wave. Children are durable before
    /// any of them becomes visible to a queue. A dispatch failure does
    /// not undo the prior steps; it schedules a liveness verification so
    /// the parent cannot stay stuck.
    pub async fn wait_for_children(self: &Arc<Self>, job: Job, activity: Activity) {
        let converted = match convert(&activity, &job) {
            Ok(converted) => converted,
            Err(err) => {
                // Invalid graph from user code surfaces as a failure of
                // the parent.
                self.fail(job, &err.to_string()).await;
                return;
            }
        };
        debug!(
            job_id = %job.id,
            children = converted.jobs.len(),
            "job waiting on returned activity graph"
        );

        let jobs = converted.jobs;
        let dispatch_jobs = jobs.clone();
        let continuation = converted.continuation;
        let store = &self.store;
        let mutator = &self.mutator;
        self.recover
            .run(
                &job.id,
                || {
                    let job = job.clone();
                    let jobs = jobs.clone();
                    let continuation = continuation.clone();
                    async move {
                        store.store_batch(&jobs).await?;
                        if job.status == JobStatus::WaitingForChildren {
                            // Re-run after a partial failure; the flip
                            // already landed.
                            Ok::<_, MutatorError>(job)
                        } else {
                            mutator.set_waiting(job, continuation).await
                        }
                    }
                },
                |mut parent| async move {
                    match self
                        .dispatcher
                        .dispatch_with(&mut parent, &dispatch_jobs)
                        .await
                    {
                        Ok(readied) => {
                            debug!(
                                parent_id = %parent.id,
                                readied = readied.len(),
                                "dispatched continuation frontier"
                            );
                        }
                        Err(err) => {
                            warn!(
                                parent_id = %parent.id,
                                %err,
                                "dispatch failed, scheduling liveness verification"
                            );
                            let transitions = Arc::clone(self);
                            let parent_id = parent.id.clone();
                            self.coordinator.run(&parent.id, async move {
                                transitions.verify(&parent_id).await;
                            });
                        }
                    }
                },
            )
            .await;
    }
}
