//! Child terminal notifications and continuation liveness.
//!
//! Both paths run on the parent's coordinator lane: recording a child's
//! outcome on the parent's continuation, and healing a parent whose
//! dispatch partially failed by reconciling leaf states against the
//! store.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::continuation::{Continuation, ContinuationStatus};
use crate::job::{Job, JobStatus};

use super::Transitions;

impl Transitions {
    /// Record `child_id`'s terminal outcome on the parent's continuation,
    /// then advance the tree: dispatch the next frontier, or republish
    /// the parent when the tree resolved.
    pub async fn child_reached_terminal(
        self: &Arc<Self>,
        parent_id: &str,
        child_id: &str,
        completed: bool,
    ) {
        let parent = match self.store.load(parent_id).await {
            Ok(parent) => parent,
            Err(err) => {
                warn!(%parent_id, %err, "failed to load parent for child notification");
                return;
            }
        };
        if parent.status != JobStatus::WaitingForChildren {
            debug!(%parent_id, status = %parent.status, "stale child notification");
            return;
        }
        let Some(mut continuation) = parent.continuation.clone() else {
            warn!(%parent_id, "waiting parent has no continuation");
            return;
        };
        if !continuation.record_result(child_id, completed) {
            debug!(%parent_id, %child_id, "duplicate child notification");
            return;
        }
        self.advance(parent, continuation).await;
    }

    /// Liveness verification after a (possibly partial) dispatch failure.
    /// Reconciles `Ready` leaves against the store: a leaf whose child
    /// already reached a terminal state is recorded, a leaf whose child
    /// was never routed is re-routed. If the continuation turns out
    /// satisfied, the parent is republished.
    pub async fn verify(self: &Arc<Self>, parent_id: &str) {
        let parent = match self.store.load(parent_id).await {
            Ok(parent) => parent,
            Err(err) => {
                warn!(%parent_id, %err, "failed to load parent for liveness verification");
                return;
            }
        };
        if parent.status != JobStatus::WaitingForChildren {
            return;
        }
        let Some(mut continuation) = parent.continuation.clone() else {
            return;
        };

        for leaf_id in continuation.ready_leaves() {
            let child = match self.store.load(&leaf_id).await {
                Ok(child) => child,
                Err(err) => {
                    warn!(%parent_id, child_id = %leaf_id, %err, "failed to load child leaf");
                    continue;
                }
            };
            match child.status {
                JobStatus::Completed => {
                    continuation.record_result(&leaf_id, true);
                }
                JobStatus::Poisoned => {
                    continuation.record_result(&leaf_id, false);
                }
                JobStatus::Created => {
                    // The leaf was persisted Ready but the crash hit
                    // before the child was routed.
                    debug!(%parent_id, child_id = %leaf_id, "re-routing unrouted child");
                    self.dispatcher.ready_and_route(child).await;
                }
                _ => {}
            }
        }
        self.advance(parent, continuation).await;
    }

    /// Apply an updated continuation to a waiting parent: republish the
    /// parent when the tree resolved, otherwise persist the tree and
    /// dispatch whatever the update unblocked.
    pub(crate) async fn advance(self: &Arc<Self>, mut parent: Job, continuation: Continuation) {
        match continuation.status() {
            ContinuationStatus::Completed => {
                parent.continuation = Some(continuation);
                self.complete(parent).await;
            }
            ContinuationStatus::Failed => {
                parent.continuation = Some(continuation);
                self.poison(parent).await;
            }
            _ => {
                parent.continuation = Some(continuation);
                let dispatcher = &self.dispatcher;
                self.recover
                    .run(
                        &parent.id,
                        || {
                            let mut parent = parent.clone();
                            async move {
                                // Persists the recorded results and routes
                                // the next frontier; safe to repeat.
                                dispatcher.dispatch(&mut parent).await
                            }
                        },
                        |readied| async move {
                            if !readied.is_empty() {
                                debug!(readied = readied.len(), "advanced continuation frontier");
                            }
                        },
                    )
                    .await;
            }
        }
    }
}
