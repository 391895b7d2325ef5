//! Dispatches ready continuations: marks frontier leaves, persists the
//! parent, and routes the referenced children.
//!
//! Dispatch is idempotent: `pending()` only yields undispatched leaves,
//! and a child is routed only while still in `Created` state, so repeated
//! invocations for the same `(parent, child)` never move a child past
//! `Ready` twice.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::job::{Job, JobStatus};
use crate::mutator::JobMutator;
use crate::recover::RecoverableAction;
use crate::router::JobRouter;
use crate::store::{JobStore, StoreError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ContinuationDispatcher {
    store: Arc<dyn JobStore>,
    mutator: Arc<JobMutator>,
    router: Arc<JobRouter>,
    recover: Arc<RecoverableAction>,
}

impl ContinuationDispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        mutator: Arc<JobMutator>,
        router: Arc<JobRouter>,
        recover: Arc<RecoverableAction>,
    ) -> Self {
        Self {
            store,
            mutator,
            router,
            recover,
        }
    }

    /// Advance the parent's continuation tree: mark the pending frontier
    /// `Ready`, persist the parent (the tree is part of its record), then
    /// move each referenced child still in `Created` to `Ready` and route
    /// it. Children are loaded from the store. Returns the readied leaf
    /// ids.
    pub async fn dispatch(&self, parent: &mut Job) -> Result<Vec<String>, DispatchError> {
        self.dispatch_inner(parent, None).await
    }

    /// Same, primed with the freshly-created child list to skip the store
    /// round-trip.
    pub async fn dispatch_with(
        &self,
        parent: &mut Job,
        new_jobs: &[Job],
    ) -> Result<Vec<String>, DispatchError> {
        self.dispatch_inner(parent, Some(new_jobs)).await
    }

    async fn dispatch_inner(
        &self,
        parent: &mut Job,
        primed: Option<&[Job]>,
    ) -> Result<Vec<String>, DispatchError> {
        let Some(continuation) = parent.continuation.as_mut() else {
            return Ok(Vec::new());
        };
        let pending = continuation.pending();
        for id in &pending {
            continuation.mark_ready(id);
        }
        // Persisted before any child becomes visible to a queue; also
        // lands results recorded on the tree by the caller.
        self.store.store(parent).await?;

        let mut readied = Vec::new();
        for id in pending {
            let child = match primed {
                Some(jobs) => jobs.iter().find(|job| job.id == id).cloned(),
                None => match self.store.load(&id).await {
                    Ok(job) => Some(job),
                    Err(err) => {
                        warn!(parent_id = %parent.id, child_id = %id, %err, "child load failed");
                        None
                    }
                },
            };
            let Some(child) = child else { continue };
            if child.status != JobStatus::Created {
                // Already dispatched by an earlier invocation.
                debug!(child_id = %child.id, status = %child.status, "skipping dispatched child");
                continue;
            }
            self.ready_and_route(child).await;
            readied.push(id);
        }
        Ok(readied)
    }

    /// Move a created child to `Ready` (persisted, retried) and hand it
    /// to its queue.
    pub async fn ready_and_route(&self, child: Job) {
        let mutator = &self.mutator;
        let router = &self.router;
        self.recover
            .run(
                &child.id,
                || mutator.set_status(child.clone(), JobStatus::Ready),
                |ready| async move {
                    if let Err(err) = router.route(ready).await {
                        warn!(%err, "failed to route readied child");
                    }
                },
            )
            .await;
    }
}
