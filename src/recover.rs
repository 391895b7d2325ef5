//! Retry-wrapped durable mutations with at-most-once follow-up.
//!
//! A recoverable action pairs a `body` (idempotent mutation of persisted
//! state) with a `then` (in-memory side effect that must only run once
//! `body` succeeded). The body is retried under bounded exponential
//! backoff; exhaustion marks the originating job poisoned and swallows
//! the error, because propagating it would tear down the coordinator
//! lane the action runs on.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use crate::events::{EventStream, OrchestratorEvent};
use crate::job::JobStatus;
use crate::settings::RecoverPolicy;
use crate::store::JobStore;

pub struct RecoverableAction {
    policy: RecoverPolicy,
    store: Arc<dyn JobStore>,
    events: EventStream,
}

impl RecoverableAction {
    pub fn new(policy: RecoverPolicy, store: Arc<dyn JobStore>, events: EventStream) -> Self {
        Self {
            policy,
            store,
            events,
        }
    }

    /// Run `body` with retries; on success run `then` exactly once. On
    /// exhaustion the originating job is best-effort marked `Poisoned`
    /// and the error is swallowed.
    pub async fn run<T, E, B, Fb, F, Ff>(&self, job_id: &str, body: B, then: F)
    where
        E: Display,
        B: Fn() -> Fb,
        Fb: Future<Output = Result<T, E>>,
        F: FnOnce(T) -> Ff,
        Ff: Future<Output = ()>,
    {
        match self.attempt(job_id, &body).await {
            Some(value) => then(value).await,
            None => self.poison_marker(job_id).await,
        }
    }

    /// Like [`run`](Self::run) but without the poison marker: exhaustion
    /// is logged and surfaced to the caller. Used where a lost write is
    /// recoverable by other means (the suspended-reload path).
    pub async fn run_lenient<T, E, B, Fb>(&self, job_id: &str, body: B) -> Option<T>
    where
        E: Display,
        B: Fn() -> Fb,
        Fb: Future<Output = Result<T, E>>,
    {
        self.attempt(job_id, &body).await
    }

    async fn attempt<T, E, B, Fb>(&self, job_id: &str, body: &B) -> Option<T>
    where
        E: Display,
        B: Fn() -> Fb,
        Fb: Future<Output = Result<T, E>>,
    {
        let attempts = self.policy.max_attempts.max(1);
        for attempt in 0..attempts {
            match body().await {
                Ok(value) => return Some(value),
                Err(err) if attempt + 1 < attempts => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        %job_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        %err,
                        "durable mutation failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    error!(%job_id, attempts, %err, "durable mutation exhausted retries");
                }
            }
        }
        None
    }

    /// delay = base * 2^attempt, capped.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.policy.base_delay_ms.max(1);
        let exp = base.saturating_mul(1u64 << attempt.min(32));
        Duration::from_millis(exp.min(self.policy.max_delay_ms.max(base)))
    }

    /// Best-effort poison marker written directly against the store; the
    /// normal transition graph no longer applies to a job whose durable
    /// writes cannot land.
    async fn poison_marker(&self, job_id: &str) {
        match self.store.load(job_id).await {
            Ok(mut job) => {
                job.status = JobStatus::Poisoned;
                job.continuation = None;
                match self.store.store(&job).await {
                    Ok(()) => {
                        self.events
                            .publish(OrchestratorEvent::StatusChanged(job.snapshot()));
                    }
                    Err(err) => {
                        error!(%job_id, %err, "failed to persist poison marker");
                    }
                }
            }
            Err(err) => {
                error!(%job_id, %err, "failed to load job for poison marker");
            }
        }
    }
}
