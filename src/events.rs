//! Advisory event stream.
//!
//! A broadcast surface with no backpressure: publication never blocks and
//! never fails, slow or absent consumers drop events. Consumers observe
//! job progress here; correctness never depends on delivery.

use tokio::sync::broadcast;

use crate::job::JobSnapshot;

/// Events published by the orchestrator core.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// A job mutation was persisted.
    StatusChanged(JobSnapshot),
    /// A queue failed to persist the suspended flag while spilling a job.
    /// The job stays durable under its previous record and is picked up by
    /// the boot-time status scan; operators can watch for drift here.
    SuspendStoreFailed { id: String },
}

#[derive(Clone)]
pub struct EventStream {
    tx: broadcast::Sender<OrchestratorEvent>,
}

impl EventStream {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget publication; send errors (no receivers) are
    /// ignored.
    pub fn publish(&self, event: OrchestratorEvent) {
        let _ = self.tx.send(event);
    }
}
