//! Routes jobs to their activity queue.
//!
//! The registry is built once at boot from configuration: one queue per
//! configured activity type, plus the default queue for everything else.
//! Routing is a pure function of the job's activity type.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::events::EventStream;
use crate::job::Job;
use crate::queue::{JobQueue, QueueError};
use crate::settings::OrchestratorConfig;
use crate::store::JobStore;

pub struct JobRouter {
    queues: HashMap<String, Arc<JobQueue>>,
    default_queue: Arc<JobQueue>,
}

impl JobRouter {
    pub fn new(
        config: &OrchestratorConfig,
        store: Arc<dyn JobStore>,
        events: EventStream,
    ) -> Self {
        let mut queues = HashMap::new();
        let typed: Vec<String> = config
            .typed_queue_configs()
            .filter_map(|c| c.activity_type.clone())
            .collect();
        for queue_config in config.typed_queue_configs() {
            let Some(activity_type) = queue_config.activity_type.clone() else {
                continue;
            };
            let queue = Arc::new(JobQueue::new(
                queue_config.clone(),
                Vec::new(),
                config.recover.clone(),
                store.clone(),
                events.clone(),
            ));
            queues.insert(activity_type, queue);
        }
        let default_queue = Arc::new(JobQueue::new(
            config.default_queue_config(),
            typed,
            config.recover.clone(),
            store.clone(),
            events,
        ));
        Self {
            queues,
            default_queue,
        }
    }

    /// The queue registered for `activity_type`, falling back to the
    /// default queue.
    pub fn queue_for(&self, activity_type: &str) -> &Arc<JobQueue> {
        self.queues.get(activity_type).unwrap_or(&self.default_queue)
    }

    pub async fn route(&self, job: Job) -> Result<(), QueueError> {
        let queue = self.queue_for(&job.activity_type);
        debug!(
            job_id = %job.id,
            activity_type = %job.activity_type,
            default = queue.is_default(),
            "routing job"
        );
        queue.write(job).await
    }

    /// Initialize every queue with the boot-time candidate set. Typed
    /// queues take their jobs first; the default queue serves the rest.
    pub async fn initialize(&self, candidates: Vec<Job>) -> Result<(), QueueError> {
        let mut rest = candidates;
        for queue in self.queues.values() {
            rest = queue.initialize(rest).await?;
        }
        let leftover = self.default_queue.initialize(rest).await?;
        debug_assert!(leftover.is_empty(), "default queue serves every job");
        Ok(())
    }

    /// All queues, default last.
    pub fn queues(&self) -> Vec<Arc<JobQueue>> {
        let mut all: Vec<Arc<JobQueue>> = self.queues.values().cloned().collect();
        all.push(self.default_queue.clone());
        all
    }

    pub fn shutdown(&self) {
        for queue in self.queues.values() {
            queue.shutdown();
        }
        self.default_queue.shutdown();
    }
}
