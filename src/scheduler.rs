//! The scheduler: submission ingress, worker loops, and boot recovery.
//!
//! Workers read ready jobs from the queues and drive them through their
//! state machine on per-job coordinator lanes. The activity runtime that
//! actually executes user code is an external collaborator behind the
//! [`ActivityRuntime`] trait.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::activity::{Activity, ActivityCall};
use crate::coordinator::JobCoordinator;
use crate::dispatch::ContinuationDispatcher;
use crate::events::EventStream;
use crate::job::{Job, JobStatus};
use crate::mutator::{JobMutator, MutatorError};
use crate::queue::{JobQueue, QueueError};
use crate::recover::RecoverableAction;
use crate::router::JobRouter;
use crate::settings::OrchestratorConfig;
use crate::store::{JobStore, StoreError};
use crate::transitions::Transitions;

/// Outcome of one dispatch of a job to user code.
#[derive(Debug)]
pub enum ExecutionResult {
    /// The activity finished with a value; the job completes.
    Value(serde_json::Value),
    /// The activity spawned further work; the job waits on it.
    Activity(Activity),
    /// User code raised; feeds the retry/poison policy.
    Error(String),
}

/// Executes user activities. Implementations receive each job at least
/// once; cooperative cancellation is their own concern.
#[async_trait]
pub trait ActivityRuntime: Send + Sync {
    async fn execute(&self, job: &Job) -> ExecutionResult;
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Mutator(#[from] MutatorError),
}

pub struct Scheduler {
    config: OrchestratorConfig,
    store: Arc<dyn JobStore>,
    events: EventStream,
    mutator: Arc<JobMutator>,
    recover: Arc<RecoverableAction>,
    coordinator: Arc<JobCoordinator>,
    router: Arc<JobRouter>,
    transitions: Arc<Transitions>,
    runtime: Arc<dyn ActivityRuntime>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn JobStore>,
        runtime: Arc<dyn ActivityRuntime>,
    ) -> Arc<Self> {
        let events = EventStream::new(config.event_capacity);
        let mutator = Arc::new(JobMutator::new(store.clone(), events.clone()));
        let recover = Arc::new(RecoverableAction::new(
            config.recover.clone(),
            store.clone(),
            events.clone(),
        ));
        let coordinator = JobCoordinator::new();
        let router = Arc::new(JobRouter::new(&config, store.clone(), events.clone()));
        let dispatcher = Arc::new(ContinuationDispatcher::new(
            store.clone(),
            mutator.clone(),
            router.clone(),
            recover.clone(),
        ));
        let transitions = Transitions::new(
            config.clone(),
            store.clone(),
            mutator.clone(),
            recover.clone(),
            coordinator.clone(),
            router.clone(),
            dispatcher,
        );
        Arc::new(Self {
            config,
            store,
            events,
            mutator,
            recover,
            coordinator,
            router,
            transitions,
            runtime,
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> &EventStream {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Load the current durable record of a job.
    pub async fn job(&self, id: &str) -> Result<Job, StoreError> {
        self.store.load(id).await
    }

    /// Reload durable state and start the worker loops. Runs the boot
    /// recovery scan first so crashed jobs resume before new work mixes
    /// in.
    pub async fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        self.recover_from_store().await?;
        let mut workers = self.workers.lock().unwrap();
        for queue in self.router.queues() {
            for _ in 0..self.config.workers_per_queue.max(1) {
                workers.push(self.spawn_worker(queue.clone()));
            }
        }
        info!(workers = workers.len(), "scheduler started");
        Ok(())
    }

    /// Submit a root activity call. The job is persisted in `Created`,
    /// published as `Ready`, and routed to its queue.
    pub async fn submit(&self, call: ActivityCall) -> Result<String, SchedulerError> {
        let policy = self.config.activity(&call.activity_type);
        let job = Job::root(call, policy.retry_delay_ms);
        self.store.store(&job).await?;
        let job = self.mutator.set_status(job, JobStatus::Ready).await?;
        let id = job.id.clone();
        self.router.route(job).await?;
        info!(job_id = %id, "job submitted");
        Ok(id)
    }

    /// Stop the queues (parked readers observe the shutdown sentinel),
    /// wait for the workers, and drain the coordinator lanes.
    pub async fn shutdown(&self) {
        self.router.shutdown();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.await;
        }
        self.coordinator.wait_idle().await;
        info!("scheduler stopped");
    }

    /// Wait for every in-flight coordinator lane to drain. Test and
    /// embedder convenience; does not prevent new submissions.
    pub async fn wait_idle(&self) {
        self.coordinator.wait_idle().await;
    }

    /// Boot-time recovery: re-ready crashed `Running` jobs, seed the
    /// queues with every non-suspended `Ready` job, and resume jobs that
    /// crashed mid-transition.
    async fn recover_from_store(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let mut candidates = self.store.load_by_status(JobStatus::Ready).await?;
        for job in self.store.load_by_status(JobStatus::Running).await? {
            // At-least-once: a job found running after a crash is
            // redispatched.
            match self.mutator.set_status(job, JobStatus::Ready).await {
                Ok(job) => candidates.push(job),
                Err(err) => warn!(%err, "failed to re-ready crashed job"),
            }
        }
        // Suspended jobs stay durable-only; the queues account for them
        // through the suspended counts.
        candidates.retain(|job| !job.suspended);
        self.router.initialize(candidates).await?;

        for job in self.store.load_by_status(JobStatus::ReadyToComplete).await? {
            let transitions = self.transitions.clone();
            let lane = job.id.clone();
            self.coordinator.run(&lane, async move {
                transitions.complete(job).await;
            });
        }
        for job in self.store.load_by_status(JobStatus::ReadyToPoison).await? {
            let transitions = self.transitions.clone();
            let lane = job.id.clone();
            self.coordinator.run(&lane, async move {
                transitions.poison(job).await;
            });
        }
        for job in self
            .store
            .load_by_status(JobStatus::WaitingForChildren)
            .await?
        {
            let transitions = self.transitions.clone();
            let parent_id = job.id.clone();
            let lane = parent_id.clone();
            self.coordinator.run(&lane, async move {
                transitions.verify(&parent_id).await;
            });
        }
        Ok(())
    }

    /// One worker: read from the queue, process on the job's coordinator
    /// lane, and wait for the lane action so each worker drives one job
    /// at a time.
    fn spawn_worker(self: &Arc<Self>, queue: Arc<JobQueue>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match queue.read().await {
                    Ok(job) => {
                        let (done_tx, done_rx) = oneshot::channel();
                        let transitions = scheduler.transitions.clone();
                        let recover = scheduler.recover.clone();
                        let mutator = scheduler.mutator.clone();
                        let runtime = scheduler.runtime.clone();
                        let lane = job.id.clone();
                        scheduler.coordinator.run(&lane, async move {
                            process(transitions, recover, mutator, runtime, job).await;
                            let _ = done_tx.send(());
                        });
                        let _ = done_rx.await;
                    }
                    Err(QueueError::Shutdown) => {
                        debug!(
                            activity_type = queue.activity_type().unwrap_or("<default>"),
                            "worker stopping"
                        );
                        break;
                    }
                    Err(err) => {
                        error!(%err, "queue read failed; worker stopping");
                        break;
                    }
                }
            }
        })
    }
}

/// Drive one dispatch of a job: persist `Running`, hand it to the
/// runtime, and apply the transition its result selects. Runs on the
/// job's coordinator lane.
async fn process(
    transitions: Arc<Transitions>,
    recover: Arc<RecoverableAction>,
    mutator: Arc<JobMutator>,
    runtime: Arc<dyn ActivityRuntime>,
    job: Job,
) {
    let job_id = job.id.clone();
    recover
        .run(
            &job_id,
            || mutator.begin_dispatch(job.clone()),
            |running| async move {
                let result = runtime.execute(&running).await;
                match result {
                    ExecutionResult::Value(_) => transitions.complete(running).await,
                    ExecutionResult::Activity(activity) => {
                        transitions.wait_for_children(running, activity).await
                    }
                    ExecutionResult::Error(message) => {
                        transitions.fail(running, &message).await
                    }
                }
            },
        )
        .await;
}
