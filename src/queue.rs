//! Bounded per-activity job queues with suspend-to-store overflow.
//!
//! Each queue keeps a FIFO in-memory buffer of ready jobs. A bounded
//! queue that overflows spills the excess to the persistence store with
//! `suspended = true` and reloads it when readers drain the buffer; the
//! default queue (no activity-type constraint) is unbounded and never
//! suspends on write, though it will still reload jobs left suspended by
//! a previous process lifetime. Readers of an empty queue park until a
//! write wakes them or the queue shuts down; one parked reader is woken
//! per admitted item.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::events::{EventStream, OrchestratorEvent};
use crate::job::Job;
use crate::recover::RecoverableAction;
use crate::settings::{ActivityConfig, RecoverPolicy};
use crate::store::{JobStore, StoreError};

#[derive(Debug, Error)]
pub enum QueueError {
    /// Programmer error: `initialize` called twice.
    #[error("queue already initialized")]
    AlreadyInitialized,
    /// Programmer error: read or write before `initialize`.
    #[error("queue used before initialization")]
    NotInitialized,
    /// Orderly stop; parked reads terminate here.
    #[error("queue is shut down")]
    Shutdown,
    #[error(transparent)]
    Store(#[from] StoreError),
}

struct QueueState {
    initialized: bool,
    shutdown: bool,
    buffer: VecDeque<Job>,
    /// Durable-only jobs belonging to this queue, tracked so readers know
    /// to go back to the store once the buffer drains.
    suspended_count: usize,
    /// One reload in flight at a time; latecomers park.
    reloading: bool,
    /// Parked readers, woken one per admitted or spilled item. A woken
    /// reader loops back to pop the buffer or retry the reload.
    parked: VecDeque<oneshot::Sender<()>>,
}

impl QueueState {
    fn wake_one(&mut self) {
        while let Some(waiter) = self.parked.pop_front() {
            if waiter.send(()).is_ok() {
                break;
            }
            // Reader gave up; try the next one.
        }
    }

    fn wake(&mut self, count: usize) {
        for _ in 0..count {
            if self.parked.is_empty() {
                break;
            }
            self.wake_one();
        }
    }
}

/// One queue per activity type, plus one default queue serving every
/// type without its own registration.
pub struct JobQueue {
    config: ActivityConfig,
    /// Activity types owned by typed queues; only meaningful on the
    /// default queue, where the suspended pool is "everything else".
    exclude_types: Vec<String>,
    store: Arc<dyn JobStore>,
    events: EventStream,
    recover: RecoverableAction,
    state: Mutex<QueueState>,
}

enum ReadStep {
    Pop(Job),
    Reload(usize),
    Park(oneshot::Receiver<()>),
}

impl JobQueue {
    pub fn new(
        config: ActivityConfig,
        exclude_types: Vec<String>,
        recover_policy: RecoverPolicy,
        store: Arc<dyn JobStore>,
        events: EventStream,
    ) -> Self {
        let recover = RecoverableAction::new(recover_policy, store.clone(), events.clone());
        Self {
            config,
            exclude_types,
            store,
            events,
            recover,
            state: Mutex::new(QueueState {
                initialized: false,
                shutdown: false,
                buffer: VecDeque::new(),
                suspended_count: 0,
                reloading: false,
                parked: VecDeque::new(),
            }),
        }
    }

    pub fn activity_type(&self) -> Option<&str> {
        self.config.activity_type.as_deref()
    }

    pub fn is_default(&self) -> bool {
        self.config.activity_type.is_none()
    }

    fn matches(&self, job: &Job) -> bool {
        match self.activity_type() {
            Some(activity_type) => job.activity_type == activity_type,
            None => true,
        }
    }

    /// Admit up to `max_queue_length` of the matching candidates into the
    /// buffer and prime the suspended count. Matching candidates beyond
    /// capacity are dropped: they are already durable and suspended in
    /// the store, covered by the count. Returns the candidates this queue
    /// does not serve.
    pub async fn initialize(&self, candidates: Vec<Job>) -> Result<Vec<Job>, QueueError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.initialized {
                return Err(QueueError::AlreadyInitialized);
            }
            state.initialized = true;
        }

        let suspended = match self.activity_type() {
            Some(activity_type) => self.store.count_suspended(activity_type).await?,
            None => {
                self.store
                    .count_suspended_excluding(&self.exclude_types)
                    .await?
            }
        };

        let capacity = self.config.max_queue_length.unwrap_or(usize::MAX);
        let mut rest = Vec::new();
        let mut admitted = 0usize;
        let mut state = self.state.lock().unwrap();
        for job in candidates {
            if !self.matches(&job) {
                rest.push(job);
            } else if admitted < capacity {
                state.buffer.push_back(job);
                admitted += 1;
            }
        }
        state.suspended_count = suspended;
        debug!(
            activity_type = self.activity_type().unwrap_or("<default>"),
            admitted,
            suspended,
            "queue initialized"
        );
        Ok(rest)
    }

    /// Admit the job or spill it to the store. Never blocks on capacity;
    /// either way one parked reader is woken.
    pub async fn write(&self, mut job: Job) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock().unwrap();
            if !state.initialized {
                return Err(QueueError::NotInitialized);
            }
            if state.shutdown {
                return Err(QueueError::Shutdown);
            }
            let admit = match self.config.max_queue_length {
                None => true,
                // Admission requires headroom and a drained suspended
                // pool, or the job would jump ahead of spilled ones.
                Some(max) => state.buffer.len() < max && state.suspended_count == 0,
            };
            if admit {
                job.suspended = false;
                state.buffer.push_back(job);
                state.wake_one();
                return Ok(());
            }
        }

        job.suspended = true;
        match self.store.store(&job).await {
            Ok(()) => {
                let mut state = self.state.lock().unwrap();
                state.suspended_count += 1;
                // The spilled job is readable through the store; let a
                // parked reader retry its reload.
                state.wake_one();
                debug!(job_id = %job.id, "job suspended to store");
            }
            Err(err) => {
                // The job is already durable from earlier states; at worst
                // it keeps its previous suspended value and is found by
                // the boot-time status scan. Surface the drift.
                warn!(job_id = %job.id, %err, "failed to persist suspended flag");
                self.events
                    .publish(OrchestratorEvent::SuspendStoreFailed { id: job.id });
            }
        }
        Ok(())
    }

    /// Take the next ready job, reloading the suspended pool when the
    /// buffer has drained, or parking until a write arrives.
    pub async fn read(&self) -> Result<Job, QueueError> {
        loop {
            let step = {
                let mut state = self.state.lock().unwrap();
                if !state.initialized {
                    return Err(QueueError::NotInitialized);
                }
                if state.shutdown {
                    return Err(QueueError::Shutdown);
                }
                if let Some(job) = state.buffer.pop_front() {
                    ReadStep::Pop(job)
                } else if state.suspended_count > 0 && !state.reloading {
                    state.reloading = true;
                    let batch = match self.config.max_queue_length {
                        Some(max) => max.min(state.suspended_count),
                        None => state.suspended_count,
                    };
                    ReadStep::Reload(batch)
                } else {
                    let (tx, rx) = oneshot::channel();
                    state.parked.push_back(tx);
                    ReadStep::Park(rx)
                }
            };

            match step {
                ReadStep::Pop(job) => return Ok(job),
                ReadStep::Reload(batch) => {
                    let loaded = self.reload(batch).await;
                    let failed = loaded.is_none();
                    let mut ready = Vec::new();
                    if let Some(mut jobs) = loaded {
                        // FIFO for the reloaded batch.
                        jobs.sort_by(|a, b| {
                            (a.created_at_ms, &a.id).cmp(&(b.created_at_ms, &b.id))
                        });
                        for mut job in jobs {
                            job.suspended = false;
                            // A failed write here is ignored: the job is
                            // handed out anyway and the stale suspended
                            // flag is reconciled by the boot-time scan.
                            self.recover
                                .run_lenient(&job.id, || self.store.store(&job))
                                .await;
                            ready.push(job);
                        }
                    }

                    let park = {
                        let mut state = self.state.lock().unwrap();
                        state.reloading = false;
                        if !failed {
                            if ready.is_empty() {
                                // The count drifted ahead of the store;
                                // trust the store and stop asking until
                                // new spills arrive.
                                state.suspended_count = 0;
                            } else {
                                state.suspended_count =
                                    state.suspended_count.saturating_sub(ready.len());
                                let reloaded = ready.len();
                                state.buffer.extend(ready);
                                // This reader takes one; the rest can go
                                // to parked readers.
                                state.wake(reloaded.saturating_sub(1));
                            }
                        }
                        if state.shutdown {
                            return Err(QueueError::Shutdown);
                        }
                        // Writes that landed during the reload sit in the
                        // buffer; take one before parking.
                        if let Some(job) = state.buffer.pop_front() {
                            return Ok(job);
                        }
                        if failed {
                            // Park as if the queue were empty; the next
                            // write wakes us and the next read attempt
                            // retries the load.
                            let (tx, rx) = oneshot::channel();
                            state.parked.push_back(tx);
                            Some(rx)
                        } else {
                            None
                        }
                    };
                    match park {
                        Some(rx) => {
                            if rx.await.is_err() {
                                return Err(QueueError::Shutdown);
                            }
                            // Woken: loop back and contend for the buffer.
                        }
                        None => {
                            // Successful reload fully consumed elsewhere,
                            // or count drift cleared; loop around.
                        }
                    }
                }
                ReadStep::Park(rx) => {
                    if rx.await.is_err() {
                        return Err(QueueError::Shutdown);
                    }
                    // Woken by a write; loop back to pop or reload.
                }
            }
        }
    }

    /// One retry per read attempt; a still-failing load parks the reader
    /// as if the queue were empty.
    async fn reload(&self, batch: usize) -> Option<Vec<Job>> {
        for attempt in 0..2 {
            let result = match self.activity_type() {
                Some(activity_type) => self.store.load_suspended(activity_type, batch).await,
                None => {
                    self.store
                        .load_suspended_excluding(&self.exclude_types, batch)
                        .await
                }
            };
            match result {
                Ok(jobs) => return Some(jobs),
                Err(err) => {
                    warn!(
                        activity_type = self.activity_type().unwrap_or("<default>"),
                        attempt,
                        %err,
                        "suspended reload failed"
                    );
                }
            }
        }
        None
    }

    /// Fail parked readers and refuse further reads and writes.
    pub fn shutdown(&self) {
        let parked = {
            let mut state = self.state.lock().unwrap();
            state.shutdown = true;
            std::mem::take(&mut state.parked)
        };
        // Dropping the senders completes parked reads with the shutdown
        // sentinel.
        drop(parked);
    }

    /// In-memory buffer size; durable-only jobs are not included.
    pub fn buffered(&self) -> usize {
        self.state.lock().unwrap().buffer.len()
    }

    pub fn suspended_count(&self) -> usize {
        self.state.lock().unwrap().suspended_count
    }
}
