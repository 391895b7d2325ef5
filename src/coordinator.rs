//! Per-job serialization of state-changing callbacks.
//!
//! For a given job id, at most one callback is in flight; later callbacks
//! queue behind it in submission order. Every transition and continuation
//! update runs through a coordinator lane, which gives the mutator its
//! single-writer-per-id guarantee: a store write issued from one lane
//! action is durable before the next action for that id begins.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use std::future::Future;

pub struct JobCoordinator {
    /// Presence of an entry means a driver task owns the lane; the deque
    /// holds actions waiting behind the one in flight.
    lanes: Mutex<HashMap<String, VecDeque<BoxFuture<'static, ()>>>>,
}

impl JobCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lanes: Mutex::new(HashMap::new()),
        })
    }

    /// Enqueue `action` on `job_id`'s serial lane. Returns immediately;
    /// the action runs on the lane's driver task. Actions must handle
    /// their own errors — nothing escapes a lane.
    pub fn run<F>(self: &Arc<Self>, job_id: &str, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let boxed: BoxFuture<'static, ()> = Box::pin(action);
        {
            let mut lanes = self.lanes.lock().unwrap();
            if let Some(lane) = lanes.get_mut(job_id) {
                lane.push_back(boxed);
                return;
            }
            lanes.insert(job_id.to_string(), VecDeque::new());
        }

        let coordinator = Arc::clone(self);
        let id = job_id.to_string();
        tokio::spawn(async move {
            let mut current = boxed;
            loop {
                current.await;
                let next = {
                    let mut lanes = coordinator.lanes.lock().unwrap();
                    match lanes.get_mut(&id).and_then(|lane| lane.pop_front()) {
                        Some(next) => next,
                        None => {
                            lanes.remove(&id);
                            break;
                        }
                    }
                };
                current = next;
            }
        });
    }

    /// True when no lane has an action in flight or queued.
    pub fn is_idle(&self) -> bool {
        self.lanes.lock().unwrap().is_empty()
    }

    /// Wait until every lane has drained. Intended for shutdown and
    /// tests; new work submitted while waiting extends the wait.
    pub async fn wait_idle(&self) {
        while !self.is_idle() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn actions_for_one_id_run_in_submission_order() {
        let coordinator = JobCoordinator::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let log = log.clone();
            coordinator.run("job-1", async move {
                // A later action finishing faster must still observe order.
                tokio::time::sleep(Duration::from_millis(10 - i)).await;
                log.lock().unwrap().push(i);
            });
        }
        coordinator.wait_idle().await;
        assert_eq!(*log.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn at_most_one_action_in_flight_per_id() {
        let coordinator = JobCoordinator::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            coordinator.run("job-1", async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        }
        coordinator.wait_idle().await;
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_ids_do_not_block_each_other() {
        let coordinator = JobCoordinator::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        // job-1's lane parks until job-2's action releases it.
        coordinator.run("job-1", async move {
            let _ = rx.await;
        });
        coordinator.run("job-2", async move {
            let _ = tx.send(());
        });
        coordinator.wait_idle().await;
    }
}
