//! Recoverable-action behavior: bounded retry, at-most-once follow-up,
//! and the poison marker on exhaustion.


use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use foreman::events::EventStream;
use foreman::job::JobStatus;
use foreman::recover::RecoverableAction;
use foreman::settings::RecoverPolicy;
use foreman::store::JobStore;

use test_helpers::{job_with_id, FlakyStore};

fn action(store: &Arc<FlakyStore>, max_attempts: u32) -> RecoverableAction {
    let store_dyn: Arc<dyn JobStore> = store.clone();
    RecoverableAction::new(
        RecoverPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
        },
        store_dyn,
        EventStream::new(16),
    )
}

#[tokio::test]
async fn body_is_retried_until_it_succeeds() {
    let store = FlakyStore::new();
    let recover = action(&store, 5);
    let attempts = Arc::new(AtomicUsize::new(0));
    let outcomes = Arc::new(Mutex::new(Vec::new()));

    let body_attempts = attempts.clone();
    let then_outcomes = outcomes.clone();
    recover
        .run(
            "job-1",
            || {
                let attempts = body_attempts.clone();
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(42)
                    }
                }
            },
            |value| async move {
                then_outcomes.lock().unwrap().push(value);
            },
        )
        .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(*outcomes.lock().unwrap(), vec![42]);
}

#[tokio::test]
async fn follow_up_runs_at_most_once() {
    let store = FlakyStore::new();
    let recover = action(&store, 3);
    let follow_ups = Arc::new(AtomicUsize::new(0));

    let counter = follow_ups.clone();
    recover
        .run(
            "job-1",
            || async { Ok::<_, String>(()) },
            |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

    assert_eq!(follow_ups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhaustion_marks_the_job_poisoned_and_skips_follow_up() {
    let store = FlakyStore::new();
    store.seed(&job_with_id("job-1", "s", JobStatus::Running)).await;
    let recover = action(&store, 2);
    let follow_ups = Arc::new(AtomicUsize::new(0));

    let counter = follow_ups.clone();
    recover
        .run(
            "job-1",
            || async { Err::<(), _>("permanent".to_string()) },
            |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

    assert_eq!(follow_ups.load(Ordering::SeqCst), 0);
    let durable = store.load("job-1").await.unwrap();
    assert_eq!(durable.status, JobStatus::Poisoned);
}

#[tokio::test]
async fn lenient_exhaustion_does_not_poison() {
    let store = FlakyStore::new();
    store.seed(&job_with_id("job-1", "s", JobStatus::Running)).await;
    let recover = action(&store, 2);

    let result = recover
        .run_lenient("job-1", || async {
            Err::<(), _>("permanent".to_string())
        })
        .await;

    assert!(result.is_none());
    let durable = store.load("job-1").await.unwrap();
    assert_eq!(durable.status, JobStatus::Running, "no poison marker");
}
