//! Job queue behavior: bounded admission, suspend-to-store overflow,
//! reload-on-drain, parked readers, and shutdown.


use std::sync::Arc;
use std::time::Duration;

use foreman::events::{EventStream, OrchestratorEvent};
use foreman::job::JobStatus;
use foreman::queue::{JobQueue, QueueError};
use foreman::settings::{ActivityConfig, RecoverPolicy};
use foreman::store::JobStore;

use test_helpers::{job_with_id, ready_job, FlakyStore};

fn fast_recover() -> RecoverPolicy {
    RecoverPolicy {
        max_attempts: 2,
        base_delay_ms: 1,
        max_delay_ms: 5,
    }
}

fn bounded_queue(store: &Arc<FlakyStore>, activity_type: &str, max: usize) -> JobQueue {
    let config = ActivityConfig::for_type(activity_type).with_max_queue_length(max);
    JobQueue::new(
        config,
        Vec::new(),
        fast_recover(),
        store.clone(),
        EventStream::new(16),
    )
}

fn default_queue(store: &Arc<FlakyStore>, exclude: Vec<String>) -> JobQueue {
    JobQueue::new(
        ActivityConfig::default(),
        exclude,
        fast_recover(),
        store.clone(),
        EventStream::new(16),
    )
}

#[tokio::test]
async fn throttled_initialize_partitions_candidates() {
    let store = FlakyStore::new();
    let queue = bounded_queue(&store, "s", 1);

    let job_a = ready_job("job-a", "s");
    let job_b = ready_job("job-b", "int");
    let rest = queue
        .initialize(vec![job_a.clone(), job_b.clone()])
        .await
        .unwrap();

    assert_eq!(rest.len(), 1, "only the non-matching candidate comes back");
    assert_eq!(rest[0].id, "job-b");
    assert_eq!(store.count_suspended_calls(), 1);

    let read = with_timeout!(1_000, { queue.read().await.unwrap() });
    assert_eq!(read.id, "job-a");
}

#[tokio::test]
async fn initialize_twice_fails() {
    let store = FlakyStore::new();
    let queue = bounded_queue(&store, "s", 1);
    queue.initialize(Vec::new()).await.unwrap();
    let err = queue.initialize(Vec::new()).await;
    assert!(matches!(err, Err(QueueError::AlreadyInitialized)));
}

#[tokio::test]
async fn use_before_initialize_fails() {
    let store = FlakyStore::new();
    let queue = bounded_queue(&store, "s", 1);
    assert!(matches!(
        queue.write(ready_job("job-a", "s")).await,
        Err(QueueError::NotInitialized)
    ));
    assert!(matches!(
        queue.read().await,
        Err(QueueError::NotInitialized)
    ));
}

#[tokio::test]
async fn overflow_suspends_to_store() {
    let store = FlakyStore::new();
    let queue = bounded_queue(&store, "s", 1);
    queue.initialize(Vec::new()).await.unwrap();

    queue.write(ready_job("job-a", "s")).await.unwrap();
    queue.write(ready_job("job-b", "s")).await.unwrap();

    assert_eq!(queue.buffered(), 1);
    assert_eq!(queue.suspended_count(), 1);
    let stored = store.stored();
    let spilled: Vec<_> = stored.iter().filter(|j| j.id == "job-b").collect();
    assert_eq!(spilled.len(), 1, "one store call for the spilled job");
    assert!(spilled[0].suspended);
    // The spilled job is durable with the flag set.
    let durable = store.load("job-b").await.unwrap();
    assert!(durable.suspended);
}

#[tokio::test]
async fn buffer_never_exceeds_bound() {
    let store = FlakyStore::new();
    let queue = bounded_queue(&store, "s", 3);
    queue.initialize(Vec::new()).await.unwrap();

    for i in 0..10 {
        queue.write(ready_job(&format!("job-{i}"), "s")).await.unwrap();
        assert!(queue.buffered() <= 3);
    }
    assert_eq!(queue.buffered(), 3);
    assert_eq!(queue.suspended_count(), 7);
}

#[tokio::test]
async fn write_spills_while_suspended_pool_nonempty() {
    let store = FlakyStore::new();
    // A suspended job is already in the store from a previous lifetime.
    let mut old = ready_job("job-old", "s");
    old.suspended = true;
    old.created_at_ms = 1_000;
    store.seed(&old).await;

    let queue = bounded_queue(&store, "s", 4);
    queue.initialize(Vec::new()).await.unwrap();
    assert_eq!(queue.suspended_count(), 1);

    // Despite buffer headroom, new writes spill so they cannot jump
    // ahead of the suspended job.
    let mut newer = ready_job("job-new", "s");
    newer.created_at_ms = 2_000;
    queue.write(newer).await.unwrap();
    assert_eq!(queue.buffered(), 0);
    assert_eq!(queue.suspended_count(), 2);

    // Reads drain in suspension order.
    let first = with_timeout!(1_000, { queue.read().await.unwrap() });
    assert_eq!(first.id, "job-old");
    let second = with_timeout!(1_000, { queue.read().await.unwrap() });
    assert_eq!(second.id, "job-new");
}

#[tokio::test]
async fn drain_reloads_suspended_jobs() {
    let store = FlakyStore::new();
    let mut suspended = ready_job("job-x", "s");
    suspended.suspended = true;
    store.seed(&suspended).await;

    let queue = bounded_queue(&store, "s", 1);
    queue
        .initialize(vec![ready_job("job-a", "s")])
        .await
        .unwrap();

    let first = with_timeout!(1_000, { queue.read().await.unwrap() });
    assert_eq!(first.id, "job-a");

    let second = with_timeout!(1_000, { queue.read().await.unwrap() });
    assert_eq!(second.id, "job-x");
    assert!(!second.suspended, "suspended flag cleared at return time");
    assert_eq!(store.load_suspended_calls(), 1);
    // The cleared flag is persisted too.
    assert!(!store.load("job-x").await.unwrap().suspended);
}

#[tokio::test]
async fn reload_failure_is_retried_on_next_read() {
    let store = FlakyStore::new();
    let mut suspended = ready_job("job-x", "s");
    suspended.suspended = true;
    store.seed(&suspended).await;
    // First load fails; the in-read retry succeeds.
    store.fail_suspended_loads(1);

    let queue = bounded_queue(&store, "s", 1);
    queue
        .initialize(vec![ready_job("job-a", "s")])
        .await
        .unwrap();

    let first = with_timeout!(1_000, { queue.read().await.unwrap() });
    assert_eq!(first.id, "job-a");
    let second = with_timeout!(1_000, { queue.read().await.unwrap() });
    assert_eq!(second.id, "job-x");
}

#[tokio::test]
async fn reload_exhaustion_parks_until_next_write() {
    let store = FlakyStore::new();
    let mut suspended = ready_job("job-x", "s");
    suspended.suspended = true;
    suspended.created_at_ms = 1_000;
    store.seed(&suspended).await;
    // Both the load and its retry fail; the reader parks.
    store.fail_suspended_loads(2);

    let queue = Arc::new(bounded_queue(&store, "s", 2));
    queue.initialize(Vec::new()).await.unwrap();

    let reader = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.read().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!reader.is_finished(), "reader parks after exhausted reload");

    // The next write wakes the parked reader, whose retried reload now
    // succeeds; the older suspended job comes out first.
    let mut newer = ready_job("job-w", "s");
    newer.created_at_ms = 2_000;
    queue.write(newer).await.unwrap();
    let read = with_timeout!(1_000, { reader.await.unwrap().unwrap() });
    assert_eq!(read.id, "job-x");
}

#[tokio::test]
async fn reader_parks_until_write_arrives() {
    let store = FlakyStore::new();
    let queue = Arc::new(bounded_queue(&store, "s", 2));
    queue.initialize(Vec::new()).await.unwrap();

    let reader = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.read().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!reader.is_finished());

    queue.write(ready_job("job-a", "s")).await.unwrap();
    let read = with_timeout!(1_000, { reader.await.unwrap().unwrap() });
    assert_eq!(read.id, "job-a");
    assert_eq!(queue.buffered(), 0, "the woken reader drained the buffer");
}

#[tokio::test]
async fn fifo_among_admitted_items() {
    let store = FlakyStore::new();
    let queue = bounded_queue(&store, "s", 5);
    queue.initialize(Vec::new()).await.unwrap();
    for i in 0..5 {
        queue.write(ready_job(&format!("job-{i}"), "s")).await.unwrap();
    }
    for i in 0..5 {
        let read = with_timeout!(1_000, { queue.read().await.unwrap() });
        assert_eq!(read.id, format!("job-{i}"));
    }
}

#[tokio::test]
async fn suspend_store_failure_is_surfaced_not_fatal() {
    let store = FlakyStore::new();
    let events = EventStream::new(16);
    let mut rx = events.subscribe();
    let config = ActivityConfig::for_type("s").with_max_queue_length(1);
    let queue = JobQueue::new(
        config,
        Vec::new(),
        fast_recover(),
        store.clone(),
        events,
    );
    queue.initialize(Vec::new()).await.unwrap();

    queue.write(ready_job("job-a", "s")).await.unwrap();
    store.fail_stores(1, 0);
    queue.write(ready_job("job-b", "s")).await.unwrap();

    // The spill failed: not counted, but surfaced for operators.
    assert_eq!(queue.suspended_count(), 0);
    match rx.try_recv() {
        Ok(OrchestratorEvent::SuspendStoreFailed { id }) => assert_eq!(id, "job-b"),
        other => panic!("expected suspend-store-failed event, got {other:?}"),
    }
}

#[tokio::test]
async fn default_queue_never_suspends() {
    let store = FlakyStore::new();
    let queue = default_queue(&store, vec!["s".to_string()]);
    queue.initialize(Vec::new()).await.unwrap();
    for i in 0..100 {
        queue
            .write(ready_job(&format!("job-{i}"), "anything"))
            .await
            .unwrap();
    }
    assert_eq!(queue.buffered(), 100);
    assert_eq!(queue.suspended_count(), 0);
    assert!(store.stored().is_empty(), "no spill writes for the default queue");
}

#[tokio::test]
async fn default_queue_reloads_leftover_suspended_jobs() {
    let store = FlakyStore::new();
    // Left suspended by a previous process lifetime, not owned by any
    // typed queue.
    let mut leftover = ready_job("job-x", "mailer");
    leftover.suspended = true;
    store.seed(&leftover).await;

    let queue = default_queue(&store, vec!["s".to_string()]);
    queue.initialize(Vec::new()).await.unwrap();
    assert_eq!(queue.suspended_count(), 1);

    let read = with_timeout!(1_000, { queue.read().await.unwrap() });
    assert_eq!(read.id, "job-x");
    assert!(!read.suspended);
}

#[tokio::test]
async fn shutdown_completes_parked_readers() {
    let store = FlakyStore::new();
    let queue = Arc::new(bounded_queue(&store, "s", 2));
    queue.initialize(Vec::new()).await.unwrap();

    let reader = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.read().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.shutdown();

    let result = with_timeout!(1_000, { reader.await.unwrap() });
    assert!(matches!(result, Err(QueueError::Shutdown)));
    assert!(matches!(
        queue.read().await,
        Err(QueueError::Shutdown)
    ));
}

#[tokio::test]
async fn suspended_jobs_reload_in_insertion_order() {
    let store = FlakyStore::new();
    let queue = bounded_queue(&store, "s", 2);
    queue.initialize(Vec::new()).await.unwrap();

    // Fill the buffer, then spill three more in order.
    for i in 0..5 {
        let mut job = job_with_id(&format!("job-{i}"), "s", JobStatus::Ready);
        job.created_at_ms = 1_000 + i as i64;
        queue.write(job).await.unwrap();
    }
    let mut seen = Vec::new();
    for _ in 0..5 {
        let job = with_timeout!(1_000, { queue.read().await.unwrap() });
        seen.push(job.id);
    }
    let expected: Vec<String> = (0..5).map(|i| format!("job-{i}")).collect();
    assert_eq!(seen, expected);
}
