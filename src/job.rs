//! Job records and the status transition graph.
//!
//! A `Job` is the durable unit of work the orchestrator schedules. Every
//! mutation after creation goes through the [`JobMutator`](crate::mutator::JobMutator),
//! which persists the change before the in-memory copy is considered
//! authoritative.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::activity::ActivityCall;
use crate::continuation::Continuation;

/// Current epoch time in milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Lifecycle states of a job.
///
/// `Completed` and `Poisoned` are terminal. `Failed` is not: a failed job
/// re-enters `Ready` while its retry budget lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Created,
    Ready,
    Running,
    WaitingForChildren,
    ReadyToComplete,
    ReadyToPoison,
    Completed,
    Failed,
    Poisoned,
}

impl JobStatus {
    /// True for states no transition leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Poisoned)
    }

    /// Whether `self -> next` is a legal edge of the lifecycle graph.
    ///
    /// `Running -> Ready` is the boot-recovery edge: a job found `Running`
    /// after a crash is redispatched (at-least-once semantics).
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Created, Ready) => true,
            (Ready, Running) => true,
            (Running, WaitingForChildren) => true,
            (Running, ReadyToComplete) => true,
            (Running, ReadyToPoison) => true,
            (Running, Failed) => true,
            (Running, Ready) => true,
            (WaitingForChildren, ReadyToComplete) => true,
            (WaitingForChildren, ReadyToPoison) => true,
            (ReadyToComplete, Completed) => true,
            (ReadyToPoison, Poisoned) => true,
            (Failed, Ready) => true,
            (Failed, ReadyToPoison) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The durable, schedulable record derived from an activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    /// Shared with the root of this job's tree; used to find siblings.
    pub correlation_id: String,
    /// Parent job id, `None` for a root.
    pub parent_id: Option<String>,
    pub root_id: String,
    /// Key of the user activity this job targets.
    pub activity_type: String,
    pub method: String,
    pub arguments: JsonValue,
    pub status: JobStatus,
    /// Times this job has been handed to the activity runtime.
    pub dispatch_count: u32,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub poison_retry_count: u32,
    /// True when the job is durable-only, spilled out of every in-memory
    /// buffer.
    pub suspended: bool,
    /// Wait structure this job is blocked on; non-null only while
    /// `status == WaitingForChildren`.
    pub continuation: Option<Continuation>,
    pub created_at_ms: i64,
}

impl Job {
    /// Build a root job in `Created` state from a submitted call.
    pub fn root(call: ActivityCall, retry_delay_ms: u64) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            correlation_id: id.clone(),
            root_id: id.clone(),
            id,
            parent_id: None,
            activity_type: call.activity_type,
            method: call.method,
            arguments: call.arguments,
            status: JobStatus::Created,
            dispatch_count: 0,
            retry_count: 0,
            retry_delay_ms: call.retry_delay_ms.unwrap_or(retry_delay_ms),
            poison_retry_count: 0,
            suspended: false,
            continuation: None,
            created_at_ms: now_epoch_ms(),
        }
    }

    /// Build a child job in `Created` state, inheriting the parent's
    /// correlation and root ids.
    pub fn child_of(parent: &Job, call: ActivityCall) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            correlation_id: parent.correlation_id.clone(),
            parent_id: Some(parent.id.clone()),
            root_id: parent.root_id.clone(),
            activity_type: call.activity_type,
            method: call.method,
            arguments: call.arguments,
            status: JobStatus::Created,
            dispatch_count: 0,
            retry_count: 0,
            retry_delay_ms: call.retry_delay_ms.unwrap_or(0),
            poison_retry_count: 0,
            suspended: false,
            continuation: None,
            created_at_ms: now_epoch_ms(),
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            activity_type: self.activity_type.clone(),
            method: self.method.clone(),
            status: self.status,
            dispatch_count: self.dispatch_count,
        }
    }
}

/// Advisory record published on every successful mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub activity_type: String,
    pub method: String,
    pub status: JobStatus,
    pub dispatch_count: u32,
}
