//! Declarative descriptions of user work.
//!
//! An [`Activity`] is what user code hands back to the orchestrator: either
//! a single callable target or a composition of further activities. The
//! converter in [`convert`](crate::convert) turns a returned activity graph
//! into child jobs plus the continuation tree the parent waits on.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A single callable target: which method on which activity type, with
/// what arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityCall {
    pub activity_type: String,
    pub method: String,
    pub arguments: JsonValue,
    /// Per-call override of the configured retry delay.
    pub retry_delay_ms: Option<u64>,
}

impl ActivityCall {
    pub fn new(activity_type: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            activity_type: activity_type.into(),
            method: method.into(),
            arguments: JsonValue::Null,
            retry_delay_ms: None,
        }
    }

    pub fn with_arguments(mut self, arguments: JsonValue) -> Self {
        self.arguments = arguments;
        self
    }
}

/// A declarative description of further work, returned by a running
/// activity. Compositions nest arbitrarily; cycles cannot be expressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Activity {
    /// One call on one activity type.
    Call(ActivityCall),
    /// Run all children concurrently. With `on_any_failed` the wait fails
    /// as soon as one child fails; otherwise all children run to a
    /// terminal state first.
    Parallel {
        children: Vec<Activity>,
        on_any_failed: bool,
    },
    /// Run children one after another; each child starts only when the
    /// previous one completed.
    Sequence(Vec<Activity>),
    /// Run all children concurrently; the first completion wins.
    Any(Vec<Activity>),
}

impl Activity {
    pub fn call(activity_type: impl Into<String>, method: impl Into<String>) -> Self {
        Activity::Call(ActivityCall::new(activity_type, method))
    }

    pub fn parallel(children: Vec<Activity>) -> Self {
        Activity::Parallel {
            children,
            on_any_failed: false,
        }
    }

    pub fn parallel_fail_fast(children: Vec<Activity>) -> Self {
        Activity::Parallel {
            children,
            on_any_failed: true,
        }
    }

    pub fn any(children: Vec<Activity>) -> Self {
        Activity::Any(children)
    }

    /// Sequence `self` before `next`. Chaining onto an existing sequence
    /// extends it rather than nesting.
    pub fn then(self, next: Activity) -> Self {
        match self {
            Activity::Sequence(mut children) => {
                children.push(next);
                Activity::Sequence(children)
            }
            other => Activity::Sequence(vec![other, next]),
        }
    }
}
