//! Converts returned activity graphs into continuation trees and child
//! jobs.
//!
//! A pure transformer: no persistence, no dispatch. Each `Call` leaf
//! becomes one child job in `Created` state; compositions become the
//! matching continuation nodes, nesting as the activity nests.

use thiserror::Error;

use crate::activity::Activity;
use crate::continuation::Continuation;
use crate::job::Job;

#[derive(Debug, Error)]
pub enum ConvertError {
    /// User code produced a composition with no children.
    #[error("activity composition has no children")]
    EmptyComposition,
}

/// The flat child-job list plus the wait structure over it.
#[derive(Debug)]
pub struct ConvertedActivity {
    pub continuation: Continuation,
    pub jobs: Vec<Job>,
}

/// Convert the activity graph a running job returned into the child jobs
/// and the continuation tree its parent will wait on.
pub fn convert(activity: &Activity, parent: &Job) -> Result<ConvertedActivity, ConvertError> {
    let mut jobs = Vec::new();
    let continuation = build(activity, parent, &mut jobs)?;
    Ok(ConvertedActivity { continuation, jobs })
}

fn build(
    activity: &Activity,
    parent: &Job,
    jobs: &mut Vec<Job>,
) -> Result<Continuation, ConvertError> {
    match activity {
        Activity::Call(call) => {
            let job = Job::child_of(parent, call.clone());
            let leaf = Continuation::single(job.id.as_str());
            jobs.push(job);
            Ok(leaf)
        }
        Activity::Parallel {
            children,
            on_any_failed,
        } => {
            let nodes = build_children(children, parent, jobs)?;
            Ok(Continuation::all(nodes, *on_any_failed, false))
        }
        Activity::Sequence(children) => {
            let nodes = build_children(children, parent, jobs)?;
            Ok(Continuation::sequence(nodes))
        }
        Activity::Any(children) => {
            let nodes = build_children(children, parent, jobs)?;
            Ok(Continuation::any(nodes))
        }
    }
}

fn build_children(
    children: &[Activity],
    parent: &Job,
    jobs: &mut Vec<Job>,
) -> Result<Vec<Continuation>, ConvertError> {
    if children.is_empty() {
        return Err(ConvertError::EmptyComposition);
    }
    children
        .iter()
        .map(|child| build(child, parent, jobs))
        .collect()
}
