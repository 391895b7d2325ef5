//! Continuation trees: the persisted wait structure linking a parent job
//! to the children whose completion unblocks it.
//!
//! The tree is a tagged variant, never a graph: `Single` leaves reference
//! one child job each, composites (`All`, `Any`, `Sequence`) aggregate
//! their children's outcomes. Composite statuses are recomputed bottom-up
//! by [`Continuation::evaluate`]; the dispatcher advances the tree by
//! asking [`Continuation::pending`] which leaves must be scheduled next.

use serde::{Deserialize, Serialize};

/// Status of one continuation node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContinuationStatus {
    /// Not yet dispatched (leaf) or still waiting on children (composite).
    WaitingForChildren,
    /// Leaf has been dispatched; the referenced child is scheduled.
    Ready,
    Completed,
    Failed,
}

impl ContinuationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ContinuationStatus::Completed | ContinuationStatus::Failed
        )
    }
}

/// One node of a continuation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Continuation {
    /// Waits on a single child job.
    Single {
        id: String,
        status: ContinuationStatus,
    },
    /// Completed when all children complete. With `on_any_failed`, fails
    /// on the first child failure; with `on_all_failed`, fails only when
    /// every child failed; with neither, fails after all children reach a
    /// terminal state if any of them failed.
    All {
        children: Vec<Continuation>,
        status: ContinuationStatus,
        on_any_failed: bool,
        on_all_failed: bool,
    },
    /// Completed on the first child completion; failed only when every
    /// child failed. Losers are not cancelled, their results are ignored.
    Any {
        children: Vec<Continuation>,
        status: ContinuationStatus,
    },
    /// Children run in declaration order; each child is dispatched only
    /// after the previous one completed. A child failure fails the whole
    /// sequence.
    Sequence {
        children: Vec<Continuation>,
        status: ContinuationStatus,
    },
}

impl Continuation {
    pub fn single(id: impl Into<String>) -> Self {
        Continuation::Single {
            id: id.into(),
            status: ContinuationStatus::WaitingForChildren,
        }
    }

    pub fn all(children: Vec<Continuation>, on_any_failed: bool, on_all_failed: bool) -> Self {
        Continuation::All {
            children,
            status: ContinuationStatus::WaitingForChildren,
            on_any_failed,
            on_all_failed,
        }
    }

    pub fn any(children: Vec<Continuation>) -> Self {
        Continuation::Any {
            children,
            status: ContinuationStatus::WaitingForChildren,
        }
    }

    pub fn sequence(children: Vec<Continuation>) -> Self {
        Continuation::Sequence {
            children,
            status: ContinuationStatus::WaitingForChildren,
        }
    }

    pub fn status(&self) -> ContinuationStatus {
        match self {
            Continuation::Single { status, .. }
            | Continuation::All { status, .. }
            | Continuation::Any { status, .. }
            | Continuation::Sequence { status, .. } => *status,
        }
    }

    /// True once the root has reached a terminal status and the parent can
    /// be republished.
    pub fn is_satisfied(&self) -> bool {
        self.status().is_terminal()
    }

    /// The minimal set of `Single` leaves whose referenced child must be
    /// scheduled next to advance the tree. `All` and `Any` expose every
    /// undispatched leaf at once; `Sequence` exposes only the leaves of
    /// its first non-completed child.
    pub fn pending(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_pending(&mut out);
        out
    }

    fn collect_pending(&self, out: &mut Vec<String>) {
        if self.status().is_terminal() {
            return;
        }
        match self {
            Continuation::Single { id, status } => {
                if *status == ContinuationStatus::WaitingForChildren {
                    out.push(id.clone());
                }
            }
            Continuation::All { children, .. } | Continuation::Any { children, .. } => {
                for child in children {
                    child.collect_pending(out);
                }
            }
            Continuation::Sequence { children, .. } => {
                for child in children {
                    match child.status() {
                        ContinuationStatus::Completed => continue,
                        ContinuationStatus::Failed => return,
                        _ => {
                            child.collect_pending(out);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Mark the leaf waiting on `id` as dispatched. Returns false when no
    /// undispatched leaf references `id`.
    pub fn mark_ready(&mut self, id: &str) -> bool {
        match self {
            Continuation::Single {
                id: leaf_id,
                status,
            } => {
                if leaf_id == id && *status == ContinuationStatus::WaitingForChildren {
                    *status = ContinuationStatus::Ready;
                    true
                } else {
                    false
                }
            }
            Continuation::All { children, .. }
            | Continuation::Any { children, .. }
            | Continuation::Sequence { children, .. } => {
                children.iter_mut().any(|c| c.mark_ready(id))
            }
        }
    }

    /// Record a child's terminal outcome on its leaf and re-evaluate the
    /// tree. Returns false when no non-terminal leaf references `id` (a
    /// stale or duplicate notification).
    pub fn record_result(&mut self, id: &str, completed: bool) -> bool {
        if !self.record_leaf(id, completed) {
            return false;
        }
        self.evaluate();
        true
    }

    fn record_leaf(&mut self, id: &str, completed: bool) -> bool {
        match self {
            Continuation::Single {
                id: leaf_id,
                status,
            } => {
                if leaf_id == id && !status.is_terminal() {
                    *status = if completed {
                        ContinuationStatus::Completed
                    } else {
                        ContinuationStatus::Failed
                    };
                    true
                } else {
                    false
                }
            }
            Continuation::All { children, .. }
            | Continuation::Any { children, .. }
            | Continuation::Sequence { children, .. } => {
                children.iter_mut().any(|c| c.record_leaf(id, completed))
            }
        }
    }

    /// Recompute composite statuses bottom-up. Leaf statuses are inputs,
    /// set by `mark_ready`/`record_result`.
    pub fn evaluate(&mut self) {
        match self {
            Continuation::Single { .. } => {}
            Continuation::All {
                children,
                status,
                on_any_failed,
                on_all_failed,
            } => {
                for child in children.iter_mut() {
                    child.evaluate();
                }
                let any_failed = children
                    .iter()
                    .any(|c| c.status() == ContinuationStatus::Failed);
                let all_terminal = children.iter().all(|c| c.status().is_terminal());
                let all_failed = children
                    .iter()
                    .all(|c| c.status() == ContinuationStatus::Failed);
                *status = if *on_any_failed && any_failed {
                    ContinuationStatus::Failed
                } else if all_terminal {
                    let failed = if *on_all_failed { all_failed } else { any_failed };
                    if failed {
                        ContinuationStatus::Failed
                    } else {
                        ContinuationStatus::Completed
                    }
                } else {
                    ContinuationStatus::WaitingForChildren
                };
            }
            Continuation::Any { children, status } => {
                for child in children.iter_mut() {
                    child.evaluate();
                }
                let any_completed = children
                    .iter()
                    .any(|c| c.status() == ContinuationStatus::Completed);
                let all_failed = children
                    .iter()
                    .all(|c| c.status() == ContinuationStatus::Failed);
                *status = if any_completed {
                    ContinuationStatus::Completed
                } else if all_failed {
                    ContinuationStatus::Failed
                } else {
                    ContinuationStatus::WaitingForChildren
                };
            }
            Continuation::Sequence { children, status } => {
                for child in children.iter_mut() {
                    child.evaluate();
                }
                let any_failed = children
                    .iter()
                    .any(|c| c.status() == ContinuationStatus::Failed);
                let all_completed = children
                    .iter()
                    .all(|c| c.status() == ContinuationStatus::Completed);
                *status = if any_failed {
                    ContinuationStatus::Failed
                } else if all_completed {
                    ContinuationStatus::Completed
                } else {
                    ContinuationStatus::WaitingForChildren
                };
            }
        }
    }

    /// Ids of leaves currently marked `Ready`, i.e. dispatched but not yet
    /// resolved. Used by liveness verification to reconcile against the
    /// store after a partial dispatch crash.
    pub fn ready_leaves(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_ready(&mut out);
        out
    }

    fn collect_ready(&self, out: &mut Vec<String>) {
        match self {
            Continuation::Single { id, status } => {
                if *status == ContinuationStatus::Ready {
                    out.push(id.clone());
                }
            }
            Continuation::All { children, .. }
            | Continuation::Any { children, .. }
            | Continuation::Sequence { children, .. } => {
                for child in children {
                    child.collect_ready(out);
                }
            }
        }
    }

    /// Every child job id referenced anywhere in the tree.
    pub fn leaf_ids(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_leaf_ids(&mut out);
        out
    }

    fn collect_leaf_ids(&self, out: &mut Vec<String>) {
        match self {
            Continuation::Single { id, .. } => out.push(id.clone()),
            Continuation::All { children, .. }
            | Continuation::Any { children, .. }
            | Continuation::Sequence { children, .. } => {
                for child in children {
                    child.collect_leaf_ids(out);
                }
            }
        }
    }
}
