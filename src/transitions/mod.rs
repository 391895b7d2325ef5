//! Transitions between job lifecycle states.
//!
//! Each transition is a small strategy over the shared collaborator set,
//! split across submodules:
//!
//! - `end`: drive a finished job through `ReadyToComplete` to `Completed`
//! - `failed`: interpret a user-code failure under the retry policy
//! - `poisoned`: exhausted budgets, `ReadyToPoison` to `Poisoned`
//! - `waiting`: a returned activity graph becomes children plus a
//!   continuation on the parent
//! - `children`: child terminal notifications and liveness verification
//!
//! Every edge runs on the job's coordinator lane and persists through the
//! recoverable action; no error escapes a transition.

mod children;
mod end;
mod failed;
mod poisoned;
mod waiting;

use std::sync::Arc;

use crate::coordinator::JobCoordinator;
use crate::dispatch::ContinuationDispatcher;
use crate::mutator::JobMutator;
use crate::recover::RecoverableAction;
use crate::router::JobRouter;
use crate::settings::OrchestratorConfig;
use crate::store::JobStore;

pub struct Transitions {
    pub(crate) config: OrchestratorConfig,
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) mutator: Arc<JobMutator>,
    pub(crate) recover: Arc<RecoverableAction>,
    pub(crate) coordinator: Arc<JobCoordinator>,
    pub(crate) router: Arc<JobRouter>,
    pub(crate) dispatcher: Arc<ContinuationDispatcher>,
}

impl Transitions {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn JobStore>,
        mutator: Arc<JobMutator>,
        recover: Arc<RecoverableAction>,
        coordinator: Arc<JobCoordinator>,
        router: Arc<JobRouter>,
        dispatcher: Arc<ContinuationDispatcher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            mutator,
            recover,
            coordinator,
            router,
            dispatcher,
        })
    }

    /// Enqueue a child-terminal notification on the parent's coordinator
    /// lane. Fire-and-forget: the lane action handles its own failures.
    pub(crate) fn notify_parent(
        self: &Arc<Self>,
        parent_id: String,
        child_id: String,
        completed: bool,
    ) {
        let transitions = Arc::clone(self);
        let lane = parent_id.clone();
        self.coordinator.run(&lane, async move {
            transitions
                .child_reached_terminal(&parent_id, &child_id, completed)
                .await;
        });
    }
}
