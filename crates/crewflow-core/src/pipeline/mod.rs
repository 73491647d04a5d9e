//! The pipeline orchestrator.
//!
//! A [`Pipeline`] owns a frozen task list, an agent registry and a token
//! budget. [`Pipeline::run`] schedules tasks according to the
//! [`ProcessModel`] and always returns a [`RunOutcome`]; runtime failures are
//! structured statuses, never errors.

pub mod builder;
mod executor;
pub mod state;

use std::sync::Arc;

use uuid::Uuid;

use crate::budget::TokenBudget;
use crate::recruiter::{CostModel, RecruiterPolicy};
use crate::registry::AgentRegistry;
use crate::retry::RetryPolicy;
use crate::task::TaskSpec;

pub use builder::{create_pipeline, PipelineBuilder, SYNTHESIS_TASK_ID};
pub use state::{
    CancelHandle, FailureMode, PipelineStatus, PipelineTransition, ProcessModel, RunOutcome,
    TaskState, TaskTransition, UnresolvedPolicy,
};

/// A task with its effective dependencies resolved to indices.
#[derive(Debug, Clone)]
pub(crate) struct PlannedTask {
    pub(crate) spec: TaskSpec,
    /// Earlier tasks this one waits for: `depends_on` plus placeholders.
    pub(crate) deps: Vec<usize>,
}

/// A validated, ready-to-run pipeline.
pub struct Pipeline {
    pub(crate) id: Uuid,
    pub(crate) name: String,
    pub(crate) registry: Arc<AgentRegistry>,
    pub(crate) tasks: Vec<PlannedTask>,
    pub(crate) process: ProcessModel,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) budget: Arc<TokenBudget>,
    pub(crate) recruiter: Arc<dyn RecruiterPolicy>,
    pub(crate) cost_model: CostModel,
    pub(crate) failure_mode: FailureMode,
    pub(crate) unresolved_policy: UnresolvedPolicy,
    pub(crate) max_concurrency: usize,
    pub(crate) cancel: CancelHandle,
}

impl Pipeline {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn process(&self) -> ProcessModel {
        self.process
    }

    /// Tasks in declared order, including any synthesis task.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskSpec> {
        self.tasks.iter().map(|t| &t.spec)
    }

    /// The agent pool. Agents spawned during a run show up here too.
    pub fn registry(&self) -> Arc<AgentRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn budget(&self) -> Arc<TokenBudget> {
        Arc::clone(&self.budget)
    }

    /// A handle that stops further dispatch when cancelled.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("process", &self.process)
            .field("tasks", &self.tasks.len())
            .field("budget", &self.budget.ceiling())
            .finish()
    }
}
