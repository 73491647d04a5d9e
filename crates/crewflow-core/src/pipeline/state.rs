//! Pipeline and task state, plus the outcome handed back by a run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::registry::AgentId;
use crate::store::ResultRecord;
use crate::task::TaskId;

/// How tasks are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessModel {
    /// Declared order, one task at a time.
    #[default]
    Sequential,
    /// Any task whose dependencies have finished, up to the concurrency cap.
    Parallel,
    /// Parallel, followed by a manager agent synthesizing the final output.
    Hierarchical,
}

impl std::fmt::Display for ProcessModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessModel::Sequential => "sequential",
            ProcessModel::Parallel => "parallel",
            ProcessModel::Hierarchical => "hierarchical",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ProcessModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(ProcessModel::Sequential),
            "parallel" => Ok(ProcessModel::Parallel),
            "hierarchical" => Ok(ProcessModel::Hierarchical),
            other => Err(format!("unknown process model: {other}")),
        }
    }
}

/// What a permanent task failure does to the rest of the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Stop dispatching after the first permanent failure.
    #[default]
    FailFast,
    /// Record the failure and keep going.
    BestEffort,
}

impl std::str::FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_fast" => Ok(FailureMode::FailFast),
            "best_effort" => Ok(FailureMode::BestEffort),
            other => Err(format!("unknown failure mode: {other}")),
        }
    }
}

/// How an unresolved placeholder is treated under [`FailureMode::BestEffort`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedPolicy {
    /// Halt the pipeline.
    #[default]
    Abort,
    /// Record the task as failed and continue with the rest.
    SkipAndContinue,
}

/// Pipeline lifecycle: `Pending`, then `Running`, then exactly one terminal
/// status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineStatus {
    Pending,
    Running,
    Completed,
    Failed { task_id: TaskId },
    PartiallyCompleted,
    Cancelled,
}

impl PipelineStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PipelineStatus::Pending | PipelineStatus::Running)
    }

    /// Whether `next` is a legal successor of this status.
    pub fn can_advance_to(&self, next: &PipelineStatus) -> bool {
        match self {
            PipelineStatus::Pending => *next == PipelineStatus::Running,
            PipelineStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStatus::Pending => write!(f, "pending"),
            PipelineStatus::Running => write!(f, "running"),
            PipelineStatus::Completed => write!(f, "completed"),
            PipelineStatus::Failed { task_id } => write!(f, "failed ({task_id})"),
            PipelineStatus::PartiallyCompleted => write!(f, "partially completed"),
            PipelineStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Per-task lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Resolving,
    Dispatched,
    /// About to retry after failed attempt `attempt`.
    Retrying { attempt: u32 },
    Succeeded,
    FailedPermanently,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Resolving => "resolving",
            TaskState::Dispatched => "dispatched",
            TaskState::Retrying { .. } => "retrying",
            TaskState::Succeeded => "succeeded",
            TaskState::FailedPermanently => "failed_permanently",
        }
    }
}

/// One entry in the transition log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTransition {
    pub task_id: TaskId,
    #[serde(flatten)]
    pub state: TaskState,
    pub at: DateTime<Utc>,
}

/// One entry in the pipeline's own transition log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTransition {
    #[serde(flatten)]
    pub status: PipelineStatus,
    pub at: DateTime<Utc>,
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub pipeline_id: String,
    pub name: String,
    pub status: PipelineStatus,
    /// Records in declared task order. Tasks never dispatched have none.
    pub records: Vec<ResultRecord>,
    /// Output of the last declared task, when it succeeded.
    pub final_output: Option<String>,
    pub first_failure: Option<TaskId>,
    pub tokens_consumed: u64,
    pub remaining_budget: u64,
    /// Agents the recruiter added during the run.
    pub spawned_agents: Vec<AgentId>,
    /// Pipeline status changes, `Pending` first and the terminal status last.
    #[serde(default)]
    pub pipeline_transitions: Vec<PipelineTransition>,
    pub transitions: Vec<TaskTransition>,
}

impl RunOutcome {
    pub fn record(&self, task_id: &str) -> Option<&ResultRecord> {
        self.records.iter().find(|r| r.task_id.as_str() == task_id)
    }

    pub fn succeeded_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_succeeded()).count()
    }

    /// Transition states of one task, in order.
    pub fn states_of(&self, task_id: &str) -> Vec<TaskState> {
        self.transitions
            .iter()
            .filter(|t| t.task_id.as_str() == task_id)
            .map(|t| t.state)
            .collect()
    }
}

/// Requests cancellation of a pipeline run.
///
/// Cancellation takes effect at task boundaries: nothing new is dispatched,
/// tasks already in flight run to completion.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(ProcessModel::default(), ProcessModel::Sequential);
        assert_eq!(FailureMode::default(), FailureMode::FailFast);
        assert_eq!(UnresolvedPolicy::default(), UnresolvedPolicy::Abort);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!PipelineStatus::Pending.is_terminal());
        assert!(!PipelineStatus::Running.is_terminal());
        assert!(PipelineStatus::Completed.is_terminal());
        assert!(PipelineStatus::Cancelled.is_terminal());
        assert!(PipelineStatus::Failed {
            task_id: TaskId::from("t")
        }
        .is_terminal());
    }

    #[test]
    fn test_pipeline_status_only_advances_forward() {
        let failed = PipelineStatus::Failed {
            task_id: TaskId::from("t"),
        };
        assert!(PipelineStatus::Pending.can_advance_to(&PipelineStatus::Running));
        assert!(PipelineStatus::Running.can_advance_to(&failed));
        assert!(PipelineStatus::Running.can_advance_to(&PipelineStatus::Cancelled));
        assert!(!PipelineStatus::Pending.can_advance_to(&PipelineStatus::Completed));
        assert!(!PipelineStatus::Running.can_advance_to(&PipelineStatus::Pending));
        assert!(!failed.can_advance_to(&PipelineStatus::Running));
        assert!(!PipelineStatus::Completed.can_advance_to(&PipelineStatus::Cancelled));
    }

    #[test]
    fn test_cancel_handle_clones_share_state() {
        let handle = CancelHandle::new();
        let other = handle.clone();
        assert!(!other.is_cancelled());
        handle.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_process_model_parses_from_snake_case() {
        let p: ProcessModel = serde_json::from_str("\"hierarchical\"").unwrap();
        assert_eq!(p, ProcessModel::Hierarchical);
    }

    #[test]
    fn test_from_str_accepts_cli_spellings() {
        assert_eq!("Parallel".parse::<ProcessModel>(), Ok(ProcessModel::Parallel));
        assert_eq!("best-effort".parse::<FailureMode>(), Ok(FailureMode::BestEffort));
        assert!("round_robin".parse::<ProcessModel>().is_err());
    }

    #[test]
    fn test_transition_serializes_flat() {
        let t = TaskTransition {
            task_id: TaskId::from("plan"),
            state: TaskState::Retrying { attempt: 2 },
            at: Utc::now(),
        };
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["state"], "retrying");
        assert_eq!(json["attempt"], 2);
    }
}
