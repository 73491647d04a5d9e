//! Append-only record of task outcomes, keyed by task id.
//!
//! Each task has exactly one writer (the unit executing it), and a record is
//! never replaced once inserted, so readers always observe a finalized value.
//! Every record embeds a SHA-256 digest of its output so that re-reads can be
//! checked against the value originally written.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::CapabilityError;
use crate::registry::AgentId;
use crate::task::TaskId;

/// Why a task failed permanently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// The description references a task that has not succeeded.
    UnresolvedPlaceholder { task_id: TaskId },
    /// A declared dependency did not succeed.
    DependencyFailed { task_id: TaskId },
    BackendUnavailable,
    RateLimited,
    Timeout,
    /// The output violated the expected-output contract.
    InvalidResponse,
    /// The recruiter vetoed dispatch for cost.
    BudgetExceeded,
    /// The executing unit itself crashed.
    Internal,
}

impl FailureKind {
    /// Map the last capability error of an exhausted dispatch.
    pub fn from_capability(err: &CapabilityError) -> Self {
        match err {
            CapabilityError::Unavailable { .. } => FailureKind::BackendUnavailable,
            CapabilityError::RateLimited { .. } => FailureKind::RateLimited,
            CapabilityError::Timeout { .. } => FailureKind::Timeout,
            CapabilityError::InvalidResponse { .. } => FailureKind::InvalidResponse,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::UnresolvedPlaceholder { task_id } => {
                write!(f, "unresolved_placeholder({task_id})")
            }
            FailureKind::DependencyFailed { task_id } => write!(f, "dependency_failed({task_id})"),
            FailureKind::BackendUnavailable => write!(f, "backend_unavailable"),
            FailureKind::RateLimited => write!(f, "rate_limited"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::InvalidResponse => write!(f, "invalid_response"),
            FailureKind::BudgetExceeded => write!(f, "budget_exceeded"),
            FailureKind::Internal => write!(f, "internal"),
        }
    }
}

/// Terminal status of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordStatus {
    Succeeded,
    Failed { reason: FailureKind, detail: String },
}

/// The outcome of one task. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub task_id: TaskId,
    /// Agent the task was dispatched to; `None` when it never got that far.
    pub agent_id: Option<AgentId>,
    pub output_text: String,
    pub status: RecordStatus,
    pub tokens_consumed: u64,
    /// Capability invocations made (0 when never dispatched).
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
    /// SHA-256 hex digest of `output_text`.
    pub output_digest: String,
}

impl ResultRecord {
    pub fn succeeded(
        task_id: TaskId,
        agent_id: AgentId,
        output_text: String,
        tokens_consumed: u64,
        attempts: u32,
    ) -> Self {
        let output_digest = digest(&output_text);
        Self {
            task_id,
            agent_id: Some(agent_id),
            output_text,
            status: RecordStatus::Succeeded,
            tokens_consumed,
            attempts,
            timestamp: Utc::now(),
            output_digest,
        }
    }

    pub fn failed(
        task_id: TaskId,
        agent_id: Option<AgentId>,
        reason: FailureKind,
        detail: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            task_id,
            agent_id,
            output_text: String::new(),
            status: RecordStatus::Failed {
                reason,
                detail: detail.into(),
            },
            tokens_consumed: 0,
            attempts,
            timestamp: Utc::now(),
            output_digest: digest(""),
        }
    }

    /// Tokens charged for a failure whose invocation did return.
    pub fn with_tokens_consumed(mut self, tokens: u64) -> Self {
        self.tokens_consumed = tokens;
        self
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self.status, RecordStatus::Succeeded)
    }

    pub fn failure(&self) -> Option<&FailureKind> {
        match &self.status {
            RecordStatus::Succeeded => None,
            RecordStatus::Failed { reason, .. } => Some(reason),
        }
    }

    /// Re-derive the output digest and compare it to the stored one.
    pub fn verify(&self) -> bool {
        digest(&self.output_text) == self.output_digest
    }
}

fn digest(text: &str) -> String {
    use sha2::Digest as _;
    hex::encode(sha2::Sha256::digest(text.as_bytes()))
}

/// Errors produced by the result store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("result already recorded for task {task_id}")]
    DuplicateRecord { task_id: TaskId },
}

#[derive(Default)]
struct StoreState {
    order: Vec<TaskId>,
    by_id: HashMap<TaskId, Arc<ResultRecord>>,
}

/// Append-only, thread-safe result store.
#[derive(Default)]
pub struct ResultStore {
    state: RwLock<StoreState>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. A second record for the same task is rejected and the
    /// original is left untouched.
    pub fn insert(&self, record: ResultRecord) -> Result<Arc<ResultRecord>, StoreError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.by_id.contains_key(&record.task_id) {
            return Err(StoreError::DuplicateRecord {
                task_id: record.task_id,
            });
        }
        let record = Arc::new(record);
        state.order.push(record.task_id.clone());
        state.by_id.insert(record.task_id.clone(), Arc::clone(&record));
        Ok(record)
    }

    pub fn get(&self, task_id: &TaskId) -> Option<Arc<ResultRecord>> {
        self.read().by_id.get(task_id).cloned()
    }

    /// Output of `task_id` if, and only if, it succeeded.
    pub fn succeeded_output(&self, task_id: &TaskId) -> Option<String> {
        self.get(task_id)
            .filter(|r| r.is_succeeded())
            .map(|r| r.output_text.clone())
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.read().by_id.contains_key(task_id)
    }

    /// Every record in insertion order.
    pub fn records(&self) -> Vec<Arc<ResultRecord>> {
        let state = self.read();
        state
            .order
            .iter()
            .filter_map(|id| state.by_id.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ResultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStore")
            .field("records", &self.read().order)
            .finish()
    }
}
