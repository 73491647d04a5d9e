//! Scheduling and per-task execution.
//!
//! Every task runs as its own tokio task. The scheduler launches whatever is
//! ready (declared order, one at a time, for the sequential model) and folds
//! completions back in as they arrive. A task is the only writer of its own
//! result record; budget safety comes from the recruiter's atomic reservation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::task::JoinError;
use tracing::{info, warn, Instrument};

use crate::budget::TokenBudget;
use crate::metrics::METRICS;
use crate::obs;
use crate::recruiter::{CostModel, RecruitDecision, RecruitRequest, RecruiterPolicy};
use crate::registry::{AgentDefinition, AgentId, AgentRegistry, RegistryError};
use crate::retry::{dispatch_with_retry, DispatchOutcome, RetryPolicy};
use crate::store::{FailureKind, RecordStatus, ResultRecord, ResultStore};
use crate::task::{TaskId, TaskSpec};
use crate::template::{self, TemplateError};

use super::state::{
    FailureMode, PipelineStatus, PipelineTransition, ProcessModel, RunOutcome, TaskState,
    TaskTransition, UnresolvedPolicy,
};
use super::Pipeline;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared by every task of one run.
struct RunContext {
    registry: Arc<AgentRegistry>,
    store: ResultStore,
    budget: Arc<TokenBudget>,
    recruiter: Arc<dyn RecruiterPolicy>,
    cost_model: CostModel,
    retry_policy: RetryPolicy,
    transitions: Mutex<Vec<TaskTransition>>,
    in_flight: Mutex<HashMap<AgentId, usize>>,
    spawned: Mutex<Vec<AgentId>>,
}

impl RunContext {
    fn transition(&self, task_id: &TaskId, state: TaskState) {
        obs::emit_task_transition(task_id.as_str(), state);
        lock(&self.transitions).push(TaskTransition {
            task_id: task_id.clone(),
            state,
            at: Utc::now(),
        });
    }

    /// Record the terminal outcome of a task.
    fn finish(&self, record: ResultRecord) -> Arc<ResultRecord> {
        let task_id = record.task_id.clone();
        match &record.status {
            RecordStatus::Succeeded => self.transition(&task_id, TaskState::Succeeded),
            RecordStatus::Failed { reason, detail } => {
                obs::emit_task_failed(task_id.as_str(), reason, detail);
                self.transition(&task_id, TaskState::FailedPermanently);
            }
        }
        match self.store.insert(record) {
            Ok(record) => record,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "keeping the first recorded result");
                self.store.get(&task_id).unwrap_or_else(|| {
                    Arc::new(ResultRecord::failed(
                        task_id.clone(),
                        None,
                        FailureKind::Internal,
                        e.to_string(),
                        0,
                    ))
                })
            }
        }
    }

    /// Register a recruited agent. Losing a registration race to an
    /// identical spawn means using the agent that won.
    fn admit(&self, definition: AgentDefinition) -> Result<Arc<AgentDefinition>, RegistryError> {
        let id = definition.id.clone();
        match self.registry.register(definition) {
            Ok(id) => {
                METRICS.inc_spawned();
                lock(&self.spawned).push(id.clone());
                self.registry.get(&id)
            }
            Err(RegistryError::DuplicateAgent { .. }) => self.registry.get(&id),
            Err(e) => Err(e),
        }
    }
}

/// The pipeline's own status, advanced only along legal transitions.
struct Lifecycle {
    pipeline_id: String,
    current: PipelineStatus,
    log: Vec<PipelineTransition>,
}

impl Lifecycle {
    fn pending(pipeline_id: &str) -> Self {
        let status = PipelineStatus::Pending;
        obs::emit_pipeline_transition(pipeline_id, &status);
        Self {
            pipeline_id: pipeline_id.to_string(),
            log: vec![PipelineTransition {
                status: status.clone(),
                at: Utc::now(),
            }],
            current: status,
        }
    }

    fn advance(&mut self, next: PipelineStatus) {
        if !self.current.can_advance_to(&next) {
            warn!(
                pipeline_id = %self.pipeline_id,
                from = %self.current,
                to = %next,
                "ignoring illegal pipeline transition"
            );
            return;
        }
        obs::emit_pipeline_transition(&self.pipeline_id, &next);
        self.log.push(PipelineTransition {
            status: next.clone(),
            at: Utc::now(),
        });
        self.current = next;
    }
}

/// Counts an agent as busy for as long as it is held.
struct InFlight<'a> {
    ctx: &'a RunContext,
    agent: AgentId,
}

impl<'a> InFlight<'a> {
    fn enter(ctx: &'a RunContext, agent: AgentId) -> Self {
        *lock(&ctx.in_flight).entry(agent.clone()).or_insert(0) += 1;
        Self { ctx, agent }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(n) = lock(&self.ctx.in_flight).get_mut(&self.agent) {
            *n = n.saturating_sub(1);
        }
    }
}

impl Pipeline {
    /// Run every task to a terminal state and report what happened.
    pub async fn run(self) -> RunOutcome {
        let span = obs::pipeline_span(&self.id.to_string(), &self.name);
        self.execute().instrument(span).await
    }

    async fn execute(self) -> RunOutcome {
        let pipeline_id = self.id.to_string();
        let started = Instant::now();
        let mut lifecycle = Lifecycle::pending(&pipeline_id);
        obs::emit_pipeline_started(&pipeline_id, &self.name, self.process, self.tasks.len());
        lifecycle.advance(PipelineStatus::Running);

        let ctx = Arc::new(RunContext {
            registry: Arc::clone(&self.registry),
            store: ResultStore::new(),
            budget: Arc::clone(&self.budget),
            recruiter: Arc::clone(&self.recruiter),
            cost_model: self.cost_model.clone(),
            retry_policy: self.retry_policy.clone(),
            transitions: Mutex::default(),
            in_flight: Mutex::default(),
            spawned: Mutex::default(),
        });
        for task in &self.tasks {
            ctx.transition(&task.spec.id, TaskState::Queued);
        }

        let limit = match self.process {
            ProcessModel::Sequential => 1,
            ProcessModel::Parallel | ProcessModel::Hierarchical => self.max_concurrency,
        };
        let mut pending: Vec<usize> = (0..self.tasks.len()).collect();
        let mut finished = vec![false; self.tasks.len()];
        let mut running = FuturesUnordered::new();
        let mut halted_by: Option<TaskId> = None;
        let mut first_failure: Option<TaskId> = None;
        let mut cancelled = false;

        loop {
            if halted_by.is_none() && !cancelled && !pending.is_empty() && self.cancel.is_cancelled()
            {
                cancelled = true;
                info!(pipeline_id = %pipeline_id, pending = pending.len(), "pipeline cancelled; no further dispatch");
            }

            if halted_by.is_none() && !cancelled {
                let mut i = 0;
                while i < pending.len() && running.len() < limit {
                    let idx = pending[i];
                    if self.tasks[idx].deps.iter().all(|d| finished[*d]) {
                        pending.remove(i);
                        running.push(launch(Arc::clone(&ctx), idx, self.tasks[idx].spec.clone()));
                    } else if self.process == ProcessModel::Sequential {
                        break;
                    } else {
                        i += 1;
                    }
                }
            }

            let Some((idx, joined)) = running.next().await else {
                break;
            };
            let record = match joined {
                Ok(record) => record,
                Err(e) => {
                    warn!(task_id = %self.tasks[idx].spec.id, error = %e, "task unit crashed");
                    ctx.finish(ResultRecord::failed(
                        self.tasks[idx].spec.id.clone(),
                        None,
                        FailureKind::Internal,
                        e.to_string(),
                        0,
                    ))
                }
            };
            finished[idx] = true;

            if let Some(reason) = record.failure() {
                if first_failure.is_none() {
                    first_failure = Some(record.task_id.clone());
                }
                let halts = match self.failure_mode {
                    FailureMode::FailFast => true,
                    FailureMode::BestEffort => {
                        matches!(reason, FailureKind::UnresolvedPlaceholder { .. })
                            && self.unresolved_policy == UnresolvedPolicy::Abort
                    }
                };
                if halts && halted_by.is_none() {
                    warn!(task_id = %record.task_id, reason = %reason, "halting pipeline");
                    halted_by = Some(record.task_id.clone());
                }
            }
        }

        let records: Vec<ResultRecord> = self
            .tasks
            .iter()
            .filter_map(|t| ctx.store.get(&t.spec.id))
            .map(|r| r.as_ref().clone())
            .collect();
        let succeeded = records.iter().filter(|r| r.is_succeeded()).count();

        let status = if let Some(task_id) = halted_by {
            PipelineStatus::Failed { task_id }
        } else if cancelled {
            PipelineStatus::Cancelled
        } else if succeeded == self.tasks.len() {
            PipelineStatus::Completed
        } else if succeeded > 0 {
            PipelineStatus::PartiallyCompleted
        } else {
            PipelineStatus::Failed {
                task_id: first_failure
                    .clone()
                    .unwrap_or_else(|| self.tasks[0].spec.id.clone()),
            }
        };

        let final_output = self
            .tasks
            .last()
            .and_then(|t| ctx.store.succeeded_output(&t.spec.id));
        let tokens_consumed = self.budget.consumed();
        lifecycle.advance(status.clone());
        obs::emit_pipeline_finished(
            &pipeline_id,
            &status,
            started.elapsed().as_millis() as u64,
            tokens_consumed,
        );
        METRICS.flush();

        let transitions = std::mem::take(&mut *lock(&ctx.transitions));
        let spawned_agents = lock(&ctx.spawned).clone();

        RunOutcome {
            pipeline_id,
            name: self.name.clone(),
            status,
            records,
            final_output,
            first_failure,
            tokens_consumed,
            remaining_budget: self.budget.remaining(),
            spawned_agents,
            pipeline_transitions: lifecycle.log,
            transitions,
        }
    }
}

fn launch(
    ctx: Arc<RunContext>,
    idx: usize,
    spec: TaskSpec,
) -> impl Future<Output = (usize, Result<Arc<ResultRecord>, JoinError>)> {
    let span = obs::task_span(spec.id.as_str());
    let handle = tokio::spawn(run_task(ctx, spec).instrument(span));
    async move { (idx, handle.await) }
}

/// Resolving, recruitment, dispatch and validation for one task.
async fn run_task(ctx: Arc<RunContext>, spec: TaskSpec) -> Arc<ResultRecord> {
    ctx.transition(&spec.id, TaskState::Resolving);

    if let Some(dep) = spec
        .depends_on
        .iter()
        .find(|d| ctx.store.succeeded_output(d).is_none())
    {
        return ctx.finish(ResultRecord::failed(
            spec.id.clone(),
            None,
            FailureKind::DependencyFailed {
                task_id: dep.clone(),
            },
            format!("dependency {dep} did not succeed"),
            0,
        ));
    }

    let description = match template::resolve_with_inputs(
        &spec.description_template,
        &spec.inputs,
        &ctx.store,
    ) {
        Ok(text) => text,
        Err(TemplateError::UnresolvedPlaceholder { task_id }) => {
            let detail = format!("no successful output for placeholder {task_id}");
            return ctx.finish(ResultRecord::failed(
                spec.id.clone(),
                None,
                FailureKind::UnresolvedPlaceholder { task_id },
                detail,
                0,
            ));
        }
    };

    let assigned = match ctx.registry.get(&spec.assigned_agent) {
        Ok(agent) => agent,
        Err(e) => {
            return ctx.finish(ResultRecord::failed(
                spec.id.clone(),
                None,
                FailureKind::Internal,
                e.to_string(),
                0,
            ))
        }
    };

    let cost = ctx.cost_model.estimate(&spec);
    let request = RecruitRequest {
        task: &spec,
        cost,
        assigned,
        pool: ctx.registry.agents(),
        recruited: lock(&ctx.spawned).clone(),
        budget: &ctx.budget,
        in_flight: lock(&ctx.in_flight).clone(),
    };
    let decision = ctx.recruiter.decide(request).await;
    let (agent, reservation) = match decision {
        RecruitDecision::Reuse { agent, reservation } => {
            obs::emit_recruit_decision(spec.id.as_str(), "reuse", Some(agent.id.as_str()), cost);
            (agent, reservation)
        }
        RecruitDecision::Spawn { agent, reservation } => {
            obs::emit_recruit_decision(spec.id.as_str(), "spawn", Some(agent.id.as_str()), cost);
            match ctx.admit(agent) {
                Ok(agent) => (agent, reservation),
                Err(e) => {
                    reservation.release();
                    return ctx.finish(ResultRecord::failed(
                        spec.id.clone(),
                        None,
                        FailureKind::Internal,
                        e.to_string(),
                        0,
                    ));
                }
            }
        }
        RecruitDecision::Reject(e) => {
            obs::emit_recruit_decision(spec.id.as_str(), "reject", None, cost);
            METRICS.inc_rejected();
            return ctx.finish(ResultRecord::failed(
                spec.id.clone(),
                None,
                FailureKind::BudgetExceeded,
                e.to_string(),
                0,
            ));
        }
    };

    let persona = agent.persona();
    let expected = spec.expected_output.description.clone();
    ctx.transition(&spec.id, TaskState::Dispatched);
    METRICS.inc_dispatched();

    let DispatchOutcome { result, attempts } = {
        let _busy = InFlight::enter(&ctx, agent.id.clone());
        dispatch_with_retry(
            &ctx.retry_policy,
            || agent.capability.invoke(&persona, &description, &expected),
            |attempt, err, delay| {
                warn!(
                    task_id = %spec.id,
                    attempt = attempt,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "transient capability failure; retrying"
                );
                METRICS.inc_retries();
                ctx.transition(&spec.id, TaskState::Retrying { attempt });
            },
        )
        .await
    };

    let record = match result {
        Ok(invocation) => match spec.expected_output.violation(&invocation.text) {
            Some(problem) => {
                let charged = reservation.commit(invocation.tokens_consumed);
                ResultRecord::failed(
                    spec.id.clone(),
                    Some(agent.id.clone()),
                    FailureKind::InvalidResponse,
                    problem,
                    attempts,
                )
                .with_tokens_consumed(charged)
            }
            None => {
                let charged = reservation.commit(invocation.tokens_consumed);
                ResultRecord::succeeded(
                    spec.id.clone(),
                    agent.id.clone(),
                    invocation.text,
                    charged,
                    attempts,
                )
            }
        },
        Err(e) => {
            reservation.release();
            ResultRecord::failed(
                spec.id.clone(),
                Some(agent.id.clone()),
                FailureKind::from_capability(&e),
                e.to_string(),
                attempts,
            )
        }
    };
    ctx.finish(record)
}
