//! Structured observability hooks for the pipeline lifecycle.
//!
//! Every event is an `info!` (or `warn!`) with an `event` field naming it, so
//! log pipelines can filter on `event = "task.transition"` and friends.
//! Verbosity is controlled through `RUST_LOG`; see [`crate::telemetry`].

use tracing::{info, warn};

use crate::pipeline::{PipelineStatus, ProcessModel, TaskState};

/// Span for one pipeline run, attached with `tracing::Instrument`.
pub fn pipeline_span(pipeline_id: &str, name: &str) -> tracing::Span {
    tracing::info_span!("crewflow.pipeline", pipeline_id = %pipeline_id, name = %name)
}

pub fn task_span(task_id: &str) -> tracing::Span {
    tracing::info_span!("crewflow.task", task_id = %task_id)
}

pub fn emit_pipeline_started(pipeline_id: &str, name: &str, process: ProcessModel, tasks: usize) {
    info!(
        event = "pipeline.started",
        pipeline_id = %pipeline_id,
        name = %name,
        process = %process,
        tasks = tasks,
    );
}

/// Emit event: the pipeline moved to `status`.
pub fn emit_pipeline_transition(pipeline_id: &str, status: &PipelineStatus) {
    info!(
        event = "pipeline.transition",
        pipeline_id = %pipeline_id,
        status = %status,
    );
}

pub fn emit_task_transition(task_id: &str, state: TaskState) {
    match state {
        TaskState::Retrying { attempt } => info!(
            event = "task.transition",
            task_id = %task_id,
            state = state.as_str(),
            attempt = attempt,
        ),
        _ => info!(event = "task.transition", task_id = %task_id, state = state.as_str()),
    }
}

/// Emit event: the recruiter decided how a task is staffed.
pub fn emit_recruit_decision(task_id: &str, decision: &str, agent_id: Option<&str>, cost: u64) {
    info!(
        event = "recruit.decision",
        task_id = %task_id,
        decision = %decision,
        agent_id = agent_id.unwrap_or("-"),
        cost = cost,
    );
}

/// Emit event: a task failed for good (warning level).
pub fn emit_task_failed(task_id: &str, reason: &dyn std::fmt::Display, detail: &str) {
    warn!(event = "task.failed", task_id = %task_id, reason = %reason, detail = %detail);
}

pub fn emit_pipeline_finished(
    pipeline_id: &str,
    status: &PipelineStatus,
    duration_ms: u64,
    tokens_consumed: u64,
) {
    info!(
        event = "pipeline.finished",
        pipeline_id = %pipeline_id,
        status = %status,
        duration_ms = duration_ms,
        tokens_consumed = tokens_consumed,
    );
}
