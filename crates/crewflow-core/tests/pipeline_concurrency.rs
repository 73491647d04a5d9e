//! Parallel and hierarchical runs: concurrency limits, dependency ordering,
//! budget safety under contention and recruitment.

use std::sync::Arc;
use std::time::Duration;

use crewflow_core::fakes::ScriptedCapability;
use crewflow_core::{
    AgentDefinition, Complexity, FailureKind, FailureMode, PipelineBuilder, PipelineStatus,
    ProcessModel, RecruiterConfig, RetryPolicy, TaskSpec, ThresholdRecruiter, SYNTHESIS_TASK_ID,
};

fn agent(id: &str, cap: &Arc<ScriptedCapability>) -> AgentDefinition {
    AgentDefinition::new(id, id, "ship it", "has shipped before", cap.clone())
}

fn independent(n: usize) -> Vec<TaskSpec> {
    (1..=n)
        .map(|i| TaskSpec::new(format!("t{i}"), format!("unit {i}"), "text", "dev"))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_sequential_never_overlaps_calls() {
    let cap = Arc::new(ScriptedCapability::new().with_delay(Duration::from_millis(50)));
    let pipeline = PipelineBuilder::new(100_000)
        .agent(agent("dev", &cap))
        .tasks(independent(3))
        .process(ProcessModel::Sequential)
        .max_concurrency(8)
        .build()
        .unwrap();

    let outcome = pipeline.run().await;

    assert_eq!(outcome.status, PipelineStatus::Completed);
    assert_eq!(cap.max_in_flight(), 1);
    let order: Vec<String> = cap.calls().into_iter().map(|c| c.description).collect();
    assert_eq!(order, vec!["unit 1", "unit 2", "unit 3"]);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_overlaps_independent_tasks() {
    let cap = Arc::new(ScriptedCapability::new().with_delay(Duration::from_millis(50)));
    let pipeline = PipelineBuilder::new(100_000)
        .agent(agent("dev", &cap))
        .tasks(independent(3))
        .process(ProcessModel::Parallel)
        .max_concurrency(4)
        .build()
        .unwrap();

    let outcome = pipeline.run().await;

    assert_eq!(outcome.status, PipelineStatus::Completed);
    assert!(cap.max_in_flight() >= 2);
    assert_eq!(outcome.succeeded_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_respects_concurrency_limit() {
    let cap = Arc::new(ScriptedCapability::new().with_delay(Duration::from_millis(50)));
    let pipeline = PipelineBuilder::new(100_000)
        .agent(agent("dev", &cap))
        .tasks(independent(6))
        .process(ProcessModel::Parallel)
        .max_concurrency(2)
        .build()
        .unwrap();

    let outcome = pipeline.run().await;

    assert_eq!(outcome.status, PipelineStatus::Completed);
    assert_eq!(cap.max_in_flight(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_waits_for_dependencies() {
    let cap = Arc::new(
        ScriptedCapability::new()
            .with_delay(Duration::from_millis(20))
            .reply("schema", "S", 3)
            .reply("screens", "U", 3),
    );
    let pipeline = PipelineBuilder::new(100_000)
        .agent(agent("dev", &cap))
        .task(TaskSpec::new("db", "design the schema", "text", "dev"))
        .task(TaskSpec::new("ui", "sketch the screens", "text", "dev"))
        .task(TaskSpec::new("plan", "merge {db} and {ui}", "text", "dev"))
        .process(ProcessModel::Parallel)
        .build()
        .unwrap();

    let outcome = pipeline.run().await;

    assert_eq!(outcome.status, PipelineStatus::Completed);
    let calls = cap.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2].description, "merge S and U");
    assert_eq!(outcome.final_output.as_deref(), Some("done: merge S and U"));
}

#[tokio::test(start_paused = true)]
async fn test_budget_holds_under_concurrent_reservations() {
    let cap = Arc::new(
        ScriptedCapability::new()
            .with_delay(Duration::from_millis(10))
            .reply("unit", "ok", 50),
    );
    let tasks = independent(10)
        .into_iter()
        .map(|t| t.with_estimated_tokens(50).with_complexity(Complexity::Simple));
    let pipeline = PipelineBuilder::new(300)
        .agent(agent("dev", &cap))
        .tasks(tasks)
        .process(ProcessModel::Parallel)
        .max_concurrency(4)
        .failure_mode(FailureMode::BestEffort)
        .build()
        .unwrap();

    let outcome = pipeline.run().await;

    assert!(outcome.tokens_consumed <= 300);
    assert_eq!(outcome.tokens_consumed, 300);
    assert_eq!(outcome.remaining_budget, 0);
    assert_eq!(outcome.succeeded_count(), 6);
    assert_eq!(cap.call_count(), 6);
    let rejected: Vec<_> = outcome
        .records
        .iter()
        .filter(|r| r.failure() == Some(&FailureKind::BudgetExceeded))
        .collect();
    assert_eq!(rejected.len(), 4);
    assert!(rejected.iter().all(|r| r.tokens_consumed == 0));
    assert_eq!(outcome.status, PipelineStatus::PartiallyCompleted);
}

#[tokio::test]
async fn test_hierarchical_manager_synthesizes_sinks() {
    let cap = Arc::new(
        ScriptedCapability::new()
            .reply("backend", "API ready", 4)
            .reply("frontend", "UI ready", 4)
            .reply("review the work", "FINAL", 5),
    );
    let pipeline = PipelineBuilder::new(100_000)
        .agent(agent("pm", &cap).with_delegation(true))
        .agent(agent("dev", &cap))
        .task(TaskSpec::new("api", "build the backend", "text", "dev"))
        .task(TaskSpec::new("web", "build the frontend", "text", "dev"))
        .process(ProcessModel::Hierarchical)
        .manager("pm")
        .build()
        .unwrap();

    let outcome = pipeline.run().await;

    assert_eq!(outcome.status, PipelineStatus::Completed);
    assert_eq!(outcome.final_output.as_deref(), Some("FINAL"));
    let synthesis = outcome.record(SYNTHESIS_TASK_ID).unwrap();
    assert_eq!(synthesis.agent_id.as_ref().map(|a| a.as_str()), Some("pm"));

    let calls = cap.calls();
    let manager_call = calls
        .iter()
        .find(|c| c.description.contains("review the work"))
        .unwrap();
    assert_eq!(manager_call.agent_id, "pm");
    assert!(manager_call.description.contains("API ready"));
    assert!(manager_call.description.contains("UI ready"));
}

#[tokio::test]
async fn test_missing_specialization_spawns_specialist() {
    let cap = Arc::new(ScriptedCapability::new());
    let pipeline = PipelineBuilder::new(100_000)
        .agent(agent("pm", &cap))
        .task(
            TaskSpec::new("schema", "design the tables", "DDL", "pm")
                .with_specialization("database"),
        )
        .build()
        .unwrap();

    let outcome = pipeline.run().await;

    assert_eq!(outcome.status, PipelineStatus::Completed);
    assert_eq!(outcome.spawned_agents.len(), 1);
    assert_eq!(outcome.spawned_agents[0].as_str(), "database_specialist");
    let record = outcome.record("schema").unwrap();
    assert_eq!(
        record.agent_id.as_ref().map(|a| a.as_str()),
        Some("database_specialist")
    );
    assert_eq!(cap.calls()[0].agent_id, "database_specialist");
    assert_eq!(record.tokens_consumed, 10);
    assert_eq!(outcome.tokens_consumed, 10);
}

#[tokio::test]
async fn test_full_pool_reuses_recruited_specialist() {
    let cap = Arc::new(ScriptedCapability::new());
    let pipeline = PipelineBuilder::new(100_000)
        .agent(agent("pm", &cap))
        .task(TaskSpec::new("t1", "design the tables", "DDL", "pm").with_specialization("database"))
        .task(TaskSpec::new("t2", "tune the indexes", "DDL", "pm").with_specialization("database"))
        .recruiter(Arc::new(ThresholdRecruiter::new(RecruiterConfig {
            max_pool_size: 2,
            ..RecruiterConfig::default()
        })))
        .build()
        .unwrap();

    let outcome = pipeline.run().await;

    assert_eq!(outcome.status, PipelineStatus::Completed);
    assert_eq!(outcome.spawned_agents.len(), 1);
    for id in ["t1", "t2"] {
        let record = outcome.record(id).unwrap();
        assert_eq!(
            record.agent_id.as_ref().map(|a| a.as_str()),
            Some("database_specialist"),
            "{id} went to the wrong agent"
        );
    }
    let calls = cap.calls();
    assert!(calls.iter().all(|c| c.agent_id == "database_specialist"));
}

#[tokio::test]
async fn test_panicking_capability_is_internal_failure() {
    let cap = Arc::new(ScriptedCapability::new().panic_on("explode"));
    let pipeline = PipelineBuilder::new(100_000)
        .agent(agent("dev", &cap))
        .task(TaskSpec::new("boom", "explode now", "text", "dev"))
        .task(TaskSpec::new("after", "still runs", "text", "dev"))
        .failure_mode(FailureMode::BestEffort)
        .retry_policy(RetryPolicy::immediate(1))
        .build()
        .unwrap();

    let outcome = pipeline.run().await;

    assert_eq!(
        outcome.record("boom").unwrap().failure(),
        Some(&FailureKind::Internal)
    );
    assert!(outcome.record("after").unwrap().is_succeeded());
    assert_eq!(outcome.status, PipelineStatus::PartiallyCompleted);
}
