//! crewflow core library
//!
//! Orchestrates a crew of persona-driven agents through a pipeline of tasks.
//! Reasoning is delegated to an injected [`Capability`]; the library owns
//! scheduling, placeholder resolution, retries, recruitment and the token
//! budget.

pub mod budget;
pub mod capability;
pub mod config;
pub mod error;
pub mod fakes;
pub mod manifest;
pub mod metrics;
pub mod obs;
pub mod pipeline;
pub mod recruiter;
pub mod registry;
pub mod report;
pub mod retry;
pub mod store;
pub mod task;
pub mod telemetry;
pub mod template;

pub use budget::{BudgetExceeded, BudgetReservation, TokenBudget};
pub use capability::{Capability, CapabilityError, CapabilityHandle, Invocation, Persona};
pub use config::CrewConfig;
pub use error::{ConfigError, CrewError, Result};
pub use manifest::{AgentEntry, CrewManifest, CrewSection, TaskEntry};
pub use pipeline::{
    create_pipeline, CancelHandle, FailureMode, Pipeline, PipelineBuilder, PipelineStatus,
    PipelineTransition, ProcessModel, RunOutcome, TaskState, TaskTransition, UnresolvedPolicy,
    SYNTHESIS_TASK_ID,
};
pub use recruiter::{
    AssignedOnly, CostModel, RecruitDecision, RecruitRequest, RecruiterConfig, RecruiterPolicy,
    ThresholdRecruiter,
};
pub use registry::{AgentDefinition, AgentId, AgentRegistry, RegistryError};
pub use report::{render_markdown, write_outcome_json, write_report};
pub use retry::{dispatch_with_retry, DispatchOutcome, RetryPolicy};
pub use store::{FailureKind, RecordStatus, ResultRecord, ResultStore, StoreError};
pub use task::{Complexity, ExpectedOutput, TaskId, TaskSpec};
pub use template::{
    input_references, placeholders, resolve, resolve_with_inputs, TemplateError,
};

pub use metrics::METRICS;
pub use obs::{
    emit_pipeline_finished, emit_pipeline_started, emit_pipeline_transition,
    emit_recruit_decision, emit_task_transition,
};
pub use telemetry::init_tracing;

/// crewflow version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
