//! Error taxonomy for crewflow.
//!
//! Construction-time problems are [`ConfigError`] and are always fatal before
//! any task runs. Runtime per-task failures are not errors at this level: they
//! are recorded as [`crate::store::FailureKind`] on the task's result record.

/// Errors raised while validating configuration or building a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required credential: {name}")]
    MissingCredential { name: String },

    #[error("pipeline has no tasks")]
    EmptyPipeline,

    #[error("duplicate task id: {task_id}")]
    DuplicateTask { task_id: String },

    #[error("duplicate agent id: {agent_id}")]
    DuplicateAgent { agent_id: String },

    #[error("task {task_id} is assigned to unknown agent {agent_id}")]
    UnknownAgent { task_id: String, agent_id: String },

    #[error("task {task_id} depends on unknown task {dependency}")]
    UnknownDependency { task_id: String, dependency: String },

    #[error("task {task_id} depends on {dependency}, which is not declared before it")]
    ForwardDependency { task_id: String, dependency: String },

    #[error("task {task_id} references unknown task {placeholder} in its description")]
    UnknownPlaceholder {
        task_id: String,
        placeholder: String,
    },

    #[error("task {task_id} references undefined input {input}")]
    UnknownInput { task_id: String, input: String },

    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    #[error("hierarchical process requires a manager agent")]
    MissingManager,

    #[error("manager agent {agent_id} must allow delegation")]
    ManagerCannotDelegate { agent_id: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Umbrella error for crewflow library operations.
#[derive(Debug, thiserror::Error)]
pub enum CrewError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("registry error: {0}")]
    Registry(#[from] crate::registry::RegistryError),

    #[error("template error: {0}")]
    Template(#[from] crate::template::TemplateError),

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("manifest parse error: {0}")]
    Manifest(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for crewflow library operations.
pub type Result<T> = std::result::Result<T, CrewError>;
