//! Runtime settings for a crew: budget, retries, scheduling and recruitment.
//!
//! Settings load from TOML (usually the `[settings]` table of a crew
//! manifest) and may be overridden by `CREWFLOW_*` environment variables.
//! Every field has a default, so an empty table is a valid configuration.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pipeline::{FailureMode, PipelineBuilder, ProcessModel, UnresolvedPolicy};
use crate::recruiter::{
    AssignedOnly, CostModel, RecruiterConfig, RecruiterPolicy, ThresholdRecruiter,
};
use crate::retry::RetryPolicy;

/// Crew-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrewConfig {
    /// Token ceiling for the whole run.
    pub budget_ceiling: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Per-attempt limit; unset leaves timeouts to the backend.
    pub dispatch_timeout_secs: Option<u64>,
    pub process: ProcessModel,
    pub failure_mode: FailureMode,
    pub unresolved_policy: UnresolvedPolicy,
    pub max_concurrency: usize,
    /// When false, every task goes to its assigned agent.
    pub recruit: bool,
    pub reuse_threshold: u64,
    pub spawn_overhead_tokens: u64,
    pub max_pool_size: usize,
    pub default_task_tokens: u64,
    /// Cost multipliers per task complexity.
    pub simple_weight: u64,
    pub moderate_weight: u64,
    pub complex_weight: u64,
}

impl Default for CrewConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let recruiter = RecruiterConfig::default();
        let cost = CostModel::default();
        Self {
            budget_ceiling: 200_000,
            max_retries: retry.max_retries,
            backoff_base_ms: retry.backoff_base_ms,
            backoff_max_ms: retry.backoff_max_ms,
            dispatch_timeout_secs: None,
            process: ProcessModel::default(),
            failure_mode: FailureMode::default(),
            unresolved_policy: UnresolvedPolicy::default(),
            max_concurrency: 4,
            recruit: true,
            reuse_threshold: recruiter.reuse_threshold,
            spawn_overhead_tokens: recruiter.spawn_overhead_tokens,
            max_pool_size: recruiter.max_pool_size,
            default_task_tokens: cost.default_task_tokens,
            simple_weight: cost.simple_weight,
            moderate_weight: cost.moderate_weight,
            complex_weight: cost.complex_weight,
        }
    }
}

impl CrewConfig {
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: CrewConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `CREWFLOW_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay variables from `lookup`. Recognised keys: `CREWFLOW_BUDGET`,
    /// `CREWFLOW_MAX_RETRIES`, `CREWFLOW_DISPATCH_TIMEOUT_SECS`,
    /// `CREWFLOW_PROCESS`, `CREWFLOW_FAILURE_MODE`, `CREWFLOW_MAX_CONCURRENCY`.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(v) = lookup("CREWFLOW_BUDGET") {
            self.budget_ceiling = parse_number("CREWFLOW_BUDGET", &v)?;
        }
        if let Some(v) = lookup("CREWFLOW_MAX_RETRIES") {
            self.max_retries = parse_number("CREWFLOW_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("CREWFLOW_DISPATCH_TIMEOUT_SECS") {
            self.dispatch_timeout_secs = Some(parse_number("CREWFLOW_DISPATCH_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("CREWFLOW_PROCESS") {
            self.process = v.parse().map_err(ConfigError::Invalid)?;
        }
        if let Some(v) = lookup("CREWFLOW_FAILURE_MODE") {
            self.failure_mode = v.parse().map_err(ConfigError::Invalid)?;
        }
        if let Some(v) = lookup("CREWFLOW_MAX_CONCURRENCY") {
            self.max_concurrency = parse_number("CREWFLOW_MAX_CONCURRENCY", &v)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry_policy().validate()?;
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "max_pool_size must be at least 1".to_string(),
            ));
        }
        if [self.simple_weight, self.moderate_weight, self.complex_weight].contains(&0) {
            return Err(ConfigError::Invalid(
                "complexity weights must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base_ms: self.backoff_base_ms,
            backoff_max_ms: self.backoff_max_ms,
            dispatch_timeout_ms: self.dispatch_timeout_secs.map(|s| s.saturating_mul(1000)),
        }
    }

    pub fn cost_model(&self) -> CostModel {
        CostModel {
            default_task_tokens: self.default_task_tokens,
            simple_weight: self.simple_weight,
            moderate_weight: self.moderate_weight,
            complex_weight: self.complex_weight,
        }
    }

    pub fn recruiter(&self) -> Arc<dyn RecruiterPolicy> {
        if !self.recruit {
            return Arc::new(AssignedOnly);
        }
        Arc::new(ThresholdRecruiter::new(RecruiterConfig {
            reuse_threshold: self.reuse_threshold,
            spawn_overhead_tokens: self.spawn_overhead_tokens,
            max_pool_size: self.max_pool_size,
        }))
    }

    /// A builder carrying every setting in this config.
    pub fn builder(&self) -> PipelineBuilder {
        PipelineBuilder::new(self.budget_ceiling)
            .process(self.process)
            .retry_policy(self.retry_policy())
            .failure_mode(self.failure_mode)
            .unresolved_policy(self.unresolved_policy)
            .max_concurrency(self.max_concurrency)
            .recruiter(self.recruiter())
            .cost_model(self.cost_model())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key} must be a number, got {value:?}")))
}
