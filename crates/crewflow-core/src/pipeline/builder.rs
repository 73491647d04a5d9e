//! Pipeline construction and validation.
//!
//! Every structural problem is reported as a [`ConfigError`] here, before a
//! single task runs.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::budget::TokenBudget;
use crate::error::ConfigError;
use crate::recruiter::{CostModel, RecruiterPolicy, ThresholdRecruiter};
use crate::registry::{AgentDefinition, AgentId, AgentRegistry, RegistryError};
use crate::retry::RetryPolicy;
use crate::task::{TaskId, TaskSpec};
use crate::template;

use super::state::{CancelHandle, FailureMode, ProcessModel, UnresolvedPolicy};
use super::{Pipeline, PlannedTask};

/// Id of the task appended for the manager in hierarchical mode.
pub const SYNTHESIS_TASK_ID: &str = "manager_synthesis";

const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Build a pipeline with default recruiter, cost model and failure handling.
pub fn create_pipeline(
    agents: Vec<AgentDefinition>,
    tasks: Vec<TaskSpec>,
    process: ProcessModel,
    retry_policy: RetryPolicy,
    budget_ceiling: u64,
) -> Result<Pipeline, ConfigError> {
    PipelineBuilder::new(budget_ceiling)
        .agents(agents)
        .tasks(tasks)
        .process(process)
        .retry_policy(retry_policy)
        .build()
}

/// Full option set for a pipeline.
pub struct PipelineBuilder {
    name: String,
    agents: Vec<AgentDefinition>,
    tasks: Vec<TaskSpec>,
    process: ProcessModel,
    retry_policy: RetryPolicy,
    budget_ceiling: u64,
    recruiter: Arc<dyn RecruiterPolicy>,
    cost_model: CostModel,
    failure_mode: FailureMode,
    unresolved_policy: UnresolvedPolicy,
    max_concurrency: usize,
    manager: Option<AgentId>,
    cancel: CancelHandle,
}

impl PipelineBuilder {
    pub fn new(budget_ceiling: u64) -> Self {
        Self {
            name: "crew".to_string(),
            agents: Vec::new(),
            tasks: Vec::new(),
            process: ProcessModel::default(),
            retry_policy: RetryPolicy::default(),
            budget_ceiling,
            recruiter: Arc::new(ThresholdRecruiter::default()),
            cost_model: CostModel::default(),
            failure_mode: FailureMode::default(),
            unresolved_policy: UnresolvedPolicy::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            manager: None,
            cancel: CancelHandle::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn agent(mut self, agent: AgentDefinition) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn agents(mut self, agents: impl IntoIterator<Item = AgentDefinition>) -> Self {
        self.agents.extend(agents);
        self
    }

    pub fn task(mut self, task: TaskSpec) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn tasks(mut self, tasks: impl IntoIterator<Item = TaskSpec>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    pub fn process(mut self, process: ProcessModel) -> Self {
        self.process = process;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn recruiter(mut self, recruiter: Arc<dyn RecruiterPolicy>) -> Self {
        self.recruiter = recruiter;
        self
    }

    pub fn cost_model(mut self, cost_model: CostModel) -> Self {
        self.cost_model = cost_model;
        self
    }

    pub fn failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    pub fn unresolved_policy(mut self, policy: UnresolvedPolicy) -> Self {
        self.unresolved_policy = policy;
        self
    }

    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Manager agent for [`ProcessModel::Hierarchical`].
    pub fn manager(mut self, agent_id: impl Into<AgentId>) -> Self {
        self.manager = Some(agent_id.into());
        self
    }

    /// Use a caller-owned cancel handle instead of a fresh one.
    pub fn cancel_handle(mut self, handle: CancelHandle) -> Self {
        self.cancel = handle;
        self
    }

    pub fn build(self) -> Result<Pipeline, ConfigError> {
        if self.tasks.is_empty() {
            return Err(ConfigError::EmptyPipeline);
        }
        self.retry_policy.validate()?;
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrency must be at least 1".to_string(),
            ));
        }

        let registry = AgentRegistry::new();
        for agent in self.agents {
            match registry.register(agent) {
                Ok(_) => {}
                Err(RegistryError::DuplicateAgent { agent_id }) => {
                    return Err(ConfigError::DuplicateAgent {
                        agent_id: agent_id.to_string(),
                    })
                }
                Err(e) => return Err(ConfigError::Invalid(e.to_string())),
            }
        }

        let mut tasks = self.tasks;
        if self.process == ProcessModel::Hierarchical {
            let manager = self.manager.clone().ok_or(ConfigError::MissingManager)?;
            let definition = registry.get(&manager).map_err(|_| ConfigError::UnknownAgent {
                task_id: SYNTHESIS_TASK_ID.to_string(),
                agent_id: manager.to_string(),
            })?;
            if !definition.delegation_allowed {
                return Err(ConfigError::ManagerCannotDelegate {
                    agent_id: manager.to_string(),
                });
            }
            let synthesis = synthesis_task(&tasks, &manager, &definition.role);
            tasks.push(synthesis);
        }

        let planned = plan(&tasks, &registry)?;

        Ok(Pipeline {
            id: Uuid::new_v4(),
            name: self.name,
            registry: Arc::new(registry),
            tasks: planned,
            process: self.process,
            retry_policy: self.retry_policy,
            budget: Arc::new(TokenBudget::new(self.budget_ceiling)),
            recruiter: self.recruiter,
            cost_model: self.cost_model,
            failure_mode: self.failure_mode,
            unresolved_policy: self.unresolved_policy,
            max_concurrency: self.max_concurrency,
            cancel: self.cancel,
        })
    }
}

/// Validate references and compute each task's effective dependencies:
/// explicit `depends_on` plus every placeholder, all of which must name an
/// earlier task.
fn plan(tasks: &[TaskSpec], registry: &AgentRegistry) -> Result<Vec<PlannedTask>, ConfigError> {
    let mut position: HashMap<&TaskId, usize> = HashMap::new();
    for (idx, task) in tasks.iter().enumerate() {
        if position.insert(&task.id, idx).is_some() {
            return Err(ConfigError::DuplicateTask {
                task_id: task.id.to_string(),
            });
        }
    }

    let mut planned = Vec::with_capacity(tasks.len());
    for (idx, task) in tasks.iter().enumerate() {
        if !registry.contains(&task.assigned_agent) {
            return Err(ConfigError::UnknownAgent {
                task_id: task.id.to_string(),
                agent_id: task.assigned_agent.to_string(),
            });
        }

        let mut deps: Vec<usize> = Vec::new();
        for dep in &task.depends_on {
            let Some(&at) = position.get(dep) else {
                return Err(ConfigError::UnknownDependency {
                    task_id: task.id.to_string(),
                    dependency: dep.to_string(),
                });
            };
            if at >= idx {
                return Err(ConfigError::ForwardDependency {
                    task_id: task.id.to_string(),
                    dependency: dep.to_string(),
                });
            }
            if !deps.contains(&at) {
                deps.push(at);
            }
        }

        if let Some(input) = template::input_references(&task.description_template)
            .into_iter()
            .find(|name| !task.inputs.contains_key(name))
        {
            return Err(ConfigError::UnknownInput {
                task_id: task.id.to_string(),
                input,
            });
        }

        for placeholder in template::placeholders(&task.description_template) {
            let Some(&at) = position.get(&placeholder) else {
                return Err(ConfigError::UnknownPlaceholder {
                    task_id: task.id.to_string(),
                    placeholder: placeholder.to_string(),
                });
            };
            if at >= idx {
                return Err(ConfigError::ForwardDependency {
                    task_id: task.id.to_string(),
                    dependency: placeholder.to_string(),
                });
            }
            if !deps.contains(&at) {
                deps.push(at);
            }
        }

        planned.push(PlannedTask {
            spec: task.clone(),
            deps,
        });
    }
    Ok(planned)
}

/// Tasks nothing else depends on, explicitly or through a placeholder.
fn sink_tasks(tasks: &[TaskSpec]) -> Vec<TaskId> {
    let mut referenced: Vec<TaskId> = Vec::new();
    for task in tasks {
        referenced.extend(task.depends_on.iter().cloned());
        referenced.extend(template::placeholders(&task.description_template));
    }
    tasks
        .iter()
        .filter(|t| !referenced.contains(&t.id))
        .map(|t| t.id.clone())
        .collect()
}

fn synthesis_task(tasks: &[TaskSpec], manager: &AgentId, manager_role: &str) -> TaskSpec {
    let sinks = sink_tasks(tasks);
    let mut description = format!(
        "As {manager_role}, review the work your crew delivered and combine it into one final \
         deliverable. Resolve any contradictions between the contributions.\n"
    );
    for sink in &sinks {
        description.push_str(&format!("\n## {sink}\n{{{{{sink}}}}}\n"));
    }

    let mut spec = TaskSpec::new(
        SYNTHESIS_TASK_ID,
        description,
        "A consolidated final deliverable that integrates every contribution.",
        manager.clone(),
    );
    for sink in sinks {
        spec = spec.depends_on(sink);
    }
    spec
}
