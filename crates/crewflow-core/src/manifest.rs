//! Crew manifests: a TOML description of agents, tasks and settings.
//!
//! ```toml
//! [crew]
//! name = "space_management"
//! title = "Space Management Analysis"
//!
//! [settings]
//! budget_ceiling = 120000
//!
//! [inputs]
//! codebase_info = "..."
//!
//! [[agents]]
//! id = "pm"
//! role = "Project Manager"
//! goal = "..."
//! backstory = "..."
//! allow_delegation = true
//!
//! [[tasks]]
//! id = "analyze_current_state"
//! agent = "pm"
//! description = "Analyze this codebase: {{input:codebase_info}}"
//! expected_output = "A markdown report"
//! ```
//!
//! Each task carries the inputs its description references. They are
//! substituted at dispatch in the same pass as task-output placeholders
//! (`{{task_id}}`), so braces inside an input (source code, JSX) are never
//! mistaken for task references.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityHandle;
use crate::config::CrewConfig;
use crate::error::ConfigError;
use crate::pipeline::PipelineBuilder;
use crate::registry::AgentDefinition;
use crate::task::{Complexity, ExpectedOutput, TaskSpec};
use crate::template;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrewSection {
    pub name: String,
    /// Heading used for the report; defaults to the name.
    #[serde(default)]
    pub title: Option<String>,
    /// Report file name; defaults to `<name>.md`.
    #[serde(default)]
    pub output_file: Option<String>,
    /// Manager agent for hierarchical runs.
    #[serde(default)]
    pub manager: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEntry {
    pub id: String,
    pub role: String,
    pub goal: String,
    pub backstory: String,
    #[serde(default)]
    pub allow_delegation: bool,
    #[serde(default)]
    pub specializations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub id: String,
    pub description: String,
    pub expected_output: String,
    #[serde(default)]
    pub required_sections: Vec<String>,
    pub agent: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub specialization: Option<String>,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub estimated_tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrewManifest {
    pub crew: CrewSection,
    #[serde(default)]
    pub settings: CrewConfig,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
}

impl CrewManifest {
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let manifest: CrewManifest = toml::from_str(content)?;
        manifest.settings.validate()?;
        Ok(manifest)
    }

    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Set or replace a named input.
    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    pub fn title(&self) -> &str {
        self.crew.title.as_deref().unwrap_or(&self.crew.name)
    }

    pub fn output_file(&self) -> String {
        self.crew
            .output_file
            .clone()
            .unwrap_or_else(|| format!("{}.md", self.crew.name))
    }

    /// The inputs `template` references, each looked up by name.
    pub fn inputs_for(
        &self,
        task_id: &str,
        template: &str,
    ) -> Result<BTreeMap<String, String>, ConfigError> {
        template::input_references(template)
            .into_iter()
            .map(|name| match self.inputs.get(&name) {
                Some(value) => Ok((name, value.clone())),
                None => Err(ConfigError::UnknownInput {
                    task_id: task_id.to_string(),
                    input: name,
                }),
            })
            .collect()
    }

    /// A pipeline builder with every agent bound to `capability`.
    pub fn into_builder(self, capability: CapabilityHandle) -> Result<PipelineBuilder, ConfigError> {
        let mut tasks = Vec::with_capacity(self.tasks.len());
        for entry in &self.tasks {
            let inputs = self.inputs_for(&entry.id, &entry.description)?;
            let mut expected = ExpectedOutput::new(entry.expected_output.trim());
            for section in &entry.required_sections {
                expected = expected.with_section(section.clone());
            }
            let mut spec = TaskSpec::new(
                entry.id.as_str(),
                entry.description.as_str(),
                "",
                entry.agent.as_str(),
            )
            .with_complexity(entry.complexity);
            spec.expected_output = expected;
            spec.inputs = inputs;
            for dep in &entry.depends_on {
                spec = spec.depends_on(dep.as_str());
            }
            if let Some(tag) = &entry.specialization {
                spec = spec.with_specialization(tag.clone());
            }
            if let Some(tokens) = entry.estimated_tokens {
                spec = spec.with_estimated_tokens(tokens);
            }
            tasks.push(spec);
        }

        let agents = self.agents.iter().map(|entry| {
            let mut def = AgentDefinition::new(
                entry.id.as_str(),
                entry.role.trim(),
                entry.goal.trim(),
                entry.backstory.trim(),
                Arc::clone(&capability),
            )
            .with_delegation(entry.allow_delegation);
            for tag in &entry.specializations {
                def = def.with_specialization(tag.clone());
            }
            def
        });

        let mut builder = self
            .settings
            .builder()
            .name(self.crew.name.clone())
            .agents(agents.collect::<Vec<_>>())
            .tasks(tasks);
        if let Some(manager) = &self.crew.manager {
            builder = builder.manager(manager.as_str());
        }
        Ok(builder)
    }
}
