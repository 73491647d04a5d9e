//! Task vocabulary: `TaskId`, `TaskSpec`, `Complexity`, `ExpectedOutput`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::registry::AgentId;

/// Stable identifier of a task; also the placeholder name other tasks use to
/// reference its output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        TaskId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        TaskId(s)
    }
}

/// Coarse complexity rating used by the recruiter's cost model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    #[default]
    Moderate,
    Complex,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
        };
        write!(f, "{s}")
    }
}

/// The output contract of a task.
///
/// `description` is passed to the capability verbatim. `required_sections`
/// are substrings the returned text must contain; a response missing any of
/// them (or an empty response) is an invalid response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedOutput {
    pub description: String,
    #[serde(default)]
    pub required_sections: Vec<String>,
}

impl ExpectedOutput {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            required_sections: Vec::new(),
        }
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.required_sections.push(section.into());
        self
    }

    /// Check `text` against the contract, returning what is wrong with it.
    pub fn violation(&self, text: &str) -> Option<String> {
        if text.trim().is_empty() {
            return Some("empty output".to_string());
        }
        let missing: Vec<&str> = self
            .required_sections
            .iter()
            .filter(|s| !text.contains(s.as_str()))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            None
        } else {
            Some(format!("missing required sections: {}", missing.join(", ")))
        }
    }
}

/// A unit of work assigned to one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    /// Description with `{task_id}` / `{{task_id}}` placeholders and
    /// `{{input:name}}` references.
    pub description_template: String,
    /// Values for `{{input:name}}`, substituted verbatim at dispatch.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    pub expected_output: ExpectedOutput,
    pub assigned_agent: AgentId,
    /// Tasks that must succeed before this one starts. Earlier tasks only.
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    #[serde(default)]
    pub required_specialization: Option<String>,
    #[serde(default)]
    pub complexity: Complexity,
    /// Token estimate for the cost model; the model default applies when unset.
    #[serde(default)]
    pub estimated_tokens: Option<u64>,
}

impl TaskSpec {
    pub fn new(
        id: impl Into<TaskId>,
        description_template: impl Into<String>,
        expected_output: impl Into<String>,
        assigned_agent: impl Into<AgentId>,
    ) -> Self {
        Self {
            id: id.into(),
            description_template: description_template.into(),
            inputs: BTreeMap::new(),
            expected_output: ExpectedOutput::new(expected_output),
            assigned_agent: assigned_agent.into(),
            depends_on: Vec::new(),
            required_specialization: None,
            complexity: Complexity::default(),
            estimated_tokens: None,
        }
    }

    pub fn depends_on(mut self, task: impl Into<TaskId>) -> Self {
        self.depends_on.push(task.into());
        self
    }

    pub fn with_specialization(mut self, tag: impl Into<String>) -> Self {
        self.required_specialization = Some(tag.into());
        self
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    pub fn with_estimated_tokens(mut self, tokens: u64) -> Self {
        self.estimated_tokens = Some(tokens);
        self
    }

    pub fn with_required_section(mut self, section: impl Into<String>) -> Self {
        self.expected_output.required_sections.push(section.into());
        self
    }
}
