//! Agent catalog: immutable persona definitions bound to a capability.
//!
//! Definitions are frozen once registered. The registry only ever hands out
//! `Arc<AgentDefinition>`, so holders can read but never mutate a persona.
//! Registration is thread-safe because the recruiter may admit new agents
//! while other tasks are in flight.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityHandle, Persona};

/// Stable identifier of an agent within a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        AgentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        AgentId(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        AgentId(s)
    }
}

/// A persona definition: who the agent is and which capability reasons for it.
#[derive(Clone)]
pub struct AgentDefinition {
    pub id: AgentId,
    pub role: String,
    pub goal: String,
    pub backstory: String,
    pub delegation_allowed: bool,
    /// Specialization tags, matched case-insensitively against tasks.
    pub specializations: Vec<String>,
    pub capability: CapabilityHandle,
}

impl AgentDefinition {
    pub fn new(
        id: impl Into<AgentId>,
        role: impl Into<String>,
        goal: impl Into<String>,
        backstory: impl Into<String>,
        capability: CapabilityHandle,
    ) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            goal: goal.into(),
            backstory: backstory.into(),
            delegation_allowed: false,
            specializations: Vec::new(),
            capability,
        }
    }

    pub fn with_delegation(mut self, allowed: bool) -> Self {
        self.delegation_allowed = allowed;
        self
    }

    pub fn with_specialization(mut self, tag: impl Into<String>) -> Self {
        self.specializations.push(tag.into());
        self
    }

    /// Whether this agent can take a task requiring `specialization`.
    ///
    /// A task with no required specialization is covered by any agent.
    pub fn covers(&self, specialization: Option<&str>) -> bool {
        match specialization {
            None => true,
            Some(wanted) => self
                .specializations
                .iter()
                .any(|s| s.eq_ignore_ascii_case(wanted)),
        }
    }

    /// The persona handed to the capability on dispatch.
    pub fn persona(&self) -> Persona {
        Persona {
            agent_id: self.id.to_string(),
            role: self.role.clone(),
            goal: self.goal.clone(),
            backstory: self.backstory.clone(),
            delegation_allowed: self.delegation_allowed,
        }
    }
}

impl std::fmt::Debug for AgentDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDefinition")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("delegation_allowed", &self.delegation_allowed)
            .field("specializations", &self.specializations)
            .field("capability", &self.capability.name())
            .finish()
    }
}

/// Errors produced by the agent registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("agent already registered: {agent_id}")]
    DuplicateAgent { agent_id: AgentId },

    #[error("agent not found: {agent_id}")]
    AgentNotFound { agent_id: AgentId },
}

#[derive(Default)]
struct RegistryState {
    order: Vec<AgentId>,
    by_id: HashMap<AgentId, Arc<AgentDefinition>>,
}

/// Thread-safe catalog of agent definitions, in registration order.
#[derive(Default)]
pub struct AgentRegistry {
    state: RwLock<RegistryState>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Ids are unique; re-registering is an error.
    pub fn register(&self, definition: AgentDefinition) -> Result<AgentId, RegistryError> {
        let mut state = self.write();
        if state.by_id.contains_key(&definition.id) {
            return Err(RegistryError::DuplicateAgent {
                agent_id: definition.id,
            });
        }
        let id = definition.id.clone();
        state.order.push(id.clone());
        state.by_id.insert(id.clone(), Arc::new(definition));
        Ok(id)
    }

    pub fn get(&self, id: &AgentId) -> Result<Arc<AgentDefinition>, RegistryError> {
        self.read()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::AgentNotFound {
                agent_id: id.clone(),
            })
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.read().by_id.contains_key(id)
    }

    /// Snapshot of every agent, in registration order.
    pub fn agents(&self) -> Vec<Arc<AgentDefinition>> {
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

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.read().order)
            .finish()
    }
}
