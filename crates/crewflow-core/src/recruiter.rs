//! Agent admission: reuse an existing agent, spawn a specialist, or reject.
//!
//! The decision is a pluggable async policy. Whatever strategy decides, the
//! budget check and the reservation happen in one atomic step through
//! [`TokenBudget::try_reserve`], so concurrent dispatches cannot overspend.
//! A rejected task carries no reservation and is never dispatched.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::budget::{BudgetExceeded, BudgetReservation, TokenBudget};
use crate::registry::{AgentDefinition, AgentId};
use crate::task::{Complexity, TaskSpec};

/// Turns a task into a token cost estimate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostModel {
    /// Estimate used for tasks that do not declare `estimated_tokens`.
    pub default_task_tokens: u64,
    pub simple_weight: u64,
    pub moderate_weight: u64,
    pub complex_weight: u64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            default_task_tokens: 2_000,
            simple_weight: 1,
            moderate_weight: 2,
            complex_weight: 4,
        }
    }
}

impl CostModel {
    pub fn weight(&self, complexity: Complexity) -> u64 {
        match complexity {
            Complexity::Simple => self.simple_weight,
            Complexity::Moderate => self.moderate_weight,
            Complexity::Complex => self.complex_weight,
        }
    }

    pub fn estimate(&self, task: &TaskSpec) -> u64 {
        task.estimated_tokens
            .unwrap_or(self.default_task_tokens)
            .saturating_mul(self.weight(task.complexity))
    }
}

/// Thresholds for the default recruiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecruiterConfig {
    /// Tasks costing at most this are always given to an existing agent.
    pub reuse_threshold: u64,
    /// Added to the reservation for a spawn. It gates admission only; the
    /// commit charges what the capability reports.
    pub spawn_overhead_tokens: u64,
    /// Hard cap on the agent pool, spawned agents included.
    pub max_pool_size: usize,
}

impl Default for RecruiterConfig {
    fn default() -> Self {
        Self {
            reuse_threshold: 8_000,
            spawn_overhead_tokens: 500,
            max_pool_size: 8,
        }
    }
}

/// Everything a policy may look at for one task.
pub struct RecruitRequest<'a> {
    pub task: &'a TaskSpec,
    /// Output of the cost model for this task.
    pub cost: u64,
    pub assigned: Arc<AgentDefinition>,
    /// Snapshot of the pool, in registration order.
    pub pool: Vec<Arc<AgentDefinition>>,
    /// Agents recruited earlier in this run.
    pub recruited: Vec<AgentId>,
    pub budget: &'a Arc<TokenBudget>,
    /// Tasks currently in flight per agent; a busy covering agent is the
    /// parallelism-benefit signal.
    pub in_flight: HashMap<AgentId, usize>,
}

/// Outcome of a recruitment decision.
#[derive(Debug)]
pub enum RecruitDecision {
    Reuse {
        agent: Arc<AgentDefinition>,
        reservation: BudgetReservation,
    },
    /// A new agent to register before dispatching to it.
    Spawn {
        agent: AgentDefinition,
        reservation: BudgetReservation,
    },
    Reject(BudgetExceeded),
}

impl RecruitDecision {
    pub fn label(&self) -> &'static str {
        match self {
            RecruitDecision::Reuse { .. } => "reuse",
            RecruitDecision::Spawn { .. } => "spawn",
            RecruitDecision::Reject(_) => "reject",
        }
    }
}

/// Decides which agent handles a task, reserving its cost on admission.
#[async_trait]
pub trait RecruiterPolicy: Send + Sync {
    async fn decide(&self, request: RecruitRequest<'_>) -> RecruitDecision;
}

/// Always dispatches to the assigned agent, budget permitting.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssignedOnly;

#[async_trait]
impl RecruiterPolicy for AssignedOnly {
    async fn decide(&self, request: RecruitRequest<'_>) -> RecruitDecision {
        match request.budget.try_reserve(request.cost) {
            Ok(reservation) => RecruitDecision::Reuse {
                agent: request.assigned,
                reservation,
            },
            Err(e) => RecruitDecision::Reject(e),
        }
    }
}

/// Deterministic threshold policy.
///
/// 1. A covering agent is the assigned agent if it has the required
///    specialization, else the first earlier recruit that does. An assigned
///    agent that may delegate also looks through the rest of the crew.
/// 2. With a covering agent the task is reused, unless it is expensive, that
///    agent is already busy and the pool has room, in which case a peer is
///    spawned to run alongside it.
/// 3. Without one, a specialist is spawned if the pool has room; otherwise the
///    assigned agent takes the task anyway.
///
/// Every branch admits only what [`TokenBudget::try_reserve`] allows.
#[derive(Debug, Clone, Default)]
pub struct ThresholdRecruiter {
    pub config: RecruiterConfig,
}

impl ThresholdRecruiter {
    pub fn new(config: RecruiterConfig) -> Self {
        Self { config }
    }

    fn covering_agent(&self, request: &RecruitRequest<'_>) -> Option<Arc<AgentDefinition>> {
        let wanted = request.task.required_specialization.as_deref();
        if request.assigned.covers(wanted) {
            return Some(Arc::clone(&request.assigned));
        }
        let delegating = request.assigned.delegation_allowed;
        request
            .pool
            .iter()
            .filter(|a| delegating || request.recruited.contains(&a.id))
            .find(|a| a.covers(wanted))
            .cloned()
    }
}

#[async_trait]
impl RecruiterPolicy for ThresholdRecruiter {
    async fn decide(&self, request: RecruitRequest<'_>) -> RecruitDecision {
        let pool_has_room = request.pool.len() < self.config.max_pool_size;
        let spawn_cost = request
            .cost
            .saturating_add(self.config.spawn_overhead_tokens);

        match self.covering_agent(&request) {
            Some(agent) => {
                let busy = request.in_flight.get(&agent.id).copied().unwrap_or(0) > 0;
                let wants_peer = request.cost > self.config.reuse_threshold && busy && pool_has_room;
                if wants_peer {
                    if let Ok(reservation) = request.budget.try_reserve(spawn_cost) {
                        return RecruitDecision::Spawn {
                            agent: peer_of(&agent, request.pool.len()),
                            reservation,
                        };
                    }
                }
                match request.budget.try_reserve(request.cost) {
                    Ok(reservation) => RecruitDecision::Reuse { agent, reservation },
                    Err(e) => RecruitDecision::Reject(e),
                }
            }
            None => {
                let Some(specialization) = request.task.required_specialization.as_deref() else {
                    // Unreachable in practice: no requirement means covered.
                    return match request.budget.try_reserve(request.cost) {
                        Ok(reservation) => RecruitDecision::Reuse {
                            agent: request.assigned,
                            reservation,
                        },
                        Err(e) => RecruitDecision::Reject(e),
                    };
                };
                if pool_has_room {
                    match request.budget.try_reserve(spawn_cost) {
                        Ok(reservation) => RecruitDecision::Spawn {
                            agent: specialist_for(specialization, &request.assigned),
                            reservation,
                        },
                        Err(e) => RecruitDecision::Reject(e),
                    }
                } else {
                    tracing::warn!(
                        task_id = %request.task.id,
                        specialization = %specialization,
                        "agent pool is full; assigning task to an agent without the specialization"
                    );
                    match request.budget.try_reserve(request.cost) {
                        Ok(reservation) => RecruitDecision::Reuse {
                            agent: request.assigned,
                            reservation,
                        },
                        Err(e) => RecruitDecision::Reject(e),
                    }
                }
            }
        }
    }
}

/// Id under which a specialist for `specialization` is registered.
pub fn specialist_id(specialization: &str) -> AgentId {
    let slug: String = specialization
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    AgentId(format!("{slug}_specialist"))
}

fn specialist_for(specialization: &str, template: &AgentDefinition) -> AgentDefinition {
    AgentDefinition {
        id: specialist_id(specialization),
        role: format!("{specialization} Specialist"),
        goal: format!("Deliver expert {specialization} work for the crew"),
        backstory: format!(
            "Recruited on demand because no agent in the crew covered {specialization}."
        ),
        delegation_allowed: false,
        specializations: vec![specialization.to_string()],
        capability: Arc::clone(&template.capability),
    }
}

fn peer_of(agent: &AgentDefinition, pool_len: usize) -> AgentDefinition {
    AgentDefinition {
        id: AgentId(format!("{}_peer_{}", agent.id, pool_len)),
        role: agent.role.clone(),
        goal: agent.goal.clone(),
        backstory: agent.backstory.clone(),
        delegation_allowed: false,
        specializations: agent.specializations.clone(),
        capability: Arc::clone(&agent.capability),
    }
}
