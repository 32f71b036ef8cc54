//! Agent identity, profile, and the execution seam.
//!
//! An agent is a unit of execution with declared capabilities. The engine
//! never runs work itself: it calls the [`Executor`] trait, implemented by
//! the embedding host (a subprocess wrapper, an LLM bridge, test mocks).

use crate::core::capability::Capability;
use crate::core::task::{Artifact, Task};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Smoothing factor for the exponentially-weighted performance score.
const PERFORMANCE_ALPHA: f64 = 0.3;

/// Unique identifier for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub Uuid);

impl AgentId {
    /// Create a new unique agent identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AgentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Agent availability status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Registered and available for work.
    #[default]
    Idle,
    /// Currently executing at least one task.
    Busy,
    /// Failing health checks; excluded from scheduling.
    Unhealthy,
    /// Deregistered; kept only for record.
    Removed,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Unhealthy => write!(f, "unhealthy"),
            AgentStatus::Removed => write!(f, "removed"),
        }
    }
}

/// Circuit breaker position for an agent, mirrored into its profile so
/// snapshots carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation; assignments allowed.
    #[default]
    Closed,
    /// Tripped; no new assignments until the cooldown elapses.
    Open,
    /// Cooldown elapsed; one trial assignment allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Registered agent record: identity, capabilities, load, and health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Unique identifier for this agent.
    pub id: AgentId,
    /// Human-readable name.
    pub name: String,
    /// Capabilities this agent declares.
    pub capabilities: HashSet<Capability>,
    /// Primary specialization, if the agent declares one.
    pub primary: Option<Capability>,
    /// Current availability status.
    pub status: AgentStatus,
    /// Number of tasks currently queued or running on this agent.
    pub current_load: u32,
    /// Exponentially-weighted success rate in [0, 1].
    pub performance_score: f64,
    /// Circuit breaker position.
    pub circuit: CircuitState,
    /// When the agent registered.
    pub registered_at: DateTime<Utc>,
}

impl AgentProfile {
    /// Create an idle profile with the given name and capabilities.
    pub fn new<I, C>(name: &str, capabilities: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Capability>,
    {
        Self {
            id: AgentId::new(),
            name: name.to_string(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            primary: None,
            status: AgentStatus::Idle,
            current_load: 0,
            performance_score: 0.5,
            circuit: CircuitState::Closed,
            registered_at: Utc::now(),
        }
    }

    /// Declare a primary specialization; also added to capabilities.
    pub fn with_primary(mut self, capability: impl Into<Capability>) -> Self {
        let cap = capability.into();
        self.capabilities.insert(cap.clone());
        self.primary = Some(cap);
        self
    }

    /// Whether the agent declares the given capability.
    pub fn has_capability(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Number of the task's required capabilities this agent declares.
    pub fn matching_capabilities(&self, required: &HashSet<Capability>) -> usize {
        required.iter().filter(|c| self.has_capability(c)).count()
    }

    /// Whether the agent shares at least one capability with the set.
    pub fn overlaps(&self, required: &HashSet<Capability>) -> bool {
        required.is_empty() || self.matching_capabilities(required) > 0
    }

    /// Fold a task outcome into the performance score (EWMA).
    pub fn record_outcome(&mut self, success: bool) {
        let observation = if success { 1.0 } else { 0.0 };
        self.performance_score =
            self.performance_score * (1.0 - PERFORMANCE_ALPHA) + observation * PERFORMANCE_ALPHA;
        self.performance_score = self.performance_score.clamp(0.0, 1.0);
    }

    /// Whether the circuit breaker permits new assignments.
    pub fn circuit_allows(&self) -> bool {
        matches!(self.circuit, CircuitState::Closed | CircuitState::HalfOpen)
    }
}

/// Agent Execution Interface.
///
/// Implementations perform the actual work for a task. The engine only
/// requires the call to be idempotent-safe to retry and to honor the
/// cancellation token: a cancelled call must return promptly so the task
/// can be reported `Cancelled` rather than `Succeeded` or `Failed`.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute `task` on behalf of `agent`, producing an artifact.
    async fn execute(
        &self,
        agent: &AgentProfile,
        task: &Task,
        cancel: CancellationToken,
    ) -> Result<Artifact>;
}
