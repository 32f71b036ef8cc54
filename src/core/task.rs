//! Task data model for the coordination graph.
//!
//! Tasks are the atomic units of work assigned to agents. Each task tracks
//! its required capabilities, dependency set, assignment, consensus gating,
//! and final artifact.

use crate::agent::AgentId;
use crate::core::capability::Capability;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a task within a session.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Task status in its lifecycle.
///
/// `Pending → Ready → Assigned → Running → {Succeeded, Failed, Cancelled}`.
/// A task is `Ready` only when every dependency has `Succeeded`; a retried
/// task moves back from `Failed` bookkeeping to `Ready` by the coordinator
/// while its retry budget lasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Task created but dependencies are not yet satisfied.
    Pending,
    /// Dependencies satisfied, waiting for an agent.
    Ready,
    /// An agent has been selected; work has not started.
    Assigned,
    /// The assigned agent is executing the task.
    Running,
    /// Task completed successfully.
    Succeeded,
    /// Task failed with an error.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    /// Task was cancelled before completion.
    Cancelled {
        /// Reason for the cancellation.
        reason: String,
    },
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::Assigned => write!(f, "assigned"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Cancelled { reason } => write!(f, "cancelled: {}", reason),
        }
    }
}

/// Result payload produced by an agent for a completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// The task this artifact belongs to.
    pub task_id: TaskId,
    /// One-line human-readable summary of the outcome.
    pub summary: String,
    /// Structured result data, opaque to the engine.
    pub data: serde_json::Value,
    /// The agent that produced the artifact.
    pub produced_by: AgentId,
    /// When the artifact was produced.
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Create an artifact for a task.
    pub fn new(task_id: TaskId, produced_by: AgentId, summary: &str, data: serde_json::Value) -> Self {
        Self {
            task_id,
            summary: summary.to_string(),
            data,
            produced_by,
            created_at: Utc::now(),
        }
    }
}

/// A single task in the coordination graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Human-readable name for the task.
    pub name: String,
    /// Detailed description of what the task should accomplish.
    pub description: String,
    /// Tasks that must succeed before this one becomes ready.
    pub dependencies: HashSet<TaskId>,
    /// Capabilities an agent needs to execute this task.
    pub required_capabilities: HashSet<Capability>,
    /// Relative priority; higher values are scheduled and kept first.
    pub priority: i32,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Agent currently responsible for the task, if any.
    pub assigned_agent: Option<AgentId>,
    /// Whether dispatch is gated on a consensus decision.
    pub requires_consensus: bool,
    /// Optional tasks do not cascade failure to dependents.
    pub optional: bool,
    /// Per-task execution timeout in seconds, if any.
    pub timeout_secs: Option<u64>,
    /// Number of execution attempts so far.
    pub attempts: u32,
    /// Final artifact once the task has succeeded.
    pub result: Option<Artifact>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When execution last started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task with the given name and description.
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            id: TaskId::new(),
            name: name.to_string(),
            description: description.to_string(),
            dependencies: HashSet::new(),
            required_capabilities: HashSet::new(),
            priority: 0,
            status: TaskStatus::Pending,
            assigned_agent: None,
            requires_consensus: false,
            optional: false,
            timeout_secs: None,
            attempts: 0,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Add a required capability.
    pub fn with_capability(mut self, capability: impl Into<Capability>) -> Self {
        self.required_capabilities.insert(capability.into());
        self
    }

    /// Set the task priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Gate dispatch of this task on a consensus decision.
    pub fn with_consensus(mut self) -> Self {
        self.requires_consensus = true;
        self
    }

    /// Mark the task as optional: its failure does not cascade.
    pub fn with_optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Set a per-task execution timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Per-task execution timeout as a `Duration`, if configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// The dominant required capability: lexicographically first, so the
    /// specialist bonus is a pure function of the task.
    pub fn dominant_capability(&self) -> Option<&Capability> {
        self.required_capabilities.iter().min()
    }

    /// Transition from Pending to Ready once dependencies are satisfied.
    pub fn mark_ready(&mut self) {
        self.status = TaskStatus::Ready;
    }

    /// Assign an agent and transition to Assigned.
    pub fn assign(&mut self, agent_id: AgentId) {
        self.assigned_agent = Some(agent_id);
        self.status = TaskStatus::Assigned;
    }

    /// Move a queued (Assigned, not yet Running) task to a different agent.
    pub fn reassign(&mut self, agent_id: AgentId) {
        self.assigned_agent = Some(agent_id);
    }

    /// Start execution: transition to Running and record the start time.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        self.attempts += 1;
    }

    /// Mark the task as succeeded with its artifact.
    pub fn succeed(&mut self, artifact: Artifact) {
        self.status = TaskStatus::Succeeded;
        self.result = Some(artifact);
        self.completed_at = Some(Utc::now());
    }

    /// Mark the task as failed with an error message.
    pub fn fail(&mut self, error: &str) {
        self.status = TaskStatus::Failed {
            error: error.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }

    /// Cancel the task with a reason.
    pub fn cancel(&mut self, reason: &str) {
        self.status = TaskStatus::Cancelled {
            reason: reason.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }

    /// Requeue a failed attempt: back to Ready for reassignment.
    pub fn requeue(&mut self) {
        self.status = TaskStatus::Ready;
        self.assigned_agent = None;
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Succeeded | TaskStatus::Failed { .. } | TaskStatus::Cancelled { .. }
        )
    }

    /// Check if the task is queued work that may be rebalanced:
    /// Ready, or Assigned but not yet Running.
    pub fn is_queued(&self) -> bool {
        matches!(self.status, TaskStatus::Ready | TaskStatus::Assigned)
    }

    /// Check if the task succeeded.
    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }
}
