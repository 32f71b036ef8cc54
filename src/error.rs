use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Objective is empty or cannot be decomposed into tasks")]
    EmptyObjective,

    #[error("Dependency from {from} to {to} would create a cycle")]
    GraphCycle { from: String, to: String },

    #[error("Template references unknown task {name:?}")]
    UnknownTemplateTask { name: String },

    #[error("Task not found: {id}")]
    TaskNotFound { id: crate::core::task::TaskId },

    #[error("Agent already registered: {id}")]
    DuplicateAgent { id: crate::agent::AgentId },

    #[error("Agent not found: {id}")]
    AgentNotFound { id: crate::agent::AgentId },

    #[error("Agent {id} has a running task and cannot be deregistered")]
    AgentBusy { id: crate::agent::AgentId },

    #[error("No eligible agent for task {task}")]
    NoEligibleAgent { task: crate::core::task::TaskId },

    #[error("No route from {from} to {to} under the current topology")]
    Unreachable { from: String, to: String },

    #[error("Topology change would disconnect {node}")]
    DisconnectedTopology { node: String },

    #[error("Proposal not found: {id}")]
    ProposalNotFound { id: crate::orchestration::consensus::ProposalId },

    #[error("Proposal {topic:?} has no options")]
    EmptyProposal { topic: String },

    #[error("Agent {agent} already voted on proposal {proposal}")]
    DuplicateVote {
        proposal: crate::orchestration::consensus::ProposalId,
        agent: crate::agent::AgentId,
    },

    #[error("Option {option:?} is not among the proposal's options")]
    UnknownOption {
        proposal: crate::orchestration::consensus::ProposalId,
        option: String,
    },

    #[error("Proposal {id} is closed")]
    ProposalClosed { id: crate::orchestration::consensus::ProposalId },

    #[error("Vote confidence {value} is outside [0, 1]")]
    InvalidConfidence { value: f64 },

    #[error("Consensus rejected task {task}")]
    ConsensusRejected { task: crate::core::task::TaskId },

    #[error("Execution of task {task} failed: {reason}")]
    ExecutionFailed {
        task: crate::core::task::TaskId,
        reason: String,
    },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },

    #[error("Session not found: {0}")]
    SessionNotFound(crate::session::SessionId),

    #[error("Namespace {namespace} is owned by {owner}")]
    NamespaceOwned { namespace: String, owner: String },

    #[error("Memory store unavailable: {0}")]
    MemoryUnavailable(String),

    #[error("Coordinator control channel closed")]
    ControlChannelClosed,

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::TomlParse(_) => "toml_parse",
            Error::TomlSerialize(_) => "toml_serialize",
            Error::EmptyObjective => "empty_objective",
            Error::GraphCycle { .. } => "graph_cycle",
            Error::UnknownTemplateTask { .. } => "unknown_template_task",
            Error::TaskNotFound { .. } => "task_not_found",
            Error::DuplicateAgent { .. } => "duplicate_agent",
            Error::AgentNotFound { .. } => "agent_not_found",
            Error::AgentBusy { .. } => "agent_busy",
            Error::NoEligibleAgent { .. } => "no_eligible_agent",
            Error::Unreachable { .. } => "unreachable",
            Error::DisconnectedTopology { .. } => "disconnected_topology",
            Error::ProposalNotFound { .. } => "proposal_not_found",
            Error::EmptyProposal { .. } => "empty_proposal",
            Error::DuplicateVote { .. } => "duplicate_vote",
            Error::UnknownOption { .. } => "unknown_option",
            Error::ProposalClosed { .. } => "proposal_closed",
            Error::InvalidConfidence { .. } => "invalid_confidence",
            Error::ConsensusRejected { .. } => "consensus_rejected",
            Error::ExecutionFailed { .. } => "execution_failed",
            Error::Timeout(_) => "timeout",
            Error::InvalidPhaseTransition { .. } => "invalid_phase_transition",
            Error::SessionNotFound(_) => "session_not_found",
            Error::NamespaceOwned { .. } => "namespace_owned",
            Error::MemoryUnavailable(_) => "memory_unavailable",
            Error::ControlChannelClosed => "control_channel_closed",
            Error::TaskJoin(_) => "task_join",
        }
    }

    /// Actionable remediation hint for callers surfacing this error.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::EmptyObjective => "provide a non-empty objective string",
            Error::GraphCycle { .. } => "remove the cyclic dependency from the template",
            Error::DuplicateAgent { .. } => "deregister the existing agent first or use a new id",
            Error::AgentBusy { .. } => "wait for the running task or deregister with force",
            Error::NoEligibleAgent { .. } => {
                "register an agent with the required capabilities or wait for circuits to close"
            }
            Error::Unreachable { .. } | Error::DisconnectedTopology { .. } => {
                "adapt the topology so every member stays connected"
            }
            Error::DuplicateVote { .. } => "each agent may vote once per proposal",
            Error::UnknownOption { .. } => "vote for one of the proposal's listed options",
            Error::ProposalClosed { .. } => "the proposal reached its deadline; open a new one",
            Error::InvalidConfidence { .. } => "confidence must be within [0, 1]",
            Error::ConsensusRejected { .. } => {
                "configure a consensus fallback or adjust the proposal threshold"
            }
            Error::ExecutionFailed { .. } | Error::Timeout(_) => {
                "the task will be retried on a different agent until the retry budget is spent"
            }
            Error::MemoryUnavailable(_) => "the session cannot continue; restart with a healthy store",
            Error::NamespaceOwned { .. } => "write through the owning component or share the namespace",
            _ => "retry the operation or check the session configuration",
        }
    }

    /// True for errors that are never retried (rejected synchronously).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::EmptyObjective
                | Error::GraphCycle { .. }
                | Error::UnknownTemplateTask { .. }
                | Error::UnknownOption { .. }
                | Error::DuplicateVote { .. }
                | Error::DuplicateAgent { .. }
                | Error::EmptyProposal { .. }
                | Error::InvalidConfidence { .. }
                | Error::InvalidPhaseTransition { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
