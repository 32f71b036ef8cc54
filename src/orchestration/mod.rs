//! Orchestration layer for the coordination engine.
//!
//! This module contains the components that turn an objective into
//! completed work: decomposition into a task graph, capability-scored
//! assignment, topology-aware routing, weighted consensus, fault
//! isolation with work stealing, and the coordinator loop tying them
//! together.

pub mod consensus;
pub mod coordinator;
pub mod decomposer;
pub mod fault;
pub mod router;
pub mod scheduler;

pub use consensus::{
    CapabilityAlignmentPolicy, ConsensusConfig, ConsensusEngine, Proposal, ProposalId,
    ProposalStatus, Vote, VotePolicy,
};
pub use coordinator::{
    Command, Coordinator, CoordinatorChannels, CoordinatorEvent, PhaseTracker, SessionPhase,
};
pub use decomposer::{decompose, Strategy, Template, TemplateTask};
pub use fault::{BreakerConfig, CircuitBreaker, FaultEvent, FaultMonitor, StealConfig, WorkStealer};
pub use router::{Message, Payload, RouteNode, Router, Topology};
pub use scheduler::{Assignment, Scheduler};
