//! colony: a coordination engine for cooperating agent pools.
//!
//! The engine decomposes an objective into a task graph, assigns tasks to
//! agents by declared capability, routes coordination messages under a
//! configurable topology, gates flagged tasks on weighted consensus, and
//! keeps the pool healthy with per-agent circuit breakers and work
//! stealing. Task execution itself is an opaque capability call behind
//! the [`agent::Executor`] trait, so hosts plug in subprocesses, LLM
//! bridges, or test mocks.
//!
//! Sessions are explicit values owned by a [`session::SessionManager`];
//! there is no global mutable state anywhere in the crate.

pub mod agent;
pub mod config;
pub mod core;
pub mod error;
pub mod memory;
pub mod orchestration;
pub mod registry;
pub mod session;
pub mod telemetry;

pub use agent::{AgentId, AgentProfile, AgentStatus, CircuitState, Executor};
pub use config::{ConsensusFallback, CoordinationConfig};
pub use error::{Error, Result};
pub use session::{SessionId, SessionManager, SessionStatus};
