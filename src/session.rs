//! Session management and the coordinator control API.
//!
//! A [`SessionManager`] holds an agent roster and launches coordination
//! sessions: each `start_session` decomposes the objective, snapshots the
//! roster into a session-local registry, and spawns the coordinator loop
//! as an independent tokio task. Control and observation go through
//! channels (commands in, watch snapshots and events out), so callers
//! never hold a lock across an await point.

use crate::agent::{AgentId, AgentProfile, Executor};
use crate::config::CoordinationConfig;
use crate::core::graph::GraphSnapshot;
use crate::error::{Error, Result};
use crate::memory::InMemoryStore;
use crate::orchestration::consensus::{CapabilityAlignmentPolicy, Proposal, ProposalId, VotePolicy};
use crate::orchestration::coordinator::{
    Command, Coordinator, CoordinatorEvent, SessionPhase,
};
use crate::orchestration::decomposer::{decompose, Strategy};
use crate::orchestration::router::Topology;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Unique identifier for a coordination session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new unique session identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Point-in-time view of a session: phase, task graph, agents, and open
/// proposals. Published by the coordinator on every loop iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    /// The session this snapshot belongs to.
    pub session: SessionId,
    /// Current lifecycle phase.
    pub phase: SessionPhase,
    /// The active routing topology.
    pub topology: Topology,
    /// Task graph snapshot.
    pub graph: GraphSnapshot,
    /// Agent profiles, copy-on-read.
    pub agents: Vec<AgentProfile>,
    /// Proposals still open.
    pub open_proposals: Vec<Proposal>,
}

struct SessionHandle {
    command_tx: mpsc::Sender<Command>,
    status_rx: watch::Receiver<SessionStatus>,
    event_rx: Option<mpsc::Receiver<CoordinatorEvent>>,
    cancel: CancellationToken,
    join: Option<JoinHandle<Result<SessionPhase>>>,
}

/// Owner of the agent roster and all running sessions.
///
/// An explicit struct passed by reference, never a global, so embedding
/// hosts can run several independent managers side by side.
pub struct SessionManager {
    executor: Arc<dyn Executor>,
    vote_policy: Arc<dyn VotePolicy>,
    memory: Arc<InMemoryStore>,
    config: CoordinationConfig,
    roster: Vec<AgentProfile>,
    sessions: HashMap<SessionId, SessionHandle>,
}

impl SessionManager {
    /// Create a manager around an executor with default configuration,
    /// an in-memory store, and the capability-alignment vote policy.
    pub fn new(executor: Arc<dyn Executor>, config: CoordinationConfig) -> Self {
        Self {
            executor,
            vote_policy: Arc::new(CapabilityAlignmentPolicy),
            memory: InMemoryStore::new(),
            config,
            roster: Vec::new(),
            sessions: HashMap::new(),
        }
    }

    /// Replace the vote policy used by auto-voting agents.
    pub fn with_vote_policy(mut self, policy: Arc<dyn VotePolicy>) -> Self {
        self.vote_policy = policy;
        self
    }

    /// Replace the backing memory store.
    pub fn with_memory(mut self, memory: Arc<InMemoryStore>) -> Self {
        self.memory = memory;
        self
    }

    /// The backing memory store.
    pub fn memory(&self) -> &Arc<InMemoryStore> {
        &self.memory
    }

    /// Add an agent to the roster used by future sessions.
    pub fn register_agent(&mut self, profile: AgentProfile) -> Result<AgentId> {
        if self.roster.iter().any(|a| a.id == profile.id) {
            return Err(Error::DuplicateAgent { id: profile.id });
        }
        let id = profile.id;
        self.roster.push(profile);
        Ok(id)
    }

    /// Remove an agent from the roster. Running sessions keep their own
    /// registry; use [`SessionManager::deregister_from_session`] for those.
    pub fn remove_agent(&mut self, id: &AgentId) -> Result<()> {
        let before = self.roster.len();
        self.roster.retain(|a| a.id != *id);
        if self.roster.len() == before {
            return Err(Error::AgentNotFound { id: *id });
        }
        Ok(())
    }

    /// The current roster.
    pub fn roster(&self) -> &[AgentProfile] {
        &self.roster
    }

    /// Decompose an objective and launch a coordination session.
    ///
    /// Validation errors (empty objective, cyclic template) surface here
    /// synchronously; once a session id is returned, the loop is running.
    pub fn start_session(
        &mut self,
        objective: &str,
        strategy: &Strategy,
        topology: Topology,
    ) -> Result<SessionId> {
        let graph = decompose(objective, strategy)?;
        let id = SessionId::new();
        let (coordinator, channels) = Coordinator::new(
            id,
            graph,
            self.roster.clone(),
            topology,
            Arc::clone(&self.executor),
            Arc::clone(&self.vote_policy),
            self.memory.handle("coordinator"),
            self.config.clone(),
        )?;
        info!(session = %id, %strategy, %topology, "starting session");
        let join = tokio::spawn(coordinator.run());
        self.sessions.insert(
            id,
            SessionHandle {
                command_tx: channels.command_tx,
                status_rx: channels.status_rx,
                event_rx: Some(channels.event_rx),
                cancel: channels.cancel,
                join: Some(join),
            },
        );
        Ok(id)
    }

    fn handle(&self, id: &SessionId) -> Result<&SessionHandle> {
        self.sessions
            .get(id)
            .ok_or(Error::SessionNotFound(*id))
    }

    /// The latest status snapshot for a session.
    pub fn status(&self, id: &SessionId) -> Result<SessionStatus> {
        Ok(self.handle(id)?.status_rx.borrow().clone())
    }

    /// Take the session's event stream. Returns `None` if already taken.
    pub fn take_events(&mut self, id: &SessionId) -> Option<mpsc::Receiver<CoordinatorEvent>> {
        self.sessions.get_mut(id).and_then(|h| h.event_rx.take())
    }

    /// Cancel a session. In-flight executions observe the cancellation
    /// token and report `Cancelled`.
    pub fn cancel(&self, id: &SessionId) -> Result<()> {
        self.handle(id)?.cancel.cancel();
        Ok(())
    }

    async fn command(&self, id: &SessionId, command: Command) -> Result<()> {
        self.handle(id)?
            .command_tx
            .send(command)
            .await
            .map_err(|_| Error::ControlChannelClosed)
    }

    /// Submit an external vote on an open proposal.
    pub async fn submit_vote(
        &self,
        id: &SessionId,
        proposal: ProposalId,
        agent: AgentId,
        option: &str,
        confidence: f64,
    ) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.command(
            id,
            Command::SubmitVote {
                proposal,
                agent,
                option: option.to_string(),
                confidence,
                reply,
            },
        )
        .await?;
        response.await.map_err(|_| Error::ControlChannelClosed)?
    }

    /// Switch a running session's routing topology.
    pub async fn adapt_topology(&self, id: &SessionId, topology: Topology) -> Result<()> {
        self.adapt(id, topology, None).await
    }

    /// Switch topology and member ordering; the order must keep every
    /// member or the request is rejected with `DisconnectedTopology`.
    pub async fn adapt_topology_with_order(
        &self,
        id: &SessionId,
        topology: Topology,
        order: Vec<AgentId>,
    ) -> Result<()> {
        self.adapt(id, topology, Some(order)).await
    }

    async fn adapt(
        &self,
        id: &SessionId,
        topology: Topology,
        order: Option<Vec<AgentId>>,
    ) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.command(
            id,
            Command::AdaptTopology {
                topology,
                order,
                reply,
            },
        )
        .await?;
        response.await.map_err(|_| Error::ControlChannelClosed)?
    }

    /// Deregister an agent from a running session.
    pub async fn deregister_from_session(
        &self,
        id: &SessionId,
        agent: AgentId,
        force: bool,
    ) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.command(
            id,
            Command::Deregister {
                agent,
                force,
                reply,
            },
        )
        .await?;
        response.await.map_err(|_| Error::ControlChannelClosed)?
    }

    /// Wait for a session's loop to reach its terminal phase.
    pub async fn wait(&mut self, id: &SessionId) -> Result<SessionPhase> {
        let join = self
            .sessions
            .get_mut(id)
            .ok_or(Error::SessionNotFound(*id))?
            .join
            .take()
            .ok_or(Error::SessionNotFound(*id))?;
        join.await.map_err(|e| Error::TaskJoin(e.to_string()))?
    }
}
