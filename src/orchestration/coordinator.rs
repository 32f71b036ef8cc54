//! The coordinator: session phase machine and execution loop.
//!
//! The coordinator is the exclusive owner of the task graph and agent
//! registry. Each tick it advances task statuses, gates consensus-flagged
//! tasks on proposals, plans assignments, applies work stealing, and
//! starts executions as agents free up. Executions run as independent
//! tokio tasks reporting back over a channel, so votes, commands, and
//! health signals keep flowing while work is in flight.

use crate::agent::{AgentId, AgentProfile, CircuitState, Executor};
use crate::config::{ConsensusFallback, CoordinationConfig};
use crate::core::graph::TaskGraph;
use crate::core::task::{Artifact, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::memory::{MemoryHandle, MemoryStore};
use crate::orchestration::consensus::{
    ConsensusEngine, ProposalId, ProposalStatus, VotePolicy,
};
use crate::orchestration::fault::FaultMonitor;
use crate::orchestration::router::{Message, Payload, RouteNode, Router, Topology};
use crate::orchestration::scheduler::{Assignment, Scheduler};
use crate::registry::AgentRegistry;
use crate::session::{SessionId, SessionStatus};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Option used for task-gating proposals.
const GATE_APPROVE: &str = "approve";
/// Counter-option used for task-gating proposals.
const GATE_REJECT: &str = "reject";

/// Capacity of the outcome and event channels.
const CHANNEL_CAPACITY: usize = 256;

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Constructed, not yet running.
    #[default]
    Initialized,
    /// The execution loop is active.
    Running,
    /// Every task succeeded or was cancelled without a required failure.
    Completed,
    /// A required task exhausted its budget, or a fatal error occurred.
    Failed,
    /// The session was cancelled.
    Cancelled,
}

impl SessionPhase {
    /// Whether the phase is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionPhase::Completed | SessionPhase::Failed | SessionPhase::Cancelled
        )
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Initialized => write!(f, "initialized"),
            SessionPhase::Running => write!(f, "running"),
            SessionPhase::Completed => write!(f, "completed"),
            SessionPhase::Failed => write!(f, "failed"),
            SessionPhase::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A record of a phase transition with timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseHistoryEntry {
    /// The phase that was entered.
    pub phase: SessionPhase,
    /// When this phase was entered.
    pub entered_at: DateTime<Utc>,
}

/// Tracks the session phase and enforces valid transitions.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    phase: SessionPhase,
    history: Vec<PhaseHistoryEntry>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    /// Start in `Initialized`.
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Initialized,
            history: vec![PhaseHistoryEntry {
                phase: SessionPhase::Initialized,
                entered_at: Utc::now(),
            }],
        }
    }

    /// The current phase.
    pub fn current(&self) -> SessionPhase {
        self.phase
    }

    /// All phases visited, in order.
    pub fn history(&self) -> &[PhaseHistoryEntry] {
        &self.history
    }

    /// Check whether a transition is valid from the current phase.
    pub fn can_transition(&self, target: SessionPhase) -> bool {
        matches!(
            (self.phase, target),
            (SessionPhase::Initialized, SessionPhase::Running)
                | (SessionPhase::Initialized, SessionPhase::Cancelled)
                | (SessionPhase::Running, SessionPhase::Completed)
                | (SessionPhase::Running, SessionPhase::Failed)
                | (SessionPhase::Running, SessionPhase::Cancelled)
        )
    }

    /// Transition to a new phase, recording history.
    pub fn transition(&mut self, target: SessionPhase) -> Result<()> {
        if !self.can_transition(target) {
            return Err(Error::InvalidPhaseTransition {
                from: self.phase.to_string(),
                to: target.to_string(),
            });
        }
        self.phase = target;
        self.history.push(PhaseHistoryEntry {
            phase: target,
            entered_at: Utc::now(),
        });
        Ok(())
    }
}

/// Events emitted by the coordinator for observers.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    /// A task was assigned to an agent.
    TaskAssigned { task: TaskId, agent: AgentId },
    /// An agent began executing a task.
    TaskStarted { task: TaskId, agent: AgentId },
    /// A task succeeded.
    TaskSucceeded { task: TaskId, agent: AgentId },
    /// A task attempt failed and will be retried.
    TaskRetrying { task: TaskId, attempts: u32 },
    /// A task failed terminally.
    TaskFailed {
        task: TaskId,
        agent: AgentId,
        error: String,
    },
    /// Queued work moved between agents.
    TaskReassigned {
        task: TaskId,
        from: AgentId,
        to: AgentId,
    },
    /// A consensus proposal was opened for a gated task.
    ProposalOpened { proposal: ProposalId, task: TaskId },
    /// A proposal reached a decision.
    ProposalDecided {
        proposal: ProposalId,
        approved: bool,
    },
    /// An agent's circuit breaker tripped open.
    CircuitOpened { agent: AgentId },
    /// The session reached a terminal phase.
    SessionFinished { phase: SessionPhase },
}

/// Commands accepted by a running coordinator.
#[derive(Debug)]
pub enum Command {
    /// Cast a vote on an open proposal.
    SubmitVote {
        proposal: ProposalId,
        agent: AgentId,
        option: String,
        confidence: f64,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Switch the routing topology at runtime; `order` optionally
    /// replaces the member ordering (and must keep every member).
    AdaptTopology {
        topology: Topology,
        order: Option<Vec<AgentId>>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Deregister an agent; `force` cancels its running work first.
    Deregister {
        agent: AgentId,
        force: bool,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Channel endpoints for controlling and observing a coordinator.
pub struct CoordinatorChannels {
    /// Command channel into the running loop.
    pub command_tx: mpsc::Sender<Command>,
    /// Live status snapshots.
    pub status_rx: watch::Receiver<SessionStatus>,
    /// Event stream.
    pub event_rx: mpsc::Receiver<CoordinatorEvent>,
    /// Session cancellation token.
    pub cancel: CancellationToken,
}

struct TaskOutcome {
    task: TaskId,
    agent: AgentId,
    kind: OutcomeKind,
}

enum OutcomeKind {
    Succeeded(Artifact),
    Failed(String),
    TimedOut(std::time::Duration),
    Cancelled,
}

/// The coordination engine's root component.
pub struct Coordinator {
    session: SessionId,
    config: CoordinationConfig,
    graph: TaskGraph,
    registry: AgentRegistry,
    scheduler: Scheduler,
    consensus: ConsensusEngine,
    fault: FaultMonitor,
    router: Router,
    router_rx: mpsc::Receiver<Message>,
    agent_inboxes: HashMap<AgentId, mpsc::Receiver<Message>>,
    executor: Arc<dyn Executor>,
    vote_policy: Arc<dyn VotePolicy>,
    memory: MemoryHandle,
    phase: PhaseTracker,
    cancel: CancellationToken,
    outcome_tx: mpsc::Sender<TaskOutcome>,
    outcome_rx: mpsc::Receiver<TaskOutcome>,
    command_rx: mpsc::Receiver<Command>,
    status_tx: watch::Sender<SessionStatus>,
    event_tx: mpsc::Sender<CoordinatorEvent>,
    task_cancels: HashMap<TaskId, CancellationToken>,
    exclusions: HashMap<TaskId, HashSet<AgentId>>,
    gating: HashMap<ProposalId, TaskId>,
    gated: HashSet<TaskId>,
    cleared: HashSet<TaskId>,
}

impl Coordinator {
    /// Build a coordinator over a decomposed graph and an agent pool.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: SessionId,
        graph: TaskGraph,
        agents: Vec<AgentProfile>,
        topology: Topology,
        executor: Arc<dyn Executor>,
        vote_policy: Arc<dyn VotePolicy>,
        memory: MemoryHandle,
        config: CoordinationConfig,
    ) -> Result<(Self, CoordinatorChannels)> {
        let mut registry = AgentRegistry::new();
        let (mut router, router_rx) = Router::new(topology);
        let mut agent_inboxes = HashMap::new();
        for profile in agents {
            let id = profile.id;
            registry.register(profile)?;
            agent_inboxes.insert(id, router.join(id));
        }

        let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (outcome_tx, outcome_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let phase = PhaseTracker::new();
        let initial_status = SessionStatus {
            session,
            phase: phase.current(),
            topology: router.topology(),
            graph: graph.snapshot(),
            agents: registry.snapshot(),
            open_proposals: Vec::new(),
        };
        let (status_tx, status_rx) = watch::channel(initial_status);

        let scheduler = Scheduler::new(config.load_cap);
        let consensus = ConsensusEngine::new(config.consensus.clone());
        let fault = FaultMonitor::new(config.breaker.clone(), config.steal.clone());

        Ok((
            Self {
                session,
                config,
                graph,
                registry,
                scheduler,
                consensus,
                fault,
                router,
                router_rx,
                agent_inboxes,
                executor,
                vote_policy,
                memory,
                phase,
                cancel: cancel.clone(),
                outcome_tx,
                outcome_rx,
                command_rx,
                status_tx,
                event_tx,
                task_cancels: HashMap::new(),
                exclusions: HashMap::new(),
                gating: HashMap::new(),
                gated: HashSet::new(),
                cleared: HashSet::new(),
            },
            CoordinatorChannels {
                command_tx,
                status_rx,
                event_rx,
                cancel,
            },
        ))
    }

    fn emit(&self, event: CoordinatorEvent) {
        let _ = self.event_tx.try_send(event);
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(SessionStatus {
            session: self.session,
            phase: self.phase.current(),
            topology: self.router.topology(),
            graph: self.graph.snapshot(),
            agents: self.registry.snapshot(),
            open_proposals: self.consensus.open_proposals(),
        });
    }

    async fn persist(&self) -> Result<()> {
        let ns = format!("sessions/{}", self.session);
        self.memory
            .put(
                &ns,
                "graph",
                serde_json::to_value(self.graph.snapshot())?,
                None,
            )
            .await?;
        self.memory
            .put(
                &ns,
                "agents",
                serde_json::to_value(self.registry.snapshot())?,
                None,
            )
            .await?;
        let proposals_ns = format!("sessions/{}/proposals", self.session);
        let mut entries = Vec::new();
        for proposal in self.consensus.all_proposals() {
            entries.push((proposal.id.to_string(), serde_json::to_value(proposal)?));
        }
        let writes = entries
            .iter()
            .map(|(key, value)| self.memory.put(&proposals_ns, key, value.clone(), None));
        for result in join_all(writes).await {
            result?;
        }
        Ok(())
    }

    /// Run the execution loop to a terminal phase.
    pub async fn run(mut self) -> Result<SessionPhase> {
        self.phase.transition(SessionPhase::Running)?;
        info!(session = %self.session, "session running");
        if let Err(err) = self.persist().await {
            error!(session = %self.session, %err, "initial persist failed");
            self.finish(SessionPhase::Failed).await;
            return Ok(self.phase.current());
        }

        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            self.publish_status();
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(session = %self.session, "session cancelled");
                    self.finish(SessionPhase::Cancelled).await;
                }
                Some(command) = self.command_rx.recv() => {
                    self.handle_command(command).await;
                }
                Some(outcome) = self.outcome_rx.recv() => {
                    self.handle_outcome(outcome).await;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
            if self.phase.current().is_terminal() {
                break;
            }
        }

        self.publish_status();
        let phase = self.phase.current();
        self.emit(CoordinatorEvent::SessionFinished { phase });
        info!(session = %self.session, %phase, "session finished");
        Ok(phase)
    }

    /// One pass of the coordination loop.
    async fn tick(&mut self) {
        let now = Utc::now();

        // Expired proposals resolve their gated tasks.
        for (proposal, status) in self.consensus.expire(now) {
            self.resolve_gate(proposal, status).await;
            if self.phase.current().is_terminal() {
                return;
            }
        }

        // Cooldowns elapse: open circuits become half-open.
        for event in self.fault.poll(now) {
            if let crate::orchestration::fault::FaultEvent::CircuitHalfOpen { agent } = event {
                debug!(%agent, "circuit half-open");
                self.registry.set_circuit(&agent, CircuitState::HalfOpen);
            }
        }

        self.drain_inboxes().await;
        if self.phase.current().is_terminal() {
            return;
        }
        self.graph.advance_ready();
        self.open_gates(now).await;
        if self.phase.current().is_terminal() {
            return;
        }
        self.relax_exhausted_exclusions();
        self.assign_ready().await;
        self.apply_steals().await;
        self.fail_unservable_tasks().await;
        if self.phase.current().is_terminal() {
            return;
        }
        self.pump_agents().await;
        self.check_termination().await;
    }

    /// Drain router inboxes; with auto-vote on, agents answer vote
    /// requests through their policy.
    async fn drain_inboxes(&mut self) {
        while self.router_rx.try_recv().is_ok() {}

        let mut pending_votes = Vec::new();
        for (agent_id, inbox) in self.agent_inboxes.iter_mut() {
            while let Ok(message) = inbox.try_recv() {
                if let Payload::VoteRequest {
                    proposal,
                    topic,
                    options,
                } = message.payload
                {
                    if !self.config.auto_vote {
                        continue;
                    }
                    let Some(profile) = self.registry.get(agent_id) else {
                        continue;
                    };
                    let vote = self.vote_policy.vote(profile, &topic, &options);
                    pending_votes.push((proposal, *agent_id, vote));
                }
            }
        }

        let now = Utc::now();
        for (proposal, agent, vote) in pending_votes {
            match self
                .consensus
                .cast_vote(&proposal, agent, &vote.option, vote.confidence, now)
            {
                Ok(status) if status.is_terminal() => {
                    self.resolve_gate(proposal, status).await;
                }
                Ok(_) => {}
                Err(err) => debug!(%proposal, %agent, %err, "auto vote rejected"),
            }
        }
    }

    /// Open proposals for ready consensus-gated tasks.
    async fn open_gates(&mut self, now: DateTime<Utc>) {
        let candidates: Vec<(TaskId, String)> = self
            .graph
            .ready_tasks()
            .into_iter()
            .filter_map(|id| {
                let task = self.graph.get_task(&id)?;
                if task.requires_consensus
                    && !self.cleared.contains(&id)
                    && !self.gated.contains(&id)
                {
                    Some((id, format!("approve task {}: {}", task.name, task.description)))
                } else {
                    None
                }
            })
            .collect();

        for (task_id, topic) in candidates {
            let options = vec![GATE_APPROVE.to_string(), GATE_REJECT.to_string()];
            let eligible = self.registry.active_count();
            let proposal = match self
                .consensus
                .open_proposal(&topic, options.clone(), eligible, now)
            {
                Ok(id) => id,
                Err(err) => {
                    error!(%task_id, %err, "failed to open proposal");
                    continue;
                }
            };
            self.gating.insert(proposal, task_id);
            self.gated.insert(task_id);
            self.emit(CoordinatorEvent::ProposalOpened {
                proposal,
                task: task_id,
            });
            if let Err(err) = self
                .router
                .broadcast(
                    RouteNode::Coordinator,
                    Payload::VoteRequest {
                        proposal,
                        topic: topic.clone(),
                        options,
                    },
                )
                .await
            {
                warn!(%proposal, %err, "vote request broadcast failed");
            }
        }
    }

    /// A retry whose exclusions rule out every agent falls back to the
    /// previous assignee rather than stalling forever.
    fn relax_exhausted_exclusions(&mut self) {
        let agents = self.snapshot_eligible();
        let ready = self.graph.ready_tasks();
        for task_id in ready {
            let Some(exclude) = self.exclusions.get(&task_id) else {
                continue;
            };
            let Some(task) = self.graph.get_task(&task_id) else {
                continue;
            };
            if self.scheduler.select(&agents, task, exclude).is_none()
                && self
                    .scheduler
                    .select(&agents, task, &HashSet::new())
                    .is_some()
            {
                debug!(%task_id, "no alternative agent; retrying on previous assignee");
                self.exclusions.remove(&task_id);
            }
        }
    }

    fn snapshot_eligible(&mut self) -> Vec<AgentProfile> {
        let snapshot = self.registry.snapshot();
        snapshot
            .into_iter()
            .filter(|a| self.fault.allows(&a.id))
            .collect()
    }

    async fn assign_ready(&mut self) {
        let agents = self.snapshot_eligible();
        let cleared = &self.cleared;
        let plans = self.scheduler.plan(
            &self.graph,
            &agents,
            |task| cleared.contains(&task.id),
            &self.exclusions,
        );
        for Assignment { task, agent } in plans {
            if let Err(err) = self.dispatch(task, agent).await {
                warn!(%task, %agent, %err, "dispatch failed");
            }
        }
    }

    async fn dispatch(&mut self, task_id: TaskId, agent_id: AgentId) -> Result<()> {
        self.registry.add_assignment(&agent_id)?;
        if self.fault.state(&agent_id) == CircuitState::HalfOpen {
            self.fault.begin_trial(&agent_id);
        }
        let Some(task) = self.graph.get_task_mut(&task_id) else {
            self.registry.abort_task(&agent_id, &task_id)?;
            return Err(Error::TaskNotFound { id: task_id });
        };
        task.assign(agent_id);
        debug!(task = %task_id, agent = %agent_id, "task assigned");
        self.emit(CoordinatorEvent::TaskAssigned {
            task: task_id,
            agent: agent_id,
        });

        if let Err(err) = self
            .router
            .send(
                RouteNode::Coordinator,
                RouteNode::Agent(agent_id),
                Payload::TaskDispatch { task: task_id },
            )
            .await
        {
            // Coordination error: log it and put the work back.
            warn!(task = %task_id, agent = %agent_id, %err, "dispatch unreachable");
            if let Some(task) = self.graph.get_task_mut(&task_id) {
                task.requeue();
            }
            self.registry.abort_task(&agent_id, &task_id)?;
        }
        Ok(())
    }

    /// Move queued work off overloaded agents.
    async fn apply_steals(&mut self) {
        let snapshot = self.registry.snapshot();
        let plans = self.fault.plan_steals(&snapshot, &self.graph);
        for plan in plans {
            let Some(task) = self.graph.get_task_mut(&plan.task) else {
                continue;
            };
            // Invariant: stealing never touches a running task.
            if task.status != TaskStatus::Assigned {
                continue;
            }
            task.reassign(plan.to);
            if let Err(err) = self.registry.transfer_assignment(&plan.from, &plan.to) {
                warn!(task = %plan.task, %err, "steal transfer failed");
                continue;
            }
            info!(task = %plan.task, from = %plan.from, to = %plan.to, "task reassigned");
            self.emit(CoordinatorEvent::TaskReassigned {
                task: plan.task,
                from: plan.from,
                to: plan.to,
            });
            let _ = self
                .router
                .send(
                    RouteNode::Coordinator,
                    RouteNode::Agent(plan.to),
                    Payload::Rebalance {
                        task: plan.task,
                        from: plan.from,
                        to: plan.to,
                    },
                )
                .await;
        }
    }

    /// Fail ready tasks no registered agent could ever serve.
    async fn fail_unservable_tasks(&mut self) {
        let snapshot = self.registry.snapshot();
        let unservable: Vec<TaskId> = self
            .graph
            .ready_tasks()
            .into_iter()
            .filter(|id| {
                self.graph
                    .get_task(id)
                    .map(|task| {
                        !task.required_capabilities.is_empty()
                            && !snapshot
                                .iter()
                                .any(|a| a.overlaps(&task.required_capabilities))
                    })
                    .unwrap_or(false)
            })
            .collect();

        for task_id in unservable {
            let err = Error::NoEligibleAgent { task: task_id };
            error!(task = %task_id, %err, "task cannot be served");
            self.fail_task_terminally(task_id, AgentId::default(), &err.to_string(), false)
                .await;
            if self.phase.current().is_terminal() {
                return;
            }
        }
    }

    /// Start queued work on agents that are not currently executing.
    async fn pump_agents(&mut self) {
        let agent_ids = self.registry.active_ids();
        for agent_id in agent_ids {
            if self.fault.state(&agent_id) == CircuitState::Open {
                // Work queued before the circuit tripped must not run on
                // the tripped agent; put it back for reassignment.
                let queued: Vec<TaskId> = self
                    .graph
                    .queued_for(&agent_id)
                    .into_iter()
                    .filter(|t| t.status == TaskStatus::Assigned)
                    .map(|t| t.id)
                    .collect();
                for task_id in queued {
                    if let Some(task) = self.graph.get_task_mut(&task_id) {
                        task.requeue();
                    }
                    if let Err(err) = self.registry.abort_task(&agent_id, &task_id) {
                        warn!(%task_id, %agent_id, %err, "requeue bookkeeping failed");
                    }
                }
                continue;
            }
            if self.registry.has_running(&agent_id) {
                continue;
            }
            let mut queued: Vec<(TaskId, i32, String)> = self
                .graph
                .queued_for(&agent_id)
                .into_iter()
                .filter(|t| t.status == TaskStatus::Assigned)
                .map(|t| (t.id, t.priority, t.name.clone()))
                .collect();
            // Highest priority starts first.
            queued.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.2.cmp(&b.2)));
            let Some((task_id, _, _)) = queued.into_iter().next() else {
                continue;
            };
            self.start_execution(task_id, agent_id);
        }
    }

    fn start_execution(&mut self, task_id: TaskId, agent_id: AgentId) {
        let Some(profile) = self.registry.get(&agent_id).cloned() else {
            return;
        };
        let timeout = {
            let Some(task) = self.graph.get_task_mut(&task_id) else {
                return;
            };
            task.start();
            task.timeout().or(self.config.task_timeout())
        };
        self.registry.mark_running(&agent_id, task_id);
        self.emit(CoordinatorEvent::TaskStarted {
            task: task_id,
            agent: agent_id,
        });
        debug!(task = %task_id, agent = %agent_id, "execution started");

        let Some(task_snapshot) = self.graph.get_task(&task_id).cloned() else {
            return;
        };
        let child = self.cancel.child_token();
        self.task_cancels.insert(task_id, child.clone());
        let executor = Arc::clone(&self.executor);
        let outcome_tx = self.outcome_tx.clone();

        tokio::spawn(async move {
            let result = match timeout {
                Some(limit) => {
                    match tokio::time::timeout(
                        limit,
                        executor.execute(&profile, &task_snapshot, child.clone()),
                    )
                    .await
                    {
                        Ok(inner) => inner.map_err(|e| OutcomeKind::Failed(e.to_string())),
                        Err(_) => Err(OutcomeKind::TimedOut(limit)),
                    }
                }
                None => executor
                    .execute(&profile, &task_snapshot, child.clone())
                    .await
                    .map_err(|e| OutcomeKind::Failed(e.to_string())),
            };

            let kind = if child.is_cancelled() {
                OutcomeKind::Cancelled
            } else {
                match result {
                    Ok(artifact) => OutcomeKind::Succeeded(artifact),
                    Err(kind) => kind,
                }
            };
            let _ = outcome_tx
                .send(TaskOutcome {
                    task: task_id,
                    agent: agent_id,
                    kind,
                })
                .await;
        });
    }

    async fn handle_outcome(&mut self, outcome: TaskOutcome) {
        let TaskOutcome { task, agent, kind } = outcome;
        self.task_cancels.remove(&task);
        let now = Utc::now();

        match kind {
            OutcomeKind::Succeeded(artifact) => {
                if let Err(err) = self.registry.finish_task(&agent, &task, true) {
                    warn!(%task, %agent, %err, "finish bookkeeping failed");
                }
                if self.fault.record_success(&agent, now).is_some() {
                    self.registry.set_circuit(&agent, CircuitState::Closed);
                }
                if let Some(t) = self.graph.get_task_mut(&task) {
                    t.succeed(artifact.clone());
                }
                self.exclusions.remove(&task);
                self.emit(CoordinatorEvent::TaskSucceeded { task, agent });
                info!(%task, %agent, "task succeeded");

                let artifacts_ns = format!("sessions/{}/memory/artifacts", self.session);
                let value = match serde_json::to_value(&artifact) {
                    Ok(value) => value,
                    Err(err) => {
                        error!(%task, %err, "artifact serialization failed");
                        self.finish(SessionPhase::Failed).await;
                        return;
                    }
                };
                if let Err(err) = self.memory.put(&artifacts_ns, &task.to_string(), value, None).await
                {
                    // Fatal: the store is the session's source of truth.
                    error!(%task, %err, "artifact store failed");
                    self.finish(SessionPhase::Failed).await;
                    return;
                }
            }
            OutcomeKind::Failed(reason) => {
                self.handle_failure(task, agent, reason, now).await;
            }
            OutcomeKind::TimedOut(limit) => {
                let reason = Error::Timeout(limit).to_string();
                warn!(%task, %agent, ?limit, "task timed out");
                self.handle_failure(task, agent, reason, now).await;
            }
            OutcomeKind::Cancelled => {
                if let Err(err) = self.registry.abort_task(&agent, &task) {
                    warn!(%task, %agent, %err, "abort bookkeeping failed");
                }
                if let Some(t) = self.graph.get_task_mut(&task) {
                    if !t.is_terminal() {
                        t.cancel("execution cancelled");
                    }
                }
            }
        }

        if !self.phase.current().is_terminal() {
            if let Err(err) = self.persist().await {
                error!(%err, "persist failed");
                self.finish(SessionPhase::Failed).await;
                return;
            }
            self.check_termination().await;
        }
    }

    async fn handle_failure(
        &mut self,
        task: TaskId,
        agent: AgentId,
        reason: String,
        now: DateTime<Utc>,
    ) {
        if let Err(err) = self.registry.finish_task(&agent, &task, false) {
            warn!(%task, %agent, %err, "failure bookkeeping failed");
        }
        if self.fault.record_failure(&agent, now).is_some() {
            warn!(%agent, "circuit opened");
            self.registry.set_circuit(&agent, CircuitState::Open);
            self.emit(CoordinatorEvent::CircuitOpened { agent });
        }

        let (attempts, exhausted) = match self.graph.get_task(&task) {
            Some(t) => (t.attempts, t.attempts > self.config.max_retries),
            None => return,
        };

        if !exhausted {
            self.exclusions.entry(task).or_default().insert(agent);
            if let Some(t) = self.graph.get_task_mut(&task) {
                t.requeue();
            }
            info!(%task, attempts, "task will be retried");
            self.emit(CoordinatorEvent::TaskRetrying { task, attempts });
        } else {
            self.fail_task_terminally(task, agent, &reason, true).await;
        }
    }

    async fn fail_task_terminally(
        &mut self,
        task: TaskId,
        agent: AgentId,
        reason: &str,
        emit_event: bool,
    ) {
        let optional = self
            .graph
            .get_task(&task)
            .map(|t| t.optional)
            .unwrap_or(false);
        if let Some(t) = self.graph.get_task_mut(&task) {
            t.fail(reason);
        }
        if emit_event {
            self.emit(CoordinatorEvent::TaskFailed {
                task,
                agent,
                error: reason.to_string(),
            });
        }
        error!(%task, %reason, "task failed terminally");

        if optional {
            return;
        }
        // Cascading cancellation of everything downstream, then the
        // session fails: a required task is out of budget.
        let cancelled = self
            .graph
            .cancel_cascade(&task, &format!("dependency {} failed", task));
        if !cancelled.is_empty() {
            debug!(%task, count = cancelled.len(), "dependents cancelled");
        }
        self.finish(SessionPhase::Failed).await;
    }

    async fn resolve_gate(&mut self, proposal: ProposalId, status: ProposalStatus) {
        let Some(task_id) = self.gating.remove(&proposal) else {
            return;
        };
        self.gated.remove(&task_id);

        let approved = matches!(
            &status,
            ProposalStatus::Approved { option } if option == GATE_APPROVE
        );
        self.emit(CoordinatorEvent::ProposalDecided { proposal, approved });
        let _ = self
            .router
            .broadcast(
                RouteNode::Coordinator,
                Payload::Decision { proposal, approved },
            )
            .await;

        if approved {
            info!(%proposal, %task_id, "consensus approved");
            self.cleared.insert(task_id);
            return;
        }

        match self.config.consensus_fallback {
            ConsensusFallback::Proceed => {
                warn!(%proposal, %task_id, "consensus not reached; proceeding per fallback");
                self.cleared.insert(task_id);
            }
            ConsensusFallback::Fail => {
                let err = Error::ConsensusRejected { task: task_id };
                warn!(%proposal, %task_id, "consensus rejected task");
                self.fail_task_terminally(task_id, AgentId::default(), &err.to_string(), true)
                    .await;
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SubmitVote {
                proposal,
                agent,
                option,
                confidence,
                reply,
            } => {
                let now = Utc::now();
                let result = self
                    .consensus
                    .cast_vote(&proposal, agent, &option, confidence, now);
                match result {
                    Ok(status) => {
                        if status.is_terminal() {
                            self.resolve_gate(proposal, status).await;
                        }
                        let _ = reply.send(Ok(()));
                    }
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
            }
            Command::AdaptTopology {
                topology,
                order,
                reply,
            } => {
                let result = match order {
                    Some(order) => self.router.adapt(topology, order),
                    None => self.router.adapt_topology(topology),
                };
                if let Err(err) = &result {
                    // Rolled back inside the router; the session continues
                    // on the prior topology.
                    warn!(%err, "topology adaptation rejected");
                }
                let _ = reply.send(result);
            }
            Command::Deregister {
                agent,
                force,
                reply,
            } => {
                let result = self.registry.deregister(&agent, force);
                let result = match result {
                    Ok(running) => {
                        for task in running {
                            if let Some(token) = self.task_cancels.get(&task) {
                                token.cancel();
                            }
                        }
                        self.router.leave(&agent);
                        self.agent_inboxes.remove(&agent);
                        Ok(())
                    }
                    Err(err) => Err(err),
                };
                let _ = reply.send(result);
            }
        }
    }

    async fn check_termination(&mut self) {
        if !self.graph.all_terminal() || !self.task_cancels.is_empty() {
            return;
        }
        if self.graph.has_required_failure() {
            self.finish(SessionPhase::Failed).await;
        } else {
            self.finish(SessionPhase::Completed).await;
        }
    }

    async fn finish(&mut self, phase: SessionPhase) {
        if self.phase.current().is_terminal() {
            return;
        }
        // Stop in-flight work; executions observe their child tokens.
        for token in self.task_cancels.values() {
            token.cancel();
        }
        let ids: Vec<TaskId> = self.graph.all_tasks().iter().map(|t| t.id).collect();
        for task in ids {
            if let Some(t) = self.graph.get_task_mut(&task) {
                if !t.is_terminal() && phase != SessionPhase::Completed {
                    t.cancel(&format!("session {}", phase));
                }
            }
        }
        if let Err(err) = self.phase.transition(phase) {
            error!(%err, "invalid terminal transition");
            return;
        }
        if let Err(err) = self.persist().await {
            error!(%err, "final persist failed");
        }
    }
}
