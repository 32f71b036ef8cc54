//! Fault tolerance: per-agent circuit breakers and work stealing.
//!
//! The circuit breaker isolates failing agents before they poison the
//! session: `Closed` → (N consecutive failures within a sliding window) →
//! `Open` → (cooldown elapses) → `HalfOpen` (one trial assignment) →
//! success closes the circuit, failure reopens it with the cooldown
//! doubled up to a cap. The work stealer redirects queued work (never
//! running work) from overloaded agents to idle ones with overlapping
//! capabilities.

use crate::agent::{AgentId, AgentProfile, AgentStatus, CircuitState};
use crate::core::graph::TaskGraph;
use crate::core::task::TaskId;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Circuit breaker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures within the window that trip the circuit.
    pub failure_threshold: u32,
    /// Sliding window over which consecutive failures are counted, seconds.
    pub window_secs: u64,
    /// Initial cooldown before a tripped circuit allows a trial, seconds.
    pub cooldown_secs: u64,
    /// Upper bound for the exponentially backed-off cooldown, seconds.
    pub cooldown_cap_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            window_secs: 60,
            cooldown_secs: 30,
            cooldown_cap_secs: 300,
        }
    }
}

/// Per-agent circuit breaker state machine.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: CircuitState,
    failures: VecDeque<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    current_cooldown_secs: u64,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    /// Create a closed breaker with the given tuning.
    pub fn new(config: BreakerConfig) -> Self {
        let cooldown = config.cooldown_secs;
        Self {
            config,
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            current_cooldown_secs: cooldown,
            trial_in_flight: false,
        }
    }

    /// Current breaker state.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// The active cooldown in seconds (grows with repeated trips).
    pub fn current_cooldown_secs(&self) -> u64 {
        self.current_cooldown_secs
    }

    fn prune_window(&mut self, now: DateTime<Utc>) {
        let window = ChronoDuration::seconds(self.config.window_secs as i64);
        while let Some(&oldest) = self.failures.front() {
            if now - oldest > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record a successful task outcome.
    ///
    /// Returns the new state when the outcome closed a half-open circuit.
    pub fn record_success(&mut self, _now: DateTime<Utc>) -> Option<CircuitState> {
        self.failures.clear();
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Closed;
                self.current_cooldown_secs = self.config.cooldown_secs;
                self.trial_in_flight = false;
                self.opened_at = None;
                Some(CircuitState::Closed)
            }
            _ => None,
        }
    }

    /// Record a failed task outcome (including timeouts).
    ///
    /// Returns the new state when the failure tripped the circuit.
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> Option<CircuitState> {
        match self.state {
            CircuitState::HalfOpen => {
                // Failed trial: back to Open with exponential backoff.
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
                self.current_cooldown_secs = (self.current_cooldown_secs.saturating_mul(2))
                    .min(self.config.cooldown_cap_secs);
                self.trial_in_flight = false;
                Some(CircuitState::Open)
            }
            CircuitState::Closed => {
                self.failures.push_back(now);
                self.prune_window(now);
                if self.failures.len() as u32 >= self.config.failure_threshold {
                    self.state = CircuitState::Open;
                    self.opened_at = Some(now);
                    Some(CircuitState::Open)
                } else {
                    None
                }
            }
            CircuitState::Open => None,
        }
    }

    /// Advance time: an open circuit whose cooldown elapsed becomes
    /// half-open, allowing one trial assignment.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<CircuitState> {
        if self.state == CircuitState::Open {
            let cooldown = ChronoDuration::seconds(self.current_cooldown_secs as i64);
            if let Some(opened_at) = self.opened_at {
                if now - opened_at >= cooldown {
                    self.state = CircuitState::HalfOpen;
                    self.trial_in_flight = false;
                    return Some(CircuitState::HalfOpen);
                }
            }
        }
        None
    }

    /// Whether a new assignment is permitted right now.
    pub fn allows_assignment(&self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => !self.trial_in_flight,
            CircuitState::Open => false,
        }
    }

    /// Mark the half-open trial as taken.
    pub fn begin_trial(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.trial_in_flight = true;
        }
    }
}

/// Work stealing tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StealConfig {
    /// Queued-plus-running load above which an agent is overloaded.
    pub high_water: u32,
}

impl Default for StealConfig {
    fn default() -> Self {
        Self { high_water: 3 }
    }
}

/// A planned movement of queued work between agents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassignment {
    /// The task to move.
    pub task: TaskId,
    /// The overloaded agent losing the task.
    pub from: AgentId,
    /// The idle agent receiving it.
    pub to: AgentId,
}

/// Events emitted by the fault-tolerance layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultEvent {
    /// An agent's circuit tripped open.
    CircuitOpened { agent: AgentId },
    /// An agent's cooldown elapsed; one trial assignment is allowed.
    CircuitHalfOpen { agent: AgentId },
    /// A trial succeeded and the circuit closed.
    CircuitClosed { agent: AgentId },
    /// Queued work moved from an overloaded agent to an idle one.
    TaskReassigned {
        task: TaskId,
        from: AgentId,
        to: AgentId,
    },
    /// A dispatched task hit its timeout.
    TaskTimedOut { task: TaskId, agent: AgentId },
}

/// Plans work-stealing reassignments. Pure: the coordinator applies them.
#[derive(Debug, Clone, Default)]
pub struct WorkStealer {
    config: StealConfig,
}

impl WorkStealer {
    /// Create a stealer with the given tuning.
    pub fn new(config: StealConfig) -> Self {
        Self { config }
    }

    /// Plan reassignments of queued work.
    ///
    /// For each agent whose load exceeds the high-water mark, the lowest
    /// priority queued (`Assigned`, not `Running`) task moves to the idle
    /// agent with overlapping capabilities and the least simulated load.
    /// Running tasks are never considered.
    pub fn plan(&self, agents: &[AgentProfile], graph: &TaskGraph) -> Vec<Reassignment> {
        let mut loads: HashMap<AgentId, u32> =
            agents.iter().map(|a| (a.id, a.current_load)).collect();

        let mut overloaded: Vec<&AgentProfile> = agents
            .iter()
            .filter(|a| a.current_load > self.config.high_water)
            .collect();
        overloaded.sort_by(|a, b| b.current_load.cmp(&a.current_load).then(a.id.cmp(&b.id)));

        let mut plans = Vec::new();
        for agent in overloaded {
            let mut queued = graph.queued_for(&agent.id);
            // Lowest priority first; name then id keeps the choice stable.
            queued.sort_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| a.name.cmp(&b.name))
                    .then_with(|| a.id.0.cmp(&b.id.0))
            });

            for task in queued {
                if loads.get(&agent.id).copied().unwrap_or(0) <= self.config.high_water {
                    break;
                }
                let target = agents
                    .iter()
                    .filter(|candidate| {
                        candidate.id != agent.id
                            && candidate.status == AgentStatus::Idle
                            && candidate.circuit_allows()
                            && candidate.overlaps(&task.required_capabilities)
                            && loads.get(&candidate.id).copied().unwrap_or(0)
                                < self.config.high_water
                    })
                    .min_by(|a, b| {
                        let la = loads.get(&a.id).copied().unwrap_or(0);
                        let lb = loads.get(&b.id).copied().unwrap_or(0);
                        la.cmp(&lb).then(a.id.cmp(&b.id))
                    });
                let Some(target) = target else {
                    break;
                };
                let from_load = loads.get(&agent.id).copied().unwrap_or(1);
                loads.insert(agent.id, from_load.saturating_sub(1));
                *loads.entry(target.id).or_insert(0) += 1;
                plans.push(Reassignment {
                    task: task.id,
                    from: agent.id,
                    to: target.id,
                });
            }
        }
        plans
    }
}

/// Fault-tolerance layer: breakers per agent plus the work stealer.
#[derive(Debug, Default)]
pub struct FaultMonitor {
    breaker_config: BreakerConfig,
    breakers: HashMap<AgentId, CircuitBreaker>,
    stealer: WorkStealer,
}

impl FaultMonitor {
    /// Create a monitor with the given tunings.
    pub fn new(breaker_config: BreakerConfig, steal_config: StealConfig) -> Self {
        Self {
            breaker_config,
            breakers: HashMap::new(),
            stealer: WorkStealer::new(steal_config),
        }
    }

    fn ensure(&mut self, agent: &AgentId) -> &mut CircuitBreaker {
        self.breakers
            .entry(*agent)
            .or_insert_with(|| CircuitBreaker::new(self.breaker_config.clone()))
    }

    /// The breaker state for an agent (Closed if never seen).
    pub fn state(&self, agent: &AgentId) -> CircuitState {
        self.breakers
            .get(agent)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    /// Whether the agent's breaker permits a new assignment.
    pub fn allows(&mut self, agent: &AgentId) -> bool {
        self.ensure(agent).allows_assignment()
    }

    /// Mark a half-open agent's single trial as taken.
    pub fn begin_trial(&mut self, agent: &AgentId) {
        self.ensure(agent).begin_trial();
    }

    /// Fold a success into the agent's breaker.
    pub fn record_success(&mut self, agent: &AgentId, now: DateTime<Utc>) -> Option<FaultEvent> {
        self.ensure(agent)
            .record_success(now)
            .map(|_| FaultEvent::CircuitClosed { agent: *agent })
    }

    /// Fold a failure into the agent's breaker.
    pub fn record_failure(&mut self, agent: &AgentId, now: DateTime<Utc>) -> Option<FaultEvent> {
        self.ensure(agent)
            .record_failure(now)
            .map(|_| FaultEvent::CircuitOpened { agent: *agent })
    }

    /// Advance cooldowns; open circuits whose cooldown elapsed go half-open.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Vec<FaultEvent> {
        let mut events = Vec::new();
        for (agent, breaker) in self.breakers.iter_mut() {
            if breaker.poll(now).is_some() {
                events.push(FaultEvent::CircuitHalfOpen { agent: *agent });
            }
        }
        events
    }

    /// Plan work-stealing reassignments over a registry snapshot.
    pub fn plan_steals(&self, agents: &[AgentProfile], graph: &TaskGraph) -> Vec<Reassignment> {
        self.stealer.plan(agents, graph)
    }
}
