//! Agent registry: the single owner of agent records.
//!
//! The registry tracks identity, capabilities, load, and health for every
//! registered agent. It is mutated only by the coordinator; all other
//! components observe agents through copy-on-read [`AgentRegistry::snapshot`]s.

use crate::agent::{AgentId, AgentProfile, AgentStatus, CircuitState};
use crate::core::task::TaskId;
use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Registry of agents participating in a coordination session.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentId, AgentProfile>,
    running: HashMap<AgentId, HashSet<TaskId>>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent. Rejects duplicate ids.
    pub fn register(&mut self, profile: AgentProfile) -> Result<AgentId> {
        let id = profile.id;
        if self.agents.contains_key(&id) {
            return Err(Error::DuplicateAgent { id });
        }
        self.agents.insert(id, profile);
        Ok(id)
    }

    /// Deregister an agent.
    ///
    /// Fails with `AgentBusy` while the agent has a running task, unless
    /// `force` is set; a forced deregistration returns the running task
    /// ids so the caller can cancel them first.
    pub fn deregister(&mut self, id: &AgentId, force: bool) -> Result<Vec<TaskId>> {
        let profile = self
            .agents
            .get_mut(id)
            .ok_or(Error::AgentNotFound { id: *id })?;

        let running: Vec<TaskId> = self
            .running
            .get(id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        if !running.is_empty() && !force {
            return Err(Error::AgentBusy { id: *id });
        }

        profile.status = AgentStatus::Removed;
        profile.current_load = 0;
        self.running.remove(id);
        Ok(running)
    }

    /// Look up an agent profile.
    pub fn get(&self, id: &AgentId) -> Option<&AgentProfile> {
        self.agents.get(id)
    }

    /// Look up an agent profile mutably.
    pub fn get_mut(&mut self, id: &AgentId) -> Option<&mut AgentProfile> {
        self.agents.get_mut(id)
    }

    /// Number of agents that have not been removed.
    pub fn active_count(&self) -> usize {
        self.agents
            .values()
            .filter(|a| a.status != AgentStatus::Removed)
            .count()
    }

    /// Ids of agents that have not been removed, sorted for determinism.
    pub fn active_ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self
            .agents
            .values()
            .filter(|a| a.status != AgentStatus::Removed)
            .map(|a| a.id)
            .collect();
        ids.sort();
        ids
    }

    /// Copy-on-read snapshot of all non-removed agents, sorted by id.
    pub fn snapshot(&self) -> Vec<AgentProfile> {
        let mut agents: Vec<AgentProfile> = self
            .agents
            .values()
            .filter(|a| a.status != AgentStatus::Removed)
            .cloned()
            .collect();
        agents.sort_by_key(|a| a.id);
        agents
    }

    /// Record that a task was queued or started on an agent.
    pub fn add_assignment(&mut self, id: &AgentId) -> Result<()> {
        let profile = self
            .agents
            .get_mut(id)
            .ok_or(Error::AgentNotFound { id: *id })?;
        profile.current_load += 1;
        profile.status = AgentStatus::Busy;
        Ok(())
    }

    /// Record that a queued task moved from one agent to another.
    pub fn transfer_assignment(&mut self, from: &AgentId, to: &AgentId) -> Result<()> {
        self.remove_assignment(from)?;
        self.add_assignment(to)
    }

    fn remove_assignment(&mut self, id: &AgentId) -> Result<()> {
        let profile = self
            .agents
            .get_mut(id)
            .ok_or(Error::AgentNotFound { id: *id })?;
        profile.current_load = profile.current_load.saturating_sub(1);
        if profile.current_load == 0 && profile.status == AgentStatus::Busy {
            profile.status = AgentStatus::Idle;
        }
        Ok(())
    }

    /// Release a queued or cancelled assignment without recording an outcome.
    pub fn abort_task(&mut self, id: &AgentId, task: &TaskId) -> Result<()> {
        if let Some(set) = self.running.get_mut(id) {
            set.remove(task);
        }
        self.remove_assignment(id)
    }

    /// Record that an agent began executing a task.
    pub fn mark_running(&mut self, id: &AgentId, task: TaskId) {
        self.running.entry(*id).or_default().insert(task);
    }

    /// Whether the agent is currently executing any task.
    pub fn has_running(&self, id: &AgentId) -> bool {
        self.running.get(id).map(|s| !s.is_empty()).unwrap_or(false)
    }

    /// Record a task outcome: frees load, folds the result into the
    /// performance score, and returns the agent to Idle when drained.
    pub fn finish_task(&mut self, id: &AgentId, task: &TaskId, success: bool) -> Result<()> {
        if let Some(set) = self.running.get_mut(id) {
            set.remove(task);
        }
        self.remove_assignment(id)?;
        if let Some(profile) = self.agents.get_mut(id) {
            profile.record_outcome(success);
        }
        Ok(())
    }

    /// Mirror a circuit breaker state into the agent's profile.
    pub fn set_circuit(&mut self, id: &AgentId, state: CircuitState) {
        if let Some(profile) = self.agents.get_mut(id) {
            profile.circuit = state;
            match state {
                CircuitState::Open => {
                    if profile.status != AgentStatus::Removed {
                        profile.status = AgentStatus::Unhealthy;
                    }
                }
                CircuitState::Closed | CircuitState::HalfOpen => {
                    if profile.status == AgentStatus::Unhealthy {
                        profile.status = if profile.current_load > 0 {
                            AgentStatus::Busy
                        } else {
                            AgentStatus::Idle
                        };
                    }
                }
            }
        }
    }
}
