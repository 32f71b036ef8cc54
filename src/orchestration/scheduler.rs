//! Capability matching and task assignment.
//!
//! The scheduler scores candidate agents for each ready task with a pure
//! function and picks deterministically: highest score, ties broken by
//! lowest current load, then lexicographic agent id. Determinism makes
//! assignment decisions reproducible in tests without any agent
//! implementation behind them.

use crate::agent::{AgentId, AgentProfile, AgentStatus, CircuitState};
use crate::core::graph::TaskGraph;
use crate::core::task::{Task, TaskId};
use std::collections::{HashMap, HashSet};

mod scoring {
    /// Points per matching required capability.
    pub const CAPABILITY_MATCH: f64 = 10.0;
    /// Availability bonus for an idle agent.
    pub const IDLE_BONUS: f64 = 8.0;
    /// Availability bonus for a busy agent still under the load cap.
    pub const BUSY_UNDER_CAP_BONUS: f64 = 4.0;
    /// Scale applied to the [0, 1] performance score.
    pub const PERFORMANCE_WEIGHT: f64 = 10.0;
    /// Bonus when the agent's primary matches the task's dominant capability.
    pub const SPECIALIST_BONUS: f64 = 5.0;
}

/// A planned `(task, agent)` assignment produced by one scheduling pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// The task to assign.
    pub task: TaskId,
    /// The selected agent.
    pub agent: AgentId,
}

/// Capability matcher and assignment planner.
#[derive(Debug, Clone)]
pub struct Scheduler {
    load_cap: u32,
}

impl Scheduler {
    /// Create a scheduler with the given busy-agent load cap.
    pub fn new(load_cap: u32) -> Self {
        Self { load_cap }
    }

    /// Score one candidate agent for a task.
    ///
    /// Pure function of the profile and task: capability matches dominate,
    /// availability and track record refine, and a specialist bonus goes
    /// to agents whose primary matches the task's dominant capability.
    pub fn score_candidate(&self, profile: &AgentProfile, task: &Task) -> f64 {
        let mut score =
            scoring::CAPABILITY_MATCH * profile.matching_capabilities(&task.required_capabilities) as f64;

        score += match profile.status {
            AgentStatus::Idle => scoring::IDLE_BONUS,
            AgentStatus::Busy if profile.current_load < self.load_cap => {
                scoring::BUSY_UNDER_CAP_BONUS
            }
            _ => 0.0,
        };

        score += profile.performance_score * scoring::PERFORMANCE_WEIGHT;

        if let (Some(primary), Some(dominant)) = (&profile.primary, task.dominant_capability()) {
            if primary == dominant {
                score += scoring::SPECIALIST_BONUS;
            }
        }

        score
    }

    /// Select the best agent for a task from a registry snapshot.
    ///
    /// Candidates must be schedulable (Idle or Busy, circuit Closed or
    /// HalfOpen), overlap the task's required capabilities, and not be in
    /// `exclude` (previous failed assignees on a retry pass). Ties break
    /// by lowest load, then lexicographic id.
    pub fn select(
        &self,
        agents: &[AgentProfile],
        task: &Task,
        exclude: &HashSet<AgentId>,
    ) -> Option<AgentId> {
        let mut best: Option<(&AgentProfile, f64)> = None;
        for candidate in agents {
            if exclude.contains(&candidate.id) {
                continue;
            }
            if !matches!(candidate.status, AgentStatus::Idle | AgentStatus::Busy) {
                continue;
            }
            if !candidate.circuit_allows() {
                continue;
            }
            if !candidate.overlaps(&task.required_capabilities) {
                continue;
            }
            let score = self.score_candidate(candidate, task);
            let better = match best {
                None => true,
                Some((current, best_score)) => {
                    score > best_score
                        || (score == best_score
                            && (candidate.current_load < current.current_load
                                || (candidate.current_load == current.current_load
                                    && candidate.id < current.id)))
                }
            };
            if better {
                best = Some((candidate, score));
            }
        }
        best.map(|(profile, _)| profile.id)
    }

    /// Plan assignments for every ready, unblocked task.
    ///
    /// `cleared` gates consensus-flagged tasks; `exclusions` removes
    /// previously failed assignees per task. Loads are simulated within
    /// the pass so two tasks do not both land on an idle agent as if it
    /// were still free.
    pub fn plan(
        &self,
        graph: &TaskGraph,
        agents: &[AgentProfile],
        cleared: impl Fn(&Task) -> bool,
        exclusions: &HashMap<TaskId, HashSet<AgentId>>,
    ) -> Vec<Assignment> {
        let mut pool: Vec<AgentProfile> = agents.to_vec();
        let empty = HashSet::new();
        let mut plans = Vec::new();

        for task_id in graph.ready_tasks() {
            let Some(task) = graph.get_task(&task_id) else {
                continue;
            };
            if task.requires_consensus && !cleared(task) {
                continue;
            }
            let exclude = exclusions.get(&task_id).unwrap_or(&empty);
            let Some(agent_id) = self.select(&pool, task, exclude) else {
                continue;
            };
            if let Some(profile) = pool.iter_mut().find(|a| a.id == agent_id) {
                profile.current_load += 1;
                profile.status = AgentStatus::Busy;
                if profile.circuit == CircuitState::HalfOpen {
                    // One trial assignment per pass for a half-open agent.
                    profile.circuit = CircuitState::Open;
                }
            }
            plans.push(Assignment {
                task: task_id,
                agent: agent_id,
            });
        }
        plans
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(2)
    }
}
