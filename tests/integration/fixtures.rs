//! Test fixtures for integration tests.
//!
//! Provides a scripted [`MockExecutor`] plus helpers for building agent
//! rosters and configurations tuned for fast test runs.

use async_trait::async_trait;
use colony::agent::{AgentProfile, Executor};
use colony::config::CoordinationConfig;
use colony::core::task::{Artifact, Task};
use colony::error::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Scripted executor: succeeds after a short delay by default, fails for
/// named agents a configured number of times, and hangs named tasks until
/// cancellation or timeout.
pub struct MockExecutor {
    delay: Duration,
    failing: Mutex<HashMap<String, u32>>,
    hanging: HashSet<String>,
    log: Mutex<Vec<(String, String)>>,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExecutor {
    /// An executor that completes every task after 10ms.
    pub fn new() -> Self {
        Self {
            delay: Duration::from_millis(10),
            failing: Mutex::new(HashMap::new()),
            hanging: HashSet::new(),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Override the per-task execution delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make every execution by the named agent fail.
    pub fn always_fail(self, agent_name: &str) -> Self {
        self.fail_times(agent_name, u32::MAX)
    }

    /// Make the next `times` executions by the named agent fail.
    pub fn fail_times(self, agent_name: &str, times: u32) -> Self {
        self.failing
            .lock()
            .unwrap()
            .insert(agent_name.to_string(), times);
        self
    }

    /// Make the named task block until its cancellation token fires.
    pub fn hang_task(mut self, task_name: &str) -> Self {
        self.hanging.insert(task_name.to_string());
        self
    }

    /// All `(task name, agent name)` executions, in order.
    pub fn executions(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().clone()
    }

    /// Number of executions performed by the named agent.
    pub fn count_for_agent(&self, agent_name: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, a)| a == agent_name)
            .count()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn execute(
        &self,
        agent: &AgentProfile,
        task: &Task,
        cancel: CancellationToken,
    ) -> Result<Artifact> {
        self.log
            .lock()
            .unwrap()
            .push((task.name.clone(), agent.name.clone()));

        if self.hanging.contains(&task.name) {
            cancel.cancelled().await;
            return Err(Error::ExecutionFailed {
                task: task.id,
                reason: "cancelled while hanging".to_string(),
            });
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::ExecutionFailed {
                    task: task.id,
                    reason: "cancelled".to_string(),
                });
            }
            _ = tokio::time::sleep(self.delay) => {}
        }

        let should_fail = {
            let mut failing = self.failing.lock().unwrap();
            match failing.get_mut(&agent.name) {
                Some(0) => false,
                Some(remaining) => {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    true
                }
                None => false,
            }
        };
        if should_fail {
            return Err(Error::ExecutionFailed {
                task: task.id,
                reason: format!("injected failure on {}", agent.name),
            });
        }

        Ok(Artifact::new(
            task.id,
            agent.id,
            &format!("{} done by {}", task.name, agent.name),
            serde_json::json!({ "task": task.name, "agent": agent.name }),
        ))
    }
}

/// The standard four-specialist roster for development flows.
pub fn development_roster() -> Vec<AgentProfile> {
    vec![
        AgentProfile::new("architect", ["design"]).with_primary("design"),
        AgentProfile::new("coder", ["code"]).with_primary("code"),
        AgentProfile::new("tester", ["test"]).with_primary("test"),
        AgentProfile::new("writer", ["docs"]).with_primary("docs"),
    ]
}

/// A configuration tuned for fast test loops.
pub fn fast_config() -> CoordinationConfig {
    let mut config = CoordinationConfig::default();
    config.tick_interval_ms = 5;
    config.consensus.vote_timeout_secs = 5;
    config
}
