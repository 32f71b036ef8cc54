//! Session configuration for the coordination engine.
//!
//! Everything a session needs beyond its objective: retry budget, task
//! timeout, scheduling load cap, breaker/steal/consensus tunings, and the
//! consensus fallback policy. Configurations load from and save to TOML
//! at an explicit path; all fields have defaults, so a partial file works.

use crate::orchestration::consensus::ConsensusConfig;
use crate::orchestration::fault::{BreakerConfig, StealConfig};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

fn default_max_retries() -> u32 {
    2
}

fn default_load_cap() -> u32 {
    2
}

fn default_tick_interval_ms() -> u64 {
    25
}

fn default_auto_vote() -> bool {
    true
}

/// What happens to a consensus-gated task when its proposal is rejected
/// or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusFallback {
    /// Mark the task failed (default).
    #[default]
    Fail,
    /// Proceed with dispatch anyway.
    Proceed,
}

/// Full configuration for a coordination session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// Additional execution attempts after the first failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Default per-task execution timeout in seconds; tasks may override.
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,
    /// Busy-agent load cap used by the scheduler's availability bonus.
    #[serde(default = "default_load_cap")]
    pub load_cap: u32,
    /// Coordinator tick interval in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Circuit breaker tuning.
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// Work stealing tuning.
    #[serde(default)]
    pub steal: StealConfig,
    /// Consensus thresholds and voting window.
    #[serde(default)]
    pub consensus: ConsensusConfig,
    /// Fallback policy for rejected or timed-out proposals.
    #[serde(default)]
    pub consensus_fallback: ConsensusFallback,
    /// Whether registered agents vote automatically via their policy.
    #[serde(default = "default_auto_vote")]
    pub auto_vote: bool,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            task_timeout_secs: None,
            load_cap: default_load_cap(),
            tick_interval_ms: default_tick_interval_ms(),
            breaker: BreakerConfig::default(),
            steal: StealConfig::default(),
            consensus: ConsensusConfig::default(),
            consensus_fallback: ConsensusFallback::default(),
            auto_vote: default_auto_vote(),
        }
    }
}

impl CoordinationConfig {
    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        Ok(config)
    }

    /// Save the configuration as TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Default task timeout as a `Duration`, if configured.
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    /// Coordinator tick interval.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}
