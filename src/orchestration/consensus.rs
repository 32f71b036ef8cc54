//! Consensus engine for multi-agent decisions through weighted voting.
//!
//! A proposal collects one vote per eligible agent, each vote carrying an
//! option and a confidence weight. Tallying is a pure function of the
//! vote set: re-running it always yields the same decision. Vote
//! *generation* is delegated to a [`VotePolicy`]; the shipped policy
//! derives votes from capability/keyword alignment with the topic, never
//! from randomness.

use crate::agent::{AgentId, AgentProfile};
use crate::error::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use uuid::Uuid;

/// Unique identifier for a consensus proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalId(pub Uuid);

impl ProposalId {
    /// Create a new unique proposal identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ProposalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProposalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A cast vote: the chosen option and the voter's confidence in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    /// The chosen option, one of the proposal's option set.
    pub option: String,
    /// Confidence weight in [0, 1].
    pub confidence: f64,
}

/// Proposal lifecycle. `Open` is the only non-terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ProposalStatus {
    /// Accepting votes until the deadline.
    Open,
    /// The winning option met the threshold and participation floor.
    Approved {
        /// The winning option.
        option: String,
    },
    /// Voting concluded without meeting the threshold.
    Rejected,
    /// The deadline passed before the participation floor was met.
    TimedOut,
}

impl ProposalStatus {
    /// Whether the proposal has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProposalStatus::Open)
    }
}

/// Result of tallying a proposal's vote set. Pure data; recomputing the
/// tally over the same votes always produces the same values.
#[derive(Debug, Clone, PartialEq)]
pub struct Tally {
    /// The option with the highest summed confidence, if any votes exist.
    /// Ties break toward the earlier option in the proposal's option order.
    pub winner: Option<String>,
    /// Summed confidence behind the winner.
    pub winner_confidence: f64,
    /// Summed confidence across all cast votes.
    pub total_confidence: f64,
    /// Number of votes cast.
    pub participation: usize,
}

impl Tally {
    /// Winner confidence share of all cast confidence; 0 with no votes.
    pub fn approval_ratio(&self) -> f64 {
        if self.total_confidence <= 0.0 {
            0.0
        } else {
            self.winner_confidence / self.total_confidence
        }
    }
}

/// A decision point requiring weighted agreement among agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    /// Unique identifier.
    pub id: ProposalId,
    /// What is being decided.
    pub topic: String,
    /// The ordered option set.
    pub options: Vec<String>,
    /// Votes cast so far, one per agent.
    pub votes: HashMap<AgentId, Vote>,
    /// Required approval ratio, e.g. 0.5, 0.66, 1.0.
    pub threshold: f64,
    /// Required participation as a fraction of eligible agents.
    pub min_participation: f64,
    /// Number of agents eligible to vote when the proposal opened.
    pub eligible: usize,
    /// Hard deadline; the proposal closes here at the latest.
    pub deadline: DateTime<Utc>,
    /// When the proposal opened.
    pub opened_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: ProposalStatus,
}

impl Proposal {
    /// Minimum number of votes required by the participation floor.
    pub fn required_participation(&self) -> usize {
        (self.min_participation * self.eligible as f64).ceil() as usize
    }

    /// Tally the current vote set. Pure; does not mutate the proposal.
    pub fn tally(&self) -> Tally {
        let mut sums: HashMap<&str, f64> = HashMap::new();
        let mut total = 0.0;
        for vote in self.votes.values() {
            *sums.entry(vote.option.as_str()).or_insert(0.0) += vote.confidence;
            total += vote.confidence;
        }
        // Walk options in proposal order so equal sums resolve to the
        // earlier option deterministically.
        let mut winner: Option<(&str, f64)> = None;
        for option in &self.options {
            let sum = sums.get(option.as_str()).copied().unwrap_or(0.0);
            if winner.map(|(_, best)| sum > best).unwrap_or(true) {
                winner = Some((option, sum));
            }
        }
        let (winner, winner_confidence) = match winner {
            Some((name, sum)) if !self.votes.is_empty() => (Some(name.to_string()), sum),
            _ => (None, 0.0),
        };
        Tally {
            winner,
            winner_confidence,
            total_confidence: total,
            participation: self.votes.len(),
        }
    }

    /// Evaluate the approval rule against the current vote set.
    fn evaluate(&self, at_deadline: bool) -> ProposalStatus {
        let tally = self.tally();
        let quorum = tally.participation >= self.required_participation();
        if quorum && tally.approval_ratio() >= self.threshold {
            if let Some(option) = tally.winner {
                return ProposalStatus::Approved { option };
            }
        }
        if self.votes.len() >= self.eligible {
            // Everyone voted and the threshold was not met.
            return ProposalStatus::Rejected;
        }
        if at_deadline {
            if quorum {
                return ProposalStatus::Rejected;
            }
            return ProposalStatus::TimedOut;
        }
        ProposalStatus::Open
    }
}

/// Configuration for consensus rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Required approval ratio.
    pub threshold: f64,
    /// Required participation as a fraction of eligible agents.
    pub min_participation: f64,
    /// Voting window in seconds.
    pub vote_timeout_secs: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            min_participation: 0.5,
            vote_timeout_secs: 30,
        }
    }
}

/// The consensus engine: exclusive owner of open proposals.
///
/// Only final decisions leave the engine; callers observe proposals
/// through snapshots.
#[derive(Debug, Default)]
pub struct ConsensusEngine {
    config: ConsensusConfig,
    proposals: HashMap<ProposalId, Proposal>,
}

impl ConsensusEngine {
    /// Create an engine with the given configuration.
    pub fn new(config: ConsensusConfig) -> Self {
        Self {
            config,
            proposals: HashMap::new(),
        }
    }

    /// The engine's configuration.
    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Open a proposal for `eligible` agents, using the configured
    /// threshold and voting window.
    pub fn open_proposal(
        &mut self,
        topic: &str,
        options: Vec<String>,
        eligible: usize,
        now: DateTime<Utc>,
    ) -> Result<ProposalId> {
        if options.is_empty() {
            return Err(Error::EmptyProposal {
                topic: topic.to_string(),
            });
        }
        let id = ProposalId::new();
        let deadline =
            now + ChronoDuration::seconds(self.config.vote_timeout_secs.min(i64::MAX as u64) as i64);
        self.proposals.insert(
            id,
            Proposal {
                id,
                topic: topic.to_string(),
                options,
                votes: HashMap::new(),
                threshold: self.config.threshold,
                min_participation: self.config.min_participation,
                eligible,
                deadline,
                opened_at: now,
                status: ProposalStatus::Open,
            },
        );
        Ok(id)
    }

    /// Cast a vote and re-tally.
    ///
    /// Returns the proposal's status after the vote; a terminal status
    /// means this vote decided the proposal.
    pub fn cast_vote(
        &mut self,
        id: &ProposalId,
        agent: AgentId,
        option: &str,
        confidence: f64,
        now: DateTime<Utc>,
    ) -> Result<ProposalStatus> {
        let proposal = self
            .proposals
            .get_mut(id)
            .ok_or(Error::ProposalNotFound { id: *id })?;

        if proposal.status.is_terminal() {
            return Err(Error::ProposalClosed { id: *id });
        }
        // Past-deadline votes are rejected; the terminal transition itself
        // happens in expire(), so decisions flow through one place.
        if now >= proposal.deadline {
            return Err(Error::ProposalClosed { id: *id });
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(Error::InvalidConfidence { value: confidence });
        }
        if !proposal.options.iter().any(|o| o == option) {
            return Err(Error::UnknownOption {
                proposal: *id,
                option: option.to_string(),
            });
        }
        if proposal.votes.contains_key(&agent) {
            return Err(Error::DuplicateVote {
                proposal: *id,
                agent,
            });
        }

        proposal.votes.insert(
            agent,
            Vote {
                option: option.to_string(),
                confidence,
            },
        );
        proposal.status = proposal.evaluate(false);
        Ok(proposal.status.clone())
    }

    /// Close out proposals whose deadline has passed.
    ///
    /// Returns the `(id, final status)` of every proposal that reached a
    /// terminal state in this pass.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<(ProposalId, ProposalStatus)> {
        let mut decided = Vec::new();
        for proposal in self.proposals.values_mut() {
            if proposal.status == ProposalStatus::Open && now >= proposal.deadline {
                proposal.status = proposal.evaluate(true);
                decided.push((proposal.id, proposal.status.clone()));
            }
        }
        decided
    }

    /// Look up a proposal.
    pub fn get(&self, id: &ProposalId) -> Option<&Proposal> {
        self.proposals.get(id)
    }

    /// All proposals, open and decided, oldest first.
    pub fn all_proposals(&self) -> Vec<&Proposal> {
        let mut all: Vec<&Proposal> = self.proposals.values().collect();
        all.sort_by_key(|p| p.opened_at);
        all
    }

    /// Snapshots of all proposals still open.
    pub fn open_proposals(&self) -> Vec<Proposal> {
        let mut open: Vec<Proposal> = self
            .proposals
            .values()
            .filter(|p| p.status == ProposalStatus::Open)
            .cloned()
            .collect();
        open.sort_by_key(|p| p.opened_at);
        open
    }
}

/// How an agent decides which option to support.
///
/// Policies must be deterministic functions of the agent profile and the
/// proposal content; the engine rejects nothing here, but the test suite
/// rejects policies whose output does not track capability alignment.
pub trait VotePolicy: Send + Sync {
    /// Produce this agent's vote for the proposal.
    fn vote(&self, profile: &AgentProfile, topic: &str, options: &[String]) -> Vote;
}

fn word_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new(r"[A-Za-z0-9_]+").expect("static pattern"))
}

fn tokenize(text: &str) -> HashSet<String> {
    word_pattern()
        .find_iter(text)
        .map(|m| m.as_str().to_ascii_lowercase())
        .collect()
}

/// Deterministic vote policy driven by capability/keyword alignment.
///
/// The option whose words best overlap the agent's capability names wins;
/// confidence grows with the alignment between the agent's capabilities
/// and the topic plus chosen option. Two calls with the same inputs
/// always produce the same vote.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityAlignmentPolicy;

impl CapabilityAlignmentPolicy {
    const BASE_CONFIDENCE: f64 = 0.3;
    const MATCH_WEIGHT: f64 = 0.15;
    const PRIMARY_BONUS: f64 = 0.1;
    const MAX_CONFIDENCE: f64 = 0.95;

    fn capability_words(profile: &AgentProfile) -> HashSet<String> {
        profile
            .capabilities
            .iter()
            .flat_map(|c| tokenize(c.as_str()))
            .collect()
    }
}

impl VotePolicy for CapabilityAlignmentPolicy {
    fn vote(&self, profile: &AgentProfile, topic: &str, options: &[String]) -> Vote {
        if options.is_empty() {
            return Vote {
                option: String::new(),
                confidence: 0.0,
            };
        }
        let caps = Self::capability_words(profile);
        let topic_words = tokenize(topic);
        let topic_matches = topic_words.intersection(&caps).count();

        // First option wins ties, so the scan keeps strict improvement.
        let mut chosen = 0;
        let mut chosen_matches = usize::MIN;
        for (index, option) in options.iter().enumerate() {
            let matches = tokenize(option).intersection(&caps).count();
            if index == 0 || matches > chosen_matches {
                chosen = index;
                chosen_matches = matches;
            }
        }

        let primary_aligned = profile
            .primary
            .as_ref()
            .map(|p| {
                topic_words.contains(p.as_str())
                    || tokenize(&options[chosen]).contains(p.as_str())
            })
            .unwrap_or(false);

        let mut confidence = Self::BASE_CONFIDENCE
            + Self::MATCH_WEIGHT * (topic_matches + chosen_matches) as f64;
        if primary_aligned {
            confidence += Self::PRIMARY_BONUS;
        }

        Vote {
            option: options[chosen].clone(),
            confidence: confidence.min(Self::MAX_CONFIDENCE),
        }
    }
}
