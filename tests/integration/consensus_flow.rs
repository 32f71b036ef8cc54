//! Consensus gating across full sessions: auto-voting, external votes,
//! rejection fallbacks, and tally determinism.

use crate::fixtures::{fast_config, MockExecutor};
use colony::agent::AgentProfile;
use colony::config::ConsensusFallback;
use colony::core::task::TaskStatus;
use colony::orchestration::consensus::{Vote, VotePolicy};
use colony::orchestration::coordinator::{CoordinatorEvent, SessionPhase};
use colony::orchestration::decomposer::{Strategy, Template, TemplateTask};
use colony::orchestration::router::Topology;
use colony::session::SessionManager;
use std::sync::Arc;
use std::time::Duration;

fn gated_template() -> Template {
    Template {
        name: "gated".to_string(),
        tasks: vec![
            TemplateTask {
                name: "plan".to_string(),
                description: "plan {objective}".to_string(),
                capabilities: vec!["design".to_string()],
                depends_on: Vec::new(),
                priority: 1,
                requires_consensus: false,
                optional: false,
            },
            TemplateTask {
                name: "risky-change".to_string(),
                description: "apply the risky change for {objective}".to_string(),
                capabilities: vec!["code".to_string()],
                depends_on: vec!["plan".to_string()],
                priority: 0,
                requires_consensus: true,
                optional: false,
            },
        ],
    }
}

fn consensus_roster() -> Vec<AgentProfile> {
    vec![
        AgentProfile::new("architect", ["design"]),
        AgentProfile::new("coder", ["code"]),
        AgentProfile::new("reviewer", ["code", "test"]),
    ]
}

#[tokio::test]
async fn test_auto_vote_approves_and_dispatches_gated_task() {
    let executor = Arc::new(MockExecutor::new());
    let mut manager = SessionManager::new(executor.clone(), fast_config());
    for agent in consensus_roster() {
        manager.register_agent(agent).unwrap();
    }

    let id = manager
        .start_session(
            "migrate the schema",
            &Strategy::Custom {
                template: gated_template(),
            },
            Topology::Mesh,
        )
        .unwrap();
    let mut events = manager.take_events(&id).unwrap();
    let phase = manager.wait(&id).await.unwrap();
    assert_eq!(phase, SessionPhase::Completed);

    // The proposal was opened and approved before the gated task ran.
    let mut opened = false;
    let mut decided_approved = false;
    let mut gated_started_after_decision = false;
    while let Ok(event) = events.try_recv() {
        match event {
            CoordinatorEvent::ProposalOpened { .. } => opened = true,
            CoordinatorEvent::ProposalDecided { approved, .. } => {
                decided_approved = approved;
            }
            CoordinatorEvent::TaskStarted { .. } if decided_approved => {
                gated_started_after_decision = true;
            }
            _ => {}
        }
    }
    assert!(opened);
    assert!(decided_approved);
    assert!(gated_started_after_decision);
    assert_eq!(executor.executions().len(), 2);
}

/// A policy that always rejects, with high confidence.
struct AlwaysReject;

impl VotePolicy for AlwaysReject {
    fn vote(&self, _profile: &AgentProfile, _topic: &str, options: &[String]) -> Vote {
        Vote {
            option: options.last().cloned().unwrap_or_default(),
            confidence: 0.9,
        }
    }
}

#[tokio::test]
async fn test_rejected_consensus_fails_task_by_default() {
    let executor = Arc::new(MockExecutor::new());
    let mut manager =
        SessionManager::new(executor.clone(), fast_config()).with_vote_policy(Arc::new(AlwaysReject));
    for agent in consensus_roster() {
        manager.register_agent(agent).unwrap();
    }

    let id = manager
        .start_session(
            "migrate the schema",
            &Strategy::Custom {
                template: gated_template(),
            },
            Topology::Mesh,
        )
        .unwrap();
    let phase = manager.wait(&id).await.unwrap();
    assert_eq!(phase, SessionPhase::Failed);

    let status = manager.status(&id).unwrap();
    let gated = status
        .graph
        .tasks
        .iter()
        .find(|t| t.name == "risky-change")
        .unwrap();
    assert!(matches!(gated.status, TaskStatus::Failed { .. }));
    // Only the ungated plan task ever executed.
    assert_eq!(executor.executions().len(), 1);
}

#[tokio::test]
async fn test_rejected_consensus_proceeds_with_fallback() {
    let executor = Arc::new(MockExecutor::new());
    let mut config = fast_config();
    config.consensus_fallback = ConsensusFallback::Proceed;
    let mut manager =
        SessionManager::new(executor.clone(), config).with_vote_policy(Arc::new(AlwaysReject));
    for agent in consensus_roster() {
        manager.register_agent(agent).unwrap();
    }

    let id = manager
        .start_session(
            "migrate the schema",
            &Strategy::Custom {
                template: gated_template(),
            },
            Topology::Mesh,
        )
        .unwrap();
    let phase = manager.wait(&id).await.unwrap();
    assert_eq!(phase, SessionPhase::Completed);
    assert_eq!(executor.executions().len(), 2);
}

#[tokio::test]
async fn test_external_votes_decide_proposal() {
    let executor = Arc::new(MockExecutor::new());
    let mut config = fast_config();
    config.auto_vote = false;
    config.consensus.threshold = 0.66;
    config.consensus.min_participation = 1.0;
    let mut manager = SessionManager::new(executor.clone(), config);
    let roster = consensus_roster();
    let voter_ids: Vec<_> = roster.iter().map(|a| a.id).collect();
    for agent in roster {
        manager.register_agent(agent).unwrap();
    }

    let id = manager
        .start_session(
            "migrate the schema",
            &Strategy::Custom {
                template: gated_template(),
            },
            Topology::Mesh,
        )
        .unwrap();

    // Wait for the proposal to open.
    let proposal = loop {
        let status = manager.status(&id).unwrap();
        if let Some(p) = status.open_proposals.first() {
            break p.id;
        }
        assert!(!status.phase.is_terminal(), "session ended before gating");
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    // Confidence-weighted approval: 0.9 + 0.8 approve vs 0.5 reject is a
    // 0.77 ratio over the 0.66 threshold.
    manager
        .submit_vote(&id, proposal, voter_ids[0], "approve", 0.9)
        .await
        .unwrap();
    manager
        .submit_vote(&id, proposal, voter_ids[1], "approve", 0.8)
        .await
        .unwrap();

    // A duplicate vote is rejected while the proposal is open.
    let duplicate = manager
        .submit_vote(&id, proposal, voter_ids[0], "approve", 0.9)
        .await;
    assert!(matches!(
        duplicate,
        Err(colony::error::Error::DuplicateVote { .. })
    ));

    manager
        .submit_vote(&id, proposal, voter_ids[2], "reject", 0.5)
        .await
        .unwrap();

    let phase = manager.wait(&id).await.unwrap();
    assert_eq!(phase, SessionPhase::Completed);
}

#[tokio::test]
async fn test_unknown_option_rejected_synchronously() {
    let executor = Arc::new(MockExecutor::new());
    let mut config = fast_config();
    config.auto_vote = false;
    let mut manager = SessionManager::new(executor, config);
    let roster = consensus_roster();
    let voter = roster[0].id;
    for agent in roster {
        manager.register_agent(agent).unwrap();
    }

    let id = manager
        .start_session(
            "migrate the schema",
            &Strategy::Custom {
                template: gated_template(),
            },
            Topology::Mesh,
        )
        .unwrap();

    let proposal = loop {
        let status = manager.status(&id).unwrap();
        if let Some(p) = status.open_proposals.first() {
            break p.id;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    let err = manager
        .submit_vote(&id, proposal, voter, "maybe", 0.5)
        .await
        .unwrap_err();
    assert!(matches!(err, colony::error::Error::UnknownOption { .. }));
    assert_eq!(err.code(), "unknown_option");

    let err = manager
        .submit_vote(&id, proposal, voter, "approve", 1.5)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        colony::error::Error::InvalidConfidence { .. }
    ));

    manager.cancel(&id).unwrap();
    manager.wait(&id).await.unwrap();
}

#[tokio::test]
async fn test_unvoted_proposal_times_out() {
    // Nobody votes: the deadline passes, the proposal times out, and the
    // default fallback fails the gated task.
    let executor = Arc::new(MockExecutor::new());
    let mut config = fast_config();
    config.auto_vote = false;
    config.consensus.vote_timeout_secs = 1;
    let mut manager = SessionManager::new(executor, config);
    for agent in consensus_roster() {
        manager.register_agent(agent).unwrap();
    }

    let id = manager
        .start_session(
            "migrate the schema",
            &Strategy::Custom {
                template: gated_template(),
            },
            Topology::Mesh,
        )
        .unwrap();
    let phase = manager.wait(&id).await.unwrap();
    assert_eq!(phase, SessionPhase::Failed);

    let status = manager.status(&id).unwrap();
    let gated = status
        .graph
        .tasks
        .iter()
        .find(|t| t.name == "risky-change")
        .unwrap();
    assert!(matches!(gated.status, TaskStatus::Failed { .. }));
}
