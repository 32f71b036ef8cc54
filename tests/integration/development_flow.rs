//! End-to-end development strategy runs.

use crate::fixtures::{development_roster, fast_config, MockExecutor};
use colony::core::task::TaskStatus;
use colony::memory::MemoryStore;
use colony::orchestration::decomposer::Strategy;
use colony::orchestration::router::Topology;
use colony::orchestration::coordinator::SessionPhase;
use colony::session::SessionManager;
use std::sync::Arc;

#[tokio::test]
async fn test_build_rest_api_linear_pipeline() {
    // Objective "build REST API", strategy development, four agents with
    // capabilities design/code/test/docs: a 4-task chain, all succeeded,
    // one agent per capability.
    let executor = Arc::new(MockExecutor::new());
    let mut manager = SessionManager::new(executor.clone(), fast_config());
    for agent in development_roster() {
        manager.register_agent(agent).unwrap();
    }

    let id = manager
        .start_session("build REST API", &Strategy::development(), Topology::Mesh)
        .unwrap();
    let phase = manager.wait(&id).await.unwrap();
    assert_eq!(phase, SessionPhase::Completed);

    let status = manager.status(&id).unwrap();
    assert_eq!(status.graph.tasks.len(), 4);
    assert_eq!(status.graph.count_where(|t| t.succeeded()), 4);
    // The chain is linear: design → implement → test → document.
    assert_eq!(status.graph.edges.len(), 3);

    // Each task landed on its specialist.
    let expected = [
        ("design", "architect"),
        ("implement", "coder"),
        ("test", "tester"),
        ("document", "writer"),
    ];
    let executions = executor.executions();
    assert_eq!(executions.len(), 4);
    for (task_name, agent_name) in expected {
        assert!(
            executions
                .iter()
                .any(|(t, a)| t == task_name && a == agent_name),
            "expected {} to run on {}, got {:?}",
            task_name,
            agent_name,
            executions
        );
    }

    // Chain order: each stage started only after the previous finished.
    let position = |name: &str| executions.iter().position(|(t, _)| t == name).unwrap();
    assert!(position("design") < position("implement"));
    assert!(position("implement") < position("test"));
    assert!(position("test") < position("document"));
}

#[tokio::test]
async fn test_artifacts_and_state_are_persisted() {
    let executor = Arc::new(MockExecutor::new());
    let mut manager = SessionManager::new(executor, fast_config());
    for agent in development_roster() {
        manager.register_agent(agent).unwrap();
    }

    let id = manager
        .start_session("build REST API", &Strategy::development(), Topology::Star)
        .unwrap();
    manager.wait(&id).await.unwrap();

    // Reads are allowed from any component within the session.
    let reader = manager.memory().handle("observer");
    let session_ns = format!("sessions/{}", id);
    assert!(reader.get(&session_ns, "graph").await.is_some());
    assert!(reader.get(&session_ns, "agents").await.is_some());

    let artifacts_ns = format!("sessions/{}/memory/artifacts", id);
    let artifacts = reader.list(&artifacts_ns, "*").await;
    assert_eq!(artifacts.len(), 4);

    // The persisted graph deserializes back into the final state.
    let entry = reader.get(&session_ns, "graph").await.unwrap();
    let snapshot: colony::core::graph::GraphSnapshot =
        serde_json::from_value(entry.value).unwrap();
    assert_eq!(snapshot.count_where(|t| t.succeeded()), 4);
}

#[tokio::test]
async fn test_component_fanout_runs_all_components() {
    let executor = Arc::new(MockExecutor::new());
    let mut manager = SessionManager::new(executor.clone(), fast_config());
    for agent in development_roster() {
        manager.register_agent(agent).unwrap();
    }

    let strategy = Strategy::Development {
        components: vec!["handlers".to_string(), "storage".to_string()],
    };
    let id = manager
        .start_session("build REST API", &strategy, Topology::Mesh)
        .unwrap();
    let phase = manager.wait(&id).await.unwrap();
    assert_eq!(phase, SessionPhase::Completed);

    let status = manager.status(&id).unwrap();
    assert_eq!(status.graph.tasks.len(), 5);
    assert_eq!(status.graph.count_where(|t| t.succeeded()), 5);

    let executions = executor.executions();
    assert!(executions.iter().any(|(t, _)| t == "implement-handlers"));
    assert!(executions.iter().any(|(t, _)| t == "implement-storage"));
}

#[tokio::test]
async fn test_retry_reassigns_to_different_agent() {
    // The coder fails once; the retry must land on another code-capable
    // agent rather than hammering the same one.
    let executor = Arc::new(MockExecutor::new().fail_times("coder", 1));
    let mut manager = SessionManager::new(executor.clone(), fast_config());
    manager
        .register_agent(colony::agent::AgentProfile::new("coder", ["code"]).with_primary("code"))
        .unwrap();
    manager
        .register_agent(colony::agent::AgentProfile::new("backup", ["code"]))
        .unwrap();

    let template = colony::orchestration::decomposer::Template {
        name: "single".to_string(),
        tasks: vec![colony::orchestration::decomposer::TemplateTask {
            name: "implement".to_string(),
            description: "implement {objective}".to_string(),
            capabilities: vec!["code".to_string()],
            depends_on: Vec::new(),
            priority: 0,
            requires_consensus: false,
            optional: false,
        }],
    };
    let id = manager
        .start_session(
            "one task",
            &Strategy::Custom { template },
            Topology::Mesh,
        )
        .unwrap();
    let phase = manager.wait(&id).await.unwrap();
    assert_eq!(phase, SessionPhase::Completed);

    let executions = executor.executions();
    assert_eq!(executions.len(), 2);
    assert_eq!(executions[0].1, "coder");
    assert_eq!(executions[1].1, "backup");

    let status = manager.status(&id).unwrap();
    let task = &status.graph.tasks[0];
    assert_eq!(task.status, TaskStatus::Succeeded);
    assert_eq!(task.attempts, 2);
}

#[tokio::test]
async fn test_required_task_exhausting_budget_fails_session() {
    // Only one agent, always failing: attempts run out and the failure
    // cascades to every dependent.
    let executor = Arc::new(MockExecutor::new().always_fail("solo"));
    let mut config = fast_config();
    config.max_retries = 1;
    let mut manager = SessionManager::new(executor.clone(), config);
    manager
        .register_agent(colony::agent::AgentProfile::new(
            "solo",
            ["design", "code", "test", "docs"],
        ))
        .unwrap();

    let id = manager
        .start_session("doomed", &Strategy::development(), Topology::Mesh)
        .unwrap();
    let phase = manager.wait(&id).await.unwrap();
    assert_eq!(phase, SessionPhase::Failed);

    let status = manager.status(&id).unwrap();
    // design failed; implement/test/document were cascade-cancelled.
    assert_eq!(
        status
            .graph
            .count_where(|t| matches!(t.status, TaskStatus::Failed { .. })),
        1
    );
    assert_eq!(
        status
            .graph
            .count_where(|t| matches!(t.status, TaskStatus::Cancelled { .. })),
        3
    );
    // max_retries = 1 means two attempts total.
    assert_eq!(executor.count_for_agent("solo"), 2);
}
