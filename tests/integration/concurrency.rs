//! Cancellation, timeout, and interleaving semantics.

use crate::fixtures::{development_roster, fast_config, MockExecutor};
use colony::agent::AgentProfile;
use colony::core::task::TaskStatus;
use colony::orchestration::coordinator::{CoordinatorEvent, SessionPhase};
use colony::orchestration::decomposer::{Strategy, Template, TemplateTask};
use colony::orchestration::router::Topology;
use colony::session::SessionManager;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_cancel_stops_in_flight_and_pending_work() {
    // The design task hangs until cancelled; everything downstream is
    // still pending when the session is cancelled.
    let executor = Arc::new(MockExecutor::new().hang_task("design"));
    let mut manager = SessionManager::new(executor.clone(), fast_config());
    for agent in development_roster() {
        manager.register_agent(agent).unwrap();
    }

    let id = manager
        .start_session("build REST API", &Strategy::development(), Topology::Mesh)
        .unwrap();

    // Let the design task start hanging, then cancel.
    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.cancel(&id).unwrap();
    let phase = manager.wait(&id).await.unwrap();
    assert_eq!(phase, SessionPhase::Cancelled);

    let status = manager.status(&id).unwrap();
    // Nothing succeeded; every task is terminal and cancelled.
    assert_eq!(status.graph.count_where(|t| t.succeeded()), 0);
    assert_eq!(
        status
            .graph
            .count_where(|t| matches!(t.status, TaskStatus::Cancelled { .. })),
        4
    );
    // Only the hanging design task ever reached an agent.
    assert_eq!(executor.executions().len(), 1);
}

#[tokio::test]
async fn test_task_timeout_counts_as_failure() {
    // The only task hangs; a 1-second timeout fires, the retry budget is
    // zero, and the session fails with a timeout error on the task.
    let executor = Arc::new(MockExecutor::new().hang_task("stuck"));
    let mut config = fast_config();
    config.max_retries = 0;
    config.task_timeout_secs = Some(1);
    let mut manager = SessionManager::new(executor, config);
    manager
        .register_agent(AgentProfile::new("worker", ["code"]))
        .unwrap();

    let template = Template {
        name: "single".to_string(),
        tasks: vec![TemplateTask {
            name: "stuck".to_string(),
            description: "never finishes".to_string(),
            capabilities: vec!["code".to_string()],
            depends_on: Vec::new(),
            priority: 0,
            requires_consensus: false,
            optional: false,
        }],
    };
    let id = manager
        .start_session("timeout", &Strategy::Custom { template }, Topology::Mesh)
        .unwrap();
    let phase = manager.wait(&id).await.unwrap();
    assert_eq!(phase, SessionPhase::Failed);

    let status = manager.status(&id).unwrap();
    match &status.graph.tasks[0].status {
        TaskStatus::Failed { error } => assert!(error.contains("timed out")),
        other => panic!("expected Failed, got {}", other),
    }
}

#[tokio::test]
async fn test_optional_task_failure_does_not_cascade() {
    // An optional polish step fails, but the required chain completes and
    // the session still counts as Completed.
    let executor = Arc::new(MockExecutor::new().always_fail("flaky"));
    let mut config = fast_config();
    config.max_retries = 0;
    let mut manager = SessionManager::new(executor, config);
    manager
        .register_agent(AgentProfile::new("worker", ["code"]))
        .unwrap();
    manager
        .register_agent(AgentProfile::new("flaky", ["polish"]))
        .unwrap();

    let template = Template {
        name: "optional".to_string(),
        tasks: vec![
            TemplateTask {
                name: "main".to_string(),
                description: "the real work".to_string(),
                capabilities: vec!["code".to_string()],
                depends_on: Vec::new(),
                priority: 1,
                requires_consensus: false,
                optional: false,
            },
            TemplateTask {
                name: "polish".to_string(),
                description: "nice to have".to_string(),
                capabilities: vec!["polish".to_string()],
                depends_on: vec!["main".to_string()],
                priority: 0,
                requires_consensus: false,
                optional: true,
            },
        ],
    };
    let id = manager
        .start_session("ship it", &Strategy::Custom { template }, Topology::Mesh)
        .unwrap();
    let phase = manager.wait(&id).await.unwrap();
    assert_eq!(phase, SessionPhase::Completed);

    let status = manager.status(&id).unwrap();
    assert_eq!(status.graph.count_where(|t| t.succeeded()), 1);
    assert_eq!(
        status
            .graph
            .count_where(|t| matches!(t.status, TaskStatus::Failed { .. })),
        1
    );
}

#[tokio::test]
async fn test_independent_branches_interleave_but_chains_stay_ordered() {
    // Research strategy: gather and survey are independent branches, so
    // both run after scope and before synthesize, in any relative order.
    let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(30)));
    let mut manager = SessionManager::new(executor, fast_config());
    manager
        .register_agent(AgentProfile::new("digger", ["research"]))
        .unwrap();
    manager
        .register_agent(AgentProfile::new("scholar", ["research"]))
        .unwrap();
    manager
        .register_agent(AgentProfile::new("analyst", ["analysis", "docs"]))
        .unwrap();

    let id = manager
        .start_session("why is the cache slow", &Strategy::Research, Topology::Mesh)
        .unwrap();
    let mut events = manager.take_events(&id).unwrap();
    let phase = manager.wait(&id).await.unwrap();
    assert_eq!(phase, SessionPhase::Completed);

    let status = manager.status(&id).unwrap();
    let name_of = |id: &colony::core::task::TaskId| {
        status.graph.task(id).map(|t| t.name.clone()).unwrap()
    };

    // One ordered log of lifecycle events, as ("started"/"succeeded", name).
    let mut log: Vec<(&'static str, String)> = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            CoordinatorEvent::TaskStarted { task, .. } => {
                log.push(("started", name_of(&task)))
            }
            CoordinatorEvent::TaskSucceeded { task, .. } => {
                log.push(("succeeded", name_of(&task)))
            }
            _ => {}
        }
    }
    let pos = |kind: &str, name: &str| {
        log.iter()
            .position(|(k, n)| *k == kind && n == name)
            .unwrap_or_else(|| panic!("missing {} {} in {:?}", kind, name, log))
    };

    // Dependency chains are strictly ordered by completion.
    assert!(pos("succeeded", "scope") < pos("started", "gather"));
    assert!(pos("succeeded", "scope") < pos("started", "survey"));
    assert!(pos("succeeded", "gather") < pos("started", "synthesize"));
    assert!(pos("succeeded", "survey") < pos("started", "synthesize"));
    assert!(pos("succeeded", "synthesize") < pos("started", "report"));

    // The independent branches overlapped: both started before either
    // finished.
    let both_started = pos("started", "gather").max(pos("started", "survey"));
    let first_done = pos("succeeded", "gather").min(pos("succeeded", "survey"));
    assert!(both_started < first_done);

    assert_eq!(log.iter().filter(|(k, _)| *k == "succeeded").count(), 5);
}

#[tokio::test]
async fn test_cancel_before_work_starts() {
    let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(200)));
    let mut manager = SessionManager::new(executor, fast_config());
    for agent in development_roster() {
        manager.register_agent(agent).unwrap();
    }

    let id = manager
        .start_session("build REST API", &Strategy::development(), Topology::Mesh)
        .unwrap();
    manager.cancel(&id).unwrap();
    let phase = manager.wait(&id).await.unwrap();
    assert_eq!(phase, SessionPhase::Cancelled);

    let status = manager.status(&id).unwrap();
    assert!(status.graph.tasks.iter().all(|t| t.is_terminal()));
    assert_eq!(status.graph.count_where(|t| t.succeeded()), 0);
}
