//! Circuit breaking and work stealing across full sessions.

use crate::fixtures::{fast_config, MockExecutor};
use colony::agent::{AgentProfile, CircuitState};
use colony::core::task::TaskStatus;
use colony::orchestration::coordinator::{CoordinatorEvent, SessionPhase};
use colony::orchestration::decomposer::{Strategy, Template, TemplateTask};
use colony::orchestration::router::Topology;
use colony::session::SessionManager;
use std::sync::Arc;
use std::time::Duration;

fn chain_of_code_tasks(count: usize) -> Template {
    let mut tasks = Vec::new();
    for i in 0..count {
        tasks.push(TemplateTask {
            name: format!("step-{}", i),
            description: format!("step {} of {{objective}}", i),
            capabilities: vec!["code".to_string()],
            depends_on: if i == 0 {
                Vec::new()
            } else {
                vec![format!("step-{}", i - 1)]
            },
            priority: 0,
            requires_consensus: false,
            optional: false,
        });
    }
    Template {
        name: "chain".to_string(),
        tasks,
    }
}

fn independent_code_tasks(count: usize) -> Template {
    Template {
        name: "fanout".to_string(),
        tasks: (0..count)
            .map(|i| TemplateTask {
                name: format!("job-{}", i),
                description: format!("job {} of {{objective}}", i),
                capabilities: vec!["code".to_string()],
                depends_on: Vec::new(),
                priority: i as i32,
                requires_consensus: false,
                optional: false,
            })
            .collect(),
    }
}

#[tokio::test]
async fn test_circuit_opens_after_consecutive_failures() {
    // The flaky specialist fails three consecutive tasks (failure
    // threshold 3): its circuit opens and the fourth task goes straight
    // to the backup; the flaky agent receives zero assignments while open.
    let executor = Arc::new(MockExecutor::new().always_fail("flaky"));
    let mut config = fast_config();
    config.breaker.failure_threshold = 3;
    config.breaker.cooldown_secs = 3600;
    let mut manager = SessionManager::new(executor.clone(), config);
    // A perfect track record keeps the flaky specialist winning selection
    // until its circuit actually trips.
    let mut flaky = AgentProfile::new("flaky", ["code"]).with_primary("code");
    flaky.performance_score = 1.0;
    manager.register_agent(flaky).unwrap();
    manager
        .register_agent(AgentProfile::new("backup", ["code"]))
        .unwrap();

    let id = manager
        .start_session(
            "run the chain",
            &Strategy::Custom {
                template: chain_of_code_tasks(4),
            },
            Topology::Mesh,
        )
        .unwrap();
    let phase = manager.wait(&id).await.unwrap();
    assert_eq!(phase, SessionPhase::Completed);

    // Steps 0-2: flaky fails, backup retries and succeeds. By step 3 the
    // circuit is open and flaky is never assigned again.
    assert_eq!(executor.count_for_agent("flaky"), 3);
    assert_eq!(executor.count_for_agent("backup"), 4);

    let status = manager.status(&id).unwrap();
    let flaky = status.agents.iter().find(|a| a.name == "flaky").unwrap();
    assert_eq!(flaky.circuit, CircuitState::Open);
    assert_eq!(status.graph.count_where(|t| t.succeeded()), 4);
}

#[tokio::test]
async fn test_circuit_open_event_emitted() {
    let executor = Arc::new(MockExecutor::new().always_fail("flaky"));
    let mut config = fast_config();
    config.breaker.failure_threshold = 3;
    config.breaker.cooldown_secs = 3600;
    let mut manager = SessionManager::new(executor, config);
    let mut flaky = AgentProfile::new("flaky", ["code"]).with_primary("code");
    flaky.performance_score = 1.0;
    let flaky_id = manager.register_agent(flaky).unwrap();
    manager
        .register_agent(AgentProfile::new("backup", ["code"]))
        .unwrap();

    let id = manager
        .start_session(
            "run the chain",
            &Strategy::Custom {
                template: chain_of_code_tasks(4),
            },
            Topology::Mesh,
        )
        .unwrap();
    let mut events = manager.take_events(&id).unwrap();
    manager.wait(&id).await.unwrap();

    let mut circuit_opened = false;
    while let Ok(event) = events.try_recv() {
        if let CoordinatorEvent::CircuitOpened { agent } = event {
            assert_eq!(agent, flaky_id);
            circuit_opened = true;
        }
    }
    assert!(circuit_opened);
}

#[tokio::test]
async fn test_work_stealing_moves_queued_tasks_to_idle_agent() {
    // The specialist hoards every assignment (the helper's performance
    // score keeps it from winning any). With a high-water mark of 1, the
    // stealer moves queued work onto the idle helper.
    let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(150)));
    let mut config = fast_config();
    config.steal.high_water = 1;
    config.load_cap = 10;
    let mut manager = SessionManager::new(executor.clone(), config);
    manager
        .register_agent(AgentProfile::new("specialist", ["code"]).with_primary("code"))
        .unwrap();
    let mut helper = AgentProfile::new("helper", ["code"]);
    helper.performance_score = 0.0;
    manager.register_agent(helper).unwrap();

    let id = manager
        .start_session(
            "fan out",
            &Strategy::Custom {
                template: independent_code_tasks(3),
            },
            Topology::Mesh,
        )
        .unwrap();
    let mut events = manager.take_events(&id).unwrap();
    let phase = manager.wait(&id).await.unwrap();
    assert_eq!(phase, SessionPhase::Completed);

    let mut reassigned = 0;
    let mut started: Vec<colony::core::task::TaskId> = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            CoordinatorEvent::TaskReassigned { task, .. } => {
                // A stolen task must not have started yet.
                assert!(
                    !started.contains(&task),
                    "work stealing touched a started task"
                );
                reassigned += 1;
            }
            CoordinatorEvent::TaskStarted { task, .. } => started.push(task),
            _ => {}
        }
    }
    assert!(reassigned >= 1, "expected at least one reassignment");
    // The helper ended up doing part of the work.
    assert!(executor.count_for_agent("helper") >= 1);
}

#[tokio::test]
async fn test_half_open_trial_closes_circuit_on_success() {
    // Two failures trip the breaker (threshold 2). After the 1s cooldown
    // the half-open trial succeeds and the circuit closes again.
    let executor = Arc::new(MockExecutor::new().fail_times("only", 2));
    let mut config = fast_config();
    config.breaker.failure_threshold = 2;
    config.breaker.cooldown_secs = 1;
    config.max_retries = 10;
    let mut manager = SessionManager::new(executor.clone(), config);
    manager
        .register_agent(AgentProfile::new("only", ["code"]))
        .unwrap();

    let id = manager
        .start_session(
            "persist",
            &Strategy::Custom {
                template: chain_of_code_tasks(1),
            },
            Topology::Mesh,
        )
        .unwrap();
    let phase = manager.wait(&id).await.unwrap();
    assert_eq!(phase, SessionPhase::Completed);

    let status = manager.status(&id).unwrap();
    let agent = status.agents.iter().find(|a| a.name == "only").unwrap();
    assert_eq!(agent.circuit, CircuitState::Closed);
    // Two failed attempts, one successful trial.
    assert_eq!(executor.count_for_agent("only"), 3);
    assert_eq!(status.graph.count_where(|t| t.succeeded()), 1);
}

#[tokio::test]
async fn test_unservable_task_fails_fast() {
    // Nobody declares the required capability: the task fails with a
    // structured error instead of stalling the session forever.
    let executor = Arc::new(MockExecutor::new());
    let mut manager = SessionManager::new(executor, fast_config());
    manager
        .register_agent(AgentProfile::new("writer", ["docs"]))
        .unwrap();

    let id = manager
        .start_session(
            "impossible",
            &Strategy::Custom {
                template: chain_of_code_tasks(2),
            },
            Topology::Mesh,
        )
        .unwrap();
    let phase = manager.wait(&id).await.unwrap();
    assert_eq!(phase, SessionPhase::Failed);

    let status = manager.status(&id).unwrap();
    let failed = status
        .graph
        .tasks
        .iter()
        .find(|t| matches!(t.status, TaskStatus::Failed { .. }))
        .unwrap();
    if let TaskStatus::Failed { error } = &failed.status {
        assert!(error.contains("No eligible agent"));
    }
}
