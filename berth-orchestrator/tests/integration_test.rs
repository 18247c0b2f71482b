//! Integration tests for berth-orchestrator
//!
//! Drives the workspace manager against the in-memory engine: lifecycle,
//! idempotency, label-based discovery, and bounded exec/log capture.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use berth_orchestrator::{
    CreateWorkspaceRequest, ManagerSettings, OrchestratorError, WorkspaceManager, WorkspaceStatus,
};
use berth_runtime::labels;
use berth_runtime::mock::{MockExec, MockOp, MockRuntime};
use berth_runtime::{CaptureLimits, ContainerRuntime, ContainerState, RuntimeError};
use berth_templates::TemplateRegistry;

fn manager_with(settings: ManagerSettings) -> (Arc<MockRuntime>, WorkspaceManager) {
    let runtime = Arc::new(MockRuntime::new());
    let templates = Arc::new(TemplateRegistry::builtin().expect("builtin catalog"));
    let engine: Arc<dyn ContainerRuntime> = runtime.clone();
    (runtime, WorkspaceManager::with_settings(engine, templates, settings))
}

fn manager() -> (Arc<MockRuntime>, WorkspaceManager) {
    manager_with(ManagerSettings::default())
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

#[tokio::test]
async fn test_deploy_then_list_reports_running() {
    let (_, manager) = manager();

    let workspace = manager
        .deploy_workspace(CreateWorkspaceRequest::new("w1").with_template("minimal-dev"))
        .await
        .expect("Failed to deploy workspace");
    assert_eq!(workspace.status, WorkspaceStatus::Running);

    let listed = manager.list_workspaces().await.expect("Failed to list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, workspace.id);
    assert_eq!(listed[0].name, "w1");
    assert_eq!(listed[0].template, "minimal-dev");
    assert_eq!(listed[0].status, WorkspaceStatus::Running);
}

#[tokio::test]
async fn test_create_returns_creating_and_labels_container() {
    let (runtime, manager) = manager();

    let workspace = manager
        .create_workspace(CreateWorkspaceRequest::new("w1").with_template("minimal-dev"))
        .await
        .expect("Failed to create workspace");

    // Should start in Creating status
    assert_eq!(workspace.status, WorkspaceStatus::Creating);
    assert_eq!(workspace.image, "debian:bookworm-slim");
    assert_eq!(workspace.features, vec!["git", "curl", "bash"]);
    assert_eq!(workspace.labels[labels::OWNER_LABEL], "true");
    assert_eq!(workspace.labels[labels::WORKSPACE_ID_LABEL], workspace.id);
    assert_eq!(workspace.labels[labels::WORKSPACE_FEATURES_LABEL], "git,curl,bash");
    assert_eq!(
        runtime.state_of(&workspace.container_id).await,
        Some(ContainerState::Created)
    );

    // Creating is never observed by listing; an unstarted container is stopped.
    let listed = manager.list_workspaces().await.unwrap();
    assert_eq!(listed[0].status, WorkspaceStatus::Stopped);
}

#[tokio::test]
async fn test_created_at_matches_later_reads() {
    let (_, manager) = manager();
    let created = manager
        .create_workspace(CreateWorkspaceRequest::new("w1").with_template("minimal-dev"))
        .await
        .unwrap();

    let fetched = manager.get_workspace(&created.id).await.unwrap();
    assert_eq!(fetched.created_at, created.created_at);
    let listed = manager.list_workspaces().await.unwrap();
    assert_eq!(listed[0].created_at, created.created_at);
}

#[tokio::test]
async fn test_features_that_would_not_survive_labels_are_rejected() {
    let (runtime, manager) = manager();

    for bad in ["lang:c,c++", "", " git"] {
        let mut req = CreateWorkspaceRequest::new("w1").with_template("minimal-dev");
        req.features = vec![bad.to_string()];
        let result = manager.deploy_workspace(req).await;
        assert!(
            matches!(result, Err(OrchestratorError::InvalidInput(_))),
            "feature {bad:?} was accepted"
        );
    }
    assert_eq!(runtime.call_count(MockOp::Create).await, 0);

    let mut req = CreateWorkspaceRequest::new("w1").with_template("minimal-dev");
    req.features = vec!["lang:c++".to_string()];
    let deployed = manager.deploy_workspace(req).await.unwrap();
    let listed = manager.list_workspaces().await.unwrap();
    assert_eq!(deployed.features, vec!["git", "curl", "bash", "lang:c++"]);
    assert_eq!(listed[0].features, deployed.features);
}

#[tokio::test]
async fn test_request_overrides_template_defaults() {
    let (_, manager) = manager();

    let req = CreateWorkspaceRequest {
        name: "api".to_string(),
        template: Some("python-dev".to_string()),
        features: vec!["poetry".to_string(), "pip".to_string()],
        image: Some("python:3.13-slim".to_string()),
        env: vec!["PYTHONUNBUFFERED=0".to_string(), "APP_ENV=dev".to_string()],
        ports: BTreeMap::from([(8000, 18000), (5678, 5678)]),
    };
    let workspace = manager.deploy_workspace(req).await.unwrap();

    assert_eq!(workspace.image, "python:3.13-slim");
    assert_eq!(workspace.features, vec!["python3.12", "pip", "venv", "poetry"]);
    assert_eq!(workspace.ports[&8000], "0.0.0.0:18000");
    assert_eq!(workspace.ports[&5678], "0.0.0.0:5678");
}

#[tokio::test]
async fn test_custom_workspace_without_template() {
    let (_, manager) = manager();

    let workspace = manager
        .deploy_workspace(CreateWorkspaceRequest::new("scratch").with_image("alpine:3.20"))
        .await
        .unwrap();

    assert_eq!(workspace.template, labels::CUSTOM_WORKSPACE_TYPE);
    assert!(workspace.features.is_empty());
    assert!(workspace.is_running());
}

#[tokio::test]
async fn test_empty_image_is_rejected_before_engine_call() {
    let (runtime, manager) = manager();

    let custom = manager
        .create_workspace(CreateWorkspaceRequest::new("w1"))
        .await;
    assert!(matches!(custom, Err(OrchestratorError::InvalidInput(_))));

    let blank = manager
        .create_workspace(
            CreateWorkspaceRequest::new("w2")
                .with_template("minimal-dev")
                .with_image(""),
        )
        .await;
    assert!(matches!(blank, Err(OrchestratorError::InvalidInput(_))));

    assert!(runtime.calls().await.is_empty());
}

#[tokio::test]
async fn test_invalid_name_and_unknown_template_never_reach_engine() {
    let (runtime, manager) = manager();

    let bad_name = manager
        .create_workspace(CreateWorkspaceRequest::new("-oops").with_template("minimal-dev"))
        .await;
    assert!(matches!(bad_name, Err(OrchestratorError::InvalidInput(_))));

    let unknown = manager
        .create_workspace(CreateWorkspaceRequest::new("w1").with_template("cobol-dev"))
        .await;
    assert!(matches!(unknown, Err(OrchestratorError::NotFound(_))));

    assert!(runtime.calls().await.is_empty());
}

#[tokio::test]
async fn test_name_collision_is_rejected() {
    let (runtime, manager) = manager();
    let req = CreateWorkspaceRequest::new("w1").with_template("minimal-dev");

    manager.create_workspace(req.clone()).await.unwrap();
    let second = manager.create_workspace(req).await;

    assert!(matches!(second, Err(OrchestratorError::Conflict(_))));
    assert_eq!(runtime.container_count().await, 1);
}

#[tokio::test]
async fn test_concurrent_creates_with_same_name() {
    let (runtime, manager) = manager();
    let req = CreateWorkspaceRequest::new("race").with_template("minimal-dev");

    let (a, b) = tokio::join!(
        manager.create_workspace(req.clone()),
        manager.create_workspace(req.clone())
    );

    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    let failed = if a.is_err() { a } else { b };
    assert!(matches!(failed, Err(OrchestratorError::Conflict(_))));
    assert_eq!(runtime.container_count().await, 1);
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let (runtime, manager) = manager();
    let workspace = manager
        .deploy_workspace(CreateWorkspaceRequest::new("w1").with_template("minimal-dev"))
        .await
        .unwrap();

    let started = manager.start_workspace(&workspace.id).await.unwrap();
    assert_eq!(started.status, WorkspaceStatus::Running);

    let stopped = manager.stop_workspace(&workspace.id).await.unwrap();
    assert_eq!(stopped.status, WorkspaceStatus::Stopped);
    let stopped_again = manager.stop_workspace(&workspace.id).await.unwrap();
    assert_eq!(stopped_again.status, WorkspaceStatus::Stopped);

    assert_eq!(runtime.call_count(MockOp::Stop).await, 2);
}

#[tokio::test]
async fn test_restart_workspace() {
    let (runtime, manager) = manager();
    let workspace = manager
        .deploy_workspace(CreateWorkspaceRequest::new("w1").with_template("minimal-dev"))
        .await
        .unwrap();

    let restarted = manager.restart_workspace(&workspace.id).await.unwrap();
    assert!(restarted.is_running());
    assert_eq!(runtime.call_count(MockOp::Start).await, 2);
    assert_eq!(runtime.call_count(MockOp::Stop).await, 1);
}

#[tokio::test]
async fn test_removed_workspace_is_gone_for_every_operation() {
    let (_, manager) = manager();
    let workspace = manager
        .deploy_workspace(CreateWorkspaceRequest::new("w1").with_template("minimal-dev"))
        .await
        .unwrap();
    let id = workspace.id.as_str();

    // Removing a running workspace stops it first.
    manager.remove_workspace(id).await.expect("Failed to remove");

    assert!(matches!(
        manager.start_workspace(id).await,
        Err(OrchestratorError::NotFound(_))
    ));
    assert!(matches!(
        manager.stop_workspace(id).await,
        Err(OrchestratorError::NotFound(_))
    ));
    assert!(matches!(
        manager.exec_in_workspace(id, &argv(&["echo", "hi"])).await,
        Err(OrchestratorError::NotFound(_))
    ));
    assert!(matches!(
        manager.get_workspace_logs(id, None).await,
        Err(OrchestratorError::NotFound(_))
    ));
    assert!(matches!(
        manager.remove_workspace(id).await,
        Err(OrchestratorError::NotFound(_))
    ));
    assert!(manager.list_workspaces().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_remove_workspace_that_is_not_running() {
    let (runtime, manager) = manager();
    let never_started = manager
        .create_workspace(CreateWorkspaceRequest::new("w1").with_template("minimal-dev"))
        .await
        .unwrap();
    let stopped = manager
        .deploy_workspace(CreateWorkspaceRequest::new("w2").with_template("minimal-dev"))
        .await
        .unwrap();
    manager.stop_workspace(&stopped.id).await.unwrap();

    // The stop step reports "already stopped"; removal goes ahead anyway.
    manager
        .remove_workspace(&never_started.id)
        .await
        .expect("Failed to remove unstarted workspace");
    manager
        .remove_workspace(&stopped.id)
        .await
        .expect("Failed to remove stopped workspace");

    assert_eq!(runtime.call_count(MockOp::Remove).await, 2);
    assert_eq!(runtime.container_count().await, 0);
    for id in [&never_started.id, &stopped.id] {
        assert!(matches!(
            manager.get_workspace(id).await,
            Err(OrchestratorError::NotFound(_))
        ));
    }
}

#[tokio::test]
async fn test_stop_failure_aborts_removal() {
    let (runtime, manager) = manager();
    let workspace = manager
        .deploy_workspace(CreateWorkspaceRequest::new("w1").with_template("minimal-dev"))
        .await
        .unwrap();

    runtime
        .fail_next(
            MockOp::Stop,
            RuntimeError::EngineUnavailable("socket closed".to_string()),
        )
        .await;
    let result = manager.remove_workspace(&workspace.id).await;

    assert!(matches!(result, Err(OrchestratorError::EngineUnavailable(_))));
    assert_eq!(runtime.call_count(MockOp::Remove).await, 0);
    assert!(manager.get_workspace(&workspace.id).await.unwrap().is_running());
}

#[tokio::test]
async fn test_remove_failure_leaves_workspace_stopped() {
    let (runtime, manager) = manager();
    let workspace = manager
        .deploy_workspace(CreateWorkspaceRequest::new("w1").with_template("minimal-dev"))
        .await
        .unwrap();

    runtime
        .fail_next(
            MockOp::Remove,
            RuntimeError::Engine {
                status: 500,
                message: "driver failed".to_string(),
            },
        )
        .await;
    let result = manager.remove_workspace(&workspace.id).await;

    assert!(matches!(result, Err(OrchestratorError::Runtime(_))));
    let after = manager.get_workspace(&workspace.id).await.unwrap();
    assert_eq!(after.status, WorkspaceStatus::Stopped);
}

#[tokio::test]
async fn test_list_ignores_unmanaged_containers() {
    let (runtime, manager) = manager();
    manager
        .deploy_workspace(CreateWorkspaceRequest::new("w1").with_template("minimal-dev"))
        .await
        .unwrap();

    runtime
        .insert_foreign("postgres", "postgres:16", BTreeMap::new(), true)
        .await;
    runtime
        .insert_foreign(
            "lookalike",
            "debian",
            BTreeMap::from([
                (labels::OWNER_LABEL.to_string(), "false".to_string()),
                (labels::WORKSPACE_ID_LABEL.to_string(), "fake".to_string()),
            ]),
            true,
        )
        .await;

    let listed = manager.list_workspaces().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed
        .iter()
        .all(|workspace| workspace.labels[labels::OWNER_LABEL] == "true"));
    assert!(matches!(
        manager.get_workspace("fake").await,
        Err(OrchestratorError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_list_is_newest_first() {
    let (_, manager) = manager();
    for name in ["first", "second", "third"] {
        manager
            .create_workspace(CreateWorkspaceRequest::new(name).with_template("minimal-dev"))
            .await
            .unwrap();
    }

    let names: Vec<String> = manager
        .list_workspaces()
        .await
        .unwrap()
        .into_iter()
        .map(|workspace| workspace.name)
        .collect();
    assert_eq!(names, vec!["third", "second", "first"]);
}

#[tokio::test]
async fn test_find_workspace_by_name() {
    let (_, manager) = manager();
    let created = manager
        .create_workspace(CreateWorkspaceRequest::new("w1").with_template("node-dev"))
        .await
        .unwrap();

    let found = manager.find_workspace_by_name("w1").await.unwrap();
    assert_eq!(found.id, created.id);
    assert!(matches!(
        manager.find_workspace_by_name("w2").await,
        Err(OrchestratorError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_exec_echo() {
    let (_, manager) = manager();
    let workspace = manager
        .deploy_workspace(CreateWorkspaceRequest::new("w1").with_template("minimal-dev"))
        .await
        .unwrap();

    let result = manager
        .exec_in_workspace(&workspace.id, &argv(&["echo", "hello"]))
        .await
        .expect("Failed to exec");
    assert!(result.output.contains("hello"));
    assert_eq!(result.exit_code, Some(0));
}

#[tokio::test]
async fn test_exec_reports_nonzero_exit() {
    let (_, manager) = manager();
    let workspace = manager
        .deploy_workspace(CreateWorkspaceRequest::new("w1").with_template("minimal-dev"))
        .await
        .unwrap();

    let result = manager
        .exec_in_workspace(&workspace.id, &argv(&["no-such-tool"]))
        .await
        .unwrap();
    assert_eq!(result.exit_code, Some(127));
    assert!(result.output.contains("not found"));
}

#[tokio::test]
async fn test_exec_timeout_carries_indicator() {
    let (_, manager) = manager_with(ManagerSettings {
        exec_limits: CaptureLimits::new(Duration::from_millis(100), 1024),
        ..Default::default()
    });
    let workspace = manager
        .deploy_workspace(CreateWorkspaceRequest::new("w1").with_template("minimal-dev"))
        .await
        .unwrap();

    let result = manager
        .exec_in_workspace(&workspace.id, &argv(&["sleep", "30"]))
        .await;
    assert!(matches!(result, Err(OrchestratorError::Timeout { .. })));
}

#[tokio::test]
async fn test_exec_output_limit_returns_partial_output() {
    let (runtime, manager) = manager_with(ManagerSettings {
        exec_limits: CaptureLimits::new(Duration::from_secs(5), 64),
        ..Default::default()
    });
    runtime.on_exec("yes", MockExec::Flood("y\n".to_string())).await;
    let workspace = manager
        .deploy_workspace(CreateWorkspaceRequest::new("w1").with_template("minimal-dev"))
        .await
        .unwrap();

    let err = manager
        .exec_in_workspace(&workspace.id, &argv(&["yes"]))
        .await
        .unwrap_err();
    match &err {
        OrchestratorError::OutputLimit { limit, output } => {
            assert_eq!(*limit, 64);
            assert!(output.starts_with("y\ny\n"));
        }
        other => panic!("Expected OutputLimit, got {other:?}"),
    }
    assert!(err.partial_output().is_some());
}

#[tokio::test]
async fn test_exec_empty_argv_and_stopped_workspace() {
    let (runtime, manager) = manager();
    let workspace = manager
        .create_workspace(CreateWorkspaceRequest::new("w1").with_template("minimal-dev"))
        .await
        .unwrap();

    assert!(matches!(
        manager.exec_in_workspace(&workspace.id, &[]).await,
        Err(OrchestratorError::InvalidInput(_))
    ));
    assert!(matches!(
        manager
            .exec_in_workspace(&workspace.id, &argv(&["echo", "hi"]))
            .await,
        Err(OrchestratorError::Conflict(_))
    ));
    assert_eq!(runtime.call_count(MockOp::Exec).await, 1);
}

#[tokio::test]
async fn test_logs_default_and_explicit_tail() {
    let (runtime, manager) = manager();
    let workspace = manager
        .deploy_workspace(CreateWorkspaceRequest::new("w1").with_template("minimal-dev"))
        .await
        .unwrap();
    for i in 0..150 {
        runtime
            .push_log(&workspace.container_id, &format!("line {i}"))
            .await
            .unwrap();
    }

    let default_tail = manager.get_workspace_logs(&workspace.id, None).await.unwrap();
    assert_eq!(default_tail.lines().count(), 100);
    assert!(default_tail.ends_with("line 149\n"));

    let short = manager
        .get_workspace_logs(&workspace.id, Some(2))
        .await
        .unwrap();
    assert_eq!(short, "line 148\nline 149\n");
}

#[tokio::test]
async fn test_engine_unavailable_is_normalized() {
    let (runtime, manager) = manager();
    runtime
        .fail_next(
            MockOp::List,
            RuntimeError::EngineUnavailable("connection refused".to_string()),
        )
        .await;

    assert!(matches!(
        manager.list_workspaces().await,
        Err(OrchestratorError::EngineUnavailable(_))
    ));
    // Not fatal: the next call goes through.
    assert!(manager.list_workspaces().await.is_ok());
}
