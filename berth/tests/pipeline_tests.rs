//! Deployment pipeline integration tests over provider fakes

mod common;

use std::collections::HashMap;
use std::time::Duration;

use berth::deploy::fsm::PipelinePhase;
use berth::errors::OrchestratorError;
use berth::models::app::{AppStatus, Environment};
use berth::models::deployment::Trigger;
use berth::models::pipeline::{HookCommand, HookPhase};
use berth::models::release::ReleaseStatus;

use common::{sha, Harness};

fn hook(name: &str, phase: HookPhase, command: &str, required: bool) -> HookCommand {
    HookCommand {
        name: name.to_string(),
        phase,
        command: command.to_string(),
        timeout_secs: 10,
        required,
    }
}

#[tokio::test]
async fn test_first_deploy_switches_to_blue() {
    let h = Harness::new().await;
    h.create_app("web").await;

    let handle = h
        .manager
        .start_deployment("web", "production", &sha('a'), Trigger::Manual)
        .await
        .unwrap();
    let run = handle.task.await.unwrap();

    assert_eq!(run.phase, PipelinePhase::Completed);
    assert_eq!(h.routing.upstream_of("web").as_deref(), Some("web-production-blue"));
    assert_eq!(h.repository.build_count(), 1);
    assert!(h.runtime.stopped_names().is_empty());

    let app = h.store.load_app("web").await.unwrap();
    assert_eq!(app.status, AppStatus::Running);
    let release_id = app.active.get("production").copied().unwrap();
    let releases = h.store.load_releases("web").await.unwrap();
    assert_eq!(releases.get(&release_id).unwrap().status, ReleaseStatus::Healthy);
}

#[tokio::test]
async fn test_second_deploy_alternates_slot_and_retires_old() {
    let h = Harness::new().await;
    h.create_app("web").await;

    let first = h
        .manager
        .start_deployment("web", "production", &sha('a'), Trigger::Manual)
        .await
        .unwrap();
    first.task.await.unwrap();

    let second = h
        .manager
        .start_deployment("web", "production", &sha('b'), Trigger::Manual)
        .await
        .unwrap();
    let run = second.task.await.unwrap();

    assert_eq!(run.phase, PipelinePhase::Completed);
    assert_eq!(h.routing.upstream_of("web").as_deref(), Some("web-production-green"));
    // The blue instance was retired after the switch
    assert_eq!(h.runtime.stopped_names(), vec!["web-production-blue"]);
}

#[tokio::test]
async fn test_health_gate_failure_keeps_old_route() {
    let h = Harness::new().await;
    h.create_app("web").await;

    let first = h
        .manager
        .start_deployment("web", "production", &sha('a'), Trigger::Manual)
        .await
        .unwrap();
    first.task.await.unwrap();
    let app_before = h.store.load_app("web").await.unwrap();

    // All three probes of the next instance fail
    h.runtime.script_health(&[false, false, false]);
    let second = h
        .manager
        .start_deployment("web", "production", &sha('b'), Trigger::Manual)
        .await
        .unwrap();
    let run = second.task.await.unwrap();

    assert_eq!(run.phase, PipelinePhase::Failed);
    let error = run.error.unwrap();
    assert!(error.contains("health check"));
    // The message names the way out
    assert!(error.contains("the previous release is still serving"));
    assert!(error.contains("retry the deploy or use rollback"));

    // Traffic never moved and the unhealthy instance is gone
    assert_eq!(h.routing.upstream_of("web").as_deref(), Some("web-production-blue"));
    assert_eq!(h.runtime.stopped_names(), vec!["web-production-green"]);

    let app = h.store.load_app("web").await.unwrap();
    assert_eq!(app.active.get("production"), app_before.active.get("production"));

    let releases = h.store.load_releases("web").await.unwrap();
    let failed = releases
        .releases
        .iter()
        .find(|r| r.commit_sha == sha('b'))
        .unwrap();
    assert_eq!(failed.status, ReleaseStatus::Failed);
}

#[tokio::test]
async fn test_concurrent_deploy_rejected() {
    let h = Harness::new().await;
    h.create_app("web").await;
    h.store
        .update_app("web", |app| {
            app.pipeline.hooks = vec![hook("slow", HookPhase::PreBuild, "sleep 1", true)];
        })
        .await
        .unwrap();

    let first = h
        .manager
        .start_deployment("web", "production", &sha('a'), Trigger::Manual)
        .await
        .unwrap();

    let err = h
        .manager
        .start_deployment("web", "production", &sha('b'), Trigger::Manual)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::AlreadyDeploying(_)));
    assert!(h.manager.is_deploying("web"));

    let run = first.task.await.unwrap();
    assert_eq!(run.phase, PipelinePhase::Completed);
    assert!(!h.manager.is_deploying("web"));
}

#[tokio::test]
async fn test_required_hook_failure_halts_before_launch() {
    let h = Harness::new().await;
    h.create_app("web").await;
    h.store
        .update_app("web", |app| {
            app.pipeline.hooks = vec![hook("gate", HookPhase::PreDeploy, "false", true)];
        })
        .await
        .unwrap();

    let handle = h
        .manager
        .start_deployment("web", "production", &sha('a'), Trigger::Manual)
        .await
        .unwrap();
    let run = handle.task.await.unwrap();

    assert_eq!(run.phase, PipelinePhase::Failed);
    // No instance was ever launched and no traffic moved
    assert!(h.runtime.started_names().is_empty());
    assert!(h.routing.upstream_of("web").is_none());
}

#[tokio::test]
async fn test_auto_rollback_restores_previous_release() {
    let h = Harness::new().await;
    h.create_app("web").await;
    h.store
        .update_app("web", |app| {
            app.pipeline.rollback.auto_rollback_on_failure = true;
        })
        .await
        .unwrap();

    let first = h
        .manager
        .start_deployment("web", "production", &sha('a'), Trigger::Manual)
        .await
        .unwrap();
    first.task.await.unwrap();
    let old_release = h
        .store
        .load_app("web")
        .await
        .unwrap()
        .active
        .get("production")
        .copied()
        .unwrap();

    // Fail after the switch, in post_deploy
    h.store
        .update_app("web", |app| {
            app.pipeline.hooks = vec![hook("smoke", HookPhase::PostDeploy, "false", true)];
        })
        .await
        .unwrap();
    let second = h
        .manager
        .start_deployment("web", "production", &sha('b'), Trigger::Manual)
        .await
        .unwrap();
    let run = second.task.await.unwrap();

    assert_eq!(run.phase, PipelinePhase::RolledBack);
    assert_eq!(h.routing.upstream_of("web").as_deref(), Some("web-production-blue"));
    assert!(h.runtime.stopped_names().contains(&"web-production-green".to_string()));

    let app = h.store.load_app("web").await.unwrap();
    assert_eq!(app.active.get("production").copied(), Some(old_release));

    let releases = h.store.load_releases("web").await.unwrap();
    let failed = releases
        .releases
        .iter()
        .find(|r| r.commit_sha == sha('b'))
        .unwrap();
    assert_eq!(failed.status, ReleaseStatus::Failed);
}

#[tokio::test]
async fn test_pre_switch_failure_ends_failed_even_with_auto_rollback() {
    let h = Harness::new().await;
    h.create_app("web").await;
    h.store
        .update_app("web", |app| {
            app.pipeline.rollback.auto_rollback_on_failure = true;
        })
        .await
        .unwrap();

    let first = h
        .manager
        .start_deployment("web", "production", &sha('a'), Trigger::Manual)
        .await
        .unwrap();
    first.task.await.unwrap();

    // Fail before the switch: the health gate never passes
    h.runtime.script_health(&[false, false, false]);
    let second = h
        .manager
        .start_deployment("web", "production", &sha('b'), Trigger::Manual)
        .await
        .unwrap();
    let run = second.task.await.unwrap();

    // Traffic never moved, so there is nothing to roll back
    assert_eq!(run.phase, PipelinePhase::Failed);
    assert_eq!(h.routing.upstream_of("web").as_deref(), Some("web-production-blue"));
}

#[tokio::test]
async fn test_approval_gate_approved() {
    let h = Harness::new().await;
    h.create_app("web").await;
    h.store
        .update_app("web", |app| {
            app.pipeline.approval.enabled = true;
            app.pipeline.approval.timeout_minutes = 1;
        })
        .await
        .unwrap();

    let handle = h
        .manager
        .start_deployment("web", "production", &sha('a'), Trigger::Webhook)
        .await
        .unwrap();

    let approval = wait_for_pending(&h).await;
    h.approvals
        .decide("web", approval.id, true, "ops@example.com")
        .await
        .unwrap();

    let run = handle.task.await.unwrap();
    assert_eq!(run.phase, PipelinePhase::Completed);
    assert_eq!(h.routing.upstream_of("web").as_deref(), Some("web-production-blue"));
}

#[tokio::test]
async fn test_approval_gate_rejected() {
    let h = Harness::new().await;
    h.create_app("web").await;
    h.store
        .update_app("web", |app| {
            app.pipeline.approval.enabled = true;
            app.pipeline.approval.timeout_minutes = 1;
        })
        .await
        .unwrap();

    let handle = h
        .manager
        .start_deployment("web", "production", &sha('a'), Trigger::Webhook)
        .await
        .unwrap();

    let approval = wait_for_pending(&h).await;
    h.approvals
        .decide("web", approval.id, false, "ops@example.com")
        .await
        .unwrap();

    let run = handle.task.await.unwrap();
    assert_eq!(run.phase, PipelinePhase::Failed);
    assert!(run.error.unwrap().contains("rejected"));
    assert!(h.runtime.started_names().is_empty());
}

#[tokio::test]
async fn test_approval_gate_times_out() {
    let h = Harness::new().await;
    h.create_app("web").await;
    h.store
        .update_app("web", |app| {
            app.pipeline.approval.enabled = true;
            app.pipeline.approval.timeout_minutes = 0;
        })
        .await
        .unwrap();

    let handle = h
        .manager
        .start_deployment("web", "production", &sha('a'), Trigger::Webhook)
        .await
        .unwrap();
    let run = handle.task.await.unwrap();

    assert_eq!(run.phase, PipelinePhase::Failed);
    assert!(run.error.unwrap().contains("approval window expired"));
    assert!(h.runtime.started_names().is_empty());
}

#[tokio::test]
async fn test_stop_and_restart() {
    let h = Harness::new().await;
    h.create_app("web").await;

    let handle = h
        .manager
        .start_deployment("web", "production", &sha('a'), Trigger::Manual)
        .await
        .unwrap();
    handle.task.await.unwrap();

    h.manager.stop("web").await.unwrap();
    assert_eq!(h.routing.maintenance.lock().unwrap().as_slice(), ["web"]);
    assert_eq!(h.runtime.stopped_names(), vec!["web-production-blue"]);
    let app = h.store.load_app("web").await.unwrap();
    assert_eq!(app.status, AppStatus::Stopped);

    // Restart promotes the active release without rebuilding
    let handle = h.manager.restart("web").await.unwrap();
    let run = handle.task.await.unwrap();
    assert_eq!(run.phase, PipelinePhase::Completed);
    assert_eq!(h.repository.build_count(), 1);
    assert_eq!(h.routing.upstream_of("web").as_deref(), Some("web-production-blue"));
    let app = h.store.load_app("web").await.unwrap();
    assert_eq!(app.status, AppStatus::Running);
}

#[tokio::test]
async fn test_restart_uses_the_active_environment() {
    let h = Harness::new().await;
    h.create_app("web").await;
    h.store
        .update_app("web", |app| {
            app.environments = vec![Environment {
                name: "staging".to_string(),
                branch: "develop".to_string(),
                auto_deploy: true,
                env_vars: HashMap::new(),
            }];
        })
        .await
        .unwrap();

    let handle = h
        .manager
        .start_deployment("web", "staging", &sha('a'), Trigger::Manual)
        .await
        .unwrap();
    handle.task.await.unwrap();

    h.manager.stop("web").await.unwrap();
    let handle = h.manager.restart("web").await.unwrap();
    let run = handle.task.await.unwrap();

    assert_eq!(run.phase, PipelinePhase::Completed);
    assert_eq!(run.environment, "staging");
    assert_eq!(h.routing.upstream_of("web").as_deref(), Some("web-staging-blue"));
}

#[tokio::test]
async fn test_start_only_applies_to_stopped_apps() {
    let h = Harness::new().await;
    h.create_app("web").await;

    let handle = h
        .manager
        .start_deployment("web", "production", &sha('a'), Trigger::Manual)
        .await
        .unwrap();
    handle.task.await.unwrap();

    let err = h.manager.start("web").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::ConfigError(_)));

    h.manager.stop("web").await.unwrap();
    let handle = h.manager.start("web").await.unwrap();
    assert_eq!(handle.task.await.unwrap().phase, PipelinePhase::Completed);

    let app = h.store.load_app("web").await.unwrap();
    assert_eq!(app.status, AppStatus::Running);

    let logs = h.manager.instance_logs("web", 10).await.unwrap();
    assert!(logs.contains("web-production-blue"));
}

async fn wait_for_pending(h: &Harness) -> berth::models::approval::ApprovalRequest {
    for _ in 0..200 {
        let pending = h.approvals.pending_all().await.unwrap();
        if let Some(approval) = pending.into_iter().next() {
            return approval;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no approval request appeared");
}
