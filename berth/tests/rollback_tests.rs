//! Rollback and version retention tests

mod common;

use std::time::Duration;

use berth::deploy::fsm::PipelinePhase;
use berth::errors::OrchestratorError;
use berth::models::deployment::Trigger;
use berth::models::release::ReleaseStatus;

use common::{sha, Harness};

async fn deploy(h: &Harness, commit: &str) {
    let handle = h
        .manager
        .start_deployment("web", "production", commit, Trigger::Manual)
        .await
        .unwrap();
    let run = handle.task.await.unwrap();
    assert_eq!(run.phase, PipelinePhase::Completed);
}

#[tokio::test]
async fn test_rollback_promotes_stored_artifact() {
    let h = Harness::new().await;
    h.create_app("web").await;

    deploy(&h, &sha('a')).await;
    deploy(&h, &sha('b')).await;
    assert_eq!(h.repository.build_count(), 2);

    // Target by commit sha prefix
    let handle = h
        .manager
        .rollback("web", "production", &sha('a')[..7])
        .await
        .unwrap();
    let run = handle.task.await.unwrap();

    assert_eq!(run.phase, PipelinePhase::Completed);
    assert_eq!(run.trigger, Trigger::Rollback);
    // The stored artifact was promoted, nothing was rebuilt
    assert_eq!(h.repository.build_count(), 2);

    let app = h.store.load_app("web").await.unwrap();
    let active = app.active.get("production").copied().unwrap();
    let releases = h.store.load_releases("web").await.unwrap();
    let head = releases.get(&active).unwrap();
    assert_eq!(head.commit_sha, sha('a'));
    assert_eq!(head.status, ReleaseStatus::Healthy);

    // Retention follows the active chain, so the release rolled away
    // from is pruned once its instance is retired
    assert!(releases.releases.iter().all(|r| r.commit_sha != sha('b')));
}

#[tokio::test]
async fn test_unknown_target_leaves_state_untouched() {
    let h = Harness::new().await;
    h.create_app("web").await;
    deploy(&h, &sha('a')).await;

    let before = h.store.load_app("web").await.unwrap();
    let err = h
        .manager
        .rollback("web", "production", "deadbeef")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::RollbackNotFound(_)));

    let after = h.store.load_app("web").await.unwrap();
    assert_eq!(
        before.active.get("production"),
        after.active.get("production")
    );
    assert!(!h.manager.is_deploying("web"));
    // The failed attempt did not leave a run behind
    let runs = h.store.load_runs("web").await.unwrap();
    assert_eq!(runs.runs.len(), 1);
}

#[tokio::test]
async fn test_rollback_disabled_by_config() {
    let h = Harness::new().await;
    h.create_app("web").await;
    deploy(&h, &sha('a')).await;

    h.store
        .update_app("web", |app| app.pipeline.rollback.enabled = false)
        .await
        .unwrap();

    let err = h
        .manager
        .rollback("web", "production", &sha('a')[..7])
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ConfigError(_)));
}

#[tokio::test]
async fn test_keep_old_grace_window_defers_retirement() {
    let h = Harness::new().await;
    h.create_app("web").await;
    h.store
        .update_app("web", |app| {
            app.pipeline.blue_green.keep_old_secs = 60;
            app.pipeline.rollback.keep_versions = 0;
        })
        .await
        .unwrap();

    deploy(&h, &sha('a')).await;
    deploy(&h, &sha('b')).await;

    // Inside the grace window the blue instance keeps running, and the
    // release it serves survives pruning despite keep_versions = 0
    assert!(h.runtime.stopped_names().is_empty());
    let releases = h.store.load_releases("web").await.unwrap();
    assert!(releases.releases.iter().any(|r| r.commit_sha == sha('a')));

    // Close the window
    h.retire_gate.notify_one();
    for _ in 0..300 {
        if !h.runtime.stopped_names().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.runtime.stopped_names(), vec!["web-production-blue"]);

    // With the instance retired, the deferred release is pruned
    for _ in 0..300 {
        let releases = h.store.load_releases("web").await.unwrap();
        if releases.releases.len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let releases = h.store.load_releases("web").await.unwrap();
    assert!(releases.releases.iter().all(|r| r.commit_sha != sha('a')));
}

#[tokio::test]
async fn test_retention_prunes_beyond_window() {
    let h = Harness::new().await;
    h.create_app("web").await;
    h.store
        .update_app("web", |app| app.pipeline.rollback.keep_versions = 1)
        .await
        .unwrap();

    deploy(&h, &sha('a')).await;
    deploy(&h, &sha('b')).await;
    deploy(&h, &sha('c')).await;

    // Active plus one predecessor survive
    let releases = h.store.load_releases("web").await.unwrap();
    let mut shas: Vec<String> = releases
        .releases
        .iter()
        .map(|r| r.commit_sha.clone())
        .collect();
    shas.sort();
    assert_eq!(shas, vec![sha('b'), sha('c')]);

    // The pruned release is no longer a valid rollback target
    let err = h
        .manager
        .rollback("web", "production", &sha('a')[..7])
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::RollbackNotFound(_)));

    // The retained predecessor still is
    let handle = h
        .manager
        .rollback("web", "production", &sha('b')[..7])
        .await
        .unwrap();
    assert_eq!(handle.task.await.unwrap().phase, PipelinePhase::Completed);
}
