//! Pipeline driver
//!
//! Executes one deployment run phase by phase. The new instance always
//! starts beside the serving one; traffic moves only after the health gate
//! passes, and a failed gate tears the new instance down without touching
//! the old route.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::deploy::fsm::{PipelineEvent, PipelineFsm, PipelinePhase};
use crate::deploy::hooks;
use crate::deploy::manager::DeployManager;
use crate::errors::OrchestratorError;
use crate::models::app::{App, Environment};
use crate::models::deployment::{DeploymentRun, Trigger};
use crate::models::pipeline::{HookPhase, PipelineConfig};
use crate::models::release::ReleaseStatus;
use crate::notify::event::{EventKind, LifecycleEvent};
use crate::providers::{InstanceId, InstanceSpec, Slot};

/// Where a run enters the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Entry {
    /// From the beginning: hooks, build, tests, approval
    Full,

    /// Straight to instance launch; the artifact already exists
    Promote,
}

/// Everything a run needs, snapshotted at creation
pub(crate) struct PipelineContext {
    pub(crate) app: App,
    pub(crate) environment: Environment,
    pub(crate) config: PipelineConfig,
    pub(crate) run: DeploymentRun,
    pub(crate) entry: Entry,
}

/// Mutable progress shared between the happy path and failure handling
#[derive(Default)]
struct Progress {
    switched: bool,
    new_instance: Option<InstanceId>,
    old_upstream: Option<InstanceId>,
    old_release: Option<Uuid>,
}

/// Drive a run to a terminal phase, returning the final run record
pub(crate) async fn execute(
    manager: Arc<DeployManager>,
    mut ctx: PipelineContext,
    guard: OwnedMutexGuard<()>,
) -> DeploymentRun {
    // Held until the run settles; competing starts fail fast meanwhile
    let _guard = guard;

    let mut fsm = PipelineFsm::new();
    let mut progress = Progress::default();

    emit(&manager, &ctx, EventKind::Started, None).await;

    let result = drive(&manager, &mut ctx, &mut fsm, &mut progress).await;

    match result {
        Ok(()) => finish_success(&manager, &mut ctx, &progress).await,
        Err(err) => finish_failure(&manager, &mut ctx, &mut fsm, &mut progress, err).await,
    }

    ctx.run.clone()
}

/// Apply an FSM event and persist the run at its new phase
async fn step(
    manager: &DeployManager,
    run: &mut DeploymentRun,
    fsm: &mut PipelineFsm,
    event: PipelineEvent,
) -> Result<(), OrchestratorError> {
    fsm.process(event).map_err(OrchestratorError::Internal)?;
    run.phase = fsm.phase();
    let app = run.app.clone();
    manager
        .store
        .update_runs(&app, |history| history.upsert(run.clone()))
        .await?;
    Ok(())
}

fn pipeline_env(ctx: &PipelineContext) -> HashMap<String, String> {
    let mut env = ctx.environment.env_vars.clone();
    env.insert("APP_NAME".to_string(), ctx.app.name.clone());
    env.insert("DEPLOY_ENV".to_string(), ctx.environment.name.clone());
    env.insert("COMMIT_SHA".to_string(), ctx.run.commit_sha.clone());
    env.insert("PORT".to_string(), ctx.app.port.to_string());
    env
}

async fn emit(
    manager: &DeployManager,
    ctx: &PipelineContext,
    kind: EventKind,
    error: Option<String>,
) {
    let event = LifecycleEvent {
        app: ctx.app.name.clone(),
        environment: ctx.environment.name.clone(),
        kind,
        commit_sha: ctx.run.commit_sha.clone(),
        trigger: ctx.run.trigger,
        duration_secs: ctx.run.duration_secs(),
        error,
        notifications: ctx.config.notifications.clone(),
    };
    // Notification delivery never influences the run
    let _ = manager.events.send(event).await;
}

async fn drive(
    manager: &Arc<DeployManager>,
    ctx: &mut PipelineContext,
    fsm: &mut PipelineFsm,
    progress: &mut Progress,
) -> Result<(), OrchestratorError> {
    let env_vars = pipeline_env(ctx);

    match ctx.entry {
        Entry::Full => {
            // pre_build hooks
            step(manager, &mut ctx.run, fsm, PipelineEvent::Begin).await?;
            hooks::run_phase(&ctx.config, HookPhase::PreBuild, &env_vars).await?;
            ctx.run.record_outcome(PipelinePhase::PreBuild, true, None);

            // build
            step(manager, &mut ctx.run, fsm, PipelineEvent::PreBuildDone).await?;
            let artifact = manager
                .repository
                .build_artifact(&ctx.app.name, &ctx.app.repo_url, &ctx.run.commit_sha)
                .await?;
            let release_id = ctx.run.release_id;
            manager
                .store
                .update_releases(&ctx.app.name, |set| {
                    if let Some(release) = set.get_mut(&release_id) {
                        release.artifact = artifact.clone();
                    }
                })
                .await?;
            ctx.run
                .record_outcome(PipelinePhase::Building, true, Some(artifact));

            // test gate
            step(manager, &mut ctx.run, fsm, PipelineEvent::BuildDone).await?;
            hooks::run_tests(&ctx.config.tests, &env_vars).await?;
            ctx.run.record_outcome(PipelinePhase::TestGate, true, None);

            // pre_deploy hooks
            step(manager, &mut ctx.run, fsm, PipelineEvent::TestsPassed).await?;
            hooks::run_phase(&ctx.config, HookPhase::PreDeploy, &env_vars).await?;
            ctx.run.record_outcome(PipelinePhase::PreDeploy, true, None);

            // approval gate
            let approval_required = ctx.config.approval.enabled;
            step(
                manager,
                &mut ctx.run,
                fsm,
                PipelineEvent::PreDeployDone { approval_required },
            )
            .await?;
            if approval_required {
                emit(manager, ctx, EventKind::AwaitingApproval, None).await;
                let (request, rx) = manager
                    .approvals
                    .request(&ctx.run, &ctx.config.approval)
                    .await?;
                let window = Duration::from_secs(ctx.config.approval.timeout_minutes * 60);
                manager.approvals.await_decision(&request, rx, window).await?;
                ctx.run.record_outcome(PipelinePhase::ApprovalWait, true, None);
                step(manager, &mut ctx.run, fsm, PipelineEvent::Approved).await?;
            }
        }
        Entry::Promote => {
            step(manager, &mut ctx.run, fsm, PipelineEvent::Promote).await?;
        }
    }

    // Launch the new instance beside the serving one
    progress.old_upstream = manager.routing.current_upstream(&ctx.app.name).await?;
    progress.old_release = ctx.app.active.get(&ctx.environment.name).copied();

    let slot = progress
        .old_upstream
        .as_ref()
        .and_then(|id| id.slot())
        .map(|s| s.other())
        .unwrap_or(Slot::Blue);

    let releases = manager.store.load_releases(&ctx.app.name).await?;
    let release = releases.get(&ctx.run.release_id).ok_or_else(|| {
        OrchestratorError::StorageError(format!("release {} vanished", ctx.run.release_id))
    })?;

    let spec = InstanceSpec {
        app: ctx.app.name.clone(),
        environment: ctx.environment.name.clone(),
        release_id: release.id,
        artifact: release.artifact.clone(),
        port: ctx.app.port,
        slot,
        env_vars: ctx.environment.env_vars.clone(),
    };
    let instance = manager.runtime.start_instance(&spec).await?;
    progress.new_instance = Some(instance.clone());
    ctx.run
        .record_outcome(PipelinePhase::Starting, true, Some(instance.0.clone()));
    step(manager, &mut ctx.run, fsm, PipelineEvent::InstanceUp).await?;

    // Health gate: bounded probes before any traffic moves
    let check = &ctx.app.health_check;
    let mut healthy = false;
    for attempt in 1..=check.max_attempts {
        match manager
            .runtime
            .health_probe(&instance, check, ctx.app.port)
            .await
        {
            Ok(true) => {
                healthy = true;
                break;
            }
            Ok(false) => debug!(
                "Health probe {}/{} failed for {}",
                attempt, check.max_attempts, instance
            ),
            Err(e) => debug!(
                "Health probe {}/{} errored for {}: {}",
                attempt, check.max_attempts, instance, e
            ),
        }
        if attempt < check.max_attempts {
            tokio::time::sleep(Duration::from_secs(check.interval_secs)).await;
        }
    }
    if !healthy {
        // Tear the unhealthy instance down; the old route was never touched
        if let Err(e) = manager.runtime.stop_instance(&instance).await {
            warn!("Failed to stop unhealthy instance {}: {}", instance, e);
        }
        progress.new_instance = None;
        return Err(OrchestratorError::HealthCheckTimeout {
            app: ctx.app.name.clone(),
            attempts: check.max_attempts,
        });
    }
    ctx.run
        .record_outcome(PipelinePhase::HealthChecking, true, None);
    step(manager, &mut ctx.run, fsm, PipelineEvent::HealthPassed).await?;

    // Atomic switch, serialized across all apps
    {
        let _route_guard = manager.routing_lock.lock().await;
        manager
            .routing
            .set_route(&ctx.app.name, &ctx.app.domains, &instance, ctx.app.port)
            .await?;
    }
    progress.switched = true;
    info!(
        "Traffic for '{}' switched to {}",
        ctx.app.name, instance
    );

    let release_id = ctx.run.release_id;
    let old_release = progress.old_release;
    let rollback_run = ctx.run.trigger == Trigger::Rollback;
    manager
        .store
        .update_releases(&ctx.app.name, |set| {
            if let Some(release) = set.get_mut(&release_id) {
                release.status = ReleaseStatus::Healthy;
            }
            // A rollback retires the release it walked away from
            if rollback_run {
                if let Some(prev) = old_release.filter(|id| *id != release_id) {
                    if let Some(release) = set.get_mut(&prev) {
                        release.status = ReleaseStatus::RolledBack;
                    }
                }
            }
        })
        .await?;
    let env_name = ctx.environment.name.clone();
    manager
        .store
        .update_app(&ctx.app.name, |app| {
            app.active.insert(env_name, release_id);
            app.status = crate::models::app::AppStatus::Running;
        })
        .await?;
    ctx.run.record_outcome(PipelinePhase::Switching, true, None);
    step(manager, &mut ctx.run, fsm, PipelineEvent::Switched).await?;

    // post_deploy hooks
    hooks::run_phase(&ctx.config, HookPhase::PostDeploy, &env_vars).await?;
    ctx.run.record_outcome(PipelinePhase::PostDeploy, true, None);
    step(manager, &mut ctx.run, fsm, PipelineEvent::PostDeployDone).await?;

    Ok(())
}

async fn finish_success(
    manager: &Arc<DeployManager>,
    ctx: &mut PipelineContext,
    progress: &Progress,
) {
    ctx.run.finished_at = Some(Utc::now());
    persist_run(manager, &ctx.run).await;

    let keep_versions = ctx.config.rollback.keep_versions;
    let keep_old_secs = if ctx.config.blue_green.enabled {
        ctx.config.blue_green.keep_old_secs
    } else {
        0
    };

    let retiring = progress
        .old_upstream
        .clone()
        .filter(|old| Some(old) != progress.new_instance.as_ref());

    match retiring {
        Some(old) if keep_old_secs == 0 => {
            if let Err(e) = manager.runtime.stop_instance(&old).await {
                warn!("Failed to retire {}: {}", old, e);
            }
            prune(manager, ctx, keep_versions, None).await;
        }
        Some(old) => {
            // The old instance stays up for the grace window; its release
            // must survive pruning until it is retired
            prune(manager, ctx, keep_versions, progress.old_release).await;

            let manager = manager.clone();
            let app = ctx.app.name.clone();
            let environment = ctx.environment.name.clone();
            tokio::spawn(async move {
                (manager.retire_sleep)(Duration::from_secs(keep_old_secs)).await;
                info!("Retiring kept-old instance {} of '{}'", old, app);
                if let Err(e) = manager.runtime.stop_instance(&old).await {
                    warn!("Failed to retire {}: {}", old, e);
                }
                if let Err(e) = manager
                    .versions
                    .prune(&app, &environment, keep_versions, None)
                    .await
                {
                    warn!("Deferred prune failed for '{}': {}", app, e);
                }
            });
        }
        None => {
            prune(manager, ctx, keep_versions, None).await;
        }
    }

    info!(
        "Deployment of {}/{} completed (run {})",
        ctx.app.name, ctx.environment.name, ctx.run.id
    );
    emit(manager, ctx, EventKind::Succeeded, None).await;
}

async fn finish_failure(
    manager: &Arc<DeployManager>,
    ctx: &mut PipelineContext,
    fsm: &mut PipelineFsm,
    progress: &mut Progress,
    err: OrchestratorError,
) {
    error!(
        "Deployment of {}/{} failed in {:?}: {}",
        ctx.app.name,
        ctx.environment.name,
        fsm.phase(),
        err
    );
    ctx.run
        .record_outcome(fsm.phase(), false, Some(err.to_string()));

    if let Err(e) = step(manager, &mut ctx.run, fsm, PipelineEvent::Fault(err.to_string())).await {
        warn!("Could not record fault transition: {}", e);
    }

    // on_failure hooks are best-effort
    let env_vars = pipeline_env(ctx);
    hooks::run_failure_hooks(&ctx.config, &env_vars).await;

    // An instance that never took traffic is an orphan
    if !progress.switched {
        if let Some(instance) = progress.new_instance.take() {
            if let Err(e) = manager.runtime.stop_instance(&instance).await {
                warn!("Failed to stop orphaned instance {}: {}", instance, e);
            }
        }
        if err.keeps_previous_route() && progress.old_upstream.is_some() {
            info!(
                "Traffic for {}/{} is unaffected, the previous release keeps serving",
                ctx.app.name, ctx.environment.name
            );
        }
    }

    let rolling_back = progress.switched
        && ctx.config.rollback.enabled
        && ctx.config.rollback.auto_rollback_on_failure
        && progress.old_upstream.is_some()
        && progress.old_release.is_some();

    if let Err(e) = step(
        manager,
        &mut ctx.run,
        fsm,
        PipelineEvent::FailureHooksDone { rolling_back },
    )
    .await
    {
        warn!("Could not settle failed run: {}", e);
    }

    if rolling_back {
        match unswitch(manager, ctx, progress).await {
            Ok(()) => {
                let _ = step(manager, &mut ctx.run, fsm, PipelineEvent::RollbackComplete).await;
                ctx.run.error = Some(err.to_string());
                ctx.run.finished_at = Some(Utc::now());
                persist_run(manager, &ctx.run).await;
                emit(manager, ctx, EventKind::RolledBack, Some(err.to_string())).await;
                return;
            }
            Err(rollback_err) => {
                error!(
                    "Auto-rollback of '{}' failed: {}",
                    ctx.app.name, rollback_err
                );
                let _ = step(
                    manager,
                    &mut ctx.run,
                    fsm,
                    PipelineEvent::Fault(rollback_err.to_string()),
                )
                .await;
            }
        }
    }

    // Mark the release this run created as failed; a promote run deployed
    // an existing release whose history stays intact
    if ctx.entry == Entry::Full {
        let release_id = ctx.run.release_id;
        let marked = manager
            .store
            .update_releases(&ctx.app.name, |set| {
                if let Some(release) = set.get_mut(&release_id) {
                    if release.status == ReleaseStatus::Pending {
                        release.status = ReleaseStatus::Failed;
                    }
                }
            })
            .await;
        if let Err(e) = marked {
            warn!("Could not mark release {} failed: {}", release_id, e);
        }
    }

    let mut message = err.to_string();
    if !progress.switched && err.keeps_previous_route() && progress.old_upstream.is_some() {
        message.push_str("; the previous release is still serving: retry the deploy or use rollback");
    }
    ctx.run.error = Some(message.clone());
    ctx.run.finished_at = Some(Utc::now());
    persist_run(manager, &ctx.run).await;
    emit(manager, ctx, EventKind::Failed, Some(message)).await;
}

/// Point traffic back at the previous instance after a post-switch failure
async fn unswitch(
    manager: &Arc<DeployManager>,
    ctx: &PipelineContext,
    progress: &mut Progress,
) -> Result<(), OrchestratorError> {
    let old = progress
        .old_upstream
        .clone()
        .ok_or_else(|| OrchestratorError::Internal("no previous upstream".to_string()))?;
    let old_release = progress
        .old_release
        .ok_or_else(|| OrchestratorError::Internal("no previous release".to_string()))?;

    {
        let _route_guard = manager.routing_lock.lock().await;
        manager
            .routing
            .set_route(&ctx.app.name, &ctx.app.domains, &old, ctx.app.port)
            .await?;
    }

    if let Some(instance) = progress.new_instance.take() {
        if let Err(e) = manager.runtime.stop_instance(&instance).await {
            warn!("Failed to stop rolled-back instance {}: {}", instance, e);
        }
    }

    let release_id = ctx.run.release_id;
    manager
        .store
        .update_releases(&ctx.app.name, |set| {
            if let Some(release) = set.get_mut(&release_id) {
                release.status = ReleaseStatus::Failed;
            }
        })
        .await?;
    let env_name = ctx.environment.name.clone();
    manager
        .store
        .update_app(&ctx.app.name, |app| {
            app.active.insert(env_name, old_release);
        })
        .await?;

    info!(
        "Traffic for '{}' restored to {} after failed deployment",
        ctx.app.name, old
    );
    Ok(())
}

async fn prune(
    manager: &Arc<DeployManager>,
    ctx: &PipelineContext,
    keep_versions: usize,
    deferred: Option<Uuid>,
) {
    if let Err(e) = manager
        .versions
        .prune(&ctx.app.name, &ctx.environment.name, keep_versions, deferred)
        .await
    {
        warn!("Retention prune failed for '{}': {}", ctx.app.name, e);
    }
}

async fn persist_run(manager: &Arc<DeployManager>, run: &DeploymentRun) {
    let result = manager
        .store
        .update_runs(&run.app, |history| history.upsert(run.clone()))
        .await;
    if let Err(e) = result {
        warn!("Could not persist run {}: {}", run.id, e);
    }
}
