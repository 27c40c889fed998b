//! Deployment manager
//!
//! Owns the per-app run locks and the global routing lock, creates releases
//! and runs, and hands them to the pipeline driver. At most one run is
//! active per app; competing attempts fail fast.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::info;

use crate::deploy::pipeline::{self, Entry, PipelineContext};
use crate::deploy::versions::VersionManager;
use crate::errors::OrchestratorError;
use crate::gates::approval::ApprovalGate;
use crate::models::app::AppStatus;
use crate::models::deployment::{DeploymentRun, Trigger};
use crate::models::release::Release;
use crate::notify::event::{EventKind, LifecycleEvent};
use crate::providers::{ContainerRuntime, Repository, RoutingTable};
use crate::storage::store::AppStore;
use crate::utils::short_sha;

/// Factory for the grace-window delay before kept-old instances retire
pub type RetireSleepFn =
    Box<dyn Fn(Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A created run plus the task driving it to a terminal phase
#[derive(Debug)]
pub struct RunHandle {
    /// The run as persisted at creation (phase: queued)
    pub run: DeploymentRun,

    /// Resolves to the terminal run record
    pub task: JoinHandle<DeploymentRun>,
}

/// Orchestrates deployment runs for all apps
pub struct DeployManager {
    pub(crate) store: Arc<AppStore>,
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    pub(crate) routing: Arc<dyn RoutingTable>,
    pub(crate) repository: Arc<dyn Repository>,
    pub(crate) approvals: Arc<ApprovalGate>,
    pub(crate) versions: VersionManager,
    pub(crate) events: mpsc::Sender<LifecycleEvent>,

    /// One lock per app, held for the duration of a run
    run_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,

    /// Serializes routing-table writes across all apps
    pub(crate) routing_lock: Arc<Mutex<()>>,

    /// Delay before a kept-old instance is retired
    pub(crate) retire_sleep: RetireSleepFn,
}

impl DeployManager {
    pub fn new(
        store: Arc<AppStore>,
        runtime: Arc<dyn ContainerRuntime>,
        routing: Arc<dyn RoutingTable>,
        repository: Arc<dyn Repository>,
        approvals: Arc<ApprovalGate>,
        events: mpsc::Sender<LifecycleEvent>,
    ) -> Self {
        Self {
            versions: VersionManager::new(store.clone()),
            store,
            runtime,
            routing,
            repository,
            approvals,
            events,
            run_locks: StdMutex::new(HashMap::new()),
            routing_lock: Arc::new(Mutex::new(())),
            retire_sleep: Box::new(|wait| Box::pin(tokio::time::sleep(wait))),
        }
    }

    /// Replace the retirement delay; tests use this to drive the grace window
    pub fn with_retire_sleep(mut self, sleep_fn: RetireSleepFn) -> Self {
        self.retire_sleep = sleep_fn;
        self
    }

    pub fn store(&self) -> &Arc<AppStore> {
        &self.store
    }

    pub fn versions(&self) -> &VersionManager {
        &self.versions
    }

    fn run_lock(&self, app: &str) -> Arc<Mutex<()>> {
        let mut locks = self.run_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(app.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn try_acquire(&self, app: &str) -> Option<OwnedMutexGuard<()>> {
        self.run_lock(app).try_lock_owned().ok()
    }

    /// Whether a run currently holds the app's lock
    pub fn is_deploying(&self, app: &str) -> bool {
        match self.run_lock(app).try_lock_owned() {
            Ok(_guard) => false,
            Err(_) => true,
        }
    }

    /// Start a full pipeline run for a commit or branch reference.
    ///
    /// Fails fast with `AlreadyDeploying` when a run is active; the failed
    /// attempt leaves no release and no run record behind.
    pub async fn start_deployment(
        self: &Arc<Self>,
        app_name: &str,
        environment: &str,
        reference: &str,
        trigger: Trigger,
    ) -> Result<RunHandle, OrchestratorError> {
        let guard = self
            .try_acquire(app_name)
            .ok_or_else(|| OrchestratorError::AlreadyDeploying(app_name.to_string()))?;

        let app = self.store.load_app(app_name).await?;
        let env = app
            .environment(environment)
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!("environment '{}' of '{}'", environment, app_name))
            })?;

        let commit = self
            .repository
            .resolve_commit(&app.repo_url, reference)
            .await?;

        let predecessor = app.active.get(environment).copied();
        let release = Release::new(
            environment,
            &commit,
            format!("{}:{}", app_name, short_sha(&commit)),
            predecessor,
        );
        let release_id = release.id;
        self.store
            .update_releases(app_name, |set| set.insert(release))
            .await?;

        let run = DeploymentRun::new(app_name, environment, release_id, &commit, trigger);
        self.store
            .update_runs(app_name, |history| history.add(run.clone()))
            .await?;

        info!(
            "Starting {:?} deployment of {}/{} at {} (run {})",
            trigger,
            app_name,
            environment,
            short_sha(&commit),
            run.id
        );

        // Snapshot the pipeline config at run start
        let ctx = PipelineContext {
            config: app.pipeline.clone(),
            app,
            environment: env,
            run: run.clone(),
            entry: Entry::Full,
        };

        let task = tokio::spawn(pipeline::execute(self.clone(), ctx, guard));
        Ok(RunHandle { run, task })
    }

    /// Roll back to a retained healthy release.
    ///
    /// The target re-enters the pipeline at instance launch with its stored
    /// artifact; the health-gated switch is preserved. An unresolvable
    /// target leaves all state untouched.
    pub async fn rollback(
        self: &Arc<Self>,
        app_name: &str,
        environment: &str,
        target: &str,
    ) -> Result<RunHandle, OrchestratorError> {
        let app = self.store.load_app(app_name).await?;
        if !app.pipeline.rollback.enabled {
            return Err(OrchestratorError::ConfigError(format!(
                "rollback is disabled for '{}'",
                app_name
            )));
        }

        let guard = self
            .try_acquire(app_name)
            .ok_or_else(|| OrchestratorError::AlreadyDeploying(app_name.to_string()))?;

        let env = app
            .environment(environment)
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!("environment '{}' of '{}'", environment, app_name))
            })?;

        let release = self
            .versions
            .resolve_rollback_target(app_name, environment, target)
            .await?;

        let run = DeploymentRun::new(
            app_name,
            environment,
            release.id,
            &release.commit_sha,
            Trigger::Rollback,
        );
        self.store
            .update_runs(app_name, |history| history.add(run.clone()))
            .await?;

        info!(
            "Rolling back {}/{} to {} (run {})",
            app_name,
            environment,
            short_sha(&release.commit_sha),
            run.id
        );

        let ctx = PipelineContext {
            config: app.pipeline.clone(),
            app,
            environment: env,
            run: run.clone(),
            entry: Entry::Promote,
        };

        let task = tokio::spawn(pipeline::execute(self.clone(), ctx, guard));
        Ok(RunHandle { run, task })
    }

    /// Stop the serving instance and put the app's domains into maintenance
    pub async fn stop(&self, app_name: &str) -> Result<(), OrchestratorError> {
        let _guard = self
            .try_acquire(app_name)
            .ok_or_else(|| OrchestratorError::DeploymentInProgress(app_name.to_string()))?;

        let app = self.store.load_app(app_name).await?;
        let upstream = self.routing.current_upstream(app_name).await?;

        {
            let _route_guard = self.routing_lock.lock().await;
            self.routing
                .write_maintenance(app_name, &app.domains)
                .await?;
        }

        if let Some(instance) = upstream {
            self.runtime.stop_instance(&instance).await?;
        }

        self.store
            .update_app(app_name, |app| app.status = AppStatus::Stopped)
            .await?;

        info!("Stopped '{}'", app_name);
        Ok(())
    }

    /// Start a stopped app by promoting its active release
    pub async fn start(self: &Arc<Self>, app_name: &str) -> Result<RunHandle, OrchestratorError> {
        let app = self.store.load_app(app_name).await?;
        if app.status == AppStatus::Running {
            return Err(OrchestratorError::ConfigError(format!(
                "'{}' is already running",
                app_name
            )));
        }
        self.restart(app_name).await
    }

    /// Restart the active release as a fresh promote run.
    ///
    /// Restart is a zero-downtime promote of the already-active release:
    /// new instance, health gate, switch, retire.
    pub async fn restart(self: &Arc<Self>, app_name: &str) -> Result<RunHandle, OrchestratorError> {
        let guard = self
            .try_acquire(app_name)
            .ok_or_else(|| OrchestratorError::DeploymentInProgress(app_name.to_string()))?;

        let app = self.store.load_app(app_name).await?;
        // The environment holding an active release; lowest name on a tie
        let (env_name, release_id) = app
            .active
            .iter()
            .min_by(|a, b| a.0.cmp(b.0))
            .map(|(k, v)| (k.clone(), *v))
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!("'{}' has no deployed release", app_name))
            })?;

        let env = app
            .environment(&env_name)
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!("environment '{}' of '{}'", env_name, app_name))
            })?;

        let releases = self.store.load_releases(app_name).await?;
        let release = releases.get(&release_id).cloned().ok_or_else(|| {
            OrchestratorError::StorageError(format!(
                "active release {} of '{}' is missing",
                release_id, app_name
            ))
        })?;

        let run = DeploymentRun::new(
            app_name,
            &env_name,
            release.id,
            &release.commit_sha,
            Trigger::Manual,
        );
        self.store
            .update_runs(app_name, |history| history.add(run.clone()))
            .await?;

        let ctx = PipelineContext {
            config: app.pipeline.clone(),
            app,
            environment: env,
            run: run.clone(),
            entry: Entry::Promote,
        };

        let task = tokio::spawn(pipeline::execute(self.clone(), ctx, guard));
        Ok(RunHandle { run, task })
    }

    /// Remove an app entirely: route, serving instance, and stored state
    pub async fn destroy(&self, app_name: &str) -> Result<(), OrchestratorError> {
        let _guard = self
            .try_acquire(app_name)
            .ok_or_else(|| OrchestratorError::DeploymentInProgress(app_name.to_string()))?;

        self.store.load_app(app_name).await?;
        let upstream = self.routing.current_upstream(app_name).await?;

        {
            let _route_guard = self.routing_lock.lock().await;
            self.routing.remove_route(app_name).await?;
        }

        if let Some(instance) = upstream {
            self.runtime.stop_instance(&instance).await?;
        }

        self.store.delete_app(app_name).await?;
        info!("Destroyed '{}'", app_name);
        Ok(())
    }

    /// Recent log output from the instance currently receiving traffic
    pub async fn instance_logs(
        &self,
        app_name: &str,
        tail: usize,
    ) -> Result<String, OrchestratorError> {
        let upstream = self
            .routing
            .current_upstream(app_name)
            .await?
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!("'{}' has no serving instance", app_name))
            })?;
        self.runtime.stream_logs(&upstream, tail).await
    }

    /// Queue a synthetic event to verify notification channel configuration
    pub async fn send_test_notification(&self, app_name: &str) -> Result<(), OrchestratorError> {
        let app = self.store.load_app(app_name).await?;
        for channel in &app.pipeline.notifications.channels {
            url::Url::parse(channel.endpoint()).map_err(|e| {
                OrchestratorError::ConfigError(format!(
                    "{} channel has an invalid endpoint url: {}",
                    channel.kind(),
                    e
                ))
            })?;
        }
        let event = LifecycleEvent {
            app: app.name.clone(),
            environment: "production".to_string(),
            kind: EventKind::Succeeded,
            commit_sha: "abc1234".to_string(),
            trigger: Trigger::Manual,
            duration_secs: Some(42),
            error: None,
            notifications: app.pipeline.notifications.clone(),
        };
        self.events
            .send(event)
            .await
            .map_err(|_| OrchestratorError::Internal("event queue closed".to_string()))
    }
}
