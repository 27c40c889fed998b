//! Main daemon run loop

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::{ActivityTracker, AppState};
use crate::errors::OrchestratorError;
use crate::notify::channels::build_sender;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::{notifier, reaper};

/// Run the berth daemon
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), OrchestratorError> {
    info!("Initializing berth...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    // Initialize the daemon state and workers
    let app_state = match init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to start berth: {}", e);
            shutdown_manager.shutdown().await?;
            return Err(e);
        }
    };

    // Handle lifecycle based on persistence mode
    if !options.lifecycle.is_persistent {
        tokio::select! {
            _ = shutdown_signal => {
                info!("Shutdown signal received, shutting down...");
            }
            _ = await_idle_timeout(
                app_state.activity_tracker.clone(),
                options.lifecycle.idle_timeout,
                options.lifecycle.idle_timeout_poll_interval,
            ) => {
                info!("Idle timeout ({:?}) reached, shutting down...", options.lifecycle.idle_timeout);
            }
            _ = await_max_runtime(options.lifecycle.max_runtime) => {
                info!("Max runtime ({:?}) reached, shutting down...", options.lifecycle.max_runtime);
            }
        }
    } else {
        tokio::select! {
            _ = shutdown_signal => {
                info!("Shutdown signal received, shutting down...");
            }
        }
    }

    // Shutdown
    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

async fn await_idle_timeout(
    activity_tracker: Arc<ActivityTracker>,
    idle_timeout: Duration,
    poll_interval: Duration,
) -> Result<(), OrchestratorError> {
    loop {
        tokio::time::sleep(poll_interval).await;
        let last_activity =
            SystemTime::UNIX_EPOCH + Duration::from_secs(activity_tracker.last_touched());
        match SystemTime::now().duration_since(last_activity) {
            Ok(duration) if duration > idle_timeout => {
                info!("Daemon idle timeout reached");
                return Ok(());
            }
            Err(_) => {
                error!("Idle timeout checker error, ignoring...");
            }
            _ => {}
        }
    }
}

async fn await_max_runtime(max_runtime: Duration) -> Result<(), OrchestratorError> {
    tokio::time::sleep(max_runtime).await;
    Ok(())
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, OrchestratorError> {
    let (app_state, events_rx) = AppState::init(options).await?;
    let app_state = Arc::new(app_state);
    shutdown_manager.with_app_state(app_state.clone())?;

    init_notifier_worker(
        options.notifier.clone(),
        events_rx,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    init_reaper_worker(
        options.reaper.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    if options.enable_server {
        init_server(
            options,
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;
    }

    Ok(app_state)
}

fn init_notifier_worker(
    options: notifier::Options,
    events_rx: tokio::sync::mpsc::Receiver<crate::notify::event::LifecycleEvent>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), OrchestratorError> {
    info!("Initializing notifier worker...");

    let client = reqwest::Client::new();
    let notifier_handle = tokio::spawn(async move {
        notifier::run(
            &options,
            events_rx,
            move |channel| build_sender(channel, &client),
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_notifier_worker_handle(notifier_handle)?;
    Ok(())
}

fn init_reaper_worker(
    options: reaper::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), OrchestratorError> {
    info!("Initializing approval reaper...");

    let gate = app_state.approvals.clone();
    let reaper_handle = tokio::spawn(async move {
        reaper::run(
            &options,
            gate,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_reaper_worker_handle(reaper_handle)?;
    Ok(())
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), OrchestratorError> {
    info!("Initializing HTTP listener...");

    let server_state = ServerState::new(
        app_state.store.clone(),
        app_state.manager.clone(),
        app_state.approvals.clone(),
        app_state.limiter.clone(),
        app_state.activity_tracker.clone(),
    );

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    server_handle: Option<JoinHandle<Result<(), OrchestratorError>>>,
    notifier_worker_handle: Option<JoinHandle<()>>,
    reaper_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            server_handle: None,
            notifier_worker_handle: None,
            reaper_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), OrchestratorError> {
        if self.app_state.is_some() {
            return Err(OrchestratorError::ShutdownError(
                "app_state already set".to_string(),
            ));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_notifier_worker_handle(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Result<(), OrchestratorError> {
        if self.notifier_worker_handle.is_some() {
            return Err(OrchestratorError::ShutdownError(
                "notifier_handle already set".to_string(),
            ));
        }
        self.notifier_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_reaper_worker_handle(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Result<(), OrchestratorError> {
        if self.reaper_worker_handle.is_some() {
            return Err(OrchestratorError::ShutdownError(
                "reaper_handle already set".to_string(),
            ));
        }
        self.reaper_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), OrchestratorError>>,
    ) -> Result<(), OrchestratorError> {
        if self.server_handle.is_some() {
            return Err(OrchestratorError::ShutdownError(
                "server_handle already set".to_string(),
            ));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), OrchestratorError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), OrchestratorError> {
        info!("Shutting down berth...");

        // 1. HTTP listener, so no new runs are admitted
        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| OrchestratorError::ShutdownError(e.to_string()))??;
        }

        // 2. Approval reaper
        if let Some(handle) = self.reaper_worker_handle.take() {
            handle
                .await
                .map_err(|e| OrchestratorError::ShutdownError(e.to_string()))?;
        }

        // 3. Notifier worker
        if let Some(handle) = self.notifier_worker_handle.take() {
            handle
                .await
                .map_err(|e| OrchestratorError::ShutdownError(e.to_string()))?;
        }

        // 4. Daemon state
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
