//! Daemon state management

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::manager::DeployManager;
use crate::errors::OrchestratorError;
use crate::gates::approval::ApprovalGate;
use crate::gates::rate_limit::RateLimiter;
use crate::notify::event::LifecycleEvent;
use crate::providers::docker::DockerRuntime;
use crate::providers::git::GitRepository;
use crate::providers::routing::FileRoutingTable;
use crate::storage::store::AppStore;

/// Activity tracker for idle timeout detection
pub struct ActivityTracker {
    last_touched: AtomicU64,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            last_touched: AtomicU64::new(now_secs()),
        }
    }

    pub fn touch(&self) {
        self.last_touched.store(now_secs(), Ordering::SeqCst);
    }

    pub fn last_touched(&self) -> u64 {
        self.last_touched.load(Ordering::SeqCst)
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Main daemon state
pub struct AppState {
    /// Durable app store
    pub store: Arc<AppStore>,

    /// Deployment manager
    pub manager: Arc<DeployManager>,

    /// Manual approval gate
    pub approvals: Arc<ApprovalGate>,

    /// Webhook rate limiter
    pub limiter: Arc<RateLimiter>,

    /// Activity tracker
    pub activity_tracker: Arc<ActivityTracker>,
}

impl AppState {
    /// Initialize daemon state, returning the lifecycle event queue the
    /// notifier worker drains.
    pub async fn init(
        options: &AppOptions,
    ) -> Result<(Self, mpsc::Receiver<LifecycleEvent>), OrchestratorError> {
        info!("Initializing daemon state...");

        let layout = options.storage.layout.clone();
        layout.setup().await?;

        let store = Arc::new(AppStore::new(layout.clone()));
        let approvals = Arc::new(ApprovalGate::new(store.clone()));
        let limiter = Arc::new(RateLimiter::new());
        let activity_tracker = Arc::new(ActivityTracker::new());

        let (events_tx, events_rx) = mpsc::channel(options.event_queue_depth);

        let runtime = Arc::new(DockerRuntime::new(&options.docker_network));
        let routing = Arc::new(FileRoutingTable::new(layout.routing_dir()));
        let repository = Arc::new(GitRepository::new(layout.builds_dir()));

        let manager = Arc::new(DeployManager::new(
            store.clone(),
            runtime,
            routing,
            repository,
            approvals.clone(),
            events_tx,
        ));

        let state = Self {
            store,
            manager,
            approvals,
            limiter,
            activity_tracker,
        };

        Ok((state, events_rx))
    }

    /// Shutdown daemon state
    pub async fn shutdown(&self) -> Result<(), OrchestratorError> {
        info!("Shutting down daemon state...");
        Ok(())
    }
}
