//! File-backed app state store
//!
//! Every write goes through a temp-write + rename, and every
//! read-modify-write for an app is serialized behind a per-app lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::Mutex;
use tracing::warn;

use crate::errors::OrchestratorError;
use crate::models::app::App;
use crate::models::approval::ApprovalSet;
use crate::models::delivery::DeliveryRecord;
use crate::models::deployment::RunHistory;
use crate::models::release::ReleaseSet;
use crate::storage::layout::StorageLayout;

/// Durable store for apps, releases, runs, approvals and deliveries
pub struct AppStore {
    layout: StorageLayout,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AppStore {
    pub fn new(layout: StorageLayout) -> Self {
        Self {
            layout,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    fn storage_lock(&self, app: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(app.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Register a new app. Fails if the name is taken.
    pub async fn create_app(&self, app: &App) -> Result<(), OrchestratorError> {
        let file = self.layout.app_file(&app.name);
        if file.exists().await {
            return Err(OrchestratorError::ConfigError(format!(
                "app '{}' already exists",
                app.name
            )));
        }
        file.write_json_atomic(app).await?;
        // The definition carries the webhook secret
        file.set_permissions_600().await?;
        Ok(())
    }

    /// Remove an app and all of its stored state
    pub async fn delete_app(&self, name: &str) -> Result<(), OrchestratorError> {
        let lock = self.storage_lock(name);
        let _guard = lock.lock().await;

        let dir = self.layout.app_dir(name);
        if !dir.exists().await {
            return Err(OrchestratorError::NotFound(format!("app '{}'", name)));
        }
        dir.delete().await
    }

    pub async fn load_app(&self, name: &str) -> Result<App, OrchestratorError> {
        let file = self.layout.app_file(name);
        if !file.exists().await {
            return Err(OrchestratorError::NotFound(format!("app '{}'", name)));
        }
        file.read_json().await
    }

    pub async fn save_app(&self, app: &App) -> Result<(), OrchestratorError> {
        let lock = self.storage_lock(&app.name);
        let _guard = lock.lock().await;
        self.layout.app_file(&app.name).write_json_atomic(app).await
    }

    /// Read-modify-write the app definition under the per-app lock
    pub async fn update_app<F, R>(&self, name: &str, f: F) -> Result<R, OrchestratorError>
    where
        F: FnOnce(&mut App) -> R,
    {
        let lock = self.storage_lock(name);
        let _guard = lock.lock().await;

        let file = self.layout.app_file(name);
        if !file.exists().await {
            return Err(OrchestratorError::NotFound(format!("app '{}'", name)));
        }
        let mut app: App = file.read_json().await?;
        let result = f(&mut app);
        file.write_json_atomic(&app).await?;
        Ok(result)
    }

    pub async fn load_releases(&self, app: &str) -> Result<ReleaseSet, OrchestratorError> {
        let file = self.layout.releases_file(app);
        if !file.exists().await {
            return Ok(ReleaseSet::default());
        }
        file.read_json().await
    }

    /// Read-modify-write the release arena under the per-app lock
    pub async fn update_releases<F, R>(&self, app: &str, f: F) -> Result<R, OrchestratorError>
    where
        F: FnOnce(&mut ReleaseSet) -> R,
    {
        let lock = self.storage_lock(app);
        let _guard = lock.lock().await;

        let file = self.layout.releases_file(app);
        let mut set = if file.exists().await {
            file.read_json().await?
        } else {
            ReleaseSet::default()
        };
        let result = f(&mut set);
        file.write_json_atomic(&set).await?;
        Ok(result)
    }

    pub async fn load_runs(&self, app: &str) -> Result<RunHistory, OrchestratorError> {
        let file = self.layout.runs_file(app);
        if !file.exists().await {
            return Ok(RunHistory::default());
        }
        file.read_json().await
    }

    /// Read-modify-write the run history under the per-app lock
    pub async fn update_runs<F, R>(&self, app: &str, f: F) -> Result<R, OrchestratorError>
    where
        F: FnOnce(&mut RunHistory) -> R,
    {
        let lock = self.storage_lock(app);
        let _guard = lock.lock().await;

        let file = self.layout.runs_file(app);
        let mut history = if file.exists().await {
            file.read_json().await?
        } else {
            RunHistory::default()
        };
        let result = f(&mut history);
        file.write_json_atomic(&history).await?;
        Ok(result)
    }

    pub async fn load_approvals(&self, app: &str) -> Result<ApprovalSet, OrchestratorError> {
        let file = self.layout.approvals_file(app);
        if !file.exists().await {
            return Ok(ApprovalSet::default());
        }
        file.read_json().await
    }

    /// Read-modify-write the approval set under the per-app lock
    pub async fn update_approvals<F, R>(&self, app: &str, f: F) -> Result<R, OrchestratorError>
    where
        F: FnOnce(&mut ApprovalSet) -> R,
    {
        let lock = self.storage_lock(app);
        let _guard = lock.lock().await;

        let file = self.layout.approvals_file(app);
        let mut set = if file.exists().await {
            file.read_json().await?
        } else {
            ApprovalSet::default()
        };
        let result = f(&mut set);
        file.write_json_atomic(&set).await?;
        Ok(result)
    }

    /// Append one record to the app's delivery log
    pub async fn append_delivery(
        &self,
        app: &str,
        record: &DeliveryRecord,
    ) -> Result<(), OrchestratorError> {
        let line = serde_json::to_string(record)?;
        self.layout.deliveries_file(app).append_line(&line).await
    }

    /// Read the delivery log, newest first
    pub async fn read_deliveries(
        &self,
        app: &str,
        limit: usize,
    ) -> Result<Vec<DeliveryRecord>, OrchestratorError> {
        let file = self.layout.deliveries_file(app);
        if !file.exists().await {
            return Ok(Vec::new());
        }
        let contents = file.read_string().await?;
        let mut records: Vec<DeliveryRecord> = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping malformed delivery record: {}", e),
            }
        }
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }

    /// List the names of all registered apps
    pub async fn list_apps(&self) -> Result<Vec<String>, OrchestratorError> {
        let apps_dir = self.layout.apps_dir();
        if !apps_dir.exists().await {
            return Ok(Vec::new());
        }
        apps_dir.list_dir_names().await
    }

    /// Resolve an app by its webhook token
    pub async fn find_by_token(&self, token: &str) -> Result<Option<App>, OrchestratorError> {
        for name in self.list_apps().await? {
            match self.load_app(&name).await {
                Ok(app) if app.webhook_token == token => return Ok(Some(app)),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable app '{}': {}", name, e),
            }
        }
        Ok(None)
    }
}
