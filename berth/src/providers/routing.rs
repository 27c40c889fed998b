//! File-based routing table for the reverse proxy
//!
//! One JSON file per app under the routing directory. The proxy watches the
//! directory for changes; every write lands via temp-write + rename so a
//! reader always sees the old route or the new one, never a torn file.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::providers::{InstanceId, RoutingTable};

/// One app's route entry as the proxy consumes it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    pub domains: Vec<String>,
    /// Upstream container name, or none while in maintenance
    pub upstream: Option<String>,
    pub port: u16,
    #[serde(default)]
    pub maintenance: bool,
}

/// Routing table persisted as per-app files
pub struct FileRoutingTable {
    dir: Dir,
}

impl FileRoutingTable {
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }

    fn route_file(&self, app: &str) -> crate::filesys::file::File {
        self.dir.file(&format!("{}.json", app))
    }
}

#[async_trait]
impl RoutingTable for FileRoutingTable {
    async fn set_route(
        &self,
        app: &str,
        domains: &[String],
        upstream: &InstanceId,
        port: u16,
    ) -> Result<(), OrchestratorError> {
        let entry = RouteEntry {
            domains: domains.to_vec(),
            upstream: Some(upstream.0.clone()),
            port,
            maintenance: false,
        };
        self.route_file(app)
            .write_json_atomic(&entry)
            .await
            .map_err(|e| OrchestratorError::RoutingUpdateFailure(e.to_string()))
    }

    async fn remove_route(&self, app: &str) -> Result<(), OrchestratorError> {
        self.route_file(app)
            .delete()
            .await
            .map_err(|e| OrchestratorError::RoutingUpdateFailure(e.to_string()))
    }

    async fn write_maintenance(
        &self,
        app: &str,
        domains: &[String],
    ) -> Result<(), OrchestratorError> {
        let entry = RouteEntry {
            domains: domains.to_vec(),
            upstream: None,
            port: 0,
            maintenance: true,
        };
        self.route_file(app)
            .write_json_atomic(&entry)
            .await
            .map_err(|e| OrchestratorError::RoutingUpdateFailure(e.to_string()))
    }

    async fn current_upstream(&self, app: &str) -> Result<Option<InstanceId>, OrchestratorError> {
        let file = self.route_file(app);
        if !file.exists().await {
            return Ok(None);
        }
        let entry: RouteEntry = file.read_json().await?;
        Ok(entry.upstream.map(InstanceId))
    }
}
