//! Collaborator interfaces
//!
//! The orchestrator drives containers, the reverse-proxy routing table and
//! the source repository through these traits. Production implementations
//! shell out to the host tooling; tests substitute in-memory fakes.

pub mod docker;
pub mod git;
pub mod routing;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::OrchestratorError;
use crate::models::app::HealthCheckSpec;

/// Blue-green slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Blue,
    Green,
}

impl Slot {
    pub fn other(&self) -> Slot {
        match self {
            Slot::Blue => Slot::Green,
            Slot::Green => Slot::Blue,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Blue => "blue",
            Slot::Green => "green",
        }
    }
}

/// Opaque handle to a running instance (the container name)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    /// Recover the slot from an instance name
    pub fn slot(&self) -> Option<Slot> {
        if self.0.ends_with("-blue") {
            Some(Slot::Blue)
        } else if self.0.ends_with("-green") {
            Some(Slot::Green)
        } else {
            None
        }
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compose the deterministic instance name for a slot
pub fn instance_name(app: &str, environment: &str, slot: Slot) -> InstanceId {
    InstanceId(format!("{}-{}-{}", app, environment, slot.as_str()))
}

/// Everything needed to launch one instance
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub app: String,
    pub environment: String,
    pub release_id: Uuid,
    pub artifact: String,
    pub port: u16,
    pub slot: Slot,
    pub env_vars: HashMap<String, String>,
}

/// Container runtime operations
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Launch an instance; must not disturb any already-running instance
    async fn start_instance(&self, spec: &InstanceSpec) -> Result<InstanceId, OrchestratorError>;

    /// Stop and remove an instance
    async fn stop_instance(&self, id: &InstanceId) -> Result<(), OrchestratorError>;

    /// Single health probe against the instance
    async fn health_probe(
        &self,
        id: &InstanceId,
        spec: &HealthCheckSpec,
        port: u16,
    ) -> Result<bool, OrchestratorError>;

    /// The last `tail` lines of the instance's log output
    async fn stream_logs(&self, id: &InstanceId, tail: usize) -> Result<String, OrchestratorError>;
}

/// Reverse-proxy routing table operations
#[async_trait]
pub trait RoutingTable: Send + Sync {
    /// Atomically point the app's domains at an upstream instance
    async fn set_route(
        &self,
        app: &str,
        domains: &[String],
        upstream: &InstanceId,
        port: u16,
    ) -> Result<(), OrchestratorError>;

    /// Remove the app's route entirely
    async fn remove_route(&self, app: &str) -> Result<(), OrchestratorError>;

    /// Serve a maintenance page for the app's domains
    async fn write_maintenance(
        &self,
        app: &str,
        domains: &[String],
    ) -> Result<(), OrchestratorError>;

    /// The upstream currently receiving traffic, if routed
    async fn current_upstream(&self, app: &str) -> Result<Option<InstanceId>, OrchestratorError>;
}

/// Source repository operations
#[async_trait]
pub trait Repository: Send + Sync {
    /// Resolve a branch name or sha to a full commit sha
    async fn resolve_commit(
        &self,
        repo_url: &str,
        reference: &str,
    ) -> Result<String, OrchestratorError>;

    /// Build the artifact for a commit, returning its reference (image tag)
    async fn build_artifact(
        &self,
        app: &str,
        repo_url: &str,
        commit_sha: &str,
    ) -> Result<String, OrchestratorError>;
}
