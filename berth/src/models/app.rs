//! Application model

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::pipeline::PipelineConfig;

/// Managed application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    /// Unique app name, also the storage directory name
    pub name: String,

    /// Container port the app listens on
    pub port: u16,

    /// Domains routed to this app
    pub domains: Vec<String>,

    /// Optional backing database service
    #[serde(default)]
    pub database: Option<DatabaseKind>,

    /// Optional cache service
    #[serde(default)]
    pub cache: Option<CacheKind>,

    /// Git repository URL for pipeline builds
    pub repo_url: String,

    /// Health check specification
    #[serde(default)]
    pub health_check: HealthCheckSpec,

    /// Lifecycle status
    #[serde(default)]
    pub status: AppStatus,

    /// Webhook ingestion token (path segment)
    pub webhook_token: String,

    /// Shared secret for webhook signature verification
    pub webhook_secret: String,

    /// Deployment environments
    #[serde(default)]
    pub environments: Vec<Environment>,

    /// Active release per environment
    #[serde(default)]
    pub active: HashMap<String, Uuid>,

    /// Pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl App {
    /// Create a new app with generated webhook credentials
    pub fn new(name: impl Into<String>, port: u16, repo_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port,
            domains: Vec::new(),
            database: None,
            cache: None,
            repo_url: repo_url.into(),
            health_check: HealthCheckSpec::default(),
            status: AppStatus::Stopped,
            webhook_token: Uuid::new_v4().simple().to_string(),
            webhook_secret: Uuid::new_v4().simple().to_string(),
            environments: vec![Environment::default()],
            active: HashMap::new(),
            pipeline: PipelineConfig::default(),
        }
    }

    /// Resolve the environment mapped to a branch, if it auto-deploys
    pub fn environment_for_branch(&self, branch: &str) -> Option<&Environment> {
        self.environments
            .iter()
            .find(|env| env.branch == branch && env.auto_deploy)
    }

    /// Look up an environment by name
    pub fn environment(&self, name: &str) -> Option<&Environment> {
        self.environments.iter().find(|env| env.name == name)
    }
}

/// Supported database services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Postgresql,
    Mysql,
    Mongodb,
}

/// Supported cache services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Redis,
}

/// App lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Running,
    #[default]
    Stopped,
}

/// Health check specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    /// HTTP path probed inside the container
    #[serde(default = "default_health_path")]
    pub path: String,

    /// Seconds between probes
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,

    /// Per-probe timeout in seconds
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,

    /// Probes before the gate gives up
    #[serde(default = "default_health_attempts")]
    pub max_attempts: u32,
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_health_interval() -> u64 {
    2
}

fn default_health_timeout() -> u64 {
    5
}

fn default_health_attempts() -> u32 {
    10
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            interval_secs: default_health_interval(),
            timeout_secs: default_health_timeout(),
            max_attempts: default_health_attempts(),
        }
    }
}

/// Deployment environment with branch mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    /// Environment name
    pub name: String,

    /// Branch that deploys here
    pub branch: String,

    /// Whether webhook pushes deploy automatically
    #[serde(default = "default_true")]
    pub auto_deploy: bool,

    /// Environment variables injected into instances
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            name: "production".to_string(),
            branch: "main".to_string(),
            auto_deploy: true,
            env_vars: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_for_branch() {
        let mut app = App::new("web", 3000, "https://example.com/web.git");
        app.environments.push(Environment {
            name: "staging".to_string(),
            branch: "develop".to_string(),
            auto_deploy: false,
            env_vars: HashMap::new(),
        });

        assert_eq!(
            app.environment_for_branch("main").map(|e| e.name.as_str()),
            Some("production")
        );
        // auto_deploy disabled, so the branch does not resolve
        assert!(app.environment_for_branch("develop").is_none());
        assert!(app.environment_for_branch("feature/x").is_none());
    }
}
