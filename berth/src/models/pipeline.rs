//! Pipeline configuration

use serde::{Deserialize, Serialize};

/// Per-app pipeline configuration, snapshotted at run start
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Hook commands, grouped by phase at execution time
    #[serde(default)]
    pub hooks: Vec<HookCommand>,

    /// Test gate configuration
    #[serde(default)]
    pub tests: TestConfig,

    /// Blue-green release configuration
    #[serde(default)]
    pub blue_green: BlueGreenConfig,

    /// Rollback configuration
    #[serde(default)]
    pub rollback: RollbackConfig,

    /// Manual approval gate
    #[serde(default)]
    pub approval: ApprovalConfig,

    /// Webhook admission rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Notification channels and subscriptions
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl PipelineConfig {
    /// Hooks configured for a phase, in declaration order
    pub fn hooks_for(&self, phase: HookPhase) -> Vec<&HookCommand> {
        self.hooks.iter().filter(|h| h.phase == phase).collect()
    }
}

/// Hook execution phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    PreBuild,
    PreDeploy,
    PostDeploy,
    OnFailure,
}

impl std::fmt::Display for HookPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HookPhase::PreBuild => "pre_build",
            HookPhase::PreDeploy => "pre_deploy",
            HookPhase::PostDeploy => "post_deploy",
            HookPhase::OnFailure => "on_failure",
        };
        f.write_str(s)
    }
}

/// A configured hook command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookCommand {
    /// Hook name, unique within its phase
    pub name: String,

    /// Phase the hook runs in
    pub phase: HookPhase,

    /// Shell command
    pub command: String,

    /// Per-hook timeout in seconds
    #[serde(default = "default_hook_timeout")]
    pub timeout_secs: u64,

    /// Required hooks abort the pipeline on failure
    #[serde(default)]
    pub required: bool,
}

fn default_hook_timeout() -> u64 {
    60
}

/// Test gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_test_command")]
    pub command: String,

    #[serde(default = "default_test_timeout")]
    pub timeout_secs: u64,
}

fn default_test_command() -> String {
    "npm test".to_string()
}

fn default_test_timeout() -> u64 {
    300
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: default_test_command(),
            timeout_secs: default_test_timeout(),
        }
    }
}

/// Blue-green release configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueGreenConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds the retired instance is kept running after the switch
    #[serde(default)]
    pub keep_old_secs: u64,
}

fn default_true() -> bool {
    true
}

impl Default for BlueGreenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keep_old_secs: 0,
        }
    }
}

/// Rollback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prior releases retained beyond the active one
    #[serde(default = "default_keep_versions")]
    pub keep_versions: usize,

    /// Roll back automatically when a deployment fails after switch-eligible phases
    #[serde(default)]
    pub auto_rollback_on_failure: bool,
}

fn default_keep_versions() -> usize {
    3
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keep_versions: default_keep_versions(),
            auto_rollback_on_failure: false,
        }
    }
}

/// Manual approval gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Minutes before a pending approval expires
    #[serde(default = "default_approval_timeout")]
    pub timeout_minutes: u64,
}

fn default_approval_timeout() -> u64 {
    60
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_minutes: default_approval_timeout(),
        }
    }
}

/// Webhook admission rate limiting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum admitted deployments per window
    #[serde(default = "default_max_deploys")]
    pub max_deploys: usize,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_deploys() -> usize {
    5
}

fn default_window_secs() -> u64 {
    3600
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_deploys: default_max_deploys(),
            window_secs: default_window_secs(),
        }
    }
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub channels: Vec<ChannelConfig>,

    #[serde(default = "default_true")]
    pub on_start: bool,

    #[serde(default = "default_true")]
    pub on_success: bool,

    #[serde(default = "default_true")]
    pub on_failure: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channels: Vec::new(),
            on_start: true,
            on_success: true,
            on_failure: true,
        }
    }
}

/// Notification channel endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelConfig {
    Slack { webhook_url: String },
    Discord { webhook_url: String },
    Email { endpoint_url: String, to: String },
}

impl ChannelConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelConfig::Slack { .. } => "slack",
            ChannelConfig::Discord { .. } => "discord",
            ChannelConfig::Email { .. } => "email",
        }
    }

    /// The HTTP endpoint this channel posts to
    pub fn endpoint(&self) -> &str {
        match self {
            ChannelConfig::Slack { webhook_url } => webhook_url,
            ChannelConfig::Discord { webhook_url } => webhook_url,
            ChannelConfig::Email { endpoint_url, .. } => endpoint_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hooks_for_preserves_order() {
        let config = PipelineConfig {
            hooks: vec![
                HookCommand {
                    name: "migrate".to_string(),
                    phase: HookPhase::PreDeploy,
                    command: "true".to_string(),
                    timeout_secs: 60,
                    required: true,
                },
                HookCommand {
                    name: "lint".to_string(),
                    phase: HookPhase::PreBuild,
                    command: "true".to_string(),
                    timeout_secs: 60,
                    required: false,
                },
                HookCommand {
                    name: "warm-cache".to_string(),
                    phase: HookPhase::PreDeploy,
                    command: "true".to_string(),
                    timeout_secs: 60,
                    required: false,
                },
            ],
            ..Default::default()
        };

        let pre_deploy = config.hooks_for(HookPhase::PreDeploy);
        assert_eq!(pre_deploy.len(), 2);
        assert_eq!(pre_deploy[0].name, "migrate");
        assert_eq!(pre_deploy[1].name, "warm-cache");
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert!(config.blue_green.enabled);
        assert_eq!(config.rollback.keep_versions, 3);
        assert_eq!(config.rate_limit.max_deploys, 5);
        assert_eq!(config.approval.timeout_minutes, 60);
        assert!(!config.notifications.enabled);
    }
}
