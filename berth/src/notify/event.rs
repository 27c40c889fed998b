//! Lifecycle events emitted by the pipeline

use serde::{Deserialize, Serialize};

use crate::models::deployment::Trigger;
use crate::models::pipeline::NotificationConfig;

/// What happened to a deployment run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    Succeeded,
    Failed,
    RolledBack,
    AwaitingApproval,
}

impl EventKind {
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Started => "started",
            EventKind::Succeeded => "succeeded",
            EventKind::Failed => "failed",
            EventKind::RolledBack => "rolled back",
            EventKind::AwaitingApproval => "awaiting approval",
        }
    }
}

/// One lifecycle event, carrying the run's notification config snapshot
/// so dispatch needs no store access.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub app: String,
    pub environment: String,
    pub kind: EventKind,
    pub commit_sha: String,
    pub trigger: Trigger,
    pub duration_secs: Option<i64>,
    pub error: Option<String>,
    pub notifications: NotificationConfig,
}

impl LifecycleEvent {
    /// Whether the config subscribes to this event kind
    pub fn subscribed(&self) -> bool {
        if !self.notifications.enabled {
            return false;
        }
        match self.kind {
            EventKind::Started | EventKind::AwaitingApproval => self.notifications.on_start,
            EventKind::Succeeded => self.notifications.on_success,
            EventKind::Failed | EventKind::RolledBack => self.notifications.on_failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind, config: NotificationConfig) -> LifecycleEvent {
        LifecycleEvent {
            app: "web".to_string(),
            environment: "production".to_string(),
            kind,
            commit_sha: "abc1234".to_string(),
            trigger: Trigger::Webhook,
            duration_secs: None,
            error: None,
            notifications: config,
        }
    }

    #[test]
    fn test_subscription_gating() {
        let config = NotificationConfig {
            enabled: true,
            channels: Vec::new(),
            on_start: false,
            on_success: true,
            on_failure: true,
        };

        assert!(!event(EventKind::Started, config.clone()).subscribed());
        assert!(!event(EventKind::AwaitingApproval, config.clone()).subscribed());
        assert!(event(EventKind::Succeeded, config.clone()).subscribed());
        assert!(event(EventKind::RolledBack, config).subscribed());

        let disabled = NotificationConfig::default();
        assert!(!event(EventKind::Succeeded, disabled).subscribed());
    }
}
