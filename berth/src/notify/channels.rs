//! Notification channel senders

use async_trait::async_trait;
use serde_json::json;

use crate::errors::OrchestratorError;
use crate::models::pipeline::ChannelConfig;
use crate::notify::event::{EventKind, LifecycleEvent};
use crate::utils::short_sha;

/// A single delivery endpoint for lifecycle events
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, event: &LifecycleEvent) -> Result<(), OrchestratorError>;
}

/// Build the production sender for a channel config
pub fn build_sender(config: &ChannelConfig, client: &reqwest::Client) -> Box<dyn ChannelSender> {
    match config {
        ChannelConfig::Slack { webhook_url } => Box::new(SlackSender {
            webhook_url: webhook_url.clone(),
            client: client.clone(),
        }),
        ChannelConfig::Discord { webhook_url } => Box::new(DiscordSender {
            webhook_url: webhook_url.clone(),
            client: client.clone(),
        }),
        ChannelConfig::Email { endpoint_url, to } => Box::new(EmailSender {
            endpoint_url: endpoint_url.clone(),
            to: to.clone(),
            client: client.clone(),
        }),
    }
}

fn emoji_for(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Started => ":rocket:",
        EventKind::Succeeded => ":white_check_mark:",
        EventKind::Failed => ":x:",
        EventKind::RolledBack => ":rewind:",
        EventKind::AwaitingApproval => ":hourglass:",
    }
}

fn color_for(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Started => "#3498db",
        EventKind::Succeeded => "#2ecc71",
        EventKind::Failed => "#e74c3c",
        EventKind::RolledBack => "#9b59b6",
        EventKind::AwaitingApproval => "#f39c12",
    }
}

fn summary_line(event: &LifecycleEvent) -> String {
    let mut line = format!(
        "Deployment {} for {}/{} at {}",
        event.kind.label(),
        event.app,
        event.environment,
        short_sha(&event.commit_sha),
    );
    if let Some(secs) = event.duration_secs {
        line.push_str(&format!(" ({}s)", secs));
    }
    if let Some(err) = &event.error {
        line.push_str(&format!(": {}", err));
    }
    line
}

/// Slack incoming-webhook sender
pub struct SlackSender {
    webhook_url: String,
    client: reqwest::Client,
}

#[async_trait]
impl ChannelSender for SlackSender {
    fn name(&self) -> &str {
        "slack"
    }

    async fn send(&self, event: &LifecycleEvent) -> Result<(), OrchestratorError> {
        let payload = json!({
            "attachments": [{
                "color": color_for(event.kind),
                "blocks": [{
                    "type": "section",
                    "text": {
                        "type": "mrkdwn",
                        "text": format!("{} {}", emoji_for(event.kind), summary_line(event)),
                    }
                }]
            }]
        });

        let response = self.client.post(&self.webhook_url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(OrchestratorError::NotificationDeliveryFailure(format!(
                "slack returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Discord webhook sender
pub struct DiscordSender {
    webhook_url: String,
    client: reqwest::Client,
}

#[async_trait]
impl ChannelSender for DiscordSender {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send(&self, event: &LifecycleEvent) -> Result<(), OrchestratorError> {
        // Discord wants decimal colors
        let color = i64::from_str_radix(color_for(event.kind).trim_start_matches('#'), 16)
            .unwrap_or(0);
        let payload = json!({
            "embeds": [{
                "title": format!("Deployment {}", event.kind.label()),
                "description": summary_line(event),
                "color": color,
            }]
        });

        let response = self.client.post(&self.webhook_url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(OrchestratorError::NotificationDeliveryFailure(format!(
                "discord returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Email sender posting to an external mail relay endpoint.
/// SMTP itself stays outside the orchestrator.
pub struct EmailSender {
    endpoint_url: String,
    to: String,
    client: reqwest::Client,
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, event: &LifecycleEvent) -> Result<(), OrchestratorError> {
        let payload = json!({
            "to": self.to,
            "subject": format!(
                "[berth] {}/{} deployment {}",
                event.app, event.environment, event.kind.label()
            ),
            "body": summary_line(event),
        });

        let response = self.client.post(&self.endpoint_url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(OrchestratorError::NotificationDeliveryFailure(format!(
                "mail relay returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
