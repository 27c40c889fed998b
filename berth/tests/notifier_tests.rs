//! Notifier worker tests with counting channel fakes

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use berth::errors::OrchestratorError;
use berth::models::deployment::Trigger;
use berth::models::pipeline::{ChannelConfig, NotificationConfig};
use berth::notify::channels::ChannelSender;
use berth::notify::event::{EventKind, LifecycleEvent};
use berth::utils::CooldownOptions;
use berth::workers::notifier;

struct CountingSender {
    attempts: Arc<AtomicU32>,
    fail: bool,
}

#[async_trait]
impl ChannelSender for CountingSender {
    fn name(&self) -> &str {
        "counting"
    }

    async fn send(&self, _event: &LifecycleEvent) -> Result<(), OrchestratorError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(OrchestratorError::NotificationDeliveryFailure(
                "endpoint down".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

fn options() -> notifier::Options {
    notifier::Options {
        max_attempts: 3,
        cooldown: CooldownOptions {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        },
    }
}

fn event(kind: EventKind, config: NotificationConfig) -> LifecycleEvent {
    LifecycleEvent {
        app: "web".to_string(),
        environment: "production".to_string(),
        kind,
        commit_sha: "0123456789abcdef0123456789abcdef01234567".to_string(),
        trigger: Trigger::Webhook,
        duration_secs: Some(7),
        error: None,
        notifications: config,
    }
}

fn subscribed_config() -> NotificationConfig {
    NotificationConfig {
        enabled: true,
        channels: vec![ChannelConfig::Slack {
            webhook_url: "https://hooks.example.com/T000".to_string(),
        }],
        on_start: true,
        on_success: true,
        on_failure: true,
    }
}

async fn run_worker(
    events: Vec<LifecycleEvent>,
    attempts: Arc<AtomicU32>,
    fail: bool,
) {
    let (tx, rx) = mpsc::channel(16);
    for event in events {
        tx.send(event).await.unwrap();
    }
    // Closing the queue lets the worker drain and stop
    drop(tx);

    notifier::run(
        &options(),
        rx,
        move |_channel| {
            Box::new(CountingSender {
                attempts: attempts.clone(),
                fail,
            }) as Box<dyn ChannelSender>
        },
        Box::pin(std::future::pending()),
    )
    .await;
}

#[tokio::test]
async fn test_successful_delivery_sends_once() {
    let attempts = Arc::new(AtomicU32::new(0));
    run_worker(
        vec![event(EventKind::Succeeded, subscribed_config())],
        attempts.clone(),
        false,
    )
    .await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failing_channel_retries_then_gives_up() {
    let attempts = Arc::new(AtomicU32::new(0));
    run_worker(
        vec![event(EventKind::Failed, subscribed_config())],
        attempts.clone(),
        true,
    )
    .await;
    // Bounded retries, then the event is dropped
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unsubscribed_event_skipped() {
    let mut config = subscribed_config();
    config.on_start = false;

    let attempts = Arc::new(AtomicU32::new(0));
    run_worker(
        vec![event(EventKind::Started, config)],
        attempts.clone(),
        false,
    )
    .await;
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_disabled_config_never_delivers() {
    let attempts = Arc::new(AtomicU32::new(0));
    run_worker(
        vec![event(EventKind::Succeeded, NotificationConfig::default())],
        attempts.clone(),
        false,
    )
    .await;
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
}
