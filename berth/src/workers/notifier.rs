//! Notification dispatcher worker
//!
//! Drains the lifecycle event queue and fans each event out to its
//! subscribed channels. Delivery failures are retried a bounded number of
//! times and then logged; they never influence a run's outcome.

use std::future::Future;
use std::pin::Pin;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::models::pipeline::ChannelConfig;
use crate::notify::channels::ChannelSender;
use crate::notify::event::LifecycleEvent;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Notifier worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Delivery attempts per channel per event
    pub max_attempts: u32,

    /// Backoff between attempts
    pub cooldown: CooldownOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cooldown: CooldownOptions::default(),
        }
    }
}

/// Run the notifier worker
pub async fn run<F>(
    options: &Options,
    mut events: mpsc::Receiver<LifecycleEvent>,
    sender_factory: F,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    F: Fn(&ChannelConfig) -> Box<dyn ChannelSender>,
{
    info!("Notifier worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Notifier worker shutting down...");
                return;
            }
            event = events.recv() => {
                match event {
                    Some(event) => dispatch(options, &event, &sender_factory).await,
                    None => {
                        info!("Event queue closed, notifier worker stopping...");
                        return;
                    }
                }
            }
        }
    }
}

async fn dispatch<F>(options: &Options, event: &LifecycleEvent, sender_factory: &F)
where
    F: Fn(&ChannelConfig) -> Box<dyn ChannelSender>,
{
    if !event.subscribed() {
        debug!(
            "Skipping {:?} event for {}/{}: not subscribed",
            event.kind, event.app, event.environment
        );
        return;
    }

    // Channels are independent, deliver to all of them concurrently
    let deliveries = event.notifications.channels.iter().map(|channel| {
        let sender = sender_factory(channel);
        async move { deliver(options, sender.as_ref(), event).await }
    });
    join_all(deliveries).await;
}

async fn deliver(options: &Options, sender: &dyn ChannelSender, event: &LifecycleEvent) {
    for attempt in 0..options.max_attempts {
        match sender.send(event).await {
            Ok(()) => {
                debug!(
                    "Delivered {:?} event for {}/{} via {}",
                    event.kind, event.app, event.environment, sender.name()
                );
                return;
            }
            Err(e) if attempt + 1 < options.max_attempts => {
                let wait = calc_exp_backoff(&options.cooldown, attempt);
                debug!(
                    "Delivery via {} failed (attempt {}): {}, retrying in {:?}",
                    sender.name(),
                    attempt + 1,
                    e,
                    wait
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => {
                error!(
                    "Giving up on {} delivery for {}/{} after {} attempts: {}",
                    sender.name(),
                    event.app,
                    event.environment,
                    options.max_attempts,
                    e
                );
            }
        }
    }
}
