//! Approval reaper worker
//!
//! Periodically expires stale pending approvals so requests left over from
//! interrupted runs do not linger in the store.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::gates::approval::ApprovalGate;

/// Reaper worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Sweep interval
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Run the reaper worker
pub async fn run<S, F>(
    options: &Options,
    gate: Arc<ApprovalGate>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Approval reaper starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Approval reaper shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {
                // Continue with sweep
            }
        }

        match gate.expire_stale().await {
            Ok(0) => {}
            Ok(n) => debug!("Expired {} stale approval(s)", n),
            Err(e) => error!("Approval sweep failed: {}", e),
        }
    }
}
