//! Webhook delivery log records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Admission outcome for an inbound webhook event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// A deployment run was started
    Admitted,
    /// Rejected by the sliding-window rate limiter
    RateLimited,
    /// Rejected because a run was already active
    Busy,
    /// Parked behind the manual approval gate
    AwaitingApproval,
    /// Branch matched no auto-deploy environment
    Unmatched,
    /// Non-push event, discarded
    Ignored,
    /// Signature verification failed
    BadSignature,
}

/// One line in the append-only per-app delivery log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub received_at: DateTime<Utc>,
    pub event: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub pusher: Option<String>,
    pub outcome: DeliveryOutcome,
}

impl DeliveryRecord {
    pub fn new(event: impl Into<String>, outcome: DeliveryOutcome) -> Self {
        Self {
            received_at: Utc::now(),
            event: event.into(),
            branch: None,
            commit_sha: None,
            pusher: None,
            outcome,
        }
    }

    pub fn with_push(
        mut self,
        branch: impl Into<String>,
        commit_sha: impl Into<String>,
        pusher: Option<String>,
    ) -> Self {
        self.branch = Some(branch.into());
        self.commit_sha = Some(commit_sha.into());
        self.pusher = pusher;
        self
    }
}
