//! Approval request model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Approval decision state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    TimedOut,
}

/// A pending or decided manual approval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub run_id: Uuid,
    pub app: String,
    pub environment: String,
    pub commit_sha: String,
    pub status: ApprovalStatus,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub decided_by: Option<String>,
}

impl ApprovalRequest {
    pub fn new(
        run_id: Uuid,
        app: impl Into<String>,
        environment: impl Into<String>,
        commit_sha: impl Into<String>,
        timeout_minutes: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            run_id,
            app: app.into(),
            environment: environment.into(),
            commit_sha: commit_sha.into(),
            status: ApprovalStatus::Pending,
            requested_at: now,
            expires_at: now + chrono::Duration::minutes(timeout_minutes as i64),
            decided_at: None,
            decided_by: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.status == ApprovalStatus::Pending && Utc::now() > self.expires_at
    }
}

/// Persisted approvals for one app
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalSet {
    pub approvals: Vec<ApprovalRequest>,
}

impl ApprovalSet {
    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut ApprovalRequest> {
        self.approvals.iter_mut().find(|a| a.id == *id)
    }

    pub fn pending(&self) -> impl Iterator<Item = &ApprovalRequest> {
        self.approvals
            .iter()
            .filter(|a| a.status == ApprovalStatus::Pending && !a.is_expired())
    }
}
