//! Deployment run model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::deploy::fsm::PipelinePhase;

/// What initiated a deployment run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Manual,
    Webhook,
    Rollback,
}

/// Outcome of a completed phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub phase: PipelinePhase,
    pub success: bool,
    #[serde(default)]
    pub detail: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// One pipeline execution for an app/environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRun {
    pub id: Uuid,
    pub app: String,
    pub environment: String,
    pub release_id: Uuid,
    pub commit_sha: String,
    pub trigger: Trigger,

    /// Current (or final) phase
    pub phase: PipelinePhase,

    /// Per-phase outcomes in execution order
    #[serde(default)]
    pub outcomes: Vec<PhaseOutcome>,

    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,

    /// Failure detail for terminal failed runs
    #[serde(default)]
    pub error: Option<String>,
}

impl DeploymentRun {
    pub fn new(
        app: impl Into<String>,
        environment: impl Into<String>,
        release_id: Uuid,
        commit_sha: impl Into<String>,
        trigger: Trigger,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            app: app.into(),
            environment: environment.into(),
            release_id,
            commit_sha: commit_sha.into(),
            trigger,
            phase: PipelinePhase::Queued,
            outcomes: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    pub fn record_outcome(&mut self, phase: PipelinePhase, success: bool, detail: Option<String>) {
        self.outcomes.push(PhaseOutcome {
            phase,
            success,
            detail,
            completed_at: Utc::now(),
        });
    }

    pub fn duration_secs(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_seconds())
    }
}

/// Bounded history of deployment runs for one app
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunHistory {
    pub runs: Vec<DeploymentRun>,
}

/// Retained run records per app
pub const MAX_RUN_HISTORY: usize = 20;

impl RunHistory {
    /// Insert newest first, trimming to the retention limit
    pub fn add(&mut self, run: DeploymentRun) {
        self.runs.insert(0, run);
        self.runs.truncate(MAX_RUN_HISTORY);
    }

    /// Replace the stored record for a run, or add it when unseen
    pub fn upsert(&mut self, run: DeploymentRun) {
        match self.runs.iter_mut().find(|r| r.id == run.id) {
            Some(existing) => *existing = run,
            None => self.add(run),
        }
    }

    pub fn recent(&self, limit: usize) -> &[DeploymentRun] {
        &self.runs[..limit.min(self.runs.len())]
    }
}
