//! Release model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Release status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStatus {
    Pending,
    Healthy,
    Failed,
    RolledBack,
}

/// An immutable deployable version of an app
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub id: Uuid,

    /// Environment this release belongs to
    pub environment: String,

    /// Full commit sha
    pub commit_sha: String,

    /// Built artifact reference (image tag)
    pub artifact: String,

    pub created_at: DateTime<Utc>,

    pub status: ReleaseStatus,

    /// Previous release in the chain, by id. Kept as an id so pruned
    /// releases never leave dangling references.
    pub predecessor: Option<Uuid>,
}

impl Release {
    pub fn new(
        environment: impl Into<String>,
        commit_sha: impl Into<String>,
        artifact: impl Into<String>,
        predecessor: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            environment: environment.into(),
            commit_sha: commit_sha.into(),
            artifact: artifact.into(),
            created_at: Utc::now(),
            status: ReleaseStatus::Pending,
            predecessor,
        }
    }
}

/// Persisted set of releases for one app, keyed by id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseSet {
    pub releases: Vec<Release>,
}

impl ReleaseSet {
    pub fn get(&self, id: &Uuid) -> Option<&Release> {
        self.releases.iter().find(|r| r.id == *id)
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut Release> {
        self.releases.iter_mut().find(|r| r.id == *id)
    }

    pub fn insert(&mut self, release: Release) {
        self.releases.push(release);
    }

    pub fn remove(&mut self, id: &Uuid) {
        self.releases.retain(|r| r.id != *id);
    }

    /// Walk the predecessor chain starting from `head`, newest first.
    /// Stops at the first id that no longer resolves.
    pub fn chain_from(&self, head: &Uuid) -> Vec<&Release> {
        let mut out = Vec::new();
        let mut cursor = Some(*head);
        while let Some(id) = cursor {
            match self.get(&id) {
                Some(release) => {
                    cursor = release.predecessor;
                    out.push(release);
                }
                None => break,
            }
        }
        out
    }
}
