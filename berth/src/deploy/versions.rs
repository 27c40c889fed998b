//! Version listing, rollback resolution and retention

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::errors::OrchestratorError;
use crate::models::release::{Release, ReleaseStatus};
use crate::storage::store::AppStore;

/// Version bookkeeping over the release arena
pub struct VersionManager {
    store: Arc<AppStore>,
}

impl VersionManager {
    pub fn new(store: Arc<AppStore>) -> Self {
        Self { store }
    }

    /// All releases for an environment, newest first
    pub async fn list_versions(
        &self,
        app: &str,
        environment: &str,
    ) -> Result<Vec<Release>, OrchestratorError> {
        let set = self.store.load_releases(app).await?;
        let mut releases: Vec<Release> = set
            .releases
            .into_iter()
            .filter(|r| r.environment == environment)
            .collect();
        releases.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(releases)
    }

    /// Resolve a rollback target within the retained chain of the active
    /// release. The target may be a release id or a commit sha prefix.
    /// Leaves no trace on failure.
    pub async fn resolve_rollback_target(
        &self,
        app: &str,
        environment: &str,
        target: &str,
    ) -> Result<Release, OrchestratorError> {
        let definition = self.store.load_app(app).await?;
        let head = definition.active.get(environment).copied().ok_or_else(|| {
            OrchestratorError::RollbackNotFound(format!(
                "no active release for {}/{}",
                app, environment
            ))
        })?;

        let set = self.store.load_releases(app).await?;
        let chain = set.chain_from(&head);

        // Skip the head: rolling back to the current release is a no-op
        let found = chain.iter().skip(1).find(|r| {
            r.status == ReleaseStatus::Healthy
                && (r.id.to_string() == target || r.commit_sha.starts_with(target))
        });

        found.map(|r| (*r).clone()).ok_or_else(|| {
            OrchestratorError::RollbackNotFound(format!(
                "'{}' is not a retained healthy release of {}/{}",
                target, app, environment
            ))
        })
    }

    /// Prune releases beyond the retention window.
    ///
    /// Keeps the active release plus `keep_versions` predecessors along the
    /// chain. `deferred` names a release that must survive this pass even if
    /// out of window, because its instance is still running as the kept-old
    /// half of a blue-green switch.
    pub async fn prune(
        &self,
        app: &str,
        environment: &str,
        keep_versions: usize,
        deferred: Option<Uuid>,
    ) -> Result<usize, OrchestratorError> {
        let definition = self.store.load_app(app).await?;
        let head = match definition.active.get(environment) {
            Some(id) => *id,
            None => return Ok(0),
        };

        let removed = self
            .store
            .update_releases(app, |set| {
                let keep: Vec<Uuid> = set
                    .chain_from(&head)
                    .iter()
                    .take(keep_versions + 1)
                    .map(|r| r.id)
                    .collect();

                let doomed: Vec<Uuid> = set
                    .releases
                    .iter()
                    .filter(|r| {
                        r.environment == environment
                            && !keep.contains(&r.id)
                            && deferred != Some(r.id)
                    })
                    .map(|r| r.id)
                    .collect();

                for id in &doomed {
                    set.remove(id);
                }
                doomed.len()
            })
            .await?;

        if removed > 0 {
            debug!("Pruned {} release(s) for {}/{}", removed, app, environment);
        }
        Ok(removed)
    }
}
