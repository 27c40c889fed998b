//! Git repository and image build provider

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::providers::Repository;
use crate::utils::short_sha;

/// Repository provider shelling out to git and docker build
pub struct GitRepository {
    builds_dir: Dir,
}

impl GitRepository {
    pub fn new(builds_dir: Dir) -> Self {
        Self { builds_dir }
    }
}

#[async_trait]
impl Repository for GitRepository {
    async fn resolve_commit(
        &self,
        repo_url: &str,
        reference: &str,
    ) -> Result<String, OrchestratorError> {
        // A full sha resolves to itself
        if reference.len() == 40 && reference.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(reference.to_string());
        }

        let output = Command::new("git")
            .args(["ls-remote", repo_url, reference])
            .output()
            .await
            .map_err(|e| OrchestratorError::ProviderError(format!("git ls-remote: {}", e)))?;

        if !output.status.success() {
            return Err(OrchestratorError::ProviderError(format!(
                "git ls-remote failed for {}",
                repo_url
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .split_whitespace()
            .next()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                OrchestratorError::ProviderError(format!(
                    "reference '{}' not found in {}",
                    reference, repo_url
                ))
            })
    }

    async fn build_artifact(
        &self,
        app: &str,
        repo_url: &str,
        commit_sha: &str,
    ) -> Result<String, OrchestratorError> {
        let tag = format!("{}:{}", app, short_sha(commit_sha));
        let checkout = self.builds_dir.subdir(&format!("{}-{}", app, short_sha(commit_sha)));

        info!("Building {} from {}@{}", tag, repo_url, short_sha(commit_sha));

        // Fresh shallow checkout at the commit
        checkout.delete().await?;
        checkout.create().await?;
        let checkout_path = checkout.path().to_string_lossy().to_string();

        let clone = Command::new("git")
            .args(["clone", repo_url, &checkout_path])
            .status()
            .await
            .map_err(|e| OrchestratorError::ProviderError(format!("git clone: {}", e)))?;
        if !clone.success() {
            return Err(OrchestratorError::ProviderError(format!(
                "git clone failed for {}",
                repo_url
            )));
        }

        let reset = Command::new("git")
            .args(["-C", &checkout_path, "checkout", "--detach", commit_sha])
            .status()
            .await
            .map_err(|e| OrchestratorError::ProviderError(format!("git checkout: {}", e)))?;
        if !reset.success() {
            return Err(OrchestratorError::ProviderError(format!(
                "commit {} not present in {}",
                commit_sha, repo_url
            )));
        }

        debug!("Running docker build for {}", tag);
        let build = Command::new("docker")
            .args(["build", "-t", &tag, &checkout_path])
            .status()
            .await
            .map_err(|e| OrchestratorError::ProviderError(format!("docker build: {}", e)))?;
        if !build.success() {
            return Err(OrchestratorError::ProviderError(format!(
                "docker build failed for {}",
                tag
            )));
        }

        // Build context is no longer needed once the image exists
        checkout.delete().await?;

        Ok(tag)
    }
}
