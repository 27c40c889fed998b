//! Docker container runtime

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::OrchestratorError;
use crate::models::app::HealthCheckSpec;
use crate::providers::{instance_name, ContainerRuntime, InstanceId, InstanceSpec};

/// Container runtime backed by the docker CLI
pub struct DockerRuntime {
    /// Docker network instances are attached to
    network: String,
}

impl DockerRuntime {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
        }
    }
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new("berth")
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn start_instance(&self, spec: &InstanceSpec) -> Result<InstanceId, OrchestratorError> {
        let id = instance_name(&spec.app, &spec.environment, spec.slot);
        info!("Starting instance {} from {}", id, spec.artifact);

        // A stale container from an interrupted run may still hold the name
        let _ = Command::new("docker").args(["rm", "-f", &id.0]).status().await;

        let mut cmd = Command::new("docker");
        cmd.args([
            "run",
            "-d",
            "--name",
            &id.0,
            "--network",
            &self.network,
            "--restart",
            "unless-stopped",
            "--label",
            &format!("berth.release={}", spec.release_id),
        ]);
        for (key, value) in &spec.env_vars {
            cmd.args(["-e", &format!("{}={}", key, value)]);
        }
        cmd.arg(&spec.artifact);

        let status = cmd
            .status()
            .await
            .map_err(|e| OrchestratorError::ProviderError(format!("docker run: {}", e)))?;

        if !status.success() {
            return Err(OrchestratorError::ProviderError(format!(
                "docker run failed for {}",
                id
            )));
        }

        Ok(id)
    }

    async fn stop_instance(&self, id: &InstanceId) -> Result<(), OrchestratorError> {
        debug!("Stopping instance {}", id);

        let stop = Command::new("docker")
            .args(["stop", &id.0])
            .status()
            .await
            .map_err(|e| OrchestratorError::ProviderError(format!("docker stop: {}", e)))?;
        if !stop.success() {
            return Err(OrchestratorError::ProviderError(format!(
                "docker stop failed for {}",
                id
            )));
        }

        let _ = Command::new("docker").args(["rm", &id.0]).status().await;
        Ok(())
    }

    async fn health_probe(
        &self,
        id: &InstanceId,
        spec: &HealthCheckSpec,
        port: u16,
    ) -> Result<bool, OrchestratorError> {
        // Probe from inside the container so no host port mapping is needed
        let url = format!("http://localhost:{}{}", port, spec.path);
        let output = Command::new("docker")
            .args([
                "exec",
                &id.0,
                "wget",
                "-q",
                "-O-",
                "-T",
                &spec.timeout_secs.to_string(),
                &url,
            ])
            .output()
            .await
            .map_err(|e| OrchestratorError::ProviderError(format!("docker exec: {}", e)))?;

        Ok(output.status.success())
    }

    async fn stream_logs(&self, id: &InstanceId, tail: usize) -> Result<String, OrchestratorError> {
        let output = Command::new("docker")
            .args(["logs", "--tail", &tail.to_string(), &id.0])
            .output()
            .await
            .map_err(|e| OrchestratorError::ProviderError(format!("docker logs: {}", e)))?;

        if !output.status.success() {
            return Err(OrchestratorError::ProviderError(format!(
                "docker logs failed for {}",
                id
            )));
        }

        // docker logs splits app output across both streams
        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }
}
