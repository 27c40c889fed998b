//! Hook and test command runner
//!
//! Hooks run in declaration order with a per-hook timeout. A required hook
//! failure aborts the phase; optional failures are recorded and skipped.
//! on_failure hooks are best-effort and never abort.

use std::collections::HashMap;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use crate::errors::OrchestratorError;
use crate::models::pipeline::{HookPhase, PipelineConfig, TestConfig};

/// Result of one executed hook
#[derive(Debug, Clone)]
pub struct HookOutcome {
    pub name: String,
    pub success: bool,
    pub detail: Option<String>,
}

/// Run a shell command with a timeout, returning failure detail on error
async fn run_command(
    command: &str,
    timeout: Duration,
    env_vars: &HashMap<String, String>,
) -> Result<(), String> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .envs(env_vars)
        // The timeout drops the output future; the child must die with it
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, cmd.output()).await {
        Err(_) => Err(format!("timed out after {:?}", timeout)),
        Ok(Err(e)) => Err(format!("failed to spawn: {}", e)),
        Ok(Ok(output)) if output.status.success() => Ok(()),
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            tail.reverse();
            Err(format!("exit {:?}: {}", output.status.code(), tail.join("; ")))
        }
    }
}

/// Run the hooks of one phase in order.
///
/// Returns `HookFailure` as soon as a required hook fails; optional
/// failures land in the outcome list and execution continues.
pub async fn run_phase(
    config: &PipelineConfig,
    phase: HookPhase,
    env_vars: &HashMap<String, String>,
) -> Result<Vec<HookOutcome>, OrchestratorError> {
    let mut outcomes = Vec::new();

    for hook in config.hooks_for(phase) {
        let timeout = Duration::from_secs(hook.timeout_secs);
        info!("Running {} hook '{}'", phase, hook.name);

        match run_command(&hook.command, timeout, env_vars).await {
            Ok(()) => outcomes.push(HookOutcome {
                name: hook.name.clone(),
                success: true,
                detail: None,
            }),
            Err(detail) if hook.required => {
                return Err(OrchestratorError::HookFailure {
                    hook: hook.name.clone(),
                    required: true,
                    detail,
                });
            }
            Err(detail) => {
                warn!(
                    "Optional {} hook '{}' failed, continuing: {}",
                    phase, hook.name, detail
                );
                outcomes.push(HookOutcome {
                    name: hook.name.clone(),
                    success: false,
                    detail: Some(detail),
                });
            }
        }
    }

    Ok(outcomes)
}

/// Run on_failure hooks. Failures are logged and swallowed so the run can
/// still reach a terminal state.
pub async fn run_failure_hooks(config: &PipelineConfig, env_vars: &HashMap<String, String>) {
    for hook in config.hooks_for(HookPhase::OnFailure) {
        let timeout = Duration::from_secs(hook.timeout_secs);
        if let Err(detail) = run_command(&hook.command, timeout, env_vars).await {
            warn!("on_failure hook '{}' failed: {}", hook.name, detail);
        }
    }
}

/// Run the test gate. The gate is always required when enabled.
pub async fn run_tests(
    tests: &TestConfig,
    env_vars: &HashMap<String, String>,
) -> Result<(), OrchestratorError> {
    if !tests.enabled {
        return Ok(());
    }

    info!("Running test gate: {}", tests.command);
    run_command(&tests.command, Duration::from_secs(tests.timeout_secs), env_vars)
        .await
        .map_err(OrchestratorError::TestFailure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pipeline::HookCommand;

    fn config_with(hooks: Vec<HookCommand>) -> PipelineConfig {
        PipelineConfig {
            hooks,
            ..Default::default()
        }
    }

    fn hook(name: &str, phase: HookPhase, command: &str, required: bool) -> HookCommand {
        HookCommand {
            name: name.to_string(),
            phase,
            command: command.to_string(),
            timeout_secs: 10,
            required,
        }
    }

    #[tokio::test]
    async fn test_required_hook_failure_aborts() {
        let config = config_with(vec![
            hook("ok", HookPhase::PreDeploy, "true", false),
            hook("broken", HookPhase::PreDeploy, "false", true),
            hook("never-runs", HookPhase::PreDeploy, "true", false),
        ]);

        let err = run_phase(&config, HookPhase::PreDeploy, &HashMap::new())
            .await
            .unwrap_err();
        match err {
            OrchestratorError::HookFailure { hook, required, .. } => {
                assert_eq!(hook, "broken");
                assert!(required);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_optional_hook_failure_continues() {
        let config = config_with(vec![
            hook("flaky", HookPhase::PreBuild, "false", false),
            hook("after", HookPhase::PreBuild, "true", false),
        ]);

        let outcomes = run_phase(&config, HookPhase::PreBuild, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].success);
        assert!(outcomes[1].success);
    }

    #[tokio::test]
    async fn test_hook_timeout_fails_that_hook() {
        let mut slow = hook("slow", HookPhase::PreDeploy, "sleep 5", true);
        slow.timeout_secs = 1;
        let config = config_with(vec![slow]);

        let err = run_phase(&config, HookPhase::PreDeploy, &HashMap::new())
            .await
            .unwrap_err();
        match err {
            OrchestratorError::HookFailure { detail, .. } => {
                assert!(detail.contains("timed out"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timed_out_hook_child_is_killed() {
        let dir = crate::filesys::dir::Dir::create_temp_dir("berth-hooks")
            .await
            .unwrap();
        let marker = dir.path().join("survived");

        let mut hung = hook(
            "hung",
            HookPhase::PreDeploy,
            &format!("sleep 2 && touch {}", marker.display()),
            true,
        );
        hung.timeout_secs = 1;
        let config = config_with(vec![hung]);

        let err = run_phase(&config, HookPhase::PreDeploy, &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::HookFailure { .. }));

        // Past the point where a surviving child would have touched the marker
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!marker.exists());
        dir.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_detail_keeps_stderr_order() {
        let config = config_with(vec![hook(
            "noisy",
            HookPhase::PreDeploy,
            "echo first >&2; echo second >&2; exit 1",
            true,
        )]);

        let err = run_phase(&config, HookPhase::PreDeploy, &HashMap::new())
            .await
            .unwrap_err();
        match err {
            OrchestratorError::HookFailure { detail, .. } => {
                assert!(detail.contains("first; second"), "detail: {}", detail);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hook_sees_env_vars() {
        let config = config_with(vec![hook(
            "check-env",
            HookPhase::PreDeploy,
            "test \"$DEPLOY_ENV\" = production",
            true,
        )]);

        let mut env = HashMap::new();
        env.insert("DEPLOY_ENV".to_string(), "production".to_string());
        run_phase(&config, HookPhase::PreDeploy, &env).await.unwrap();
    }

    #[tokio::test]
    async fn test_test_gate() {
        let mut tests = TestConfig {
            enabled: true,
            command: "true".to_string(),
            timeout_secs: 10,
        };
        run_tests(&tests, &HashMap::new()).await.unwrap();

        tests.command = "false".to_string();
        let err = run_tests(&tests, &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::TestFailure(_)));

        tests.enabled = false;
        run_tests(&tests, &HashMap::new()).await.unwrap();
    }
}
