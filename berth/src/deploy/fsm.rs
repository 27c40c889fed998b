//! Finite State Machine for deployment pipelines

use serde::{Deserialize, Serialize};

/// Pipeline phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    /// Run created, nothing executed yet
    Queued,

    /// Running pre_build hooks
    PreBuild,

    /// Building the artifact
    Building,

    /// Running the test gate
    TestGate,

    /// Running pre_deploy hooks
    PreDeploy,

    /// Suspended awaiting a manual decision
    ApprovalWait,

    /// Launching the new instance beside the serving one
    Starting,

    /// Health-gating the new instance
    HealthChecking,

    /// Atomically moving traffic to the new instance
    Switching,

    /// Running post_deploy hooks
    PostDeploy,

    /// Terminal success
    Completed,

    /// Running on_failure hooks before settling
    OnFailureHooks,

    /// Terminal failure
    Failed,

    /// Re-promoting the prior healthy release
    RollingBack,

    /// Terminal, prior release restored
    RolledBack,
}

impl PipelinePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelinePhase::Completed | PipelinePhase::Failed | PipelinePhase::RolledBack
        )
    }
}

/// Pipeline event
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Start a full pipeline from the beginning
    Begin,

    /// Start a rollback run directly at instance launch,
    /// the artifact already exists
    Promote,

    /// pre_build hooks passed
    PreBuildDone,

    /// Artifact built
    BuildDone,

    /// Test gate passed
    TestsPassed,

    /// pre_deploy hooks passed; approval decides the next phase
    PreDeployDone { approval_required: bool },

    /// Manual approval granted
    Approved,

    /// New instance launched
    InstanceUp,

    /// Health gate passed
    HealthPassed,

    /// Traffic switched to the new instance
    Switched,

    /// post_deploy hooks finished
    PostDeployDone,

    /// Any phase failed
    Fault(String),

    /// on_failure hooks finished; optionally hand off to auto-rollback
    FailureHooksDone { rolling_back: bool },

    /// Auto-rollback restored the prior release
    RollbackComplete,
}

/// Deployment pipeline FSM
#[derive(Debug, Clone)]
pub struct PipelineFsm {
    phase: PipelinePhase,
    error: Option<String>,
}

impl PipelineFsm {
    /// Create a new FSM in the queued phase
    pub fn new() -> Self {
        Self {
            phase: PipelinePhase::Queued,
            error: None,
        }
    }

    /// Get current phase
    pub fn phase(&self) -> PipelinePhase {
        self.phase
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition phase
    pub fn process(&mut self, event: PipelineEvent) -> Result<(), String> {
        let new_phase = match (&self.phase, &event) {
            // From Queued
            (PipelinePhase::Queued, PipelineEvent::Begin) => PipelinePhase::PreBuild,
            (PipelinePhase::Queued, PipelineEvent::Promote) => PipelinePhase::Starting,

            // Happy path
            (PipelinePhase::PreBuild, PipelineEvent::PreBuildDone) => PipelinePhase::Building,
            (PipelinePhase::Building, PipelineEvent::BuildDone) => PipelinePhase::TestGate,
            (PipelinePhase::TestGate, PipelineEvent::TestsPassed) => PipelinePhase::PreDeploy,
            (
                PipelinePhase::PreDeploy,
                PipelineEvent::PreDeployDone { approval_required },
            ) => {
                if *approval_required {
                    PipelinePhase::ApprovalWait
                } else {
                    PipelinePhase::Starting
                }
            }
            (PipelinePhase::ApprovalWait, PipelineEvent::Approved) => PipelinePhase::Starting,
            (PipelinePhase::Starting, PipelineEvent::InstanceUp) => PipelinePhase::HealthChecking,
            (PipelinePhase::HealthChecking, PipelineEvent::HealthPassed) => {
                PipelinePhase::Switching
            }
            (PipelinePhase::Switching, PipelineEvent::Switched) => PipelinePhase::PostDeploy,
            (PipelinePhase::PostDeploy, PipelineEvent::PostDeployDone) => PipelinePhase::Completed,

            // Any active phase can fault into the failure hooks
            (
                PipelinePhase::Queued
                | PipelinePhase::PreBuild
                | PipelinePhase::Building
                | PipelinePhase::TestGate
                | PipelinePhase::PreDeploy
                | PipelinePhase::ApprovalWait
                | PipelinePhase::Starting
                | PipelinePhase::HealthChecking
                | PipelinePhase::Switching
                | PipelinePhase::PostDeploy,
                PipelineEvent::Fault(err),
            ) => {
                self.error = Some(err.clone());
                PipelinePhase::OnFailureHooks
            }

            // Settling a failure
            (
                PipelinePhase::OnFailureHooks,
                PipelineEvent::FailureHooksDone { rolling_back },
            ) => {
                if *rolling_back {
                    PipelinePhase::RollingBack
                } else {
                    PipelinePhase::Failed
                }
            }
            (PipelinePhase::RollingBack, PipelineEvent::RollbackComplete) => {
                PipelinePhase::RolledBack
            }
            (PipelinePhase::RollingBack, PipelineEvent::Fault(err)) => {
                self.error = Some(err.clone());
                PipelinePhase::Failed
            }

            // Invalid transitions
            (phase, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", phase, event));
            }
        };

        self.phase = new_phase;
        Ok(())
    }
}

impl Default for PipelineFsm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut fsm = PipelineFsm::new();
        assert_eq!(fsm.phase(), PipelinePhase::Queued);

        fsm.process(PipelineEvent::Begin).unwrap();
        fsm.process(PipelineEvent::PreBuildDone).unwrap();
        fsm.process(PipelineEvent::BuildDone).unwrap();
        fsm.process(PipelineEvent::TestsPassed).unwrap();
        fsm.process(PipelineEvent::PreDeployDone {
            approval_required: false,
        })
        .unwrap();
        assert_eq!(fsm.phase(), PipelinePhase::Starting);

        fsm.process(PipelineEvent::InstanceUp).unwrap();
        fsm.process(PipelineEvent::HealthPassed).unwrap();
        fsm.process(PipelineEvent::Switched).unwrap();
        fsm.process(PipelineEvent::PostDeployDone).unwrap();
        assert_eq!(fsm.phase(), PipelinePhase::Completed);
        assert!(fsm.phase().is_terminal());
    }

    #[test]
    fn test_approval_detour() {
        let mut fsm = PipelineFsm::new();
        fsm.process(PipelineEvent::Begin).unwrap();
        fsm.process(PipelineEvent::PreBuildDone).unwrap();
        fsm.process(PipelineEvent::BuildDone).unwrap();
        fsm.process(PipelineEvent::TestsPassed).unwrap();
        fsm.process(PipelineEvent::PreDeployDone {
            approval_required: true,
        })
        .unwrap();
        assert_eq!(fsm.phase(), PipelinePhase::ApprovalWait);

        fsm.process(PipelineEvent::Approved).unwrap();
        assert_eq!(fsm.phase(), PipelinePhase::Starting);
    }

    #[test]
    fn test_fault_runs_failure_hooks_first() {
        let mut fsm = PipelineFsm::new();
        fsm.process(PipelineEvent::Begin).unwrap();
        fsm.process(PipelineEvent::Fault("pre_build hook failed".to_string()))
            .unwrap();
        assert_eq!(fsm.phase(), PipelinePhase::OnFailureHooks);
        assert_eq!(fsm.error(), Some("pre_build hook failed"));

        fsm.process(PipelineEvent::FailureHooksDone { rolling_back: false })
            .unwrap();
        assert_eq!(fsm.phase(), PipelinePhase::Failed);
    }

    #[test]
    fn test_auto_rollback_branch() {
        let mut fsm = PipelineFsm::new();
        fsm.process(PipelineEvent::Begin).unwrap();
        fsm.process(PipelineEvent::Fault("health gate failed".to_string()))
            .unwrap();
        fsm.process(PipelineEvent::FailureHooksDone { rolling_back: true })
            .unwrap();
        assert_eq!(fsm.phase(), PipelinePhase::RollingBack);

        fsm.process(PipelineEvent::RollbackComplete).unwrap();
        assert_eq!(fsm.phase(), PipelinePhase::RolledBack);
    }

    #[test]
    fn test_promote_skips_build_phases() {
        let mut fsm = PipelineFsm::new();
        fsm.process(PipelineEvent::Promote).unwrap();
        assert_eq!(fsm.phase(), PipelinePhase::Starting);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut fsm = PipelineFsm::new();
        let err = fsm.process(PipelineEvent::Switched).unwrap_err();
        assert!(err.contains("Invalid transition"));
        assert_eq!(fsm.phase(), PipelinePhase::Queued);
    }
}
