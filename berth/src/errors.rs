//! Error types for berth

use thiserror::Error;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("deployment already in progress for app '{0}'")]
    AlreadyDeploying(String),

    #[error("app '{0}' has a deployment in progress, lifecycle operation rejected")]
    DeploymentInProgress(String),

    #[error("health check for app '{app}' did not pass within {attempts} attempts")]
    HealthCheckTimeout { app: String, attempts: u32 },

    #[error("hook '{hook}' failed (required: {required}): {detail}")]
    HookFailure {
        hook: String,
        required: bool,
        detail: String,
    },

    #[error("test command failed: {0}")]
    TestFailure(String),

    #[error("deployment rejected by approver: {0}")]
    ApprovalRejected(String),

    #[error("approval window expired for run {0}")]
    ApprovalTimedOut(String),

    #[error("rate limit exceeded for app '{0}'")]
    RateLimitExceeded(String),

    #[error("rollback target not found: {0}")]
    RollbackNotFound(String),

    #[error("webhook signature verification failed")]
    InvalidSignature,

    #[error("notification delivery failed: {0}")]
    NotificationDeliveryFailure(String),

    #[error("routing table update failed, previous route kept: {0}")]
    RoutingUpdateFailure(String),

    #[error("provider error: {0}")]
    ProviderError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("server error: {0}")]
    ServerError(String),

    #[error("shutdown error: {0}")]
    ShutdownError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}

impl OrchestratorError {
    /// Whether a pipeline failure with this error leaves the previously
    /// serving release untouched.
    pub fn keeps_previous_route(&self) -> bool {
        !matches!(self, OrchestratorError::RoutingUpdateFailure(_))
    }
}
