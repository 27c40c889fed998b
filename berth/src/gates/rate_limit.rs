//! Sliding-window rate limiter for webhook admissions
//!
//! Manual deployments bypass this gate; only webhook-triggered runs are
//! admitted through it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::errors::OrchestratorError;
use crate::models::pipeline::RateLimitConfig;

/// Per-app sliding window of admitted deployment timestamps
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or reject a webhook-triggered deployment for an app.
    /// Admission is recorded only when it succeeds.
    pub fn admit(&self, app: &str, config: &RateLimitConfig) -> Result<(), OrchestratorError> {
        self.admit_at(app, config, Instant::now())
    }

    fn admit_at(
        &self,
        app: &str,
        config: &RateLimitConfig,
        now: Instant,
    ) -> Result<(), OrchestratorError> {
        if !config.enabled {
            return Ok(());
        }

        let window = Duration::from_secs(config.window_secs);
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let timestamps = windows.entry(app.to_string()).or_default();

        // Drop entries that slid out of the window
        timestamps.retain(|t| now.duration_since(*t) < window);

        if timestamps.len() >= config.max_deploys {
            return Err(OrchestratorError::RateLimitExceeded(app.to_string()));
        }

        timestamps.push(now);
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
