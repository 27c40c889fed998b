//! Server state

use std::sync::Arc;

use crate::app::state::ActivityTracker;
use crate::deploy::manager::DeployManager;
use crate::gates::approval::ApprovalGate;
use crate::gates::rate_limit::RateLimiter;
use crate::storage::store::AppStore;

/// Server state shared across handlers
pub struct ServerState {
    pub store: Arc<AppStore>,
    pub manager: Arc<DeployManager>,
    pub approvals: Arc<ApprovalGate>,
    pub limiter: Arc<RateLimiter>,
    pub activity_tracker: Arc<ActivityTracker>,
}

impl ServerState {
    pub fn new(
        store: Arc<AppStore>,
        manager: Arc<DeployManager>,
        approvals: Arc<ApprovalGate>,
        limiter: Arc<RateLimiter>,
        activity_tracker: Arc<ActivityTracker>,
    ) -> Self {
        Self {
            store,
            manager,
            approvals,
            limiter,
            activity_tracker,
        }
    }
}
