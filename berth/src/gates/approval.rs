//! Manual approval gate
//!
//! A pipeline run suspends here on a oneshot channel until an operator
//! decides, or the configured window expires. No polling is involved.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::OrchestratorError;
use crate::models::approval::{ApprovalRequest, ApprovalStatus};
use crate::models::deployment::DeploymentRun;
use crate::models::pipeline::ApprovalConfig;
use crate::storage::store::AppStore;

/// Operator decision delivered to a waiting run
#[derive(Debug, Clone)]
pub enum Decision {
    Approved { by: String },
    Rejected { by: String },
}

/// Suspension point between pre_deploy and instance launch
pub struct ApprovalGate {
    store: Arc<AppStore>,
    waiters: StdMutex<HashMap<Uuid, oneshot::Sender<Decision>>>,
}

impl ApprovalGate {
    pub fn new(store: Arc<AppStore>) -> Self {
        Self {
            store,
            waiters: StdMutex::new(HashMap::new()),
        }
    }

    /// Create and persist a pending request for a run, returning the
    /// receiver the pipeline will suspend on.
    pub async fn request(
        &self,
        run: &DeploymentRun,
        config: &ApprovalConfig,
    ) -> Result<(ApprovalRequest, oneshot::Receiver<Decision>), OrchestratorError> {
        let request = ApprovalRequest::new(
            run.id,
            &run.app,
            &run.environment,
            &run.commit_sha,
            config.timeout_minutes,
        );

        self.store
            .update_approvals(&run.app, |set| set.approvals.push(request.clone()))
            .await?;

        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request.id, tx);

        info!(
            "Approval requested for {}/{} run {} (expires {})",
            run.app, run.environment, run.id, request.expires_at
        );
        Ok((request, rx))
    }

    /// Suspend until a decision arrives or the window closes
    pub async fn await_decision(
        &self,
        request: &ApprovalRequest,
        rx: oneshot::Receiver<Decision>,
        timeout: Duration,
    ) -> Result<(), OrchestratorError> {
        let outcome = tokio::time::timeout(timeout, rx).await;

        match outcome {
            Ok(Ok(Decision::Approved { by })) => {
                info!("Run {} approved by {}", request.run_id, by);
                Ok(())
            }
            Ok(Ok(Decision::Rejected { by })) => {
                info!("Run {} rejected by {}", request.run_id, by);
                Err(OrchestratorError::ApprovalRejected(by))
            }
            Ok(Err(_)) => {
                // Sender dropped without a decision (gate expired it)
                self.mark(request, ApprovalStatus::TimedOut, None).await?;
                Err(OrchestratorError::ApprovalTimedOut(request.run_id.to_string()))
            }
            Err(_) => {
                self.drop_waiter(&request.id);
                self.mark(request, ApprovalStatus::TimedOut, None).await?;
                Err(OrchestratorError::ApprovalTimedOut(request.run_id.to_string()))
            }
        }
    }

    /// Record an operator decision and wake the waiting run
    pub async fn decide(
        &self,
        app: &str,
        approval_id: Uuid,
        approve: bool,
        decided_by: &str,
    ) -> Result<(), OrchestratorError> {
        let status = if approve {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };

        let updated = self
            .store
            .update_approvals(app, |set| match set.get_mut(&approval_id) {
                Some(approval) if approval.status == ApprovalStatus::Pending => {
                    if approval.is_expired() {
                        approval.status = ApprovalStatus::TimedOut;
                        return Err(OrchestratorError::ApprovalTimedOut(
                            approval.run_id.to_string(),
                        ));
                    }
                    approval.status = status;
                    approval.decided_at = Some(chrono::Utc::now());
                    approval.decided_by = Some(decided_by.to_string());
                    Ok(())
                }
                Some(_) => Err(OrchestratorError::ConfigError(
                    "approval already decided".to_string(),
                )),
                None => Err(OrchestratorError::NotFound(format!(
                    "approval {}",
                    approval_id
                ))),
            })
            .await?;
        updated?;

        let waiter = self
            .waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&approval_id);

        match waiter {
            Some(tx) => {
                let decision = if approve {
                    Decision::Approved {
                        by: decided_by.to_string(),
                    }
                } else {
                    Decision::Rejected {
                        by: decided_by.to_string(),
                    }
                };
                // The run may have timed out concurrently; nothing to do then
                let _ = tx.send(decision);
            }
            None => {
                warn!(
                    "Approval {} decided but no run is waiting (daemon restart?)",
                    approval_id
                );
            }
        }

        Ok(())
    }

    /// List open requests across all apps
    pub async fn pending_all(&self) -> Result<Vec<ApprovalRequest>, OrchestratorError> {
        let mut out = Vec::new();
        for app in self.store.list_apps().await? {
            let set = self.store.load_approvals(&app).await?;
            out.extend(set.pending().cloned());
        }
        Ok(out)
    }

    /// Expire stale pending requests; used by the reaper worker
    pub async fn expire_stale(&self) -> Result<usize, OrchestratorError> {
        let mut expired = 0;
        for app in self.store.list_apps().await? {
            let stale: Vec<Uuid> = self
                .store
                .update_approvals(&app, |set| {
                    let mut ids = Vec::new();
                    for approval in set.approvals.iter_mut() {
                        if approval.is_expired() {
                            approval.status = ApprovalStatus::TimedOut;
                            ids.push(approval.id);
                        }
                    }
                    ids
                })
                .await?;

            expired += stale.len();
            let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
            for id in stale {
                // Dropping the sender wakes the run with a timeout
                waiters.remove(&id);
            }
        }
        Ok(expired)
    }

    fn drop_waiter(&self, approval_id: &Uuid) {
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(approval_id);
    }

    async fn mark(
        &self,
        request: &ApprovalRequest,
        status: ApprovalStatus,
        decided_by: Option<String>,
    ) -> Result<(), OrchestratorError> {
        self.store
            .update_approvals(&request.app, |set| {
                if let Some(approval) = set.get_mut(&request.id) {
                    if approval.status == ApprovalStatus::Pending {
                        approval.status = status;
                        approval.decided_at = Some(chrono::Utc::now());
                        approval.decided_by = decided_by;
                    }
                }
            })
            .await
    }
}
