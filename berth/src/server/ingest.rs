//! Webhook ingestion
//!
//! `POST /hooks/{token}` admits push events from a git host. Admission is
//! decided in order: app lookup, signature, event kind, branch match, rate
//! limit, then run start. Every decision lands in the app's delivery log.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::OrchestratorError;
use crate::models::app::App;
use crate::models::delivery::{DeliveryOutcome, DeliveryRecord};
use crate::models::deployment::Trigger;
use crate::server::signature::{verify_signature, SIGNATURE_HEADER};
use crate::server::state::ServerState;

/// Header naming the event kind
pub const EVENT_HEADER: &str = "x-github-event";

/// Push event payload, the subset the orchestrator reads
#[derive(Debug, Deserialize)]
struct PushPayload {
    /// Fully-qualified ref, e.g. `refs/heads/main`
    #[serde(rename = "ref")]
    git_ref: String,

    /// Head commit sha after the push
    after: String,

    #[serde(default)]
    pusher: Option<Pusher>,
}

#[derive(Debug, Deserialize)]
struct Pusher {
    name: String,
}

/// Ingestion response body
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub outcome: DeliveryOutcome,
    pub message: String,
}

/// Webhook ingestion handler
pub async fn webhook_handler(
    State(state): State<Arc<ServerState>>,
    Path(token): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    state.activity_tracker.touch();

    // Token lookup before anything else; unknown tokens get a bare 404
    let app = match state.store.find_by_token(&token).await {
        Ok(Some(app)) => app,
        Ok(None) => {
            return respond(
                StatusCode::NOT_FOUND,
                DeliveryOutcome::Ignored,
                "unknown token",
            )
        }
        Err(e) => {
            return respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                DeliveryOutcome::Ignored,
                &e.to_string(),
            )
        }
    };

    let event = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    // Signature gates everything that touches app state
    let secret = SecretString::from(app.webhook_secret.clone());
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if verify_signature(&secret, &body, signature).is_err() {
        record(&state, &app.name, DeliveryRecord::new(&event, DeliveryOutcome::BadSignature)).await;
        return respond(
            StatusCode::UNAUTHORIZED,
            DeliveryOutcome::BadSignature,
            "signature verification failed",
        );
    }

    if event != "push" {
        record(&state, &app.name, DeliveryRecord::new(&event, DeliveryOutcome::Ignored)).await;
        return respond(
            StatusCode::OK,
            DeliveryOutcome::Ignored,
            &format!("ignoring '{}' event", event),
        );
    }

    let payload: PushPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            record(&state, &app.name, DeliveryRecord::new(&event, DeliveryOutcome::Ignored)).await;
            return respond(
                StatusCode::BAD_REQUEST,
                DeliveryOutcome::Ignored,
                &format!("unparseable push payload: {}", e),
            );
        }
    };

    let branch = match payload.git_ref.strip_prefix("refs/heads/") {
        Some(branch) => branch.to_string(),
        None => {
            record(&state, &app.name, DeliveryRecord::new(&event, DeliveryOutcome::Ignored)).await;
            return respond(
                StatusCode::OK,
                DeliveryOutcome::Ignored,
                "not a branch push",
            );
        }
    };
    let pusher = payload.pusher.map(|p| p.name);
    let push_record = |outcome| {
        DeliveryRecord::new("push", outcome).with_push(&branch, &payload.after, pusher.clone())
    };

    let environment = match app.environment_for_branch(&branch) {
        Some(env) => env.name.clone(),
        None => {
            record(&state, &app.name, push_record(DeliveryOutcome::Unmatched)).await;
            return respond(
                StatusCode::OK,
                DeliveryOutcome::Unmatched,
                &format!("branch '{}' matches no auto-deploy environment", branch),
            );
        }
    };

    if let Err(e) = state.limiter.admit(&app.name, &app.pipeline.rate_limit) {
        record(&state, &app.name, push_record(DeliveryOutcome::RateLimited)).await;
        return respond(
            StatusCode::TOO_MANY_REQUESTS,
            DeliveryOutcome::RateLimited,
            &e.to_string(),
        );
    }

    match start_run(&state, &app, &environment, &payload.after).await {
        Ok(()) => {
            if app.pipeline.approval.enabled {
                record(&state, &app.name, push_record(DeliveryOutcome::AwaitingApproval)).await;
                respond(
                    StatusCode::ACCEPTED,
                    DeliveryOutcome::AwaitingApproval,
                    "deployment queued behind manual approval",
                )
            } else {
                record(&state, &app.name, push_record(DeliveryOutcome::Admitted)).await;
                respond(StatusCode::OK, DeliveryOutcome::Admitted, "deployment started")
            }
        }
        Err(OrchestratorError::AlreadyDeploying(_)) => {
            record(&state, &app.name, push_record(DeliveryOutcome::Busy)).await;
            respond(
                StatusCode::CONFLICT,
                DeliveryOutcome::Busy,
                "a deployment is already in progress",
            )
        }
        Err(e) => {
            warn!("Webhook deployment for '{}' failed to start: {}", app.name, e);
            record(&state, &app.name, push_record(DeliveryOutcome::Ignored)).await;
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                DeliveryOutcome::Ignored,
                &e.to_string(),
            )
        }
    }
}

async fn start_run(
    state: &Arc<ServerState>,
    app: &App,
    environment: &str,
    commit: &str,
) -> Result<(), OrchestratorError> {
    let handle = state
        .manager
        .start_deployment(&app.name, environment, commit, Trigger::Webhook)
        .await?;
    info!(
        "Webhook push admitted: {}/{} run {}",
        app.name, environment, handle.run.id
    );
    Ok(())
}

async fn record(state: &Arc<ServerState>, app: &str, entry: DeliveryRecord) {
    if let Err(e) = state.store.append_delivery(app, &entry).await {
        warn!("Could not record delivery for '{}': {}", app, e);
    }
}

fn respond(
    status: StatusCode,
    outcome: DeliveryOutcome,
    message: &str,
) -> (StatusCode, Json<IngestResponse>) {
    (
        status,
        Json(IngestResponse {
            outcome,
            message: message.to_string(),
        }),
    )
}
