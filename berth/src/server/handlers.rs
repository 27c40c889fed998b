//! HTTP request handlers for the control endpoints

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::OrchestratorError;
use crate::models::app::{App, AppStatus, Environment, HealthCheckSpec};
use crate::models::approval::ApprovalRequest;
use crate::models::delivery::DeliveryRecord;
use crate::models::deployment::{DeploymentRun, Trigger};
use crate::models::pipeline::PipelineConfig;
use crate::models::release::Release;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn status_for(err: &OrchestratorError) -> StatusCode {
    match err {
        OrchestratorError::AlreadyDeploying(_) | OrchestratorError::DeploymentInProgress(_) => {
            StatusCode::CONFLICT
        }
        OrchestratorError::NotFound(_) | OrchestratorError::RollbackNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        OrchestratorError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
        OrchestratorError::InvalidSignature => StatusCode::UNAUTHORIZED,
        OrchestratorError::ConfigError(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn fail(err: OrchestratorError) -> (StatusCode, Json<ErrorResponse>) {
    (
        status_for(&err),
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "berth".to_string(),
        version: version.version,
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// App summary, the definition minus webhook credentials
#[derive(Debug, Serialize)]
pub struct AppResponse {
    pub name: String,
    pub port: u16,
    pub domains: Vec<String>,
    pub status: AppStatus,
    pub environments: Vec<String>,
    pub deploying: bool,
}

/// List registered apps
pub async fn apps_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    state.activity_tracker.touch();

    let names = state.store.list_apps().await.map_err(fail)?;
    let mut apps = Vec::with_capacity(names.len());
    for name in names {
        let app = state.store.load_app(&name).await.map_err(fail)?;
        apps.push(AppResponse {
            deploying: state.manager.is_deploying(&app.name),
            name: app.name,
            port: app.port,
            domains: app.domains,
            status: app.status,
            environments: app.environments.into_iter().map(|e| e.name).collect(),
        });
    }
    Ok(Json(apps))
}

/// App registration request
#[derive(Debug, Deserialize)]
pub struct CreateAppRequest {
    pub name: String,
    pub port: u16,
    pub repo_url: String,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub environments: Option<Vec<Environment>>,
    #[serde(default)]
    pub health_check: Option<HealthCheckSpec>,
}

/// Registration response, the one place webhook credentials appear
#[derive(Debug, Serialize)]
pub struct CreatedAppResponse {
    pub name: String,
    pub webhook_token: String,
    pub webhook_secret: String,
}

/// Register a new app
pub async fn create_app_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CreateAppRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    state.activity_tracker.touch();

    let mut app = App::new(&request.name, request.port, &request.repo_url);
    app.domains = request.domains;
    if let Some(environments) = request.environments {
        app.environments = environments;
    }
    if let Some(health_check) = request.health_check {
        app.health_check = health_check;
    }
    state.store.create_app(&app).await.map_err(fail)?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedAppResponse {
            name: app.name,
            webhook_token: app.webhook_token,
            webhook_secret: app.webhook_secret,
        }),
    ))
}

/// Destroy an app: route, serving instance, and all stored state
pub async fn destroy_app_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    state.activity_tracker.touch();

    state.manager.destroy(&name).await.map_err(fail)?;
    Ok(Json(AckResponse {
        success: true,
        message: format!("'{}' destroyed", name),
    }))
}

/// Replace the app's pipeline configuration.
///
/// Active runs keep the config they snapshotted at start.
pub async fn update_pipeline_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    Json(config): Json<PipelineConfig>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    state.activity_tracker.touch();

    state
        .store
        .update_app(&name, |app| app.pipeline = config)
        .await
        .map_err(fail)?;
    Ok(Json(AckResponse {
        success: true,
        message: format!("pipeline configuration for '{}' updated", name),
    }))
}

/// App status handler
pub async fn app_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    state.activity_tracker.touch();

    let app = state.store.load_app(&name).await.map_err(fail)?;
    Ok(Json(AppResponse {
        deploying: state.manager.is_deploying(&app.name),
        name: app.name,
        port: app.port,
        domains: app.domains,
        status: app.status,
        environments: app.environments.into_iter().map(|e| e.name).collect(),
    }))
}

/// Deploy request
#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    pub environment: String,

    /// Branch name or commit sha
    pub reference: String,
}

/// Started-run response
#[derive(Debug, Serialize)]
pub struct RunStartedResponse {
    pub run_id: Uuid,
    pub commit_sha: String,
}

/// Manual deployment handler. Manual deploys bypass the rate limiter.
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    Json(request): Json<DeployRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    state.activity_tracker.touch();

    let handle = state
        .manager
        .start_deployment(&name, &request.environment, &request.reference, Trigger::Manual)
        .await
        .map_err(fail)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(RunStartedResponse {
            run_id: handle.run.id,
            commit_sha: handle.run.commit_sha,
        }),
    ))
}

/// Rollback request
#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub environment: String,

    /// Release id or commit sha prefix within the retained chain
    pub target: String,
}

/// Rollback handler
pub async fn rollback_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    Json(request): Json<RollbackRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    state.activity_tracker.touch();

    let handle = state
        .manager
        .rollback(&name, &request.environment, &request.target)
        .await
        .map_err(fail)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(RunStartedResponse {
            run_id: handle.run.id,
            commit_sha: handle.run.commit_sha,
        }),
    ))
}

/// Action acknowledgement
#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub success: bool,
    pub message: String,
}

/// Stop handler
pub async fn stop_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    state.activity_tracker.touch();

    state.manager.stop(&name).await.map_err(fail)?;
    Ok(Json(AckResponse {
        success: true,
        message: format!("'{}' stopped, domains now serve maintenance", name),
    }))
}

/// Start handler, rejected when the app is already running
pub async fn start_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    state.activity_tracker.touch();

    let handle = state.manager.start(&name).await.map_err(fail)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RunStartedResponse {
            run_id: handle.run.id,
            commit_sha: handle.run.commit_sha,
        }),
    ))
}

/// Restart handler
pub async fn restart_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    state.activity_tracker.touch();

    let handle = state.manager.restart(&name).await.map_err(fail)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RunStartedResponse {
            run_id: handle.run.id,
            commit_sha: handle.run.commit_sha,
        }),
    ))
}

/// Versions response
#[derive(Debug, Serialize)]
pub struct VersionsResponse {
    pub versions: Vec<Release>,
    pub total: usize,
}

/// List the retained releases of one environment, newest first
pub async fn versions_handler(
    State(state): State<Arc<ServerState>>,
    Path((name, environment)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    state.activity_tracker.touch();

    let versions = state
        .manager
        .versions()
        .list_versions(&name, &environment)
        .await
        .map_err(fail)?;
    let total = versions.len();
    Ok(Json(VersionsResponse { versions, total }))
}

/// Runs response
#[derive(Debug, Serialize)]
pub struct RunsResponse {
    pub runs: Vec<DeploymentRun>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

/// Deployment run history, newest first
pub async fn runs_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    state.activity_tracker.touch();

    let history = state.store.load_runs(&name).await.map_err(fail)?;
    let limit = query.limit.unwrap_or(20);
    Ok(Json(RunsResponse {
        runs: history.recent(limit).to_vec(),
    }))
}

/// Pending approvals response
#[derive(Debug, Serialize)]
pub struct ApprovalsResponse {
    pub approvals: Vec<ApprovalRequest>,
}

/// List pending approvals across all apps
pub async fn approvals_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    state.activity_tracker.touch();

    let approvals = state.approvals.pending_all().await.map_err(fail)?;
    Ok(Json(ApprovalsResponse { approvals }))
}

/// Approval decision request
#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub approve: bool,
    pub decided_by: String,
}

/// Decide a pending approval
pub async fn approval_decide_handler(
    State(state): State<Arc<ServerState>>,
    Path((name, approval_id)): Path<(String, Uuid)>,
    Json(request): Json<DecisionRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    state.activity_tracker.touch();

    state
        .approvals
        .decide(&name, approval_id, request.approve, &request.decided_by)
        .await
        .map_err(fail)?;

    let verdict = if request.approve { "approved" } else { "rejected" };
    Ok(Json(AckResponse {
        success: true,
        message: format!("approval {} {}", approval_id, verdict),
    }))
}

/// Delivery log response
#[derive(Debug, Serialize)]
pub struct DeliveriesResponse {
    pub deliveries: Vec<DeliveryRecord>,
}

/// Webhook delivery log, newest first
pub async fn deliveries_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    state.activity_tracker.touch();

    let deliveries = state
        .store
        .read_deliveries(&name, query.limit.unwrap_or(50))
        .await
        .map_err(fail)?;
    Ok(Json(DeliveriesResponse { deliveries }))
}

#[derive(Debug, Deserialize)]
pub struct TailQuery {
    pub tail: Option<usize>,
}

/// Recent log output from the serving instance, as plain text
pub async fn logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    Query(query): Query<TailQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    state.activity_tracker.touch();

    let logs = state
        .manager
        .instance_logs(&name, query.tail.unwrap_or(100))
        .await
        .map_err(fail)?;
    Ok(logs)
}

/// Queue a synthetic success event through the configured channels
pub async fn notify_test_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    state.activity_tracker.touch();

    state.manager.send_test_notification(&name).await.map_err(fail)?;
    Ok(Json(AckResponse {
        success: true,
        message: "test notification queued".to_string(),
    }))
}
