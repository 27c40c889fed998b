//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::OrchestratorError;
use crate::server::handlers::{
    app_handler, approval_decide_handler, approvals_handler, apps_handler, create_app_handler,
    deliveries_handler, deploy_handler, destroy_app_handler, health_handler, logs_handler,
    notify_test_handler, restart_handler, rollback_handler, runs_handler, start_handler,
    stop_handler, update_pipeline_handler, version_handler, versions_handler,
};
use crate::server::ingest::webhook_handler;
use crate::server::state::ServerState;

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), OrchestratorError>>, OrchestratorError> {
    let app = Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Webhook ingestion
        .route("/hooks/{token}", post(webhook_handler))
        // Apps and lifecycle
        .route("/apps", get(apps_handler).post(create_app_handler))
        .route("/apps/{name}", get(app_handler).delete(destroy_app_handler))
        .route("/apps/{name}/pipeline", put(update_pipeline_handler))
        .route("/apps/{name}/deploy", post(deploy_handler))
        .route("/apps/{name}/rollback", post(rollback_handler))
        .route("/apps/{name}/stop", post(stop_handler))
        .route("/apps/{name}/start", post(start_handler))
        .route("/apps/{name}/restart", post(restart_handler))
        .route("/apps/{name}/logs", get(logs_handler))
        // Versions and runs
        .route(
            "/apps/{name}/environments/{environment}/versions",
            get(versions_handler),
        )
        .route("/apps/{name}/runs", get(runs_handler))
        // Approvals
        .route("/approvals", get(approvals_handler))
        .route("/apps/{name}/approvals/{approval_id}", post(approval_decide_handler))
        // Deliveries and notifications
        .route("/apps/{name}/deliveries", get(deliveries_handler))
        .route("/apps/{name}/notifications/test", post(notify_test_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| OrchestratorError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| OrchestratorError::ServerError(e.to_string()))
    });

    Ok(handle)
}
