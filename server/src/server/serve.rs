//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::ServiceError;
use crate::server::handlers::{
    create_deployment, create_device, create_project, get_build, get_deployment, get_device,
    health_handler, list_builds, list_deployments, list_devices, list_projects, ota_check,
    ota_download, ota_manifest, ota_public_key, ota_report, pause_deployment, resume_deployment,
    rollback_deployment, telemetry_heartbeat, trigger_build, update_rollout, version_handler,
};
use crate::server::state::ServerState;

/// Build the service router. Exposed separately so tests can drive the
/// full HTTP surface without binding a socket.
pub fn router(state: Arc<ServerState>) -> Router {
    let api = Router::new()
        // Builds
        .route("/builds", post(trigger_build).get(list_builds))
        .route("/builds/{build_id}", get(get_build))
        // Deployments
        .route("/deployments", post(create_deployment).get(list_deployments))
        .route("/deployments/{deployment_id}", get(get_deployment))
        .route("/deployments/{deployment_id}/rollback", post(rollback_deployment))
        .route("/deployments/{deployment_id}/pause", post(pause_deployment))
        .route("/deployments/{deployment_id}/resume", post(resume_deployment))
        .route("/deployments/{deployment_id}/rollout", put(update_rollout))
        // Device OTA pull protocol
        .route("/ota/check", post(ota_check))
        .route("/ota/download/{deployment_id}", get(ota_download))
        .route("/ota/manifest/{build_id}", get(ota_manifest))
        .route("/ota/public-key", get(ota_public_key))
        .route("/ota/report", post(ota_report))
        // Devices and telemetry
        .route("/devices", post(create_device).get(list_devices))
        .route("/devices/{device_id}", get(get_device))
        .route("/telemetry/heartbeat", post(telemetry_heartbeat))
        // Projects
        .route("/projects", post(create_project).get(list_projects));

    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .nest("/api", api)
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), ServiceError>>, ServiceError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ServiceError::Server(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServiceError::Server(e.to_string()))
    });

    Ok(handle)
}
