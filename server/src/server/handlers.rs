//! HTTP request handlers

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use crate::build::logbuf::format_line;
use crate::collab::{ProjectSource, SourceFile};
use crate::errors::ServiceError;
use crate::models::build::Build;
use crate::models::deployment::RolloutStrategy;
use crate::rollout::CreateDeployment;
use crate::server::state::ServerState;
use crate::utils::{generate_uuid, now_iso, version_info};

/// Caller identity for audit entries. Authentication lives in the
/// external identity service; this service only receives the identity.
fn actor(headers: &HeaderMap) -> String {
    headers
        .get("x-operator-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("operator")
        .to_string()
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
        service: "fleetforge".to_string(),
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

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn message(msg: impl Into<String>) -> Json<MessageResponse> {
    Json(MessageResponse {
        message: msg.into(),
    })
}

// ================================ BUILDS ================================ //

/// Build trigger request
#[derive(Debug, Deserialize)]
pub struct BuildTrigger {
    pub project_id: String,
    pub target_version: String,
}

/// Trigger a build: registers a queued record and spawns the
/// orchestration task. The response returns immediately; progress is
/// observable by polling the build.
pub async fn trigger_build(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(req): Json<BuildTrigger>,
) -> Result<Json<Build>, ServiceError> {
    let project = state.projects.project(&req.project_id).await?;

    let build_id = generate_uuid();
    let initial_log = format_line(
        "INFO",
        &format!(
            "Build queued for {} v{} ({})",
            project.name, req.target_version, project.board_type
        ),
    );
    let build = Build::queued(
        build_id.clone(),
        project.id.clone(),
        project.name.clone(),
        project.board_type.clone(),
        req.target_version.clone(),
        now_iso(),
        initial_log,
    );
    state.registry.register(build.clone()).await;

    state.orchestrator.spawn(
        build_id.clone(),
        project.files.clone(),
        project.board_type.clone(),
        req.target_version.clone(),
    );

    state
        .audit
        .record(&actor(&headers), "trigger_build", &build_id)
        .await;
    Ok(Json(build))
}

/// List the 50 most recent builds
pub async fn list_builds(State(state): State<Arc<ServerState>>) -> Json<Vec<Build>> {
    let mut builds = state.registry.list().await;
    builds.truncate(50);
    Json(builds)
}

/// Build polling accessor
pub async fn get_build(
    State(state): State<Arc<ServerState>>,
    Path(build_id): Path<String>,
) -> Result<Json<Build>, ServiceError> {
    let build = state
        .registry
        .get(&build_id)
        .await
        .ok_or_else(|| ServiceError::NotFound("Build not found".to_string()))?;
    Ok(Json(build))
}

// ============================= DEPLOYMENTS ============================== //

fn default_rollout_percent() -> u8 {
    100
}

/// Deployment creation request
#[derive(Debug, Deserialize)]
pub struct DeployCreate {
    pub build_id: String,
    pub target_device_ids: Vec<String>,

    #[serde(default = "default_rollout_percent")]
    pub rollout_percent: u8,

    #[serde(default)]
    pub rollout_strategy: RolloutStrategy,
}

pub async fn create_deployment(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(req): Json<DeployCreate>,
) -> Result<Json<crate::models::deployment::Deployment>, ServiceError> {
    let deployment = state
        .rollouts
        .create(CreateDeployment {
            build_id: req.build_id,
            target_device_ids: req.target_device_ids,
            rollout_percent: req.rollout_percent,
            rollout_strategy: req.rollout_strategy,
        })
        .await?;

    state
        .audit
        .record(&actor(&headers), "create_deployment", &deployment.id)
        .await;
    Ok(Json(deployment))
}

pub async fn list_deployments(
    State(state): State<Arc<ServerState>>,
) -> Json<Vec<crate::models::deployment::Deployment>> {
    let mut deployments = state.rollouts.list().await;
    deployments.truncate(50);
    Json(deployments)
}

pub async fn get_deployment(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
) -> Result<Json<crate::models::deployment::Deployment>, ServiceError> {
    let deployment = state
        .rollouts
        .get(&deployment_id)
        .await
        .ok_or_else(|| ServiceError::NotFound("Deployment not found".to_string()))?;
    Ok(Json(deployment))
}

/// Rollback request
#[derive(Debug, Deserialize)]
pub struct DeployRollback {
    #[serde(default)]
    pub reason: String,
}

pub async fn rollback_deployment(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(deployment_id): Path<String>,
    Json(req): Json<DeployRollback>,
) -> Result<Json<MessageResponse>, ServiceError> {
    state.rollouts.rollback(&deployment_id, &req.reason).await?;
    state
        .audit
        .record(&actor(&headers), "rollback_deployment", &deployment_id)
        .await;
    Ok(message("Deployment rolled back"))
}

pub async fn pause_deployment(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(deployment_id): Path<String>,
) -> Result<Json<MessageResponse>, ServiceError> {
    state.rollouts.pause(&deployment_id).await?;
    state
        .audit
        .record(&actor(&headers), "pause_deployment", &deployment_id)
        .await;
    Ok(message("Deployment paused"))
}

pub async fn resume_deployment(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(deployment_id): Path<String>,
) -> Result<Json<MessageResponse>, ServiceError> {
    state.rollouts.resume(&deployment_id).await?;
    state
        .audit
        .record(&actor(&headers), "resume_deployment", &deployment_id)
        .await;
    Ok(message("Deployment resumed"))
}

/// Rollout percent update parameters
#[derive(Debug, Deserialize)]
pub struct RolloutUpdate {
    pub rollout_percent: u8,
}

pub async fn update_rollout(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(deployment_id): Path<String>,
    Query(query): Query<RolloutUpdate>,
) -> Result<Json<MessageResponse>, ServiceError> {
    state
        .rollouts
        .update_rollout_percent(&deployment_id, query.rollout_percent)
        .await?;
    state
        .audit
        .record(&actor(&headers), "update_rollout", &deployment_id)
        .await;
    Ok(message(format!(
        "Rollout updated to {}%",
        query.rollout_percent
    )))
}

// ================================= OTA ================================== //

/// Device update poll request
#[derive(Debug, Deserialize)]
pub struct OtaCheckRequest {
    pub device_id: String,
    pub current_version: String,
}

pub async fn ota_check(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<OtaCheckRequest>,
) -> Result<Json<crate::ota::UpdateOffer>, ServiceError> {
    let offer = state
        .ota
        .check_update(&req.device_id, &req.current_version)
        .await?;
    Ok(Json(offer))
}

/// Stream the firmware binary with its integrity header.
pub async fn ota_download(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
) -> Result<Response, ServiceError> {
    let artifact = state.ota.download(&deployment_id).await?;

    let file = tokio::fs::File::open(&artifact.path).await.map_err(|_| {
        ServiceError::NotFound("Artifact file not found on disk".to_string())
    })?;
    let body = Body::from_stream(ReaderStream::new(file));

    Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"firmware_v{}.bin\"", artifact.version),
        )
        .header("X-Artifact-Hash", artifact.artifact_hash)
        .body(body)
        .map_err(|e| ServiceError::Server(e.to_string()))
}

pub async fn ota_manifest(
    State(state): State<Arc<ServerState>>,
    Path(build_id): Path<String>,
) -> Result<Json<crate::models::build::Manifest>, ServiceError> {
    let manifest = state.ota.manifest(&build_id).await?;
    Ok(Json(manifest))
}

/// Public key response
#[derive(Debug, Serialize)]
pub struct PublicKeyResponse {
    pub public_key_pem: String,
}

pub async fn ota_public_key(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<PublicKeyResponse>, ServiceError> {
    let public_key_pem = state.ota.public_key()?;
    Ok(Json(PublicKeyResponse { public_key_pem }))
}

/// Device OTA status report parameters
#[derive(Debug, Deserialize)]
pub struct OtaReportQuery {
    pub device_id: String,
    pub status: String,

    #[serde(default)]
    pub version: String,
}

pub async fn ota_report(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<OtaReportQuery>,
) -> Result<Json<MessageResponse>, ServiceError> {
    let version = (!query.version.is_empty()).then_some(query.version.as_str());
    state.ota.report(&query.device_id, &query.status, version).await?;
    Ok(message("Status reported"))
}

// =============================== DEVICES ================================ //

fn default_board_type() -> String {
    "ESP32-C3".to_string()
}

/// Device registration request
#[derive(Debug, Deserialize)]
pub struct DeviceCreate {
    pub name: String,

    #[serde(default = "default_board_type")]
    pub board_type: String,
}

pub async fn create_device(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(req): Json<DeviceCreate>,
) -> Result<Json<crate::models::device::Device>, ServiceError> {
    let device = state.devices.register(req.name, req.board_type).await;
    state
        .audit
        .record(&actor(&headers), "create_device", &device.id)
        .await;
    Ok(Json(device))
}

pub async fn list_devices(
    State(state): State<Arc<ServerState>>,
) -> Json<Vec<crate::models::device::Device>> {
    Json(state.devices.list().await)
}

pub async fn get_device(
    State(state): State<Arc<ServerState>>,
    Path(device_id): Path<String>,
) -> Result<Json<crate::models::device::Device>, ServiceError> {
    let device = state
        .devices
        .get(&device_id)
        .await
        .ok_or_else(|| ServiceError::NotFound("Device not found".to_string()))?;
    Ok(Json(device))
}

/// Telemetry heartbeat request
#[derive(Debug, Deserialize)]
pub struct TelemetryHeartbeat {
    pub device_id: String,
    pub firmware_version: String,

    #[serde(default)]
    pub rssi: i64,

    #[serde(default)]
    pub free_heap: u64,
}

pub async fn telemetry_heartbeat(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<TelemetryHeartbeat>,
) -> Result<Json<MessageResponse>, ServiceError> {
    state
        .devices
        .heartbeat(&req.device_id, &req.firmware_version, req.rssi, req.free_heap)
        .await?;
    Ok(message("Heartbeat received"))
}

// =============================== PROJECTS =============================== //

/// Project creation request
#[derive(Debug, Deserialize)]
pub struct ProjectCreate {
    pub name: String,

    #[serde(default = "default_board_type")]
    pub board_type: String,

    #[serde(default)]
    pub files: Vec<SourceFile>,
}

pub async fn create_project(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(req): Json<ProjectCreate>,
) -> Result<Json<crate::collab::Project>, ServiceError> {
    let project = state
        .projects
        .create(req.name, req.board_type, req.files)
        .await;
    state
        .audit
        .record(&actor(&headers), "create_project", &project.id)
        .await;
    Ok(Json(project))
}

pub async fn list_projects(
    State(state): State<Arc<ServerState>>,
) -> Json<Vec<crate::collab::Project>> {
    Json(state.projects.list().await)
}
