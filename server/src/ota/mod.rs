//! Device OTA pull protocol
//!
//! Decides, per polling device, whether an update is currently offered,
//! and resolves the deployment → build → artifact chain for downloads.
//! Offers are not filtered by rollout percent: the percent is an
//! operator-side staging value, not an automatic per-device gate.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::artifacts::ArtifactStore;
use crate::build::registry::BuildRegistry;
use crate::devices::DeviceStore;
use crate::errors::ServiceError;
use crate::models::build::Manifest;
use crate::models::deployment::{DeploymentStatus, OtaStatus};
use crate::rollout::RolloutController;
use crate::signing::ManifestSigner;

/// Answer to a device's update poll
#[derive(Debug, Clone, Serialize)]
pub struct UpdateOffer {
    pub update_available: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_hash: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

impl UpdateOffer {
    fn none() -> Self {
        Self {
            update_available: false,
            deployment_id: None,
            version: None,
            artifact_hash: None,
            download_url: None,
        }
    }
}

/// Resolved download target
#[derive(Debug, Clone)]
pub struct DownloadArtifact {
    pub path: PathBuf,
    pub artifact_hash: String,
    pub version: String,
}

pub struct OtaHandler {
    devices: Arc<DeviceStore>,
    rollouts: Arc<RolloutController>,
    registry: Arc<BuildRegistry>,
    artifacts: Arc<ArtifactStore>,
    signer: Arc<ManifestSigner>,
}

impl OtaHandler {
    pub fn new(
        devices: Arc<DeviceStore>,
        rollouts: Arc<RolloutController>,
        registry: Arc<BuildRegistry>,
        artifacts: Arc<ArtifactStore>,
        signer: Arc<ManifestSigner>,
    ) -> Self {
        Self {
            devices,
            rollouts,
            registry,
            artifacts,
            signer,
        }
    }

    /// Decide whether the device currently has an update offered.
    /// Paused and rolled-back deployments are invisible even though pause
    /// leaves the device's offer pointer in place.
    pub async fn check_update(
        &self,
        device_id: &str,
        _current_version: &str,
    ) -> Result<UpdateOffer, ServiceError> {
        let device = self
            .devices
            .get(device_id)
            .await
            .ok_or_else(|| ServiceError::NotFound("Device not found".to_string()))?;

        if device.pending_deployment_id.is_empty() {
            return Ok(UpdateOffer::none());
        }

        let Some(deployment) = self.rollouts.get(&device.pending_deployment_id).await else {
            return Ok(UpdateOffer::none());
        };
        if deployment.status != DeploymentStatus::Active {
            return Ok(UpdateOffer::none());
        }

        Ok(UpdateOffer {
            update_available: true,
            deployment_id: Some(deployment.id.clone()),
            version: Some(deployment.version.clone()),
            artifact_hash: Some(deployment.artifact_hash.clone()),
            download_url: Some(format!("/api/ota/download/{}", deployment.id)),
        })
    }

    /// Resolve a download request through deployment → build → artifact.
    /// Any broken link in the chain is `NotFound`.
    pub async fn download(&self, deployment_id: &str) -> Result<DownloadArtifact, ServiceError> {
        let deployment = self
            .rollouts
            .get(deployment_id)
            .await
            .ok_or_else(|| ServiceError::NotFound("Deployment not found".to_string()))?;

        let build = self
            .registry
            .get(&deployment.build_id)
            .await
            .ok_or_else(|| ServiceError::NotFound("Build not found".to_string()))?;
        if build.artifact_file.is_empty() {
            return Err(ServiceError::NotFound(
                "No firmware artifact available".to_string(),
            ));
        }

        if !self.artifacts.has_binary(&build.id).await {
            return Err(ServiceError::NotFound(
                "Artifact file not found on disk".to_string(),
            ));
        }

        Ok(DownloadArtifact {
            path: self.artifacts.binary_path(&build.id),
            artifact_hash: build.artifact_hash,
            version: deployment.version,
        })
    }

    /// Signed manifest for a build.
    pub async fn manifest(&self, build_id: &str) -> Result<Manifest, ServiceError> {
        let build = self
            .registry
            .get(build_id)
            .await
            .ok_or_else(|| ServiceError::NotFound("Build not found".to_string()))?;
        build.manifest.ok_or_else(|| {
            ServiceError::NotFound("No manifest available for this build".to_string())
        })
    }

    /// Signer public key for offline verification by devices.
    pub fn public_key(&self) -> Result<String, ServiceError> {
        self.signer
            .public_key_pem()
            .map(str::to_string)
            .ok_or_else(|| ServiceError::NotFound("Public key not configured".to_string()))
    }

    /// Fold a device-reported OTA status into device and deployment state.
    pub async fn report(
        &self,
        device_id: &str,
        status: &str,
        version: Option<&str>,
    ) -> Result<(), ServiceError> {
        let status = OtaStatus::from_report(status).ok_or_else(|| {
            ServiceError::Validation(format!(
                "Status must be one of downloading, applied, success, failed; got '{}'",
                status
            ))
        })?;
        self.rollouts
            .record_device_report(device_id, status, version)
            .await
    }
}
