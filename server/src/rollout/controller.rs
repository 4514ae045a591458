//! Deployment rollout controller
//!
//! Owns deployment records and their operator-driven state transitions.
//! Device reports only ever touch individual `device_statuses` entries,
//! never the aggregate status. The rollout percent is validated and
//! stored but deliberately not consulted by the per-device offer logic.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::build::registry::BuildRegistry;
use crate::devices::DeviceStore;
use crate::errors::ServiceError;
use crate::models::build::BuildStatus;
use crate::models::deployment::{
    Deployment, DeploymentStatus, OtaStatus, RolloutStrategy, ROLLOUT_STEPS,
};
use crate::utils::{generate_uuid, now_iso};

/// Deployment creation request
#[derive(Debug, Clone)]
pub struct CreateDeployment {
    pub build_id: String,
    pub target_device_ids: Vec<String>,
    pub rollout_percent: u8,
    pub rollout_strategy: RolloutStrategy,
}

pub struct RolloutController {
    deployments: RwLock<HashMap<String, Deployment>>,
    registry: Arc<BuildRegistry>,
    devices: Arc<DeviceStore>,
}

impl RolloutController {
    pub fn new(registry: Arc<BuildRegistry>, devices: Arc<DeviceStore>) -> Self {
        Self {
            deployments: RwLock::new(HashMap::new()),
            registry,
            devices,
        }
    }

    fn validate_percent(percent: u8) -> Result<(), ServiceError> {
        if !ROLLOUT_STEPS.contains(&percent) {
            return Err(ServiceError::Validation(format!(
                "Rollout percent must be one of {:?}, got {}",
                ROLLOUT_STEPS, percent
            )));
        }
        Ok(())
    }

    /// Create a deployment for a successful build. Every validation runs
    /// before any state is touched; on success each target device's
    /// status starts at `pending` and its offer pointer is repointed here,
    /// superseding any prior pending deployment.
    pub async fn create(&self, req: CreateDeployment) -> Result<Deployment, ServiceError> {
        Self::validate_percent(req.rollout_percent)?;

        let build = self
            .registry
            .get(&req.build_id)
            .await
            .ok_or_else(|| ServiceError::NotFound("Build not found".to_string()))?;
        if build.status != BuildStatus::Success {
            return Err(ServiceError::PreconditionFailed(
                "Build not successful".to_string(),
            ));
        }

        let device_statuses: HashMap<String, OtaStatus> = req
            .target_device_ids
            .iter()
            .map(|id| (id.clone(), OtaStatus::Pending))
            .collect();

        let deployment = Deployment {
            id: generate_uuid(),
            build_id: req.build_id,
            version: build.version.clone(),
            project_name: build.project_name.clone(),
            target_device_ids: req.target_device_ids,
            device_statuses,
            rollout_percent: req.rollout_percent,
            rollout_strategy: req.rollout_strategy,
            status: DeploymentStatus::Active,
            artifact_hash: build.artifact_hash.clone(),
            created_at: now_iso(),
            rollback_reason: String::new(),
            rolled_back_at: None,
        };

        {
            let mut deployments = self.deployments.write().await;
            deployments.insert(deployment.id.clone(), deployment.clone());
        }
        self.devices
            .offer_deployment(&deployment.id, &deployment.target_device_ids)
            .await;

        info!(
            "Deployment {} created: v{} to {} device(s)",
            deployment.id,
            deployment.version,
            deployment.target_device_ids.len()
        );
        Ok(deployment)
    }

    pub async fn get(&self, id: &str) -> Option<Deployment> {
        let deployments = self.deployments.read().await;
        deployments.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Deployment> {
        let deployments = self.deployments.read().await;
        let mut all: Vec<Deployment> = deployments.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Withdraw a deployment and clear the offer pointer on every
    /// originally-targeted device, including those that already reported
    /// success. Idempotent: rolling back twice is a no-op success.
    pub async fn rollback(&self, id: &str, reason: &str) -> Result<(), ServiceError> {
        let targets = {
            let mut deployments = self.deployments.write().await;
            let deployment = deployments
                .get_mut(id)
                .ok_or_else(|| ServiceError::NotFound("Deployment not found".to_string()))?;
            if deployment.status == DeploymentStatus::RolledBack {
                return Ok(());
            }
            deployment.status = DeploymentStatus::RolledBack;
            deployment.rollback_reason = reason.to_string();
            deployment.rolled_back_at = Some(now_iso());
            deployment.target_device_ids.clone()
        };

        self.devices.withdraw_deployment(&targets).await;
        info!("Deployment {} rolled back: {}", id, reason);
        Ok(())
    }

    /// Stop offering the deployment without touching per-device statuses
    /// or offer pointers. Pausing a paused deployment is a no-op.
    pub async fn pause(&self, id: &str) -> Result<(), ServiceError> {
        let mut deployments = self.deployments.write().await;
        let deployment = deployments
            .get_mut(id)
            .ok_or_else(|| ServiceError::NotFound("Deployment not found".to_string()))?;
        match deployment.status {
            DeploymentStatus::Active | DeploymentStatus::Paused => {
                deployment.status = DeploymentStatus::Paused;
                Ok(())
            }
            DeploymentStatus::RolledBack => Err(ServiceError::PreconditionFailed(
                "Deployment is rolled back".to_string(),
            )),
        }
    }

    /// Resume offering a paused deployment. Resuming an active deployment
    /// is a no-op; a rolled-back deployment stays withdrawn.
    pub async fn resume(&self, id: &str) -> Result<(), ServiceError> {
        let mut deployments = self.deployments.write().await;
        let deployment = deployments
            .get_mut(id)
            .ok_or_else(|| ServiceError::NotFound("Deployment not found".to_string()))?;
        match deployment.status {
            DeploymentStatus::Active | DeploymentStatus::Paused => {
                deployment.status = DeploymentStatus::Active;
                Ok(())
            }
            DeploymentStatus::RolledBack => Err(ServiceError::PreconditionFailed(
                "Deployment is rolled back".to_string(),
            )),
        }
    }

    /// Change the staged rollout percentage. The whitelist is enforced
    /// before any lookup; per-device statuses are never touched.
    pub async fn update_rollout_percent(
        &self,
        id: &str,
        percent: u8,
    ) -> Result<Deployment, ServiceError> {
        Self::validate_percent(percent)?;

        let mut deployments = self.deployments.write().await;
        let deployment = deployments
            .get_mut(id)
            .ok_or_else(|| ServiceError::NotFound("Deployment not found".to_string()))?;
        deployment.rollout_percent = percent;
        Ok(deployment.clone())
    }

    /// Fold a device report into the fleet: the device's global view
    /// first, then the `device_statuses` entry of every currently-active
    /// deployment targeting the device. A device belongs to at most one
    /// active deployment in steady state, but more than one is tolerated.
    pub async fn record_device_report(
        &self,
        device_id: &str,
        status: OtaStatus,
        version: Option<&str>,
    ) -> Result<(), ServiceError> {
        self.devices.apply_report(device_id, status, version).await?;

        let mut deployments = self.deployments.write().await;
        for deployment in deployments.values_mut() {
            if deployment.status == DeploymentStatus::Active
                && deployment.target_device_ids.iter().any(|id| id.as_str() == device_id)
            {
                deployment
                    .device_statuses
                    .insert(device_id.to_string(), status);
            }
        }
        Ok(())
    }
}
