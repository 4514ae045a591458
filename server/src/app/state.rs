//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::artifacts::ArtifactStore;
use crate::build::orchestrator::BuildOrchestrator;
use crate::build::registry::BuildRegistry;
use crate::collab::{AuditSink, InMemoryProjects, TracingAudit};
use crate::devices::DeviceStore;
use crate::errors::ServiceError;
use crate::ota::OtaHandler;
use crate::rollout::RolloutController;
use crate::signing::ManifestSigner;

/// Main application state: the component graph of the service
pub struct AppState {
    pub registry: Arc<BuildRegistry>,
    pub orchestrator: Arc<BuildOrchestrator>,
    pub artifacts: Arc<ArtifactStore>,
    pub signer: Arc<ManifestSigner>,
    pub devices: Arc<DeviceStore>,
    pub rollouts: Arc<RolloutController>,
    pub ota: Arc<OtaHandler>,
    pub projects: Arc<InMemoryProjects>,
    pub audit: Arc<dyn AuditSink>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Arc<Self>, ServiceError> {
        info!("Initializing application state...");

        let artifacts = Arc::new(ArtifactStore::new(options.storage.artifacts_dir.clone()));
        artifacts.ensure_layout().await?;

        // Key absence is the documented degraded state, not a startup
        // failure.
        let signer = Arc::new(ManifestSigner::load(options.storage.signing_key.as_deref()).await?);

        let registry = Arc::new(BuildRegistry::new());
        let orchestrator = Arc::new(BuildOrchestrator::new(
            registry.clone(),
            artifacts.clone(),
            signer.clone(),
            options.build.clone(),
        ));

        let devices = Arc::new(DeviceStore::new());
        let rollouts = Arc::new(RolloutController::new(registry.clone(), devices.clone()));
        let ota = Arc::new(OtaHandler::new(
            devices.clone(),
            rollouts.clone(),
            registry.clone(),
            artifacts.clone(),
            signer.clone(),
        ));

        let projects = Arc::new(InMemoryProjects::new());
        let audit: Arc<dyn AuditSink> = Arc::new(TracingAudit);

        Ok(Arc::new(Self {
            registry,
            orchestrator,
            artifacts,
            signer,
            devices,
            rollouts,
            ota,
            projects,
            audit,
        }))
    }
}
