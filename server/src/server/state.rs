//! Server state

use std::sync::Arc;

use crate::artifacts::ArtifactStore;
use crate::build::orchestrator::BuildOrchestrator;
use crate::build::registry::BuildRegistry;
use crate::collab::{AuditSink, InMemoryProjects};
use crate::devices::DeviceStore;
use crate::ota::OtaHandler;
use crate::rollout::RolloutController;
use crate::signing::ManifestSigner;

/// Server state shared across handlers
pub struct ServerState {
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

impl ServerState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<BuildRegistry>,
        orchestrator: Arc<BuildOrchestrator>,
        artifacts: Arc<ArtifactStore>,
        signer: Arc<ManifestSigner>,
        devices: Arc<DeviceStore>,
        rollouts: Arc<RolloutController>,
        ota: Arc<OtaHandler>,
        projects: Arc<InMemoryProjects>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            registry,
            orchestrator,
            artifacts,
            signer,
            devices,
            rollouts,
            ota,
            projects,
            audit,
        }
    }
}
