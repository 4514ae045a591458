//! Rollout controller and OTA pull-protocol scenarios, driven end-to-end
//! through the controller, device store and OTA handler.

use std::sync::Arc;

use fleetforge::artifacts::ArtifactStore;
use fleetforge::build::registry::BuildRegistry;
use fleetforge::devices::DeviceStore;
use fleetforge::errors::ServiceError;
use fleetforge::models::build::{Build, BuildStatus, Manifest};
use fleetforge::models::deployment::{DeploymentStatus, OtaStatus, RolloutStrategy};
use fleetforge::models::device::Device;
use fleetforge::ota::OtaHandler;
use fleetforge::rollout::{CreateDeployment, RolloutController};
use fleetforge::signing::ManifestSigner;
use fleetforge::utils::sha256_hash;
use tempfile::TempDir;

struct Fleet {
    registry: Arc<BuildRegistry>,
    devices: Arc<DeviceStore>,
    rollouts: Arc<RolloutController>,
    ota: Arc<OtaHandler>,
    artifacts: Arc<ArtifactStore>,
    store: TempDir,
}

async fn fleet() -> Fleet {
    let store = tempfile::tempdir().unwrap();
    let registry = Arc::new(BuildRegistry::new());
    let devices = Arc::new(DeviceStore::new());
    let artifacts = Arc::new(ArtifactStore::new(store.path().join("artifacts")));
    artifacts.ensure_layout().await.unwrap();
    let rollouts = Arc::new(RolloutController::new(registry.clone(), devices.clone()));
    let ota = Arc::new(OtaHandler::new(
        devices.clone(),
        rollouts.clone(),
        registry.clone(),
        artifacts.clone(),
        Arc::new(ManifestSigner::unsigned()),
    ));
    Fleet {
        registry,
        devices,
        rollouts,
        ota,
        artifacts,
        store,
    }
}

/// Insert a build record in the given terminal/initial state.
async fn seed_build(fleet: &Fleet, id: &str, status: BuildStatus) -> Build {
    let mut build = Build::queued(
        id.to_string(),
        "p1".to_string(),
        "demo".to_string(),
        "ESP32-C3".to_string(),
        "1.2.0".to_string(),
        "2026-01-01T00:00:00Z".to_string(),
        "[00:00:00] [INFO] Build queued for demo v1.2.0 (ESP32-C3)".to_string(),
    );
    build.status = status;
    if status == BuildStatus::Success {
        build.artifact_hash = sha256_hash(b"FIRMWARE");
        build.artifact_size = 8;
        build.artifact_file = format!("{}.bin", id);
        build.manifest_file = format!("{}_manifest.json", id);
        build.manifest = Some(Manifest {
            build_id: id.to_string(),
            version: "1.2.0".to_string(),
            board_type: "ESP32-C3".to_string(),
            artifact_file: format!("{}.bin", id),
            artifact_size: 8,
            artifact_hash_sha256: build.artifact_hash.clone(),
            built_at: "2026-01-01T00:01:00Z".to_string(),
            signature: String::new(),
        });
        build.completed_at = Some("2026-01-01T00:01:00Z".to_string());
    }
    fleet.registry.register(build.clone()).await;
    build
}

async fn seed_device(fleet: &Fleet, id: &str) -> Device {
    let device = Device::new(
        id.to_string(),
        id.to_string(),
        "ESP32-C3".to_string(),
        "2026-01-01T00:00:00Z".to_string(),
    );
    fleet.devices.insert(device.clone()).await;
    device
}

fn create_req(build_id: &str, targets: &[&str]) -> CreateDeployment {
    CreateDeployment {
        build_id: build_id.to_string(),
        target_device_ids: targets.iter().map(|s| s.to_string()).collect(),
        rollout_percent: 100,
        rollout_strategy: RolloutStrategy::Immediate,
    }
}

#[tokio::test]
async fn create_requires_a_successful_build() {
    let fleet = fleet().await;
    seed_device(&fleet, "d1").await;

    for status in [BuildStatus::Queued, BuildStatus::Failed] {
        let id = format!("b-{:?}", status);
        seed_build(&fleet, &id, status).await;

        let err = fleet
            .rollouts
            .create(create_req(&id, &["d1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PreconditionFailed(_)));
    }

    // No deployment record, no device mutation.
    assert!(fleet.rollouts.list().await.is_empty());
    let device = fleet.devices.get("d1").await.unwrap();
    assert_eq!(device.pending_deployment_id, "");
    assert_eq!(device.last_ota_status, OtaStatus::None);

    // Unknown build is NotFound, not PreconditionFailed.
    let err = fleet
        .rollouts
        .create(create_req("ghost", &["d1"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn create_validates_rollout_percent_before_any_mutation() {
    let fleet = fleet().await;
    seed_build(&fleet, "b1", BuildStatus::Success).await;
    seed_device(&fleet, "d1").await;

    let mut req = create_req("b1", &["d1"]);
    req.rollout_percent = 7;
    let err = fleet.rollouts.create(req).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
    assert!(fleet.rollouts.list().await.is_empty());
    assert_eq!(fleet.devices.get("d1").await.unwrap().pending_deployment_id, "");
}

#[tokio::test]
async fn create_marks_targets_pending_and_supersedes_prior_offers() {
    let fleet = fleet().await;
    seed_build(&fleet, "b1", BuildStatus::Success).await;
    seed_device(&fleet, "d1").await;
    seed_device(&fleet, "d2").await;

    let first = fleet
        .rollouts
        .create(create_req("b1", &["d1", "d2"]))
        .await
        .unwrap();
    assert_eq!(first.status, DeploymentStatus::Active);
    assert_eq!(first.device_statuses.get("d1"), Some(&OtaStatus::Pending));
    assert_eq!(first.device_statuses.get("d2"), Some(&OtaStatus::Pending));
    assert_eq!(first.artifact_hash, sha256_hash(b"FIRMWARE"));

    let d1 = fleet.devices.get("d1").await.unwrap();
    assert_eq!(d1.pending_deployment_id, first.id);
    assert_eq!(d1.last_ota_status, OtaStatus::Pending);

    // A second deployment to d1 supersedes the first offer: last writer
    // wins, no queue.
    let second = fleet.rollouts.create(create_req("b1", &["d1"])).await.unwrap();
    let d1 = fleet.devices.get("d1").await.unwrap();
    assert_eq!(d1.pending_deployment_id, second.id);

    // d2 still points at the first deployment.
    let d2 = fleet.devices.get("d2").await.unwrap();
    assert_eq!(d2.pending_deployment_id, first.id);
}

#[tokio::test]
async fn device_success_report_updates_device_and_mirror() {
    let fleet = fleet().await;
    seed_build(&fleet, "b1", BuildStatus::Success).await;
    seed_device(&fleet, "d1").await;
    seed_device(&fleet, "d2").await;

    let deployment = fleet
        .rollouts
        .create(create_req("b1", &["d1", "d2"]))
        .await
        .unwrap();

    fleet
        .ota
        .report("d1", "success", Some("1.2.0"))
        .await
        .unwrap();

    let d1 = fleet.devices.get("d1").await.unwrap();
    assert_eq!(d1.firmware_version, "1.2.0");
    assert_eq!(d1.pending_deployment_id, "");
    assert_eq!(d1.last_ota_status, OtaStatus::Success);

    let deployment = fleet.rollouts.get(&deployment.id).await.unwrap();
    assert_eq!(deployment.device_statuses.get("d1"), Some(&OtaStatus::Success));
    assert_eq!(deployment.device_statuses.get("d2"), Some(&OtaStatus::Pending));

    // The aggregate status never moves on device reports.
    assert_eq!(deployment.status, DeploymentStatus::Active);
}

#[tokio::test]
async fn report_validates_status_and_device() {
    let fleet = fleet().await;
    seed_device(&fleet, "d1").await;

    let err = fleet.ota.report("d1", "exploded", None).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    let err = fleet.ota.report("ghost", "success", None).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn failed_report_clears_pointer_but_keeps_version() {
    let fleet = fleet().await;
    seed_build(&fleet, "b1", BuildStatus::Success).await;
    seed_device(&fleet, "d1").await;
    fleet.rollouts.create(create_req("b1", &["d1"])).await.unwrap();

    fleet.ota.report("d1", "failed", None).await.unwrap();

    let d1 = fleet.devices.get("d1").await.unwrap();
    assert_eq!(d1.last_ota_status, OtaStatus::Failed);
    assert_eq!(d1.pending_deployment_id, "");
    assert_eq!(d1.firmware_version, "0.0.0");
}

#[tokio::test]
async fn rollout_percent_update_is_whitelisted_and_leaves_statuses_alone() {
    let fleet = fleet().await;
    seed_build(&fleet, "b1", BuildStatus::Success).await;
    seed_device(&fleet, "d1").await;
    let deployment = fleet.rollouts.create(create_req("b1", &["d1"])).await.unwrap();

    let err = fleet
        .rollouts
        .update_rollout_percent(&deployment.id, 7)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
    assert_eq!(
        fleet.rollouts.get(&deployment.id).await.unwrap().rollout_percent,
        100
    );

    let updated = fleet
        .rollouts
        .update_rollout_percent(&deployment.id, 20)
        .await
        .unwrap();
    assert_eq!(updated.rollout_percent, 20);
    assert_eq!(updated.device_statuses.get("d1"), Some(&OtaStatus::Pending));
}

#[tokio::test]
async fn rollback_clears_every_target_pointer_and_is_idempotent() {
    let fleet = fleet().await;
    seed_build(&fleet, "b1", BuildStatus::Success).await;
    seed_device(&fleet, "d1").await;
    seed_device(&fleet, "d2").await;
    let deployment = fleet
        .rollouts
        .create(create_req("b1", &["d1", "d2"]))
        .await
        .unwrap();

    // d1 already finished successfully; rollback still clears it.
    fleet.ota.report("d1", "success", Some("1.2.0")).await.unwrap();

    fleet
        .rollouts
        .rollback(&deployment.id, "bad power draw")
        .await
        .unwrap();

    let rolled = fleet.rollouts.get(&deployment.id).await.unwrap();
    assert_eq!(rolled.status, DeploymentStatus::RolledBack);
    assert_eq!(rolled.rollback_reason, "bad power draw");
    assert!(rolled.rolled_back_at.is_some());

    for id in ["d1", "d2"] {
        let device = fleet.devices.get(id).await.unwrap();
        assert_eq!(device.pending_deployment_id, "", "{} pointer cleared", id);
        assert_eq!(device.last_ota_status, OtaStatus::RolledBack);
    }

    // Second rollback is a no-op success and the reason is untouched.
    fleet.rollouts.rollback(&deployment.id, "again").await.unwrap();
    let rolled = fleet.rollouts.get(&deployment.id).await.unwrap();
    assert_eq!(rolled.rollback_reason, "bad power draw");

    // Unknown deployment is NotFound.
    let err = fleet.rollouts.rollback("ghost", "").await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn pause_hides_the_offer_and_resume_restores_it() {
    let fleet = fleet().await;
    seed_build(&fleet, "b1", BuildStatus::Success).await;
    seed_device(&fleet, "d1").await;
    let deployment = fleet.rollouts.create(create_req("b1", &["d1"])).await.unwrap();

    let offer = fleet.ota.check_update("d1", "0.0.0").await.unwrap();
    assert!(offer.update_available);
    assert_eq!(offer.deployment_id.as_deref(), Some(deployment.id.as_str()));
    assert_eq!(offer.version.as_deref(), Some("1.2.0"));
    assert_eq!(
        offer.download_url.unwrap(),
        format!("/api/ota/download/{}", deployment.id)
    );

    // Pausing hides the offer without touching the device pointer.
    fleet.rollouts.pause(&deployment.id).await.unwrap();
    let offer = fleet.ota.check_update("d1", "0.0.0").await.unwrap();
    assert!(!offer.update_available);
    assert_eq!(
        fleet.devices.get("d1").await.unwrap().pending_deployment_id,
        deployment.id
    );
    assert_eq!(
        fleet.devices.get("d1").await.unwrap().last_ota_status,
        OtaStatus::Pending
    );

    // Pausing twice is a no-op.
    fleet.rollouts.pause(&deployment.id).await.unwrap();

    // Resume alone makes the same device poll see the offer again.
    fleet.rollouts.resume(&deployment.id).await.unwrap();
    let offer = fleet.ota.check_update("d1", "0.0.0").await.unwrap();
    assert!(offer.update_available);

    // Rolled-back deployments cannot be paused or resumed back to life.
    fleet.rollouts.rollback(&deployment.id, "done").await.unwrap();
    assert!(matches!(
        fleet.rollouts.resume(&deployment.id).await.unwrap_err(),
        ServiceError::PreconditionFailed(_)
    ));
    assert!(matches!(
        fleet.rollouts.pause(&deployment.id).await.unwrap_err(),
        ServiceError::PreconditionFailed(_)
    ));
}

#[tokio::test]
async fn check_update_edge_cases() {
    let fleet = fleet().await;

    // Unknown device.
    let err = fleet.ota.check_update("ghost", "0.0.0").await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    // No pending deployment.
    seed_device(&fleet, "d1").await;
    let offer = fleet.ota.check_update("d1", "0.0.0").await.unwrap();
    assert!(!offer.update_available);
    assert!(offer.deployment_id.is_none());

    // Dangling pointer at a deployment that no longer exists.
    let mut device = Device::new(
        "d2".to_string(),
        "d2".to_string(),
        "ESP32-C3".to_string(),
        "2026-01-01T00:00:00Z".to_string(),
    );
    device.pending_deployment_id = "gone".to_string();
    fleet.devices.insert(device).await;
    let offer = fleet.ota.check_update("d2", "0.0.0").await.unwrap();
    assert!(!offer.update_available);
}

#[tokio::test]
async fn download_resolves_the_full_chain_or_fails_not_found() {
    let fleet = fleet().await;
    seed_build(&fleet, "b1", BuildStatus::Success).await;
    seed_device(&fleet, "d1").await;
    let deployment = fleet.rollouts.create(create_req("b1", &["d1"])).await.unwrap();

    // Artifact not on disk yet.
    let err = fleet.ota.download(&deployment.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    // Stage the binary and resolve the chain.
    let source = fleet.store.path().join("fw.bin");
    tokio::fs::write(&source, b"FIRMWARE").await.unwrap();
    fleet.artifacts.store_binary("b1", &source).await.unwrap();

    let artifact = fleet.ota.download(&deployment.id).await.unwrap();
    assert_eq!(artifact.version, "1.2.0");
    assert_eq!(artifact.artifact_hash, sha256_hash(b"FIRMWARE"));
    let bytes = tokio::fs::read(&artifact.path).await.unwrap();
    assert_eq!(bytes, b"FIRMWARE");

    // Unknown deployment.
    let err = fleet.ota.download("ghost").await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn manifest_and_public_key_lookup() {
    let fleet = fleet().await;
    seed_build(&fleet, "b1", BuildStatus::Success).await;
    seed_build(&fleet, "b2", BuildStatus::Failed).await;

    let manifest = fleet.ota.manifest("b1").await.unwrap();
    assert_eq!(manifest.build_id, "b1");
    assert_eq!(manifest.artifact_hash_sha256, sha256_hash(b"FIRMWARE"));

    // Failed build has no manifest.
    let err = fleet.ota.manifest("b2").await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    // Unsigned deployments have no public key to serve.
    let err = fleet.ota.public_key().unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn mirror_tolerates_multiple_active_deployments() {
    let fleet = fleet().await;
    seed_build(&fleet, "b1", BuildStatus::Success).await;
    seed_device(&fleet, "d1").await;

    let first = fleet.rollouts.create(create_req("b1", &["d1"])).await.unwrap();
    let second = fleet.rollouts.create(create_req("b1", &["d1"])).await.unwrap();

    fleet.ota.report("d1", "applied", None).await.unwrap();

    // Both active deployments targeting d1 mirror the report.
    for id in [&first.id, &second.id] {
        let deployment = fleet.rollouts.get(id).await.unwrap();
        assert_eq!(deployment.device_statuses.get("d1"), Some(&OtaStatus::Applied));
    }
}
