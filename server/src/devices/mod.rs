//! Fleet device inventory
//!
//! Owns the OTA-relevant device view. A device has at most one
//! outstanding deployment offer (`pending_deployment_id`); offering a new
//! deployment supersedes the previous pointer, last writer wins, no queue.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::errors::ServiceError;
use crate::models::deployment::OtaStatus;
use crate::models::device::Device;
use crate::utils::{generate_uuid, now_iso};

pub struct DeviceStore {
    devices: RwLock<HashMap<String, Device>>,
}

impl DeviceStore {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new device and return it.
    pub async fn register(&self, name: String, board_type: String) -> Device {
        let device = Device::new(generate_uuid(), name, board_type, now_iso());
        let mut devices = self.devices.write().await;
        devices.insert(device.id.clone(), device.clone());
        device
    }

    /// Insert a pre-built device record (tests seed known ids this way).
    pub async fn insert(&self, device: Device) {
        let mut devices = self.devices.write().await;
        devices.insert(device.id.clone(), device);
    }

    pub async fn get(&self, id: &str) -> Option<Device> {
        let devices = self.devices.read().await;
        devices.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Device> {
        let devices = self.devices.read().await;
        let mut all: Vec<Device> = devices.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Point each target device's single outstanding offer at the given
    /// deployment, superseding any prior pending offer. Unknown ids are
    /// skipped.
    pub async fn offer_deployment(&self, deployment_id: &str, target_ids: &[String]) {
        let mut devices = self.devices.write().await;
        for id in target_ids {
            if let Some(device) = devices.get_mut(id) {
                device.pending_deployment_id = deployment_id.to_string();
                device.last_ota_status = OtaStatus::Pending;
            }
        }
    }

    /// Clear the offer pointer on every target device after a rollback,
    /// regardless of what each device already reported.
    pub async fn withdraw_deployment(&self, target_ids: &[String]) {
        let mut devices = self.devices.write().await;
        for id in target_ids {
            if let Some(device) = devices.get_mut(id) {
                device.pending_deployment_id = String::new();
                device.last_ota_status = OtaStatus::RolledBack;
            }
        }
    }

    /// Fold a device's OTA report into its fleet-wide view: status always,
    /// firmware version on success, pointer cleared on success or failure.
    pub async fn apply_report(
        &self,
        device_id: &str,
        status: OtaStatus,
        version: Option<&str>,
    ) -> Result<Device, ServiceError> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| ServiceError::NotFound("Device not found".to_string()))?;

        device.last_ota_status = status;
        match status {
            OtaStatus::Success => {
                if let Some(version) = version {
                    if !version.is_empty() {
                        device.firmware_version = version.to_string();
                    }
                }
                device.pending_deployment_id = String::new();
            }
            OtaStatus::Failed => {
                device.pending_deployment_id = String::new();
            }
            _ => {}
        }
        Ok(device.clone())
    }

    /// Fold a telemetry heartbeat into the device view.
    pub async fn heartbeat(
        &self,
        device_id: &str,
        firmware_version: &str,
        rssi: i64,
        free_heap: u64,
    ) -> Result<Device, ServiceError> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| ServiceError::NotFound("Device not found".to_string()))?;

        device.last_seen = Some(now_iso());
        device.rssi = rssi;
        device.free_heap = free_heap;
        if !firmware_version.is_empty() {
            device.firmware_version = firmware_version.to_string();
        }
        Ok(device.clone())
    }
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offer_supersedes_previous_pointer() {
        let store = DeviceStore::new();
        let device = store.register("d1".into(), "ESP32-C3".into()).await;
        let ids = vec![device.id.clone()];

        store.offer_deployment("dep-1", &ids).await;
        store.offer_deployment("dep-2", &ids).await;

        let device = store.get(&device.id).await.unwrap();
        assert_eq!(device.pending_deployment_id, "dep-2");
        assert_eq!(device.last_ota_status, OtaStatus::Pending);
    }

    #[tokio::test]
    async fn test_report_success_updates_version_and_clears_pointer() {
        let store = DeviceStore::new();
        let device = store.register("d1".into(), "ESP32-C3".into()).await;
        store.offer_deployment("dep-1", &[device.id.clone()]).await;

        let updated = store
            .apply_report(&device.id, OtaStatus::Success, Some("1.2.0"))
            .await
            .unwrap();
        assert_eq!(updated.firmware_version, "1.2.0");
        assert_eq!(updated.pending_deployment_id, "");
        assert_eq!(updated.last_ota_status, OtaStatus::Success);
    }

    #[tokio::test]
    async fn test_report_downloading_keeps_pointer() {
        let store = DeviceStore::new();
        let device = store.register("d1".into(), "ESP32-C3".into()).await;
        store.offer_deployment("dep-1", &[device.id.clone()]).await;

        let updated = store
            .apply_report(&device.id, OtaStatus::Downloading, None)
            .await
            .unwrap();
        assert_eq!(updated.pending_deployment_id, "dep-1");
        assert_eq!(updated.last_ota_status, OtaStatus::Downloading);
    }

    #[tokio::test]
    async fn test_report_unknown_device_is_not_found() {
        let store = DeviceStore::new();
        let err = store
            .apply_report("ghost", OtaStatus::Success, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
