//! Device models

use serde::{Deserialize, Serialize};

use crate::models::deployment::OtaStatus;

/// Fleet device view relevant to OTA rollout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Board type
    pub board_type: String,

    /// Firmware version currently running, per the device's last report
    pub firmware_version: String,

    /// Outcome of the device's most recent OTA activity
    pub last_ota_status: OtaStatus,

    /// The single outstanding deployment offer for this device.
    /// Empty when nothing is pending; last writer wins, no queue.
    #[serde(default)]
    pub pending_deployment_id: String,

    /// Last heartbeat timestamp
    pub last_seen: Option<String>,

    /// Signal strength from the last heartbeat
    pub rssi: i64,

    /// Free heap bytes from the last heartbeat
    pub free_heap: u64,

    /// Registration timestamp
    pub created_at: String,
}

impl Device {
    /// Create a freshly registered device
    pub fn new(id: String, name: String, board_type: String, created_at: String) -> Self {
        Self {
            id,
            name,
            board_type,
            firmware_version: "0.0.0".to_string(),
            last_ota_status: OtaStatus::None,
            pending_deployment_id: String::new(),
            last_seen: None,
            rssi: 0,
            free_heap: 0,
            created_at,
        }
    }
}
