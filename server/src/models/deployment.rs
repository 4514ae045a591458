//! Deployment models

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Allowed staged rollout percentages
pub const ROLLOUT_STEPS: [u8; 4] = [5, 20, 50, 100];

/// Aggregate deployment state, operator-driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Offered to polling devices
    Active,

    /// Temporarily withheld; device pointers stay in place
    Paused,

    /// Terminal: withdrawn, device pointers cleared
    RolledBack,
}

/// Rollout strategy selected at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStrategy {
    Immediate,
    Canary,
}

impl Default for RolloutStrategy {
    fn default() -> Self {
        RolloutStrategy::Immediate
    }
}

/// Per-device delivery state within a deployment, and the device's
/// fleet-wide OTA status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtaStatus {
    /// No OTA activity yet (device view only)
    None,
    Pending,
    Downloading,
    Applied,
    Success,
    Failed,
    RolledBack,
}

impl OtaStatus {
    /// Parse a device-reported status. Devices may report only the four
    /// in-flight/outcome states; anything else is rejected upstream.
    pub fn from_report(s: &str) -> Option<Self> {
        match s {
            "downloading" => Some(OtaStatus::Downloading),
            "applied" => Some(OtaStatus::Applied),
            "success" => Some(OtaStatus::Success),
            "failed" => Some(OtaStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OtaStatus::None => "none",
            OtaStatus::Pending => "pending",
            OtaStatus::Downloading => "downloading",
            OtaStatus::Applied => "applied",
            OtaStatus::Success => "success",
            OtaStatus::Failed => "failed",
            OtaStatus::RolledBack => "rolled_back",
        }
    }
}

/// A rollout of one build's artifact to a fixed set of devices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique deployment ID
    pub id: String,

    /// Build whose artifact is being rolled out
    pub build_id: String,

    /// Version carried by the build
    pub version: String,

    /// Project display name (denormalized for listings)
    pub project_name: String,

    /// Target device set, immutable after creation
    pub target_device_ids: Vec<String>,

    /// Per-device delivery status
    pub device_statuses: HashMap<String, OtaStatus>,

    /// Staged rollout percentage; informational for operator decisions,
    /// not consulted by the per-device offer logic
    pub rollout_percent: u8,

    /// Rollout strategy
    pub rollout_strategy: RolloutStrategy,

    /// Aggregate state
    pub status: DeploymentStatus,

    /// Artifact hash copied from the build for device verification
    pub artifact_hash: String,

    /// Creation timestamp
    pub created_at: String,

    /// Operator-supplied rollback reason; empty unless rolled back
    #[serde(default)]
    pub rollback_reason: String,

    /// When the deployment was rolled back
    pub rolled_back_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_status_parsing() {
        assert_eq!(OtaStatus::from_report("success"), Some(OtaStatus::Success));
        assert_eq!(OtaStatus::from_report("downloading"), Some(OtaStatus::Downloading));
        assert_eq!(OtaStatus::from_report("pending"), None);
        assert_eq!(OtaStatus::from_report("rolled_back"), None);
        assert_eq!(OtaStatus::from_report(""), None);
    }

    #[test]
    fn test_status_serde_naming() {
        let s = serde_json::to_string(&DeploymentStatus::RolledBack).unwrap();
        assert_eq!(s, "\"rolled_back\"");
        let s = serde_json::to_string(&OtaStatus::RolledBack).unwrap();
        assert_eq!(s, "\"rolled_back\"");
    }
}
