//! Build models

use serde::{Deserialize, Serialize};

/// Build lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// Registered, orchestration task not yet producing output
    Queued,

    /// Toolchain running
    Building,

    /// Terminal: artifact stored and manifest signed
    Success,

    /// Terminal: timeout, toolchain failure, missing artifact or internal error
    Failed,
}

impl BuildStatus {
    /// Terminal states are final; no transition may leave them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStatus::Success | BuildStatus::Failed)
    }
}

/// Signed OTA manifest describing one build artifact.
///
/// Every field except `signature` participates in the signed payload;
/// see `signing::canonical_payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub build_id: String,
    pub version: String,
    pub board_type: String,
    pub artifact_file: String,
    pub artifact_size: u64,
    pub artifact_hash_sha256: String,
    pub built_at: String,

    /// Base64 PKCS#1 v1.5 signature; empty when no signing key is configured
    #[serde(default)]
    pub signature: String,
}

/// One compilation attempt of a project's sources for a board and version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    /// Unique build ID
    pub id: String,

    /// Project the sources came from
    pub project_id: String,

    /// Project display name (denormalized for listings)
    pub project_name: String,

    /// Target board
    pub board_type: String,

    /// Semantic version string
    pub version: String,

    /// Current lifecycle state
    pub status: BuildStatus,

    /// Bounded, most-recent-N build log lines
    pub logs: Vec<String>,

    /// Failure reason; empty unless status is failed
    #[serde(default)]
    pub error: String,

    /// Hex SHA-256 of the artifact; empty until success
    pub artifact_hash: String,

    /// Artifact size in bytes
    pub artifact_size: u64,

    /// Artifact file name in the artifact store
    pub artifact_file: String,

    /// Manifest file name in the artifact store
    pub manifest_file: String,

    /// Signed manifest, set atomically with the success transition
    pub manifest: Option<Manifest>,

    /// RAM usage summary line from the toolchain output
    pub ram_usage: String,

    /// Flash usage summary line from the toolchain output
    pub flash_usage: String,

    /// When the build was registered
    pub started_at: String,

    /// When the build reached a terminal state
    pub completed_at: Option<String>,
}

impl Build {
    /// Create a freshly queued build record with one initial log line.
    pub fn queued(
        id: String,
        project_id: String,
        project_name: String,
        board_type: String,
        version: String,
        started_at: String,
        initial_log: String,
    ) -> Self {
        Self {
            id,
            project_id,
            project_name,
            board_type,
            version,
            status: BuildStatus::Queued,
            logs: vec![initial_log],
            error: String::new(),
            artifact_hash: String::new(),
            artifact_size: 0,
            artifact_file: String::new(),
            manifest_file: String::new(),
            manifest: None,
            ram_usage: String::new(),
            flash_usage: String::new(),
            started_at,
            completed_at: None,
        }
    }
}
