//! Application configuration options

use std::path::PathBuf;

use crate::build::orchestrator::BuildOptions;

/// Main application options
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// HTTP server configuration
    pub server: ServerOptions,

    /// Artifact and key storage configuration
    pub storage: StorageOptions,

    /// Build orchestrator configuration
    pub build: BuildOptions,
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
        }
    }
}

/// Storage options
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Flat directory holding `{build_id}.bin` artifacts and their
    /// manifests
    pub artifacts_dir: PathBuf,

    /// PEM private key used to sign manifests. A missing file means
    /// manifests are produced unsigned.
    pub signing_key: Option<PathBuf>,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from("artifacts"),
            signing_key: Some(PathBuf::from("ota_signing_key.pem")),
        }
    }
}
