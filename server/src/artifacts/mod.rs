//! Content-addressed artifact store
//!
//! A single flat directory holding `{build_id}.bin` binaries and
//! `{build_id}_manifest.json` manifests. Keys are write-once: no build
//! ever overwrites another's artifact. Retention is indefinite.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::ServiceError;
use crate::filesys::file::File;
use crate::models::build::Manifest;

pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the artifact directory if it does not exist yet.
    pub async fn ensure_layout(&self) -> Result<(), ServiceError> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Artifact file name for a build id.
    pub fn binary_name(build_id: &str) -> String {
        format!("{}.bin", build_id)
    }

    /// Manifest file name for a build id.
    pub fn manifest_name(build_id: &str) -> String {
        format!("{}_manifest.json", build_id)
    }

    /// On-disk path of a build's binary.
    pub fn binary_path(&self, build_id: &str) -> PathBuf {
        self.dir.join(Self::binary_name(build_id))
    }

    /// Whether a build's binary is present on disk.
    pub async fn has_binary(&self, build_id: &str) -> bool {
        fs::metadata(self.binary_path(build_id)).await.is_ok()
    }

    /// Copy a produced binary into the store under the build's id.
    /// Write-once: storing over an existing artifact is an error.
    pub async fn store_binary(&self, build_id: &str, source: &Path) -> Result<String, ServiceError> {
        self.ensure_layout().await?;
        let dest = self.binary_path(build_id);
        if fs::metadata(&dest).await.is_ok() {
            return Err(ServiceError::Storage(format!(
                "artifact {} already exists",
                Self::binary_name(build_id)
            )));
        }
        fs::copy(source, &dest).await?;
        Ok(Self::binary_name(build_id))
    }

    /// Persist a signed manifest alongside the artifact.
    pub async fn store_manifest(
        &self,
        build_id: &str,
        manifest: &Manifest,
    ) -> Result<String, ServiceError> {
        self.ensure_layout().await?;
        let name = Self::manifest_name(build_id);
        File::new(self.dir.join(&name)).write_json(manifest).await?;
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_is_write_once() {
        let scratch = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(scratch.path().join("artifacts"));

        let source = scratch.path().join("firmware.bin");
        tokio::fs::write(&source, b"\x01\x02\x03").await.unwrap();

        let name = store.store_binary("b1", &source).await.unwrap();
        assert_eq!(name, "b1.bin");
        assert!(store.has_binary("b1").await);

        let err = store.store_binary("b1", &source).await.unwrap_err();
        assert!(matches!(err, ServiceError::Storage(_)));
    }

    #[tokio::test]
    async fn test_manifest_persisted_as_json() {
        let scratch = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(scratch.path().join("artifacts"));

        let manifest = Manifest {
            build_id: "b1".to_string(),
            version: "1.0.0".to_string(),
            board_type: "ESP32-C3".to_string(),
            artifact_file: "b1.bin".to_string(),
            artifact_size: 3,
            artifact_hash_sha256: "aa".repeat(32),
            built_at: "2026-01-01T00:00:00Z".to_string(),
            signature: "c2ln".to_string(),
        };
        let name = store.store_manifest("b1", &manifest).await.unwrap();
        assert_eq!(name, "b1_manifest.json");

        let loaded: Manifest = File::new(store.dir().join(&name)).read_json().await.unwrap();
        assert_eq!(loaded, manifest);
    }
}
