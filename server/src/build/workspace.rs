//! Isolated scratch workspaces for toolchain runs

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::fs;
use tracing::warn;

use crate::build::board;
use crate::errors::ServiceError;

/// An isolated, uniquely-named build directory.
///
/// The directory is removed by `cleanup` on every orchestrator exit path;
/// the `TempDir` drop guard is the backstop if the task dies before that.
#[derive(Debug)]
pub struct BuildWorkspace {
    dir: TempDir,
}

impl BuildWorkspace {
    /// Create a workspace under `scratch_root` (the system temp directory
    /// when not set), named after the build id's first 8 characters.
    pub fn create(scratch_root: Option<&Path>, build_id: &str) -> Result<Self, ServiceError> {
        let prefix = format!("fw_build_{}_", &build_id[..build_id.len().min(8)]);
        let root = scratch_root
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(root)
            .map_err(|e| ServiceError::Storage(format!("failed to create workspace: {}", e)))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write the toolchain project configuration for the board type.
    pub async fn write_project_config(&self, board_type: &str) -> Result<(), ServiceError> {
        let ini = board::platformio_ini(board_type);
        fs::write(self.path().join("platformio.ini"), ini).await?;
        Ok(())
    }

    /// Stage one submitted file into the workspace.
    ///
    /// The filename is sanitized to its base name only, so path-traversal
    /// components are stripped rather than rejected. Headers (`.h`) land
    /// in `include/`, everything else in `src/`. Returns the name the
    /// file was staged under and its size in bytes.
    pub async fn stage_source_file(
        &self,
        name: &str,
        content: &str,
    ) -> Result<(String, usize), ServiceError> {
        let safe_name = sanitize_file_name(name);
        let subdir = if safe_name.ends_with(".h") {
            "include"
        } else {
            "src"
        };
        let dir = self.path().join(subdir);
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join(&safe_name), content).await?;
        Ok((safe_name, content.len()))
    }

    /// Conventional location of the toolchain's output binary.
    pub fn firmware_path(&self, env: &str) -> PathBuf {
        self.path()
            .join(".pio")
            .join("build")
            .join(env)
            .join("firmware.bin")
    }

    /// Remove the workspace. Removal failure is logged, never escalated;
    /// it must not affect the build's recorded outcome.
    pub async fn cleanup(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!("Failed to remove build workspace {}: {}", path.display(), e);
        }
    }
}

/// Strip directory components from a submitted filename. Empty or
/// unusable names fall back to `main.c` rather than failing the build.
fn sanitize_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "main.c".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_traversal() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("/abs/path/main.c"), "main.c");
        assert_eq!(sanitize_file_name("plain.h"), "plain.h");
        assert_eq!(sanitize_file_name(""), "main.c");
        assert_eq!(sanitize_file_name(".."), "main.c");
    }

    #[tokio::test]
    async fn test_staging_splits_headers_and_sources() {
        let ws = BuildWorkspace::create(None, "0123456789abcdef").unwrap();
        ws.write_project_config("ESP32-C3").await.unwrap();
        ws.stage_source_file("main.c", "int app_main() {}").await.unwrap();
        ws.stage_source_file("../../evil/config.h", "#define X 1")
            .await
            .unwrap();

        assert!(ws.path().join("platformio.ini").exists());
        assert!(ws.path().join("src").join("main.c").exists());
        assert!(ws.path().join("include").join("config.h").exists());

        let path = ws.path().to_path_buf();
        ws.cleanup().await;
        assert!(!path.exists());
    }
}
