//! Build orchestrator
//!
//! Runs the external toolchain for one build inside an isolated scratch
//! workspace: stages sources, streams child output into the bounded build
//! log, enforces a cumulative wall-clock deadline, hashes and stores the
//! produced binary and signs its manifest. One orchestration task owns a
//! given build id; every task carries a cancellation token, and the
//! timeout path and `cancel` signal the same child-kill code path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::RwLock;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::artifacts::ArtifactStore;
use crate::build::board;
use crate::build::logbuf::{self, BuildLog, LineFilter, MAX_LOG_LINES};
use crate::build::registry::{BuildRegistry, BuildSuccess};
use crate::build::workspace::BuildWorkspace;
use crate::collab::SourceFile;
use crate::errors::ServiceError;
use crate::models::build::Manifest;
use crate::utils::now_iso;

/// Build orchestrator options
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Toolchain executable invoked as `<toolchain> run -e <env>`
    pub toolchain: PathBuf,

    /// Hard wall-clock budget for the entire compilation step
    pub build_timeout: Duration,

    /// Log buffer capacity (most recent N lines retained)
    pub max_log_lines: usize,

    /// Parent directory for scratch workspaces; system temp dir when unset
    pub scratch_root: Option<PathBuf>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            toolchain: PathBuf::from("pio"),
            build_timeout: Duration::from_secs(180),
            max_log_lines: MAX_LOG_LINES,
            scratch_root: None,
        }
    }
}

/// Structured result of one orchestration run. `run` always returns this;
/// failures are folded into the build record, never raised to the caller.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub artifact_file: String,
    pub artifact_hash: String,
    pub artifact_size: u64,
    pub manifest: Option<Manifest>,
}

impl BuildOutcome {
    fn failed(error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
            artifact_file: String::new(),
            artifact_hash: String::new(),
            artifact_size: 0,
            manifest: None,
        }
    }
}

pub struct BuildOrchestrator {
    registry: Arc<BuildRegistry>,
    artifacts: Arc<ArtifactStore>,
    signer: Arc<crate::signing::ManifestSigner>,
    options: BuildOptions,
    filter: LineFilter,
    tasks: RwLock<HashMap<String, CancellationToken>>,
}

impl BuildOrchestrator {
    pub fn new(
        registry: Arc<BuildRegistry>,
        artifacts: Arc<ArtifactStore>,
        signer: Arc<crate::signing::ManifestSigner>,
        options: BuildOptions,
    ) -> Self {
        Self::with_filter(registry, artifacts, signer, options, logbuf::keyword_filter())
    }

    /// Construct with a custom line filter (tests swap in `unfiltered`).
    pub fn with_filter(
        registry: Arc<BuildRegistry>,
        artifacts: Arc<ArtifactStore>,
        signer: Arc<crate::signing::ManifestSigner>,
        options: BuildOptions,
        filter: LineFilter,
    ) -> Self {
        Self {
            registry,
            artifacts,
            signer,
            options,
            filter,
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Spawn the orchestration task for an already-registered queued build.
    /// The caller returns immediately; progress is observable through the
    /// registry.
    pub fn spawn(
        self: &Arc<Self>,
        build_id: String,
        files: Vec<SourceFile>,
        board_type: String,
        version: String,
    ) {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let _ = orchestrator
                .run(&build_id, &files, &board_type, &version)
                .await;
        });
    }

    /// Signal the cancellation token of a running build task. Returns
    /// false when no task owns the id. The token feeds the same kill path
    /// as the wall-clock timeout.
    pub async fn cancel(&self, build_id: &str) -> bool {
        let tasks = self.tasks.read().await;
        match tasks.get(build_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Execute the full build pipeline for one build id.
    ///
    /// Never returns an error: every failure is logged, recorded as a
    /// `failed` terminal state and reported through the outcome.
    pub async fn run(
        &self,
        build_id: &str,
        files: &[SourceFile],
        board_type: &str,
        version: &str,
    ) -> BuildOutcome {
        let token = CancellationToken::new();
        {
            let mut tasks = self.tasks.write().await;
            tasks.insert(build_id.to_string(), token.clone());
        }

        // Continue the log the trigger started (the initial "queued" line).
        let existing_logs = self
            .registry
            .get(build_id)
            .await
            .map(|b| b.logs)
            .unwrap_or_default();
        let mut log = BuildLog::with_lines(self.options.max_log_lines, existing_logs);

        let outcome = match BuildWorkspace::create(self.options.scratch_root.as_deref(), build_id) {
            Ok(ws) => {
                let result = self
                    .execute(build_id, files, board_type, version, &ws, &mut log, &token)
                    .await;
                // Cleanup runs on every exit path; its own failure is
                // swallowed inside cleanup and never changes the outcome.
                ws.cleanup().await;
                match result {
                    Ok(success) => {
                        info!("Build {} succeeded ({} bytes)", build_id, success.artifact_size);
                        BuildOutcome {
                            success: true,
                            error: None,
                            artifact_file: success.artifact_file,
                            artifact_hash: success.artifact_hash,
                            artifact_size: success.artifact_size,
                            manifest: Some(success.manifest),
                        }
                    }
                    Err(err) => self.fail(build_id, &mut log, err).await,
                }
            }
            Err(err) => self.fail(build_id, &mut log, err).await,
        };

        let mut tasks = self.tasks.write().await;
        tasks.remove(build_id);
        outcome
    }

    /// Convert an error into the `failed` terminal record.
    async fn fail(&self, build_id: &str, log: &mut BuildLog, err: ServiceError) -> BuildOutcome {
        // The timeout/exit/missing-artifact/cancel branches already wrote
        // their specific log line.
        let pre_logged = matches!(
            err,
            ServiceError::BuildTimeout(_)
                | ServiceError::BuildCancelled(_)
                | ServiceError::BuildProcessFailure(_)
                | ServiceError::ArtifactMissing(_)
        );
        if !pre_logged {
            self.log_line(build_id, log, "ERROR", &format!("Build error: {}", err))
                .await;
        }
        error!("Build {} failed: {}", build_id, err);

        let detail = err.to_string();
        self.registry
            .mark_failed(build_id, detail.clone(), log.snapshot(), now_iso())
            .await;
        BuildOutcome::failed(detail)
    }

    /// Append a timestamped, leveled line and persist the snapshot so
    /// concurrent pollers always see a committed view.
    async fn log_line(&self, build_id: &str, log: &mut BuildLog, level: &str, msg: &str) {
        log.push(level, msg);
        self.registry.update_logs(build_id, log.snapshot()).await;
    }

    /// Handle one raw line of child output: scrape memory-usage markers
    /// from the unfiltered stream, then apply the display filter before
    /// the line enters the durable log.
    async fn capture_line(
        &self,
        build_id: &str,
        log: &mut BuildLog,
        ram: &mut String,
        flash: &mut String,
        raw: &str,
    ) {
        let line = raw.trim_end();
        if line.is_empty() {
            return;
        }
        if line.contains("RAM:") {
            *ram = line.trim().to_string();
        }
        if line.contains("Flash:") {
            *flash = line.trim().to_string();
        }
        if (self.filter)(line) {
            self.log_line(build_id, log, "INFO", line).await;
        }
    }

    async fn terminate(child: &mut Child) {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        build_id: &str,
        files: &[SourceFile],
        board_type: &str,
        version: &str,
        ws: &BuildWorkspace,
        log: &mut BuildLog,
        token: &CancellationToken,
    ) -> Result<BuildSuccess, ServiceError> {
        if files.is_empty() {
            return Err(ServiceError::Validation(
                "project has no source files".to_string(),
            ));
        }

        let profile = board::profile_for(board_type);
        let env = board::env_name(board_type);
        let short_id = &build_id[..build_id.len().min(8)];

        // Step 1: isolated workspace (created by the caller).
        self.log_line(build_id, log, "INFO", &format!("Build directory created: {}", short_id))
            .await;
        self.log_line(
            build_id,
            log,
            "INFO",
            &format!("Target: {} | Version: v{}", board_type, version),
        )
        .await;

        // Step 2: toolchain configuration and source staging.
        ws.write_project_config(board_type).await?;
        self.log_line(build_id, log, "INFO", "platformio.ini generated").await;

        let mut file_count = 0usize;
        for file in files {
            let (safe_name, bytes) = ws.stage_source_file(&file.name, &file.content).await?;
            file_count += 1;
            self.log_line(
                build_id,
                log,
                "INFO",
                &format!("  + {} ({} bytes)", safe_name, bytes),
            )
            .await;
        }
        self.log_line(build_id, log, "INFO", &format!("{} source file(s) written", file_count))
            .await;

        // Step 3: run the toolchain under a cumulative deadline.
        self.log_line(build_id, log, "INFO", "Starting PlatformIO compilation...")
            .await;
        self.log_line(
            build_id,
            log,
            "INFO",
            &format!("Platform: {} | Board: {}", profile.platform, profile.board),
        )
        .await;

        let mut command = Command::new(&self.options.toolchain);
        command
            .args(["run", "-e", &env])
            .current_dir(ws.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(home) = std::env::var_os("HOME") {
            command.env("PLATFORMIO_CORE_DIR", PathBuf::from(home).join(".platformio"));
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.log_line(
                    build_id,
                    log,
                    "ERROR",
                    &format!("Failed to start toolchain: {}", e),
                )
                .await;
                return Err(ServiceError::BuildProcessFailure(format!(
                    "failed to start toolchain {}: {}",
                    self.options.toolchain.display(),
                    e
                )));
            }
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ServiceError::Internal("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ServiceError::Internal("child stderr not captured".to_string()))?;

        let deadline = Instant::now() + self.options.build_timeout;
        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let mut out_open = true;
        let mut err_open = true;
        let mut ram_usage = String::new();
        let mut flash_usage = String::new();

        while out_open || err_open {
            tokio::select! {
                _ = token.cancelled() => {
                    Self::terminate(&mut child).await;
                    self.log_line(build_id, log, "ERROR", "BUILD CANCELLED - Process killed").await;
                    return Err(ServiceError::BuildCancelled(
                        "build task cancelled".to_string(),
                    ));
                }
                _ = time::sleep_until(deadline) => {
                    token.cancel();
                    Self::terminate(&mut child).await;
                    self.log_line(build_id, log, "ERROR", "BUILD TIMEOUT - Process killed").await;
                    return Err(ServiceError::BuildTimeout(format!(
                        "build exceeded {}s wall clock",
                        self.options.build_timeout.as_secs()
                    )));
                }
                line = out_lines.next_line(), if out_open => match line {
                    Ok(Some(raw)) => {
                        self.capture_line(build_id, log, &mut ram_usage, &mut flash_usage, &raw).await;
                    }
                    _ => out_open = false,
                },
                line = err_lines.next_line(), if err_open => match line {
                    Ok(Some(raw)) => {
                        self.capture_line(build_id, log, &mut ram_usage, &mut flash_usage, &raw).await;
                    }
                    _ => err_open = false,
                },
            }
        }

        // The deadline still bounds process exit after the pipes close.
        let status = match time::timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                token.cancel();
                Self::terminate(&mut child).await;
                self.log_line(build_id, log, "ERROR", "BUILD TIMEOUT - Process killed").await;
                return Err(ServiceError::BuildTimeout(format!(
                    "build exceeded {}s wall clock",
                    self.options.build_timeout.as_secs()
                )));
            }
        };

        if !status.success() {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            self.log_line(
                build_id,
                log,
                "ERROR",
                &format!("Build FAILED (exit code: {})", code),
            )
            .await;
            return Err(ServiceError::BuildProcessFailure(format!(
                "toolchain exited with code {}",
                code
            )));
        }

        // Step 4: locate the produced binary.
        let firmware = ws.firmware_path(&env);
        if tokio::fs::metadata(&firmware).await.is_err() {
            self.log_line(build_id, log, "ERROR", "firmware.bin not found!").await;
            return Err(ServiceError::ArtifactMissing(format!(
                "firmware binary not found at .pio/build/{}/firmware.bin",
                env
            )));
        }

        // Step 5: streaming digest, fixed 8KB chunks.
        let (artifact_hash, artifact_size) = crate::utils::sha256_file(&firmware).await?;
        self.log_line(
            build_id,
            log,
            "INFO",
            &format!(
                "Firmware binary: {} bytes ({:.1} KB)",
                artifact_size,
                artifact_size as f64 / 1024.0
            ),
        )
        .await;
        self.log_line(
            build_id,
            log,
            "INFO",
            &format!(
                "SHA-256: {}...{}",
                &artifact_hash[..16],
                &artifact_hash[artifact_hash.len() - 8..]
            ),
        )
        .await;

        // Step 6: persist the binary into the artifact store.
        let artifact_file = self.artifacts.store_binary(build_id, &firmware).await?;
        self.log_line(build_id, log, "INFO", &format!("Artifact stored: {}", artifact_file))
            .await;

        // Step 7: canonical manifest, signed and persisted alongside.
        let mut manifest = Manifest {
            build_id: build_id.to_string(),
            version: version.to_string(),
            board_type: board_type.to_string(),
            artifact_file: artifact_file.clone(),
            artifact_size,
            artifact_hash_sha256: artifact_hash.clone(),
            built_at: now_iso(),
            signature: String::new(),
        };
        manifest.signature = self.signer.sign(&manifest)?;
        let manifest_file = self.artifacts.store_manifest(build_id, &manifest).await?;
        if manifest.signature.is_empty() {
            self.log_line(
                build_id,
                log,
                "WARN",
                &format!("OTA manifest generated unsigned (no signing key): {}", manifest_file),
            )
            .await;
        } else {
            self.log_line(
                build_id,
                log,
                "INFO",
                &format!("Signed OTA manifest generated: {}", manifest_file),
            )
            .await;
        }

        self.log_line(build_id, log, "INFO", &"=".repeat(50)).await;
        self.log_line(
            build_id,
            log,
            "INFO",
            &format!("BUILD SUCCESSFUL - v{} for {}", version, board_type),
        )
        .await;
        if !ram_usage.is_empty() {
            self.log_line(build_id, log, "INFO", &format!("Memory: {}", ram_usage)).await;
        }
        if !flash_usage.is_empty() {
            self.log_line(build_id, log, "INFO", &format!("Flash: {}", flash_usage)).await;
        }

        // Step 8: terminal success, artifact fields and manifest attached
        // in one committed write.
        let success = BuildSuccess {
            artifact_hash,
            artifact_size,
            artifact_file,
            manifest_file,
            manifest,
            ram_usage,
            flash_usage,
        };
        self.registry
            .mark_success(build_id, success.clone(), log.snapshot(), now_iso())
            .await;
        Ok(success)
    }
}
