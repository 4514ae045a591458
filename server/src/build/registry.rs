//! Build registry: keyed store of build records

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::warn;

use crate::models::build::{Build, BuildStatus, Manifest};

/// Artifact fields attached atomically with the success transition
#[derive(Debug, Clone)]
pub struct BuildSuccess {
    pub artifact_hash: String,
    pub artifact_size: u64,
    pub artifact_file: String,
    pub manifest_file: String,
    pub manifest: Manifest,
    pub ram_usage: String,
    pub flash_usage: String,
}

/// In-memory store of build records.
///
/// Exactly one orchestration task owns a given build id; the lock exists
/// so concurrent pollers always read a committed snapshot, never a record
/// with one field set and the other not.
pub struct BuildRegistry {
    builds: RwLock<HashMap<String, Build>>,
}

impl BuildRegistry {
    pub fn new() -> Self {
        Self {
            builds: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new build record.
    pub async fn register(&self, build: Build) {
        let mut builds = self.builds.write().await;
        builds.insert(build.id.clone(), build);
    }

    /// Snapshot of one build.
    pub async fn get(&self, id: &str) -> Option<Build> {
        let builds = self.builds.read().await;
        builds.get(id).cloned()
    }

    /// Snapshot of all builds, most recently started first.
    pub async fn list(&self) -> Vec<Build> {
        let builds = self.builds.read().await;
        let mut all: Vec<Build> = builds.values().cloned().collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all
    }

    /// Commit the latest log snapshot, moving a queued build to building.
    /// Ignored once the build is terminal.
    pub async fn update_logs(&self, id: &str, logs: Vec<String>) {
        let mut builds = self.builds.write().await;
        if let Some(build) = builds.get_mut(id) {
            if build.status.is_terminal() {
                warn!("Ignoring log update for terminal build {}", id);
                return;
            }
            build.logs = logs;
            build.status = BuildStatus::Building;
        }
    }

    /// Transition a build to failed with its final log snapshot and the
    /// failure reason. Refused once the build is terminal.
    pub async fn mark_failed(&self, id: &str, error: String, logs: Vec<String>, completed_at: String) {
        let mut builds = self.builds.write().await;
        if let Some(build) = builds.get_mut(id) {
            if build.status.is_terminal() {
                warn!("Refusing terminal transition on terminal build {}", id);
                return;
            }
            build.status = BuildStatus::Failed;
            build.error = error;
            build.logs = logs;
            build.completed_at = Some(completed_at);
        }
    }

    /// Transition a build to success, attaching artifact hash/size/refs
    /// and the manifest in the same committed write. Refused once the
    /// build is terminal.
    pub async fn mark_success(
        &self,
        id: &str,
        success: BuildSuccess,
        logs: Vec<String>,
        completed_at: String,
    ) {
        let mut builds = self.builds.write().await;
        if let Some(build) = builds.get_mut(id) {
            if build.status.is_terminal() {
                warn!("Refusing terminal transition on terminal build {}", id);
                return;
            }
            build.status = BuildStatus::Success;
            build.artifact_hash = success.artifact_hash;
            build.artifact_size = success.artifact_size;
            build.artifact_file = success.artifact_file;
            build.manifest_file = success.manifest_file;
            build.manifest = Some(success.manifest);
            build.ram_usage = success.ram_usage;
            build.flash_usage = success.flash_usage;
            build.logs = logs;
            build.completed_at = Some(completed_at);
        }
    }
}

impl Default for BuildRegistry {
    fn default() -> Self {
        Self::new()
    }
}
