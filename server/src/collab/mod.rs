//! External collaborator seams
//!
//! The project/file store and the audit sink are owned by other services;
//! the core talks to them through these traits. The bundled
//! implementations (in-memory projects, tracing-backed audit) keep the
//! binary and the tests self-contained.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::errors::ServiceError;
use crate::utils::{generate_uuid, now_iso};

/// One user-submitted source file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub content: String,
}

/// A project as the build trigger sees it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub board_type: String,
    pub files: Vec<SourceFile>,
    pub created_at: String,
}

/// Source of project files for build staging
#[async_trait]
pub trait ProjectSource: Send + Sync {
    /// Fetch a project; `NotFound` when the id is unknown.
    async fn project(&self, project_id: &str) -> Result<Project, ServiceError>;
}

/// Append-only audit sink
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, actor: &str, action: &str, resource: &str);
}

/// In-memory project store
pub struct InMemoryProjects {
    projects: RwLock<HashMap<String, Project>>,
}

impl InMemoryProjects {
    pub fn new() -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
        }
    }

    /// Store a new project and return it.
    pub async fn create(&self, name: String, board_type: String, files: Vec<SourceFile>) -> Project {
        let project = Project {
            id: generate_uuid(),
            name,
            board_type,
            files,
            created_at: now_iso(),
        };
        let mut projects = self.projects.write().await;
        projects.insert(project.id.clone(), project.clone());
        project
    }

    pub async fn list(&self) -> Vec<Project> {
        let projects = self.projects.read().await;
        let mut all: Vec<Project> = projects.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }
}

impl Default for InMemoryProjects {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProjectSource for InMemoryProjects {
    async fn project(&self, project_id: &str) -> Result<Project, ServiceError> {
        let projects = self.projects.read().await;
        projects
            .get(project_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound("Project not found".to_string()))
    }
}

/// Audit sink that records entries to the process log
pub struct TracingAudit;

#[async_trait]
impl AuditSink for TracingAudit {
    async fn record(&self, actor: &str, action: &str, resource: &str) {
        info!(target: "audit", actor, action, resource, "audit");
    }
}
