use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fern_core::AppResult;
use fern_domain::{PermissionGrant, PermissionKind, PermissionRequirement, Project, ProjectId};
use serde::Serialize;

/// Input payload for project creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateProjectInput {
    /// Globally unique project identifier.
    pub project_id: String,
    /// Display name; defaults to the project identifier when blank.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Owning team.
    pub team: String,
}

/// Input payload for project metadata updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateProjectInput {
    /// New display name.
    pub name: String,
    /// New description; `None` clears it.
    pub description: Option<String>,
}

/// Input payload for granting a project permission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantPermissionInput {
    /// Grantee subject.
    pub user_id: String,
    /// Granted capability.
    pub kind: PermissionKind,
    /// Optional expiry; `None` never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

/// One page of projects plus the total across all pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectPage {
    /// Projects in this page ordered by identifier.
    pub projects: Vec<Project>,
    /// Number of projects matching the query.
    pub total: u64,
}

/// Repository port for projects.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    /// Creates a project together with its owner grants in one atomic write.
    ///
    /// Fails with `Conflict` when the identifier is taken.
    async fn create_project(
        &self,
        project: Project,
        owner_grants: Vec<PermissionGrant>,
    ) -> AppResult<()>;

    /// Returns one project by identifier.
    async fn find_project(&self, project_id: &ProjectId) -> AppResult<Option<Project>>;

    /// Returns a page of the given projects ordered by identifier.
    async fn list_projects(
        &self,
        project_ids: &[ProjectId],
        limit: usize,
        offset: usize,
    ) -> AppResult<ProjectPage>;

    /// Replaces name and description. Fails with `NotFound` for unknown projects.
    ///
    /// The requirement is re-checked in the same transaction as the update.
    async fn update_project(
        &self,
        project: &Project,
        requirement: &PermissionRequirement,
    ) -> AppResult<()>;

    /// Sets the activation flag. Fails with `NotFound` for unknown projects.
    async fn set_project_active(
        &self,
        project_id: &ProjectId,
        active: bool,
        requirement: &PermissionRequirement,
    ) -> AppResult<()>;
}
