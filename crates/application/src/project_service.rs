use std::sync::Arc;

use chrono::Utc;
use fern_core::{AppError, AppResult, UserIdentity};
use fern_domain::{
    PermissionGrant, PermissionKind, PermissionRequirement, Project, ProjectId, Team,
};
use tracing::info;

use crate::project_ports::{CreateProjectInput, ProjectPage, ProjectRepository, UpdateProjectInput};
use crate::{AuthorizationService, PageQuery};

mod permissions;

/// Application service for project lifecycle and project-level grants.
#[derive(Clone)]
pub struct ProjectService {
    authorization_service: AuthorizationService,
    repository: Arc<dyn ProjectRepository>,
}

impl ProjectService {
    /// Creates a new project service.
    #[must_use]
    pub fn new(
        authorization_service: AuthorizationService,
        repository: Arc<dyn ProjectRepository>,
    ) -> Self {
        Self {
            authorization_service,
            repository,
        }
    }

    /// Creates a project and grants its creator read and write access.
    pub async fn create_project(
        &self,
        actor: &UserIdentity,
        input: CreateProjectInput,
    ) -> AppResult<Project> {
        let project_id = ProjectId::new(input.project_id)?;
        let team = Team::new(input.team)?;
        let name = if input.name.trim().is_empty() {
            project_id.as_str().to_owned()
        } else {
            input.name
        };

        if self.repository.find_project(&project_id).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "project '{project_id}' already exists"
            )));
        }

        let now = Utc::now();
        let project = Project::new(
            project_id.clone(),
            name,
            input.description,
            team,
            actor.subject(),
            now,
        )?;
        let owner_grants = PermissionGrant::owner_grants(&project_id, actor.subject(), now)?;
        self.repository
            .create_project(project.clone(), owner_grants)
            .await?;

        info!(
            project_id = %project_id,
            team = project.team().as_str(),
            owner = actor.subject(),
            "project created"
        );
        Ok(project)
    }

    /// Returns a project the actor can read.
    pub async fn get_project(&self, actor: &UserIdentity, project_id: &str) -> AppResult<Project> {
        let project_id = ProjectId::new(project_id)?;
        self.authorization_service
            .require_permission(actor.subject(), &project_id, PermissionKind::Read)
            .await?;

        self.load_project(&project_id).await
    }

    /// Lists the projects the actor can read, ordered by identifier.
    pub async fn list_projects(
        &self,
        actor: &UserIdentity,
        page: PageQuery,
    ) -> AppResult<ProjectPage> {
        let project_ids = self
            .authorization_service
            .readable_project_ids(actor.subject())
            .await?;

        self.repository
            .list_projects(&project_ids, page.limit, page.offset)
            .await
    }

    /// Updates project name and description.
    pub async fn update_project(
        &self,
        actor: &UserIdentity,
        project_id: &str,
        input: UpdateProjectInput,
    ) -> AppResult<Project> {
        let project_id = ProjectId::new(project_id)?;
        let requirement = self.require_write(actor, &project_id).await?;

        let project = self
            .load_project(&project_id)
            .await?
            .renamed(input.name, input.description)?;
        self.repository
            .update_project(&project, &requirement)
            .await?;

        Ok(project)
    }

    /// Stops a project from accepting new runs. History is kept.
    pub async fn deactivate_project(&self, actor: &UserIdentity, project_id: &str) -> AppResult<()> {
        self.set_active(actor, project_id, false).await
    }

    /// Lets a deactivated project accept runs again.
    pub async fn activate_project(&self, actor: &UserIdentity, project_id: &str) -> AppResult<()> {
        self.set_active(actor, project_id, true).await
    }

    /// Deletes a project from the caller's point of view.
    ///
    /// Projects are soft-deleted through deactivation so historical runs survive.
    pub async fn delete_project(&self, actor: &UserIdentity, project_id: &str) -> AppResult<()> {
        self.set_active(actor, project_id, false).await
    }

    async fn set_active(&self, actor: &UserIdentity, project_id: &str, active: bool) -> AppResult<()> {
        let project_id = ProjectId::new(project_id)?;
        let requirement = self.require_write(actor, &project_id).await?;
        self.load_project(&project_id).await?;
        self.repository
            .set_project_active(&project_id, active, &requirement)
            .await?;

        info!(
            project_id = %project_id,
            active,
            actor = actor.subject(),
            "project activation changed"
        );
        Ok(())
    }

    async fn require_write(
        &self,
        actor: &UserIdentity,
        project_id: &ProjectId,
    ) -> AppResult<PermissionRequirement> {
        self.authorization_service
            .require_write_access(actor.subject(), project_id)
            .await
    }

    async fn load_project(&self, project_id: &ProjectId) -> AppResult<Project> {
        self.repository
            .find_project(project_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("project '{project_id}' does not exist")))
    }
}
