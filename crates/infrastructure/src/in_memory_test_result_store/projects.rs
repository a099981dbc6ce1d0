use async_trait::async_trait;
use fern_application::{PermissionGrantRepository, ProjectPage, ProjectRepository};
use fern_core::{AppError, AppResult};
use fern_domain::{PermissionGrant, PermissionKind, PermissionRequirement, Project, ProjectId};

use super::InMemoryTestResultStore;

#[async_trait]
impl ProjectRepository for InMemoryTestResultStore {
    async fn create_project(
        &self,
        project: Project,
        owner_grants: Vec<PermissionGrant>,
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.projects.contains_key(project.project_id()) {
            return Err(AppError::Conflict(format!(
                "project '{}' already exists",
                project.project_id()
            )));
        }

        state
            .projects
            .insert(project.project_id().clone(), project);
        state.grants.extend(owner_grants);
        Ok(())
    }

    async fn find_project(&self, project_id: &ProjectId) -> AppResult<Option<Project>> {
        Ok(self.state.read().await.projects.get(project_id).cloned())
    }

    async fn list_projects(
        &self,
        project_ids: &[ProjectId],
        limit: usize,
        offset: usize,
    ) -> AppResult<ProjectPage> {
        let state = self.state.read().await;
        let matching: Vec<&Project> = state
            .projects
            .values()
            .filter(|project| project_ids.contains(project.project_id()))
            .collect();

        Ok(ProjectPage {
            total: matching.len() as u64,
            projects: matching
                .into_iter()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect(),
        })
    }

    async fn update_project(
        &self,
        project: &Project,
        requirement: &PermissionRequirement,
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.enforce(project.project_id(), requirement)?;
        let stored = state
            .projects
            .get_mut(project.project_id())
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "project '{}' does not exist",
                    project.project_id()
                ))
            })?;

        *stored = stored
            .renamed(project.name().as_str(), project.description().map(str::to_owned))?;
        Ok(())
    }

    async fn set_project_active(
        &self,
        project_id: &ProjectId,
        active: bool,
        requirement: &PermissionRequirement,
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.enforce(project_id, requirement)?;
        let stored = state
            .projects
            .remove(project_id)
            .ok_or_else(|| AppError::NotFound(format!("project '{project_id}' does not exist")))?;

        state
            .projects
            .insert(project_id.clone(), stored.with_active(active));
        Ok(())
    }
}

#[async_trait]
impl PermissionGrantRepository for InMemoryTestResultStore {
    async fn append_grant(
        &self,
        grant: PermissionGrant,
        requirement: &PermissionRequirement,
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.enforce(grant.project_id(), requirement)?;

        state.grants.push(grant);
        Ok(())
    }

    async fn list_grants(
        &self,
        project_id: &ProjectId,
        user_id: &str,
        kind: PermissionKind,
    ) -> AppResult<Vec<PermissionGrant>> {
        Ok(self
            .state
            .read()
            .await
            .grants
            .iter()
            .filter(|grant| {
                grant.project_id() == project_id
                    && grant.user_id().as_str() == user_id
                    && grant.kind() == kind
            })
            .cloned()
            .collect())
    }

    async fn list_user_grants(&self, user_id: &str) -> AppResult<Vec<PermissionGrant>> {
        Ok(self
            .state
            .read()
            .await
            .grants
            .iter()
            .filter(|grant| grant.user_id().as_str() == user_id)
            .cloned()
            .collect())
    }

    async fn list_project_grants(
        &self,
        project_id: &ProjectId,
    ) -> AppResult<Vec<PermissionGrant>> {
        Ok(self
            .state
            .read()
            .await
            .grants
            .iter()
            .filter(|grant| grant.project_id() == project_id)
            .cloned()
            .collect())
    }

    async fn delete_grants(
        &self,
        project_id: &ProjectId,
        user_id: &str,
        kind: PermissionKind,
        requirement: &PermissionRequirement,
    ) -> AppResult<u64> {
        let mut state = self.state.write().await;
        state.enforce(project_id, requirement)?;
        let before = state.grants.len();
        state.grants.retain(|grant| {
            !(grant.project_id() == project_id
                && grant.user_id().as_str() == user_id
                && grant.kind() == kind)
        });

        Ok((before - state.grants.len()) as u64)
    }
}
