use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fern_application::{ProjectPage, ProjectRepository};
use fern_core::{AppError, AppResult};
use fern_domain::{PermissionGrant, PermissionRequirement, Project, ProjectId, Team};
use sqlx::{FromRow, PgPool};

use crate::postgres_support::{
    begin_snapshot, begin_write, commit, is_unique_violation, page_bound, require_live_grant,
};

/// PostgreSQL-backed repository for projects.
#[derive(Clone)]
pub struct PostgresProjectRepository {
    pool: PgPool,
}

impl PostgresProjectRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ProjectRow {
    project_id: String,
    name: String,
    description: Option<String>,
    team: String,
    active: bool,
    created_by: String,
    created_at: DateTime<Utc>,
}

impl ProjectRow {
    fn into_project(self) -> AppResult<Project> {
        Ok(Project::new(
            ProjectId::new(self.project_id)?,
            self.name,
            self.description,
            Team::new(self.team)?,
            self.created_by,
            self.created_at,
        )?
        .with_active(self.active))
    }
}

#[async_trait]
impl ProjectRepository for PostgresProjectRepository {
    async fn create_project(
        &self,
        project: Project,
        owner_grants: Vec<PermissionGrant>,
    ) -> AppResult<()> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Store(format!(
                "failed to start project creation transaction for '{}': {error}",
                project.project_id()
            ))
        })?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO projects (project_id, name, description, team, active, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(project.project_id().as_str())
        .bind(project.name().as_str())
        .bind(project.description())
        .bind(project.team().as_str())
        .bind(project.is_active())
        .bind(project.created_by().as_str())
        .bind(project.created_at())
        .execute(&mut *transaction)
        .await;

        if let Err(error) = inserted {
            if is_unique_violation(&error) {
                return Err(AppError::Conflict(format!(
                    "project '{}' already exists",
                    project.project_id()
                )));
            }

            return Err(AppError::Store(format!(
                "failed to create project '{}': {error}",
                project.project_id()
            )));
        }

        for grant in &owner_grants {
            sqlx::query(
                r#"
                INSERT INTO project_permission_grants (project_id, user_id, kind, expires_at, granted_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(grant.project_id().as_str())
            .bind(grant.user_id().as_str())
            .bind(grant.kind().as_str())
            .bind(grant.expires_at())
            .bind(grant.granted_at())
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Store(format!(
                    "failed to grant owner '{}' access to project '{}': {error}",
                    grant.user_id().as_str(),
                    project.project_id()
                ))
            })?;
        }

        transaction.commit().await.map_err(|error| {
            AppError::Store(format!(
                "failed to commit project creation for '{}': {error}",
                project.project_id()
            ))
        })
    }

    async fn find_project(&self, project_id: &ProjectId) -> AppResult<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>(
            r#"
            SELECT project_id, name, description, team, active, created_by, created_at
            FROM projects
            WHERE project_id = $1
            "#,
        )
        .bind(project_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Store(format!("failed to find project '{project_id}': {error}"))
        })?;

        row.map(ProjectRow::into_project).transpose()
    }

    async fn list_projects(
        &self,
        project_ids: &[ProjectId],
        limit: usize,
        offset: usize,
    ) -> AppResult<ProjectPage> {
        let project_ids: Vec<String> = project_ids
            .iter()
            .map(|project_id| project_id.as_str().to_owned())
            .collect();
        let mut transaction = begin_snapshot(&self.pool, "project listing").await?;

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM projects
            WHERE project_id = ANY($1)
            "#,
        )
        .bind(&project_ids)
        .fetch_one(&mut *transaction)
        .await
        .map_err(|error| AppError::Store(format!("failed to count projects: {error}")))?;

        let rows = sqlx::query_as::<_, ProjectRow>(
            r#"
            SELECT project_id, name, description, team, active, created_by, created_at
            FROM projects
            WHERE project_id = ANY($1)
            ORDER BY project_id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(&project_ids)
        .bind(page_bound(limit))
        .bind(page_bound(offset))
        .fetch_all(&mut *transaction)
        .await
        .map_err(|error| AppError::Store(format!("failed to list projects: {error}")))?;

        transaction.commit().await.map_err(|error| {
            AppError::Store(format!("failed to finish project listing: {error}"))
        })?;

        Ok(ProjectPage {
            projects: rows
                .into_iter()
                .map(ProjectRow::into_project)
                .collect::<AppResult<_>>()?,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }

    async fn update_project(
        &self,
        project: &Project,
        requirement: &PermissionRequirement,
    ) -> AppResult<()> {
        let mut transaction = begin_write(&self.pool, "project update").await?;
        require_live_grant(&mut *transaction, project.project_id(), requirement).await?;

        let result = sqlx::query(
            r#"
            UPDATE projects
            SET name = $2, description = $3
            WHERE project_id = $1
            "#,
        )
        .bind(project.project_id().as_str())
        .bind(project.name().as_str())
        .bind(project.description())
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to update project '{}': {error}",
                project.project_id()
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "project '{}' does not exist",
                project.project_id()
            )));
        }

        commit(transaction, "project update").await
    }

    async fn set_project_active(
        &self,
        project_id: &ProjectId,
        active: bool,
        requirement: &PermissionRequirement,
    ) -> AppResult<()> {
        let mut transaction = begin_write(&self.pool, "project activation").await?;
        require_live_grant(&mut *transaction, project_id, requirement).await?;

        let result = sqlx::query(
            r#"
            UPDATE projects
            SET active = $2
            WHERE project_id = $1
            "#,
        )
        .bind(project_id.as_str())
        .bind(active)
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to change activation of project '{project_id}': {error}"
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "project '{project_id}' does not exist"
            )));
        }

        commit(transaction, "project activation").await
    }
}
