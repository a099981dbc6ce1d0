use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fern_application::PermissionGrantRepository;
use fern_core::{AppError, AppResult};
use fern_domain::{PermissionGrant, PermissionKind, PermissionRequirement, ProjectId};
use sqlx::{FromRow, PgPool};

use crate::postgres_support::{
    begin_write, commit, is_foreign_key_violation, require_live_grant,
};

/// PostgreSQL-backed repository for project permission grants.
#[derive(Clone)]
pub struct PostgresPermissionGrantRepository {
    pool: PgPool,
}

impl PostgresPermissionGrantRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct GrantRow {
    project_id: String,
    user_id: String,
    kind: String,
    expires_at: Option<DateTime<Utc>>,
    granted_at: DateTime<Utc>,
}

impl GrantRow {
    fn into_grant(self) -> AppResult<PermissionGrant> {
        PermissionGrant::new(
            ProjectId::new(self.project_id)?,
            self.user_id,
            self.kind.parse::<PermissionKind>()?,
            self.expires_at,
            self.granted_at,
        )
    }
}

fn into_grants(rows: Vec<GrantRow>) -> AppResult<Vec<PermissionGrant>> {
    rows.into_iter().map(GrantRow::into_grant).collect()
}

#[async_trait]
impl PermissionGrantRepository for PostgresPermissionGrantRepository {
    async fn append_grant(
        &self,
        grant: PermissionGrant,
        requirement: &PermissionRequirement,
    ) -> AppResult<()> {
        let mut transaction = begin_write(&self.pool, "grant").await?;
        require_live_grant(&mut *transaction, grant.project_id(), requirement).await?;

        let result = sqlx::query(
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
        .await;

        match result {
            Ok(_) => commit(transaction, "grant").await,
            Err(error) if is_foreign_key_violation(&error) => Err(AppError::NotFound(format!(
                "project '{}' does not exist",
                grant.project_id()
            ))),
            Err(error) => Err(AppError::Store(format!(
                "failed to grant '{}' on project '{}' to '{}': {error}",
                grant.kind().as_str(),
                grant.project_id(),
                grant.user_id().as_str()
            ))),
        }
    }

    async fn list_grants(
        &self,
        project_id: &ProjectId,
        user_id: &str,
        kind: PermissionKind,
    ) -> AppResult<Vec<PermissionGrant>> {
        let rows = sqlx::query_as::<_, GrantRow>(
            r#"
            SELECT project_id, user_id, kind, expires_at, granted_at
            FROM project_permission_grants
            WHERE project_id = $1 AND user_id = $2 AND kind = $3
            "#,
        )
        .bind(project_id.as_str())
        .bind(user_id)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to list '{}' grants of '{user_id}' on project '{project_id}': {error}",
                kind.as_str()
            ))
        })?;

        into_grants(rows)
    }

    async fn list_user_grants(&self, user_id: &str) -> AppResult<Vec<PermissionGrant>> {
        let rows = sqlx::query_as::<_, GrantRow>(
            r#"
            SELECT project_id, user_id, kind, expires_at, granted_at
            FROM project_permission_grants
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Store(format!("failed to list grants of '{user_id}': {error}"))
        })?;

        into_grants(rows)
    }

    async fn list_project_grants(
        &self,
        project_id: &ProjectId,
    ) -> AppResult<Vec<PermissionGrant>> {
        let rows = sqlx::query_as::<_, GrantRow>(
            r#"
            SELECT project_id, user_id, kind, expires_at, granted_at
            FROM project_permission_grants
            WHERE project_id = $1
            ORDER BY user_id, kind, granted_at
            "#,
        )
        .bind(project_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to list grants on project '{project_id}': {error}"
            ))
        })?;

        into_grants(rows)
    }

    async fn delete_grants(
        &self,
        project_id: &ProjectId,
        user_id: &str,
        kind: PermissionKind,
        requirement: &PermissionRequirement,
    ) -> AppResult<u64> {
        let mut transaction = begin_write(&self.pool, "revoke").await?;
        require_live_grant(&mut *transaction, project_id, requirement).await?;

        let result = sqlx::query(
            r#"
            DELETE FROM project_permission_grants
            WHERE project_id = $1 AND user_id = $2 AND kind = $3
            "#,
        )
        .bind(project_id.as_str())
        .bind(user_id)
        .bind(kind.as_str())
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to revoke '{}' from '{user_id}' on project '{project_id}': {error}",
                kind.as_str()
            ))
        })?;

        commit(transaction, "revoke").await?;
        Ok(result.rows_affected())
    }
}
