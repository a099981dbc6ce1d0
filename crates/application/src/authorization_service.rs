use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fern_core::{AppError, AppResult};
use fern_domain::{PermissionGrant, PermissionKind, PermissionRequirement, ProjectId};
use tracing::{debug, info};

/// Repository port for project permission grants.
///
/// Implementations return stored grants as-is, expired ones included; liveness
/// is decided by [`PermissionGrant::is_live_at`] at query time.
///
/// Writes re-check the caller's requirement under the same transaction or lock
/// and fail with `Forbidden` without changing anything when it is not met.
#[async_trait]
pub trait PermissionGrantRepository: Send + Sync {
    /// Appends a grant without deduplication.
    async fn append_grant(
        &self,
        grant: PermissionGrant,
        requirement: &PermissionRequirement,
    ) -> AppResult<()>;

    /// Lists every grant matching the project, user, and kind.
    async fn list_grants(
        &self,
        project_id: &ProjectId,
        user_id: &str,
        kind: PermissionKind,
    ) -> AppResult<Vec<PermissionGrant>>;

    /// Lists every grant held by a user across projects.
    async fn list_user_grants(&self, user_id: &str) -> AppResult<Vec<PermissionGrant>>;

    /// Lists every grant on a project.
    async fn list_project_grants(&self, project_id: &ProjectId)
    -> AppResult<Vec<PermissionGrant>>;

    /// Deletes every grant matching the triple regardless of expiry.
    ///
    /// Returns the number of removed grants.
    async fn delete_grants(
        &self,
        project_id: &ProjectId,
        user_id: &str,
        kind: PermissionKind,
        requirement: &PermissionRequirement,
    ) -> AppResult<u64>;
}

/// Application service answering project-scoped authorization queries.
#[derive(Clone)]
pub struct AuthorizationService {
    repository: Arc<dyn PermissionGrantRepository>,
}

impl AuthorizationService {
    /// Creates a new authorization service from a repository implementation.
    #[must_use]
    pub fn new(repository: Arc<dyn PermissionGrantRepository>) -> Self {
        Self { repository }
    }

    /// Returns whether the user holds a live read grant on the project.
    pub async fn has_read_permission(
        &self,
        user_id: &str,
        project_id: &ProjectId,
    ) -> AppResult<bool> {
        self.has_permission(user_id, project_id, PermissionKind::Read)
            .await
    }

    /// Returns whether the user holds a live write grant on the project.
    pub async fn has_write_permission(
        &self,
        user_id: &str,
        project_id: &ProjectId,
    ) -> AppResult<bool> {
        self.has_permission(user_id, project_id, PermissionKind::Write)
            .await
    }

    /// Returns whether any live grant of `kind` matches.
    pub async fn has_permission(
        &self,
        user_id: &str,
        project_id: &ProjectId,
        kind: PermissionKind,
    ) -> AppResult<bool> {
        let grants = self
            .repository
            .list_grants(project_id, user_id, kind)
            .await?;
        let now = Utc::now();

        Ok(grants
            .iter()
            .any(|grant| grant.authorizes(project_id, user_id, kind, now)))
    }

    /// Ensures the user holds a live grant of `kind`, failing with `Forbidden`.
    pub async fn require_permission(
        &self,
        user_id: &str,
        project_id: &ProjectId,
        kind: PermissionKind,
    ) -> AppResult<()> {
        if self.has_permission(user_id, project_id, kind).await? {
            return Ok(());
        }

        debug!(
            user_id,
            project_id = %project_id,
            kind = kind.as_str(),
            "permission denied"
        );
        Err(AppError::Forbidden(format!(
            "user '{user_id}' is missing '{}' permission on project '{project_id}'",
            kind.as_str()
        )))
    }

    /// Ensures the user can write to the project now.
    ///
    /// Returns the requirement the store re-checks when it applies the write.
    pub async fn require_write_access(
        &self,
        user_id: &str,
        project_id: &ProjectId,
    ) -> AppResult<PermissionRequirement> {
        self.require_permission(user_id, project_id, PermissionKind::Write)
            .await?;

        PermissionRequirement::new(user_id, PermissionKind::Write)
    }

    /// Records a grant. Identical grants may coexist.
    ///
    /// `granted_by` must still hold on the project when the grant is stored.
    pub async fn grant_permission(
        &self,
        project_id: &ProjectId,
        user_id: &str,
        kind: PermissionKind,
        expires_at: Option<DateTime<Utc>>,
        granted_by: &PermissionRequirement,
    ) -> AppResult<PermissionGrant> {
        let now = Utc::now();
        if expires_at.is_some_and(|expires_at| expires_at <= now) {
            return Err(AppError::Validation(
                "expires_at must be in the future".to_owned(),
            ));
        }

        let grant = PermissionGrant::new(project_id.clone(), user_id, kind, expires_at, now)?;
        self.repository
            .append_grant(grant.clone(), granted_by)
            .await?;

        info!(
            user_id,
            project_id = %project_id,
            kind = kind.as_str(),
            expires_at = ?expires_at,
            granted_by = granted_by.user_id(),
            "permission granted"
        );
        Ok(grant)
    }

    /// Removes every grant of `kind` for the user on the project.
    ///
    /// Revoking a grant that does not exist is a no-op.
    pub async fn revoke_permission(
        &self,
        project_id: &ProjectId,
        user_id: &str,
        kind: PermissionKind,
        revoked_by: &PermissionRequirement,
    ) -> AppResult<u64> {
        let removed = self
            .repository
            .delete_grants(project_id, user_id, kind, revoked_by)
            .await?;

        info!(
            user_id,
            project_id = %project_id,
            kind = kind.as_str(),
            removed,
            revoked_by = revoked_by.user_id(),
            "permission revoked"
        );
        Ok(removed)
    }

    /// Lists the grants on a project that are currently live.
    pub async fn list_live_project_grants(
        &self,
        project_id: &ProjectId,
    ) -> AppResult<Vec<PermissionGrant>> {
        let now = Utc::now();
        let mut grants: Vec<PermissionGrant> = self
            .repository
            .list_project_grants(project_id)
            .await?
            .into_iter()
            .filter(|grant| grant.is_live_at(now))
            .collect();
        grants.sort_by(|left, right| {
            left.user_id()
                .cmp(right.user_id())
                .then_with(|| left.kind().as_str().cmp(right.kind().as_str()))
                .then_with(|| left.granted_at().cmp(&right.granted_at()))
        });

        Ok(grants)
    }

    /// Returns the projects the user can currently read, ordered by identifier.
    pub async fn readable_project_ids(&self, user_id: &str) -> AppResult<Vec<ProjectId>> {
        let now = Utc::now();
        let project_ids: BTreeSet<ProjectId> = self
            .repository
            .list_user_grants(user_id)
            .await?
            .into_iter()
            .filter(|grant| grant.kind() == PermissionKind::Read && grant.is_live_at(now))
            .map(|grant| grant.project_id().clone())
            .collect();

        Ok(project_ids.into_iter().collect())
    }
}
