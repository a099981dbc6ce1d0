use super::*;

use crate::project_ports::GrantPermissionInput;

impl ProjectService {
    /// Grants a project permission to another user. Requires write access.
    pub async fn grant_permission(
        &self,
        actor: &UserIdentity,
        project_id: &str,
        input: GrantPermissionInput,
    ) -> AppResult<PermissionGrant> {
        let project_id = ProjectId::new(project_id)?;
        let requirement = self.require_write(actor, &project_id).await?;
        self.load_project(&project_id).await?;

        self.authorization_service
            .grant_permission(
                &project_id,
                input.user_id.as_str(),
                input.kind,
                input.expires_at,
                &requirement,
            )
            .await
    }

    /// Revokes every grant of one kind from a user. Requires write access.
    pub async fn revoke_permission(
        &self,
        actor: &UserIdentity,
        project_id: &str,
        user_id: &str,
        kind: PermissionKind,
    ) -> AppResult<u64> {
        let project_id = ProjectId::new(project_id)?;
        let requirement = self.require_write(actor, &project_id).await?;

        self.authorization_service
            .revoke_permission(&project_id, user_id, kind, &requirement)
            .await
    }

    /// Lists live grants on the project. Requires write access.
    pub async fn list_permissions(
        &self,
        actor: &UserIdentity,
        project_id: &str,
    ) -> AppResult<Vec<PermissionGrant>> {
        let project_id = ProjectId::new(project_id)?;
        self.require_write(actor, &project_id).await?;

        self.authorization_service
            .list_live_project_grants(&project_id)
            .await
    }
}
