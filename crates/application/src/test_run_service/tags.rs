use fern_domain::Tag;

use super::*;

impl TestRunService {
    /// Associates existing tags with a run. Assigning a tag twice is a no-op.
    pub async fn assign_tags(
        &self,
        actor: &UserIdentity,
        test_run_id: u64,
        tag_ids: &[u64],
    ) -> AppResult<Vec<Tag>> {
        let (_, requirement) = self.writable_run(actor, test_run_id).await?;

        self.tag_repository
            .assign_tags(test_run_id, tag_ids, &requirement)
            .await
    }

    /// Removes tag associations from a run. Unassigned tags are ignored.
    pub async fn unassign_tags(
        &self,
        actor: &UserIdentity,
        test_run_id: u64,
        tag_ids: &[u64],
    ) -> AppResult<Vec<Tag>> {
        let (_, requirement) = self.writable_run(actor, test_run_id).await?;

        self.tag_repository
            .unassign_tags(test_run_id, tag_ids, &requirement)
            .await
    }

    /// Lists the tags of a run.
    pub async fn list_run_tags(&self, actor: &UserIdentity, test_run_id: u64) -> AppResult<Vec<Tag>> {
        self.authorized_run(actor, test_run_id, PermissionKind::Read)
            .await?;

        self.tag_repository.list_run_tags(test_run_id).await
    }
}
