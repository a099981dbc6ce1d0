//! Tag catalog port and application service.
//!
//! Tags are global labels with their own lifecycle. Runs reference them by
//! association only, so deleting a tag detaches it from runs and never
//! deletes a run.

use std::sync::Arc;

use async_trait::async_trait;
use fern_core::{AppError, AppResult, UserIdentity};
use fern_domain::{PermissionRequirement, Tag, TagName};
use tracing::{debug, info};

/// Repository port for the tag catalog and run associations.
#[async_trait]
pub trait TagRepository: Send + Sync {
    /// Creates a tag. Fails with `Conflict` when the normalized name exists.
    async fn create_tag(&self, name: TagName) -> AppResult<Tag>;

    /// Returns one tag by normalized name.
    async fn find_tag_by_name(&self, name: &TagName) -> AppResult<Option<Tag>>;

    /// Lists all tags ordered by name.
    async fn list_tags(&self) -> AppResult<Vec<Tag>>;

    /// Deletes a tag and its run associations. Fails with `NotFound` when absent.
    async fn delete_tag(&self, tag_id: u64) -> AppResult<()>;

    /// Adds associations as a set union and returns the run's resulting tags.
    ///
    /// Fails with `NotFound` without assigning anything when the run or any
    /// tag is unknown, and with `Forbidden` when `requirement` no longer holds
    /// on the run's project.
    async fn assign_tags(
        &self,
        test_run_id: u64,
        tag_ids: &[u64],
        requirement: &PermissionRequirement,
    ) -> AppResult<Vec<Tag>>;

    /// Removes associations and returns the run's resulting tags.
    async fn unassign_tags(
        &self,
        test_run_id: u64,
        tag_ids: &[u64],
        requirement: &PermissionRequirement,
    ) -> AppResult<Vec<Tag>>;

    /// Lists tags of one run ordered by name.
    async fn list_run_tags(&self, test_run_id: u64) -> AppResult<Vec<Tag>>;
}

/// Application service for the global tag catalog.
#[derive(Clone)]
pub struct TagService {
    repository: Arc<dyn TagRepository>,
}

impl TagService {
    /// Creates a new tag service.
    #[must_use]
    pub fn new(repository: Arc<dyn TagRepository>) -> Self {
        Self { repository }
    }

    /// Creates a tag.
    pub async fn create_tag(&self, actor: &UserIdentity, name: &str) -> AppResult<Tag> {
        let name = TagName::new(name)?;
        let tag = self.repository.create_tag(name).await?;

        info!(
            tag_id = tag.id(),
            tag = tag.name().as_str(),
            actor = actor.subject(),
            "tag created"
        );
        Ok(tag)
    }

    /// Returns the tag with this name, creating it when missing.
    pub async fn find_or_create_tag(&self, actor: &UserIdentity, name: &str) -> AppResult<Tag> {
        let normalized = TagName::new(name)?;
        if let Some(tag) = self.repository.find_tag_by_name(&normalized).await? {
            return Ok(tag);
        }

        match self.repository.create_tag(normalized.clone()).await {
            Ok(tag) => {
                info!(
                    tag_id = tag.id(),
                    tag = tag.name().as_str(),
                    actor = actor.subject(),
                    "tag created"
                );
                Ok(tag)
            }
            Err(AppError::Conflict(_)) => self
                .repository
                .find_tag_by_name(&normalized)
                .await?
                .ok_or_else(|| {
                    AppError::Store(format!(
                        "tag '{}' conflicted on create but could not be read back",
                        normalized.as_str()
                    ))
                }),
            Err(error) => Err(error),
        }
    }

    /// Lists all tags.
    pub async fn list_tags(&self, actor: &UserIdentity) -> AppResult<Vec<Tag>> {
        let tags = self.repository.list_tags().await?;
        debug!(count = tags.len(), actor = actor.subject(), "tags listed");
        Ok(tags)
    }

    /// Deletes a tag and detaches it from every run.
    pub async fn delete_tag(&self, actor: &UserIdentity, tag_id: u64) -> AppResult<()> {
        self.repository.delete_tag(tag_id).await?;

        info!(tag_id, actor = actor.subject(), "tag deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fern_core::{AppError, UserIdentity};

    use crate::test_support::FakeTagRepository;

    use super::TagService;

    fn actor() -> UserIdentity {
        UserIdentity::new("alice", None).unwrap_or_else(|_| unreachable!())
    }

    #[tokio::test]
    async fn create_tag_normalizes_and_rejects_duplicates() {
        let service = TagService::new(Arc::new(FakeTagRepository::default()));

        let created = service.create_tag(&actor(), " Nightly ").await;
        assert!(created.is_ok());
        assert_eq!(
            created.unwrap_or_else(|_| unreachable!()).name().as_str(),
            "nightly"
        );

        let duplicate = service.create_tag(&actor(), "NIGHTLY").await;
        assert!(matches!(duplicate, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn find_or_create_returns_existing_tag() {
        let service = TagService::new(Arc::new(FakeTagRepository::default()));

        let first = service
            .find_or_create_tag(&actor(), "smoke")
            .await
            .unwrap_or_else(|_| unreachable!());
        let second = service
            .find_or_create_tag(&actor(), "SMOKE")
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(first, second);

        let listed = service.list_tags(&actor()).await.unwrap_or_default();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn delete_unknown_tag_is_not_found() {
        let service = TagService::new(Arc::new(FakeTagRepository::default()));

        let deleted = service.delete_tag(&actor(), 42).await;
        assert!(matches!(deleted, Err(AppError::NotFound(_))));
    }
}
