use async_trait::async_trait;
use fern_application::TagRepository;
use fern_core::{AppError, AppResult};
use fern_domain::{PermissionRequirement, Tag, TagName};

use super::{InMemoryTestResultStore, next};

#[async_trait]
impl TagRepository for InMemoryTestResultStore {
    async fn create_tag(&self, name: TagName) -> AppResult<Tag> {
        let mut state = self.state.write().await;
        if state.tags.values().any(|tag| tag.name() == &name) {
            return Err(AppError::Conflict(format!(
                "tag '{}' already exists",
                name.as_str()
            )));
        }

        let tag = Tag::new(next(&mut state.sequences.tag), name);
        state.tags.insert(tag.id(), tag.clone());
        Ok(tag)
    }

    async fn find_tag_by_name(&self, name: &TagName) -> AppResult<Option<Tag>> {
        Ok(self
            .state
            .read()
            .await
            .tags
            .values()
            .find(|tag| tag.name() == name)
            .cloned())
    }

    async fn list_tags(&self) -> AppResult<Vec<Tag>> {
        let mut tags: Vec<Tag> = self.state.read().await.tags.values().cloned().collect();
        tags.sort_by(|left, right| left.name().cmp(right.name()));
        Ok(tags)
    }

    async fn delete_tag(&self, tag_id: u64) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.tags.remove(&tag_id).is_none() {
            return Err(AppError::NotFound(format!("tag {tag_id} does not exist")));
        }

        state.run_tags.retain(|(_, assigned)| *assigned != tag_id);
        Ok(())
    }

    async fn assign_tags(
        &self,
        test_run_id: u64,
        tag_ids: &[u64],
        requirement: &PermissionRequirement,
    ) -> AppResult<Vec<Tag>> {
        let mut state = self.state.write().await;
        state.enforce_on_run(test_run_id, requirement)?;
        if let Some(missing) = tag_ids.iter().find(|tag_id| !state.tags.contains_key(*tag_id)) {
            return Err(AppError::NotFound(format!("tag {missing} does not exist")));
        }

        for tag_id in tag_ids {
            state.run_tags.insert((test_run_id, *tag_id));
        }
        Ok(state.run_tags(test_run_id))
    }

    async fn unassign_tags(
        &self,
        test_run_id: u64,
        tag_ids: &[u64],
        requirement: &PermissionRequirement,
    ) -> AppResult<Vec<Tag>> {
        let mut state = self.state.write().await;
        state.enforce_on_run(test_run_id, requirement)?;

        for tag_id in tag_ids {
            state.run_tags.remove(&(test_run_id, *tag_id));
        }
        Ok(state.run_tags(test_run_id))
    }

    async fn list_run_tags(&self, test_run_id: u64) -> AppResult<Vec<Tag>> {
        Ok(self.state.read().await.run_tags(test_run_id))
    }
}
