use std::sync::Arc;

use chrono::Utc;
use fern_core::{AppError, AppResult, UserIdentity};
use fern_domain::{
    PermissionKind, PermissionRequirement, ProjectId, RunStatus, RunTree, TestRun,
    TestRunDetails, TestRunDraft,
};
use tracing::{info, warn};

use crate::project_ports::ProjectRepository;
use crate::test_run_ports::{
    BulkDeleteFailure, BulkDeleteReport, PageQuery, TestRunPage, TestRunRepository,
    TestRunStatistics,
};
use crate::{AuthorizationService, TagRepository};

mod bulk;
mod tags;

/// Application service for submitting, reading, and maintaining test runs.
#[derive(Clone)]
pub struct TestRunService {
    authorization_service: AuthorizationService,
    project_repository: Arc<dyn ProjectRepository>,
    repository: Arc<dyn TestRunRepository>,
    tag_repository: Arc<dyn TagRepository>,
}

impl TestRunService {
    /// Creates a new test run service.
    #[must_use]
    pub fn new(
        authorization_service: AuthorizationService,
        project_repository: Arc<dyn ProjectRepository>,
        repository: Arc<dyn TestRunRepository>,
        tag_repository: Arc<dyn TagRepository>,
    ) -> Self {
        Self {
            authorization_service,
            project_repository,
            repository,
            tag_repository,
        }
    }

    /// Records a run with its complete suite and spec tree.
    pub async fn create_test_run(
        &self,
        actor: &UserIdentity,
        draft: TestRunDraft,
    ) -> AppResult<TestRunDetails> {
        let project_id = ProjectId::new(draft.project_id.as_str())?;
        let requirement = self
            .authorization_service
            .require_write_access(actor.subject(), &project_id)
            .await?;

        let tree = RunTree::from_draft(draft)?;
        let project = self
            .project_repository
            .find_project(&project_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("project '{project_id}' does not exist")))?;
        if !project.is_active() {
            return Err(AppError::Validation(format!(
                "project '{project_id}' is inactive and does not accept runs"
            )));
        }

        let details = self
            .repository
            .create_run_with_tree(tree, Utc::now(), &requirement)
            .await?;

        info!(
            test_run_id = details.run.id(),
            run_id = details.run.run_id().as_str(),
            project_id = %project_id,
            status = details.run.status().as_str(),
            suites = details.suites.len(),
            specs = details.specs.len(),
            "test run recorded"
        );
        Ok(details)
    }

    /// Returns a run with its full tree.
    pub async fn get_test_run(
        &self,
        actor: &UserIdentity,
        test_run_id: u64,
    ) -> AppResult<TestRunDetails> {
        self.authorized_run(actor, test_run_id, PermissionKind::Read)
            .await?;

        self.repository
            .find_run_details(test_run_id)
            .await?
            .ok_or_else(|| run_not_found(test_run_id))
    }

    /// Returns a run with its full tree by caller-supplied identifier.
    pub async fn get_test_run_by_run_id(
        &self,
        actor: &UserIdentity,
        project_id: &str,
        run_id: &str,
    ) -> AppResult<TestRunDetails> {
        let project_id = ProjectId::new(project_id)?;
        self.require(actor, &project_id, PermissionKind::Read)
            .await?;

        self.repository
            .find_run_details_by_run_id(&project_id, run_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "run '{run_id}' does not exist in project '{project_id}'"
                ))
            })
    }

    /// Lists project runs, most recent first, with the project's total run count.
    pub async fn list_test_runs(
        &self,
        actor: &UserIdentity,
        project_id: &str,
        page: PageQuery,
    ) -> AppResult<TestRunPage> {
        let project_id = ProjectId::new(project_id)?;
        self.require(actor, &project_id, PermissionKind::Read)
            .await?;

        self.repository
            .list_runs(&project_id, page.limit, page.offset)
            .await
    }

    /// Returns per-status run counts for a project.
    pub async fn run_statistics(
        &self,
        actor: &UserIdentity,
        project_id: &str,
    ) -> AppResult<TestRunStatistics> {
        let project_id = ProjectId::new(project_id)?;
        self.require(actor, &project_id, PermissionKind::Read)
            .await?;

        let counts = self.repository.count_runs_by_status(&project_id).await?;
        Ok(TestRunStatistics::from_counts(project_id, &counts))
    }

    /// Overrides a run status manually. Suites and specs are left untouched.
    pub async fn update_test_run_status(
        &self,
        actor: &UserIdentity,
        test_run_id: u64,
        status: RunStatus,
    ) -> AppResult<TestRun> {
        let (run, requirement) = self.writable_run(actor, test_run_id).await?;
        let updated = self
            .repository
            .update_run_status(test_run_id, status, &requirement)
            .await?;

        info!(
            test_run_id,
            from = run.status().as_str(),
            to = status.as_str(),
            actor = actor.subject(),
            "test run status overridden"
        );
        Ok(updated)
    }

    /// Recomputes suite and run statuses from stored spec outcomes.
    pub async fn recompute_test_run_status(
        &self,
        actor: &UserIdentity,
        test_run_id: u64,
    ) -> AppResult<TestRun> {
        let (_, requirement) = self.writable_run(actor, test_run_id).await?;

        let details = self
            .repository
            .find_run_details(test_run_id)
            .await?
            .ok_or_else(|| run_not_found(test_run_id))?;
        let (run_status, suite_statuses) = details.rolled_up_statuses();

        self.repository
            .save_rolled_up_statuses(test_run_id, run_status, &suite_statuses, &requirement)
            .await
    }

    /// Deletes a run and its whole tree.
    pub async fn delete_test_run(&self, actor: &UserIdentity, test_run_id: u64) -> AppResult<()> {
        let (_, requirement) = self.writable_run(actor, test_run_id).await?;
        self.repository
            .delete_run(test_run_id, &requirement)
            .await?;

        info!(test_run_id, actor = actor.subject(), "test run deleted");
        Ok(())
    }

    async fn require(
        &self,
        actor: &UserIdentity,
        project_id: &ProjectId,
        kind: PermissionKind,
    ) -> AppResult<()> {
        self.authorization_service
            .require_permission(actor.subject(), project_id, kind)
            .await
    }

    async fn authorized_run(
        &self,
        actor: &UserIdentity,
        test_run_id: u64,
        kind: PermissionKind,
    ) -> AppResult<TestRun> {
        let run = self
            .repository
            .find_run(test_run_id)
            .await?
            .ok_or_else(|| run_not_found(test_run_id))?;
        self.require(actor, run.project_id(), kind).await?;

        Ok(run)
    }

    /// Loads a run the actor may write to, with the requirement its write re-checks.
    async fn writable_run(
        &self,
        actor: &UserIdentity,
        test_run_id: u64,
    ) -> AppResult<(TestRun, PermissionRequirement)> {
        let run = self
            .repository
            .find_run(test_run_id)
            .await?
            .ok_or_else(|| run_not_found(test_run_id))?;
        let requirement = self
            .authorization_service
            .require_write_access(actor.subject(), run.project_id())
            .await?;

        Ok((run, requirement))
    }
}

fn run_not_found(test_run_id: u64) -> AppError {
    AppError::NotFound(format!("test run {test_run_id} does not exist"))
}
