use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fern_application::{RunStatusCount, TestRunPage, TestRunRepository};
use fern_core::{AppError, AppResult};
use fern_domain::{
    PermissionRequirement, ProjectId, RunStatus, RunTree, SpecRun, SuiteRun, TestRun,
    TestRunDetails,
};

use super::{InMemoryTestResultStore, next};

fn run_not_found(test_run_id: u64) -> AppError {
    AppError::NotFound(format!("test run {test_run_id} does not exist"))
}

#[async_trait]
impl TestRunRepository for InMemoryTestResultStore {
    async fn create_run_with_tree(
        &self,
        tree: RunTree,
        created_at: DateTime<Utc>,
        requirement: &PermissionRequirement,
    ) -> AppResult<TestRunDetails> {
        let mut state = self.state.write().await;
        let header = tree.header();
        if !state.projects.contains_key(header.project_id()) {
            return Err(AppError::NotFound(format!(
                "project '{}' does not exist",
                header.project_id()
            )));
        }
        state.enforce(header.project_id(), requirement)?;
        if state.runs.values().any(|run| {
            run.project_id() == header.project_id() && run.run_id() == header.run_id()
        }) {
            return Err(AppError::Conflict(format!(
                "run '{}' already exists in project '{}'",
                header.run_id().as_str(),
                header.project_id()
            )));
        }

        let run = TestRun::new(
            next(&mut state.sequences.run),
            header.clone(),
            tree.status(),
            created_at,
        );

        let mut suites = Vec::with_capacity(tree.suites().len());
        for suite in tree.suites() {
            suites.push(SuiteRun::new(
                next(&mut state.sequences.suite),
                run.id(),
                suite.name().as_str(),
                suite.status(),
            )?);
        }

        let mut specs = Vec::with_capacity(tree.specs().len());
        for spec in tree.specs() {
            let suite_run_id = suites
                .get(spec.suite_index())
                .map(SuiteRun::id)
                .ok_or_else(|| {
                    AppError::Internal(format!(
                        "spec '{}' points outside the run's suites",
                        spec.spec_identity().as_str()
                    ))
                })?;
            specs.push(SpecRun::from_new(
                next(&mut state.sequences.spec),
                suite_run_id,
                spec,
            ));
        }

        state.runs.insert(run.id(), run.clone());
        for suite in &suites {
            state.suites.insert(suite.id(), suite.clone());
        }
        for spec in &specs {
            state.specs.insert(spec.id(), spec.clone());
        }

        Ok(TestRunDetails {
            run,
            suites,
            specs,
            tags: Vec::new(),
        })
    }

    async fn find_run(&self, test_run_id: u64) -> AppResult<Option<TestRun>> {
        Ok(self.state.read().await.runs.get(&test_run_id).cloned())
    }

    async fn find_run_details(&self, test_run_id: u64) -> AppResult<Option<TestRunDetails>> {
        let state = self.state.read().await;
        Ok(state
            .runs
            .get(&test_run_id)
            .map(|run| state.run_details(run)))
    }

    async fn find_run_details_by_run_id(
        &self,
        project_id: &ProjectId,
        run_id: &str,
    ) -> AppResult<Option<TestRunDetails>> {
        let state = self.state.read().await;
        Ok(state
            .runs
            .values()
            .find(|run| run.project_id() == project_id && run.run_id().as_str() == run_id)
            .map(|run| state.run_details(run)))
    }

    async fn list_runs(
        &self,
        project_id: &ProjectId,
        limit: usize,
        offset: usize,
    ) -> AppResult<TestRunPage> {
        let state = self.state.read().await;
        let mut runs: Vec<&TestRun> = state
            .runs
            .values()
            .filter(|run| run.project_id() == project_id)
            .collect();
        runs.sort_by(|left, right| {
            right
                .created_at()
                .cmp(&left.created_at())
                .then_with(|| right.id().cmp(&left.id()))
        });

        Ok(TestRunPage {
            total: runs.len() as u64,
            runs: runs.into_iter().skip(offset).take(limit).cloned().collect(),
        })
    }

    async fn update_run_status(
        &self,
        test_run_id: u64,
        status: RunStatus,
        requirement: &PermissionRequirement,
    ) -> AppResult<TestRun> {
        let mut state = self.state.write().await;
        state.enforce_on_run(test_run_id, requirement)?;
        let run = state
            .runs
            .remove(&test_run_id)
            .ok_or_else(|| run_not_found(test_run_id))?
            .with_status(status);

        state.runs.insert(test_run_id, run.clone());
        Ok(run)
    }

    async fn save_rolled_up_statuses(
        &self,
        test_run_id: u64,
        run_status: RunStatus,
        suite_statuses: &[(u64, RunStatus)],
        requirement: &PermissionRequirement,
    ) -> AppResult<TestRun> {
        let mut state = self.state.write().await;
        state.enforce_on_run(test_run_id, requirement)?;
        if let Some((suite_run_id, _)) = suite_statuses.iter().find(|(suite_run_id, _)| {
            state
                .suites
                .get(suite_run_id)
                .is_none_or(|suite| suite.test_run_id() != test_run_id)
        }) {
            return Err(AppError::NotFound(format!(
                "suite {suite_run_id} does not belong to test run {test_run_id}"
            )));
        }

        for (suite_run_id, status) in suite_statuses {
            if let Some(suite) = state.suites.remove(suite_run_id) {
                state
                    .suites
                    .insert(*suite_run_id, suite.with_status(*status));
            }
        }
        let run = state
            .runs
            .remove(&test_run_id)
            .ok_or_else(|| run_not_found(test_run_id))?
            .with_status(run_status);
        state.runs.insert(test_run_id, run.clone());

        Ok(run)
    }

    async fn delete_run(
        &self,
        test_run_id: u64,
        requirement: &PermissionRequirement,
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.enforce_on_run(test_run_id, requirement)?;
        if state.runs.remove(&test_run_id).is_none() {
            return Err(run_not_found(test_run_id));
        }

        let suite_ids: Vec<u64> = state
            .suites_of(test_run_id)
            .map(SuiteRun::id)
            .collect();
        state
            .specs
            .retain(|_, spec| !suite_ids.contains(&spec.suite_run_id()));
        state
            .suites
            .retain(|_, suite| suite.test_run_id() != test_run_id);
        state.run_tags.retain(|(run, _)| *run != test_run_id);

        Ok(())
    }

    async fn count_runs_by_status(
        &self,
        project_id: &ProjectId,
    ) -> AppResult<Vec<RunStatusCount>> {
        let state = self.state.read().await;
        let mut counts: BTreeMap<RunStatus, u64> = BTreeMap::new();
        for run in state.runs.values() {
            if run.project_id() == project_id {
                *counts.entry(run.status()).or_default() += 1;
            }
        }

        Ok(counts
            .into_iter()
            .map(|(status, count)| RunStatusCount { status, count })
            .collect())
    }
}
