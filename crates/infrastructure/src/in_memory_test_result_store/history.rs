use std::collections::BTreeMap;

use async_trait::async_trait;
use fern_application::{SpecHistory, SpecHistoryRepository};
use fern_core::AppResult;
use fern_domain::{Outcome, ProjectId, SpecIdentity, SpecRun, TestRun};

use super::{InMemoryTestResultStore, StoreState};

impl StoreState {
    /// Specs of a project, most recent first.
    fn specs_newest_first(&self, project_id: &ProjectId) -> Vec<&SpecRun> {
        let mut runs: Vec<&TestRun> = self
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

        let mut suites_by_run: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
        for suite in self.suites.values() {
            suites_by_run
                .entry(suite.test_run_id())
                .or_default()
                .push(suite.id());
        }

        let mut specs_by_suite: BTreeMap<u64, Vec<&SpecRun>> = BTreeMap::new();
        for spec in self.specs.values() {
            specs_by_suite
                .entry(spec.suite_run_id())
                .or_default()
                .push(spec);
        }

        let mut specs = Vec::new();
        for run in runs {
            let Some(suite_ids) = suites_by_run.get(&run.id()) else {
                continue;
            };
            // Suite ids ascend within a run; walk them newest first.
            for suite_run_id in suite_ids.iter().rev() {
                if let Some(suite_specs) = specs_by_suite.get_mut(suite_run_id) {
                    suite_specs.sort_by_key(|spec| std::cmp::Reverse(spec.ordinal()));
                    specs.extend(suite_specs.iter().copied());
                }
            }
        }

        specs
    }
}

#[async_trait]
impl SpecHistoryRepository for InMemoryTestResultStore {
    async fn list_recent_outcomes(
        &self,
        project_id: &ProjectId,
        spec_identity: &SpecIdentity,
        limit: usize,
    ) -> AppResult<Vec<Outcome>> {
        let state = self.state.read().await;
        Ok(state
            .specs_newest_first(project_id)
            .into_iter()
            .filter(|spec| spec.spec_identity() == spec_identity)
            .take(limit)
            .map(SpecRun::outcome)
            .collect())
    }

    async fn list_project_histories(
        &self,
        project_id: &ProjectId,
        per_spec_limit: usize,
    ) -> AppResult<Vec<SpecHistory>> {
        let state = self.state.read().await;
        let mut histories: BTreeMap<&SpecIdentity, Vec<Outcome>> = BTreeMap::new();
        for spec in state.specs_newest_first(project_id) {
            let outcomes = histories.entry(spec.spec_identity()).or_default();
            if outcomes.len() < per_spec_limit {
                outcomes.push(spec.outcome());
            }
        }

        Ok(histories
            .into_iter()
            .map(|(spec_identity, outcomes)| SpecHistory {
                spec_identity: spec_identity.clone(),
                outcomes,
            })
            .collect())
    }
}
