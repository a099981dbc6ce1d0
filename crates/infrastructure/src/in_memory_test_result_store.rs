use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use fern_core::{AppError, AppResult};
use fern_domain::{
    PermissionGrant, PermissionRequirement, Project, ProjectId, SpecRun, SuiteRun, Tag, TestRun,
    TestRunDetails,
};
use tokio::sync::RwLock;

mod history;
mod projects;
mod tags;
mod test_runs;

/// In-memory store implementing every repository port.
///
/// Runs, suites, and specs live in flat maps keyed by surrogate id with parent
/// back-references. Every multi-row write happens under one write lock, so
/// readers never observe a partial tree. Writes check the caller's grant under
/// that same lock.
#[derive(Debug, Default)]
pub struct InMemoryTestResultStore {
    state: RwLock<StoreState>,
}

impl InMemoryTestResultStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    projects: BTreeMap<ProjectId, Project>,
    grants: Vec<PermissionGrant>,
    runs: BTreeMap<u64, TestRun>,
    suites: BTreeMap<u64, SuiteRun>,
    specs: BTreeMap<u64, SpecRun>,
    tags: BTreeMap<u64, Tag>,
    run_tags: BTreeSet<(u64, u64)>,
    sequences: Sequences,
}

#[derive(Debug, Default)]
struct Sequences {
    run: u64,
    suite: u64,
    spec: u64,
    tag: u64,
}

fn next(sequence: &mut u64) -> u64 {
    *sequence += 1;
    *sequence
}

impl StoreState {
    fn enforce(&self, project_id: &ProjectId, requirement: &PermissionRequirement) -> AppResult<()> {
        if requirement.is_met_by(project_id, &self.grants, Utc::now()) {
            Ok(())
        } else {
            Err(requirement.denied(project_id))
        }
    }

    /// Checks the requirement against the project owning an existing run.
    fn enforce_on_run(
        &self,
        test_run_id: u64,
        requirement: &PermissionRequirement,
    ) -> AppResult<()> {
        let run = self
            .runs
            .get(&test_run_id)
            .ok_or_else(|| AppError::NotFound(format!("test run {test_run_id} does not exist")))?;
        self.enforce(run.project_id(), requirement)
    }

    fn suites_of(&self, test_run_id: u64) -> impl Iterator<Item = &SuiteRun> {
        self.suites
            .values()
            .filter(move |suite| suite.test_run_id() == test_run_id)
    }

    fn run_tags(&self, test_run_id: u64) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self
            .run_tags
            .range((test_run_id, 0)..=(test_run_id, u64::MAX))
            .filter_map(|(_, tag_id)| self.tags.get(tag_id).cloned())
            .collect();
        tags.sort_by(|left, right| left.name().cmp(right.name()));
        tags
    }

    fn run_details(&self, run: &TestRun) -> TestRunDetails {
        let suites: Vec<SuiteRun> = self.suites_of(run.id()).cloned().collect();
        let position: BTreeMap<u64, usize> = suites
            .iter()
            .enumerate()
            .map(|(index, suite)| (suite.id(), index))
            .collect();
        let mut specs: Vec<SpecRun> = self
            .specs
            .values()
            .filter(|spec| position.contains_key(&spec.suite_run_id()))
            .cloned()
            .collect();
        specs.sort_by_key(|spec| (position.get(&spec.suite_run_id()).copied(), spec.ordinal()));

        TestRunDetails {
            run: run.clone(),
            suites,
            specs,
            tags: self.run_tags(run.id()),
        }
    }
}
