use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fern_core::{AppError, AppResult, UserIdentity};
use fern_domain::{
    Outcome, PermissionGrant, PermissionKind, PermissionRequirement, Project, ProjectId, RunStatus,
    RunTree, SpecIdentity, SpecRun, SuiteRun, Tag, TagName, Team, TestRun, TestRunDetails,
};
use tokio::sync::Mutex;

use crate::{
    PermissionGrantRepository, ProjectPage, ProjectRepository, RunStatusCount, SpecHistory,
    SpecHistoryRepository, TagRepository, TestRunPage, TestRunRepository,
};

pub(crate) fn actor(subject: &str) -> UserIdentity {
    UserIdentity::new(subject, None).unwrap_or_else(|_| unreachable!())
}

pub(crate) fn project_id(value: &str) -> ProjectId {
    ProjectId::new(value).unwrap_or_else(|_| unreachable!())
}

#[derive(Default)]
pub(crate) struct FakeGrantRepository {
    pub(crate) grants: Mutex<Vec<PermissionGrant>>,
}

impl FakeGrantRepository {
    pub(crate) async fn seed(
        &self,
        project: &str,
        user_id: &str,
        kind: PermissionKind,
        expires_in: Option<Duration>,
    ) {
        let now = Utc::now();
        let grant = PermissionGrant::new(
            project_id(project),
            user_id,
            kind,
            expires_in.map(|offset| now + offset),
            now,
        )
        .unwrap_or_else(|_| unreachable!());
        self.grants.lock().await.push(grant);
    }
}

pub(crate) fn write_requirement(subject: &str) -> PermissionRequirement {
    PermissionRequirement::new(subject, PermissionKind::Write).unwrap_or_else(|_| unreachable!())
}

fn enforce(
    grants: &[PermissionGrant],
    project_id: &ProjectId,
    requirement: &PermissionRequirement,
) -> AppResult<()> {
    if requirement.is_met_by(project_id, grants, Utc::now()) {
        Ok(())
    } else {
        Err(requirement.denied(project_id))
    }
}

#[async_trait]
impl PermissionGrantRepository for FakeGrantRepository {
    async fn append_grant(
        &self,
        grant: PermissionGrant,
        requirement: &PermissionRequirement,
    ) -> AppResult<()> {
        let mut grants = self.grants.lock().await;
        enforce(&grants, grant.project_id(), requirement)?;
        grants.push(grant);
        Ok(())
    }

    async fn list_grants(
        &self,
        project_id: &ProjectId,
        user_id: &str,
        kind: PermissionKind,
    ) -> AppResult<Vec<PermissionGrant>> {
        Ok(self
            .grants
            .lock()
            .await
            .iter()
            .filter(|grant| {
                grant.project_id() == project_id
                    && grant.user_id().as_str() == user_id
                    && grant.kind() == kind
            })
            .cloned()
            .collect())
    }

    async fn list_user_grants(&self, user_id: &str) -> AppResult<Vec<PermissionGrant>> {
        Ok(self
            .grants
            .lock()
            .await
            .iter()
            .filter(|grant| grant.user_id().as_str() == user_id)
            .cloned()
            .collect())
    }

    async fn list_project_grants(
        &self,
        project_id: &ProjectId,
    ) -> AppResult<Vec<PermissionGrant>> {
        Ok(self
            .grants
            .lock()
            .await
            .iter()
            .filter(|grant| grant.project_id() == project_id)
            .cloned()
            .collect())
    }

    async fn delete_grants(
        &self,
        project_id: &ProjectId,
        user_id: &str,
        kind: PermissionKind,
        requirement: &PermissionRequirement,
    ) -> AppResult<u64> {
        let mut grants = self.grants.lock().await;
        enforce(&grants, project_id, requirement)?;
        let before = grants.len();
        grants.retain(|grant| {
            !(grant.project_id() == project_id
                && grant.user_id().as_str() == user_id
                && grant.kind() == kind)
        });
        Ok((before - grants.len()) as u64)
    }
}

pub(crate) struct FakeProjectRepository {
    grants: Arc<FakeGrantRepository>,
    pub(crate) projects: Mutex<BTreeMap<ProjectId, Project>>,
}

impl FakeProjectRepository {
    pub(crate) fn new(grants: Arc<FakeGrantRepository>) -> Self {
        Self {
            grants,
            projects: Mutex::new(BTreeMap::new()),
        }
    }

    pub(crate) async fn seed(&self, project: &str, active: bool) {
        let stored = Project::new(
            project_id(project),
            project,
            None,
            Team::new("qa").unwrap_or_else(|_| unreachable!()),
            "seed",
            Utc::now(),
        )
        .unwrap_or_else(|_| unreachable!())
        .with_active(active);
        self.projects
            .lock()
            .await
            .insert(stored.project_id().clone(), stored);
    }
}

#[async_trait]
impl ProjectRepository for FakeProjectRepository {
    async fn create_project(
        &self,
        project: Project,
        owner_grants: Vec<PermissionGrant>,
    ) -> AppResult<()> {
        let mut projects = self.projects.lock().await;
        if projects.contains_key(project.project_id()) {
            return Err(AppError::Conflict(format!(
                "project '{}' already exists",
                project.project_id()
            )));
        }

        projects.insert(project.project_id().clone(), project);
        self.grants.grants.lock().await.extend(owner_grants);
        Ok(())
    }

    async fn find_project(&self, project_id: &ProjectId) -> AppResult<Option<Project>> {
        Ok(self.projects.lock().await.get(project_id).cloned())
    }

    async fn list_projects(
        &self,
        project_ids: &[ProjectId],
        limit: usize,
        offset: usize,
    ) -> AppResult<ProjectPage> {
        let projects = self.projects.lock().await;
        let visible: Vec<Project> = projects
            .values()
            .filter(|project| project_ids.contains(project.project_id()))
            .cloned()
            .collect();

        Ok(ProjectPage {
            total: visible.len() as u64,
            projects: visible.into_iter().skip(offset).take(limit).collect(),
        })
    }

    async fn update_project(
        &self,
        project: &Project,
        requirement: &PermissionRequirement,
    ) -> AppResult<()> {
        let mut projects = self.projects.lock().await;
        enforce(&self.grants.grants.lock().await, project.project_id(), requirement)?;
        let Some(stored) = projects.get_mut(project.project_id()) else {
            return Err(AppError::NotFound("project missing".to_owned()));
        };
        *stored = project.clone();
        Ok(())
    }

    async fn set_project_active(
        &self,
        project_id: &ProjectId,
        active: bool,
        requirement: &PermissionRequirement,
    ) -> AppResult<()> {
        let mut projects = self.projects.lock().await;
        enforce(&self.grants.grants.lock().await, project_id, requirement)?;
        let Some(stored) = projects.remove(project_id) else {
            return Err(AppError::NotFound("project missing".to_owned()));
        };
        projects.insert(project_id.clone(), stored.with_active(active));
        Ok(())
    }
}

#[derive(Default)]
struct FakeRunState {
    next_id: u64,
    runs: BTreeMap<u64, TestRunDetails>,
}

impl FakeRunState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub(crate) struct FakeTestRunRepository {
    state: Mutex<FakeRunState>,
    calls: AtomicUsize,
    pub(crate) requirements: Mutex<Vec<PermissionRequirement>>,
}

impl FakeTestRunRepository {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn record(&self, requirement: &PermissionRequirement) {
        self.touch();
        self.requirements.lock().await.push(requirement.clone());
    }
}

#[async_trait]
impl TestRunRepository for FakeTestRunRepository {
    async fn create_run_with_tree(
        &self,
        tree: RunTree,
        created_at: DateTime<Utc>,
        requirement: &PermissionRequirement,
    ) -> AppResult<TestRunDetails> {
        self.record(requirement).await;
        let mut state = self.state.lock().await;
        if state.runs.values().any(|details| {
            details.run.project_id() == tree.header().project_id()
                && details.run.run_id() == tree.header().run_id()
        }) {
            return Err(AppError::Conflict("duplicate run".to_owned()));
        }

        let run_key = state.next_id();
        let mut suites = Vec::with_capacity(tree.suites().len());
        for suite in tree.suites() {
            let suite_key = state.next_id();
            suites.push(SuiteRun::new(
                suite_key,
                run_key,
                suite.name().as_str(),
                suite.status(),
            )?);
        }
        let mut specs = Vec::with_capacity(tree.specs().len());
        for spec in tree.specs() {
            let spec_key = state.next_id();
            specs.push(SpecRun::from_new(
                spec_key,
                suites[spec.suite_index()].id(),
                spec,
            ));
        }

        let details = TestRunDetails {
            run: TestRun::new(run_key, tree.header().clone(), tree.status(), created_at),
            suites,
            specs,
            tags: Vec::new(),
        };
        state.runs.insert(run_key, details.clone());
        Ok(details)
    }

    async fn find_run(&self, test_run_id: u64) -> AppResult<Option<TestRun>> {
        self.touch();
        Ok(self
            .state
            .lock()
            .await
            .runs
            .get(&test_run_id)
            .map(|details| details.run.clone()))
    }

    async fn find_run_details(&self, test_run_id: u64) -> AppResult<Option<TestRunDetails>> {
        self.touch();
        Ok(self.state.lock().await.runs.get(&test_run_id).cloned())
    }

    async fn find_run_details_by_run_id(
        &self,
        project_id: &ProjectId,
        run_id: &str,
    ) -> AppResult<Option<TestRunDetails>> {
        self.touch();
        Ok(self
            .state
            .lock()
            .await
            .runs
            .values()
            .find(|details| {
                details.run.project_id() == project_id && details.run.run_id().as_str() == run_id
            })
            .cloned())
    }

    async fn list_runs(
        &self,
        project_id: &ProjectId,
        limit: usize,
        offset: usize,
    ) -> AppResult<TestRunPage> {
        self.touch();
        let state = self.state.lock().await;
        let mut runs: Vec<TestRun> = state
            .runs
            .values()
            .filter(|details| details.run.project_id() == project_id)
            .map(|details| details.run.clone())
            .collect();
        runs.sort_by(|left, right| {
            right
                .created_at()
                .cmp(&left.created_at())
                .then_with(|| right.id().cmp(&left.id()))
        });

        Ok(TestRunPage {
            total: runs.len() as u64,
            runs: runs.into_iter().skip(offset).take(limit).collect(),
        })
    }

    async fn update_run_status(
        &self,
        test_run_id: u64,
        status: RunStatus,
        requirement: &PermissionRequirement,
    ) -> AppResult<TestRun> {
        self.record(requirement).await;
        let mut state = self.state.lock().await;
        let Some(details) = state.runs.get_mut(&test_run_id) else {
            return Err(AppError::NotFound("run missing".to_owned()));
        };
        details.run = details.run.clone().with_status(status);
        Ok(details.run.clone())
    }

    async fn save_rolled_up_statuses(
        &self,
        test_run_id: u64,
        run_status: RunStatus,
        suite_statuses: &[(u64, RunStatus)],
        requirement: &PermissionRequirement,
    ) -> AppResult<TestRun> {
        self.record(requirement).await;
        let mut state = self.state.lock().await;
        let Some(details) = state.runs.get_mut(&test_run_id) else {
            return Err(AppError::NotFound("run missing".to_owned()));
        };
        for suite in &mut details.suites {
            if let Some((_, status)) = suite_statuses.iter().find(|(id, _)| *id == suite.id()) {
                *suite = suite.clone().with_status(*status);
            }
        }
        details.run = details.run.clone().with_status(run_status);
        Ok(details.run.clone())
    }

    async fn delete_run(
        &self,
        test_run_id: u64,
        requirement: &PermissionRequirement,
    ) -> AppResult<()> {
        self.record(requirement).await;
        self.state
            .lock()
            .await
            .runs
            .remove(&test_run_id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound("run missing".to_owned()))
    }

    async fn count_runs_by_status(
        &self,
        project_id: &ProjectId,
    ) -> AppResult<Vec<RunStatusCount>> {
        self.touch();
        let state = self.state.lock().await;
        let mut counts: BTreeMap<RunStatus, u64> = BTreeMap::new();
        for details in state.runs.values() {
            if details.run.project_id() == project_id {
                *counts.entry(details.run.status()).or_default() += 1;
            }
        }

        Ok(counts
            .into_iter()
            .map(|(status, count)| RunStatusCount { status, count })
            .collect())
    }
}

#[derive(Default)]
struct FakeTagState {
    next_id: u64,
    tags: BTreeMap<u64, Tag>,
    assignments: BTreeSet<(u64, u64)>,
}

impl FakeTagState {
    fn run_tags(&self, test_run_id: u64) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self
            .assignments
            .iter()
            .filter(|(run, _)| *run == test_run_id)
            .filter_map(|(_, tag_id)| self.tags.get(tag_id).cloned())
            .collect();
        tags.sort_by(|left, right| left.name().cmp(right.name()));
        tags
    }
}

#[derive(Default)]
pub(crate) struct FakeTagRepository {
    state: Mutex<FakeTagState>,
    pub(crate) requirements: Mutex<Vec<PermissionRequirement>>,
}

#[async_trait]
impl TagRepository for FakeTagRepository {
    async fn create_tag(&self, name: TagName) -> AppResult<Tag> {
        let mut state = self.state.lock().await;
        if state.tags.values().any(|tag| tag.name() == &name) {
            return Err(AppError::Conflict(format!(
                "tag '{}' already exists",
                name.as_str()
            )));
        }

        state.next_id += 1;
        let tag = Tag::new(state.next_id, name);
        state.tags.insert(tag.id(), tag.clone());
        Ok(tag)
    }

    async fn find_tag_by_name(&self, name: &TagName) -> AppResult<Option<Tag>> {
        Ok(self
            .state
            .lock()
            .await
            .tags
            .values()
            .find(|tag| tag.name() == name)
            .cloned())
    }

    async fn list_tags(&self) -> AppResult<Vec<Tag>> {
        let mut tags: Vec<Tag> = self.state.lock().await.tags.values().cloned().collect();
        tags.sort_by(|left, right| left.name().cmp(right.name()));
        Ok(tags)
    }

    async fn delete_tag(&self, tag_id: u64) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if state.tags.remove(&tag_id).is_none() {
            return Err(AppError::NotFound(format!("tag {tag_id} does not exist")));
        }
        state.assignments.retain(|(_, assigned)| *assigned != tag_id);
        Ok(())
    }

    async fn assign_tags(
        &self,
        test_run_id: u64,
        tag_ids: &[u64],
        requirement: &PermissionRequirement,
    ) -> AppResult<Vec<Tag>> {
        self.requirements.lock().await.push(requirement.clone());
        let mut state = self.state.lock().await;
        if let Some(missing) = tag_ids.iter().find(|tag_id| !state.tags.contains_key(*tag_id)) {
            return Err(AppError::NotFound(format!("tag {missing} does not exist")));
        }
        for tag_id in tag_ids {
            state.assignments.insert((test_run_id, *tag_id));
        }
        Ok(state.run_tags(test_run_id))
    }

    async fn unassign_tags(
        &self,
        test_run_id: u64,
        tag_ids: &[u64],
        requirement: &PermissionRequirement,
    ) -> AppResult<Vec<Tag>> {
        self.requirements.lock().await.push(requirement.clone());
        let mut state = self.state.lock().await;
        for tag_id in tag_ids {
            state.assignments.remove(&(test_run_id, *tag_id));
        }
        Ok(state.run_tags(test_run_id))
    }

    async fn list_run_tags(&self, test_run_id: u64) -> AppResult<Vec<Tag>> {
        Ok(self.state.lock().await.run_tags(test_run_id))
    }
}

/// Outcome histories keyed by project and spec, most recent first.
#[derive(Default)]
pub(crate) struct FakeSpecHistoryRepository {
    histories: Mutex<BTreeMap<(ProjectId, SpecIdentity), Vec<Outcome>>>,
}

impl FakeSpecHistoryRepository {
    pub(crate) async fn seed(&self, project: &str, spec_identity: &str, outcomes: &[Outcome]) {
        let identity = SpecIdentity::new(spec_identity).unwrap_or_else(|_| unreachable!());
        self.histories
            .lock()
            .await
            .insert((project_id(project), identity), outcomes.to_vec());
    }
}

fn most_recent(outcomes: &[Outcome], limit: usize) -> Vec<Outcome> {
    outcomes.iter().copied().take(limit).collect()
}

#[async_trait]
impl SpecHistoryRepository for FakeSpecHistoryRepository {
    async fn list_recent_outcomes(
        &self,
        project_id: &ProjectId,
        spec_identity: &SpecIdentity,
        limit: usize,
    ) -> AppResult<Vec<Outcome>> {
        Ok(self
            .histories
            .lock()
            .await
            .get(&(project_id.clone(), spec_identity.clone()))
            .map(|outcomes| most_recent(outcomes, limit))
            .unwrap_or_default())
    }

    async fn list_project_histories(
        &self,
        project_id: &ProjectId,
        per_spec_limit: usize,
    ) -> AppResult<Vec<SpecHistory>> {
        Ok(self
            .histories
            .lock()
            .await
            .iter()
            .filter(|((project, _), _)| project == project_id)
            .map(|((_, spec_identity), outcomes)| SpecHistory {
                spec_identity: spec_identity.clone(),
                outcomes: most_recent(outcomes, per_spec_limit),
            })
            .collect())
    }
}
