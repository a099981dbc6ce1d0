use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fern_core::{AppError, AppResult};
use fern_domain::{
    PermissionRequirement, ProjectId, RunStatus, RunTree, TestRun, TestRunDetails,
};
use serde::Serialize;

/// Largest page a list query may request.
pub const MAX_PAGE_SIZE: usize = 200;

/// Offset pagination parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    /// Maximum rows returned.
    pub limit: usize,
    /// Number of rows skipped.
    pub offset: usize,
}

impl PageQuery {
    /// Creates validated pagination parameters.
    pub fn new(limit: usize, offset: usize) -> AppResult<Self> {
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(AppError::Validation(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        Ok(Self { limit, offset })
    }
}

/// One page of runs plus the total read from the same snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestRunPage {
    /// Runs ordered by creation time, most recent first.
    pub runs: Vec<TestRun>,
    /// Number of runs in the project.
    pub total: u64,
}

/// Number of runs holding one status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunStatusCount {
    /// Run status.
    pub status: RunStatus,
    /// Runs currently in that status.
    pub count: u64,
}

/// Aggregate run counts for one project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestRunStatistics {
    /// Project the counts belong to.
    pub project_id: ProjectId,
    /// Total runs.
    pub total: u64,
    /// Passed runs.
    pub passed: u64,
    /// Failed runs.
    pub failed: u64,
    /// Skipped runs.
    pub skipped: u64,
    /// Share of passed runs among runs that executed anything.
    pub pass_rate: f64,
}

impl TestRunStatistics {
    /// Builds statistics from per-status counts.
    #[must_use]
    pub fn from_counts(project_id: ProjectId, counts: &[RunStatusCount]) -> Self {
        let count_of = |status: RunStatus| {
            counts
                .iter()
                .filter(|entry| entry.status == status)
                .map(|entry| entry.count)
                .sum::<u64>()
        };
        let passed = count_of(RunStatus::Passed);
        let failed = count_of(RunStatus::Failed);
        let skipped = count_of(RunStatus::Skipped);
        let executed = passed + failed;

        Self {
            project_id,
            total: passed + failed + skipped,
            passed,
            failed,
            skipped,
            pass_rate: if executed == 0 {
                0.0
            } else {
                passed as f64 / executed as f64
            },
        }
    }
}

/// Failure of one id inside a bulk delete.
#[derive(Debug)]
pub struct BulkDeleteFailure {
    /// Run surrogate key.
    pub test_run_id: u64,
    /// Why the run was not deleted.
    pub error: AppError,
}

/// Per-id result of a bulk delete.
#[derive(Debug, Default)]
pub struct BulkDeleteReport {
    /// Runs deleted with their whole tree.
    pub deleted: Vec<u64>,
    /// Runs left untouched.
    pub failed: Vec<BulkDeleteFailure>,
}

/// Repository port for the run → suite → spec aggregate.
///
/// Every write re-checks its [`PermissionRequirement`] against the run's
/// project inside the transaction that applies it and fails with `Forbidden`
/// without writing anything when no live grant matches.
#[async_trait]
pub trait TestRunRepository: Send + Sync {
    /// Persists a validated tree atomically and assigns surrogate keys.
    ///
    /// Fails with `Conflict` when the project already has the run id.
    async fn create_run_with_tree(
        &self,
        tree: RunTree,
        created_at: DateTime<Utc>,
        requirement: &PermissionRequirement,
    ) -> AppResult<TestRunDetails>;

    /// Returns a run root without its tree.
    async fn find_run(&self, test_run_id: u64) -> AppResult<Option<TestRun>>;

    /// Returns a run with suites, specs, and tags.
    async fn find_run_details(&self, test_run_id: u64) -> AppResult<Option<TestRunDetails>>;

    /// Returns a run with its tree by caller-supplied identifier.
    async fn find_run_details_by_run_id(
        &self,
        project_id: &ProjectId,
        run_id: &str,
    ) -> AppResult<Option<TestRunDetails>>;

    /// Returns one page plus the total, both read from one snapshot.
    async fn list_runs(
        &self,
        project_id: &ProjectId,
        limit: usize,
        offset: usize,
    ) -> AppResult<TestRunPage>;

    /// Overrides the run status without touching children.
    async fn update_run_status(
        &self,
        test_run_id: u64,
        status: RunStatus,
        requirement: &PermissionRequirement,
    ) -> AppResult<TestRun>;

    /// Persists recomputed suite and run statuses together.
    async fn save_rolled_up_statuses(
        &self,
        test_run_id: u64,
        run_status: RunStatus,
        suite_statuses: &[(u64, RunStatus)],
        requirement: &PermissionRequirement,
    ) -> AppResult<TestRun>;

    /// Deletes one run with its suites, specs, and tag associations atomically.
    ///
    /// Fails with `NotFound` when the run does not exist.
    async fn delete_run(
        &self,
        test_run_id: u64,
        requirement: &PermissionRequirement,
    ) -> AppResult<()>;

    /// Counts project runs per status.
    async fn count_runs_by_status(&self, project_id: &ProjectId)
    -> AppResult<Vec<RunStatusCount>>;
}
