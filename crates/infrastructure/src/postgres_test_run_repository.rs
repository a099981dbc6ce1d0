use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fern_application::{RunStatusCount, TestRunPage, TestRunRepository};
use fern_core::{AppError, AppResult};
use fern_domain::{
    Outcome, PermissionRequirement, ProjectId, RunStatus, RunTree, SpecRun, SuiteRun, TestRun, TestRunDetails,
    TestRunHeader,
};
use sqlx::{FromRow, PgConnection, PgPool};

use crate::postgres_support::{db_key, domain_key};
use crate::postgres_tag_repository::fetch_run_tags;

mod reads;
mod statuses;
mod writes;

/// PostgreSQL-backed repository for the run, suite, and spec tables.
#[derive(Clone)]
pub struct PostgresTestRunRepository {
    pool: PgPool,
}

impl PostgresTestRunRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct TestRunRow {
    id: i64,
    project_id: String,
    run_id: String,
    branch: String,
    commit_sha: String,
    triggered_by: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl TestRunRow {
    fn into_run(self) -> AppResult<TestRun> {
        Ok(TestRun::new(
            domain_key(self.id)?,
            TestRunHeader::new(
                self.run_id,
                self.project_id,
                self.branch,
                self.commit_sha,
                self.triggered_by,
            )?,
            self.status.parse::<RunStatus>()?,
            self.created_at,
        ))
    }
}

#[derive(Debug, FromRow)]
struct SuiteRunRow {
    id: i64,
    test_run_id: i64,
    name: String,
    status: String,
}

impl SuiteRunRow {
    fn into_suite(self) -> AppResult<SuiteRun> {
        SuiteRun::new(
            domain_key(self.id)?,
            domain_key(self.test_run_id)?,
            self.name,
            self.status.parse::<RunStatus>()?,
        )
    }
}

#[derive(Debug, FromRow)]
struct SpecRunRow {
    id: i64,
    suite_run_id: i64,
    ordinal: i64,
    spec_identity: String,
    outcome: String,
    duration_ms: Option<i64>,
    error_detail: Option<String>,
}

impl SpecRunRow {
    fn into_spec(self) -> AppResult<SpecRun> {
        let ordinal = u32::try_from(self.ordinal).map_err(|_| {
            AppError::Store(format!(
                "spec {} has out of range ordinal {}",
                self.id, self.ordinal
            ))
        })?;
        let duration_ms = self
            .duration_ms
            .map(u64::try_from)
            .transpose()
            .map_err(|_| AppError::Store(format!("spec {} has a negative duration", self.id)))?;

        SpecRun::new(
            domain_key(self.id)?,
            domain_key(self.suite_run_id)?,
            ordinal,
            self.spec_identity,
            self.outcome.parse::<Outcome>()?,
            duration_ms,
            self.error_detail,
        )
    }
}

#[derive(Debug, FromRow)]
struct StatusCountRow {
    status: String,
    run_count: i64,
}

fn run_not_found(key: i64) -> AppError {
    AppError::NotFound(format!("test run {key} does not exist"))
}

/// Loads the suites, specs, and tags hanging off a run row.
async fn load_details(connection: &mut PgConnection, row: TestRunRow) -> AppResult<TestRunDetails> {
    let key = row.id;
    let run = row.into_run()?;

    let suites = sqlx::query_as::<_, SuiteRunRow>(
        r#"
        SELECT id, test_run_id, name, status
        FROM suite_runs
        WHERE test_run_id = $1
        ORDER BY id
        "#,
    )
    .bind(key)
    .fetch_all(&mut *connection)
    .await
    .map_err(|error| {
        AppError::Store(format!("failed to load suites of test run {key}: {error}"))
    })?;

    let specs = sqlx::query_as::<_, SpecRunRow>(
        r#"
        SELECT sp.id, sp.suite_run_id, sp.ordinal, sp.spec_identity, sp.outcome,
               sp.duration_ms, sp.error_detail
        FROM spec_runs sp
        INNER JOIN suite_runs su ON su.id = sp.suite_run_id
        WHERE su.test_run_id = $1
        ORDER BY su.id, sp.ordinal
        "#,
    )
    .bind(key)
    .fetch_all(&mut *connection)
    .await
    .map_err(|error| {
        AppError::Store(format!("failed to load specs of test run {key}: {error}"))
    })?;

    let tags = fetch_run_tags(&mut *connection, key).await?;

    Ok(TestRunDetails {
        run,
        suites: suites
            .into_iter()
            .map(SuiteRunRow::into_suite)
            .collect::<AppResult<_>>()?,
        specs: specs
            .into_iter()
            .map(SpecRunRow::into_spec)
            .collect::<AppResult<_>>()?,
        tags,
    })
}

#[async_trait]
impl TestRunRepository for PostgresTestRunRepository {
    async fn create_run_with_tree(
        &self,
        tree: RunTree,
        created_at: DateTime<Utc>,
        requirement: &PermissionRequirement,
    ) -> AppResult<TestRunDetails> {
        self.create_run_with_tree_impl(tree, created_at, requirement)
            .await
    }

    async fn find_run(&self, test_run_id: u64) -> AppResult<Option<TestRun>> {
        self.find_run_impl(test_run_id).await
    }

    async fn find_run_details(&self, test_run_id: u64) -> AppResult<Option<TestRunDetails>> {
        self.find_run_details_impl(test_run_id).await
    }

    async fn find_run_details_by_run_id(
        &self,
        project_id: &ProjectId,
        run_id: &str,
    ) -> AppResult<Option<TestRunDetails>> {
        self.find_run_details_by_run_id_impl(project_id, run_id)
            .await
    }

    async fn list_runs(
        &self,
        project_id: &ProjectId,
        limit: usize,
        offset: usize,
    ) -> AppResult<TestRunPage> {
        self.list_runs_impl(project_id, limit, offset).await
    }

    async fn update_run_status(
        &self,
        test_run_id: u64,
        status: RunStatus,
        requirement: &PermissionRequirement,
    ) -> AppResult<TestRun> {
        self.update_run_status_impl(db_key(test_run_id)?, status, requirement)
            .await
    }

    async fn save_rolled_up_statuses(
        &self,
        test_run_id: u64,
        run_status: RunStatus,
        suite_statuses: &[(u64, RunStatus)],
        requirement: &PermissionRequirement,
    ) -> AppResult<TestRun> {
        self.save_rolled_up_statuses_impl(
            db_key(test_run_id)?,
            run_status,
            suite_statuses,
            requirement,
        )
        .await
    }

    async fn delete_run(
        &self,
        test_run_id: u64,
        requirement: &PermissionRequirement,
    ) -> AppResult<()> {
        self.delete_run_impl(db_key(test_run_id)?, requirement)
            .await
    }

    async fn count_runs_by_status(
        &self,
        project_id: &ProjectId,
    ) -> AppResult<Vec<RunStatusCount>> {
        self.count_runs_by_status_impl(project_id).await
    }
}

#[cfg(test)]
mod tests;
