use super::*;

use crate::postgres_support::{begin_snapshot, page_bound};

impl PostgresTestRunRepository {
    pub(super) async fn find_run_impl(&self, test_run_id: u64) -> AppResult<Option<TestRun>> {
        let Ok(key) = i64::try_from(test_run_id) else {
            return Ok(None);
        };

        let row = sqlx::query_as::<_, TestRunRow>(
            r#"
            SELECT id, project_id, run_id, branch, commit_sha, triggered_by, status, created_at
            FROM test_runs
            WHERE id = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Store(format!("failed to find test run {test_run_id}: {error}"))
        })?;

        row.map(TestRunRow::into_run).transpose()
    }

    pub(super) async fn find_run_details_impl(
        &self,
        test_run_id: u64,
    ) -> AppResult<Option<TestRunDetails>> {
        let Ok(key) = i64::try_from(test_run_id) else {
            return Ok(None);
        };
        let mut transaction = begin_snapshot(&self.pool, "test run lookup").await?;

        let row = sqlx::query_as::<_, TestRunRow>(
            r#"
            SELECT id, project_id, run_id, branch, commit_sha, triggered_by, status, created_at
            FROM test_runs
            WHERE id = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Store(format!("failed to find test run {test_run_id}: {error}"))
        })?;

        let details = match row {
            Some(row) => Some(load_details(&mut *transaction, row).await?),
            None => None,
        };

        transaction.commit().await.map_err(|error| {
            AppError::Store(format!(
                "failed to finish lookup of test run {test_run_id}: {error}"
            ))
        })?;

        Ok(details)
    }

    pub(super) async fn find_run_details_by_run_id_impl(
        &self,
        project_id: &ProjectId,
        run_id: &str,
    ) -> AppResult<Option<TestRunDetails>> {
        let mut transaction = begin_snapshot(&self.pool, "test run lookup").await?;

        let row = sqlx::query_as::<_, TestRunRow>(
            r#"
            SELECT id, project_id, run_id, branch, commit_sha, triggered_by, status, created_at
            FROM test_runs
            WHERE project_id = $1 AND run_id = $2
            "#,
        )
        .bind(project_id.as_str())
        .bind(run_id)
        .fetch_optional(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to find run '{run_id}' in project '{project_id}': {error}"
            ))
        })?;

        let details = match row {
            Some(row) => Some(load_details(&mut *transaction, row).await?),
            None => None,
        };

        transaction.commit().await.map_err(|error| {
            AppError::Store(format!(
                "failed to finish lookup of run '{run_id}' in project '{project_id}': {error}"
            ))
        })?;

        Ok(details)
    }

    pub(super) async fn list_runs_impl(
        &self,
        project_id: &ProjectId,
        limit: usize,
        offset: usize,
    ) -> AppResult<TestRunPage> {
        let mut transaction = begin_snapshot(&self.pool, "test run listing").await?;

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM test_runs
            WHERE project_id = $1
            "#,
        )
        .bind(project_id.as_str())
        .fetch_one(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to count runs of project '{project_id}': {error}"
            ))
        })?;

        let rows = sqlx::query_as::<_, TestRunRow>(
            r#"
            SELECT id, project_id, run_id, branch, commit_sha, triggered_by, status, created_at
            FROM test_runs
            WHERE project_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(project_id.as_str())
        .bind(page_bound(limit))
        .bind(page_bound(offset))
        .fetch_all(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to list runs of project '{project_id}': {error}"
            ))
        })?;

        transaction.commit().await.map_err(|error| {
            AppError::Store(format!(
                "failed to finish run listing of project '{project_id}': {error}"
            ))
        })?;

        Ok(TestRunPage {
            runs: rows
                .into_iter()
                .map(TestRunRow::into_run)
                .collect::<AppResult<_>>()?,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }

    pub(super) async fn count_runs_by_status_impl(
        &self,
        project_id: &ProjectId,
    ) -> AppResult<Vec<RunStatusCount>> {
        let rows = sqlx::query_as::<_, StatusCountRow>(
            r#"
            SELECT status, COUNT(*) AS run_count
            FROM test_runs
            WHERE project_id = $1
            GROUP BY status
            ORDER BY status
            "#,
        )
        .bind(project_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to count runs of project '{project_id}' by status: {error}"
            ))
        })?;

        rows.into_iter()
            .map(|row| {
                Ok(RunStatusCount {
                    status: row.status.parse::<RunStatus>()?,
                    count: u64::try_from(row.run_count).unwrap_or_default(),
                })
            })
            .collect()
    }
}
