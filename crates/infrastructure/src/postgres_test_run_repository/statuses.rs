use super::*;

use crate::postgres_support::{begin_write, commit, lock_writable_run};

impl PostgresTestRunRepository {
    pub(super) async fn update_run_status_impl(
        &self,
        key: i64,
        status: RunStatus,
        requirement: &PermissionRequirement,
    ) -> AppResult<TestRun> {
        let context = format!("status update of test run {key}");
        let mut transaction = begin_write(&self.pool, &context).await?;
        lock_writable_run(&mut *transaction, key, requirement).await?;

        let row = sqlx::query_as::<_, TestRunRow>(
            r#"
            UPDATE test_runs
            SET status = $2
            WHERE id = $1
            RETURNING id, project_id, run_id, branch, commit_sha, triggered_by, status, created_at
            "#,
        )
        .bind(key)
        .bind(status.as_str())
        .fetch_optional(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Store(format!("failed to update status of test run {key}: {error}"))
        })?
        .ok_or_else(|| run_not_found(key))?;

        commit(transaction, &context).await?;
        row.into_run()
    }

    pub(super) async fn save_rolled_up_statuses_impl(
        &self,
        key: i64,
        run_status: RunStatus,
        suite_statuses: &[(u64, RunStatus)],
        requirement: &PermissionRequirement,
    ) -> AppResult<TestRun> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Store(format!(
                "failed to start status transaction for test run {key}: {error}"
            ))
        })?;

        lock_writable_run(&mut *transaction, key, requirement).await?;

        let row = sqlx::query_as::<_, TestRunRow>(
            r#"
            UPDATE test_runs
            SET status = $2
            WHERE id = $1
            RETURNING id, project_id, run_id, branch, commit_sha, triggered_by, status, created_at
            "#,
        )
        .bind(key)
        .bind(run_status.as_str())
        .fetch_optional(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Store(format!("failed to update status of test run {key}: {error}"))
        })?
        .ok_or_else(|| run_not_found(key))?;

        for (suite_run_id, status) in suite_statuses {
            let updated = sqlx::query(
                r#"
                UPDATE suite_runs
                SET status = $3
                WHERE id = $1 AND test_run_id = $2
                "#,
            )
            .bind(db_key(*suite_run_id)?)
            .bind(key)
            .bind(status.as_str())
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Store(format!(
                    "failed to update status of suite {suite_run_id}: {error}"
                ))
            })?;

            if updated.rows_affected() == 0 {
                return Err(AppError::NotFound(format!(
                    "suite {suite_run_id} does not belong to test run {key}"
                )));
            }
        }

        transaction.commit().await.map_err(|error| {
            AppError::Store(format!(
                "failed to commit statuses of test run {key}: {error}"
            ))
        })?;

        row.into_run()
    }
}
