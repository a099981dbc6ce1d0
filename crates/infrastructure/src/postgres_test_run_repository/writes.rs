use super::*;

use tracing::debug;

use crate::postgres_support::{
    is_foreign_key_violation, is_unique_violation, lock_writable_run, require_live_grant,
};

#[derive(Debug, FromRow)]
struct InsertedRunRow {
    id: i64,
    created_at: DateTime<Utc>,
}

impl PostgresTestRunRepository {
    pub(super) async fn create_run_with_tree_impl(
        &self,
        tree: RunTree,
        created_at: DateTime<Utc>,
        requirement: &PermissionRequirement,
    ) -> AppResult<TestRunDetails> {
        let header = tree.header();
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Store(format!(
                "failed to start transaction for run '{}': {error}",
                header.run_id().as_str()
            ))
        })?;

        sqlx::query_scalar::<_, String>(
            "SELECT project_id FROM projects WHERE project_id = $1 FOR SHARE",
        )
        .bind(header.project_id().as_str())
        .fetch_optional(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to lock project '{}': {error}",
                header.project_id()
            ))
        })?
        .ok_or_else(|| {
            AppError::NotFound(format!("project '{}' does not exist", header.project_id()))
        })?;
        require_live_grant(&mut *transaction, header.project_id(), requirement).await?;

        let inserted = sqlx::query_as::<_, InsertedRunRow>(
            r#"
            INSERT INTO test_runs (project_id, run_id, branch, commit_sha, triggered_by, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, created_at
            "#,
        )
        .bind(header.project_id().as_str())
        .bind(header.run_id().as_str())
        .bind(header.branch())
        .bind(header.commit_sha())
        .bind(header.triggered_by())
        .bind(tree.status().as_str())
        .bind(created_at)
        .fetch_one(&mut *transaction)
        .await;

        let inserted = match inserted {
            Ok(row) => row,
            Err(error) if is_unique_violation(&error) => {
                return Err(AppError::Conflict(format!(
                    "run '{}' already exists in project '{}'",
                    header.run_id().as_str(),
                    header.project_id()
                )));
            }
            Err(error) if is_foreign_key_violation(&error) => {
                return Err(AppError::NotFound(format!(
                    "project '{}' does not exist",
                    header.project_id()
                )));
            }
            Err(error) => {
                return Err(AppError::Store(format!(
                    "failed to create run '{}' in project '{}': {error}",
                    header.run_id().as_str(),
                    header.project_id()
                )));
            }
        };
        let run = TestRun::new(
            domain_key(inserted.id)?,
            header.clone(),
            tree.status(),
            inserted.created_at,
        );

        let mut suites = Vec::with_capacity(tree.suites().len());
        for suite in tree.suites() {
            let suite_key = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO suite_runs (test_run_id, name, status)
                VALUES ($1, $2, $3)
                RETURNING id
                "#,
            )
            .bind(inserted.id)
            .bind(suite.name().as_str())
            .bind(suite.status().as_str())
            .fetch_one(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Store(format!(
                    "failed to create suite '{}' of run '{}': {error}",
                    suite.name().as_str(),
                    header.run_id().as_str()
                ))
            })?;

            suites.push(SuiteRun::new(
                domain_key(suite_key)?,
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
            let duration_ms = spec
                .duration_ms()
                .map(i64::try_from)
                .transpose()
                .map_err(|_| {
                    AppError::Validation(format!(
                        "duration of spec '{}' is too large",
                        spec.spec_identity().as_str()
                    ))
                })?;

            let spec_key = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO spec_runs (suite_run_id, ordinal, spec_identity, outcome, duration_ms, error_detail)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id
                "#,
            )
            .bind(db_key(suite_run_id)?)
            .bind(i64::from(spec.ordinal()))
            .bind(spec.spec_identity().as_str())
            .bind(spec.outcome().as_str())
            .bind(duration_ms)
            .bind(spec.error_detail())
            .fetch_one(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Store(format!(
                    "failed to create spec '{}' of run '{}': {error}",
                    spec.spec_identity().as_str(),
                    header.run_id().as_str()
                ))
            })?;

            specs.push(SpecRun::from_new(domain_key(spec_key)?, suite_run_id, spec));
        }

        transaction.commit().await.map_err(|error| {
            AppError::Store(format!(
                "failed to commit run '{}': {error}",
                header.run_id().as_str()
            ))
        })?;

        debug!(
            test_run_id = run.id(),
            suites = suites.len(),
            specs = specs.len(),
            "persisted run tree"
        );

        Ok(TestRunDetails {
            run,
            suites,
            specs,
            tags: Vec::new(),
        })
    }

    pub(super) async fn delete_run_impl(
        &self,
        key: i64,
        requirement: &PermissionRequirement,
    ) -> AppResult<()> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Store(format!(
                "failed to start delete transaction for test run {key}: {error}"
            ))
        })?;

        lock_writable_run(&mut *transaction, key, requirement).await?;

        for (statement, table) in [
            (
                r#"
                DELETE FROM spec_runs
                WHERE suite_run_id IN (SELECT id FROM suite_runs WHERE test_run_id = $1)
                "#,
                "spec_runs",
            ),
            (
                "DELETE FROM suite_runs WHERE test_run_id = $1",
                "suite_runs",
            ),
            (
                "DELETE FROM test_run_tags WHERE test_run_id = $1",
                "test_run_tags",
            ),
        ] {
            sqlx::query(statement)
                .bind(key)
                .execute(&mut *transaction)
                .await
                .map_err(|error| {
                    AppError::Store(format!(
                        "failed to delete {table} rows of test run {key}: {error}"
                    ))
                })?;
        }

        let deleted = sqlx::query("DELETE FROM test_runs WHERE id = $1")
            .bind(key)
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Store(format!("failed to delete test run {key}: {error}"))
            })?;

        if deleted.rows_affected() == 0 {
            return Err(run_not_found(key));
        }

        transaction.commit().await.map_err(|error| {
            AppError::Store(format!(
                "failed to commit deletion of test run {key}: {error}"
            ))
        })
    }
}
