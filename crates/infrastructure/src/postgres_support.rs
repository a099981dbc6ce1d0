use chrono::Utc;
use fern_core::{AppError, AppResult};
use fern_domain::{PermissionRequirement, ProjectId};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Converts a surrogate key into its `BIGINT` column value.
///
/// Keys above `i64::MAX` can never have been issued by a `BIGSERIAL` column.
pub(crate) fn db_key(value: u64) -> AppResult<i64> {
    i64::try_from(value).map_err(|_| AppError::NotFound(format!("no stored row has id {value}")))
}

/// Converts a `BIGINT` column value back into a surrogate key.
pub(crate) fn domain_key(value: i64) -> AppResult<u64> {
    u64::try_from(value)
        .map_err(|_| AppError::Store(format!("stored identifier {value} is negative")))
}

/// Clamps a page bound into a `LIMIT`/`OFFSET` value.
pub(crate) fn page_bound(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    has_code(error, UNIQUE_VIOLATION)
}

pub(crate) fn is_foreign_key_violation(error: &sqlx::Error) -> bool {
    has_code(error, FOREIGN_KEY_VIOLATION)
}

fn has_code(error: &sqlx::Error, code: &str) -> bool {
    matches!(
        error,
        sqlx::Error::Database(database_error) if database_error.code().as_deref() == Some(code)
    )
}

/// Starts a read-write transaction.
pub(crate) async fn begin_write(
    pool: &PgPool,
    context: &str,
) -> AppResult<Transaction<'static, Postgres>> {
    pool.begin().await.map_err(|error| {
        AppError::Store(format!("failed to start {context} transaction: {error}"))
    })
}

pub(crate) async fn commit(transaction: Transaction<'_, Postgres>, context: &str) -> AppResult<()> {
    transaction
        .commit()
        .await
        .map_err(|error| AppError::Store(format!("failed to commit {context}: {error}")))
}

/// Starts a transaction whose reads all observe one snapshot.
pub(crate) async fn begin_snapshot(
    pool: &PgPool,
    context: &str,
) -> AppResult<Transaction<'static, Postgres>> {
    let mut transaction = pool.begin().await.map_err(|error| {
        AppError::Store(format!("failed to start {context} transaction: {error}"))
    })?;

    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to set snapshot isolation for {context}: {error}"
            ))
        })?;

    Ok(transaction)
}

/// Fails with `Forbidden` unless a live grant satisfies the requirement.
///
/// The matching grant row is locked `FOR SHARE`, so a concurrent revoke waits
/// for the surrounding transaction to finish.
pub(crate) async fn require_live_grant(
    connection: &mut PgConnection,
    project_id: &ProjectId,
    requirement: &PermissionRequirement,
) -> AppResult<()> {
    let grant_id = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id
        FROM project_permission_grants
        WHERE project_id = $1
          AND user_id = $2
          AND kind = $3
          AND (expires_at IS NULL OR expires_at > $4)
        LIMIT 1
        FOR SHARE
        "#,
    )
    .bind(project_id.as_str())
    .bind(requirement.user_id())
    .bind(requirement.kind().as_str())
    .bind(Utc::now())
    .fetch_optional(&mut *connection)
    .await
    .map_err(|error| {
        AppError::Store(format!(
            "failed to check '{}' grant of user '{}' on project '{project_id}': {error}",
            requirement.kind().as_str(),
            requirement.user_id()
        ))
    })?;

    match grant_id {
        Some(_) => Ok(()),
        None => Err(requirement.denied(project_id)),
    }
}

/// Locks a run row for the rest of the transaction and checks the requirement
/// against the project that owns it.
pub(crate) async fn lock_writable_run(
    connection: &mut PgConnection,
    test_run_key: i64,
    requirement: &PermissionRequirement,
) -> AppResult<()> {
    let project_id = sqlx::query_scalar::<_, String>(
        "SELECT project_id FROM test_runs WHERE id = $1 FOR UPDATE",
    )
    .bind(test_run_key)
    .fetch_optional(&mut *connection)
    .await
    .map_err(|error| {
        AppError::Store(format!(
            "failed to lock test run {test_run_key}: {error}"
        ))
    })?
    .ok_or_else(|| AppError::NotFound(format!("test run {test_run_key} does not exist")))?;

    require_live_grant(connection, &ProjectId::new(project_id)?, requirement).await
}
