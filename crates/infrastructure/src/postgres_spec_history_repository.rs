use std::collections::BTreeMap;

use async_trait::async_trait;
use fern_application::{SpecHistory, SpecHistoryRepository};
use fern_core::{AppError, AppResult};
use fern_domain::{Outcome, ProjectId, SpecIdentity};
use sqlx::{FromRow, PgPool};

use crate::postgres_support::page_bound;

/// PostgreSQL-backed read model over executed spec outcomes.
#[derive(Clone)]
pub struct PostgresSpecHistoryRepository {
    pool: PgPool,
}

impl PostgresSpecHistoryRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct RankedOutcomeRow {
    spec_identity: String,
    outcome: String,
}

#[async_trait]
impl SpecHistoryRepository for PostgresSpecHistoryRepository {
    async fn list_recent_outcomes(
        &self,
        project_id: &ProjectId,
        spec_identity: &SpecIdentity,
        limit: usize,
    ) -> AppResult<Vec<Outcome>> {
        let outcomes = sqlx::query_scalar::<_, String>(
            r#"
            SELECT sp.outcome
            FROM spec_runs sp
            INNER JOIN suite_runs su ON su.id = sp.suite_run_id
            INNER JOIN test_runs tr ON tr.id = su.test_run_id
            WHERE tr.project_id = $1
              AND sp.spec_identity = $2
            ORDER BY tr.created_at DESC, tr.id DESC, su.id DESC, sp.ordinal DESC
            LIMIT $3
            "#,
        )
        .bind(project_id.as_str())
        .bind(spec_identity.as_str())
        .bind(page_bound(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to load history of spec '{}' in project '{project_id}': {error}",
                spec_identity.as_str()
            ))
        })?;

        outcomes
            .into_iter()
            .map(|outcome| outcome.parse::<Outcome>())
            .collect()
    }

    async fn list_project_histories(
        &self,
        project_id: &ProjectId,
        per_spec_limit: usize,
    ) -> AppResult<Vec<SpecHistory>> {
        let rows = sqlx::query_as::<_, RankedOutcomeRow>(
            r#"
            SELECT spec_identity, outcome
            FROM (
                SELECT sp.spec_identity,
                       sp.outcome,
                       ROW_NUMBER() OVER (
                           PARTITION BY sp.spec_identity
                           ORDER BY tr.created_at DESC, tr.id DESC, su.id DESC, sp.ordinal DESC
                       ) AS recency
                FROM spec_runs sp
                INNER JOIN suite_runs su ON su.id = sp.suite_run_id
                INNER JOIN test_runs tr ON tr.id = su.test_run_id
                WHERE tr.project_id = $1
            ) ranked
            WHERE recency <= $2
            ORDER BY spec_identity, recency
            "#,
        )
        .bind(project_id.as_str())
        .bind(page_bound(per_spec_limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to load spec histories of project '{project_id}': {error}"
            ))
        })?;

        // Rows arrive newest first within each identity; grouping keeps that order.
        let mut histories: BTreeMap<SpecIdentity, Vec<Outcome>> = BTreeMap::new();
        for row in rows {
            histories
                .entry(SpecIdentity::new(row.spec_identity)?)
                .or_default()
                .push(row.outcome.parse::<Outcome>()?);
        }

        Ok(histories
            .into_iter()
            .map(|(spec_identity, outcomes)| SpecHistory {
                spec_identity,
                outcomes,
            })
            .collect())
    }
}
