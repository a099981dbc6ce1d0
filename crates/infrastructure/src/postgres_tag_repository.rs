use async_trait::async_trait;
use fern_application::TagRepository;
use fern_core::{AppError, AppResult};
use fern_domain::{PermissionRequirement, Tag, TagName};
use sqlx::{FromRow, PgConnection, PgPool};

use crate::postgres_support::{
    db_key, domain_key, is_foreign_key_violation, is_unique_violation, lock_writable_run,
};

/// PostgreSQL-backed repository for tags and their run associations.
#[derive(Clone)]
pub struct PostgresTagRepository {
    pool: PgPool,
}

impl PostgresTagRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct TagRow {
    id: i64,
    name: String,
}

impl TagRow {
    fn into_tag(self) -> AppResult<Tag> {
        Ok(Tag::new(domain_key(self.id)?, TagName::new(self.name)?))
    }
}

/// Returns the tags attached to a run, ordered by name.
pub(crate) async fn fetch_run_tags(
    connection: &mut PgConnection,
    test_run_key: i64,
) -> AppResult<Vec<Tag>> {
    let rows = sqlx::query_as::<_, TagRow>(
        r#"
        SELECT t.id, t.name
        FROM tags t
        INNER JOIN test_run_tags rt ON rt.tag_id = t.id
        WHERE rt.test_run_id = $1
        ORDER BY t.name
        "#,
    )
    .bind(test_run_key)
    .fetch_all(connection)
    .await
    .map_err(|error| {
        AppError::Store(format!(
            "failed to list tags of test run {test_run_key}: {error}"
        ))
    })?;

    rows.into_iter().map(TagRow::into_tag).collect()
}

fn db_keys(ids: &[u64]) -> AppResult<Vec<i64>> {
    ids.iter().map(|id| db_key(*id)).collect()
}

#[async_trait]
impl TagRepository for PostgresTagRepository {
    async fn create_tag(&self, name: TagName) -> AppResult<Tag> {
        let result = sqlx::query_as::<_, TagRow>(
            r#"
            INSERT INTO tags (name)
            VALUES ($1)
            RETURNING id, name
            "#,
        )
        .bind(name.as_str())
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => row.into_tag(),
            Err(error) if is_unique_violation(&error) => Err(AppError::Conflict(format!(
                "tag '{}' already exists",
                name.as_str()
            ))),
            Err(error) => Err(AppError::Store(format!(
                "failed to create tag '{}': {error}",
                name.as_str()
            ))),
        }
    }

    async fn find_tag_by_name(&self, name: &TagName) -> AppResult<Option<Tag>> {
        let row = sqlx::query_as::<_, TagRow>(
            r#"
            SELECT id, name
            FROM tags
            WHERE name = $1
            "#,
        )
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Store(format!("failed to find tag '{}': {error}", name.as_str()))
        })?;

        row.map(TagRow::into_tag).transpose()
    }

    async fn list_tags(&self) -> AppResult<Vec<Tag>> {
        let rows = sqlx::query_as::<_, TagRow>(
            r#"
            SELECT id, name
            FROM tags
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Store(format!("failed to list tags: {error}")))?;

        rows.into_iter().map(TagRow::into_tag).collect()
    }

    async fn delete_tag(&self, tag_id: u64) -> AppResult<()> {
        let key = db_key(tag_id)?;
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Store(format!(
                "failed to start delete transaction for tag {tag_id}: {error}"
            ))
        })?;

        sqlx::query("DELETE FROM test_run_tags WHERE tag_id = $1")
            .bind(key)
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Store(format!("failed to detach tag {tag_id}: {error}"))
            })?;

        let deleted = sqlx::query("DELETE FROM tags WHERE id = $1")
            .bind(key)
            .execute(&mut *transaction)
            .await
            .map_err(|error| AppError::Store(format!("failed to delete tag {tag_id}: {error}")))?;

        if deleted.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("tag {tag_id} does not exist")));
        }

        transaction.commit().await.map_err(|error| {
            AppError::Store(format!(
                "failed to commit deletion of tag {tag_id}: {error}"
            ))
        })
    }

    async fn assign_tags(
        &self,
        test_run_id: u64,
        tag_ids: &[u64],
        requirement: &PermissionRequirement,
    ) -> AppResult<Vec<Tag>> {
        let run_key = db_key(test_run_id)?;
        let tag_keys = db_keys(tag_ids)?;
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Store(format!(
                "failed to start tag assignment for test run {test_run_id}: {error}"
            ))
        })?;

        lock_writable_run(&mut *transaction, run_key, requirement).await?;

        let known = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id
            FROM tags
            WHERE id = ANY($1)
            "#,
        )
        .bind(&tag_keys)
        .fetch_all(&mut *transaction)
        .await
        .map_err(|error| AppError::Store(format!("failed to look up tags: {error}")))?;

        if let Some(missing) = tag_keys.iter().find(|key| !known.contains(key)) {
            return Err(AppError::NotFound(format!("tag {missing} does not exist")));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO test_run_tags (test_run_id, tag_id)
            SELECT $1, tag_id
            FROM UNNEST($2::BIGINT[]) AS assigned (tag_id)
            ON CONFLICT (test_run_id, tag_id) DO NOTHING
            "#,
        )
        .bind(run_key)
        .bind(&tag_keys)
        .execute(&mut *transaction)
        .await;

        match inserted {
            Ok(_) => {}
            Err(error) if is_foreign_key_violation(&error) => {
                return Err(AppError::NotFound(format!(
                    "a tag assigned to test run {test_run_id} no longer exists"
                )));
            }
            Err(error) => {
                return Err(AppError::Store(format!(
                    "failed to assign tags to test run {test_run_id}: {error}"
                )));
            }
        }

        let tags = fetch_run_tags(&mut *transaction, run_key).await?;
        transaction.commit().await.map_err(|error| {
            AppError::Store(format!(
                "failed to commit tag assignment for test run {test_run_id}: {error}"
            ))
        })?;

        Ok(tags)
    }

    async fn unassign_tags(
        &self,
        test_run_id: u64,
        tag_ids: &[u64],
        requirement: &PermissionRequirement,
    ) -> AppResult<Vec<Tag>> {
        let run_key = db_key(test_run_id)?;
        let tag_keys: Vec<i64> = tag_ids
            .iter()
            .filter_map(|id| i64::try_from(*id).ok())
            .collect();
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Store(format!(
                "failed to start tag removal for test run {test_run_id}: {error}"
            ))
        })?;

        lock_writable_run(&mut *transaction, run_key, requirement).await?;

        sqlx::query(
            r#"
            DELETE FROM test_run_tags
            WHERE test_run_id = $1 AND tag_id = ANY($2)
            "#,
        )
        .bind(run_key)
        .bind(&tag_keys)
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to remove tags from test run {test_run_id}: {error}"
            ))
        })?;

        let tags = fetch_run_tags(&mut *transaction, run_key).await?;
        transaction.commit().await.map_err(|error| {
            AppError::Store(format!(
                "failed to commit tag removal for test run {test_run_id}: {error}"
            ))
        })?;

        Ok(tags)
    }

    async fn list_run_tags(&self, test_run_id: u64) -> AppResult<Vec<Tag>> {
        let Ok(run_key) = i64::try_from(test_run_id) else {
            return Ok(Vec::new());
        };
        let mut connection = self.pool.acquire().await.map_err(|error| {
            AppError::Store(format!("failed to acquire connection: {error}"))
        })?;

        fetch_run_tags(&mut *connection, run_key).await
    }
}
