use chrono::{Duration, Utc};
use fern_application::{
    PermissionGrantRepository, ProjectRepository, SpecHistoryRepository, TagRepository,
    TestRunRepository,
};
use fern_core::AppError;
use fern_domain::{
    Outcome, PermissionGrant, PermissionKind, PermissionRequirement, Project, ProjectId,
    RunStatus, RunTree, SpecIdentity, SpecRunDraft, SuiteRunDraft, TagName, Team, TestRunDraft,
};
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

use super::PostgresTestRunRepository;
use crate::{
    PostgresPermissionGrantRepository, PostgresProjectRepository, PostgresSpecHistoryRepository,
    PostgresTagRepository,
};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        return None;
    };

    let pool = match PgPoolOptions::new()
        .max_connections(2)
        .connect(database_url.as_str())
        .await
    {
        Ok(pool) => pool,
        Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
    };

    if let Err(error) = MIGRATOR.run(&pool).await {
        panic!("failed to run migrations for postgres test run repository tests: {error}");
    }

    Some(pool)
}

fn unique(prefix: &str) -> String {
    let suffix = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{prefix}-{suffix}")
}

async fn seeded_project(pool: &PgPool) -> ProjectId {
    let project_id = ProjectId::new(unique("runs")).unwrap_or_else(|_| unreachable!());
    let project = Project::new(
        project_id.clone(),
        "Runs",
        None,
        Team::new("qa").unwrap_or_else(|_| unreachable!()),
        "owner",
        Utc::now(),
    )
    .unwrap_or_else(|_| unreachable!());
    let owner_grants = PermissionGrant::owner_grants(&project_id, "owner", Utc::now())
        .unwrap_or_else(|_| unreachable!());
    let created = PostgresProjectRepository::new(pool.clone())
        .create_project(project, owner_grants)
        .await;
    assert!(created.is_ok());

    project_id
}

fn owner_write() -> PermissionRequirement {
    PermissionRequirement::new("owner", PermissionKind::Write).unwrap_or_else(|_| unreachable!())
}

fn spec(suite: &str, ordinal: u32, identity: &str, outcome: Outcome) -> SpecRunDraft {
    SpecRunDraft {
        suite_name: suite.to_owned(),
        ordinal,
        spec_identity: identity.to_owned(),
        outcome,
        duration_ms: Some(25),
        error_detail: (outcome == Outcome::Failed).then(|| "assertion failed".to_owned()),
    }
}

fn tree(project_id: &ProjectId, run_id: &str, specs: Vec<SpecRunDraft>) -> RunTree {
    RunTree::from_draft(TestRunDraft {
        run_id: run_id.to_owned(),
        project_id: project_id.as_str().to_owned(),
        branch: "main".to_owned(),
        commit_sha: "abc123".to_owned(),
        triggered_by: "ci".to_owned(),
        suites: ["cart", "login"]
            .into_iter()
            .map(|name| SuiteRunDraft {
                run_id: run_id.to_owned(),
                name: name.to_owned(),
            })
            .collect(),
        specs,
    })
    .unwrap_or_else(|_| unreachable!())
}

#[tokio::test]
async fn created_tree_reads_back_identically() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let project_id = seeded_project(&pool).await;
    let runs = PostgresTestRunRepository::new(pool);

    let created = runs
        .create_run_with_tree(
            tree(
                &project_id,
                "run-1",
                vec![
                    spec("login", 1, "rejects bad password", Outcome::Failed),
                    spec("login", 0, "accepts password", Outcome::Passed),
                    spec("cart", 0, "adds item", Outcome::Skipped),
                ],
            ),
            Utc::now(),
            &owner_write(),
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(created.run.status(), RunStatus::Failed);
    assert_eq!(created.suites[0].status(), RunStatus::Skipped);
    assert_eq!(created.suites[1].status(), RunStatus::Failed);

    let by_key = runs
        .find_run_details(created.run.id())
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(by_key.as_ref(), Some(&created));

    let by_run_id = runs
        .find_run_details_by_run_id(&project_id, "run-1")
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(by_run_id, Some(created));
}

#[tokio::test]
async fn duplicate_run_id_conflicts_without_partial_rows() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let project_id = seeded_project(&pool).await;
    let runs = PostgresTestRunRepository::new(pool);
    let specs = vec![spec("cart", 0, "adds item", Outcome::Passed)];

    let first = runs
        .create_run_with_tree(
            tree(&project_id, "run-1", specs.clone()),
            Utc::now(),
            &owner_write(),
        )
        .await;
    assert!(first.is_ok());
    let second = runs
        .create_run_with_tree(tree(&project_id, "run-1", specs), Utc::now(), &owner_write())
        .await;
    assert!(matches!(second, Err(AppError::Conflict(_))));

    let page = runs
        .list_runs(&project_id, 10, 0)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn list_orders_newest_first_and_counts_statuses() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let project_id = seeded_project(&pool).await;
    let runs = PostgresTestRunRepository::new(pool);
    let start = Utc::now() - Duration::hours(1);
    for (index, outcome) in [Outcome::Passed, Outcome::Failed, Outcome::Passed]
        .into_iter()
        .enumerate()
    {
        let created = runs
            .create_run_with_tree(
                tree(
                    &project_id,
                    format!("run-{index}").as_str(),
                    vec![spec("cart", 0, "adds item", outcome)],
                ),
                start + Duration::minutes(i64::try_from(index).unwrap_or_default()),
                &owner_write(),
            )
            .await;
        assert!(created.is_ok());
    }

    let page = runs
        .list_runs(&project_id, 2, 0)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(page.total, 3);
    let run_ids: Vec<&str> = page.runs.iter().map(|run| run.run_id().as_str()).collect();
    assert_eq!(run_ids, vec!["run-2", "run-1"]);

    let counts = runs
        .count_runs_by_status(&project_id)
        .await
        .unwrap_or_else(|_| unreachable!());
    let passed = counts
        .iter()
        .find(|count| count.status == RunStatus::Passed)
        .map(|count| count.count);
    assert_eq!(passed, Some(2));
}

#[tokio::test]
async fn statuses_persist_and_unknown_suites_roll_back() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let project_id = seeded_project(&pool).await;
    let runs = PostgresTestRunRepository::new(pool);
    let created = runs
        .create_run_with_tree(
            tree(
                &project_id,
                "run-1",
                vec![spec("cart", 0, "adds item", Outcome::Failed)],
            ),
            Utc::now(),
            &owner_write(),
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    let overridden = runs
        .update_run_status(created.run.id(), RunStatus::Passed, &owner_write())
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(overridden.status(), RunStatus::Passed);

    let foreign_suite = runs
        .save_rolled_up_statuses(
            created.run.id(),
            RunStatus::Skipped,
            &[(created.suites[0].id() + 100_000, RunStatus::Skipped)],
            &owner_write(),
        )
        .await;
    assert!(matches!(foreign_suite, Err(AppError::NotFound(_))));
    let unchanged = runs
        .find_run(created.run.id())
        .await
        .unwrap_or_else(|_| unreachable!())
        .unwrap_or_else(|| unreachable!());
    assert_eq!(unchanged.status(), RunStatus::Passed);

    let details = runs
        .find_run_details(created.run.id())
        .await
        .unwrap_or_else(|_| unreachable!())
        .unwrap_or_else(|| unreachable!());
    let (run_status, suite_statuses) = details.rolled_up_statuses();
    let saved = runs
        .save_rolled_up_statuses(
            created.run.id(),
            run_status,
            &suite_statuses,
            &owner_write(),
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(saved.status(), RunStatus::Failed);
}

#[tokio::test]
async fn delete_removes_tree_and_tag_links_but_keeps_tags() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let project_id = seeded_project(&pool).await;
    let runs = PostgresTestRunRepository::new(pool.clone());
    let tags = PostgresTagRepository::new(pool.clone());
    let created = runs
        .create_run_with_tree(
            tree(
                &project_id,
                "run-1",
                vec![spec("cart", 0, "adds item", Outcome::Passed)],
            ),
            Utc::now(),
            &owner_write(),
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    let tag = tags
        .create_tag(TagName::new(unique("nightly")).unwrap_or_else(|_| unreachable!()))
        .await
        .unwrap_or_else(|_| unreachable!());

    let assigned = tags
        .assign_tags(created.run.id(), &[tag.id(), tag.id()], &owner_write())
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(assigned, vec![tag.clone()]);
    let reassigned = tags
        .assign_tags(created.run.id(), &[tag.id()], &owner_write())
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(reassigned, assigned);

    assert!(runs.delete_run(created.run.id(), &owner_write()).await.is_ok());
    let again = runs.delete_run(created.run.id(), &owner_write()).await;
    assert!(matches!(again, Err(AppError::NotFound(_))));

    let orphans = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM suite_runs
        WHERE test_run_id = $1
        "#,
    )
    .bind(i64::try_from(created.run.id()).unwrap_or_default())
    .fetch_one(&pool)
    .await
    .unwrap_or_default();
    assert_eq!(orphans, 0);

    let kept = tags
        .find_tag_by_name(tag.name())
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(kept, Some(tag));
}

#[tokio::test]
async fn assigning_unknown_tag_changes_nothing() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let project_id = seeded_project(&pool).await;
    let runs = PostgresTestRunRepository::new(pool.clone());
    let tags = PostgresTagRepository::new(pool);
    let created = runs
        .create_run_with_tree(
            tree(
                &project_id,
                "run-1",
                vec![spec("cart", 0, "adds item", Outcome::Passed)],
            ),
            Utc::now(),
            &owner_write(),
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    let tag = tags
        .create_tag(TagName::new(unique("smoke")).unwrap_or_else(|_| unreachable!()))
        .await
        .unwrap_or_else(|_| unreachable!());

    let result = tags
        .assign_tags(created.run.id(), &[tag.id(), i64::MAX as u64], &owner_write())
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));

    let attached = tags
        .list_run_tags(created.run.id())
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(attached.is_empty());
}

#[tokio::test]
async fn revoked_write_grant_blocks_run_and_tag_writes() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let project_id = seeded_project(&pool).await;
    let runs = PostgresTestRunRepository::new(pool.clone());
    let tags = PostgresTagRepository::new(pool.clone());
    let grants = PostgresPermissionGrantRepository::new(pool);
    let created = runs
        .create_run_with_tree(
            tree(
                &project_id,
                "run-1",
                vec![spec("cart", 0, "adds item", Outcome::Failed)],
            ),
            Utc::now(),
            &owner_write(),
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    let tag = tags
        .create_tag(TagName::new(unique("flaky")).unwrap_or_else(|_| unreachable!()))
        .await
        .unwrap_or_else(|_| unreachable!());

    let stale = owner_write();
    let revoked = grants
        .delete_grants(&project_id, "owner", PermissionKind::Write, &owner_write())
        .await;
    assert!(matches!(revoked, Ok(1)));

    let second = runs
        .create_run_with_tree(
            tree(
                &project_id,
                "run-2",
                vec![spec("cart", 0, "adds item", Outcome::Passed)],
            ),
            Utc::now(),
            &stale,
        )
        .await;
    assert!(matches!(second, Err(AppError::Forbidden(_))));
    let status = runs
        .update_run_status(created.run.id(), RunStatus::Passed, &stale)
        .await;
    assert!(matches!(status, Err(AppError::Forbidden(_))));
    let assigned = tags
        .assign_tags(created.run.id(), &[tag.id()], &stale)
        .await;
    assert!(matches!(assigned, Err(AppError::Forbidden(_))));
    let deleted = runs.delete_run(created.run.id(), &stale).await;
    assert!(matches!(deleted, Err(AppError::Forbidden(_))));

    let page = runs
        .list_runs(&project_id, 10, 0)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(page.total, 1);
    assert_eq!(page.runs[0].status(), RunStatus::Failed);
    let attached = tags
        .list_run_tags(created.run.id())
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(attached.is_empty());
}

#[tokio::test]
async fn history_is_newest_first_and_keeps_skipped_outcomes() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let project_id = seeded_project(&pool).await;
    let runs = PostgresTestRunRepository::new(pool.clone());
    let history = PostgresSpecHistoryRepository::new(pool);
    let start = Utc::now() - Duration::hours(1);
    let outcomes = [
        Outcome::Passed,
        Outcome::Failed,
        Outcome::Skipped,
        Outcome::Passed,
        Outcome::Errored,
    ];
    for (index, outcome) in outcomes.into_iter().enumerate() {
        let created = runs
            .create_run_with_tree(
                tree(
                    &project_id,
                    format!("run-{index}").as_str(),
                    vec![
                        spec("cart", 0, "adds item", outcome),
                        spec("login", 0, "accepts password", Outcome::Passed),
                    ],
                ),
                start + Duration::minutes(i64::try_from(index).unwrap_or_default()),
                &owner_write(),
            )
            .await;
        assert!(created.is_ok());
    }

    let adds_item = SpecIdentity::new("adds item").unwrap_or_else(|_| unreachable!());
    let recent = history
        .list_recent_outcomes(&project_id, &adds_item, 3)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(
        recent,
        vec![Outcome::Errored, Outcome::Passed, Outcome::Skipped]
    );

    let histories = history
        .list_project_histories(&project_id, 2)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(histories.len(), 2);
    assert_eq!(histories[0].spec_identity.as_str(), "accepts password");
    assert_eq!(histories[0].outcomes, vec![Outcome::Passed, Outcome::Passed]);
    assert_eq!(
        histories[1].outcomes,
        vec![Outcome::Errored, Outcome::Passed]
    );
}
