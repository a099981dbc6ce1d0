//! Fern operator CLI: migrations and test-result reports.

#![forbid(unsafe_code)]

mod cli_config;
mod command;

use std::env;
use std::sync::Arc;

use fern_application::{AuthorizationService, FlakyDetectionService, TestRunService};
use fern_core::{AppError, AppResult};
use fern_infrastructure::{
    PostgresPermissionGrantRepository, PostgresProjectRepository, PostgresSpecHistoryRepository,
    PostgresTagRepository, PostgresTestRunRepository,
};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli_config::CliConfig;
use crate::command::Command;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let command = Command::parse(env::args().skip(1))?;
    let config = CliConfig::load()?;
    let pool = connect_pool(&config).await?;

    if command == Command::Migrate {
        sqlx::migrate!("../../crates/infrastructure/migrations")
            .run(&pool)
            .await
            .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

        info!("database migrations applied successfully");
        return Ok(());
    }

    let report = run_report(pool, &config, command).await?;
    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|error| AppError::Internal(format!("failed to render report: {error}")))?;
    println!("{rendered}");

    Ok(())
}

async fn run_report(pool: PgPool, config: &CliConfig, command: Command) -> AppResult<Value> {
    let actor = config.actor()?;
    info!(
        actor = actor.subject(),
        display_name = actor.display_name(),
        "running report"
    );
    let authorization_service =
        AuthorizationService::new(Arc::new(PostgresPermissionGrantRepository::new(pool.clone())));

    match command {
        Command::Flaky { project_id, limit } => {
            let service = FlakyDetectionService::new(
                authorization_service,
                Arc::new(PostgresSpecHistoryRepository::new(pool)),
                config.flaky_policy,
            );
            let verdicts = service
                .list_flaky_specs(&actor, project_id.as_str(), limit)
                .await?;

            info!(
                project_id = %project_id,
                flaky_count = verdicts.len(),
                window_size = service.policy().window_size(),
                "flaky report generated"
            );
            to_json(&verdicts)
        }
        Command::Runs { project_id, page } => {
            let page = build_test_run_service(pool, authorization_service)
                .list_test_runs(&actor, project_id.as_str(), page)
                .await?;
            to_json(&page)
        }
        Command::Stats { project_id } => {
            let statistics = build_test_run_service(pool, authorization_service)
                .run_statistics(&actor, project_id.as_str())
                .await?;
            to_json(&statistics)
        }
        Command::Migrate => Err(AppError::Internal(
            "migrate is not a report command".to_owned(),
        )),
    }
}

fn build_test_run_service(
    pool: PgPool,
    authorization_service: AuthorizationService,
) -> TestRunService {
    TestRunService::new(
        authorization_service,
        Arc::new(PostgresProjectRepository::new(pool.clone())),
        Arc::new(PostgresTestRunRepository::new(pool.clone())),
        Arc::new(PostgresTagRepository::new(pool)),
    )
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> AppResult<Value> {
    serde_json::to_value(value)
        .map_err(|error| AppError::Internal(format!("failed to serialize report: {error}")))
}

async fn connect_pool(config: &CliConfig) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(config.database_url.as_str())
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
