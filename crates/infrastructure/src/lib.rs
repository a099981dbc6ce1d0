//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod in_memory_test_result_store;
mod postgres_permission_grant_repository;
mod postgres_project_repository;
mod postgres_spec_history_repository;
mod postgres_support;
mod postgres_tag_repository;
mod postgres_test_run_repository;

pub use in_memory_test_result_store::InMemoryTestResultStore;
pub use postgres_permission_grant_repository::PostgresPermissionGrantRepository;
pub use postgres_project_repository::PostgresProjectRepository;
pub use postgres_spec_history_repository::PostgresSpecHistoryRepository;
pub use postgres_tag_repository::PostgresTagRepository;
pub use postgres_test_run_repository::PostgresTestRunRepository;
