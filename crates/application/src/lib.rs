//! Application services and ports.

#![forbid(unsafe_code)]

mod authorization_service;
mod flaky_detection_service;
mod project_ports;
mod project_service;
mod tag_service;
mod test_run_ports;
mod test_run_service;

#[cfg(test)]
mod test_support;

pub use authorization_service::{AuthorizationService, PermissionGrantRepository};
pub use flaky_detection_service::{FlakyDetectionService, SpecHistory, SpecHistoryRepository};
pub use project_ports::{
    CreateProjectInput, GrantPermissionInput, ProjectPage, ProjectRepository, UpdateProjectInput,
};
pub use project_service::ProjectService;
pub use tag_service::{TagRepository, TagService};
pub use test_run_ports::{
    BulkDeleteFailure, BulkDeleteReport, MAX_PAGE_SIZE, PageQuery, RunStatusCount, TestRunPage,
    TestRunRepository, TestRunStatistics,
};
pub use test_run_service::TestRunService;
