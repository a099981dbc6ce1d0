//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod flaky;
mod permission;
mod project;
mod tag;
mod test_run;

pub use flaky::{
    DEFAULT_FLAKY_LOWER_BOUND, DEFAULT_FLAKY_UPPER_BOUND, DEFAULT_FLAKY_WINDOW_SIZE,
    FlakinessVerdict, FlakyDetectionPolicy,
};
pub use permission::{PermissionGrant, PermissionKind, PermissionRequirement};
pub use project::{Project, ProjectId, Team};
pub use tag::{Tag, TagName};
pub use test_run::{
    NewSpecRun, NewSuiteRun, Outcome, RunId, RunStatus, RunTree, SpecIdentity, SpecRun,
    SpecRunDraft, SuiteRun, SuiteRunDraft, TestRun, TestRunDetails, TestRunDraft, TestRunHeader,
};
