use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use fern_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

use crate::{ProjectId, Tag};

/// Outcome reported for one executed spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Spec ran and passed.
    Passed,
    /// Spec ran and an assertion failed.
    Failed,
    /// Spec was not executed.
    Skipped,
    /// Spec could not complete because of an error outside its assertions.
    Errored,
}

impl Outcome {
    /// Returns a stable storage value for this outcome.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Errored => "errored",
        }
    }

    /// Returns the status this outcome contributes to roll-up.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Passed => RunStatus::Passed,
            Self::Skipped => RunStatus::Skipped,
            Self::Failed | Self::Errored => RunStatus::Failed,
        }
    }

    /// Returns whether the outcome counts as a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Errored)
    }
}

impl FromStr for Outcome {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            "errored" => Ok(Self::Errored),
            _ => Err(AppError::Validation(format!("unknown outcome '{value}'"))),
        }
    }
}

/// Aggregate status of a suite or run.
///
/// Variants are declared in roll-up order: a parent takes the greatest status
/// among its children, so one failure anywhere fails the run and only a fully
/// skipped (or empty) subtree reports `Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Nothing executed.
    Skipped,
    /// Something executed and nothing failed.
    Passed,
    /// At least one failing or errored spec.
    Failed,
}

impl RunStatus {
    /// Returns a stable storage value for this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Passed => "passed",
            Self::Failed => "failed",
        }
    }

    /// Rolls child statuses up into their parent status.
    #[must_use]
    pub fn roll_up<I>(children: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        children.into_iter().max().unwrap_or(Self::Skipped)
    }
}

impl FromStr for RunStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "skipped" => Ok(Self::Skipped),
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            _ => Err(AppError::Validation(format!(
                "unknown run status '{value}'"
            ))),
        }
    }
}

/// Caller-supplied run identifier, unique within a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(NonEmptyString);

impl RunId {
    /// Creates a validated run identifier.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        NonEmptyString::new(value)
            .map(Self)
            .map_err(|_| AppError::Validation("run_id is required".to_owned()))
    }

    /// Returns the identifier value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Stable key correlating one logical test across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpecIdentity(NonEmptyString);

impl SpecIdentity {
    /// Creates a validated spec identity.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        NonEmptyString::new(value)
            .map(Self)
            .map_err(|_| AppError::Validation("spec identity is required".to_owned()))
    }

    /// Returns the identity value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Submitted run tree in arena form.
///
/// Suites point at their run by `run_id`, specs point at their suite by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRunDraft {
    /// Caller-supplied run identifier.
    pub run_id: String,
    /// Owning project identifier.
    pub project_id: String,
    /// Source branch.
    pub branch: String,
    /// Commit under test.
    pub commit_sha: String,
    /// Actor or pipeline that triggered the run.
    pub triggered_by: String,
    /// Suites of the run.
    pub suites: Vec<SuiteRunDraft>,
    /// Specs of every suite.
    pub specs: Vec<SpecRunDraft>,
}

/// Submitted suite referencing its parent run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteRunDraft {
    /// Parent run identifier.
    pub run_id: String,
    /// Suite name, unique within the run.
    pub name: String,
}

/// Submitted spec referencing its parent suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecRunDraft {
    /// Parent suite name.
    pub suite_name: String,
    /// Submission position within the suite, unique within the suite.
    pub ordinal: u32,
    /// Spec identity.
    pub spec_identity: String,
    /// Reported outcome.
    pub outcome: Outcome,
    /// Optional execution time in milliseconds.
    pub duration_ms: Option<u64>,
    /// Optional failure detail.
    pub error_detail: Option<String>,
}

/// Descriptive run fields shared by validated trees and stored runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunHeader {
    run_id: RunId,
    project_id: ProjectId,
    branch: String,
    commit_sha: String,
    triggered_by: String,
}

impl TestRunHeader {
    /// Creates a validated run header.
    pub fn new(
        run_id: impl Into<String>,
        project_id: impl Into<String>,
        branch: impl Into<String>,
        commit_sha: impl Into<String>,
        triggered_by: impl Into<String>,
    ) -> AppResult<Self> {
        Ok(Self {
            run_id: RunId::new(run_id)?,
            project_id: ProjectId::new(project_id)?,
            branch: branch.into().trim().to_owned(),
            commit_sha: commit_sha.into().trim().to_owned(),
            triggered_by: triggered_by.into().trim().to_owned(),
        })
    }

    /// Returns the caller-supplied run identifier.
    #[must_use]
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Returns the owning project.
    #[must_use]
    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// Returns the source branch.
    #[must_use]
    pub fn branch(&self) -> &str {
        self.branch.as_str()
    }

    /// Returns the commit under test.
    #[must_use]
    pub fn commit_sha(&self) -> &str {
        self.commit_sha.as_str()
    }

    /// Returns who triggered the run.
    #[must_use]
    pub fn triggered_by(&self) -> &str {
        self.triggered_by.as_str()
    }
}

/// Validated suite waiting for a surrogate key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSuiteRun {
    name: NonEmptyString,
    status: RunStatus,
}

impl NewSuiteRun {
    /// Returns the suite name.
    #[must_use]
    pub fn name(&self) -> &NonEmptyString {
        &self.name
    }

    /// Returns the rolled-up suite status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }
}

/// Validated spec waiting for a surrogate key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSpecRun {
    suite_index: usize,
    ordinal: u32,
    spec_identity: SpecIdentity,
    outcome: Outcome,
    duration_ms: Option<u64>,
    error_detail: Option<String>,
}

impl NewSpecRun {
    /// Returns the index of the parent suite in [`RunTree::suites`].
    #[must_use]
    pub fn suite_index(&self) -> usize {
        self.suite_index
    }

    /// Returns the submission position within the suite.
    #[must_use]
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Returns the spec identity.
    #[must_use]
    pub fn spec_identity(&self) -> &SpecIdentity {
        &self.spec_identity
    }

    /// Returns the outcome.
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Returns the execution time.
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    /// Returns the failure detail.
    #[must_use]
    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }
}

/// Fully validated run tree with statuses rolled up, ready to persist atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTree {
    header: TestRunHeader,
    status: RunStatus,
    suites: Vec<NewSuiteRun>,
    specs: Vec<NewSpecRun>,
}

impl RunTree {
    /// Validates a submitted draft and computes suite and run statuses.
    ///
    /// Specs are returned ordered by suite, then ordinal.
    pub fn from_draft(draft: TestRunDraft) -> AppResult<Self> {
        let header = TestRunHeader::new(
            draft.run_id,
            draft.project_id,
            draft.branch,
            draft.commit_sha,
            draft.triggered_by,
        )?;

        if draft.suites.is_empty() {
            return Err(AppError::Validation(format!(
                "run '{}' must include at least one suite",
                header.run_id().as_str()
            )));
        }

        let mut suites = Vec::with_capacity(draft.suites.len());
        let mut suite_indexes = HashMap::with_capacity(draft.suites.len());
        for suite in draft.suites {
            if suite.run_id.trim() != header.run_id().as_str() {
                return Err(AppError::Validation(format!(
                    "suite '{}' references run '{}' instead of '{}'",
                    suite.name.trim(),
                    suite.run_id.trim(),
                    header.run_id().as_str()
                )));
            }

            let name = NonEmptyString::new(suite.name)
                .map_err(|_| AppError::Validation("suite name is required".to_owned()))?;
            if suite_indexes
                .insert(name.as_str().to_owned(), suites.len())
                .is_some()
            {
                return Err(AppError::Validation(format!(
                    "duplicate suite '{}' in run '{}'",
                    name.as_str(),
                    header.run_id().as_str()
                )));
            }

            suites.push(NewSuiteRun {
                name,
                status: RunStatus::Skipped,
            });
        }

        let mut seen_ordinals = HashSet::with_capacity(draft.specs.len());
        let mut specs = Vec::with_capacity(draft.specs.len());
        for spec in draft.specs {
            let suite_name = spec.suite_name.trim();
            let Some(&suite_index) = suite_indexes.get(suite_name) else {
                return Err(AppError::Validation(format!(
                    "spec '{}' references unknown suite '{suite_name}'",
                    spec.spec_identity.trim()
                )));
            };

            if !seen_ordinals.insert((suite_index, spec.ordinal)) {
                return Err(AppError::Validation(format!(
                    "duplicate spec ordinal {} in suite '{suite_name}'",
                    spec.ordinal
                )));
            }

            let error_detail = spec.error_detail.and_then(|value| {
                let trimmed = value.trim().to_owned();
                (!trimmed.is_empty()).then_some(trimmed)
            });

            specs.push(NewSpecRun {
                suite_index,
                ordinal: spec.ordinal,
                spec_identity: SpecIdentity::new(spec.spec_identity)?,
                outcome: spec.outcome,
                duration_ms: spec.duration_ms,
                error_detail,
            });
        }

        specs.sort_by_key(|spec| (spec.suite_index, spec.ordinal));

        for (index, suite) in suites.iter_mut().enumerate() {
            suite.status = RunStatus::roll_up(
                specs
                    .iter()
                    .filter(|spec| spec.suite_index == index)
                    .map(|spec| spec.outcome.status()),
            );
        }
        let status = RunStatus::roll_up(suites.iter().map(NewSuiteRun::status));

        Ok(Self {
            header,
            status,
            suites,
            specs,
        })
    }

    /// Returns the run header.
    #[must_use]
    pub fn header(&self) -> &TestRunHeader {
        &self.header
    }

    /// Returns the rolled-up run status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Returns the suites in submission order.
    #[must_use]
    pub fn suites(&self) -> &[NewSuiteRun] {
        &self.suites
    }

    /// Returns the specs ordered by suite, then ordinal.
    #[must_use]
    pub fn specs(&self) -> &[NewSpecRun] {
        &self.specs
    }
}

/// Persisted run root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRun {
    id: u64,
    header: TestRunHeader,
    status: RunStatus,
    created_at: DateTime<Utc>,
}

impl TestRun {
    /// Creates a stored run.
    #[must_use]
    pub fn new(id: u64, header: TestRunHeader, status: RunStatus, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            header,
            status,
            created_at,
        }
    }

    /// Returns a copy carrying another status.
    #[must_use]
    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = status;
        self
    }

    /// Returns the surrogate key.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the descriptive fields.
    #[must_use]
    pub fn header(&self) -> &TestRunHeader {
        &self.header
    }

    /// Returns the caller-supplied run identifier.
    #[must_use]
    pub fn run_id(&self) -> &RunId {
        self.header.run_id()
    }

    /// Returns the owning project.
    #[must_use]
    pub fn project_id(&self) -> &ProjectId {
        self.header.project_id()
    }

    /// Returns the current aggregate status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Persisted suite with a back-reference to its run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteRun {
    id: u64,
    test_run_id: u64,
    name: NonEmptyString,
    status: RunStatus,
}

impl SuiteRun {
    /// Creates a stored suite.
    pub fn new(
        id: u64,
        test_run_id: u64,
        name: impl Into<String>,
        status: RunStatus,
    ) -> AppResult<Self> {
        Ok(Self {
            id,
            test_run_id,
            name: NonEmptyString::new(name)?,
            status,
        })
    }

    /// Returns a copy carrying another status.
    #[must_use]
    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = status;
        self
    }

    /// Returns the surrogate key.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the parent run surrogate key.
    #[must_use]
    pub fn test_run_id(&self) -> u64 {
        self.test_run_id
    }

    /// Returns the suite name.
    #[must_use]
    pub fn name(&self) -> &NonEmptyString {
        &self.name
    }

    /// Returns the aggregate status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }
}

/// Persisted spec with a back-reference to its suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecRun {
    id: u64,
    suite_run_id: u64,
    ordinal: u32,
    spec_identity: SpecIdentity,
    outcome: Outcome,
    duration_ms: Option<u64>,
    error_detail: Option<String>,
}

impl SpecRun {
    /// Stores a validated spec under the given keys.
    #[must_use]
    pub fn from_new(id: u64, suite_run_id: u64, spec: &NewSpecRun) -> Self {
        Self {
            id,
            suite_run_id,
            ordinal: spec.ordinal,
            spec_identity: spec.spec_identity.clone(),
            outcome: spec.outcome,
            duration_ms: spec.duration_ms,
            error_detail: spec.error_detail.clone(),
        }
    }

    /// Rebuilds a spec loaded from storage.
    pub fn new(
        id: u64,
        suite_run_id: u64,
        ordinal: u32,
        spec_identity: impl Into<String>,
        outcome: Outcome,
        duration_ms: Option<u64>,
        error_detail: Option<String>,
    ) -> AppResult<Self> {
        Ok(Self {
            id,
            suite_run_id,
            ordinal,
            spec_identity: SpecIdentity::new(spec_identity)?,
            outcome,
            duration_ms,
            error_detail,
        })
    }

    /// Returns the surrogate key.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the parent suite surrogate key.
    #[must_use]
    pub fn suite_run_id(&self) -> u64 {
        self.suite_run_id
    }

    /// Returns the submission position within the suite.
    #[must_use]
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Returns the spec identity.
    #[must_use]
    pub fn spec_identity(&self) -> &SpecIdentity {
        &self.spec_identity
    }

    /// Returns the outcome.
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Returns the execution time.
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    /// Returns the failure detail.
    #[must_use]
    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }
}

/// Full run tree as loaded from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunDetails {
    /// Run root.
    pub run: TestRun,
    /// Suites in submission order.
    pub suites: Vec<SuiteRun>,
    /// Specs ordered by suite, then ordinal.
    pub specs: Vec<SpecRun>,
    /// Associated tags ordered by name.
    pub tags: Vec<Tag>,
}

impl TestRunDetails {
    /// Returns specs belonging to one suite.
    pub fn specs_of(&self, suite_run_id: u64) -> impl Iterator<Item = &SpecRun> {
        self.specs
            .iter()
            .filter(move |spec| spec.suite_run_id == suite_run_id)
    }

    /// Re-applies roll-up over stored outcomes.
    ///
    /// Returns the run status and each suite's recomputed status.
    #[must_use]
    pub fn rolled_up_statuses(&self) -> (RunStatus, Vec<(u64, RunStatus)>) {
        let suite_statuses: Vec<(u64, RunStatus)> = self
            .suites
            .iter()
            .map(|suite| {
                (
                    suite.id,
                    RunStatus::roll_up(self.specs_of(suite.id).map(|spec| spec.outcome.status())),
                )
            })
            .collect();
        let run_status = RunStatus::roll_up(suite_statuses.iter().map(|(_, status)| *status));

        (run_status, suite_statuses)
    }
}
