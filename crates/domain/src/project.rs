use chrono::{DateTime, Utc};
use fern_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

const PROJECT_ID_MAX_LENGTH: usize = 128;

/// Globally unique, immutable project identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(String);

impl ProjectId {
    /// Creates a validated project identifier.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation("project_id is required".to_owned()));
        }

        if trimmed.chars().any(char::is_whitespace) {
            return Err(AppError::Validation(format!(
                "project_id '{trimmed}' must not contain whitespace"
            )));
        }

        if trimmed.len() > PROJECT_ID_MAX_LENGTH {
            return Err(AppError::Validation(format!(
                "project_id must be at most {PROJECT_ID_MAX_LENGTH} characters"
            )));
        }

        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the identifier value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Team owning a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Team(NonEmptyString);

impl Team {
    /// Creates a validated team name.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        NonEmptyString::new(value)
            .map(Self)
            .map_err(|_| AppError::Validation("team is required".to_owned()))
    }

    /// Returns the team name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Project grouping the test runs of one codebase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    project_id: ProjectId,
    name: NonEmptyString,
    description: Option<String>,
    team: Team,
    active: bool,
    created_by: NonEmptyString,
    created_at: DateTime<Utc>,
}

impl Project {
    /// Creates an active project owned by `created_by`.
    pub fn new(
        project_id: ProjectId,
        name: impl Into<String>,
        description: Option<String>,
        team: Team,
        created_by: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> AppResult<Self> {
        Ok(Self {
            project_id,
            name: NonEmptyString::new(name)?,
            description: normalize_description(description),
            team,
            active: true,
            created_by: NonEmptyString::new(created_by)?,
            created_at,
        })
    }

    /// Rebuilds a project loaded from storage, keeping its activation flag.
    #[must_use]
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Returns a copy with a new display name and description.
    pub fn renamed(&self, name: impl Into<String>, description: Option<String>) -> AppResult<Self> {
        let mut updated = self.clone();
        updated.name = NonEmptyString::new(name)?;
        updated.description = normalize_description(description);
        Ok(updated)
    }

    /// Returns the stable project identifier.
    #[must_use]
    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &NonEmptyString {
        &self.name
    }

    /// Returns the optional description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the owning team.
    #[must_use]
    pub fn team(&self) -> &Team {
        &self.team
    }

    /// Returns whether the project accepts new runs.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns the creator subject.
    #[must_use]
    pub fn created_by(&self) -> &NonEmptyString {
        &self.created_by
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

fn normalize_description(description: Option<String>) -> Option<String> {
    description.and_then(|value| {
        let trimmed = value.trim().to_owned();
        (!trimmed.is_empty()).then_some(trimmed)
    })
}
