use std::str::FromStr;

use chrono::{DateTime, Utc};
use fern_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

use crate::ProjectId;

/// Capability carried by a project grant.
///
/// Kinds are independent: a `Write` grant never implies `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    /// Allows reading project runs, statistics, and flakiness reports.
    Read,
    /// Allows submitting, correcting, tagging, and deleting runs.
    Write,
}

impl PermissionKind {
    /// Returns a stable storage value for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }

    /// Returns all known kinds.
    #[must_use]
    pub fn all() -> &'static [Self] {
        &[Self::Read, Self::Write]
    }
}

impl FromStr for PermissionKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            _ => Err(AppError::Validation(format!(
                "unknown permission kind '{value}'"
            ))),
        }
    }
}

/// Grant binding a user to a project capability, optionally time-bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    project_id: ProjectId,
    user_id: NonEmptyString,
    kind: PermissionKind,
    expires_at: Option<DateTime<Utc>>,
    granted_at: DateTime<Utc>,
}

impl PermissionGrant {
    /// Creates a grant record.
    pub fn new(
        project_id: ProjectId,
        user_id: impl Into<String>,
        kind: PermissionKind,
        expires_at: Option<DateTime<Utc>>,
        granted_at: DateTime<Utc>,
    ) -> AppResult<Self> {
        let user_id = NonEmptyString::new(user_id)
            .map_err(|_| AppError::Validation("user_id is required".to_owned()))?;

        Ok(Self {
            project_id,
            user_id,
            kind,
            expires_at,
            granted_at,
        })
    }

    /// Returns the non-expiring read and write grants given to a project creator.
    pub fn owner_grants(
        project_id: &ProjectId,
        user_id: &str,
        granted_at: DateTime<Utc>,
    ) -> AppResult<Vec<Self>> {
        PermissionKind::all()
            .iter()
            .map(|kind| Self::new(project_id.clone(), user_id, *kind, None, granted_at))
            .collect()
    }

    /// Returns whether the grant authorizes anything at `now`.
    ///
    /// This is the only liveness rule; every authorization path goes through it.
    #[must_use]
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }

    /// Returns whether this grant is live at `now` and matches the query triple.
    #[must_use]
    pub fn authorizes(
        &self,
        project_id: &ProjectId,
        user_id: &str,
        kind: PermissionKind,
        now: DateTime<Utc>,
    ) -> bool {
        &self.project_id == project_id
            && self.user_id.as_str() == user_id
            && self.kind == kind
            && self.is_live_at(now)
    }

    /// Returns the project the grant applies to.
    #[must_use]
    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// Returns the grantee subject.
    #[must_use]
    pub fn user_id(&self) -> &NonEmptyString {
        &self.user_id
    }

    /// Returns the granted capability.
    #[must_use]
    pub fn kind(&self) -> PermissionKind {
        self.kind
    }

    /// Returns the optional expiry.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Returns when the grant was recorded.
    #[must_use]
    pub fn granted_at(&self) -> DateTime<Utc> {
        self.granted_at
    }
}

/// Grant a write must still find when it is applied.
///
/// Stores evaluate it in the same transaction or lock section as the write,
/// so a grant revoked or expired after an earlier check blocks the write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRequirement {
    user_id: NonEmptyString,
    kind: PermissionKind,
}

impl PermissionRequirement {
    /// Creates a requirement for one user and capability.
    pub fn new(user_id: impl Into<String>, kind: PermissionKind) -> AppResult<Self> {
        let user_id = NonEmptyString::new(user_id)
            .map_err(|_| AppError::Validation("user_id is required".to_owned()))?;

        Ok(Self { user_id, kind })
    }

    /// Returns the subject that must hold the grant.
    #[must_use]
    pub fn user_id(&self) -> &str {
        self.user_id.as_str()
    }

    /// Returns the required capability.
    #[must_use]
    pub fn kind(&self) -> PermissionKind {
        self.kind
    }

    /// Returns whether any of `grants` satisfies the requirement on the project at `now`.
    pub fn is_met_by<'a>(
        &self,
        project_id: &ProjectId,
        grants: impl IntoIterator<Item = &'a PermissionGrant>,
        now: DateTime<Utc>,
    ) -> bool {
        grants
            .into_iter()
            .any(|grant| grant.authorizes(project_id, self.user_id(), self.kind, now))
    }

    /// Returns the error reported when the requirement is not met.
    #[must_use]
    pub fn denied(&self, project_id: &ProjectId) -> AppError {
        AppError::Forbidden(format!(
            "user '{}' is missing '{}' permission on project '{project_id}'",
            self.user_id(),
            self.kind.as_str()
        ))
    }
}
