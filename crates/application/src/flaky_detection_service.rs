use std::sync::Arc;

use async_trait::async_trait;
use fern_core::{AppResult, UserIdentity};
use fern_domain::{
    FlakinessVerdict, FlakyDetectionPolicy, Outcome, PermissionKind, ProjectId, SpecIdentity,
};
use serde::Serialize;
use tracing::debug;

use crate::AuthorizationService;

/// Recent outcomes of one spec identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpecHistory {
    /// Spec the outcomes belong to.
    pub spec_identity: SpecIdentity,
    /// Outcomes ordered most recent first.
    pub outcomes: Vec<Outcome>,
}

/// Read port over spec outcome history.
///
/// Recency follows run creation time, newest first, with later-created runs
/// and later positions breaking ties. Skipped outcomes are returned like any other.
#[async_trait]
pub trait SpecHistoryRepository: Send + Sync {
    /// Returns up to `limit` outcomes of one spec in a project.
    async fn list_recent_outcomes(
        &self,
        project_id: &ProjectId,
        spec_identity: &SpecIdentity,
        limit: usize,
    ) -> AppResult<Vec<Outcome>>;

    /// Returns up to `per_spec_limit` outcomes for every spec in a project.
    async fn list_project_histories(
        &self,
        project_id: &ProjectId,
        per_spec_limit: usize,
    ) -> AppResult<Vec<SpecHistory>>;
}

/// Application service classifying specs as flaky from their recent history.
#[derive(Clone)]
pub struct FlakyDetectionService {
    authorization_service: AuthorizationService,
    repository: Arc<dyn SpecHistoryRepository>,
    policy: FlakyDetectionPolicy,
}

impl FlakyDetectionService {
    /// Creates a new flaky detection service.
    #[must_use]
    pub fn new(
        authorization_service: AuthorizationService,
        repository: Arc<dyn SpecHistoryRepository>,
        policy: FlakyDetectionPolicy,
    ) -> Self {
        Self {
            authorization_service,
            repository,
            policy,
        }
    }

    /// Returns the active classification thresholds.
    #[must_use]
    pub fn policy(&self) -> FlakyDetectionPolicy {
        self.policy
    }

    /// Classifies one spec identity within a project.
    pub async fn classify_spec(
        &self,
        actor: &UserIdentity,
        project_id: &str,
        spec_identity: &str,
    ) -> AppResult<FlakinessVerdict> {
        let project_id = ProjectId::new(project_id)?;
        let spec_identity = SpecIdentity::new(spec_identity)?;
        self.authorization_service
            .require_permission(actor.subject(), &project_id, PermissionKind::Read)
            .await?;

        let outcomes = self
            .repository
            .list_recent_outcomes(&project_id, &spec_identity, self.policy.window_size())
            .await?;

        Ok(self.policy.classify(spec_identity, &outcomes))
    }

    /// Lists the flaky specs of a project, highest failure rate first.
    pub async fn list_flaky_specs(
        &self,
        actor: &UserIdentity,
        project_id: &str,
        limit: usize,
    ) -> AppResult<Vec<FlakinessVerdict>> {
        let project_id = ProjectId::new(project_id)?;
        self.authorization_service
            .require_permission(actor.subject(), &project_id, PermissionKind::Read)
            .await?;

        let histories = self
            .repository
            .list_project_histories(&project_id, self.policy.window_size())
            .await?;
        let inspected = histories.len();

        let mut flaky: Vec<FlakinessVerdict> = histories
            .into_iter()
            .map(|history| self.policy.classify(history.spec_identity, &history.outcomes))
            .filter(|verdict| verdict.is_flaky)
            .collect();
        flaky.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.spec_identity.cmp(&right.spec_identity))
        });

        debug!(
            project_id = %project_id,
            inspected,
            flaky = flaky.len(),
            "flaky specs classified"
        );

        flaky.truncate(limit);
        Ok(flaky)
    }
}
