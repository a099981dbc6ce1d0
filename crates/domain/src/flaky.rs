use fern_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

use crate::{Outcome, SpecIdentity};

/// Default number of recent outcomes inspected per spec.
pub const DEFAULT_FLAKY_WINDOW_SIZE: usize = 20;
/// Default failure rate a spec must exceed to be flaky.
pub const DEFAULT_FLAKY_LOWER_BOUND: f64 = 0.05;
/// Default failure rate a spec must stay under to be flaky rather than broken.
pub const DEFAULT_FLAKY_UPPER_BOUND: f64 = 0.95;

/// Thresholds for classifying a spec as flaky.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlakyDetectionPolicy {
    window_size: usize,
    lower_bound: f64,
    upper_bound: f64,
}

impl Default for FlakyDetectionPolicy {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_FLAKY_WINDOW_SIZE,
            lower_bound: DEFAULT_FLAKY_LOWER_BOUND,
            upper_bound: DEFAULT_FLAKY_UPPER_BOUND,
        }
    }
}

impl FlakyDetectionPolicy {
    /// Creates a validated policy.
    ///
    /// Bounds are exclusive failure rates with `0 <= lower < upper <= 1`.
    pub fn new(window_size: usize, lower_bound: f64, upper_bound: f64) -> AppResult<Self> {
        if window_size == 0 {
            return Err(AppError::Validation(
                "flaky window size must be greater than zero".to_owned(),
            ));
        }

        let in_unit_range = |value: f64| (0.0..=1.0).contains(&value);
        if !in_unit_range(lower_bound) || !in_unit_range(upper_bound) {
            return Err(AppError::Validation(
                "flaky bounds must be within 0.0 and 1.0".to_owned(),
            ));
        }

        if lower_bound >= upper_bound {
            return Err(AppError::Validation(format!(
                "flaky lower bound {lower_bound} must be below upper bound {upper_bound}"
            )));
        }

        Ok(Self {
            window_size,
            lower_bound,
            upper_bound,
        })
    }

    /// Returns the number of outcomes inspected.
    #[must_use]
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Returns the exclusive lower failure-rate bound.
    #[must_use]
    pub fn lower_bound(&self) -> f64 {
        self.lower_bound
    }

    /// Returns the exclusive upper failure-rate bound.
    #[must_use]
    pub fn upper_bound(&self) -> f64 {
        self.upper_bound
    }

    /// Classifies a spec from its outcomes, most recent first.
    ///
    /// Skipped outcomes occupy a window slot but count as neither a pass nor
    /// a failure.
    #[must_use]
    pub fn classify(&self, spec_identity: SpecIdentity, recent: &[Outcome]) -> FlakinessVerdict {
        let window = &recent[..recent.len().min(self.window_size)];

        let sample_count = window.len();
        let pass_count = window
            .iter()
            .filter(|outcome| **outcome == Outcome::Passed)
            .count();
        let failure_count = window.iter().filter(|outcome| outcome.is_failure()).count();

        let score = if sample_count == 0 {
            0.0
        } else {
            failure_count as f64 / sample_count as f64
        };

        let is_flaky = pass_count > 0
            && failure_count > 0
            && score > self.lower_bound
            && score < self.upper_bound;

        FlakinessVerdict {
            spec_identity,
            sample_count,
            pass_count,
            failure_count,
            score,
            is_flaky,
        }
    }
}

/// Flakiness classification for one spec identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlakinessVerdict {
    /// Classified spec.
    pub spec_identity: SpecIdentity,
    /// Outcomes inside the window.
    pub sample_count: usize,
    /// Passed outcomes inside the window.
    pub pass_count: usize,
    /// Failed or errored outcomes inside the window.
    pub failure_count: usize,
    /// Failure rate over the window, used to rank specs by severity.
    pub score: f64,
    /// Whether the spec is considered flaky.
    pub is_flaky: bool,
}
