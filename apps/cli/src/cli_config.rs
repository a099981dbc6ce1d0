use std::env;

use fern_core::{AppError, AppResult, UserIdentity};
use fern_domain::{
    DEFAULT_FLAKY_LOWER_BOUND, DEFAULT_FLAKY_UPPER_BOUND, DEFAULT_FLAKY_WINDOW_SIZE,
    FlakyDetectionPolicy,
};

/// Runtime settings read from the process environment.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub flaky_policy: FlakyDetectionPolicy,
    actor: Option<String>,
    actor_name: Option<String>,
}

impl CliConfig {
    pub fn load() -> AppResult<Self> {
        let database_url = required_env("DATABASE_URL")?;
        let max_connections = parse_env_u32("DATABASE_MAX_CONNECTIONS", 5)?;
        let window_size = parse_env_usize("FLAKY_WINDOW_SIZE", DEFAULT_FLAKY_WINDOW_SIZE)?;
        let lower_bound = parse_env_f64("FLAKY_LOWER_BOUND", DEFAULT_FLAKY_LOWER_BOUND)?;
        let upper_bound = parse_env_f64("FLAKY_UPPER_BOUND", DEFAULT_FLAKY_UPPER_BOUND)?;
        let actor = optional_env("FERN_ACTOR");
        let actor_name = optional_env("FERN_ACTOR_NAME");

        if max_connections == 0 {
            return Err(AppError::Validation(
                "DATABASE_MAX_CONNECTIONS must be greater than zero".to_owned(),
            ));
        }

        let flaky_policy = FlakyDetectionPolicy::new(window_size, lower_bound, upper_bound)
            .map_err(|error| {
                AppError::Validation(format!(
                    "invalid FLAKY_WINDOW_SIZE/FLAKY_LOWER_BOUND/FLAKY_UPPER_BOUND: {error}"
                ))
            })?;

        Ok(Self {
            database_url,
            max_connections,
            flaky_policy,
            actor,
            actor_name,
        })
    }

    /// Returns the identity report commands act as.
    pub fn actor(&self) -> AppResult<UserIdentity> {
        let subject = self
            .actor
            .as_deref()
            .ok_or_else(|| AppError::Validation("FERN_ACTOR is required".to_owned()))?;

        UserIdentity::new(subject, self.actor_name.clone())
    }
}

fn optional_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_usize(name: &str, default: usize) -> AppResult<usize> {
    match env::var(name) {
        Ok(value) => value.parse::<usize>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> AppResult<u32> {
    match env::var(name) {
        Ok(value) => value.parse::<u32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_f64(name: &str, default: f64) -> AppResult<f64> {
    match env::var(name) {
        Ok(value) => value.parse::<f64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use fern_core::AppError;
    use fern_domain::FlakyDetectionPolicy;

    use super::CliConfig;

    fn config(actor: Option<&str>, actor_name: Option<&str>) -> CliConfig {
        CliConfig {
            database_url: "postgres://localhost/fern".to_owned(),
            max_connections: 1,
            flaky_policy: FlakyDetectionPolicy::default(),
            actor: actor.map(str::to_owned),
            actor_name: actor_name.map(str::to_owned),
        }
    }

    #[test]
    fn actor_carries_the_configured_display_name() {
        let named = config(Some("alice"), Some("Alice Liddell"))
            .actor()
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(named.subject(), "alice");
        assert_eq!(named.display_name(), "Alice Liddell");

        let bare = config(Some("bob"), None)
            .actor()
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(bare.display_name(), "bob");
    }

    #[test]
    fn missing_actor_is_a_validation_error() {
        assert!(matches!(
            config(None, Some("Nobody")).actor(),
            Err(AppError::Validation(_))
        ));
    }
}
