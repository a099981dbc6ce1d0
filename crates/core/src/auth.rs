use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult};

/// Authenticated caller forwarded by the inbound transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserIdentity {
    subject: String,
    display_name: Option<String>,
}

impl UserIdentity {
    /// Creates an identity from the subject asserted by the authentication layer.
    ///
    /// A blank subject means the request was never authenticated.
    pub fn new(subject: impl Into<String>, display_name: Option<String>) -> AppResult<Self> {
        let subject = subject.into().trim().to_owned();
        if subject.is_empty() {
            return Err(AppError::Unauthorized(
                "request has no authenticated subject".to_owned(),
            ));
        }

        let display_name = display_name.and_then(|value| {
            let trimmed = value.trim().to_owned();
            (!trimmed.is_empty()).then_some(trimmed)
        });

        Ok(Self {
            subject,
            display_name,
        })
    }

    /// Returns the stable subject used as `UserId` in permission grants.
    #[must_use]
    pub fn subject(&self) -> &str {
        self.subject.as_str()
    }

    /// Returns the display name, falling back to the subject.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(self.subject.as_str())
    }
}
