use fern_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

const TAG_NAME_MAX_LENGTH: usize = 64;

/// Case-normalized tag name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagName(String);

impl TagName {
    /// Creates a tag name, trimming and lowercasing the input.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let normalized = value.into().trim().to_lowercase();
        if normalized.is_empty() {
            return Err(AppError::Validation("tag name is required".to_owned()));
        }

        if normalized.chars().count() > TAG_NAME_MAX_LENGTH {
            return Err(AppError::Validation(format!(
                "tag name must be at most {TAG_NAME_MAX_LENGTH} characters"
            )));
        }

        Ok(Self(normalized))
    }

    /// Returns the normalized name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Label attachable to any number of runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    id: u64,
    name: TagName,
}

impl Tag {
    /// Creates a tag from its surrogate key and name.
    #[must_use]
    pub fn new(id: u64, name: TagName) -> Self {
        Self { id, name }
    }

    /// Returns the surrogate key.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the normalized name.
    #[must_use]
    pub fn name(&self) -> &TagName {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::TagName;

    #[test]
    fn tag_name_is_case_normalized() {
        let left = TagName::new("  Nightly ");
        let right = TagName::new("NIGHTLY");
        assert!(left.is_ok());
        assert!(right.is_ok());
        assert_eq!(
            left.unwrap_or_else(|_| unreachable!()),
            right.unwrap_or_else(|_| unreachable!())
        );
    }

    #[test]
    fn tag_name_rejects_blank_and_oversized_values() {
        assert!(TagName::new(" ").is_err());
        assert!(TagName::new("x".repeat(65)).is_err());
    }
}
