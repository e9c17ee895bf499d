use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UserIdError {
    #[error("user id cannot be empty")]
    Empty,
}

/// Opaque identifier for the signed-in user, issued by the external auth
/// collaborator. Local records and remote documents are both keyed by it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a `UserId` from a raw identifier string.
    ///
    /// # Errors
    ///
    /// Returns `UserIdError::Empty` if the identifier is empty or whitespace;
    /// no operation may proceed without a signed-in user.
    pub fn new(raw: impl Into<String>) -> Result<Self, UserIdError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(UserIdError::Empty);
        }
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_ids() {
        assert_eq!(UserId::new("").unwrap_err(), UserIdError::Empty);
        assert_eq!(UserId::new("   ").unwrap_err(), UserIdError::Empty);
    }

    #[test]
    fn keeps_raw_value() {
        let id = UserId::new("uid-1234").unwrap();
        assert_eq!(id.as_str(), "uid-1234");
        assert_eq!(id.to_string(), "uid-1234");
    }
}
