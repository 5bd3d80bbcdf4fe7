//! Error types for the conversation crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `StoreError`: Errors from the storage backends
//! - `ConversationIdError`: Errors from the skill conversation id factory

use std::fmt;

/// Errors from storage backends (skill conversation mappings and state).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached or the operation failed.
    Unavailable { reason: String },
    /// A stored record could not be decoded.
    Corrupt { key: String, reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { reason } => write!(f, "storage unavailable: {reason}"),
            Self::Corrupt { key, reason } => {
                write!(f, "stored record '{key}' is corrupt: {reason}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from skill conversation id operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationIdError {
    /// The id is unknown, expired, or not an id this host minted.
    NotFound { id: String },
    /// The options did not carry enough addressing to derive an id.
    InvalidOptions { reason: String },
    /// The backing store failed.
    Storage(StoreError),
}

impl fmt::Display for ConversationIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "skill conversation not found: {id}"),
            Self::InvalidOptions { reason } => {
                write!(f, "invalid skill conversation options: {reason}")
            }
            Self::Storage(err) => write!(f, "skill conversation storage failed: {err}"),
        }
    }
}

impl std::error::Error for ConversationIdError {}

impl From<StoreError> for ConversationIdError {
    fn from(err: StoreError) -> Self {
        Self::Storage(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display_includes_id() {
        let err = ConversationIdError::NotFound {
            id: "skc_01J0000000000000000000000".to_string(),
        };
        assert!(err.to_string().contains("not found"));
        assert!(err.to_string().contains("skc_01J"));
    }

    #[test]
    fn storage_error_wraps_store_error() {
        let err: ConversationIdError = StoreError::Unavailable {
            reason: "connection refused".to_string(),
        }
        .into();
        assert!(err.to_string().contains("connection refused"));
    }
}
