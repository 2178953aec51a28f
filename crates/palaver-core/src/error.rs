//! Error types for the Palaver client core
//!
//! All fallible internal operations return [`PalaverResult`]. The public
//! cache surface converts errors to miss/no-op outcomes instead of
//! propagating them; see the `cache` module.

use thiserror::Error;

/// Result type alias for Palaver operations
pub type PalaverResult<T> = Result<T, PalaverError>;

/// Unified error type for the Palaver client core
#[derive(Error, Debug)]
pub enum PalaverError {
    /// Persistence substrate failures other than quota exhaustion
    #[error("storage error: {message}")]
    Storage { message: String },

    /// The persistence substrate is out of capacity
    #[error("storage quota exceeded")]
    QuotaExceeded,

    /// A persisted blob failed to parse
    #[error("malformed persisted data: {message}")]
    MalformedData { message: String },

    /// A caller supplied input the operation cannot work with
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Chat completion client failures
    #[error("completion error: {message}")]
    Completion { message: String },

    /// JSON serialization failures
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PalaverError {
    /// Create a new storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a new malformed data error
    pub fn malformed_data(message: impl Into<String>) -> Self {
        Self::MalformedData {
            message: message.into(),
        }
    }

    /// Create a new invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a new completion error
    pub fn completion(message: impl Into<String>) -> Self {
        Self::Completion {
            message: message.into(),
        }
    }

    /// Check whether this error is the substrate's quota-exceeded condition
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded)
    }
}
