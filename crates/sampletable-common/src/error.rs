//! Error types for SampleTable
//!
//! Validation, connection and condition errors are raised before any side
//! effect. Per-cell backend failures inside batch calls are never raised;
//! they only show up in the boolean result of the enclosing call.

use thiserror::Error;

/// Common result type for SampleTable operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for SampleTable
#[derive(Debug, Error)]
pub enum Error {
    // Connection errors
    #[error("client is not connected to a table")]
    NotConnected,

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table already exists: {0}")]
    TableAlreadyExists(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    // Validation errors
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("invalid sample id: {0}")]
    InvalidSampleId(String),

    #[error("duplicate sample id: {0}")]
    DuplicateSampleId(String),

    #[error("sample not found: {0}")]
    SampleNotFound(String),

    #[error("refusing to delete without a policy version or condition")]
    UnfilteredDelete,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("type mismatch for column {column}: expected {expected}, got {found}")]
    TypeMismatch {
        column: String,
        expected: String,
        found: String,
    },

    // Condition errors
    #[error("condition error: {0}")]
    Condition(String),

    // Backend errors
    #[error("blob store error: {0}")]
    Backend(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a shape mismatch error
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::ShapeMismatch(msg.into())
    }

    /// Create a blob store error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Check if this is a retryable error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_) | Self::Backend(_))
    }

    /// Check if this error was raised by request validation, before any side effect
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::UnknownColumn(_)
                | Self::ShapeMismatch(_)
                | Self::InvalidSampleId(_)
                | Self::DuplicateSampleId(_)
                | Self::SampleNotFound(_)
                | Self::UnfilteredDelete
                | Self::InvalidArgument(_)
                | Self::TypeMismatch { .. }
                | Self::Condition(_)
        )
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TableNotFound(_) | Self::SampleNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(Error::ServiceUnavailable("t".into()).is_retryable());
        assert!(Error::backend("put failed").is_retryable());
        assert!(!Error::UnfilteredDelete.is_retryable());
    }

    #[test]
    fn test_error_validation() {
        assert!(Error::UnknownColumn("x".into()).is_validation());
        assert!(Error::UnfilteredDelete.is_validation());
        assert!(Error::Condition("bad".into()).is_validation());
        assert!(!Error::NotConnected.is_validation());
        assert!(!Error::backend("x").is_validation());
    }

    #[test]
    fn test_error_not_found() {
        assert!(Error::TableNotFound("t".into()).is_not_found());
        assert!(Error::SampleNotFound("a_0_0".into()).is_not_found());
        assert!(!Error::NotConnected.is_not_found());
    }
}
