//! Storage error types for the identity storage contract.
//!
//! `NotFound`, `AlreadyExists` and `Conflict` are expected outcomes that
//! callers (and the conformance suites) assert on. The remaining variants
//! describe infrastructure failures.

use std::fmt;

use crate::entity::EntityKind;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested record was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// The table the lookup was made against.
        kind: EntityKind,
        /// The identifier that was not found.
        id: String,
    },

    /// Attempted to create a record whose identifier is already taken.
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// The table the insert was made against.
        kind: EntityKind,
        /// The colliding identifier.
        id: String,
    },

    /// A compare-and-swap update lost every race it was allowed to retry.
    #[error("{kind} {id}: update conflict after {attempts} attempts")]
    Conflict {
        /// The table the update was made against.
        kind: EntityKind,
        /// The identifier of the contended record.
        id: String,
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to reach the storage backend.
    #[error("Connection error: {message}")]
    ConnectionError {
        /// Description of the connection error.
        message: String,
    },

    /// An internal storage error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StorageError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Creates a new `AlreadyExists` error.
    #[must_use]
    pub fn already_exists(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            id: id.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(kind: EntityKind, id: impl Into<String>, attempts: u32) -> Self {
        Self::Conflict {
            kind,
            id: id.into(),
            attempts,
        }
    }

    /// Creates a new `ConnectionError` error.
    #[must_use]
    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::ConnectionError {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this is an already exists error.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns `true` if this is an update conflict error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::AlreadyExists { .. } => ErrorCategory::AlreadyExists,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::ConnectionError { .. } => ErrorCategory::Infrastructure,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Categories of storage errors for logging and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Record not found.
    NotFound,
    /// Identifier already in use.
    AlreadyExists,
    /// Update retries exhausted.
    Conflict,
    /// Encoding/decoding failure.
    Serialization,
    /// Infrastructure/connection error.
    Infrastructure,
    /// Internal error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::AlreadyExists => write!(f, "already_exists"),
            Self::Conflict => write!(f, "conflict"),
            Self::Serialization => write!(f, "serialization"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::not_found(EntityKind::Client, "c1");
        assert_eq!(err.to_string(), "client not found: c1");

        let err = StorageError::already_exists(EntityKind::Password, "a@example.com");
        assert_eq!(err.to_string(), "password already exists: a@example.com");

        let err = StorageError::conflict(EntityKind::AuthRequest, "r1", 16);
        assert_eq!(
            err.to_string(),
            "auth_request r1: update conflict after 16 attempts"
        );
    }

    #[test]
    fn test_error_predicates() {
        let err = StorageError::not_found(EntityKind::Keys, "keys");
        assert!(err.is_not_found());
        assert!(!err.is_already_exists());
        assert!(!err.is_conflict());

        let err = StorageError::conflict(EntityKind::Client, "c1", 3);
        assert!(err.is_conflict());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            StorageError::not_found(EntityKind::AuthCode, "x").category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            StorageError::already_exists(EntityKind::Client, "x").category(),
            ErrorCategory::AlreadyExists
        );
        assert_eq!(
            StorageError::connection_error("refused").category(),
            ErrorCategory::Infrastructure
        );
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(
            StorageError::from(json_err).category(),
            ErrorCategory::Serialization
        );
    }
}
