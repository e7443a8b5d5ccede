//! Storage error types for the FHIR storage abstraction layer.

use octofhir_core::CoreError;
use std::fmt;

/// Errors that can occur during storage operations (§7).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Resource not found: {resource_type}/{id}")]
    NotFound { resource_type: String, id: String },

    /// Current row for this id is a deletion tombstone (§4.6, §9).
    #[error("Resource gone: {resource_type}/{id}")]
    Gone { resource_type: String, id: String },

    #[error("Version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: String, actual: String },

    #[error("Resource already exists: {resource_type}/{id}")]
    AlreadyExists { resource_type: String, id: String },

    #[error("Invalid resource: {message}")]
    InvalidResource { message: String },

    #[error("Transaction error: {message}")]
    TransactionError { message: String },

    #[error("Transactions are not supported by this backend")]
    TransactionsNotSupported,

    #[error("Connection error: {message}")]
    ConnectionError { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl StorageError {
    #[must_use]
    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    #[must_use]
    pub fn gone(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Gone {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    #[must_use]
    pub fn version_conflict(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::VersionConflict {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    #[must_use]
    pub fn already_exists(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    #[must_use]
    pub fn invalid_resource(message: impl Into<String>) -> Self {
        Self::InvalidResource {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn transaction_error(message: impl Into<String>) -> Self {
        Self::TransactionError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::ConnectionError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Gone { .. })
    }

    #[must_use]
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Gone { .. } => ErrorCategory::Gone,
            Self::VersionConflict { .. } => ErrorCategory::Conflict,
            Self::AlreadyExists { .. } => ErrorCategory::Conflict,
            Self::InvalidResource { .. } => ErrorCategory::Validation,
            Self::TransactionError { .. } | Self::TransactionsNotSupported => {
                ErrorCategory::Transaction
            }
            Self::ConnectionError { .. } => ErrorCategory::Infrastructure,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of storage errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    NotFound,
    Gone,
    Conflict,
    Validation,
    Transaction,
    Infrastructure,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Gone => write!(f, "gone"),
            Self::Conflict => write!(f, "conflict"),
            Self::Validation => write!(f, "validation"),
            Self::Transaction => write!(f, "transaction"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

impl From<CoreError> for StorageError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ResourceNotFound { resource_type, id } => Self::not_found(resource_type, id),
            CoreError::ResourceGone { resource_type, id } => Self::gone(resource_type, id),
            CoreError::VersionConflict {
                expected, actual, ..
            } => Self::version_conflict(expected, actual),
            CoreError::InvalidResource { message } => Self::invalid_resource(message),
            other => Self::internal(other.to_string()),
        }
    }
}
