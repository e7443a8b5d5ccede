use thiserror::Error;

/// Unified error taxonomy (§7). Kinds, not exception names: every other
/// crate's error type converges into this one at its public boundary, and
/// the HTTP layer is the single place that turns a `CoreError` into an
/// `OperationOutcome` plus a status code.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid FHIR resource type: {0}")]
    InvalidResourceType(String),

    #[error("Invalid FHIR ID: {0}")]
    InvalidId(String),

    #[error("Invalid FHIR DateTime: {0}")]
    InvalidDateTime(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Time parsing error: {0}")]
    TimeError(#[from] time::error::Parse),

    #[error("UUID error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("Resource not found: {resource_type}/{id}")]
    ResourceNotFound { resource_type: String, id: String },

    /// Current row is a deletion tombstone (§4.5 `read` after `delete`).
    #[error("Resource gone: {resource_type}/{id}")]
    ResourceGone { resource_type: String, id: String },

    /// Concurrent update raced past an `If-Match` precondition (§4.5, §9).
    #[error("Version conflict on {resource_type}/{id}: expected {expected}, found {actual}")]
    VersionConflict {
        resource_type: String,
        id: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid resource data: {message}")]
    InvalidResource { message: String },

    /// Unknown or disabled search-parameter code (§4.2, §4.6).
    #[error("Invalid search parameter '{code}' for {resource_type}: {message}")]
    InvalidSearchParameter {
        resource_type: String,
        code: String,
        message: String,
    },

    /// A search value failed to parse against its declared type (§4.6).
    #[error("Invalid search value for '{code}': {message}")]
    InvalidSearchValue { code: String, message: String },

    /// Interaction disabled / unknown type / unsupported version (§4.3).
    #[error("Interaction not allowed: {message}")]
    InteractionNotAllowed { message: String },

    /// Unknown tenant external id (§6: surfaces as 404).
    #[error("Tenant not found: {message}")]
    TenantNotFound { message: String },

    /// Tenant exists but is disabled (§6: surfaces as 503).
    #[error("Tenant disabled: {message}")]
    TenantDisabled { message: String },

    /// Tenant header missing or malformed on a multi-tenant deployment
    /// (§6: surfaces as 400).
    #[error("Tenant header invalid: {message}")]
    TenantHeaderInvalid { message: String },

    /// Unknown `$operation` or version unsupported by the handler (§4.8).
    #[error("Not supported: {message}")]
    NotSupported { message: String },

    /// Validation façade reported at least one `error`-severity issue (§4.12).
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    /// Orchestrator deadline expiry (§5).
    #[error("Request timed out: {message}")]
    Timeout { message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn invalid_resource_type(resource_type: impl Into<String>) -> Self {
        Self::InvalidResourceType(resource_type.into())
    }

    pub fn invalid_id(id: impl Into<String>) -> Self {
        Self::InvalidId(id.into())
    }

    pub fn invalid_date_time(datetime: impl Into<String>) -> Self {
        Self::InvalidDateTime(datetime.into())
    }

    pub fn resource_not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    pub fn resource_gone(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::ResourceGone {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    pub fn version_conflict(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::VersionConflict {
            resource_type: resource_type.into(),
            id: id.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn invalid_resource(message: impl Into<String>) -> Self {
        Self::InvalidResource {
            message: message.into(),
        }
    }

    pub fn invalid_search_parameter(
        resource_type: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidSearchParameter {
            resource_type: resource_type.into(),
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn invalid_search_value(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSearchValue {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn interaction_not_allowed(message: impl Into<String>) -> Self {
        Self::InteractionNotAllowed {
            message: message.into(),
        }
    }

    pub fn tenant_not_found(message: impl Into<String>) -> Self {
        Self::TenantNotFound {
            message: message.into(),
        }
    }

    pub fn tenant_disabled(message: impl Into<String>) -> Self {
        Self::TenantDisabled {
            message: message.into(),
        }
    }

    pub fn tenant_header_invalid(message: impl Into<String>) -> Self {
        Self::TenantHeaderInvalid {
            message: message.into(),
        }
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::NotSupported {
            message: message.into(),
        }
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::Configuration(_) | Self::TimeError(_) | Self::UuidError(_) | Self::Internal(_)
        )
    }

    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Classification used by the HTTP layer's single translation point (§7).
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidResourceType(_)
            | Self::InvalidId(_)
            | Self::InvalidDateTime(_)
            | Self::InvalidResource { .. }
            | Self::InvalidSearchValue { .. } => ErrorCategory::Validation,
            Self::InvalidSearchParameter { .. } => ErrorCategory::InvalidSearchParameter,
            Self::ResourceNotFound { .. } => ErrorCategory::NotFound,
            Self::ResourceGone { .. } => ErrorCategory::Gone,
            Self::VersionConflict { .. } => ErrorCategory::Conflict,
            Self::InteractionNotAllowed { .. } => ErrorCategory::InteractionDisabled,
            Self::TenantNotFound { .. } => ErrorCategory::TenantNotFound,
            Self::TenantDisabled { .. } => ErrorCategory::TenantDisabled,
            Self::TenantHeaderInvalid { .. } => ErrorCategory::Validation,
            Self::NotSupported { .. } => ErrorCategory::NotSupported,
            Self::ValidationFailed { .. } => ErrorCategory::ValidationFailure,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::JsonError(_) => ErrorCategory::Serialization,
            Self::TimeError(_) | Self::UuidError(_) | Self::RegexError(_) => ErrorCategory::System,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::UrlError(_) => ErrorCategory::Validation,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }
}

/// Error categories for monitoring, logging, and HTTP-status mapping (§6, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    InvalidSearchParameter,
    NotFound,
    Gone,
    Conflict,
    InteractionDisabled,
    TenantNotFound,
    TenantDisabled,
    NotSupported,
    ValidationFailure,
    Timeout,
    Serialization,
    System,
    Configuration,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::InvalidSearchParameter => write!(f, "invalid_search_parameter"),
            Self::NotFound => write!(f, "not_found"),
            Self::Gone => write!(f, "gone"),
            Self::Conflict => write!(f, "conflict"),
            Self::InteractionDisabled => write!(f, "interaction_disabled"),
            Self::TenantNotFound => write!(f, "tenant_not_found"),
            Self::TenantDisabled => write!(f, "tenant_disabled"),
            Self::NotSupported => write!(f, "not_supported"),
            Self::ValidationFailure => write!(f, "validation_failure"),
            Self::Timeout => write!(f, "timeout"),
            Self::Serialization => write!(f, "serialization"),
            Self::System => write!(f, "system"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_not_found_is_client_error() {
        let err = CoreError::resource_not_found("Patient", "123");
        assert!(err.is_client_error());
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn gone_category_maps_distinctly_from_not_found() {
        let err = CoreError::resource_gone("Patient", "123");
        assert_eq!(err.category(), ErrorCategory::Gone);
        assert_ne!(err.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn version_conflict_carries_both_versions() {
        let err = CoreError::version_conflict("Patient", "1", "2", "3");
        assert!(err.to_string().contains("expected 2"));
        assert!(err.to_string().contains("found 3"));
        assert_eq!(err.category(), ErrorCategory::Conflict);
    }

    #[test]
    fn configuration_is_server_error() {
        let err = CoreError::configuration("bad config");
        assert!(err.is_server_error());
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ bad").unwrap_err();
        let core_err: CoreError = json_err.into();
        assert!(matches!(core_err, CoreError::JsonError(_)));
        assert_eq!(core_err.category(), ErrorCategory::Serialization);
    }
}
