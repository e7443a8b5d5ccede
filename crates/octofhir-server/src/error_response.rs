//! The single point where a [`CoreError`] becomes an HTTP status and an
//! `OperationOutcome` document (§7 "the orchestrator is the single
//! translation point from typed error to outcome document + HTTP-status
//! hint"). Every handler, the bundle processor, and the plugin pipeline's
//! abort path all funnel through here so the mapping can't drift between
//! call sites.

use octofhir_core::{CoreError, ErrorCategory};
use serde_json::{Value, json};

/// Maps a [`CoreError`] to the HTTP status §6 assigns its category.
///
/// `409` is reserved for [`CoreError::VersionConflict`] only (§9 "this spec
/// assigns 409 to version conflict only").
#[must_use]
pub fn status_for_error(error: &CoreError) -> u16 {
    match error.category() {
        ErrorCategory::Validation | ErrorCategory::InvalidSearchParameter => 400,
        ErrorCategory::NotFound | ErrorCategory::TenantNotFound => 404,
        ErrorCategory::Gone => 410,
        ErrorCategory::Conflict => 409,
        ErrorCategory::InteractionDisabled => 405,
        ErrorCategory::TenantDisabled => 503,
        ErrorCategory::NotSupported => 501,
        ErrorCategory::ValidationFailure => 422,
        ErrorCategory::Timeout => 504,
        ErrorCategory::Serialization => 400,
        ErrorCategory::System | ErrorCategory::Configuration | ErrorCategory::Internal => 500,
    }
}

fn issue_code(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::Validation | ErrorCategory::Serialization => "invalid",
        ErrorCategory::InvalidSearchParameter => "invalid",
        ErrorCategory::NotFound | ErrorCategory::TenantNotFound => "not-found",
        ErrorCategory::Gone => "deleted",
        ErrorCategory::Conflict => "conflict",
        ErrorCategory::InteractionDisabled => "not-supported",
        ErrorCategory::TenantDisabled => "suppressed",
        ErrorCategory::NotSupported => "not-supported",
        ErrorCategory::ValidationFailure => "structure",
        ErrorCategory::Timeout => "timeout",
        ErrorCategory::System | ErrorCategory::Configuration | ErrorCategory::Internal => "exception",
    }
}

/// Builds the `OperationOutcome` body for `error` (§6 "wire format").
#[must_use]
pub fn operation_outcome_for_error(error: &CoreError) -> Value {
    let category = error.category();
    let severity = if status_for_error(error) >= 500 { "fatal" } else { "error" };
    json!({
        "resourceType": "OperationOutcome",
        "issue": [{
            "severity": severity,
            "code": issue_code(category),
            "diagnostics": error.to_string(),
        }]
    })
}
