//! Validation Façade (C13, §4.12): a thin adapter over the external
//! structural validator (§6 "the structural validator is a pure function
//! `(document, version, profile?) → outcome`... consumed as an opaque
//! capability"). This module owns none of the FHIRSchema/FHIRPath
//! machinery itself — it defines the contract an injected
//! [`ExternalValidator`] must satisfy and turns its outcome into the
//! uniform issue shape the rest of the server speaks.

use async_trait::async_trait;
use octofhir_core::{CoreError, FhirVersion};
use serde_json::{Value as JsonValue, json};

/// Severity of one reported issue (§4.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    Fatal,
    Error,
    Warning,
    Information,
}

impl IssueSeverity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fatal => "fatal",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "information",
        }
    }
}

/// One reported issue: `{severity, code, path, message}` (§4.12).
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub code: String,
    pub path: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    #[must_use]
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { severity: IssueSeverity::Error, code: code.into(), path: None, message: message.into() }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// The set of issues a validation call produced (§4.12).
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationOutcome {
    #[must_use]
    pub fn success() -> Self {
        Self { issues: Vec::new() }
    }

    #[must_use]
    pub fn single_error(message: impl Into<String>) -> Self {
        Self { issues: vec![ValidationIssue::error("invalid", message)] }
    }

    /// True when at least one `error`/`fatal` issue is present (§4.12 "on
    /// `error` severity, callers treat the operation as failed").
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| matches!(i.severity, IssueSeverity::Error | IssueSeverity::Fatal))
    }

    #[must_use]
    pub fn to_operation_outcome(&self) -> JsonValue {
        json!({
            "resourceType": "OperationOutcome",
            "issue": self.issues.iter().map(|issue| {
                let mut entry = json!({
                    "severity": issue.severity.as_str(),
                    "code": issue.code,
                    "diagnostics": issue.message,
                });
                if let Some(path) = &issue.path {
                    entry["expression"] = json!([path]);
                }
                entry
            }).collect::<Vec<_>>(),
        })
    }
}

/// The opaque capability this façade adapts (§6 "the structural validator
/// is a pure function"). A real deployment wires an implementation backed
/// by whatever concrete schema/constraint engine it has chosen; this crate
/// only needs the contract.
#[async_trait]
pub trait ExternalValidator: Send + Sync {
    async fn validate(
        &self,
        document: &JsonValue,
        version: FhirVersion,
        profile_url: Option<&str>,
    ) -> Result<ValidationOutcome, CoreError>;
}

/// A validator that always reports success, for deployments or tests that
/// don't wire a real structural validator (§9 Open Question: "no-op by
/// default, replaced by configuration").
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysValidValidator;

#[async_trait]
impl ExternalValidator for AlwaysValidValidator {
    async fn validate(&self, _document: &JsonValue, _version: FhirVersion, _profile_url: Option<&str>) -> Result<ValidationOutcome, CoreError> {
        Ok(ValidationOutcome::success())
    }
}

/// C13: adapts an injected [`ExternalValidator`] into the uniform outcome
/// shape the rest of the server consumes, and translates an error-severity
/// outcome into [`CoreError::ValidationFailed`] (§4.12).
pub struct ValidationFacade {
    validator: Box<dyn ExternalValidator>,
}

impl ValidationFacade {
    #[must_use]
    pub fn new(validator: Box<dyn ExternalValidator>) -> Self {
        Self { validator }
    }

    /// Runs the façade's validator and, if it reports any error-severity
    /// issue, converts the outcome into a [`CoreError::ValidationFailed`]
    /// (§4.12 callers treat this as HTTP 422-equivalent, mapped centrally
    /// in [`crate::error_response`]).
    pub async fn validate(&self, document: &JsonValue, version: FhirVersion, profile_url: Option<&str>) -> Result<ValidationOutcome, CoreError> {
        let outcome = self.validator.validate(document, version, profile_url).await?;
        if outcome.has_errors() {
            let messages: Vec<&str> = outcome.issues.iter().map(|i| i.message.as_str()).collect();
            return Err(CoreError::validation_failed(messages.join("; ")));
        }
        Ok(outcome)
    }
}
