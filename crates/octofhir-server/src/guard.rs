//! Interaction Guard (C4, §4.3): the single authorization point between
//! "a request names a type/version/interaction" and "the core operation may
//! proceed". Three distinct, ordered failures: unknown type, unsupported
//! version, disabled interaction — type first, then version, then
//! interaction, and that order must be observable by tests.

use octofhir_config::resource_registry::ResourceRegistry;
use octofhir_core::{CoreError, FhirVersion, Interaction};

/// Validates `(resource_type, version, interaction)` against the resource
/// registry (C1), in the fixed order §4.3 requires.
///
/// # Errors
///
/// - [`CoreError::InvalidResourceType`] if `resource_type` isn't configured
///   at all, or is configured but `enabled = false`.
/// - [`CoreError::InvalidResourceType`] if `version` isn't among the type's
///   supported versions.
/// - [`CoreError::InteractionNotAllowed`] if `interaction` isn't in the
///   type's allowed set.
pub fn validate(
    registry: &ResourceRegistry,
    resource_type: &str,
    version: FhirVersion,
    interaction: Interaction,
) -> Result<(), CoreError> {
    let config = registry.lookup(resource_type).filter(|c| c.enabled).ok_or_else(|| {
        CoreError::invalid_resource_type(format!("unknown or disabled resource type '{resource_type}'"))
    })?;

    if !config.supports_version(version) {
        return Err(CoreError::invalid_resource_type(format!(
            "resource type '{resource_type}' does not support FHIR version {version}"
        )));
    }

    if !config.supports_interaction(interaction) {
        return Err(CoreError::interaction_not_allowed(format!(
            "interaction '{interaction}' is disabled for '{resource_type}'"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use octofhir_config::resource_registry::{ResourceConfigDoc, VersionEntry};

    fn registry_with(interactions: Vec<&str>, versions: Vec<(&str, bool)>) -> ResourceRegistry {
        let doc = ResourceConfigDoc {
            resource_type: "Patient".to_string(),
            enabled: None,
            versions: versions
                .into_iter()
                .map(|(v, default)| VersionEntry { version: v.to_string(), default })
                .collect(),
            interactions: interactions.into_iter().map(String::from).collect(),
            search_params: None,
            schema: None,
            profiles: vec![],
        };
        ResourceRegistry::from_docs(vec![doc]).unwrap()
    }

    #[test]
    fn unknown_type_fails_first() {
        let registry = registry_with(vec!["read"], vec![("R4B", true)]);
        let err = validate(&registry, "Observation", FhirVersion::R4B, Interaction::Delete).unwrap_err();
        assert!(matches!(err, CoreError::InvalidResourceType(_)));
    }

    #[test]
    fn unsupported_version_fails_before_interaction_check() {
        let registry = registry_with(vec!["read"], vec![("R4B", true)]);
        // Delete is also not allowed, but version should be checked first.
        let err = validate(&registry, "Patient", FhirVersion::R5, Interaction::Delete).unwrap_err();
        assert!(matches!(err, CoreError::InvalidResourceType(_)));
    }

    #[test]
    fn disabled_interaction_fails_last() {
        let registry = registry_with(vec!["read"], vec![("R4B", true)]);
        let err = validate(&registry, "Patient", FhirVersion::R4B, Interaction::Delete).unwrap_err();
        assert!(matches!(err, CoreError::InteractionNotAllowed { .. }));
    }

    #[test]
    fn fully_allowed_passes() {
        let registry = registry_with(vec!["read", "create"], vec![("R4B", true)]);
        assert!(validate(&registry, "Patient", FhirVersion::R4B, Interaction::Read).is_ok());
    }

    #[test]
    fn disabled_type_is_treated_as_unknown() {
        let mut doc = ResourceConfigDoc {
            resource_type: "Patient".to_string(),
            enabled: Some(false),
            versions: vec![VersionEntry { version: "R4B".to_string(), default: true }],
            interactions: vec!["read".to_string()],
            search_params: None,
            schema: None,
            profiles: vec![],
        };
        doc.enabled = Some(false);
        let registry = ResourceRegistry::from_docs(vec![doc]).unwrap();
        let err = validate(&registry, "Patient", FhirVersion::R4B, Interaction::Read).unwrap_err();
        assert!(matches!(err, CoreError::InvalidResourceType(_)));
    }
}
