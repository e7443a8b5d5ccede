//! Resource Registry (C1, §4.1): loads per-resource-type configuration at
//! startup and answers routing questions about it for the rest of the
//! request pipeline. Populated exactly once; every lookup afterward is a
//! plain, lock-free map read — no partial state is ever observable (§4.1,
//! §5 "Registries ... populated at startup and treated as immutable").

use std::collections::{HashMap, HashSet};

use octofhir_core::{CoreError, FhirVersion, Interaction};
use serde::{Deserialize, Serialize};

/// Where a resource type's rows physically live (§3 "Schema Placement").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaPlacement {
    /// The default schema, shared with every other shared-placement type.
    Shared,
    /// A dedicated schema containing only rows of this one type. The name
    /// is validated against `[a-zA-Z_][a-zA-Z0-9_]*` by the schema router
    /// (C5), not here — this registry only remembers the configured name.
    Dedicated(String),
}

impl Default for SchemaPlacement {
    fn default() -> Self {
        Self::Shared
    }
}

/// Declarative configuration for one resource type (§3 "Resource
/// Configuration"). Loaded once at startup, never mutated.
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    pub resource_type: String,
    pub enabled: bool,
    pub supported_versions: Vec<FhirVersion>,
    pub default_version: FhirVersion,
    pub interactions: HashSet<Interaction>,
    /// `None` means no additional restriction beyond what C2 already allows
    /// for this type (base set + per-type bundle); `Some` is an allow-list
    /// intersected with C2's answer (§4.1, §4.2).
    pub search_param_allowlist: Option<HashSet<String>>,
    pub schema_placement: SchemaPlacement,
    pub profiles: Vec<String>,
}

impl ResourceConfig {
    #[must_use]
    pub fn supports_version(&self, version: FhirVersion) -> bool {
        self.supported_versions.contains(&version)
    }

    #[must_use]
    pub fn supports_interaction(&self, interaction: Interaction) -> bool {
        self.interactions.contains(&interaction)
    }
}

/// The wire/file shape a resource configuration document is read from
/// (§1: discovering and parsing the file itself is the config layer's
/// external collaborator's job; this is the shape C1 consumes).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResourceConfigDoc {
    pub resource_type: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub versions: Vec<VersionEntry>,
    #[serde(default)]
    pub interactions: Vec<String>,
    #[serde(default)]
    pub search_params: Option<Vec<String>>,
    #[serde(default)]
    pub schema: Option<SchemaDoc>,
    #[serde(default)]
    pub profiles: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VersionEntry {
    pub version: String,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum SchemaDoc {
    Shared,
    Dedicated { name: String },
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("resource config for '{0}' declares no supported versions")]
    NoVersions(String),
    #[error("resource config for '{0}' marks more than one default version")]
    MultipleDefaultVersions(String),
    #[error("resource config for '{0}' marks no default version among {1:?}")]
    NoDefaultVersion(String, Vec<String>),
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// The default schema name used when a config omits a schema descriptor
/// entirely (§4.1 "missing schema descriptor defaults to `Shared(default_schema)`").
pub const DEFAULT_SCHEMA: &str = "public";

fn build_config(doc: ResourceConfigDoc) -> Result<ResourceConfig, RegistryError> {
    if doc.versions.is_empty() {
        return Err(RegistryError::NoVersions(doc.resource_type.clone()));
    }
    let mut supported = Vec::with_capacity(doc.versions.len());
    let mut default = None;
    for v in &doc.versions {
        let parsed: FhirVersion = v.version.parse()?;
        supported.push(parsed);
        if v.default {
            if default.is_some() {
                return Err(RegistryError::MultipleDefaultVersions(doc.resource_type.clone()));
            }
            default = Some(parsed);
        }
    }
    let default_version = default.ok_or_else(|| {
        RegistryError::NoDefaultVersion(
            doc.resource_type.clone(),
            doc.versions.iter().map(|v| v.version.clone()).collect(),
        )
    })?;

    let mut interactions = HashSet::new();
    for i in &doc.interactions {
        interactions.insert(i.parse()?);
    }

    let schema_placement = match doc.schema {
        None => SchemaPlacement::Shared,
        Some(SchemaDoc::Shared) => SchemaPlacement::Shared,
        Some(SchemaDoc::Dedicated { name }) => SchemaPlacement::Dedicated(name),
    };

    Ok(ResourceConfig {
        resource_type: doc.resource_type,
        enabled: doc.enabled.unwrap_or(true),
        supported_versions: supported,
        default_version,
        interactions,
        search_param_allowlist: doc.search_params.map(|v| v.into_iter().collect()),
        schema_placement,
        profiles: doc.profiles,
    })
}

/// C1: the resource registry itself. Construct once via
/// [`ResourceRegistry::from_docs`], then share behind an `Arc`.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    configs: HashMap<String, ResourceConfig>,
}

impl ResourceRegistry {
    /// Builds a registry from parsed configuration documents (§4.1).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if any document is malformed (no versions,
    /// no/multiple default version, unparseable version or interaction name).
    pub fn from_docs(docs: impl IntoIterator<Item = ResourceConfigDoc>) -> Result<Self, RegistryError> {
        let mut configs = HashMap::new();
        for doc in docs {
            let config = build_config(doc)?;
            configs.insert(config.resource_type.clone(), config);
        }
        Ok(Self { configs })
    }

    /// Constant-time lookup. Unknown types return `None`; a
    /// configured-but-disabled type still returns `Some` with `enabled =
    /// false` so the guard (C4) can tell "unknown" from "forbidden" apart
    /// (§4.1).
    #[must_use]
    pub fn lookup(&self, resource_type: &str) -> Option<&ResourceConfig> {
        self.configs.get(resource_type)
    }

    #[must_use]
    pub fn enabled_resource_types(&self) -> Vec<&str> {
        self.configs
            .values()
            .filter(|c| c.enabled)
            .map(|c| c.resource_type.as_str())
            .collect()
    }

    #[must_use]
    pub fn is_interaction_enabled(
        &self,
        resource_type: &str,
        version: FhirVersion,
        interaction: Interaction,
    ) -> bool {
        self.configs
            .get(resource_type)
            .is_some_and(|c| c.enabled && c.supports_version(version) && c.supports_interaction(interaction))
    }

    #[must_use]
    pub fn schema_placement(&self, resource_type: &str) -> SchemaPlacement {
        self.configs
            .get(resource_type)
            .map(|c| c.schema_placement.clone())
            .unwrap_or(SchemaPlacement::Shared)
    }

    #[must_use]
    pub fn required_profiles(&self, resource_type: &str, _version: FhirVersion) -> Vec<String> {
        self.configs
            .get(resource_type)
            .map(|c| c.profiles.clone())
            .unwrap_or_default()
    }

    /// Whether `code` is allowed for `resource_type` per this type's
    /// allow-list, if one was configured (§4.1, intersected with C2 by the
    /// caller — this registry alone can't say "unknown code", only "not on
    /// this type's allow-list").
    #[must_use]
    pub fn allows_search_param(&self, resource_type: &str, code: &str) -> bool {
        match self.configs.get(resource_type).and_then(|c| c.search_param_allowlist.as_ref()) {
            Some(allowlist) => allowlist.contains(code),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient_doc() -> ResourceConfigDoc {
        ResourceConfigDoc {
            resource_type: "Patient".to_string(),
            enabled: None,
            versions: vec![
                VersionEntry { version: "R4B".to_string(), default: true },
                VersionEntry { version: "R5".to_string(), default: false },
            ],
            interactions: vec!["read".to_string(), "create".to_string(), "search".to_string()],
            search_params: None,
            schema: None,
            profiles: vec![],
        }
    }

    #[test]
    fn unknown_type_returns_none() {
        let registry = ResourceRegistry::from_docs(vec![patient_doc()]).unwrap();
        assert!(registry.lookup("Observation").is_none());
    }

    #[test]
    fn missing_enabled_defaults_to_true() {
        let registry = ResourceRegistry::from_docs(vec![patient_doc()]).unwrap();
        assert!(registry.lookup("Patient").unwrap().enabled);
    }

    #[test]
    fn disabled_type_is_distinguishable_from_unknown() {
        let mut doc = patient_doc();
        doc.enabled = Some(false);
        let registry = ResourceRegistry::from_docs(vec![doc]).unwrap();
        let config = registry.lookup("Patient");
        assert!(config.is_some());
        assert!(!config.unwrap().enabled);
        assert!(!registry.is_interaction_enabled("Patient", FhirVersion::R4B, Interaction::Read));
    }

    #[test]
    fn missing_schema_defaults_to_shared() {
        let registry = ResourceRegistry::from_docs(vec![patient_doc()]).unwrap();
        assert_eq!(registry.schema_placement("Patient"), SchemaPlacement::Shared);
    }

    #[test]
    fn dedicated_schema_is_remembered() {
        let mut doc = patient_doc();
        doc.resource_type = "CarePlan".to_string();
        doc.schema = Some(SchemaDoc::Dedicated { name: "careplan_schema".to_string() });
        let registry = ResourceRegistry::from_docs(vec![doc]).unwrap();
        assert_eq!(
            registry.schema_placement("CarePlan"),
            SchemaPlacement::Dedicated("careplan_schema".to_string())
        );
    }

    #[test]
    fn unsupported_version_rejected() {
        let registry = ResourceRegistry::from_docs(vec![patient_doc()]).unwrap();
        assert!(!registry.is_interaction_enabled("Patient", FhirVersion::R4, Interaction::Read));
    }

    #[test]
    fn disabled_interaction_rejected() {
        let registry = ResourceRegistry::from_docs(vec![patient_doc()]).unwrap();
        assert!(!registry.is_interaction_enabled("Patient", FhirVersion::R4B, Interaction::Delete));
    }

    #[test]
    fn missing_default_version_is_an_error() {
        let mut doc = patient_doc();
        doc.versions.iter_mut().for_each(|v| v.default = false);
        assert!(matches!(
            ResourceRegistry::from_docs(vec![doc]),
            Err(RegistryError::NoDefaultVersion(_, _))
        ));
    }

    #[test]
    fn multiple_default_versions_is_an_error() {
        let mut doc = patient_doc();
        doc.versions.iter_mut().for_each(|v| v.default = true);
        assert!(matches!(
            ResourceRegistry::from_docs(vec![doc]),
            Err(RegistryError::MultipleDefaultVersions(_))
        ));
    }

    #[test]
    fn search_param_allowlist_restricts_codes() {
        let mut doc = patient_doc();
        doc.search_params = Some(vec!["name".to_string()]);
        let registry = ResourceRegistry::from_docs(vec![doc]).unwrap();
        assert!(registry.allows_search_param("Patient", "name"));
        assert!(!registry.allows_search_param("Patient", "gender"));
    }

    #[test]
    fn no_allowlist_allows_everything() {
        let registry = ResourceRegistry::from_docs(vec![patient_doc()]).unwrap();
        assert!(registry.allows_search_param("Patient", "anything"));
    }
}
