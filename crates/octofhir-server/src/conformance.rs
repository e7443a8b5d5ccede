//! Conformance Generator (C11, §4.10): walks the resource registry (C1),
//! the search parameter registry (C2), and the operation table (C9) to
//! build the server's self-description document. Deterministic for a
//! given configuration — every collection is sorted before being
//! serialized, so two runs over the same registries produce byte-identical
//! output.

use octofhir_config::resource_registry::ResourceRegistry;
use octofhir_core::FhirVersion;
use octofhir_search::registry::SearchParameterRegistry;
use serde_json::{Value, json};

use crate::operations::{OperationRegistry, OperationScope};

fn operation_scope_code(scope: OperationScope) -> &'static str {
    match scope {
        OperationScope::System => "system",
        OperationScope::Type => "type",
        OperationScope::Instance => "instance",
    }
}

fn search_param_type_code(kind: octofhir_search::parameters::SearchParameterType) -> &'static str {
    use octofhir_search::parameters::SearchParameterType as T;
    match kind {
        T::Number => "number",
        T::Date => "date",
        T::String => "string",
        T::Token => "token",
        T::Reference => "reference",
        T::Composite => "composite",
        T::Quantity => "quantity",
        T::Uri => "uri",
        T::Special => "special",
    }
}

/// Produces a CapabilityStatement-equivalent describing this configuration
/// (§4.10).
pub fn generate(
    resource_registry: &ResourceRegistry,
    search_registry: &SearchParameterRegistry,
    operation_registry: &OperationRegistry,
    fhir_version: FhirVersion,
) -> Value {
    let mut resource_types = resource_registry.enabled_resource_types();
    resource_types.sort_unstable();

    let resources: Vec<Value> = resource_types
        .iter()
        .map(|resource_type| {
            let config = resource_registry.lookup(resource_type).expect("enabled type is registered");

            let mut interactions: Vec<&str> = config
                .interactions
                .iter()
                .filter(|i| resource_registry.is_interaction_enabled(resource_type, fhir_version, **i))
                .map(|i| match i {
                    octofhir_core::Interaction::Read => "read",
                    octofhir_core::Interaction::VRead => "vread",
                    octofhir_core::Interaction::Create => "create",
                    octofhir_core::Interaction::Update => "update",
                    octofhir_core::Interaction::Patch => "patch",
                    octofhir_core::Interaction::Delete => "delete",
                    octofhir_core::Interaction::Search => "search-type",
                    octofhir_core::Interaction::History => "history-instance",
                })
                .collect();
            interactions.sort_unstable();

            let mut search_params: Vec<Value> = search_registry
                .get_all_for_type(resource_type)
                .into_iter()
                .filter(|param| resource_registry.allows_search_param(resource_type, &param.code))
                .map(|param| {
                    let mut entry = json!({
                        "name": param.code,
                        "type": search_param_type_code(param.param_type),
                    });
                    if let Some(description) = &param.description {
                        entry["documentation"] = json!(description);
                    }
                    entry
                })
                .collect();
            search_params.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

            json!({
                "type": resource_type,
                "interaction": interactions.into_iter().map(|code| json!({"code": code})).collect::<Vec<_>>(),
                "searchParam": search_params,
            })
        })
        .collect();

    let mut operations: Vec<(String, String, String, Vec<String>)> = operation_registry
        .registrations()
        .map(|(name, scope, resource_type, versions)| {
            (
                name.to_string(),
                operation_scope_code(scope).to_string(),
                resource_type.unwrap_or("*").to_string(),
                versions.iter().map(FhirVersion::to_string).collect(),
            )
        })
        .collect();
    operations.sort();

    let operation_docs: Vec<Value> = operations
        .into_iter()
        .map(|(name, scope, resource_type, versions)| {
            json!({
                "name": name,
                "scope": scope,
                "resourceType": resource_type,
                "supportedVersions": versions,
                "definition": format!("OperationDefinition/{name}"),
            })
        })
        .collect();

    json!({
        "resourceType": "CapabilityStatement",
        "status": "active",
        "kind": "instance",
        "fhirVersion": fhir_version.to_string(),
        "format": ["json", "xml"],
        "patchFormat": ["application/json-patch+json"],
        "rest": [{
            "mode": "server",
            "resource": resources,
            "operation": operation_docs,
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{OperationHandler, OperationInvocation, OperationOutput};
    use async_trait::async_trait;
    use octofhir_config::resource_registry::{ResourceConfigDoc, VersionEntry};
    use octofhir_core::CoreError;
    use octofhir_search::parameters::{SearchParameter, SearchParameterType};
    use std::sync::Arc;

    struct NoopOperation;

    #[async_trait]
    impl OperationHandler for NoopOperation {
        fn supported_versions(&self) -> &[FhirVersion] {
            &[FhirVersion::R4B]
        }
        async fn invoke(&self, _invocation: &OperationInvocation) -> Result<OperationOutput, CoreError> {
            Ok(OperationOutput::ok(json!({})))
        }
    }

    fn patient_doc() -> ResourceConfigDoc {
        ResourceConfigDoc {
            resource_type: "Patient".to_string(),
            enabled: None,
            versions: vec![VersionEntry { version: "R4B".to_string(), default: true }],
            interactions: vec!["read".to_string(), "search".to_string()],
            search_params: None,
            schema: None,
            profiles: vec![],
        }
    }

    #[test]
    fn lists_enabled_interactions_and_search_params() {
        let resource_registry = ResourceRegistry::from_docs(vec![patient_doc()]).unwrap();
        let mut search_registry = SearchParameterRegistry::new();
        search_registry.register(SearchParameter::new(
            "name",
            "http://hl7.org/fhir/SearchParameter/Patient-name",
            SearchParameterType::String,
            vec!["Patient".to_string()],
        ));
        let operation_registry = OperationRegistry::new();

        let doc = generate(&resource_registry, &search_registry, &operation_registry, FhirVersion::R4B);
        let resource = &doc["rest"][0]["resource"][0];
        assert_eq!(resource["type"], "Patient");
        let interactions: Vec<&str> = resource["interaction"].as_array().unwrap().iter().map(|i| i["code"].as_str().unwrap()).collect();
        assert_eq!(interactions, vec!["read", "search-type"]);
        assert_eq!(resource["searchParam"][0]["name"], "name");
    }

    #[test]
    fn disabled_resource_types_are_excluded() {
        let mut doc = patient_doc();
        doc.enabled = Some(false);
        let resource_registry = ResourceRegistry::from_docs(vec![doc]).unwrap();
        let search_registry = SearchParameterRegistry::new();
        let operation_registry = OperationRegistry::new();

        let capability = generate(&resource_registry, &search_registry, &operation_registry, FhirVersion::R4B);
        assert!(capability["rest"][0]["resource"].as_array().unwrap().is_empty());
    }

    #[test]
    fn lists_registered_operations() {
        let resource_registry = ResourceRegistry::from_docs(vec![patient_doc()]).unwrap();
        let search_registry = SearchParameterRegistry::new();
        let mut operation_registry = OperationRegistry::new();
        operation_registry.register("everything", OperationScope::Instance, Some("Patient".to_string()), Arc::new(NoopOperation));

        let capability = generate(&resource_registry, &search_registry, &operation_registry, FhirVersion::R4B);
        let ops = capability["rest"][0]["operation"].as_array().unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0]["name"], "everything");
        assert_eq!(ops[0]["resourceType"], "Patient");
    }

    #[test]
    fn generation_is_deterministic() {
        let resource_registry = ResourceRegistry::from_docs(vec![patient_doc()]).unwrap();
        let search_registry = SearchParameterRegistry::new();
        let operation_registry = OperationRegistry::new();

        let first = generate(&resource_registry, &search_registry, &operation_registry, FhirVersion::R4B);
        let second = generate(&resource_registry, &search_registry, &operation_registry, FhirVersion::R4B);
        assert_eq!(first, second);
    }
}
