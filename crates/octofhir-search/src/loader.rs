//! Startup loading of search parameter definitions into a [`SearchParameterRegistry`] (C2, §4.2).
//!
//! The registry is populated from two kinds of documents, both plain FHIR
//! `SearchParameter` JSON (or a `Bundle` of them): one universal base bundle
//! whose entries apply to every resource type, and one bundle per resource
//! type. Discovering *where* those documents live on disk is the config
//! layer's job (§1); this module only knows how to turn parsed JSON into
//! registry entries.

use serde_json::Value;
use thiserror::Error;

use crate::common::register_common_parameters;
use crate::parameters::{
    ElementTypeHint, SearchParameter, SearchParameterComponent, SearchParameterType,
};
use crate::registry::SearchParameterRegistry;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("not a SearchParameter or Bundle resource: {0}")]
    UnexpectedResourceType(String),
    #[error("SearchParameter missing required field '{0}'")]
    MissingField(&'static str),
    #[error("SearchParameter has unknown type '{0}'")]
    UnknownType(String),
}

/// Parses a single `SearchParameter` resource document.
pub fn parse_search_parameter(doc: &Value) -> Result<SearchParameter, LoaderError> {
    let resource_type = doc.get("resourceType").and_then(Value::as_str).unwrap_or("");
    if resource_type != "SearchParameter" {
        return Err(LoaderError::UnexpectedResourceType(resource_type.to_string()));
    }

    let code = doc
        .get("code")
        .and_then(Value::as_str)
        .ok_or(LoaderError::MissingField("code"))?;
    let url = doc
        .get("url")
        .and_then(Value::as_str)
        .ok_or(LoaderError::MissingField("url"))?;
    let type_str = doc
        .get("type")
        .and_then(Value::as_str)
        .ok_or(LoaderError::MissingField("type"))?;
    let param_type = parse_param_type(type_str)?;

    let base: Vec<String> = doc
        .get("base")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    let mut param = SearchParameter::new(code, url, param_type, base);

    if let Some(expr) = doc.get("expression").and_then(Value::as_str) {
        param = param.with_expression(expr);
    }
    if let Some(desc) = doc.get("description").and_then(Value::as_str) {
        param = param.with_description(desc);
    }
    if let Some(target) = doc.get("target").and_then(Value::as_array) {
        let target = target.iter().filter_map(Value::as_str).map(str::to_string).collect();
        param = param.with_target(target);
    }
    if let Some(components) = doc.get("component").and_then(Value::as_array) {
        let components = components
            .iter()
            .filter_map(|c| c.get("expression").and_then(Value::as_str))
            .map(SearchParameterComponent::new)
            .collect();
        param = param.with_component(components);
    }
    if let Some(hint) = element_type_hint_for(code, param_type) {
        param = param.with_element_type_hint(hint);
    }

    Ok(param)
}

fn parse_param_type(s: &str) -> Result<SearchParameterType, LoaderError> {
    match s {
        "number" => Ok(SearchParameterType::Number),
        "date" => Ok(SearchParameterType::Date),
        "string" => Ok(SearchParameterType::String),
        "token" => Ok(SearchParameterType::Token),
        "reference" => Ok(SearchParameterType::Reference),
        "composite" => Ok(SearchParameterType::Composite),
        "quantity" => Ok(SearchParameterType::Quantity),
        "uri" => Ok(SearchParameterType::Uri),
        "special" => Ok(SearchParameterType::Special),
        other => Err(LoaderError::UnknownType(other.to_string())),
    }
}

/// A handful of well-known codes get a more specific element-type hint than
/// their declared `type` alone conveys, driving the GIN-friendly predicate
/// builders in `types::` (§4.6 table).
fn element_type_hint_for(code: &str, param_type: SearchParameterType) -> Option<ElementTypeHint> {
    match (code, param_type) {
        ("name" | "given" | "family", SearchParameterType::String) => Some(ElementTypeHint::HumanName),
        ("identifier", SearchParameterType::Token) => Some(ElementTypeHint::Identifier),
        ("gender" | "status", SearchParameterType::Token) => Some(ElementTypeHint::SimpleCode),
        _ => None,
    }
}

/// Loads every `SearchParameter` entry out of a document that is either a
/// bare `SearchParameter` or a `Bundle` of them, registering each.
pub fn load_bundle(registry: &mut SearchParameterRegistry, doc: &Value) -> Result<usize, LoaderError> {
    let resource_type = doc.get("resourceType").and_then(Value::as_str).unwrap_or("");
    match resource_type {
        "SearchParameter" => {
            registry.register(parse_search_parameter(doc)?);
            Ok(1)
        }
        "Bundle" => {
            let entries = doc
                .get("entry")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let mut count = 0;
            for entry in &entries {
                if let Some(resource) = entry.get("resource") {
                    registry.register(parse_search_parameter(resource)?);
                    count += 1;
                }
            }
            Ok(count)
        }
        other => Err(LoaderError::UnexpectedResourceType(other.to_string())),
    }
}

/// Builds a registry from the universal base bundle plus one bundle per
/// resource type, as §4.2 describes. `base` and each entry of
/// `per_resource` are either a `SearchParameter` or a `Bundle` document.
pub fn build_registry<'a>(
    base: &Value,
    per_resource: impl IntoIterator<Item = &'a Value>,
) -> Result<SearchParameterRegistry, LoaderError> {
    let mut registry = SearchParameterRegistry::new();
    register_common_parameters(&mut registry);
    load_bundle(&mut registry, base)?;
    for doc in per_resource {
        load_bundle(&mut registry, doc)?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patient_name_param() -> Value {
        json!({
            "resourceType": "SearchParameter",
            "code": "name",
            "url": "http://hl7.org/fhir/SearchParameter/Patient-name",
            "type": "string",
            "base": ["Patient"],
            "expression": "Patient.name",
            "description": "A patient's name"
        })
    }

    #[test]
    fn parses_simple_search_parameter() {
        let param = parse_search_parameter(&patient_name_param()).unwrap();
        assert_eq!(param.code, "name");
        assert_eq!(param.base, vec!["Patient".to_string()]);
        assert_eq!(param.param_type, SearchParameterType::String);
        assert_eq!(param.element_type_hint, ElementTypeHint::HumanName);
    }

    #[test]
    fn rejects_non_search_parameter_resource() {
        let err = parse_search_parameter(&json!({"resourceType": "Patient"})).unwrap_err();
        assert!(matches!(err, LoaderError::UnexpectedResourceType(_)));
    }

    #[test]
    fn rejects_unknown_type() {
        let mut doc = patient_name_param();
        doc["type"] = json!("frobnicate");
        assert!(matches!(
            parse_search_parameter(&doc),
            Err(LoaderError::UnknownType(_))
        ));
    }

    #[test]
    fn loads_bundle_of_search_parameters() {
        let bundle = json!({
            "resourceType": "Bundle",
            "entry": [
                {"resource": patient_name_param()},
                {"resource": {
                    "resourceType": "SearchParameter",
                    "code": "gender",
                    "url": "http://hl7.org/fhir/SearchParameter/individual-gender",
                    "type": "token",
                    "base": ["Patient"],
                    "expression": "Patient.gender"
                }},
            ]
        });
        let mut registry = SearchParameterRegistry::new();
        let count = load_bundle(&mut registry, &bundle).unwrap();
        assert_eq!(count, 2);
        assert!(registry.get("Patient", "name").is_some());
        assert!(registry.get("Patient", "gender").is_some());
    }

    #[test]
    fn build_registry_merges_base_and_per_resource_plus_common() {
        let base = json!({"resourceType": "Bundle", "entry": []});
        let patient_bundle = json!({
            "resourceType": "Bundle",
            "entry": [{"resource": patient_name_param()}]
        });
        let registry = build_registry(&base, [&patient_bundle]).unwrap();
        assert!(registry.get("Patient", "name").is_some());
        assert!(registry.get("Patient", "_id").is_some());
    }
}
