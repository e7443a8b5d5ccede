//! The search translator (C7, §4.6): turns `(resource_type, version, query
//! string)` into a parameterized SQL predicate against the `content` JSONB
//! column, ready for a Postgres backend to embed in its `SELECT`.
//!
//! This is the component the spec's failure-mode table talks about directly:
//! unknown codes and unparseable values are rejected here, never silently
//! dropped (§4.6, §7).

use std::sync::Arc;

use octofhir_config::resource_registry::ResourceRegistry;
use octofhir_core::CoreError;

use crate::parameters::SearchParameter;
use crate::parser::{ParsedParam, SearchParameterParser};
use crate::registry::SearchParameterRegistry;
use crate::sql_builder::SqlBuilder;
use crate::types::dispatch_search;

/// Special codes with dedicated predicate paths, never resolved through the
/// registry (§4.6 item 2).
const ID_CODE: &str = "_id";
const LAST_UPDATED_CODE: &str = "_lastUpdated";

/// Pagination/result-shaping codes that never produce a predicate (§4.6 item 2).
const CONTROL_CODES: &[&str] = &[
    "_count",
    "_offset",
    "_sort",
    "_include",
    "_revinclude",
    "_summary",
    "_elements",
    "_contained",
    "_containedType",
    "_total",
    "_format",
];

/// The outcome of translating a query string: a ready-to-embed WHERE clause
/// fragment (ANDed with the caller's own `tenant_id`/`resource_type`/
/// `is_current`/`is_deleted` predicates) plus resolved pagination.
#[derive(Debug, Default)]
pub struct TranslatedSearch {
    pub sql_builder: SqlBuilder,
    pub count: usize,
    pub offset: usize,
    /// `(field, descending)` pairs; empty means the default order
    /// (`last_updated` descending, tie-broken by `resource_id`, §4.6).
    pub sort: Vec<(String, bool)>,
}

impl TranslatedSearch {
    /// The WHERE-clause fragment for the search-parameter predicates only
    /// (the caller ANDs this with its own tenant/current/deleted predicates).
    #[must_use]
    pub fn predicate(&self) -> Option<String> {
        self.sql_builder.build_where_clause()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    SqlBuilder(#[from] crate::sql_builder::SqlBuilderError),
}

/// Translates a raw query string into a [`TranslatedSearch`] against
/// `resource_type`, using `registry` to resolve each code and
/// `resource_registry` to enforce that type's search-parameter allow-list,
/// if any (§4.2, §4.6).
pub fn translate(
    resource_type: &str,
    registry: &SearchParameterRegistry,
    resource_registry: &ResourceRegistry,
    query: &str,
    default_count: usize,
    max_count: usize,
) -> Result<TranslatedSearch, TranslateError> {
    let parsed = SearchParameterParser::parse_query(query);
    let mut builder = SqlBuilder::new();

    for param in &parsed.params {
        if CONTROL_CODES.contains(&param.name.as_str()) {
            continue;
        }
        if param.name == ID_CODE {
            add_id_predicate(&mut builder, param);
            continue;
        }
        if param.name == LAST_UPDATED_CODE {
            add_last_updated_predicate(&mut builder, param)?;
            continue;
        }

        let definition: Arc<SearchParameter> =
            registry.get(resource_type, &param.name).ok_or_else(|| {
                CoreError::invalid_search_parameter(
                    resource_type,
                    param.name.clone(),
                    format!("unknown search parameter '{}'", param.name),
                )
            })?;

        if !resource_registry.allows_search_param(resource_type, &param.name) {
            return Err(CoreError::invalid_search_parameter(
                resource_type,
                param.name.clone(),
                "search parameter not allowed for this resource type",
            )
            .into());
        }

        dispatch_search(&mut builder, param, &definition, resource_type)?;
    }

    let count = parsed.parse_count(default_count, max_count);
    let offset = parsed.parse_offset(0);
    let sort = resolve_sort(&parsed, registry, resource_type)?;

    Ok(TranslatedSearch {
        sql_builder: builder,
        count,
        offset,
        sort,
    })
}

fn add_id_predicate(builder: &mut SqlBuilder, param: &ParsedParam) {
    let values: Vec<String> = param.values.iter().map(|v| v.raw.clone()).collect();
    if values.is_empty() {
        return;
    }
    let conditions: Vec<String> = values
        .into_iter()
        .map(|v| {
            let p = builder.add_text_param(v);
            format!("resource_id = ${p}")
        })
        .collect();
    builder.add_condition(SqlBuilder::build_or_clause(&conditions));
}

fn add_last_updated_predicate(
    builder: &mut SqlBuilder,
    param: &ParsedParam,
) -> Result<(), TranslateError> {
    use crate::parameters::SearchPrefix;

    let mut conditions = Vec::new();
    for v in &param.values {
        let op = match v.prefix.unwrap_or(SearchPrefix::Eq) {
            SearchPrefix::Eq | SearchPrefix::Ap => "=",
            SearchPrefix::Ne => "!=",
            SearchPrefix::Gt | SearchPrefix::Sa => ">",
            SearchPrefix::Lt | SearchPrefix::Eb => "<",
            SearchPrefix::Ge => ">=",
            SearchPrefix::Le => "<=",
        };
        let p = builder.add_timestamp_param(v.raw.clone());
        conditions.push(format!("last_updated {op} ${p}"));
    }
    if !conditions.is_empty() {
        builder.add_condition(SqlBuilder::build_or_clause(&conditions));
    }
    Ok(())
}

fn resolve_sort(
    parsed: &crate::parser::ParsedParameters,
    registry: &SearchParameterRegistry,
    resource_type: &str,
) -> Result<Vec<(String, bool)>, TranslateError> {
    let Some(sort_param) = parsed.params.iter().find(|p| p.name == "_sort") else {
        return Ok(Vec::new());
    };
    let mut sort = Vec::new();
    for v in &sort_param.values {
        let mut field = v.raw.as_str();
        let descending = if let Some(stripped) = field.strip_prefix('-') {
            field = stripped;
            true
        } else {
            false
        };
        if field.is_empty() {
            continue;
        }
        if field != ID_CODE && field != LAST_UPDATED_CODE && registry.get(resource_type, field).is_none() {
            return Err(CoreError::invalid_search_value(
                "_sort",
                format!("unsupported sort field '{field}'"),
            )
            .into());
        }
        sort.push((field.to_string(), descending));
    }
    Ok(sort)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::SearchParameterType;
    use octofhir_config::resource_registry::{ResourceConfigDoc, ResourceRegistry, VersionEntry};

    fn patient_registry() -> SearchParameterRegistry {
        let mut registry = SearchParameterRegistry::new();
        crate::common::register_common_parameters(&mut registry);
        registry.register(
            SearchParameter::new(
                "birthdate",
                "http://hl7.org/fhir/SearchParameter/individual-birthdate",
                SearchParameterType::Date,
                vec!["Patient".to_string()],
            )
            .with_expression("Patient.birthDate"),
        );
        registry
    }

    fn permissive_resource_registry() -> ResourceRegistry {
        ResourceRegistry::from_docs(vec![ResourceConfigDoc {
            resource_type: "Patient".to_string(),
            enabled: None,
            versions: vec![VersionEntry { version: "R4B".to_string(), default: true }],
            interactions: vec!["search".to_string()],
            search_params: None,
            schema: None,
            profiles: vec![],
        }])
        .unwrap()
    }

    #[test]
    fn unknown_code_is_rejected_not_ignored() {
        let err = translate("Patient", &patient_registry(), &permissive_resource_registry(), "bogus=1", 20, 1000)
            .unwrap_err();
        assert!(matches!(err, TranslateError::Core(CoreError::InvalidSearchParameter { .. })));
    }

    #[test]
    fn id_code_produces_equality_predicate() {
        let result = translate("Patient", &patient_registry(), &permissive_resource_registry(), "_id=abc", 20, 1000).unwrap();
        assert_eq!(result.predicate().unwrap(), "resource_id = $1");
    }

    #[test]
    fn date_prefix_is_translated_through_dispatch() {
        let result = translate(
            "Patient",
            &patient_registry(),
            &permissive_resource_registry(),
            "birthdate=gt1985-01-01",
            20,
            1000,
        )
        .unwrap();
        assert!(result.predicate().is_some());
    }

    #[test]
    fn count_defaults_and_clamps() {
        let result = translate("Patient", &patient_registry(), &permissive_resource_registry(), "", 20, 1000).unwrap();
        assert_eq!(result.count, 20);
        let result = translate("Patient", &patient_registry(), &permissive_resource_registry(), "_count=5000", 20, 1000).unwrap();
        assert_eq!(result.count, 1000);
    }

    #[test]
    fn zero_count_is_honored_explicitly() {
        let result = translate("Patient", &patient_registry(), &permissive_resource_registry(), "_count=0", 20, 1000).unwrap();
        assert_eq!(result.count, 0);
    }

    #[test]
    fn unsupported_sort_field_is_rejected() {
        let err = translate("Patient", &patient_registry(), &permissive_resource_registry(), "_sort=bogus", 20, 1000)
            .unwrap_err();
        assert!(matches!(err, TranslateError::Core(CoreError::InvalidSearchValue { .. })));
    }

    #[test]
    fn sort_by_last_updated_descending() {
        let result = translate(
            "Patient",
            &patient_registry(),
            &permissive_resource_registry(),
            "_sort=-_lastUpdated",
            20,
            1000,
        )
        .unwrap();
        assert_eq!(result.sort, vec![("_lastUpdated".to_string(), true)]);
    }

    #[test]
    fn disallowed_search_param_is_rejected() {
        let resource_registry = ResourceRegistry::from_docs(vec![ResourceConfigDoc {
            resource_type: "Patient".to_string(),
            enabled: None,
            versions: vec![VersionEntry { version: "R4B".to_string(), default: true }],
            interactions: vec!["search".to_string()],
            search_params: Some(vec!["_id".to_string()]),
            schema: None,
            profiles: vec![],
        }])
        .unwrap();
        let err = translate("Patient", &patient_registry(), &resource_registry, "birthdate=gt1985-01-01", 20, 1000)
            .unwrap_err();
        assert!(matches!(err, TranslateError::Core(CoreError::InvalidSearchParameter { .. })));
    }
}
