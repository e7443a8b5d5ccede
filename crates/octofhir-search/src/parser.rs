//! Query-string parsing for FHIR search requests (C7, §4.6).
//!
//! Parses the raw `application/x-www-form-urlencoded` query string into
//! [`ParsedParameters`], independent of any particular storage backend.
//! Control parameters (`_count`, `_offset`, `_sort`, …) are recognized here;
//! per-type predicate building happens in [`crate::types::dispatch_search`]
//! against a resolved [`crate::registry::SearchParameterRegistry`] entry.

use crate::parameters::{SearchModifier, SearchPrefix};
use crate::registry::SearchParameterRegistry;
use octofhir_config::resource_registry::ResourceRegistry;
use std::borrow::Cow;
use thiserror::Error;
use url::form_urlencoded;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedValue {
    pub prefix: Option<SearchPrefix>,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedParam {
    pub name: String,
    pub modifier: Option<SearchModifier>,
    pub values: Vec<ParsedValue>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedParameters {
    pub params: Vec<ParsedParam>,
}

/// Pagination/result-shaping codes that never produce a predicate (§4.6 item 2).
const CONTROL_PARAMS: &[&str] = &[
    "_count",
    "_offset",
    "_sort",
    "_include",
    "_revinclude",
    "_summary",
    "_elements",
    "_total",
    "_contained",
    "_containedType",
    "_format",
];

pub struct SearchParameterParser;

impl SearchParameterParser {
    /// Parse an `application/x-www-form-urlencoded` query string into [`ParsedParameters`].
    ///
    /// Example: `"name:exact=John&_lastUpdated=ge2020-01-01"`.
    pub fn parse_query(query: &str) -> ParsedParameters {
        let mut result = ParsedParameters::default();
        for (k, v) in form_urlencoded::parse(query.as_bytes()) {
            let (name, modifier) = Self::split_name_and_modifier(k);
            let mut values = Vec::new();
            // Comma-separated values are OR'd per FHIR search rules.
            for raw_val in v.split(',') {
                let raw_val = raw_val.trim();
                if raw_val.is_empty() {
                    continue;
                }
                let (prefix, remainder) = Self::extract_prefix(raw_val);
                values.push(ParsedValue {
                    prefix,
                    raw: remainder.to_string(),
                });
            }
            result.params.push(ParsedParam {
                name: name.into_owned(),
                modifier,
                values,
            });
        }
        result
    }

    fn split_name_and_modifier(key: Cow<'_, str>) -> (Cow<'_, str>, Option<SearchModifier>) {
        if let Some((name, modifier)) = key.split_once(':') {
            let modifier = match modifier {
                "exact" => Some(SearchModifier::Exact),
                "contains" => Some(SearchModifier::Contains),
                "text" => Some(SearchModifier::Text),
                "in" => Some(SearchModifier::In),
                "not-in" => Some(SearchModifier::NotIn),
                "below" => Some(SearchModifier::Below),
                "above" => Some(SearchModifier::Above),
                "not" => Some(SearchModifier::Not),
                "identifier" => Some(SearchModifier::Identifier),
                "missing" => Some(SearchModifier::Missing),
                "of-type" => Some(SearchModifier::OfType),
                other if !other.is_empty() => Some(SearchModifier::Type(other.to_string())),
                _ => None,
            };
            (Cow::Owned(name.to_string()), modifier)
        } else {
            (key, None)
        }
    }

    fn extract_prefix(value: &str) -> (Option<SearchPrefix>, &str) {
        // The longest valid prefixes are two chars; try two, then one.
        if value.len() >= 2 {
            let p2 = &value[..2];
            if let Some(prefix) = SearchPrefix::parse(p2) {
                return (Some(prefix), &value[2..]);
            }
        }
        if !value.is_empty() {
            let p1 = &value[..1];
            if let Some(prefix) = SearchPrefix::parse(p1) {
                return (Some(prefix), &value[1..]);
            }
        }
        (None, value)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchValidationError {
    #[error("Unknown search parameter: {0}")]
    UnknownParameter(String),
    #[error("Search parameter not allowed for this resource type: {0}")]
    DisallowedParameter(String),
    #[error("Invalid value for {param}: {message}")]
    InvalidValue { param: String, message: String },
}

impl ParsedParameters {
    /// Rebuilds the canonical key used by a parsed parameter, folding the
    /// modifier back into the code (e.g. `name` + `:exact` → `"name:exact"`).
    fn canonical_key(p: &ParsedParam) -> String {
        match &p.modifier {
            None => p.name.clone(),
            Some(SearchModifier::Exact) => format!("{}:exact", p.name),
            Some(SearchModifier::Contains) => format!("{}:contains", p.name),
            Some(SearchModifier::Text) => format!("{}:text", p.name),
            Some(SearchModifier::In) => format!("{}:in", p.name),
            Some(SearchModifier::NotIn) => format!("{}:not-in", p.name),
            Some(SearchModifier::Below) => format!("{}:below", p.name),
            Some(SearchModifier::Above) => format!("{}:above", p.name),
            Some(SearchModifier::Not) => format!("{}:not", p.name),
            Some(SearchModifier::Identifier) => format!("{}:identifier", p.name),
            Some(SearchModifier::Missing) => format!("{}:missing", p.name),
            Some(SearchModifier::OfType) => format!("{}:of-type", p.name),
            Some(SearchModifier::Type(t)) => format!("{}:{}", p.name, t),
        }
    }

    /// Reassembles a value's prefix (if any) and raw text, as originally supplied.
    fn value_with_prefix(v: &ParsedValue) -> String {
        match &v.prefix {
            Some(prefix) => format!("{prefix}{}", v.raw),
            None => v.raw.clone(),
        }
    }

    /// Validates parameters against the registry (control codes always allowed;
    /// every other code must resolve through C2 — unknown codes are rejected,
    /// never silently ignored, §4.2/§7) and converts the survivors into the
    /// generic key/value bag the storage engine's `search` expects (§4.6).
    ///
    /// `resource_registry` supplies the per-type allow-list from C1 (§4.2):
    /// a code that C2 recognizes but this resource type's config excludes is
    /// rejected the same way an unknown code is.
    pub fn validate_and_convert(
        &self,
        resource_type: &str,
        registry: &SearchParameterRegistry,
        resource_registry: &ResourceRegistry,
        default_count: usize,
        max_count: usize,
    ) -> Result<octofhir_storage::SearchParams, SearchValidationError> {
        use octofhir_storage::SearchParams;

        let mut params = SearchParams::new();

        for p in &self.params {
            if CONTROL_PARAMS.contains(&p.name.as_str()) {
                continue;
            }
            if registry.get(resource_type, &p.name).is_none() {
                return Err(SearchValidationError::UnknownParameter(p.name.clone()));
            }
            if !resource_registry.allows_search_param(resource_type, &p.name) {
                return Err(SearchValidationError::DisallowedParameter(p.name.clone()));
            }
            let key = Self::canonical_key(p);
            for v in &p.values {
                params = params.with_param(key.clone(), Self::value_with_prefix(v));
            }
        }

        let count = self.parse_count(default_count, max_count);
        params = params.with_count(count as u32);
        let offset = self.parse_offset(0);
        if offset > 0 {
            params = params.with_offset(offset as u32);
        }

        if let Some(p) = self.params.iter().find(|p| p.name == "_sort") {
            for v in &p.values {
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
                if registry.get(resource_type, field).is_some()
                    || field == "_id"
                    || field == "_lastUpdated"
                {
                    params = params.with_sort(field, descending);
                } else {
                    return Err(SearchValidationError::InvalidValue {
                        param: "_sort".to_string(),
                        message: format!("unsupported sort field '{field}'"),
                    });
                }
            }
        }

        Ok(params)
    }

    /// Parse the optional `_count` parameter with defaults and clamping.
    ///
    /// `_count=0` is a valid, explicit request for zero rows (§8 "Search with
    /// `_count=0` returns an empty result set with `total` populated") — it is
    /// honored as-is, not folded back to `default_`. Only a missing or
    /// unparseable value falls back to `default_`.
    pub fn parse_count(&self, default_: usize, max: usize) -> usize {
        if let Some(p) = self.params.iter().find(|p| p.name == "_count")
            && let Some(v) = p.values.first()
            && let Ok(n) = v.raw.parse::<usize>()
        {
            return n.min(max);
        }
        default_
    }

    /// Parse the optional `_offset` parameter; returns `default_` if missing/invalid.
    pub fn parse_offset(&self, default_: usize) -> usize {
        if let Some(p) = self.params.iter().find(|p| p.name == "_offset")
            && let Some(v) = p.values.first()
            && let Ok(n) = v.raw.parse::<usize>()
        {
            return n;
        }
        default_
    }
}


#[cfg(test)]
mod tests_parsing {
    use super::*;
    use crate::parameters::SearchModifier;

    #[test]
    fn parses_contains_modifier_for_name() {
        let parsed = SearchParameterParser::parse_query("name:contains=Jo");
        assert_eq!(parsed.params.len(), 1);
        let p = &parsed.params[0];
        assert_eq!(p.name, "name");
        assert_eq!(p.modifier, Some(SearchModifier::Contains));
        assert_eq!(p.values.len(), 1);
        assert_eq!(p.values[0].raw, "Jo");
    }

    #[test]
    fn parses_missing_modifier_boolean_value_as_raw() {
        let parsed = SearchParameterParser::parse_query("_id:missing=true");
        assert_eq!(parsed.params.len(), 1);
        let p = &parsed.params[0];
        assert_eq!(p.name, "_id");
        assert_eq!(p.modifier, Some(SearchModifier::Missing));
        assert_eq!(p.values.len(), 1);
        assert_eq!(p.values[0].raw, "true");
    }

    #[test]
    fn url_decoding_of_space_works() {
        let parsed = SearchParameterParser::parse_query("name=John%20Doe");
        assert_eq!(parsed.params.len(), 1);
        let p = &parsed.params[0];
        assert_eq!(p.name, "name");
        assert_eq!(p.values.len(), 1);
        assert_eq!(p.values[0].raw, "John Doe");
    }

    #[test]
    fn empty_value_produces_param_with_no_values() {
        let parsed = SearchParameterParser::parse_query("name=");
        assert_eq!(parsed.params.len(), 1);
        let p = &parsed.params[0];
        assert_eq!(p.name, "name");
        assert!(p.values.is_empty());
    }

    #[test]
    fn parses_multiple_params() {
        let parsed = SearchParameterParser::parse_query("_id=abc&_lastUpdated=ge2020-01-01");
        assert_eq!(parsed.params.len(), 2);
        assert!(parsed.params.iter().any(|p| p.name == "_id"));
        assert!(parsed.params.iter().any(|p| p.name == "_lastUpdated"));
    }

    #[test]
    fn type_modifier_is_parsed_into_type_variant() {
        let parsed = SearchParameterParser::parse_query("subject:Patient=123");
        assert_eq!(parsed.params.len(), 1);
        let p = &parsed.params[0];
        assert_eq!(p.name, "subject");
        match &p.modifier {
            Some(SearchModifier::Type(t)) => assert_eq!(t, "Patient"),
            other => panic!("expected Type modifier, got {other:?}"),
        }
        assert_eq!(p.values.len(), 1);
        assert_eq!(p.values[0].raw, "123");
    }

    #[test]
    fn of_type_modifier_is_parsed() {
        let parsed = SearchParameterParser::parse_query("identifier:of-type=MR|http://example.org|123");
        let p = &parsed.params[0];
        assert_eq!(p.modifier, Some(SearchModifier::OfType));
    }

    #[test]
    fn multiple_count_params_use_first_occurrence() {
        let parsed = SearchParameterParser::parse_query("_count=5&_count=20");
        let effective = parsed.parse_count(10, 100);
        assert_eq!(effective, 5);
    }

    #[test]
    fn plus_is_decoded_to_space() {
        let parsed = SearchParameterParser::parse_query("name=John+Doe");
        assert_eq!(parsed.params.len(), 1);
        let p = &parsed.params[0];
        assert_eq!(p.values[0].raw, "John Doe");
    }

    #[test]
    fn parses_number_like_value_with_ge_prefix() {
        let parsed = SearchParameterParser::parse_query("value=ge5.5");
        assert_eq!(parsed.params.len(), 1);
        let p = &parsed.params[0];
        assert_eq!(p.name, "value");
        assert_eq!(p.values.len(), 1);
        assert_eq!(p.values[0].prefix, Some(SearchPrefix::Ge));
        assert_eq!(p.values[0].raw, "5.5");
    }

    #[test]
    fn unknown_prefix_is_not_parsed_and_kept_in_raw() {
        let parsed = SearchParameterParser::parse_query("foo=xx2020");
        assert_eq!(parsed.params.len(), 1);
        let p = &parsed.params[0];
        assert_eq!(p.name, "foo");
        assert_eq!(p.values.len(), 1);
        assert_eq!(p.values[0].prefix, None);
        assert_eq!(p.values[0].raw, "xx2020");
    }

    #[test]
    fn uri_style_value_is_url_decoded() {
        let parsed = SearchParameterParser::parse_query("uri=https%3A%2F%2Fexample.org%2Fabc");
        assert_eq!(parsed.params.len(), 1);
        let p = &parsed.params[0];
        assert_eq!(p.name, "uri");
        assert_eq!(p.values.len(), 1);
        assert_eq!(p.values[0].raw, "https://example.org/abc");
    }
}
