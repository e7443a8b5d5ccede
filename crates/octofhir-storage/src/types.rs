//! Storage types for the FHIR storage abstraction layer.

use octofhir_core::ResourceRow;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

/// Result of a search operation (§4.6).
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub entries: Vec<ResourceRow>,
    pub total: Option<u32>,
    pub has_more: bool,
}

impl SearchResult {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_entries(entries: Vec<ResourceRow>) -> Self {
        Self {
            entries,
            total: None,
            has_more: false,
        }
    }

    #[must_use]
    pub fn with_total(mut self, total: u32) -> Self {
        self.total = Some(total);
        self
    }

    #[must_use]
    pub fn with_has_more(mut self, has_more: bool) -> Self {
        self.has_more = has_more;
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A single entry in a resource's history (§4.6 `history`).
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub row: ResourceRow,
    pub method: HistoryMethod,
}

impl HistoryEntry {
    #[must_use]
    pub fn new(row: ResourceRow, method: HistoryMethod) -> Self {
        Self { row, method }
    }
}

/// The interaction that produced a history entry's version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryMethod {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for HistoryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "POST"),
            Self::Update => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

impl HistoryMethod {
    #[must_use]
    pub fn for_row(row: &ResourceRow) -> Self {
        if row.is_deleted {
            Self::Delete
        } else if row.version_id == 1 {
            Self::Create
        } else {
            Self::Update
        }
    }
}

/// Result of a history operation.
#[derive(Debug, Clone, Default)]
pub struct HistoryResult {
    pub entries: Vec<HistoryEntry>,
    pub total: Option<u32>,
}

impl HistoryResult {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_entries(entries: Vec<HistoryEntry>) -> Self {
        Self {
            entries,
            total: None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parameters for a history query (§4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(with = "time::serde::rfc3339::option")]
    pub since: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(with = "time::serde::rfc3339::option")]
    pub at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

impl HistoryParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn since(mut self, since: OffsetDateTime) -> Self {
        self.since = Some(since);
        self
    }

    #[must_use]
    pub fn at(mut self, at: OffsetDateTime) -> Self {
        self.at = Some(at);
        self
    }

    #[must_use]
    pub fn count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Parameters for a search query, already parsed and validated by
/// `octofhir-search` (§4.6, §4.7). The storage backend only needs the
/// resolved SQL-ready shape; it never re-parses query strings.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    /// Search parameters as key-value pairs; multiple values are OR'd.
    pub parameters: HashMap<String, Vec<String>>,
    pub count: Option<u32>,
    pub offset: Option<u32>,
    pub sort: Option<Vec<SortParam>>,
    pub total: Option<TotalMode>,
}

impl SearchParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.entry(key.into()).or_default().push(value.into());
        self
    }

    #[must_use]
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn with_sort(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.sort.get_or_insert_with(Vec::new).push(SortParam::new(field, descending));
        self
    }

    #[must_use]
    pub fn with_total(mut self, mode: TotalMode) -> Self {
        self.total = Some(mode);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

/// A sort parameter for search results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortParam {
    pub field: String,
    pub descending: bool,
}

impl SortParam {
    #[must_use]
    pub fn new(field: impl Into<String>, descending: bool) -> Self {
        Self {
            field: field.into(),
            descending,
        }
    }

    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, false)
    }

    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, true)
    }
}

/// How to calculate the total count in search results (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TotalMode {
    Accurate,
    Estimate,
    #[default]
    None,
}

impl std::fmt::Display for TotalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accurate => write!(f, "accurate"),
            Self::Estimate => write!(f, "estimate"),
            Self::None => write!(f, "none"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octofhir_core::FhirVersion;

    fn sample_row() -> ResourceRow {
        ResourceRow::new(1, "Patient", "123", FhirVersion::R4B, 1, serde_json::json!({}))
    }

    #[test]
    fn test_search_params_builder() {
        let params = SearchParams::new()
            .with_param("name", "John")
            .with_param("name", "Jane")
            .with_count(10)
            .with_offset(20)
            .with_sort("name", false)
            .with_total(TotalMode::Accurate);

        assert_eq!(params.parameters.get("name").unwrap().len(), 2);
        assert_eq!(params.count, Some(10));
        assert_eq!(params.total, Some(TotalMode::Accurate));
    }

    #[test]
    fn test_search_result() {
        let result = SearchResult::empty().with_total(100).with_has_more(true);
        assert!(result.is_empty());
        assert_eq!(result.total, Some(100));
        assert!(result.has_more);
    }

    #[test]
    fn test_history_method_for_row() {
        assert_eq!(HistoryMethod::for_row(&sample_row()), HistoryMethod::Create);
        assert_eq!(
            HistoryMethod::for_row(&sample_row().with_is_deleted(true)),
            HistoryMethod::Delete
        );
    }

    #[test]
    fn test_total_mode_display() {
        assert_eq!(TotalMode::Accurate.to_string(), "accurate");
    }
}
