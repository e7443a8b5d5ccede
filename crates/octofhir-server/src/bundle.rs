//! Bundle Processor (C10, §4.9): executes batch/transaction bundles.
//!
//! Batch entries execute independently and the bundle as a whole is always
//! 200; transaction entries execute as one atomic unit, failing and rolling
//! back together. Both resolve `urn:uuid:` placeholders against ids assigned
//! by earlier entries in the same bundle as they execute.

use async_trait::async_trait;
use octofhir_core::CoreError;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleType {
    Batch,
    Transaction,
}

impl BundleType {
    pub fn parse(type_field: &str) -> Result<Self, CoreError> {
        match type_field {
            "batch" => Ok(Self::Batch),
            "transaction" => Ok(Self::Transaction),
            other => Err(CoreError::invalid_resource(format!("unsupported bundle type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    fn parse(s: &str) -> Result<Self, CoreError> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "PATCH" => Ok(Self::Patch),
            other => Err(CoreError::invalid_resource(format!("unsupported bundle entry method '{other}'"))),
        }
    }
}

/// One `Bundle.entry` parsed out of the incoming document (§4.9).
#[derive(Debug, Clone)]
pub struct BundleEntry {
    pub full_url: Option<String>,
    pub method: HttpMethod,
    pub url: String,
    pub resource: Option<Value>,
}

/// Parses `Bundle.entry[]` into [`BundleEntry`]s.
///
/// # Errors
///
/// Returns [`CoreError::InvalidResource`] if an entry is missing
/// `request.method`/`request.url`, or names an unsupported method.
pub fn parse_entries(bundle: &Value) -> Result<Vec<BundleEntry>, CoreError> {
    let entries = bundle
        .get("entry")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    entries
        .into_iter()
        .map(|entry| {
            let request = entry
                .get("request")
                .ok_or_else(|| CoreError::invalid_resource("bundle entry missing 'request'"))?;
            let method = request
                .get("method")
                .and_then(Value::as_str)
                .ok_or_else(|| CoreError::invalid_resource("bundle entry request missing 'method'"))?;
            let url = request
                .get("url")
                .and_then(Value::as_str)
                .ok_or_else(|| CoreError::invalid_resource("bundle entry request missing 'url'"))?
                .to_string();
            let full_url = entry.get("fullUrl").and_then(Value::as_str).map(String::from);
            let resource = entry.get("resource").cloned();
            Ok(BundleEntry { full_url, method: HttpMethod::parse(method)?, url, resource })
        })
        .collect()
}

/// What one entry's execution produced, for assembling `Bundle.entry[].response`.
#[derive(Debug, Clone)]
pub struct EntryOutcome {
    pub status: u16,
    pub body: Option<Value>,
    pub location: Option<String>,
    pub etag: Option<String>,
}

impl EntryOutcome {
    #[must_use]
    pub fn success(status: u16, body: Value) -> Self {
        Self { status, body: Some(body), location: None, etag: None }
    }
}

/// Executes one already-placeholder-resolved entry. Implementations wrap
/// either a non-transactional path (each call goes through the full plugin
/// pipeline, for batch) or a single backend transaction (for transaction
/// bundles, where every call shares one `Transaction` handle).
#[async_trait]
pub trait EntryExecutor: Send {
    async fn execute(&mut self, method: HttpMethod, url: &str, resource: Option<Value>) -> Result<EntryOutcome, CoreError>;
}

/// Replaces every string value in `value` that exactly equals `from` with
/// `to`, recursing into arrays/objects. References are plain strings inside
/// `content` (§9 "Cyclic references... stored as string references"), so a
/// targeted string substitution is enough — no object-graph rewrite needed.
fn substitute_references(value: &mut Value, from: &str, to: &str) {
    match value {
        Value::String(s) if s == from => *s = to.to_string(),
        Value::Array(items) => items.iter_mut().for_each(|v| substitute_references(v, from, to)),
        Value::Object(map) => map.values_mut().for_each(|v| substitute_references(v, from, to)),
        _ => {}
    }
}

fn apply_known_placeholders(resource: &mut Value, placeholders: &HashMap<String, String>) {
    for (urn, resolved) in placeholders {
        substitute_references(resource, urn, resolved);
    }
}

/// Runs `entries` as a batch bundle: every entry executes independently, its
/// outcome captured regardless of success or failure; no entry's failure
/// affects another's (§4.9).
pub async fn process_batch(entries: Vec<BundleEntry>, executor: &mut dyn EntryExecutor) -> Vec<EntryOutcome> {
    let mut placeholders = HashMap::new();
    let mut outcomes = Vec::with_capacity(entries.len());

    for entry in entries {
        let mut resource = entry.resource;
        if let Some(r) = resource.as_mut() {
            apply_known_placeholders(r, &placeholders);
        }

        match executor.execute(entry.method, &entry.url, resource).await {
            Ok(outcome) => {
                if let (Some(full_url), Some(location)) = (&entry.full_url, &outcome.location)
                    && full_url.starts_with("urn:uuid:")
                {
                    placeholders.insert(full_url.clone(), location.clone());
                }
                outcomes.push(outcome);
            }
            Err(err) => outcomes.push(EntryOutcome {
                status: crate::error_response::status_for_error(&err),
                body: Some(crate::error_response::operation_outcome_for_error(&err)),
                location: None,
                etag: None,
            }),
        }
    }

    outcomes
}

/// Runs `entries` as a transaction bundle: the first failure aborts the
/// remaining entries and the whole unit rolls back; the caller is expected
/// to wrap `executor` around a single backend transaction and to roll it
/// back when this function returns `Err` (§4.9, §5).
///
/// # Errors
///
/// Returns the first entry's error, with its index, on any failure.
pub async fn process_transaction(
    entries: Vec<BundleEntry>,
    executor: &mut dyn EntryExecutor,
) -> Result<Vec<EntryOutcome>, (usize, CoreError)> {
    let mut placeholders = HashMap::new();
    let mut outcomes = Vec::with_capacity(entries.len());

    for (index, entry) in entries.into_iter().enumerate() {
        let mut resource = entry.resource;
        if let Some(r) = resource.as_mut() {
            apply_known_placeholders(r, &placeholders);
        }

        let outcome = executor
            .execute(entry.method, &entry.url, resource)
            .await
            .map_err(|err| (index, err))?;

        if let (Some(full_url), Some(location)) = (&entry.full_url, &outcome.location)
            && full_url.starts_with("urn:uuid:")
        {
            placeholders.insert(full_url.clone(), location.clone());
        }
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct RecordingExecutor {
        calls: Vec<(HttpMethod, String)>,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl EntryExecutor for RecordingExecutor {
        async fn execute(&mut self, method: HttpMethod, url: &str, resource: Option<Value>) -> Result<EntryOutcome, CoreError> {
            let index = self.calls.len();
            self.calls.push((method, url.to_string()));
            if self.fail_on == Some(index) {
                return Err(CoreError::invalid_resource("boom"));
            }
            let mut outcome = EntryOutcome::success(201, resource.unwrap_or(json!({})));
            if method == HttpMethod::Post {
                outcome.location = Some(format!("{url}/generated-{index}"));
            }
            Ok(outcome)
        }
    }

    fn entry(method: &str, url: &str, full_url: Option<&str>, resource: Option<Value>) -> BundleEntry {
        BundleEntry {
            full_url: full_url.map(String::from),
            method: HttpMethod::parse(method).unwrap(),
            url: url.to_string(),
            resource,
        }
    }

    #[test]
    fn parses_entries_from_bundle_json() {
        let bundle = json!({
            "resourceType": "Bundle",
            "type": "batch",
            "entry": [
                {"request": {"method": "POST", "url": "Patient"}, "resource": {"resourceType": "Patient"}}
            ]
        });
        let entries = parse_entries(&bundle).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].method, HttpMethod::Post);
    }

    #[tokio::test]
    async fn batch_failure_does_not_affect_sibling_entries() {
        let entries = vec![
            entry("POST", "Patient", None, Some(json!({}))),
            entry("POST", "Observation", None, Some(json!({}))),
        ];
        let mut executor = RecordingExecutor { calls: vec![], fail_on: Some(0) };
        let outcomes = process_batch(entries, &mut executor).await;
        assert_eq!(outcomes[0].status, 400);
        assert_eq!(outcomes[1].status, 201);
    }

    #[tokio::test]
    async fn transaction_failure_reports_first_failing_index() {
        let entries = vec![
            entry("POST", "Patient", None, Some(json!({}))),
            entry("POST", "Observation", None, Some(json!({}))),
        ];
        let mut executor = RecordingExecutor { calls: vec![], fail_on: Some(1) };
        let err = process_transaction(entries, &mut executor).await.unwrap_err();
        assert_eq!(err.0, 1);
    }

    #[tokio::test]
    async fn urn_uuid_placeholder_resolves_to_prior_entrys_location() {
        let entries = vec![
            entry("POST", "Patient", Some("urn:uuid:abc"), Some(json!({"resourceType": "Patient"}))),
            entry(
                "POST",
                "Observation",
                None,
                Some(json!({"resourceType": "Observation", "subject": {"reference": "urn:uuid:abc"}})),
            ),
        ];
        let mut executor = RecordingExecutor { calls: vec![], fail_on: None };
        let outcomes = process_batch(entries, &mut executor).await;
        let resolved = outcomes[1].body.as_ref().unwrap();
        assert_eq!(resolved["subject"]["reference"], "Patient/generated-0");
    }
}
