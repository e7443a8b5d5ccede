//! HTTP handlers (§6): the thinnest possible layer between axum's routing
//! and the core pipeline. Every handler resolves a [`FhirVersion`] and the
//! request's [`TenantContext`], then calls one of the `perform_*` functions
//! so that direct HTTP calls and bundle-processed entries (via
//! [`BundleExecutor`]) run through the exact same guard → plugin → storage
//! path.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;

use octofhir_core::{CoreError, FhirVersion, Interaction};
use octofhir_search::{SearchParameterParser, SearchValidationError};
use octofhir_storage::{HistoryParams, HistoryResult, SearchResult, Transaction};

use crate::bundle::{self, BundleType, EntryExecutor, EntryOutcome, HttpMethod};
use crate::error_response::{operation_outcome_for_error, status_for_error};
use crate::guard;
use crate::middleware::TenantContext;
use crate::operations::{OperationInvocation, OperationOutput, OperationScope};
use crate::plugin::{PluginContext, PluginOutcome};
use crate::server::{core_error_from_storage, AppState};

// ---------------------------------------------------------------------
// Shared response plumbing
// ---------------------------------------------------------------------

fn core_error_response(err: CoreError) -> Response {
    let status = StatusCode::from_u16(status_for_error(&err)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, axum::Json(operation_outcome_for_error(&err))).into_response()
}

fn parse_json_body(bytes: &[u8]) -> Result<Value, CoreError> {
    serde_json::from_slice(bytes).map_err(|e| CoreError::invalid_resource(format!("request body is not valid JSON: {e}")))
}

fn resolve_version(state: &AppState, raw: Option<&str>) -> Result<FhirVersion, CoreError> {
    match raw {
        Some(v) => FhirVersion::from_str(v).map_err(|_| CoreError::invalid_resource_type(format!("unknown FHIR version '{v}'"))),
        None => Ok(state.default_version),
    }
}

fn etag_value(value: &Value) -> Option<HeaderValue> {
    let version_id = value.get("meta")?.get("versionId")?.as_str()?;
    HeaderValue::from_str(&format!("W/\"{version_id}\"")).ok()
}

fn last_modified_value(value: &Value) -> Option<HeaderValue> {
    let last_updated = value.get("meta")?.get("lastUpdated")?.as_str()?;
    HeaderValue::from_str(last_updated).ok()
}

fn read_headers(value: &Value) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(etag) = etag_value(value) {
        headers.insert(header::ETAG, etag);
    }
    if let Some(last_modified) = last_modified_value(value) {
        headers.insert(header::LAST_MODIFIED, last_modified);
    }
    headers
}

fn mutation_headers(value: &Value) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(etag) = etag_value(value) {
        headers.insert(header::ETAG, etag);
    }
    headers
}

/// Builds the relative `Location` a create/update response carries, using
/// whichever literal version segment the caller's URL used rather than the
/// canonical `FhirVersion` rendering (a client that wrote `R4B` should see
/// `R4B` echoed back, not `4.3.0`).
fn versioned_location(version_segment: Option<&str>, resource_type: &str, id: &str, version_id: &str) -> String {
    match version_segment {
        Some(v) => format!("/fhir/{v}/{resource_type}/{id}/_history/{version_id}"),
        None => format!("/fhir/{resource_type}/{id}/_history/{version_id}"),
    }
}

fn create_headers(value: &Value, version_segment: Option<&str>, resource_type: &str) -> HeaderMap {
    let mut headers = mutation_headers(value);
    let id = value.get("id").and_then(Value::as_str).unwrap_or_default();
    let version_id = value.get("meta").and_then(|m| m.get("versionId")).and_then(Value::as_str).unwrap_or("1");
    if let Ok(location) = HeaderValue::from_str(&versioned_location(version_segment, resource_type, id, version_id)) {
        headers.insert(header::LOCATION, location);
    }
    headers
}

/// Turns a [`PluginOutcome`] into the HTTP response §6 describes, attaching
/// `headers` to the success path only (aborts carry their own status).
fn respond(outcome: PluginOutcome, ok_status: StatusCode, headers: HeaderMap) -> Response {
    match outcome {
        PluginOutcome::Aborted(abort) => {
            let status = StatusCode::from_u16(abort.status).unwrap_or(StatusCode::FORBIDDEN);
            (status, axum::Json(abort.outcome)).into_response()
        }
        PluginOutcome::Ok(value) | PluginOutcome::CacheHit(value) | PluginOutcome::OkWithIssue(value, _) => {
            (ok_status, headers, axum::Json(value)).into_response()
        }
    }
}

fn outcome_to_response(result: Result<PluginOutcome, CoreError>, ok_status: StatusCode, headers: impl FnOnce(&Value) -> HeaderMap) -> Response {
    match result {
        Ok(outcome) => {
            let headers = match &outcome {
                PluginOutcome::Ok(v) | PluginOutcome::CacheHit(v) | PluginOutcome::OkWithIssue(v, _) => headers(v),
                PluginOutcome::Aborted(_) => HeaderMap::new(),
            };
            respond(outcome, ok_status, headers)
        }
        Err(err) => core_error_response(err),
    }
}

fn search_validation_to_core(resource_type: &str, err: SearchValidationError) -> CoreError {
    match err {
        SearchValidationError::UnknownParameter(code) => {
            CoreError::invalid_search_parameter(resource_type, code, "unknown search parameter")
        }
        SearchValidationError::DisallowedParameter(code) => {
            CoreError::invalid_search_parameter(resource_type, code, "search parameter not allowed for this resource type")
        }
        SearchValidationError::InvalidValue { param, message } => CoreError::invalid_search_value(param, message),
    }
}

fn search_bundle(resource_type: &str, result: SearchResult) -> Value {
    let entries: Vec<Value> = result
        .entries
        .iter()
        .map(|row| {
            json!({
                "fullUrl": format!("{resource_type}/{}", row.resource_id),
                "resource": row.to_resource_json(),
                "search": { "mode": "match" },
            })
        })
        .collect();
    let mut doc = json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "entry": entries,
    });
    if let Some(total) = result.total {
        doc["total"] = json!(total);
    }
    doc
}

fn history_bundle(resource_type: &str, result: HistoryResult) -> Value {
    let entries: Vec<Value> = result
        .entries
        .iter()
        .map(|entry| {
            json!({
                "fullUrl": format!("{resource_type}/{}", entry.row.resource_id),
                "resource": entry.row.to_resource_json(),
                "request": { "method": entry.method.to_string() },
            })
        })
        .collect();
    let mut doc = json!({
        "resourceType": "Bundle",
        "type": "history",
        "entry": entries,
    });
    if let Some(total) = result.total {
        doc["total"] = json!(total);
    }
    doc
}

fn parse_history_query(raw: Option<&str>) -> HistoryParams {
    let mut params = HistoryParams::new();
    let Some(raw) = raw else { return params };
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        match key.as_ref() {
            "_count" => {
                if let Ok(count) = value.parse::<u32>() {
                    params = params.count(count);
                }
            }
            "_since" => {
                if let Ok(since) = time::OffsetDateTime::parse(&value, &time::format_description::well_known::Rfc3339) {
                    params = params.since(since);
                }
            }
            "_offset" => {
                if let Ok(offset) = value.parse::<u32>() {
                    params = params.offset(offset);
                }
            }
            _ => {}
        }
    }
    params
}

// ---------------------------------------------------------------------
// Core operations, shared between direct HTTP routes and the bundle
// processor: every entry runs through the same pipeline.
// ---------------------------------------------------------------------

async fn perform_create(state: &AppState, version: FhirVersion, tenant_id: i64, rtype: &str, body: Value) -> Result<PluginOutcome, CoreError> {
    guard::validate(&state.resource_registry, rtype, version, Interaction::Create)?;

    let mut ctx = PluginContext::new(Interaction::Create, rtype.to_string(), version, tenant_id);
    ctx.input = Some(body);

    let storage = state.storage.clone();
    let validation = state.validation.clone();
    let rtype_owned = rtype.to_string();

    state
        .orchestrator
        .run(ctx, move |ctx| {
            Box::pin(async move {
                let input = ctx.input.ok_or_else(|| CoreError::invalid_resource("missing request body"))?;
                validation.validate(&input, version, None).await?;
                let row = storage
                    .create(tenant_id, &rtype_owned, version, &input)
                    .await
                    .map_err(|e| core_error_from_storage(&rtype_owned, "", e))?;
                Ok(row.to_resource_json())
            })
        })
        .await
}

async fn perform_read(state: &AppState, version: FhirVersion, tenant_id: i64, rtype: &str, id: &str) -> Result<PluginOutcome, CoreError> {
    guard::validate(&state.resource_registry, rtype, version, Interaction::Read)?;

    let ctx = PluginContext::new(Interaction::Read, rtype.to_string(), version, tenant_id).with_resource_id(id.to_string());
    let storage = state.storage.clone();
    let rtype_owned = rtype.to_string();
    let id_owned = id.to_string();

    state
        .orchestrator
        .run(ctx, move |_ctx| {
            Box::pin(async move {
                let row = storage
                    .read(tenant_id, &rtype_owned, &id_owned)
                    .await
                    .map_err(|e| core_error_from_storage(&rtype_owned, &id_owned, e))?
                    .ok_or_else(|| CoreError::resource_not_found(rtype_owned.clone(), id_owned.clone()))?;
                Ok(row.to_resource_json())
            })
        })
        .await
}

async fn perform_update(
    state: &AppState,
    version: FhirVersion,
    tenant_id: i64,
    rtype: &str,
    id: &str,
    body: Value,
    if_match: Option<String>,
) -> Result<PluginOutcome, CoreError> {
    guard::validate(&state.resource_registry, rtype, version, Interaction::Update)?;

    let mut ctx = PluginContext::new(Interaction::Update, rtype.to_string(), version, tenant_id).with_resource_id(id.to_string());
    ctx.input = Some(body);

    let storage = state.storage.clone();
    let validation = state.validation.clone();
    let rtype_owned = rtype.to_string();
    let id_owned = id.to_string();

    state
        .orchestrator
        .run(ctx, move |ctx| {
            Box::pin(async move {
                let input = ctx.input.ok_or_else(|| CoreError::invalid_resource("missing request body"))?;
                validation.validate(&input, version, None).await?;
                let row = storage
                    .update(tenant_id, &rtype_owned, &id_owned, &input, if_match.as_deref())
                    .await
                    .map_err(|e| core_error_from_storage(&rtype_owned, &id_owned, e))?;
                Ok(row.to_resource_json())
            })
        })
        .await
}

async fn perform_patch(
    state: &AppState,
    version: FhirVersion,
    tenant_id: i64,
    rtype: &str,
    id: &str,
    patch_bytes: Vec<u8>,
    if_match: Option<String>,
) -> Result<PluginOutcome, CoreError> {
    guard::validate(&state.resource_registry, rtype, version, Interaction::Patch)?;

    let ctx = PluginContext::new(Interaction::Patch, rtype.to_string(), version, tenant_id).with_resource_id(id.to_string());
    let storage = state.storage.clone();
    let validation = state.validation.clone();
    let rtype_owned = rtype.to_string();
    let id_owned = id.to_string();

    state
        .orchestrator
        .run(ctx, move |_ctx| {
            Box::pin(async move {
                let current = storage
                    .read(tenant_id, &rtype_owned, &id_owned)
                    .await
                    .map_err(|e| core_error_from_storage(&rtype_owned, &id_owned, e))?
                    .ok_or_else(|| CoreError::resource_not_found(rtype_owned.clone(), id_owned.clone()))?;

                let patched = crate::patch::apply_json_patch(&current.content, &patch_bytes)?;
                validation.validate(&patched, version, None).await?;
                let row = storage
                    .update(tenant_id, &rtype_owned, &id_owned, &patched, if_match.as_deref())
                    .await
                    .map_err(|e| core_error_from_storage(&rtype_owned, &id_owned, e))?;
                Ok(row.to_resource_json())
            })
        })
        .await
}

async fn perform_delete(state: &AppState, version: FhirVersion, tenant_id: i64, rtype: &str, id: &str) -> Result<PluginOutcome, CoreError> {
    guard::validate(&state.resource_registry, rtype, version, Interaction::Delete)?;

    let ctx = PluginContext::new(Interaction::Delete, rtype.to_string(), version, tenant_id).with_resource_id(id.to_string());
    let storage = state.storage.clone();
    let rtype_owned = rtype.to_string();
    let id_owned = id.to_string();

    state
        .orchestrator
        .run(ctx, move |_ctx| {
            Box::pin(async move {
                let row = storage
                    .delete(tenant_id, &rtype_owned, &id_owned)
                    .await
                    .map_err(|e| core_error_from_storage(&rtype_owned, &id_owned, e))?;
                Ok(row.to_resource_json())
            })
        })
        .await
}

async fn perform_vread(state: &AppState, version: FhirVersion, tenant_id: i64, rtype: &str, id: &str, vid: &str) -> Result<PluginOutcome, CoreError> {
    guard::validate(&state.resource_registry, rtype, version, Interaction::VRead)?;

    // Deliberately not `with_resource_id`: vread results are keyed by
    // version, and the generic cache only keys on (tenant, type, id) — an
    // unqualified cache hit here could serve the wrong version.
    let ctx = PluginContext::new(Interaction::VRead, rtype.to_string(), version, tenant_id);
    let storage = state.storage.clone();
    let rtype_owned = rtype.to_string();
    let id_owned = id.to_string();
    let vid_owned = vid.to_string();

    state
        .orchestrator
        .run(ctx, move |_ctx| {
            Box::pin(async move {
                let row = storage
                    .vread(tenant_id, &rtype_owned, &id_owned, &vid_owned)
                    .await
                    .map_err(|e| core_error_from_storage(&rtype_owned, &id_owned, e))?
                    .ok_or_else(|| CoreError::resource_not_found(rtype_owned.clone(), format!("{id_owned}/_history/{vid_owned}")))?;
                Ok(row.to_resource_json())
            })
        })
        .await
}

async fn perform_history(
    state: &AppState,
    version: FhirVersion,
    tenant_id: i64,
    rtype: &str,
    id: Option<&str>,
    params: HistoryParams,
) -> Result<PluginOutcome, CoreError> {
    guard::validate(&state.resource_registry, rtype, version, Interaction::History)?;

    let ctx = PluginContext::new(Interaction::History, rtype.to_string(), version, tenant_id);
    let storage = state.storage.clone();
    let rtype_owned = rtype.to_string();
    let id_owned = id.map(String::from);

    state
        .orchestrator
        .run(ctx, move |_ctx| {
            Box::pin(async move {
                let result = storage
                    .history(tenant_id, &rtype_owned, id_owned.as_deref(), &params)
                    .await
                    .map_err(|e| core_error_from_storage(&rtype_owned, id_owned.as_deref().unwrap_or(""), e))?;
                Ok(history_bundle(&rtype_owned, result))
            })
        })
        .await
}

async fn perform_search(state: &AppState, version: FhirVersion, tenant_id: i64, rtype: &str, query: &str) -> Result<PluginOutcome, CoreError> {
    guard::validate(&state.resource_registry, rtype, version, Interaction::Search)?;

    let parsed = SearchParameterParser::parse_query(query);
    let params = parsed
        .validate_and_convert(rtype, &state.search_registry, &state.resource_registry, state.default_count, state.max_count)
        .map_err(|e| search_validation_to_core(rtype, e))?;

    let ctx = PluginContext::new(Interaction::Search, rtype.to_string(), version, tenant_id);
    let storage = state.storage.clone();
    let rtype_owned = rtype.to_string();

    state
        .orchestrator
        .run(ctx, move |_ctx| {
            Box::pin(async move {
                let result = storage
                    .search(tenant_id, &rtype_owned, &params)
                    .await
                    .map_err(|e| core_error_from_storage(&rtype_owned, "", e))?;
                Ok(search_bundle(&rtype_owned, result))
            })
        })
        .await
}

async fn perform_operation(
    state: &AppState,
    version: FhirVersion,
    tenant_id: i64,
    scope: OperationScope,
    resource_type: Option<String>,
    resource_id: Option<String>,
    name: String,
    input: Option<Value>,
    query_params: HashMap<String, String>,
) -> Result<OperationOutput, CoreError> {
    let invocation = OperationInvocation { name, scope, resource_type, resource_id, input, query_params, version, tenant_id };
    state.operation_registry.dispatch(invocation).await
}

fn operation_response(result: Result<OperationOutput, CoreError>) -> Response {
    match result {
        Ok(output) => {
            let status = StatusCode::from_u16(output.status).unwrap_or(StatusCode::OK);
            (status, axum::Json(output.body)).into_response()
        }
        Err(err) => core_error_response(err),
    }
}

fn query_params_map(raw: Option<&str>) -> HashMap<String, String> {
    raw.map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect()).unwrap_or_default()
}

// ---------------------------------------------------------------------
// Bundle execution: routes every entry through the same perform_* functions
// a direct HTTP call would use.
// ---------------------------------------------------------------------

struct BundleExecutor<'a> {
    state: &'a AppState,
    version: FhirVersion,
    tenant_id: i64,
}

/// Splits `Patient/123` (or the bare `Patient` of a create) into a resource
/// type and an optional id; `_search`/`$operation` segments aren't valid
/// bundle entry targets and are rejected.
fn split_entry_url(url: &str) -> Result<(String, Option<String>), CoreError> {
    let mut segments = url.trim_start_matches('/').splitn(2, '/');
    let resource_type = segments
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::invalid_resource(format!("invalid bundle entry url '{url}'")))?;
    let rest = segments.next();
    match rest {
        None => Ok((resource_type.to_string(), None)),
        Some(id) if !id.starts_with('_') && !id.starts_with('$') => Ok((resource_type.to_string(), Some(id.to_string()))),
        Some(_) => Err(CoreError::invalid_resource(format!("unsupported bundle entry url '{url}'"))),
    }
}

fn outcome_value(outcome: PluginOutcome) -> (Value, Option<&'static str>) {
    match outcome {
        PluginOutcome::Ok(v) | PluginOutcome::CacheHit(v) | PluginOutcome::OkWithIssue(v, _) => (v, None),
        PluginOutcome::Aborted(abort) => (abort.outcome, Some("aborted")),
    }
}

#[async_trait]
impl EntryExecutor for BundleExecutor<'_> {
    async fn execute(&mut self, method: HttpMethod, url: &str, resource: Option<Value>) -> Result<EntryOutcome, CoreError> {
        let (rtype, id) = split_entry_url(url)?;

        match method {
            HttpMethod::Post => {
                let body = resource.ok_or_else(|| CoreError::invalid_resource("bundle entry missing resource"))?;
                let outcome = perform_create(self.state, self.version, self.tenant_id, &rtype, body).await?;
                let (value, aborted) = outcome_value(outcome);
                if aborted.is_some() {
                    return Ok(EntryOutcome { status: 403, body: Some(value), location: None, etag: None });
                }
                let id = value.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                let version_id = value.get("meta").and_then(|m| m.get("versionId")).and_then(Value::as_str).unwrap_or("1");
                let location = versioned_location(None, &rtype, &id, version_id);
                let etag = format!("W/\"{version_id}\"");
                Ok(EntryOutcome { status: 201, body: Some(value), location: Some(location), etag: Some(etag) })
            }
            HttpMethod::Put => {
                let id = id.ok_or_else(|| CoreError::invalid_resource(format!("PUT entry url '{url}' missing id")))?;
                let body = resource.ok_or_else(|| CoreError::invalid_resource("bundle entry missing resource"))?;
                let outcome = perform_update(self.state, self.version, self.tenant_id, &rtype, &id, body, None).await?;
                Ok(EntryOutcome::success(200, outcome_value(outcome).0))
            }
            HttpMethod::Patch => {
                let id = id.ok_or_else(|| CoreError::invalid_resource(format!("PATCH entry url '{url}' missing id")))?;
                let body = resource.ok_or_else(|| CoreError::invalid_resource("bundle entry missing patch document"))?;
                let bytes = serde_json::to_vec(&body).map_err(|e| CoreError::invalid_resource(e.to_string()))?;
                let outcome = perform_patch(self.state, self.version, self.tenant_id, &rtype, &id, bytes, None).await?;
                Ok(EntryOutcome::success(200, outcome_value(outcome).0))
            }
            HttpMethod::Delete => {
                let id = id.ok_or_else(|| CoreError::invalid_resource(format!("DELETE entry url '{url}' missing id")))?;
                perform_delete(self.state, self.version, self.tenant_id, &rtype, &id).await?;
                Ok(EntryOutcome { status: 204, body: None, location: None, etag: None })
            }
            HttpMethod::Get => match id {
                Some(id) => {
                    let outcome = perform_read(self.state, self.version, self.tenant_id, &rtype, &id).await?;
                    Ok(EntryOutcome::success(200, outcome_value(outcome).0))
                }
                None => Err(CoreError::not_supported(format!("GET entry url '{url}' is not a resource read"))),
            },
        }
    }
}

// ---------------------------------------------------------------------
// Transaction-bundle execution: the same pipeline as above, but every
// write lands in a single backend [`Transaction`] (§4.9) so a later
// entry's failure rolls back every earlier entry in this bundle instead
// of leaving partial writes behind.
// ---------------------------------------------------------------------

type TxHandle = Arc<AsyncMutex<Box<dyn Transaction>>>;

async fn perform_create_in_tx(state: &AppState, version: FhirVersion, tenant_id: i64, rtype: &str, body: Value, tx: TxHandle) -> Result<PluginOutcome, CoreError> {
    guard::validate(&state.resource_registry, rtype, version, Interaction::Create)?;

    let mut ctx = PluginContext::new(Interaction::Create, rtype.to_string(), version, tenant_id);
    ctx.input = Some(body);

    let validation = state.validation.clone();
    let rtype_owned = rtype.to_string();

    state
        .orchestrator
        .run(ctx, move |ctx| {
            Box::pin(async move {
                let input = ctx.input.ok_or_else(|| CoreError::invalid_resource("missing request body"))?;
                validation.validate(&input, version, None).await?;
                let mut tx = tx.lock().await;
                let row = tx
                    .create(&rtype_owned, version, &input)
                    .await
                    .map_err(|e| core_error_from_storage(&rtype_owned, "", e))?;
                Ok(row.to_resource_json())
            })
        })
        .await
}

async fn perform_read_in_tx(state: &AppState, version: FhirVersion, tenant_id: i64, rtype: &str, id: &str, tx: TxHandle) -> Result<PluginOutcome, CoreError> {
    guard::validate(&state.resource_registry, rtype, version, Interaction::Read)?;

    let ctx = PluginContext::new(Interaction::Read, rtype.to_string(), version, tenant_id).with_resource_id(id.to_string());
    let rtype_owned = rtype.to_string();
    let id_owned = id.to_string();

    state
        .orchestrator
        .run(ctx, move |_ctx| {
            Box::pin(async move {
                let tx = tx.lock().await;
                let row = tx
                    .read(&rtype_owned, &id_owned)
                    .await
                    .map_err(|e| core_error_from_storage(&rtype_owned, &id_owned, e))?
                    .ok_or_else(|| CoreError::resource_not_found(rtype_owned.clone(), id_owned.clone()))?;
                Ok(row.to_resource_json())
            })
        })
        .await
}

async fn perform_update_in_tx(
    state: &AppState,
    version: FhirVersion,
    tenant_id: i64,
    rtype: &str,
    id: &str,
    body: Value,
    if_match: Option<String>,
    tx: TxHandle,
) -> Result<PluginOutcome, CoreError> {
    guard::validate(&state.resource_registry, rtype, version, Interaction::Update)?;

    let mut ctx = PluginContext::new(Interaction::Update, rtype.to_string(), version, tenant_id).with_resource_id(id.to_string());
    ctx.input = Some(body);

    let validation = state.validation.clone();
    let rtype_owned = rtype.to_string();
    let id_owned = id.to_string();

    state
        .orchestrator
        .run(ctx, move |ctx| {
            Box::pin(async move {
                let input = ctx.input.ok_or_else(|| CoreError::invalid_resource("missing request body"))?;
                validation.validate(&input, version, None).await?;
                let mut tx = tx.lock().await;
                let row = tx
                    .update(&rtype_owned, &id_owned, &input, if_match.as_deref())
                    .await
                    .map_err(|e| core_error_from_storage(&rtype_owned, &id_owned, e))?;
                Ok(row.to_resource_json())
            })
        })
        .await
}

async fn perform_patch_in_tx(
    state: &AppState,
    version: FhirVersion,
    tenant_id: i64,
    rtype: &str,
    id: &str,
    patch_bytes: Vec<u8>,
    if_match: Option<String>,
    tx: TxHandle,
) -> Result<PluginOutcome, CoreError> {
    guard::validate(&state.resource_registry, rtype, version, Interaction::Patch)?;

    let ctx = PluginContext::new(Interaction::Patch, rtype.to_string(), version, tenant_id).with_resource_id(id.to_string());
    let validation = state.validation.clone();
    let rtype_owned = rtype.to_string();
    let id_owned = id.to_string();

    state
        .orchestrator
        .run(ctx, move |_ctx| {
            Box::pin(async move {
                let mut tx = tx.lock().await;
                let current = tx
                    .read(&rtype_owned, &id_owned)
                    .await
                    .map_err(|e| core_error_from_storage(&rtype_owned, &id_owned, e))?
                    .ok_or_else(|| CoreError::resource_not_found(rtype_owned.clone(), id_owned.clone()))?;

                let patched = crate::patch::apply_json_patch(&current.content, &patch_bytes)?;
                validation.validate(&patched, version, None).await?;
                let row = tx
                    .update(&rtype_owned, &id_owned, &patched, if_match.as_deref())
                    .await
                    .map_err(|e| core_error_from_storage(&rtype_owned, &id_owned, e))?;
                Ok(row.to_resource_json())
            })
        })
        .await
}

async fn perform_delete_in_tx(state: &AppState, version: FhirVersion, tenant_id: i64, rtype: &str, id: &str, tx: TxHandle) -> Result<PluginOutcome, CoreError> {
    guard::validate(&state.resource_registry, rtype, version, Interaction::Delete)?;

    let ctx = PluginContext::new(Interaction::Delete, rtype.to_string(), version, tenant_id).with_resource_id(id.to_string());
    let rtype_owned = rtype.to_string();
    let id_owned = id.to_string();

    state
        .orchestrator
        .run(ctx, move |_ctx| {
            Box::pin(async move {
                let mut tx = tx.lock().await;
                let row = tx
                    .delete(&rtype_owned, &id_owned)
                    .await
                    .map_err(|e| core_error_from_storage(&rtype_owned, &id_owned, e))?;
                Ok(row.to_resource_json())
            })
        })
        .await
}

struct TransactionBundleExecutor<'a> {
    state: &'a AppState,
    version: FhirVersion,
    tenant_id: i64,
    tx: TxHandle,
}

#[async_trait]
impl EntryExecutor for TransactionBundleExecutor<'_> {
    async fn execute(&mut self, method: HttpMethod, url: &str, resource: Option<Value>) -> Result<EntryOutcome, CoreError> {
        let (rtype, id) = split_entry_url(url)?;

        match method {
            HttpMethod::Post => {
                let body = resource.ok_or_else(|| CoreError::invalid_resource("bundle entry missing resource"))?;
                let outcome = perform_create_in_tx(self.state, self.version, self.tenant_id, &rtype, body, self.tx.clone()).await?;
                let (value, aborted) = outcome_value(outcome);
                if aborted.is_some() {
                    return Ok(EntryOutcome { status: 403, body: Some(value), location: None, etag: None });
                }
                let id = value.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                let version_id = value.get("meta").and_then(|m| m.get("versionId")).and_then(Value::as_str).unwrap_or("1");
                let location = versioned_location(None, &rtype, &id, version_id);
                let etag = format!("W/\"{version_id}\"");
                Ok(EntryOutcome { status: 201, body: Some(value), location: Some(location), etag: Some(etag) })
            }
            HttpMethod::Put => {
                let id = id.ok_or_else(|| CoreError::invalid_resource(format!("PUT entry url '{url}' missing id")))?;
                let body = resource.ok_or_else(|| CoreError::invalid_resource("bundle entry missing resource"))?;
                let outcome = perform_update_in_tx(self.state, self.version, self.tenant_id, &rtype, &id, body, None, self.tx.clone()).await?;
                Ok(EntryOutcome::success(200, outcome_value(outcome).0))
            }
            HttpMethod::Patch => {
                let id = id.ok_or_else(|| CoreError::invalid_resource(format!("PATCH entry url '{url}' missing id")))?;
                let body = resource.ok_or_else(|| CoreError::invalid_resource("bundle entry missing patch document"))?;
                let bytes = serde_json::to_vec(&body).map_err(|e| CoreError::invalid_resource(e.to_string()))?;
                let outcome = perform_patch_in_tx(self.state, self.version, self.tenant_id, &rtype, &id, bytes, None, self.tx.clone()).await?;
                Ok(EntryOutcome::success(200, outcome_value(outcome).0))
            }
            HttpMethod::Delete => {
                let id = id.ok_or_else(|| CoreError::invalid_resource(format!("DELETE entry url '{url}' missing id")))?;
                perform_delete_in_tx(self.state, self.version, self.tenant_id, &rtype, &id, self.tx.clone()).await?;
                Ok(EntryOutcome { status: 204, body: None, location: None, etag: None })
            }
            HttpMethod::Get => match id {
                Some(id) => {
                    let outcome = perform_read_in_tx(self.state, self.version, self.tenant_id, &rtype, &id, self.tx.clone()).await?;
                    Ok(EntryOutcome::success(200, outcome_value(outcome).0))
                }
                None => Err(CoreError::not_supported(format!("GET entry url '{url}' is not a resource read"))),
            },
        }
    }
}

async fn perform_bundle(state: &AppState, version: FhirVersion, tenant_id: i64, document: Value) -> Result<Value, CoreError> {
    let bundle_type_field = document
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::invalid_resource("Bundle missing 'type'"))?;
    let bundle_type = BundleType::parse(bundle_type_field)?;
    let entries = bundle::parse_entries(&document)?;

    let outcomes = match bundle_type {
        BundleType::Batch => {
            let mut executor = BundleExecutor { state, version, tenant_id };
            bundle::process_batch(entries, &mut executor).await
        }
        BundleType::Transaction => {
            let tx = state
                .storage
                .begin_transaction(tenant_id)
                .await
                .map_err(|e| core_error_from_storage("Bundle", "", e))?;
            let tx: TxHandle = Arc::new(AsyncMutex::new(tx));

            let outcome = {
                let mut executor = TransactionBundleExecutor { state, version, tenant_id, tx: tx.clone() };
                bundle::process_transaction(entries, &mut executor).await
            };

            match outcome {
                Ok(outcomes) => {
                    let tx = Arc::try_unwrap(tx)
                        .map_err(|_| CoreError::internal("transaction handle still referenced after bundle processing"))?
                        .into_inner();
                    tx.commit().await.map_err(|e| core_error_from_storage("Bundle", "", e))?;
                    outcomes
                }
                Err((index, err)) => {
                    if let Ok(tx) = Arc::try_unwrap(tx) {
                        let _ = tx.into_inner().rollback().await;
                    }
                    return Err(CoreError::invalid_resource(format!("transaction failed at entry {index}: {err}")));
                }
            }
        }
    };

    Ok(response_bundle(bundle_type, outcomes))
}

fn response_bundle(bundle_type: BundleType, outcomes: Vec<EntryOutcome>) -> Value {
    let type_code = match bundle_type {
        BundleType::Batch => "batch-response",
        BundleType::Transaction => "transaction-response",
    };
    let entries: Vec<Value> = outcomes
        .into_iter()
        .map(|outcome| {
            let mut response = json!({ "status": outcome.status.to_string() });
            if let Some(location) = &outcome.location {
                response["location"] = json!(location);
            }
            if let Some(etag) = &outcome.etag {
                response["etag"] = json!(etag);
            }
            let mut entry = json!({ "response": response });
            if let Some(body) = outcome.body {
                entry["resource"] = body;
            }
            entry
        })
        .collect();
    json!({ "resourceType": "Bundle", "type": type_code, "entry": entries })
}

// ---------------------------------------------------------------------
// Misc routes
// ---------------------------------------------------------------------

pub async fn root() -> impl IntoResponse {
    axum::Json(json!({
        "service": "octofhir-server",
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, axum::Json(json!({"status": "ok"})))
}

pub async fn readyz() -> impl IntoResponse {
    (StatusCode::OK, axum::Json(json!({"status": "ready"})))
}

pub async fn metadata(State(state): State<AppState>, Path(version): Path<String>) -> Response {
    let Ok(version) = resolve_version(&state, Some(&version)) else {
        return core_error_response(CoreError::invalid_resource_type(format!("unknown FHIR version '{version}'")));
    };
    let doc = crate::conformance::generate(&state.resource_registry, &state.search_registry, &state.operation_registry, version);
    (StatusCode::OK, axum::Json(doc)).into_response()
}

pub async fn metadata_default(State(state): State<AppState>) -> Response {
    let version = state.default_version;
    let doc = crate::conformance::generate(&state.resource_registry, &state.search_registry, &state.operation_registry, version);
    (StatusCode::OK, axum::Json(doc)).into_response()
}

// ---------------------------------------------------------------------
// Bundle routes
// ---------------------------------------------------------------------

pub async fn bundle(
    State(state): State<AppState>,
    Path(version): Path<String>,
    Extension(tenant): Extension<TenantContext>,
    body: Bytes,
) -> Response {
    bundle_impl(state, Some(version), tenant, body).await
}

pub async fn bundle_default(State(state): State<AppState>, Extension(tenant): Extension<TenantContext>, body: Bytes) -> Response {
    bundle_impl(state, None, tenant, body).await
}

async fn bundle_impl(state: AppState, version_segment: Option<String>, tenant: TenantContext, body: Bytes) -> Response {
    let version = match resolve_version(&state, version_segment.as_deref()) {
        Ok(v) => v,
        Err(err) => return core_error_response(err),
    };
    let document = match parse_json_body(&body) {
        Ok(v) => v,
        Err(err) => return core_error_response(err),
    };
    match perform_bundle(&state, version, tenant.tenant_id, document).await {
        Ok(doc) => (StatusCode::OK, axum::Json(doc)).into_response(),
        Err(err) => core_error_response(err),
    }
}

// ---------------------------------------------------------------------
// Search via POST (`_search`)
// ---------------------------------------------------------------------

pub async fn search_via_post(
    State(state): State<AppState>,
    Path((version, rtype)): Path<(String, String)>,
    Extension(tenant): Extension<TenantContext>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    search_via_post_impl(state, Some(version), rtype, tenant, query, body).await
}

pub async fn search_via_post_default(
    State(state): State<AppState>,
    Path(rtype): Path<String>,
    Extension(tenant): Extension<TenantContext>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    search_via_post_impl(state, None, rtype, tenant, query, body).await
}

async fn search_via_post_impl(
    state: AppState,
    version_segment: Option<String>,
    rtype: String,
    tenant: TenantContext,
    query: Option<String>,
    body: Bytes,
) -> Response {
    let version = match resolve_version(&state, version_segment.as_deref()) {
        Ok(v) => v,
        Err(err) => return core_error_response(err),
    };
    let form_body = String::from_utf8_lossy(&body).to_string();
    let combined = match query {
        Some(q) if !q.is_empty() && !form_body.is_empty() => format!("{q}&{form_body}"),
        Some(q) if !q.is_empty() => q,
        _ => form_body,
    };
    let result = perform_search(&state, version, tenant.tenant_id, &rtype, &combined).await;
    outcome_to_response(result, StatusCode::OK, read_headers)
}

// ---------------------------------------------------------------------
// Type-level: `{seg}` is either a resource type (search/create) or a
// system/type-scope `$operation` name.
// ---------------------------------------------------------------------

pub async fn type_level_get(
    State(state): State<AppState>,
    Path((version, seg)): Path<(String, String)>,
    Extension(tenant): Extension<TenantContext>,
    RawQuery(query): RawQuery,
) -> Response {
    type_level_get_impl(state, Some(version), seg, tenant, query).await
}

pub async fn type_level_get_default(
    State(state): State<AppState>,
    Path(seg): Path<String>,
    Extension(tenant): Extension<TenantContext>,
    RawQuery(query): RawQuery,
) -> Response {
    type_level_get_impl(state, None, seg, tenant, query).await
}

async fn type_level_get_impl(state: AppState, version_segment: Option<String>, seg: String, tenant: TenantContext, query: Option<String>) -> Response {
    let version = match resolve_version(&state, version_segment.as_deref()) {
        Ok(v) => v,
        Err(err) => return core_error_response(err),
    };
    if let Some(name) = seg.strip_prefix('$') {
        let params = query_params_map(query.as_deref());
        let result = perform_operation(&state, version, tenant.tenant_id, OperationScope::System, None, None, name.to_string(), None, params).await;
        return operation_response(result);
    }
    let result = perform_search(&state, version, tenant.tenant_id, &seg, query.as_deref().unwrap_or("")).await;
    outcome_to_response(result, StatusCode::OK, read_headers)
}

pub async fn type_level_post(
    State(state): State<AppState>,
    Path((version, seg)): Path<(String, String)>,
    Extension(tenant): Extension<TenantContext>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    type_level_post_impl(state, Some(version), seg, tenant, query, body).await
}

pub async fn type_level_post_default(
    State(state): State<AppState>,
    Path(seg): Path<String>,
    Extension(tenant): Extension<TenantContext>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    type_level_post_impl(state, None, seg, tenant, query, body).await
}

async fn type_level_post_impl(
    state: AppState,
    version_segment: Option<String>,
    seg: String,
    tenant: TenantContext,
    query: Option<String>,
    body: Bytes,
) -> Response {
    let version = match resolve_version(&state, version_segment.as_deref()) {
        Ok(v) => v,
        Err(err) => return core_error_response(err),
    };
    let parsed_body = match parse_json_body(&body) {
        Ok(v) => v,
        Err(err) => return core_error_response(err),
    };
    if let Some(name) = seg.strip_prefix('$') {
        let params = query_params_map(query.as_deref());
        let result = perform_operation(&state, version, tenant.tenant_id, OperationScope::System, None, None, name.to_string(), Some(parsed_body), params).await;
        return operation_response(result);
    }
    let result = perform_create(&state, version, tenant.tenant_id, &seg, parsed_body).await;
    outcome_to_response(result, StatusCode::CREATED, |v| create_headers(v, version_segment.as_deref(), &seg))
}

// ---------------------------------------------------------------------
// `_history`/vread routes
// ---------------------------------------------------------------------

pub async fn history_instance(
    State(state): State<AppState>,
    Path((version, rtype, id)): Path<(String, String, String)>,
    Extension(tenant): Extension<TenantContext>,
    RawQuery(query): RawQuery,
) -> Response {
    history_instance_impl(state, Some(version), rtype, id, tenant, query).await
}

pub async fn history_instance_default(
    State(state): State<AppState>,
    Path((rtype, id)): Path<(String, String)>,
    Extension(tenant): Extension<TenantContext>,
    RawQuery(query): RawQuery,
) -> Response {
    history_instance_impl(state, None, rtype, id, tenant, query).await
}

async fn history_instance_impl(
    state: AppState,
    version_segment: Option<String>,
    rtype: String,
    id: String,
    tenant: TenantContext,
    query: Option<String>,
) -> Response {
    let version = match resolve_version(&state, version_segment.as_deref()) {
        Ok(v) => v,
        Err(err) => return core_error_response(err),
    };
    let params = parse_history_query(query.as_deref());
    let result = perform_history(&state, version, tenant.tenant_id, &rtype, Some(&id), params).await;
    outcome_to_response(result, StatusCode::OK, |_| HeaderMap::new())
}

pub async fn vread(
    State(state): State<AppState>,
    Path((version, rtype, id, vid)): Path<(String, String, String, String)>,
    Extension(tenant): Extension<TenantContext>,
) -> Response {
    vread_impl(state, Some(version), rtype, id, vid, tenant).await
}

pub async fn vread_default(
    State(state): State<AppState>,
    Path((rtype, id, vid)): Path<(String, String, String)>,
    Extension(tenant): Extension<TenantContext>,
) -> Response {
    vread_impl(state, None, rtype, id, vid, tenant).await
}

async fn vread_impl(state: AppState, version_segment: Option<String>, rtype: String, id: String, vid: String, tenant: TenantContext) -> Response {
    let version = match resolve_version(&state, version_segment.as_deref()) {
        Ok(v) => v,
        Err(err) => return core_error_response(err),
    };
    let result = perform_vread(&state, version, tenant.tenant_id, &rtype, &id, &vid).await;
    outcome_to_response(result, StatusCode::OK, read_headers)
}

// ---------------------------------------------------------------------
// Instance-level: `{seg}` is either a resource id (read/update/patch/delete)
// or a type/instance-scope `$operation` name invoked via GET/POST.
// ---------------------------------------------------------------------

pub async fn instance_level_get(
    State(state): State<AppState>,
    Path((version, rtype, seg)): Path<(String, String, String)>,
    Extension(tenant): Extension<TenantContext>,
    RawQuery(query): RawQuery,
) -> Response {
    instance_level_get_impl(state, Some(version), rtype, seg, tenant, query).await
}

pub async fn instance_level_get_default(
    State(state): State<AppState>,
    Path((rtype, seg)): Path<(String, String)>,
    Extension(tenant): Extension<TenantContext>,
    RawQuery(query): RawQuery,
) -> Response {
    instance_level_get_impl(state, None, rtype, seg, tenant, query).await
}

async fn instance_level_get_impl(
    state: AppState,
    version_segment: Option<String>,
    rtype: String,
    seg: String,
    tenant: TenantContext,
    query: Option<String>,
) -> Response {
    let version = match resolve_version(&state, version_segment.as_deref()) {
        Ok(v) => v,
        Err(err) => return core_error_response(err),
    };
    if let Some(name) = seg.strip_prefix('$') {
        let params = query_params_map(query.as_deref());
        let result = perform_operation(&state, version, tenant.tenant_id, OperationScope::Type, Some(rtype), None, name.to_string(), None, params).await;
        return operation_response(result);
    }
    let result = perform_read(&state, version, tenant.tenant_id, &rtype, &seg).await;
    outcome_to_response(result, StatusCode::OK, read_headers)
}

pub async fn instance_level_post(
    State(state): State<AppState>,
    Path((version, rtype, seg)): Path<(String, String, String)>,
    Extension(tenant): Extension<TenantContext>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    instance_level_post_impl(state, Some(version), rtype, seg, tenant, query, body).await
}

pub async fn instance_level_post_default(
    State(state): State<AppState>,
    Path((rtype, seg)): Path<(String, String)>,
    Extension(tenant): Extension<TenantContext>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    instance_level_post_impl(state, None, rtype, seg, tenant, query, body).await
}

async fn instance_level_post_impl(
    state: AppState,
    version_segment: Option<String>,
    rtype: String,
    seg: String,
    tenant: TenantContext,
    query: Option<String>,
    body: Bytes,
) -> Response {
    let version = match resolve_version(&state, version_segment.as_deref()) {
        Ok(v) => v,
        Err(err) => return core_error_response(err),
    };
    let Some(name) = seg.strip_prefix('$') else {
        return core_error_response(CoreError::not_supported(format!("POST is not supported at /{rtype}/{seg}")));
    };
    let parsed_body = match parse_json_body(&body) {
        Ok(v) => v,
        Err(err) => return core_error_response(err),
    };
    let params = query_params_map(query.as_deref());
    let result = perform_operation(&state, version, tenant.tenant_id, OperationScope::Type, Some(rtype), None, name.to_string(), Some(parsed_body), params).await;
    operation_response(result)
}

pub async fn instance_put(
    State(state): State<AppState>,
    Path((version, rtype, seg)): Path<(String, String, String)>,
    Extension(tenant): Extension<TenantContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    instance_put_impl(state, Some(version), rtype, seg, tenant, headers, body).await
}

pub async fn instance_put_default(
    State(state): State<AppState>,
    Path((rtype, seg)): Path<(String, String)>,
    Extension(tenant): Extension<TenantContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    instance_put_impl(state, None, rtype, seg, tenant, headers, body).await
}

fn parse_if_match(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().trim_matches('"').trim_start_matches("W/").trim_matches('"').to_string())
}

async fn instance_put_impl(
    state: AppState,
    version_segment: Option<String>,
    rtype: String,
    seg: String,
    tenant: TenantContext,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let version = match resolve_version(&state, version_segment.as_deref()) {
        Ok(v) => v,
        Err(err) => return core_error_response(err),
    };
    let parsed_body = match parse_json_body(&body) {
        Ok(v) => v,
        Err(err) => return core_error_response(err),
    };
    let if_match = parse_if_match(&headers);
    let result = perform_update(&state, version, tenant.tenant_id, &rtype, &seg, parsed_body, if_match).await;
    outcome_to_response(result, StatusCode::OK, mutation_headers)
}

pub async fn instance_patch(
    State(state): State<AppState>,
    Path((version, rtype, seg)): Path<(String, String, String)>,
    Extension(tenant): Extension<TenantContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    instance_patch_impl(state, Some(version), rtype, seg, tenant, headers, body).await
}

pub async fn instance_patch_default(
    State(state): State<AppState>,
    Path((rtype, seg)): Path<(String, String)>,
    Extension(tenant): Extension<TenantContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    instance_patch_impl(state, None, rtype, seg, tenant, headers, body).await
}

async fn instance_patch_impl(
    state: AppState,
    version_segment: Option<String>,
    rtype: String,
    seg: String,
    tenant: TenantContext,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let version = match resolve_version(&state, version_segment.as_deref()) {
        Ok(v) => v,
        Err(err) => return core_error_response(err),
    };
    let if_match = parse_if_match(&headers);
    let result = perform_patch(&state, version, tenant.tenant_id, &rtype, &seg, body.to_vec(), if_match).await;
    outcome_to_response(result, StatusCode::OK, mutation_headers)
}

pub async fn instance_delete(
    State(state): State<AppState>,
    Path((version, rtype, seg)): Path<(String, String, String)>,
    Extension(tenant): Extension<TenantContext>,
) -> Response {
    instance_delete_impl(state, Some(version), rtype, seg, tenant).await
}

pub async fn instance_delete_default(
    State(state): State<AppState>,
    Path((rtype, seg)): Path<(String, String)>,
    Extension(tenant): Extension<TenantContext>,
) -> Response {
    instance_delete_impl(state, None, rtype, seg, tenant).await
}

async fn instance_delete_impl(state: AppState, version_segment: Option<String>, rtype: String, seg: String, tenant: TenantContext) -> Response {
    let version = match resolve_version(&state, version_segment.as_deref()) {
        Ok(v) => v,
        Err(err) => return core_error_response(err),
    };
    match perform_delete(&state, version, tenant.tenant_id, &rtype, &seg).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => core_error_response(err),
    }
}

// ---------------------------------------------------------------------
// Instance-scope `$operation`: `/fhir/{version}/{rtype}/{id}/{op}`
// ---------------------------------------------------------------------

pub async fn instance_operation_get(
    State(state): State<AppState>,
    Path((version, rtype, id, op)): Path<(String, String, String, String)>,
    Extension(tenant): Extension<TenantContext>,
    RawQuery(query): RawQuery,
) -> Response {
    instance_operation_get_impl(state, Some(version), rtype, id, op, tenant, query).await
}

pub async fn instance_operation_get_default(
    State(state): State<AppState>,
    Path((rtype, id, op)): Path<(String, String, String)>,
    Extension(tenant): Extension<TenantContext>,
    RawQuery(query): RawQuery,
) -> Response {
    instance_operation_get_impl(state, None, rtype, id, op, tenant, query).await
}

async fn instance_operation_get_impl(
    state: AppState,
    version_segment: Option<String>,
    rtype: String,
    id: String,
    op: String,
    tenant: TenantContext,
    query: Option<String>,
) -> Response {
    let version = match resolve_version(&state, version_segment.as_deref()) {
        Ok(v) => v,
        Err(err) => return core_error_response(err),
    };
    let Some(name) = op.strip_prefix('$') else {
        return core_error_response(CoreError::not_supported(format!("'{op}' is not an operation name")));
    };
    let params = query_params_map(query.as_deref());
    let result = perform_operation(&state, version, tenant.tenant_id, OperationScope::Instance, Some(rtype), Some(id), name.to_string(), None, params).await;
    operation_response(result)
}

pub async fn instance_operation_post(
    State(state): State<AppState>,
    Path((version, rtype, id, op)): Path<(String, String, String, String)>,
    Extension(tenant): Extension<TenantContext>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    instance_operation_post_impl(state, Some(version), rtype, id, op, tenant, query, body).await
}

pub async fn instance_operation_post_default(
    State(state): State<AppState>,
    Path((rtype, id, op)): Path<(String, String, String)>,
    Extension(tenant): Extension<TenantContext>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    instance_operation_post_impl(state, None, rtype, id, op, tenant, query, body).await
}

async fn instance_operation_post_impl(
    state: AppState,
    version_segment: Option<String>,
    rtype: String,
    id: String,
    op: String,
    tenant: TenantContext,
    query: Option<String>,
    body: Bytes,
) -> Response {
    let version = match resolve_version(&state, version_segment.as_deref()) {
        Ok(v) => v,
        Err(err) => return core_error_response(err),
    };
    let Some(name) = op.strip_prefix('$') else {
        return core_error_response(CoreError::not_supported(format!("'{op}' is not an operation name")));
    };
    let parsed_body = match parse_json_body(&body) {
        Ok(v) => v,
        Err(err) => return core_error_response(err),
    };
    let params = query_params_map(query.as_deref());
    let result =
        perform_operation(&state, version, tenant.tenant_id, OperationScope::Instance, Some(rtype), Some(id), name.to_string(), Some(parsed_body), params).await;
    operation_response(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_entry_url_separates_type_and_id() {
        assert_eq!(split_entry_url("Patient/123").unwrap(), ("Patient".to_string(), Some("123".to_string())));
        assert_eq!(split_entry_url("Patient").unwrap(), ("Patient".to_string(), None));
    }

    #[test]
    fn split_entry_url_rejects_operation_segments() {
        assert!(split_entry_url("Patient/$everything").is_err());
    }

    #[test]
    fn versioned_location_keeps_callers_literal_version_token() {
        assert_eq!(versioned_location(Some("R4B"), "Patient", "1", "2"), "/fhir/R4B/Patient/1/_history/2");
        assert_eq!(versioned_location(None, "Patient", "1", "2"), "/fhir/Patient/1/_history/2");
    }

    #[test]
    fn parse_if_match_strips_weak_quoting() {
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_MATCH, HeaderValue::from_static("W/\"3\""));
        assert_eq!(parse_if_match(&headers), Some("3".to_string()));
    }
}
