use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use axum::response::IntoResponse;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error_response::{operation_outcome_for_error, status_for_error};
use crate::server::AppState;
use octofhir_core::CoreError;

/// The internal tenant id resolved for this request (C3), attached to the
/// request so handlers never re-parse the tenant header (§4.3).
#[derive(Debug, Clone, Copy)]
pub struct TenantContext {
    pub tenant_id: i64,
}

const TENANT_HEADER: &str = "x-tenant-id";

/// Resolves the tenant header into a [`TenantContext`] (§6 "Tenant header").
///
/// In single-tenant deployments (`fhir.multi_tenant = false`) every request
/// is scoped to the fixed internal tenant id `1` and no header is required.
pub async fn tenant_resolution(State(state): State<AppState>, mut req: Request<Body>, next: Next) -> Response {
    if !state.multi_tenant {
        req.extensions_mut().insert(TenantContext { tenant_id: 1 });
        return next.run(req).await;
    }

    let header = req.headers().get(TENANT_HEADER).and_then(|v| v.to_str().ok());
    let Some(raw) = header else {
        return core_error_response(CoreError::tenant_header_invalid(format!("missing '{TENANT_HEADER}' header")));
    };
    let Ok(external_id) = Uuid::parse_str(raw) else {
        return core_error_response(CoreError::tenant_header_invalid(format!("'{TENANT_HEADER}' is not a valid UUID")));
    };

    let record = match state.tenant_resolver.resolve(external_id).await {
        Ok(record) => record,
        Err(err) => return core_error_response(err),
    };
    let tenant_id = match record.internal_id.parse::<i64>() {
        Ok(id) => id,
        Err(_) => return core_error_response(CoreError::configuration(format!("tenant internal id '{}' is not numeric", record.internal_id))),
    };

    req.extensions_mut().insert(TenantContext { tenant_id });
    next.run(req).await
}

fn core_error_response(err: CoreError) -> Response {
    let status = StatusCode::from_u16(status_for_error(&err)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(operation_outcome_for_error(&err))).into_response()
}

/// Converts a `tower::timeout::error::Elapsed` (or any other boxed layer
/// error) into the outcome document §7 requires on every failure path.
pub async fn handle_layer_error(err: axum::BoxError) -> Response {
    if err.is::<tower::timeout::error::Elapsed>() {
        return core_error_response(CoreError::timeout("request exceeded its deadline"));
    }
    core_error_response(CoreError::internal(err.to_string()))
}

// Middleware that ensures each request has an X-Request-Id and mirrors it on the response
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static("x-request-id");

    // If the incoming request already has a request-id, preserve it; otherwise generate one
    let req_id_value = req
        .headers()
        .get(&header_name)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_str(&Uuid::new_v4().to_string()).unwrap());

    // Add to request extensions for downstream usage (e.g., logging)
    req.extensions_mut().insert(req_id_value.clone());

    let mut res = next.run(req).await;

    // Add/propagate the request id header to response
    res.headers_mut().insert(header_name.clone(), req_id_value);

    res
}

// Content negotiation middleware: accept FHIR JSON and plain JSON for Accept,
// and require one of them for POST/PUT Content-Type.
pub async fn content_negotiation(req: Request<Body>, next: Next) -> Response {
    let accepts_hdr = req.headers().get("accept").and_then(|v| v.to_str().ok());
    let accept_ok = accepts_hdr.map(|v| {
        let v = v.to_ascii_lowercase();
        v.contains("application/fhir+json") || v.contains("application/json") || v.contains("*/*")
    }).unwrap_or(true); // if missing, treat as ok per HTTP defaults

    if !accept_ok {
        return error_response(StatusCode::UNSUPPORTED_MEDIA_TYPE, "Only JSON is supported (application/fhir+json or application/json) in Accept");
    }

    let method = req.method().clone();
    let needs_body_type = method == axum::http::Method::POST || method == axum::http::Method::PUT;

    if needs_body_type {
        let content_type = req
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_ascii_lowercase());
        let content_ok = content_type.as_deref().map(|s| {
            s.starts_with("application/fhir+json")
                || s.starts_with("application/json")
                || s.starts_with("application/x-www-form-urlencoded")
        }).unwrap_or(false);
        if !content_ok {
            return error_response(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "Content-Type must be application/fhir+json, application/json, or (for `_search`) application/x-www-form-urlencoded",
            );
        }
    }

    next.run(req).await
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    let body: Value = json!({
        "resourceType": "OperationOutcome",
        "issue": [{
            "severity": "error",
            "code": "invalid",
            "diagnostics": msg,
        }]
    });
    (status, Json(body)).into_response()
}
