//! End-to-end coverage of the HTTP surface, driven against a real bound
//! `TcpListener` with [`MemoryStorage`] standing in for Postgres.

use std::sync::Arc;

use async_trait::async_trait;
use octofhir_config::resource_registry::{ResourceConfigDoc, SchemaDoc, VersionEntry};
use octofhir_config::{ResourceRegistry, StaticTenantSource, TenantRecord};
use octofhir_core::{CoreError, FhirVersion};
use octofhir_db_postgres::PostgresConfig;
use octofhir_search::{SearchParameter, SearchParameterRegistry, SearchParameterType, register_common_parameters};
use octofhir_server::config::AppConfig;
use octofhir_server::validation::{ExternalValidator, ValidationIssue, ValidationOutcome};
use octofhir_server::ServerBuilder;
use octofhir_storage::MemoryStorage;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Rejects a `Patient` whose `gender` isn't one of the four administrative
/// codes, the way a real FHIRSchema-backed validator would.
struct GenderEnumValidator;

#[async_trait]
impl ExternalValidator for GenderEnumValidator {
    async fn validate(&self, document: &Value, _version: FhirVersion, _profile_url: Option<&str>) -> Result<ValidationOutcome, CoreError> {
        if document.get("resourceType").and_then(Value::as_str) != Some("Patient") {
            return Ok(ValidationOutcome::success());
        }
        match document.get("gender").and_then(Value::as_str) {
            None | Some("male") | Some("female") | Some("other") | Some("unknown") => Ok(ValidationOutcome::success()),
            Some(other) => Ok(ValidationOutcome {
                issues: vec![ValidationIssue::error("value", format!("'{other}' is not a valid administrative gender")).with_path("Patient.gender")],
            }),
        }
    }
}

fn patient_doc() -> ResourceConfigDoc {
    ResourceConfigDoc {
        resource_type: "Patient".to_string(),
        enabled: None,
        versions: vec![
            VersionEntry { version: "R4B".to_string(), default: true },
            VersionEntry { version: "R5".to_string(), default: false },
        ],
        interactions: vec!["read", "vread", "create", "update", "patch", "delete", "search", "history"]
            .into_iter()
            .map(String::from)
            .collect(),
        search_params: None,
        schema: None,
        profiles: vec![],
    }
}

/// Only `read`/`search` enabled, for the disabled-interaction (405) case.
fn observation_doc() -> ResourceConfigDoc {
    ResourceConfigDoc {
        resource_type: "Observation".to_string(),
        enabled: None,
        versions: vec![VersionEntry { version: "R4B".to_string(), default: true }],
        interactions: vec!["read".to_string(), "search".to_string()],
        search_params: None,
        schema: Some(SchemaDoc::Dedicated { name: "obs_schema".to_string() }),
        profiles: vec![],
    }
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    // `ServerBuilder::build` requires a postgres block to pass `validate()`
    // even when a storage backend is injected via `with_storage`.
    config.storage.postgres = Some(PostgresConfig::default());
    config.fhir.multi_tenant = true;
    config
}

fn test_search_registry() -> SearchParameterRegistry {
    let mut registry = SearchParameterRegistry::new();
    register_common_parameters(&mut registry);
    registry.register(
        SearchParameter::new("family", "http://hl7.org/fhir/SearchParameter/Patient-family", SearchParameterType::String, "Patient")
            .with_expression("Patient.name.family"),
    );
    registry
}

async fn start_server(config: AppConfig, tenants: Vec<TenantRecord>) -> (String, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    let registry = ResourceRegistry::from_docs(vec![patient_doc(), observation_doc()]).expect("build registry");

    let server = ServerBuilder::new(config)
        .with_storage(Arc::new(MemoryStorage::new()))
        .with_validator(Box::new(GenderEnumValidator))
        .build()
        .await
        .expect("assemble server");

    let mut state = server.state;
    state.resource_registry = Arc::new(registry);
    state.search_registry = Arc::new(test_search_registry());
    state.tenant_resolver = Arc::new(octofhir_config::TenantResolver::new(Arc::new(StaticTenantSource::new(tenants))));

    let app = octofhir_server::build_app(state);
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await.expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).with_graceful_shutdown(async move { let _ = rx.await; }).await;
    });

    (format!("http://{addr}"), tx, handle)
}

#[tokio::test]
async fn crud_lifecycle_progresses_versions_and_headers() {
    let tenant_id = Uuid::new_v4();
    let config = test_config();
    let (base, shutdown, handle) = start_server(config, vec![TenantRecord { external_id: tenant_id, internal_id: "1".to_string(), enabled: true }]).await;
    let client = reqwest::Client::new();

    let create_resp = client
        .post(format!("{base}/fhir/R4B/Patient"))
        .header("x-tenant-id", tenant_id.to_string())
        .header("content-type", "application/fhir+json")
        .json(&json!({"resourceType": "Patient", "gender": "female"}))
        .send()
        .await
        .unwrap();
    assert_eq!(create_resp.status(), 201);
    let location = create_resp.headers().get("location").unwrap().to_str().unwrap().to_string();
    assert!(location.contains("/Patient/"));
    assert!(location.ends_with("/_history/1"));
    let created: Value = create_resp.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["meta"]["versionId"], "1");

    let read_resp = client
        .get(format!("{base}/fhir/R4B/Patient/{id}"))
        .header("x-tenant-id", tenant_id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(read_resp.status(), 200);
    assert!(read_resp.headers().get("etag").is_some());

    let update_resp = client
        .put(format!("{base}/fhir/R4B/Patient/{id}"))
        .header("x-tenant-id", tenant_id.to_string())
        .header("content-type", "application/fhir+json")
        .json(&json!({"resourceType": "Patient", "id": id, "gender": "male"}))
        .send()
        .await
        .unwrap();
    assert_eq!(update_resp.status(), 200);
    let updated: Value = update_resp.json().await.unwrap();
    assert_eq!(updated["meta"]["versionId"], "2");

    let patch_resp = client
        .patch(format!("{base}/fhir/R4B/Patient/{id}"))
        .header("x-tenant-id", tenant_id.to_string())
        .header("content-type", "application/json-patch+json")
        .json(&json!([{"op": "replace", "path": "/gender", "value": "unknown"}]))
        .send()
        .await
        .unwrap();
    assert_eq!(patch_resp.status(), 200);
    let patched: Value = patch_resp.json().await.unwrap();
    assert_eq!(patched["gender"], "unknown");
    assert_eq!(patched["meta"]["versionId"], "3");

    let delete_resp = client.delete(format!("{base}/fhir/R4B/Patient/{id}")).header("x-tenant-id", tenant_id.to_string()).send().await.unwrap();
    assert_eq!(delete_resp.status(), 204);

    let gone_resp = client.get(format!("{base}/fhir/R4B/Patient/{id}")).header("x-tenant-id", tenant_id.to_string()).send().await.unwrap();
    assert_eq!(gone_resp.status(), 410);

    let _ = shutdown.send(());
    handle.abort();
}

#[tokio::test]
async fn invalid_enum_value_is_rejected_with_422() {
    let tenant_id = Uuid::new_v4();
    let config = test_config();
    let (base, shutdown, handle) = start_server(config, vec![TenantRecord { external_id: tenant_id, internal_id: "1".to_string(), enabled: true }]).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/fhir/R4B/Patient"))
        .header("x-tenant-id", tenant_id.to_string())
        .header("content-type", "application/fhir+json")
        .json(&json!({"resourceType": "Patient", "gender": "not-a-real-code"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["resourceType"], "OperationOutcome");
    assert_eq!(body["issue"][0]["severity"], "error");

    let _ = shutdown.send(());
    handle.abort();
}

#[tokio::test]
async fn search_matches_substring_against_stored_content() {
    let tenant_id = Uuid::new_v4();
    let config = test_config();
    let (base, shutdown, handle) = start_server(config, vec![TenantRecord { external_id: tenant_id, internal_id: "1".to_string(), enabled: true }]).await;
    let client = reqwest::Client::new();

    for family in ["Smith", "Jones"] {
        client
            .post(format!("{base}/fhir/R4B/Patient"))
            .header("x-tenant-id", tenant_id.to_string())
            .header("content-type", "application/fhir+json")
            .json(&json!({"resourceType": "Patient", "name": [{"family": family}]}))
            .send()
            .await
            .unwrap();
    }

    let resp = client
        .get(format!("{base}/fhir/R4B/Patient?family=smith"))
        .header("x-tenant-id", tenant_id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let bundle: Value = resp.json().await.unwrap();
    assert_eq!(bundle["resourceType"], "Bundle");
    assert_eq!(bundle["type"], "searchset");
    let entries = bundle["entry"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["resource"]["name"][0]["family"], "Smith");

    let _ = shutdown.send(());
    handle.abort();
}

#[tokio::test]
async fn unknown_search_parameter_is_rejected() {
    let tenant_id = Uuid::new_v4();
    let config = test_config();
    let (base, shutdown, handle) = start_server(config, vec![TenantRecord { external_id: tenant_id, internal_id: "1".to_string(), enabled: true }]).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{base}/fhir/R4B/Patient?not-a-real-param=1"))
        .header("x-tenant-id", tenant_id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let _ = shutdown.send(());
    handle.abort();
}

#[tokio::test]
async fn tenants_cannot_see_each_others_resources() {
    let tenant_a = Uuid::new_v4();
    let tenant_b = Uuid::new_v4();
    let config = test_config();
    let (base, shutdown, handle) = start_server(
        config,
        vec![
            TenantRecord { external_id: tenant_a, internal_id: "1".to_string(), enabled: true },
            TenantRecord { external_id: tenant_b, internal_id: "2".to_string(), enabled: true },
        ],
    )
    .await;
    let client = reqwest::Client::new();

    let create_resp = client
        .post(format!("{base}/fhir/R4B/Patient"))
        .header("x-tenant-id", tenant_a.to_string())
        .header("content-type", "application/fhir+json")
        .json(&json!({"resourceType": "Patient"}))
        .send()
        .await
        .unwrap();
    let created: Value = create_resp.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let cross_tenant_resp = client
        .get(format!("{base}/fhir/R4B/Patient/{id}"))
        .header("x-tenant-id", tenant_b.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(cross_tenant_resp.status(), 404);

    let same_tenant_resp = client
        .get(format!("{base}/fhir/R4B/Patient/{id}"))
        .header("x-tenant-id", tenant_a.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(same_tenant_resp.status(), 200);

    let missing_header_resp = client.get(format!("{base}/fhir/R4B/Patient/{id}")).send().await.unwrap();
    assert_eq!(missing_header_resp.status(), 400);

    let _ = shutdown.send(());
    handle.abort();
}

#[tokio::test]
async fn disabled_interaction_returns_405() {
    let tenant_id = Uuid::new_v4();
    let config = test_config();
    let (base, shutdown, handle) = start_server(config, vec![TenantRecord { external_id: tenant_id, internal_id: "1".to_string(), enabled: true }]).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/fhir/R4B/Observation"))
        .header("x-tenant-id", tenant_id.to_string())
        .header("content-type", "application/fhir+json")
        .json(&json!({"resourceType": "Observation"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 405);

    let _ = shutdown.send(());
    handle.abort();
}

#[tokio::test]
async fn transaction_bundle_aborts_on_first_failure() {
    let tenant_id = Uuid::new_v4();
    let config = test_config();
    let (base, shutdown, handle) = start_server(config, vec![TenantRecord { external_id: tenant_id, internal_id: "1".to_string(), enabled: true }]).await;
    let client = reqwest::Client::new();

    let bundle = json!({
        "resourceType": "Bundle",
        "type": "transaction",
        "entry": [
            {"request": {"method": "POST", "url": "Patient"}, "resource": {"resourceType": "Patient"}},
            {"request": {"method": "POST", "url": "Observation"}, "resource": {"resourceType": "Observation"}},
        ]
    });

    let resp = client
        .post(format!("{base}/fhir/R4B"))
        .header("x-tenant-id", tenant_id.to_string())
        .header("content-type", "application/fhir+json")
        .json(&bundle)
        .send()
        .await
        .unwrap();
    // Observation only permits read/search, so the second entry's implicit
    // `create` guard check fails and the whole transaction is rejected; the
    // per-entry 405 is wrapped into a bundle-level validation error.
    assert_eq!(resp.status(), 400);

    let _ = shutdown.send(());
    handle.abort();
}

#[tokio::test]
async fn transaction_bundle_rolls_back_earlier_entries_on_later_failure() {
    let tenant_id = Uuid::new_v4();
    let config = test_config();
    let (base, shutdown, handle) = start_server(config, vec![TenantRecord { external_id: tenant_id, internal_id: "1".to_string(), enabled: true }]).await;
    let client = reqwest::Client::new();

    let before_count = client
        .get(format!("{base}/fhir/R4B/Patient"))
        .header("x-tenant-id", tenant_id.to_string())
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap()["total"]
        .as_u64()
        .unwrap();

    let bundle = json!({
        "resourceType": "Bundle",
        "type": "transaction",
        "entry": [
            {"request": {"method": "POST", "url": "Patient"}, "resource": {"resourceType": "Patient", "name": [{"family": "Rollback"}]}},
            {"request": {"method": "POST", "url": "Observation"}, "resource": {"resourceType": "Observation"}},
        ]
    });

    let resp = client
        .post(format!("{base}/fhir/R4B"))
        .header("x-tenant-id", tenant_id.to_string())
        .header("content-type", "application/fhir+json")
        .json(&bundle)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let after_count = client
        .get(format!("{base}/fhir/R4B/Patient"))
        .header("x-tenant-id", tenant_id.to_string())
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap()["total"]
        .as_u64()
        .unwrap();

    assert_eq!(before_count, after_count, "the first entry's create must not survive the second entry's failure");

    let _ = shutdown.send(());
    handle.abort();
}

#[tokio::test]
async fn batch_bundle_runs_every_entry_independently() {
    let tenant_id = Uuid::new_v4();
    let config = test_config();
    let (base, shutdown, handle) = start_server(config, vec![TenantRecord { external_id: tenant_id, internal_id: "1".to_string(), enabled: true }]).await;
    let client = reqwest::Client::new();

    let bundle = json!({
        "resourceType": "Bundle",
        "type": "batch",
        "entry": [
            {"request": {"method": "POST", "url": "Patient"}, "resource": {"resourceType": "Patient"}},
            {"request": {"method": "POST", "url": "Observation"}, "resource": {"resourceType": "Observation"}},
        ]
    });

    let resp = client
        .post(format!("{base}/fhir/R4B"))
        .header("x-tenant-id", tenant_id.to_string())
        .header("content-type", "application/fhir+json")
        .json(&bundle)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let doc: Value = resp.json().await.unwrap();
    let entries = doc["entry"].as_array().unwrap();
    assert_eq!(entries[0]["response"]["status"], "201");
    assert_eq!(entries[1]["response"]["status"], "405");

    let _ = shutdown.send(());
    handle.abort();
}

#[tokio::test]
async fn metadata_is_served_without_a_tenant_header() {
    let mut config = test_config();
    config.fhir.multi_tenant = false;
    let (base, shutdown, handle) = start_server(config, vec![]).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/fhir/R4B/metadata")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let doc: Value = resp.json().await.unwrap();
    assert_eq!(doc["resourceType"], "CapabilityStatement");

    let _ = shutdown.send(());
    handle.abort();
}
