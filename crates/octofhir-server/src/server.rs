//! Server assembly (§5, §6): wires the registries, storage backend, search
//! translator, plugin orchestrator, and operation/conformance tables built
//! elsewhere in this crate into one shared [`AppState`] and an axum
//! [`Router`].

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use octofhir_config::resource_registry::{ResourceRegistry, SchemaPlacement};
use octofhir_config::{load_resource_registry, load_tenant_records, StaticTenantSource, TenantRecord, TenantResolver};
use octofhir_core::{CoreError, FhirVersion};
use octofhir_db_postgres::{DEFAULT_SCHEMA, PostgresStorage, SchemaRouter};
use octofhir_search::{load_bundle, register_common_parameters, SearchParameterRegistry};
use octofhir_storage::{FhirStorage, StorageError};

use crate::cache::TenantCache;
use crate::config::AppConfig;
use crate::conformance_store::{ConformanceArtifact, ConformanceArtifactStore};
use crate::operations::{DynOperationHandler, OperationRegistry, OperationScope};
use crate::plugin::{Plugin, PluginOrchestrator};
use crate::validation::{AlwaysValidValidator, ExternalValidator, ValidationFacade};

/// Everything a handler needs to serve a request, shared across the whole
/// process behind `Arc`s (§5).
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn FhirStorage>,
    pub resource_registry: Arc<ResourceRegistry>,
    pub search_registry: Arc<SearchParameterRegistry>,
    pub tenant_resolver: Arc<TenantResolver>,
    pub operation_registry: Arc<OperationRegistry>,
    pub conformance_store: Arc<ConformanceArtifactStore>,
    pub orchestrator: Arc<PluginOrchestrator>,
    pub validation: Arc<ValidationFacade>,
    pub default_version: FhirVersion,
    pub multi_tenant: bool,
    pub default_count: usize,
    pub max_count: usize,
}

/// Bridges the resource registry's schema placement (C1, §3) to the
/// Postgres backend's schema router (C5).
#[derive(Debug)]
struct RegistryBackedSchemaRouter {
    registry: Arc<ResourceRegistry>,
}

impl SchemaRouter for RegistryBackedSchemaRouter {
    fn schema_for(&self, resource_type: &str) -> String {
        match self.registry.schema_placement(resource_type) {
            SchemaPlacement::Shared => DEFAULT_SCHEMA.to_string(),
            SchemaPlacement::Dedicated(name) => name,
        }
    }
}

/// Translates a storage-layer failure into the error taxonomy the rest of
/// the request pipeline speaks (§7, §9). `resource_type`/`id` fill in the
/// context [`StorageError::VersionConflict`]/[`StorageError::AlreadyExists`]
/// don't carry themselves.
pub(crate) fn core_error_from_storage(resource_type: &str, id: &str, err: StorageError) -> CoreError {
    match err {
        StorageError::NotFound { resource_type, id } => CoreError::resource_not_found(resource_type, id),
        StorageError::Gone { resource_type, id } => CoreError::resource_gone(resource_type, id),
        StorageError::VersionConflict { expected, actual } => {
            CoreError::version_conflict(resource_type.to_string(), id.to_string(), expected, actual)
        }
        StorageError::AlreadyExists { resource_type, id } => {
            CoreError::version_conflict(resource_type, id, "none".to_string(), "exists".to_string())
        }
        StorageError::InvalidResource { message } => CoreError::invalid_resource(message),
        StorageError::TransactionError { message } => CoreError::not_supported(message),
        StorageError::TransactionsNotSupported => CoreError::not_supported("transactions are not supported by this backend"),
        StorageError::ConnectionError { message } => CoreError::internal(format!("connection error: {message}")),
        StorageError::Internal { message } => CoreError::internal(message),
    }
}

/// Assembles an [`OctofhirServer`] from configuration plus whatever a
/// deployment registers on top of the defaults (custom storage for tests,
/// an external validator, `$operation` handlers, conformance artifacts,
/// extra plugins).
pub struct ServerBuilder {
    config: AppConfig,
    storage: Option<Arc<dyn FhirStorage>>,
    validator: Option<Box<dyn ExternalValidator>>,
    operations: OperationRegistry,
    conformance_artifacts: Vec<ConformanceArtifact>,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl ServerBuilder {
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            storage: None,
            validator: None,
            operations: OperationRegistry::new(),
            conformance_artifacts: Vec::new(),
            plugins: Vec::new(),
        }
    }

    /// Supplies a storage backend directly, bypassing the Postgres
    /// connection this builder would otherwise open from `config.storage`.
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn FhirStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    #[must_use]
    pub fn with_validator(mut self, validator: Box<dyn ExternalValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    #[must_use]
    pub fn with_operation(
        mut self,
        name: impl Into<String>,
        scope: OperationScope,
        resource_type: Option<String>,
        handler: DynOperationHandler,
    ) -> Self {
        self.operations.register(name, scope, resource_type, handler);
        self
    }

    #[must_use]
    pub fn with_conformance_artifact(mut self, artifact: ConformanceArtifact) -> Self {
        self.conformance_artifacts.push(artifact);
        self
    }

    #[must_use]
    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Loads the registries, opens storage if none was injected, and
    /// returns a server ready to build a [`Router`] or run directly.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] if the config fails validation
    /// or a registry file can't be loaded/parsed, and whatever error the
    /// storage backend raises while connecting.
    pub async fn build(self) -> Result<OctofhirServer, CoreError> {
        self.config.validate().map_err(CoreError::configuration)?;

        let resource_registry = Arc::new(match &self.config.fhir.resource_config_path {
            Some(path) => load_resource_registry(Path::new(path)).map_err(|e| CoreError::configuration(e.to_string()))?,
            None => ResourceRegistry::from_docs(std::iter::empty()).map_err(|e| CoreError::configuration(e.to_string()))?,
        });

        let mut search_registry = SearchParameterRegistry::new();
        register_common_parameters(&mut search_registry);
        if let Some(path) = &self.config.fhir.search_parameter_bundle_path {
            let raw = std::fs::read_to_string(path).map_err(|e| CoreError::configuration(format!("reading {path}: {e}")))?;
            let doc: serde_json::Value = serde_json::from_str(&raw).map_err(|e| CoreError::configuration(e.to_string()))?;
            load_bundle(&mut search_registry, &doc).map_err(|e| CoreError::configuration(e.to_string()))?;
        }
        let search_registry = Arc::new(search_registry);

        let tenant_records: Vec<TenantRecord> = match (self.config.fhir.multi_tenant, &self.config.fhir.tenant_config_path) {
            (true, Some(path)) => load_tenant_records(Path::new(path)).map_err(|e| CoreError::configuration(e.to_string()))?,
            _ => Vec::new(),
        };
        let tenant_resolver = Arc::new(TenantResolver::new(Arc::new(StaticTenantSource::new(tenant_records))));

        let schema_router: Arc<dyn SchemaRouter> = Arc::new(RegistryBackedSchemaRouter { registry: resource_registry.clone() });
        let known_schemas: Vec<String> = std::iter::once(DEFAULT_SCHEMA.to_string())
            .chain(resource_registry.enabled_resource_types().into_iter().map(|rt| schema_router.schema_for(rt)))
            .collect();

        let storage: Arc<dyn FhirStorage> = match self.storage {
            Some(storage) => storage,
            None => {
                let pg_config = self
                    .config
                    .storage
                    .postgres
                    .clone()
                    .ok_or_else(|| CoreError::configuration("storage.postgres is required"))?;
                let backend = PostgresStorage::new(
                    pg_config,
                    schema_router,
                    search_registry.clone(),
                    resource_registry.clone(),
                    known_schemas,
                )
                .await
                .map_err(|e| CoreError::internal(e.to_string()))?
                .with_count_limits(self.config.search.default_count, self.config.search.max_count);
                Arc::new(backend)
            }
        };

        let conformance_store = Arc::new(ConformanceArtifactStore::from_artifacts(self.conformance_artifacts));
        let operation_registry = Arc::new(self.operations);

        let cache = Arc::new(TenantCache::new(self.config.cache_ttl()));
        let mut orchestrator = PluginOrchestrator::new(cache);
        orchestrator.register(Arc::new(crate::audit::TracingAuditLogger));
        for plugin in self.plugins {
            orchestrator.register(plugin);
        }
        let orchestrator = Arc::new(orchestrator);

        let validator = self.validator.unwrap_or_else(|| Box::new(AlwaysValidValidator));
        let validation = Arc::new(ValidationFacade::new(validator));

        let default_version = self
            .config
            .fhir
            .default_version
            .parse::<FhirVersion>()
            .map_err(|e| CoreError::configuration(e.to_string()))?;

        let state = AppState {
            storage,
            resource_registry,
            search_registry,
            tenant_resolver,
            operation_registry,
            conformance_store,
            orchestrator,
            validation,
            default_version,
            multi_tenant: self.config.fhir.multi_tenant,
            default_count: self.config.search.default_count,
            max_count: self.config.search.max_count,
        };

        Ok(OctofhirServer { state, addr: self.config.addr() })
    }
}

/// An assembled server: shared state plus a bind address. `router()` is
/// what test code exercises directly; `run()` is what `main.rs` calls.
pub struct OctofhirServer {
    pub state: AppState,
    addr: SocketAddr,
}

impl OctofhirServer {
    #[must_use]
    pub fn router(&self) -> Router {
        build_app(self.state.clone())
    }

    pub async fn run(self) -> std::io::Result<()> {
        let app = build_app(self.state.clone());
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!(addr = %self.addr, "octofhir-server listening");
        axum::serve(listener, app).await
    }
}

/// Builds the axum [`Router`] (§6 URL surface) around a given [`AppState`].
/// Split out from [`OctofhirServer::router`] so tests can build a router
/// against hand-assembled state without going through [`ServerBuilder`].
#[must_use]
pub fn build_app(state: AppState) -> Router {
    use crate::handlers;

    let error_handling = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(crate::middleware::handle_layer_error))
        .timeout(Duration::from_secs(30));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/fhir/{version}/metadata", get(handlers::metadata))
        .route("/fhir/metadata", get(handlers::metadata_default))
        .route("/fhir/{version}", post(handlers::bundle))
        .route("/fhir", post(handlers::bundle_default))
        .route("/fhir/{version}/{rtype}/_search", post(handlers::search_via_post))
        .route("/fhir/{rtype}/_search", post(handlers::search_via_post_default))
        .route("/fhir/{version}/{seg}", get(handlers::type_level_get).post(handlers::type_level_post))
        .route("/fhir/{seg}", get(handlers::type_level_get_default).post(handlers::type_level_post_default))
        .route("/fhir/{version}/{rtype}/{id}/_history", get(handlers::history_instance))
        .route("/fhir/{rtype}/{id}/_history", get(handlers::history_instance_default))
        .route("/fhir/{version}/{rtype}/{id}/_history/{vid}", get(handlers::vread))
        .route("/fhir/{rtype}/{id}/_history/{vid}", get(handlers::vread_default))
        .route(
            "/fhir/{version}/{rtype}/{seg}",
            get(handlers::instance_level_get)
                .post(handlers::instance_level_post)
                .put(handlers::instance_put)
                .patch(handlers::instance_patch)
                .delete(handlers::instance_delete),
        )
        .route(
            "/fhir/{rtype}/{seg}",
            get(handlers::instance_level_get_default)
                .post(handlers::instance_level_post_default)
                .put(handlers::instance_put_default)
                .patch(handlers::instance_patch_default)
                .delete(handlers::instance_delete_default),
        )
        .route(
            "/fhir/{version}/{rtype}/{id}/{op}",
            get(handlers::instance_operation_get).post(handlers::instance_operation_post),
        )
        .route(
            "/fhir/{rtype}/{id}/{op}",
            get(handlers::instance_operation_get_default).post(handlers::instance_operation_post_default),
        )
        .layer(axum::middleware::from_fn_with_state(state.clone(), crate::middleware::tenant_resolution))
        .layer(axum::middleware::from_fn(crate::middleware::content_negotiation))
        .layer(axum::middleware::from_fn(crate::middleware::request_id))
        .layer(error_handling)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
