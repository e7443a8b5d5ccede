//! PostgreSQL implementation of [`FhirStorage`] (C6) wired to the schema
//! router (C5) and the search translator (C7's SQL execution, §4.5, §4.6).

use std::sync::Arc;

use async_trait::async_trait;
use octofhir_config::resource_registry::ResourceRegistry;
use octofhir_core::{FhirVersion, ResourceRow};
use octofhir_search::SearchParameterRegistry;
use octofhir_storage::{
    FhirStorage, HistoryParams, HistoryResult, SearchParams, SearchResult, StorageError,
    Transaction,
};
use serde_json::Value;
use sqlx_postgres::PgPool;

use crate::config::PostgresConfig;
use crate::migrations;
use crate::pool;
use crate::queries;
use crate::schema::{SchemaManager, SchemaRouter, StaticSchemaRouter};
use crate::transaction::PostgresTransaction;

/// PostgreSQL storage backend for FHIR resources (C6).
///
/// Schema placement (C5) is delegated to a [`SchemaRouter`]; the default is
/// [`StaticSchemaRouter`], routing every resource type to `public`. A
/// deployment with dedicated-schema resource types supplies a router backed
/// by the resource registry (C1) instead.
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
    schema_manager: SchemaManager,
    schema_router: Arc<dyn SchemaRouter>,
    search_registry: Arc<SearchParameterRegistry>,
    resource_registry: Arc<ResourceRegistry>,
    default_count: usize,
    max_count: usize,
}

impl PostgresStorage {
    /// Creates a new `PostgresStorage`, running migrations for every schema
    /// `schema_router` can route a resource type to (`known_schemas`) when
    /// `config.run_migrations` is set.
    pub async fn new(
        config: PostgresConfig,
        schema_router: Arc<dyn SchemaRouter>,
        search_registry: Arc<SearchParameterRegistry>,
        resource_registry: Arc<ResourceRegistry>,
        known_schemas: impl IntoIterator<Item = String>,
    ) -> Result<Self, StorageError> {
        let pool = pool::create_pool(&config).await.map_err(StorageError::from)?;

        if config.run_migrations {
            migrations::run(&pool, known_schemas)
                .await
                .map_err(StorageError::from)?;
        }

        Ok(Self::from_pool(pool, schema_router, search_registry, resource_registry))
    }

    /// Builds a storage instance from an existing pool, for sharing one pool
    /// across several components. Migrations are the caller's responsibility.
    #[must_use]
    pub fn from_pool(
        pool: PgPool,
        schema_router: Arc<dyn SchemaRouter>,
        search_registry: Arc<SearchParameterRegistry>,
        resource_registry: Arc<ResourceRegistry>,
    ) -> Self {
        let schema_manager = SchemaManager::new(pool.clone());
        Self {
            pool,
            schema_manager,
            schema_router,
            search_registry,
            resource_registry,
            default_count: 20,
            max_count: 1000,
        }
    }

    /// Overrides the default/max `_count` values the search translator uses
    /// (§4.6 "default 20, clamped to an implementation-chosen maximum").
    #[must_use]
    pub fn with_count_limits(mut self, default_count: usize, max_count: usize) -> Self {
        self.default_count = default_count;
        self.max_count = max_count;
        self
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[must_use]
    pub fn schema_manager(&self) -> &SchemaManager {
        &self.schema_manager
    }
}

#[async_trait]
impl FhirStorage for PostgresStorage {
    async fn create(
        &self,
        tenant_id: i64,
        resource_type: &str,
        fhir_version: FhirVersion,
        resource: &Value,
    ) -> Result<ResourceRow, StorageError> {
        let schema = self.schema_router.schema_for(resource_type);
        queries::crud::create(&self.pool, &schema, tenant_id, resource_type, fhir_version, resource).await
    }

    async fn read(
        &self,
        tenant_id: i64,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<ResourceRow>, StorageError> {
        let schema = self.schema_router.schema_for(resource_type);
        queries::crud::read(&self.pool, &schema, tenant_id, resource_type, id).await
    }

    async fn update(
        &self,
        tenant_id: i64,
        resource_type: &str,
        id: &str,
        resource: &Value,
        if_match: Option<&str>,
    ) -> Result<ResourceRow, StorageError> {
        let schema = self.schema_router.schema_for(resource_type);
        queries::crud::update(&self.pool, &schema, tenant_id, resource_type, id, resource, if_match).await
    }

    async fn delete(
        &self,
        tenant_id: i64,
        resource_type: &str,
        id: &str,
    ) -> Result<ResourceRow, StorageError> {
        let schema = self.schema_router.schema_for(resource_type);
        queries::crud::delete(&self.pool, &schema, tenant_id, resource_type, id).await
    }

    async fn vread(
        &self,
        tenant_id: i64,
        resource_type: &str,
        id: &str,
        version_id: &str,
    ) -> Result<Option<ResourceRow>, StorageError> {
        let schema = self.schema_router.schema_for(resource_type);
        queries::crud::vread(&self.pool, &schema, tenant_id, resource_type, id, version_id).await
    }

    async fn history(
        &self,
        tenant_id: i64,
        resource_type: &str,
        id: Option<&str>,
        params: &HistoryParams,
    ) -> Result<HistoryResult, StorageError> {
        let schema = self.schema_router.schema_for(resource_type);
        queries::history::history(&self.pool, &schema, tenant_id, resource_type, id, params).await
    }

    async fn search(
        &self,
        tenant_id: i64,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError> {
        let schema = self.schema_router.schema_for(resource_type);
        queries::search::search(
            &self.pool,
            &schema,
            &self.search_registry,
            &self.resource_registry,
            tenant_id,
            resource_type,
            params,
            self.default_count,
            self.max_count,
        )
        .await
    }

    async fn begin_transaction(&self, tenant_id: i64) -> Result<Box<dyn Transaction>, StorageError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::connection_error(e.to_string()))?;
        Ok(Box::new(PostgresTransaction::new(tx, self.schema_router.clone(), tenant_id)))
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

impl std::fmt::Debug for PostgresStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStorage")
            .field("backend", &"postgres")
            .finish_non_exhaustive()
    }
}

/// Convenience constructor for deployments with no dedicated-schema types.
#[must_use]
pub fn static_schema_router() -> Arc<dyn SchemaRouter> {
    Arc::new(StaticSchemaRouter)
}
