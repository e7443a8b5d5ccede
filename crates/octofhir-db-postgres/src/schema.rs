//! Schema router (C5, §4.5): decides which Postgres schema a resource
//! type's `resources` table lives in — the shared `public` schema by
//! default, or a dedicated schema for resource types configured that way.
//! Schema names are never taken from request input, but they are still
//! validated against a plain-identifier allowlist before being spliced into
//! DDL, closing off schema-name-based SQL injection (§4.5).

use std::sync::OnceLock;

use regex::Regex;
use sqlx_core::query::query;
use sqlx_postgres::PgPool;

use crate::error::{PostgresError, Result};

/// Schema used for resource types without a dedicated one.
pub const DEFAULT_SCHEMA: &str = "public";

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("valid regex"))
}

/// Rejects anything that isn't a plain SQL identifier.
pub fn validate_schema_name(name: &str) -> Result<()> {
    if identifier_re().is_match(name) {
        Ok(())
    } else {
        Err(PostgresError::config(format!("invalid schema name '{name}'")))
    }
}

/// Decides which schema a resource type routes to (C5). The default router
/// keeps everything in [`DEFAULT_SCHEMA`]; a multi-schema deployment
/// supplies its own implementation backed by the resource registry.
pub trait SchemaRouter: std::fmt::Debug + Send + Sync {
    fn schema_for(&self, resource_type: &str) -> String;
}

/// Routes every resource type to [`DEFAULT_SCHEMA`].
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticSchemaRouter;

impl SchemaRouter for StaticSchemaRouter {
    fn schema_for(&self, _resource_type: &str) -> String {
        DEFAULT_SCHEMA.to_string()
    }
}

/// Creates and migrates per-schema `resources` tables (C5, C6).
#[derive(Debug, Clone)]
pub struct SchemaManager {
    pool: PgPool,
}

impl SchemaManager {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Fully-qualified `resources` table name for `schema`, e.g. `public.resources`.
    pub fn table_name(schema: &str) -> Result<String> {
        validate_schema_name(schema)?;
        Ok(format!("{schema}.resources"))
    }

    /// Creates `schema` (if not [`DEFAULT_SCHEMA`]) and its `resources` table
    /// plus supporting indexes, idempotently.
    pub async fn ensure_schema(&self, schema: &str) -> Result<()> {
        validate_schema_name(schema)?;

        if schema != DEFAULT_SCHEMA {
            let ddl = format!("CREATE SCHEMA IF NOT EXISTS {schema}");
            query(&ddl).execute(&self.pool).await?;
        }

        let table = Self::table_name(schema)?;
        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                tenant_id BIGINT NOT NULL,
                resource_type TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                fhir_version TEXT NOT NULL,
                version_id BIGINT NOT NULL,
                is_current BOOLEAN NOT NULL DEFAULT TRUE,
                is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
                resource JSONB NOT NULL,
                last_updated TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                source_uri TEXT,
                PRIMARY KEY (tenant_id, resource_type, resource_id, version_id)
            )"
        );
        query(&create_table).execute(&self.pool).await?;

        // At most one `is_current` row per (tenant, type, id) — the storage
        // invariant (§3) enforced at the database layer, not just in code.
        let current_idx = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS resources_current_idx ON {table} \
             (tenant_id, resource_type, resource_id) WHERE is_current"
        );
        query(&current_idx).execute(&self.pool).await?;

        let search_idx = format!(
            "CREATE INDEX IF NOT EXISTS resources_content_gin_idx ON {table} \
             USING GIN (resource) WHERE is_current AND NOT is_deleted"
        );
        query(&search_idx).execute(&self.pool).await?;

        let last_updated_idx = format!(
            "CREATE INDEX IF NOT EXISTS resources_last_updated_idx ON {table} (tenant_id, resource_type, last_updated DESC)"
        );
        query(&last_updated_idx).execute(&self.pool).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        assert!(validate_schema_name("public").is_ok());
        assert!(validate_schema_name("immunization_registry").is_ok());
        assert!(validate_schema_name("_leading_underscore").is_ok());
    }

    #[test]
    fn rejects_non_identifiers() {
        assert!(validate_schema_name("bad-name").is_err());
        assert!(validate_schema_name("bad name").is_err());
        assert!(validate_schema_name("public; DROP TABLE resources;--").is_err());
        assert!(validate_schema_name("").is_err());
        assert!(validate_schema_name("1leading_digit").is_err());
    }

    #[test]
    fn table_name_is_schema_qualified() {
        assert_eq!(SchemaManager::table_name("public").unwrap(), "public.resources");
        assert_eq!(
            SchemaManager::table_name("immunization").unwrap(),
            "immunization.resources"
        );
    }

    #[test]
    fn table_name_rejects_invalid_schema() {
        assert!(SchemaManager::table_name("bad; drop").is_err());
    }

    #[test]
    fn static_router_always_returns_default_schema() {
        let router = StaticSchemaRouter;
        assert_eq!(router.schema_for("Patient"), DEFAULT_SCHEMA);
        assert_eq!(router.schema_for("Observation"), DEFAULT_SCHEMA);
    }
}
