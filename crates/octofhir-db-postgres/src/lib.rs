//! PostgreSQL storage backend for the FHIR server core.
//!
//! Implements [`octofhir_storage::FhirStorage`] (C6) against a schema
//! router (C5, [`SchemaRouter`]) that decides, per resource type, whether
//! rows live in the shared `public` schema or a dedicated one (§3, §4.5).
//!
//! - [`config`]: connection pool configuration
//! - [`schema`]: schema router + DDL management (C5)
//! - [`storage`]: [`PostgresStorage`], the `FhirStorage` implementation (C6)
//! - [`queries`]: the SQL behind CRUD, history, and search execution
//! - [`migrations`]: startup schema/table provisioning sweep

mod config;
mod error;
mod pool;
mod schema;
mod storage;
mod transaction;

pub mod migrations;
pub mod queries;

pub use config::PostgresConfig;
pub use error::{PostgresError, Result};
pub use schema::{DEFAULT_SCHEMA, SchemaManager, SchemaRouter, StaticSchemaRouter, validate_schema_name};
pub use storage::{PostgresStorage, static_schema_router};
pub use transaction::PostgresTransaction;

pub use octofhir_storage::{FhirStorage, HistoryParams, HistoryResult, SearchParams, SearchResult, StorageError, Transaction};

/// A shareable [`PostgresStorage`] instance.
pub type DynPostgresStorage = std::sync::Arc<PostgresStorage>;
