//! Startup migration sweep (C5, C6): ensures every schema a configured
//! resource type routes to has its `resources` table and indexes in place
//! before the server accepts traffic.

use std::collections::BTreeSet;

use sqlx_postgres::PgPool;
use tracing::{info, instrument};

use crate::error::Result;
use crate::schema::SchemaManager;

/// Ensures each schema name in `schemas` exists with its `resources` table.
/// Deduplicates so a shared schema backing many resource types is only
/// migrated once.
#[instrument(skip(pool, schemas))]
pub async fn run(pool: &PgPool, schemas: impl IntoIterator<Item = String>) -> Result<()> {
    let manager = SchemaManager::new(pool.clone());
    let unique: BTreeSet<String> = schemas.into_iter().collect();
    for schema in unique {
        info!(schema = %schema, "ensuring schema and resources table");
        manager.ensure_schema(&schema).await?;
    }
    Ok(())
}
