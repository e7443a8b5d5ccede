//! CRUD SQL against a schema's `resources` table (C6, §4.5).
//!
//! Every operation here enforces the same storage invariant the in-memory
//! backend enforces in Rust: at most one `is_current = true` row per
//! `(tenant_id, resource_type, resource_id)`, and `version_id` increases by
//! one on every write, never reused (§3). The pool-based functions wrap each
//! read-then-write in its own transaction so the invariant holds even under
//! concurrent writers; the `_in_tx` variants run the same statements inside
//! a caller-managed transaction for Bundle processing (C10).

use std::str::FromStr;

use chrono::{DateTime, Utc};
use octofhir_core::{FhirVersion, ResourceRow};
use octofhir_storage::StorageError;
use serde_json::Value;
use sqlx_core::row::Row;
use sqlx_postgres::{PgPool, PgRow, PgTransaction};

use crate::error::PostgresError;
use crate::schema::SchemaManager;

fn map_sqlx(err: sqlx_core::Error) -> StorageError {
    PostgresError::from(err).into()
}

fn table_for(schema: &str) -> Result<String, StorageError> {
    SchemaManager::table_name(schema).map_err(|e| StorageError::internal(e.to_string()))
}

pub(crate) fn to_chrono(dt: &octofhir_core::FhirDateTime) -> DateTime<Utc> {
    let nanos = dt.inner().unix_timestamp_nanos();
    let secs = (nanos / 1_000_000_000) as i64;
    let subsec_nanos = nanos.rem_euclid(1_000_000_000) as u32;
    DateTime::from_timestamp(secs, subsec_nanos).unwrap_or_else(Utc::now)
}

pub(crate) fn from_chrono(dt: DateTime<Utc>) -> octofhir_core::FhirDateTime {
    let nanos = dt.timestamp_nanos_opt().unwrap_or(0) as i128;
    octofhir_core::time::from_unix_timestamp_nanos(nanos).unwrap_or_else(octofhir_core::time::now_utc)
}

pub(crate) fn row_to_resource(row: &PgRow) -> Result<ResourceRow, StorageError> {
    let tenant_id: i64 = row.try_get("tenant_id").map_err(map_sqlx)?;
    let resource_type: String = row.try_get("resource_type").map_err(map_sqlx)?;
    let resource_id: String = row.try_get("resource_id").map_err(map_sqlx)?;
    let fhir_version_raw: String = row.try_get("fhir_version").map_err(map_sqlx)?;
    let fhir_version = FhirVersion::from_str(&fhir_version_raw)
        .map_err(|e| StorageError::internal(e.to_string()))?;
    let version_id: i64 = row.try_get("version_id").map_err(map_sqlx)?;
    let is_current: bool = row.try_get("is_current").map_err(map_sqlx)?;
    let is_deleted: bool = row.try_get("is_deleted").map_err(map_sqlx)?;
    let content: Value = row.try_get("resource").map_err(map_sqlx)?;
    let last_updated: DateTime<Utc> = row.try_get("last_updated").map_err(map_sqlx)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(map_sqlx)?;
    let source_uri: Option<String> = row.try_get("source_uri").map_err(map_sqlx)?;

    Ok(ResourceRow {
        tenant_id,
        resource_type,
        resource_id,
        fhir_version,
        version_id: version_id as u64,
        is_current,
        is_deleted,
        content,
        last_updated: from_chrono(last_updated),
        created_at: from_chrono(created_at),
        source_uri,
    })
}

pub async fn create(
    pool: &PgPool,
    schema: &str,
    tenant_id: i64,
    resource_type: &str,
    fhir_version: FhirVersion,
    resource: &Value,
) -> Result<ResourceRow, StorageError> {
    let mut tx = pool.begin().await.map_err(map_sqlx)?;
    let row = create_in_tx(&mut tx, schema, tenant_id, resource_type, fhir_version, resource).await?;
    tx.commit().await.map_err(map_sqlx)?;
    Ok(row)
}

pub(crate) async fn create_in_tx(
    tx: &mut PgTransaction<'static>,
    schema: &str,
    tenant_id: i64,
    resource_type: &str,
    fhir_version: FhirVersion,
    resource: &Value,
) -> Result<ResourceRow, StorageError> {
    let table = table_for(schema)?;
    let resource_id = octofhir_core::generate_id();

    let existing = sqlx_core::query::query(&format!(
        "SELECT version_id, is_deleted FROM {table} \
         WHERE tenant_id = $1 AND resource_type = $2 AND resource_id = $3 AND is_current \
         FOR UPDATE"
    ))
    .bind(tenant_id)
    .bind(resource_type)
    .bind(&resource_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_sqlx)?;

    let next_version = match existing {
        Some(ref row) => {
            let version_id: i64 = row.try_get("version_id").map_err(map_sqlx)?;
            let is_deleted: bool = row.try_get("is_deleted").map_err(map_sqlx)?;
            if !is_deleted {
                return Err(StorageError::already_exists(resource_type, resource_id));
            }
            version_id + 1
        }
        None => 1,
    };

    if existing.is_some() {
        sqlx_core::query::query(&format!(
            "UPDATE {table} SET is_current = FALSE \
             WHERE tenant_id = $1 AND resource_type = $2 AND resource_id = $3 AND is_current"
        ))
        .bind(tenant_id)
        .bind(resource_type)
        .bind(&resource_id)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx)?;
    }

    let now = Utc::now();
    sqlx_core::query::query(&format!(
        "INSERT INTO {table} \
         (tenant_id, resource_type, resource_id, fhir_version, version_id, is_current, is_deleted, resource, last_updated, created_at, source_uri) \
         VALUES ($1, $2, $3, $4, $5, TRUE, FALSE, $6, $7, $7, NULL)"
    ))
    .bind(tenant_id)
    .bind(resource_type)
    .bind(&resource_id)
    .bind(fhir_version.to_string())
    .bind(next_version)
    .bind(resource)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx)?;

    Ok(ResourceRow {
        tenant_id,
        resource_type: resource_type.to_string(),
        resource_id,
        fhir_version,
        version_id: next_version as u64,
        is_current: true,
        is_deleted: false,
        content: resource.clone(),
        last_updated: from_chrono(now),
        created_at: from_chrono(now),
        source_uri: None,
    })
}

pub async fn read(
    pool: &PgPool,
    schema: &str,
    tenant_id: i64,
    resource_type: &str,
    id: &str,
) -> Result<Option<ResourceRow>, StorageError> {
    let table = table_for(schema)?;
    let row = sqlx_core::query::query(&format!(
        "SELECT * FROM {table} WHERE tenant_id = $1 AND resource_type = $2 AND resource_id = $3 AND is_current"
    ))
    .bind(tenant_id)
    .bind(resource_type)
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx)?;

    match row {
        None => Ok(None),
        Some(row) => {
            let resource = row_to_resource(&row)?;
            if resource.is_deleted {
                Err(StorageError::gone(resource_type, id))
            } else {
                Ok(Some(resource))
            }
        }
    }
}

pub(crate) async fn read_in_tx(
    tx: &mut PgTransaction<'static>,
    schema: &str,
    tenant_id: i64,
    resource_type: &str,
    id: &str,
) -> Result<Option<ResourceRow>, StorageError> {
    let table = table_for(schema)?;
    let row = sqlx_core::query::query(&format!(
        "SELECT * FROM {table} WHERE tenant_id = $1 AND resource_type = $2 AND resource_id = $3 AND is_current"
    ))
    .bind(tenant_id)
    .bind(resource_type)
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_sqlx)?;

    row.map(|r| row_to_resource(&r)).transpose()
}

pub async fn update(
    pool: &PgPool,
    schema: &str,
    tenant_id: i64,
    resource_type: &str,
    id: &str,
    resource: &Value,
    if_match: Option<&str>,
) -> Result<ResourceRow, StorageError> {
    let mut tx = pool.begin().await.map_err(map_sqlx)?;
    let row = update_in_tx(&mut tx, schema, tenant_id, resource_type, id, resource, if_match).await?;
    tx.commit().await.map_err(map_sqlx)?;
    Ok(row)
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn update_in_tx(
    tx: &mut PgTransaction<'static>,
    schema: &str,
    tenant_id: i64,
    resource_type: &str,
    id: &str,
    resource: &Value,
    if_match: Option<&str>,
) -> Result<ResourceRow, StorageError> {
    let table = table_for(schema)?;

    let current = sqlx_core::query::query(&format!(
        "SELECT version_id, fhir_version FROM {table} \
         WHERE tenant_id = $1 AND resource_type = $2 AND resource_id = $3 AND is_current \
         FOR UPDATE"
    ))
    .bind(tenant_id)
    .bind(resource_type)
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_sqlx)?;

    let (current_version, fhir_version) = match &current {
        Some(row) => {
            let version_id: i64 = row.try_get("version_id").map_err(map_sqlx)?;
            let fv_raw: String = row.try_get("fhir_version").map_err(map_sqlx)?;
            let fv = FhirVersion::from_str(&fv_raw).map_err(|e| StorageError::internal(e.to_string()))?;
            (Some(version_id), fv)
        }
        None => (None, FhirVersion::default()),
    };

    if let (Some(expected), Some(actual)) = (if_match, current_version)
        && actual.to_string() != expected
    {
        return Err(StorageError::version_conflict(expected, actual.to_string()));
    }

    if current_version.is_some() {
        sqlx_core::query::query(&format!(
            "UPDATE {table} SET is_current = FALSE \
             WHERE tenant_id = $1 AND resource_type = $2 AND resource_id = $3 AND is_current"
        ))
        .bind(tenant_id)
        .bind(resource_type)
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx)?;
    }

    let next_version = current_version.unwrap_or(0) + 1;
    let now = Utc::now();
    sqlx_core::query::query(&format!(
        "INSERT INTO {table} \
         (tenant_id, resource_type, resource_id, fhir_version, version_id, is_current, is_deleted, resource, last_updated, created_at, source_uri) \
         VALUES ($1, $2, $3, $4, $5, TRUE, FALSE, $6, $7, $7, NULL)"
    ))
    .bind(tenant_id)
    .bind(resource_type)
    .bind(id)
    .bind(fhir_version.to_string())
    .bind(next_version)
    .bind(resource)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx)?;

    Ok(ResourceRow {
        tenant_id,
        resource_type: resource_type.to_string(),
        resource_id: id.to_string(),
        fhir_version,
        version_id: next_version as u64,
        is_current: true,
        is_deleted: false,
        content: resource.clone(),
        last_updated: from_chrono(now),
        created_at: from_chrono(now),
        source_uri: None,
    })
}

pub async fn delete(
    pool: &PgPool,
    schema: &str,
    tenant_id: i64,
    resource_type: &str,
    id: &str,
) -> Result<ResourceRow, StorageError> {
    let mut tx = pool.begin().await.map_err(map_sqlx)?;
    let row = delete_in_tx(&mut tx, schema, tenant_id, resource_type, id).await?;
    tx.commit().await.map_err(map_sqlx)?;
    Ok(row)
}

pub(crate) async fn delete_in_tx(
    tx: &mut PgTransaction<'static>,
    schema: &str,
    tenant_id: i64,
    resource_type: &str,
    id: &str,
) -> Result<ResourceRow, StorageError> {
    let table = table_for(schema)?;

    let current = sqlx_core::query::query(&format!(
        "SELECT version_id, fhir_version, is_deleted FROM {table} \
         WHERE tenant_id = $1 AND resource_type = $2 AND resource_id = $3 AND is_current \
         FOR UPDATE"
    ))
    .bind(tenant_id)
    .bind(resource_type)
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_sqlx)?;

    let Some(current) = current else {
        return Err(StorageError::not_found(resource_type, id));
    };

    let version_id: i64 = current.try_get("version_id").map_err(map_sqlx)?;
    let is_deleted: bool = current.try_get("is_deleted").map_err(map_sqlx)?;
    if is_deleted {
        return Err(StorageError::gone(resource_type, id));
    }
    let fv_raw: String = current.try_get("fhir_version").map_err(map_sqlx)?;
    let fhir_version =
        FhirVersion::from_str(&fv_raw).map_err(|e| StorageError::internal(e.to_string()))?;

    sqlx_core::query::query(&format!(
        "UPDATE {table} SET is_current = FALSE \
         WHERE tenant_id = $1 AND resource_type = $2 AND resource_id = $3 AND is_current"
    ))
    .bind(tenant_id)
    .bind(resource_type)
    .bind(id)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx)?;

    let next_version = version_id + 1;
    let now = Utc::now();
    sqlx_core::query::query(&format!(
        "INSERT INTO {table} \
         (tenant_id, resource_type, resource_id, fhir_version, version_id, is_current, is_deleted, resource, last_updated, created_at, source_uri) \
         VALUES ($1, $2, $3, $4, $5, TRUE, TRUE, $6, $7, $7, NULL)"
    ))
    .bind(tenant_id)
    .bind(resource_type)
    .bind(id)
    .bind(fhir_version.to_string())
    .bind(next_version)
    .bind(Value::Null)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx)?;

    Ok(ResourceRow {
        tenant_id,
        resource_type: resource_type.to_string(),
        resource_id: id.to_string(),
        fhir_version,
        version_id: next_version as u64,
        is_current: true,
        is_deleted: true,
        content: Value::Null,
        last_updated: from_chrono(now),
        created_at: from_chrono(now),
        source_uri: None,
    })
}

pub async fn vread(
    pool: &PgPool,
    schema: &str,
    tenant_id: i64,
    resource_type: &str,
    id: &str,
    version_id: &str,
) -> Result<Option<ResourceRow>, StorageError> {
    let table = table_for(schema)?;
    let Ok(version_id_num) = version_id.parse::<i64>() else {
        return Ok(None);
    };

    let row = sqlx_core::query::query(&format!(
        "SELECT * FROM {table} WHERE tenant_id = $1 AND resource_type = $2 AND resource_id = $3 AND version_id = $4"
    ))
    .bind(tenant_id)
    .bind(resource_type)
    .bind(id)
    .bind(version_id_num)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx)?;

    row.map(|r| row_to_resource(&r)).transpose()
}
