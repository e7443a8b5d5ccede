//! PostgreSQL transaction implementation backing atomic bundle processing
//! (C10, §4.9, §5 "Storage operations execute within a backend transaction").
//!
//! Wraps a single `sqlx` transaction; every CRUD call inside it runs the
//! same SQL the pool-based path runs, just against `&mut tx` instead of a
//! fresh `&pool`. Commit/rollback is all-or-nothing across every call made
//! through this handle, which is exactly what a transaction-type bundle needs.

use std::sync::Arc;

use async_trait::async_trait;
use octofhir_core::{FhirVersion, ResourceRow};
use serde_json::Value;
use sqlx_postgres::PgTransaction;
use tokio::sync::Mutex;

use octofhir_storage::{StorageError, Transaction};

use crate::queries::crud;
use crate::schema::SchemaRouter;

/// An in-flight Postgres transaction scoped to one tenant (§5, C10).
///
/// Reads issued through this handle see the transaction's own uncommitted
/// writes, matching the `Transaction::read` contract.
pub struct PostgresTransaction {
    tx: Mutex<Option<PgTransaction<'static>>>,
    schema_router: Arc<dyn SchemaRouter>,
    tenant_id: i64,
}

impl PostgresTransaction {
    #[must_use]
    pub fn new(tx: PgTransaction<'static>, schema_router: Arc<dyn SchemaRouter>, tenant_id: i64) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
            schema_router,
            tenant_id,
        }
    }

    fn already_completed() -> StorageError {
        StorageError::transaction_error("transaction already committed or rolled back")
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let mut guard = self.tx.lock().await;
        if let Some(tx) = guard.take() {
            tx.commit()
                .await
                .map_err(|e| StorageError::transaction_error(format!("commit failed: {e}")))?;
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        let mut guard = self.tx.lock().await;
        if let Some(tx) = guard.take() {
            tx.rollback()
                .await
                .map_err(|e| StorageError::transaction_error(format!("rollback failed: {e}")))?;
        }
        Ok(())
    }

    async fn create(
        &mut self,
        resource_type: &str,
        fhir_version: FhirVersion,
        resource: &Value,
    ) -> Result<ResourceRow, StorageError> {
        let schema = self.schema_router.schema_for(resource_type);
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::already_completed)?;
        crud::create_in_tx(tx, &schema, self.tenant_id, resource_type, fhir_version, resource).await
    }

    async fn update(
        &mut self,
        resource_type: &str,
        id: &str,
        resource: &Value,
        if_match: Option<&str>,
    ) -> Result<ResourceRow, StorageError> {
        let schema = self.schema_router.schema_for(resource_type);
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::already_completed)?;
        crud::update_in_tx(tx, &schema, self.tenant_id, resource_type, id, resource, if_match).await
    }

    async fn delete(&mut self, resource_type: &str, id: &str) -> Result<ResourceRow, StorageError> {
        let schema = self.schema_router.schema_for(resource_type);
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::already_completed)?;
        crud::delete_in_tx(tx, &schema, self.tenant_id, resource_type, id).await
    }

    async fn read(&self, resource_type: &str, id: &str) -> Result<Option<ResourceRow>, StorageError> {
        let schema = self.schema_router.schema_for(resource_type);
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::already_completed)?;
        crud::read_in_tx(tx, &schema, self.tenant_id, resource_type, id).await
    }
}

impl Drop for PostgresTransaction {
    /// `sqlx`'s own `Transaction::drop` already issues a `ROLLBACK` for an
    /// uncommitted transaction; this just makes the implicit rollback audible.
    fn drop(&mut self) {
        if self.tx.try_lock().map(|g| g.is_some()).unwrap_or(true) {
            tracing::debug!("PostgresTransaction dropped uncommitted; rolling back");
        }
    }
}
