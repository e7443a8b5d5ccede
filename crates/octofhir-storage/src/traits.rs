//! Storage traits for the FHIR storage abstraction layer (C6, §4.6).

use async_trait::async_trait;
use octofhir_core::{FhirVersion, ResourceRow};
use serde_json::Value;

use crate::error::StorageError;
use crate::types::{HistoryParams, HistoryResult, SearchParams, SearchResult};

/// The storage contract every backend (Postgres, in-memory) implements.
///
/// Every operation is scoped by `tenant_id`, the internal id a [`C3 tenant
/// resolver`] resolves from the caller's external tenant UUID — no method
/// here ever sees an un-scoped resource (§3, §5). Implementations must be
/// `Send + Sync` and safe to share behind an `Arc`.
#[async_trait]
pub trait FhirStorage: Send + Sync {
    /// Creates a new resource, returning version 1.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::AlreadyExists`] if a caller-supplied `id`
    /// already has a current (non-deleted) row, [`StorageError::InvalidResource`]
    /// if `resource` is malformed.
    async fn create(
        &self,
        tenant_id: i64,
        resource_type: &str,
        fhir_version: FhirVersion,
        resource: &Value,
    ) -> Result<ResourceRow, StorageError>;

    /// Reads the current version of a resource.
    ///
    /// Returns `Ok(None)` if the id was never created. Returns
    /// [`StorageError::Gone`] if the current row is a deletion tombstone (§4.6).
    async fn read(
        &self,
        tenant_id: i64,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<ResourceRow>, StorageError>;

    /// Updates a resource, always incrementing `version_id` (§9 Open Question:
    /// repeated identical updates still create a new version).
    ///
    /// If `if_match` is `Some`, the update only proceeds when it equals the
    /// current `version_id`; otherwise raises [`StorageError::VersionConflict`].
    /// If no current row exists, a new one is created at version 1
    /// (conditional/unconditional create-on-update, §4.6).
    async fn update(
        &self,
        tenant_id: i64,
        resource_type: &str,
        id: &str,
        resource: &Value,
        if_match: Option<&str>,
    ) -> Result<ResourceRow, StorageError>;

    /// Writes a tombstone version and marks it current.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the id was never created.
    /// Returns [`StorageError::Gone`] if the current row is already a
    /// tombstone — deleting an already-deleted resource does not create
    /// another version (§9 Open Question).
    async fn delete(
        &self,
        tenant_id: i64,
        resource_type: &str,
        id: &str,
    ) -> Result<ResourceRow, StorageError>;

    /// Reads a specific historical version, current or not.
    async fn vread(
        &self,
        tenant_id: i64,
        resource_type: &str,
        id: &str,
        version_id: &str,
    ) -> Result<Option<ResourceRow>, StorageError>;

    /// Returns the version history of a resource (`id = Some`) or of an
    /// entire resource type (`id = None`), newest first.
    async fn history(
        &self,
        tenant_id: i64,
        resource_type: &str,
        id: Option<&str>,
        params: &HistoryParams,
    ) -> Result<HistoryResult, StorageError>;

    /// Searches current, non-deleted resources of a type against
    /// already-translated parameters (C7 hands this backend SQL-ready input).
    async fn search(
        &self,
        tenant_id: i64,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError>;

    /// Begins a transaction scoped to `tenant_id` for atomic bundle processing (C10).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TransactionsNotSupported`] if this backend
    /// cannot provide one.
    async fn begin_transaction(&self, tenant_id: i64) -> Result<Box<dyn Transaction>, StorageError>;

    fn supports_transactions(&self) -> bool;

    fn backend_name(&self) -> &'static str;
}

/// An in-flight transaction used by the bundle processor (C10) for
/// `type: transaction` bundles: all operations commit or none do.
#[async_trait]
pub trait Transaction: Send + Sync {
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;

    async fn create(
        &mut self,
        resource_type: &str,
        fhir_version: FhirVersion,
        resource: &Value,
    ) -> Result<ResourceRow, StorageError>;

    async fn update(
        &mut self,
        resource_type: &str,
        id: &str,
        resource: &Value,
        if_match: Option<&str>,
    ) -> Result<ResourceRow, StorageError>;

    async fn delete(&mut self, resource_type: &str, id: &str) -> Result<ResourceRow, StorageError>;

    /// Reads within this transaction, seeing its own uncommitted writes.
    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<ResourceRow>, StorageError>;
}

/// Capability queries consulted by the HTTP layer when building the
/// CapabilityStatement (C11) and by the search translator (C7).
pub trait StorageCapabilities {
    fn supports_vread(&self) -> bool {
        true
    }

    fn supports_history(&self) -> bool {
        true
    }

    /// Returns `None` when all standard search parameters are supported.
    fn supported_search_params(&self, _resource_type: &str) -> Option<Vec<String>> {
        None
    }
}
