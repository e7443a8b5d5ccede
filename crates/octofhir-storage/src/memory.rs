//! In-memory [`FhirStorage`] backend.
//!
//! Exists for local development, tests, and anywhere a Postgres instance
//! isn't worth the overhead. Concurrent writers racing the same
//! `(tenant_id, resource_type, resource_id)` key are serialized through a
//! per-key `tokio::sync::Mutex` rather than retried or rejected outright —
//! the lock itself is the concurrency control (§5, §9).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use octofhir_core::{FhirVersion, ResourceRow};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::error::StorageError;
use crate::traits::{FhirStorage, Transaction};
use crate::types::{HistoryEntry, HistoryMethod, HistoryParams, HistoryResult, SearchParams, SearchResult};

type Key = (i64, String, String);

#[derive(Debug, Default)]
struct KeyState {
    /// Ascending by `version_id`; the last element (if any) is current.
    versions: Vec<ResourceRow>,
}

impl KeyState {
    fn current(&self) -> Option<&ResourceRow> {
        self.versions.last().filter(|r| r.is_current)
    }

    fn next_version_id(&self) -> u64 {
        self.versions.last().map(|r| r.version_id + 1).unwrap_or(1)
    }
}

/// In-memory storage backend keyed by `(tenant_id, resource_type, resource_id)`.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    keys: Arc<RwLock<HashMap<Key, Arc<Mutex<KeyState>>>>>,
}

async fn key_lock(keys: &RwLock<HashMap<Key, Arc<Mutex<KeyState>>>>, key: &Key) -> Arc<Mutex<KeyState>> {
    if let Some(state) = keys.read().await.get(key) {
        return state.clone();
    }
    keys.write()
        .await
        .entry(key.clone())
        .or_insert_with(|| Arc::new(Mutex::new(KeyState::default())))
        .clone()
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn key_lock(&self, key: &Key) -> Arc<Mutex<KeyState>> {
        key_lock(&self.keys, key).await
    }
}

#[async_trait]
impl FhirStorage for MemoryStorage {
    async fn create(
        &self,
        tenant_id: i64,
        resource_type: &str,
        fhir_version: FhirVersion,
        resource: &Value,
    ) -> Result<ResourceRow, StorageError> {
        let id = octofhir_core::generate_id();
        let key = (tenant_id, resource_type.to_string(), id.clone());
        let state_lock = self.key_lock(&key).await;
        let mut state = state_lock.lock().await;

        if state.current().is_some_and(|r| r.is_live()) {
            return Err(StorageError::already_exists(resource_type, id));
        }

        let version_id = state.next_version_id();
        if let Some(last) = state.versions.last_mut() {
            last.is_current = false;
        }
        let row = ResourceRow::new(tenant_id, resource_type, id, fhir_version, version_id, resource.clone());
        state.versions.push(row.clone());
        Ok(row)
    }

    async fn read(
        &self,
        tenant_id: i64,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<ResourceRow>, StorageError> {
        let key = (tenant_id, resource_type.to_string(), id.to_string());
        let state_lock = self.key_lock(&key).await;
        let state = state_lock.lock().await;
        match state.current() {
            Some(row) if row.is_deleted => Err(StorageError::gone(resource_type, id)),
            Some(row) => Ok(Some(row.clone())),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        tenant_id: i64,
        resource_type: &str,
        id: &str,
        resource: &Value,
        if_match: Option<&str>,
    ) -> Result<ResourceRow, StorageError> {
        let key = (tenant_id, resource_type.to_string(), id.to_string());
        let state_lock = self.key_lock(&key).await;
        let mut state = state_lock.lock().await;

        let fhir_version = state
            .current()
            .map(|r| r.fhir_version)
            .unwrap_or_default();

        if let Some(expected) = if_match {
            match state.current() {
                Some(current) if current.version_id.to_string() != expected => {
                    return Err(StorageError::version_conflict(
                        expected,
                        current.version_id.to_string(),
                    ));
                }
                _ => {}
            }
        }

        let version_id = state.next_version_id();
        if let Some(last) = state.versions.last_mut() {
            last.is_current = false;
        }
        let row = ResourceRow::new(tenant_id, resource_type, id, fhir_version, version_id, resource.clone());
        state.versions.push(row.clone());
        Ok(row)
    }

    async fn delete(
        &self,
        tenant_id: i64,
        resource_type: &str,
        id: &str,
    ) -> Result<ResourceRow, StorageError> {
        let key = (tenant_id, resource_type.to_string(), id.to_string());
        let state_lock = self.key_lock(&key).await;
        let mut state = state_lock.lock().await;

        let fhir_version = match state.current() {
            None => return Err(StorageError::not_found(resource_type, id)),
            Some(row) if row.is_deleted => return Err(StorageError::gone(resource_type, id)),
            Some(row) => row.fhir_version,
        };

        let version_id = state.next_version_id();
        if let Some(last) = state.versions.last_mut() {
            last.is_current = false;
        }
        let row = ResourceRow::new(
            tenant_id,
            resource_type,
            id,
            fhir_version,
            version_id,
            Value::Null,
        )
        .with_is_deleted(true);
        state.versions.push(row.clone());
        Ok(row)
    }

    async fn vread(
        &self,
        tenant_id: i64,
        resource_type: &str,
        id: &str,
        version_id: &str,
    ) -> Result<Option<ResourceRow>, StorageError> {
        let key = (tenant_id, resource_type.to_string(), id.to_string());
        let state_lock = self.key_lock(&key).await;
        let state = state_lock.lock().await;
        Ok(state
            .versions
            .iter()
            .find(|r| r.version_id.to_string() == version_id)
            .cloned())
    }

    async fn history(
        &self,
        tenant_id: i64,
        resource_type: &str,
        id: Option<&str>,
        params: &HistoryParams,
    ) -> Result<HistoryResult, StorageError> {
        let keys = self.keys.read().await;
        let mut entries = Vec::new();
        for (key, state_lock) in keys.iter() {
            if key.0 != tenant_id || key.1 != resource_type {
                continue;
            }
            if let Some(id) = id {
                if key.2 != id {
                    continue;
                }
            }
            let state = state_lock.lock().await;
            for row in state.versions.iter().rev() {
                if let Some(since) = params.since {
                    if row.last_updated.inner() < &since {
                        continue;
                    }
                }
                if let Some(at) = params.at {
                    if row.last_updated.inner() > &at {
                        continue;
                    }
                }
                entries.push(HistoryEntry::new(row.clone(), HistoryMethod::for_row(row)));
            }
        }
        entries.sort_by(|a, b| b.row.last_updated.cmp(&a.row.last_updated));
        let total = entries.len() as u32;
        let offset = params.offset.unwrap_or(0) as usize;
        let count = params.count.map(|c| c as usize).unwrap_or(entries.len());
        let entries = entries.into_iter().skip(offset).take(count).collect();
        Ok(HistoryResult {
            entries,
            total: Some(total),
        })
    }

    async fn search(
        &self,
        tenant_id: i64,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError> {
        let keys = self.keys.read().await;
        let mut matches = Vec::new();
        for (key, state_lock) in keys.iter() {
            if key.0 != tenant_id || key.1 != resource_type {
                continue;
            }
            let state = state_lock.lock().await;
            if let Some(row) = state.current() {
                if row.is_live() && matches_params(row, params) {
                    matches.push(row.clone());
                }
            }
        }
        matches.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        let total = matches.len() as u32;
        let offset = params.offset.unwrap_or(0) as usize;
        let count = params.count.map(|c| c as usize).unwrap_or(matches.len());
        let has_more = offset + count < matches.len();
        let entries = matches.into_iter().skip(offset).take(count).collect();
        Ok(SearchResult {
            entries,
            total: Some(total),
            has_more,
        })
    }

    async fn begin_transaction(&self, tenant_id: i64) -> Result<Box<dyn Transaction>, StorageError> {
        Ok(Box::new(MemoryTransaction {
            keys: self.keys.clone(),
            tenant_id,
            undo: Vec::new(),
            touched: std::collections::HashSet::new(),
            finished: false,
        }))
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Filters current, live rows by a generic recursive string-containment
/// match against the stored JSON. A real search translation (C7) happens
/// against the Postgres backend's JSONB; this backend exists for tests and
/// local development, not for FHIR-accurate search semantics.
fn matches_params(row: &ResourceRow, params: &SearchParams) -> bool {
    params.parameters.iter().all(|(_code, values)| {
        values
            .iter()
            .any(|value| json_contains(&row.content, &value.to_lowercase()))
    })
}

fn json_contains(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Number(n) => n.to_string().contains(needle),
        Value::Array(items) => items.iter().any(|v| json_contains(v, needle)),
        Value::Object(map) => map.values().any(|v| json_contains(v, needle)),
        _ => false,
    }
}

/// A transaction against [`MemoryStorage`]. Writes go straight into the same
/// `keys` map the non-transactional path uses (so reads within the
/// transaction see its own writes), recording the pre-image of every key it
/// touches so `rollback()` can restore exactly those keys. `commit()` simply
/// keeps the writes already in place.
struct MemoryTransaction {
    keys: Arc<RwLock<HashMap<Key, Arc<Mutex<KeyState>>>>>,
    tenant_id: i64,
    undo: Vec<(Key, Vec<ResourceRow>)>,
    touched: std::collections::HashSet<Key>,
    finished: bool,
}

impl MemoryTransaction {
    /// Records the pre-image of `key` the first time this transaction
    /// touches it; later touches are no-ops so `rollback` restores the state
    /// as it was before the transaction began, not an intermediate state.
    fn snapshot(&mut self, key: &Key, state: &KeyState) {
        if self.touched.insert(key.clone()) {
            self.undo.push((key.clone(), state.versions.clone()));
        }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        for (key, versions) in self.undo.drain(..) {
            let state_lock = key_lock(&self.keys, &key).await;
            let mut state = state_lock.lock().await;
            state.versions = versions;
        }
        self.finished = true;
        Ok(())
    }

    async fn create(
        &mut self,
        resource_type: &str,
        fhir_version: FhirVersion,
        resource: &Value,
    ) -> Result<ResourceRow, StorageError> {
        let id = octofhir_core::generate_id();
        let key = (self.tenant_id, resource_type.to_string(), id.clone());
        let state_lock = key_lock(&self.keys, &key).await;
        let mut state = state_lock.lock().await;
        self.snapshot(&key, &state);

        if state.current().is_some_and(|r| r.is_live()) {
            return Err(StorageError::already_exists(resource_type, id));
        }

        let version_id = state.next_version_id();
        if let Some(last) = state.versions.last_mut() {
            last.is_current = false;
        }
        let row = ResourceRow::new(self.tenant_id, resource_type, id, fhir_version, version_id, resource.clone());
        state.versions.push(row.clone());
        Ok(row)
    }

    async fn update(
        &mut self,
        resource_type: &str,
        id: &str,
        resource: &Value,
        if_match: Option<&str>,
    ) -> Result<ResourceRow, StorageError> {
        let key = (self.tenant_id, resource_type.to_string(), id.to_string());
        let state_lock = key_lock(&self.keys, &key).await;
        let mut state = state_lock.lock().await;
        self.snapshot(&key, &state);

        let fhir_version = state.current().map(|r| r.fhir_version).unwrap_or_default();

        if let Some(expected) = if_match {
            match state.current() {
                Some(current) if current.version_id.to_string() != expected => {
                    return Err(StorageError::version_conflict(expected, current.version_id.to_string()));
                }
                _ => {}
            }
        }

        let version_id = state.next_version_id();
        if let Some(last) = state.versions.last_mut() {
            last.is_current = false;
        }
        let row = ResourceRow::new(self.tenant_id, resource_type, id, fhir_version, version_id, resource.clone());
        state.versions.push(row.clone());
        Ok(row)
    }

    async fn delete(&mut self, resource_type: &str, id: &str) -> Result<ResourceRow, StorageError> {
        let key = (self.tenant_id, resource_type.to_string(), id.to_string());
        let state_lock = key_lock(&self.keys, &key).await;
        let mut state = state_lock.lock().await;
        self.snapshot(&key, &state);

        let fhir_version = match state.current() {
            None => return Err(StorageError::not_found(resource_type, id)),
            Some(row) if row.is_deleted => return Err(StorageError::gone(resource_type, id)),
            Some(row) => row.fhir_version,
        };

        let version_id = state.next_version_id();
        if let Some(last) = state.versions.last_mut() {
            last.is_current = false;
        }
        let row = ResourceRow::new(self.tenant_id, resource_type, id, fhir_version, version_id, Value::Null).with_is_deleted(true);
        state.versions.push(row.clone());
        Ok(row)
    }

    async fn read(&self, resource_type: &str, id: &str) -> Result<Option<ResourceRow>, StorageError> {
        let key = (self.tenant_id, resource_type.to_string(), id.to_string());
        let state_lock = key_lock(&self.keys, &key).await;
        let state = state_lock.lock().await;
        match state.current() {
            Some(row) if row.is_deleted => Err(StorageError::gone(resource_type, id)),
            Some(row) => Ok(Some(row.clone())),
            None => Ok(None),
        }
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished && !self.undo.is_empty() {
            tracing::debug!(
                tenant_id = self.tenant_id,
                touched = self.undo.len(),
                "in-memory transaction dropped without commit or rollback; writes remain applied"
            );
        }
    }
}

impl std::fmt::Debug for MemoryTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransaction")
            .field("tenant_id", &self.tenant_id)
            .field("touched_keys", &self.undo.len())
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn storage() -> MemoryStorage {
        MemoryStorage::new()
    }

    #[tokio::test]
    async fn create_then_read_roundtrips() {
        let storage = storage();
        let created = storage
            .create(1, "Patient", FhirVersion::R4B, &json!({"id": "client-supplied", "name": "a"}))
            .await
            .unwrap();
        assert_eq!(created.version_id, 1);
        assert_ne!(created.resource_id, "client-supplied", "create must ignore any id in the body");

        let read = storage.read(1, "Patient", &created.resource_id).await.unwrap().unwrap();
        assert_eq!(read.version_id, 1);
        assert_eq!(read.resource_id, created.resource_id);
    }

    #[tokio::test]
    async fn create_assigns_a_distinct_id_each_call() {
        let storage = storage();
        let first = storage.create(1, "Patient", FhirVersion::R4B, &json!({"id": "same"})).await.unwrap();
        let second = storage.create(1, "Patient", FhirVersion::R4B, &json!({"id": "same"})).await.unwrap();
        assert_ne!(first.resource_id, second.resource_id);
    }

    #[tokio::test]
    async fn update_always_increments_version() {
        let storage = storage();
        storage.update(1, "Patient", "p1", &json!({"name": "a"}), None).await.unwrap();
        let updated = storage
            .update(1, "Patient", "p1", &json!({"id": "p1", "name": "b"}), None)
            .await
            .unwrap();
        assert_eq!(updated.version_id, 2);
        let updated_again = storage
            .update(1, "Patient", "p1", &json!({"id": "p1", "name": "b"}), None)
            .await
            .unwrap();
        assert_eq!(updated_again.version_id, 3);
    }

    #[tokio::test]
    async fn update_with_stale_if_match_conflicts() {
        let storage = storage();
        storage.update(1, "Patient", "p1", &json!({"id": "p1"}), None).await.unwrap();
        let err = storage
            .update(1, "Patient", "p1", &json!({"id": "p1"}), Some("99"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn delete_then_read_returns_gone() {
        let storage = storage();
        storage.update(1, "Patient", "p1", &json!({"id": "p1"}), None).await.unwrap();
        storage.delete(1, "Patient", "p1").await.unwrap();
        let err = storage.read(1, "Patient", "p1").await.unwrap_err();
        assert!(matches!(err, StorageError::Gone { .. }));
    }

    #[tokio::test]
    async fn delete_twice_is_gone_not_another_version() {
        let storage = storage();
        storage.update(1, "Patient", "p1", &json!({"id": "p1"}), None).await.unwrap();
        storage.delete(1, "Patient", "p1").await.unwrap();
        let err = storage.delete(1, "Patient", "p1").await.unwrap_err();
        assert!(matches!(err, StorageError::Gone { .. }));
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let storage = storage();
        storage.update(1, "Patient", "p1", &json!({"id": "p1"}), None).await.unwrap();
        let other_tenant = storage.read(2, "Patient", "p1").await.unwrap();
        assert!(other_tenant.is_none());
    }

    #[tokio::test]
    async fn vread_returns_historical_version() {
        let storage = storage();
        storage.update(1, "Patient", "p1", &json!({"id": "p1", "v": 1}), None).await.unwrap();
        storage
            .update(1, "Patient", "p1", &json!({"id": "p1", "v": 2}), None)
            .await
            .unwrap();
        let v1 = storage.vread(1, "Patient", "p1", "1").await.unwrap().unwrap();
        assert_eq!(v1.content["v"], 1);
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let storage = storage();
        storage.update(1, "Patient", "p1", &json!({"id": "p1"}), None).await.unwrap();
        storage
            .update(1, "Patient", "p1", &json!({"id": "p1"}), None)
            .await
            .unwrap();
        let history = storage
            .history(1, "Patient", Some("p1"), &HistoryParams::new())
            .await
            .unwrap();
        assert_eq!(history.entries.len(), 2);
        assert_eq!(history.entries[0].row.version_id, 2);
        assert_eq!(history.entries[1].row.version_id, 1);
    }

    #[tokio::test]
    async fn search_matches_substring_case_insensitive() {
        let storage = storage();
        storage
            .update(1, "Patient", "p1", &json!({"id": "p1", "name": "Jane Doe"}), None)
            .await
            .unwrap();
        let params = SearchParams::new().with_param("name", "jane");
        let result = storage.search(1, "Patient", &params).await.unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn transaction_read_your_writes() {
        let storage = storage();
        let mut tx = storage.begin_transaction(1).await.unwrap();
        tx.update("Patient", "p1", &json!({"id": "p1"}), None).await.unwrap();
        let seen = tx.read("Patient", "p1").await.unwrap();
        assert!(seen.is_some());
        tx.commit().await.unwrap();

        let read = storage.read(1, "Patient", "p1").await.unwrap();
        assert!(read.is_some());
    }

    #[tokio::test]
    async fn transaction_rollback_undoes_all_writes() {
        let storage = storage();
        storage
            .update(1, "Patient", "p1", &json!({"id": "p1", "name": "original"}), None)
            .await
            .unwrap();

        let mut tx = storage.begin_transaction(1).await.unwrap();
        tx.create("Observation", FhirVersion::R4B, &json!({})).await.unwrap();
        tx.update("Patient", "p1", &json!({"id": "p1", "name": "changed"}), None).await.unwrap();
        tx.rollback().await.unwrap();

        let observations = storage.search(1, "Observation", &SearchParams::new()).await.unwrap();
        assert!(observations.is_empty(), "rolled-back create must leave no trace");

        let patient = storage.read(1, "Patient", "p1").await.unwrap().unwrap();
        assert_eq!(patient.content["name"], "original");
        assert_eq!(patient.version_id, 1);
    }

    #[tokio::test]
    async fn search_excludes_deleted() {
        let storage = storage();
        storage
            .update(1, "Patient", "p1", &json!({"id": "p1", "name": "Jane"}), None)
            .await
            .unwrap();
        storage.delete(1, "Patient", "p1").await.unwrap();
        let params = SearchParams::new().with_param("name", "jane");
        let result = storage.search(1, "Patient", &params).await.unwrap();
        assert!(result.is_empty());
    }
}
