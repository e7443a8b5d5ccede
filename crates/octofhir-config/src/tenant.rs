//! Tenant Resolver (C3, §4.3): maps an external tenant identifier to the
//! internal tenant record used to scope every storage row. Backed by a
//! pluggable [`TenantSource`] behind a concurrent cache; the cache is a
//! performance layer over the source of truth, not a registry of record
//! (§4.3, §5 "concurrent map, last-writer-wins on a cache refill race").

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use octofhir_core::CoreError;
use uuid::Uuid;

/// A resolved tenant (§3 "Tenant Context").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantRecord {
    pub external_id: Uuid,
    pub internal_id: String,
    pub enabled: bool,
}

/// The collaborator that actually knows about tenants — a database table in
/// production, a static list in tests (§4.3: tenant storage itself is an
/// external collaborator, out of scope for this component).
#[async_trait]
pub trait TenantSource: Send + Sync {
    async fn lookup(&self, external_id: Uuid) -> Result<Option<TenantRecord>, CoreError>;
}

/// A fixed, in-memory [`TenantSource`] for tests and single-node deployments
/// that don't need a database-backed tenant table.
#[derive(Debug, Default)]
pub struct StaticTenantSource {
    records: Vec<TenantRecord>,
}

impl StaticTenantSource {
    #[must_use]
    pub fn new(records: Vec<TenantRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl TenantSource for StaticTenantSource {
    async fn lookup(&self, external_id: Uuid) -> Result<Option<TenantRecord>, CoreError> {
        Ok(self.records.iter().find(|r| r.external_id == external_id).cloned())
    }
}

/// C3: resolves external tenant ids to [`TenantRecord`]s, caching hits in a
/// concurrent map so steady-state resolution never touches `source`.
pub struct TenantResolver {
    cache: DashMap<Uuid, TenantRecord>,
    source: Arc<dyn TenantSource>,
}

impl TenantResolver {
    #[must_use]
    pub fn new(source: Arc<dyn TenantSource>) -> Self {
        Self { cache: DashMap::new(), source }
    }

    /// Resolves `external_id`, consulting the cache first. On a miss, calls
    /// into `source` and populates the cache; concurrent misses for the same
    /// id race harmlessly to the same last-writer-wins cache slot (§5).
    ///
    /// Returns [`CoreError::TenantNotFound`] for an unknown id and
    /// [`CoreError::TenantDisabled`] for a disabled one — the HTTP layer maps
    /// these to 404 and 503 respectively (§6, §8).
    pub async fn resolve(&self, external_id: Uuid) -> Result<TenantRecord, CoreError> {
        if let Some(record) = self.cache.get(&external_id) {
            return Self::check_enabled(record.clone());
        }

        let record = self
            .source
            .lookup(external_id)
            .await?
            .ok_or_else(|| CoreError::tenant_not_found("unknown tenant"))?;
        self.cache.insert(external_id, record.clone());
        Self::check_enabled(record)
    }

    fn check_enabled(record: TenantRecord) -> Result<TenantRecord, CoreError> {
        if !record.enabled {
            return Err(CoreError::tenant_disabled("tenant disabled"));
        }
        Ok(record)
    }

    /// Evicts a cached entry, forcing the next [`Self::resolve`] call for
    /// this id back to `source` (§4.3: used when a tenant is disabled or
    /// reconfigured mid-run).
    pub fn invalidate(&self, external_id: Uuid) {
        self.cache.remove(&external_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(id: Uuid, enabled: bool) -> TenantRecord {
        TenantRecord { external_id: id, internal_id: format!("internal-{id}"), enabled }
    }

    #[tokio::test]
    async fn resolves_known_tenant() {
        let id = Uuid::new_v4();
        let source = Arc::new(StaticTenantSource::new(vec![tenant(id, true)]));
        let resolver = TenantResolver::new(source);
        let record = resolver.resolve(id).await.unwrap();
        assert_eq!(record.external_id, id);
    }

    #[tokio::test]
    async fn unknown_tenant_is_not_found() {
        let source = Arc::new(StaticTenantSource::new(vec![]));
        let resolver = TenantResolver::new(source);
        let err = resolver.resolve(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CoreError::TenantNotFound { .. }));
    }

    #[tokio::test]
    async fn disabled_tenant_is_distinguishable_from_unknown() {
        let id = Uuid::new_v4();
        let source = Arc::new(StaticTenantSource::new(vec![tenant(id, false)]));
        let resolver = TenantResolver::new(source);
        let err = resolver.resolve(id).await.unwrap_err();
        assert!(matches!(err, CoreError::TenantDisabled { .. }));
    }

    #[tokio::test]
    async fn second_resolve_hits_cache_not_source() {
        struct CountingSource {
            inner: StaticTenantSource,
            calls: std::sync::atomic::AtomicUsize,
        }
        #[async_trait]
        impl TenantSource for CountingSource {
            async fn lookup(&self, external_id: Uuid) -> Result<Option<TenantRecord>, CoreError> {
                self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                self.inner.lookup(external_id).await
            }
        }
        let id = Uuid::new_v4();
        let source = Arc::new(CountingSource {
            inner: StaticTenantSource::new(vec![tenant(id, true)]),
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let resolver = TenantResolver::new(source.clone());
        resolver.resolve(id).await.unwrap();
        resolver.resolve(id).await.unwrap();
        assert_eq!(source.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let id = Uuid::new_v4();
        let source = Arc::new(StaticTenantSource::new(vec![tenant(id, true)]));
        let resolver = TenantResolver::new(source);
        resolver.resolve(id).await.unwrap();
        resolver.invalidate(id);
        assert!(resolver.cache.get(&id).is_none());
    }
}
