//! Cache backing for the plugin orchestrator's cache-lookup/cache-update
//! steps (C8, §4.7). Keys are always tenant-prefixed so one tenant's cached
//! entry can never be observed by another (§4.7, §8 universal invariant).
//!
//! A single process-local [`DashMap`] behind a TTL is the whole
//! implementation: the core's external collaborator contract (§6 "the cache
//! is a key-value store with TTL semantics") doesn't require a distributed
//! backend, and a heavier Redis-backed tier belongs to a fuller deployment,
//! not this core.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

/// A tenant-scoped, TTL'd cache of resource documents (§4.7).
///
/// Key shape is `"{tenant_id}:{resource_type}:{id}"` — this is what makes
/// tenant and type-scoped invalidation ("remove all keys with that prefix" /
/// "remove keys matching that type in any tenant") cheap prefix/substring
/// scans rather than a separate index.
pub struct TenantCache {
    entries: DashMap<String, (Value, Instant)>,
    default_ttl: Duration,
}

impl TenantCache {
    #[must_use]
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    fn key(tenant_id: i64, resource_type: &str, id: &str) -> String {
        format!("{tenant_id}:{resource_type}:{id}")
    }

    /// Returns the cached document, if present and not expired. An expired
    /// entry is evicted on the way out so it doesn't linger in the map.
    #[must_use]
    pub fn get(&self, tenant_id: i64, resource_type: &str, id: &str) -> Option<Value> {
        let key = Self::key(tenant_id, resource_type, id);
        let hit = self.entries.get(&key).and_then(|entry| {
            let (value, expires_at) = entry.value();
            if *expires_at > Instant::now() {
                Some(value.clone())
            } else {
                None
            }
        });
        if hit.is_none() {
            self.entries.remove(&key);
        }
        hit
    }

    pub fn put(&self, tenant_id: i64, resource_type: &str, id: &str, value: Value) {
        let key = Self::key(tenant_id, resource_type, id);
        self.entries.insert(key, (value, Instant::now() + self.default_ttl));
    }

    /// Invalidates one resource's cached entry (§4.7 "invalidation... keyed
    /// on resource_type plus id").
    pub fn invalidate_resource(&self, tenant_id: i64, resource_type: &str, id: &str) {
        self.entries.remove(&Self::key(tenant_id, resource_type, id));
    }

    /// Invalidates every cached entry belonging to `tenant_id` (§4.7
    /// "invalidation by tenant removes all keys with that prefix").
    pub fn invalidate_tenant(&self, tenant_id: i64) {
        let prefix = format!("{tenant_id}:");
        self.entries.retain(|key, _| !key.starts_with(&prefix));
    }

    /// Invalidates every cached entry of `resource_type` across every
    /// tenant (§4.7 "invalidation by type removes keys matching that type
    /// in any tenant").
    pub fn invalidate_type(&self, resource_type: &str) {
        let needle = format!(":{resource_type}:");
        self.entries.retain(|key, _| !key.contains(&needle));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TenantCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tenant_isolation_holds_across_identical_ids() {
        let cache = TenantCache::new(Duration::from_secs(60));
        cache.put(1, "Patient", "abc", json!({"tenant": 1}));
        cache.put(2, "Patient", "abc", json!({"tenant": 2}));

        assert_eq!(cache.get(1, "Patient", "abc").unwrap()["tenant"], 1);
        assert_eq!(cache.get(2, "Patient", "abc").unwrap()["tenant"], 2);
    }

    #[test]
    fn invalidate_tenant_only_removes_that_tenants_keys() {
        let cache = TenantCache::new(Duration::from_secs(60));
        cache.put(1, "Patient", "abc", json!({}));
        cache.put(2, "Patient", "abc", json!({}));

        cache.invalidate_tenant(1);

        assert!(cache.get(1, "Patient", "abc").is_none());
        assert!(cache.get(2, "Patient", "abc").is_some());
    }

    #[test]
    fn invalidate_type_removes_across_tenants() {
        let cache = TenantCache::new(Duration::from_secs(60));
        cache.put(1, "Patient", "abc", json!({}));
        cache.put(2, "Patient", "abc", json!({}));
        cache.put(1, "Observation", "xyz", json!({}));

        cache.invalidate_type("Patient");

        assert!(cache.get(1, "Patient", "abc").is_none());
        assert!(cache.get(2, "Patient", "abc").is_none());
        assert!(cache.get(1, "Observation", "xyz").is_some());
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let cache = TenantCache::new(Duration::from_millis(1));
        cache.put(1, "Patient", "abc", json!({}));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(1, "Patient", "abc").is_none());
    }
}
