//! Tenant tax policy storage.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;

use dukapos_core::TenantId;
use dukapos_tax::TenantTaxPolicy;

#[derive(Debug, Error)]
pub enum PolicyStoreError {
    #[error("policy storage failure: {0}")]
    Storage(String),
}

/// Storage for per-tenant tax policies.
///
/// Tenants without a saved policy settle on the default (tax charged at 16%,
/// exclusive pricing), which is what `load_or_default` returns.
pub trait TenantPolicyStore: Send + Sync {
    fn load(&self, tenant_id: TenantId) -> Result<Option<TenantTaxPolicy>, PolicyStoreError>;

    fn save(&self, tenant_id: TenantId, policy: TenantTaxPolicy) -> Result<(), PolicyStoreError>;

    fn load_or_default(&self, tenant_id: TenantId) -> Result<TenantTaxPolicy, PolicyStoreError> {
        Ok(self.load(tenant_id)?.unwrap_or_default())
    }
}

impl<S> TenantPolicyStore for Arc<S>
where
    S: TenantPolicyStore + ?Sized,
{
    fn load(&self, tenant_id: TenantId) -> Result<Option<TenantTaxPolicy>, PolicyStoreError> {
        (**self).load(tenant_id)
    }

    fn save(&self, tenant_id: TenantId, policy: TenantTaxPolicy) -> Result<(), PolicyStoreError> {
        (**self).save(tenant_id, policy)
    }
}

/// In-memory policy store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    policies: RwLock<HashMap<TenantId, TenantTaxPolicy>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TenantPolicyStore for InMemoryPolicyStore {
    fn load(&self, tenant_id: TenantId) -> Result<Option<TenantTaxPolicy>, PolicyStoreError> {
        let policies = self
            .policies
            .read()
            .map_err(|_| PolicyStoreError::Storage("lock poisoned".to_string()))?;
        Ok(policies.get(&tenant_id).cloned())
    }

    fn save(&self, tenant_id: TenantId, policy: TenantTaxPolicy) -> Result<(), PolicyStoreError> {
        let mut policies = self
            .policies
            .write()
            .map_err(|_| PolicyStoreError::Storage("lock poisoned".to_string()))?;
        policies.insert(tenant_id, policy);
        Ok(())
    }
}

/// TTL cache in front of a policy store.
///
/// Policies change rarely but are read on every sale, so a short per-tenant
/// cache keeps the hot path off the backing store. `save` writes through and
/// refreshes the cache entry, so a tenant sees its own policy change
/// immediately.
#[derive(Debug)]
pub struct CachedPolicyStore<S> {
    inner: S,
    ttl: Duration,
    cache: RwLock<HashMap<TenantId, (Instant, Option<TenantTaxPolicy>)>>,
}

impl<S> CachedPolicyStore<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn invalidate(&self, tenant_id: TenantId) {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(&tenant_id);
        }
    }
}

impl<S> TenantPolicyStore for CachedPolicyStore<S>
where
    S: TenantPolicyStore,
{
    fn load(&self, tenant_id: TenantId) -> Result<Option<TenantTaxPolicy>, PolicyStoreError> {
        if let Ok(cache) = self.cache.read() {
            if let Some((cached_at, policy)) = cache.get(&tenant_id) {
                if cached_at.elapsed() < self.ttl {
                    return Ok(policy.clone());
                }
            }
        }

        let policy = self.inner.load(tenant_id)?;
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(tenant_id, (Instant::now(), policy.clone()));
        }
        Ok(policy)
    }

    fn save(&self, tenant_id: TenantId, policy: TenantTaxPolicy) -> Result<(), PolicyStoreError> {
        self.inner.save(tenant_id, policy.clone())?;
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(tenant_id, (Instant::now(), Some(policy)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dukapos_tax::{PricingMode, TaxRate};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingStore {
        inner: InMemoryPolicyStore,
        loads: AtomicU32,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: InMemoryPolicyStore::new(),
                loads: AtomicU32::new(0),
            }
        }
    }

    impl TenantPolicyStore for CountingStore {
        fn load(&self, tenant_id: TenantId) -> Result<Option<TenantTaxPolicy>, PolicyStoreError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load(tenant_id)
        }

        fn save(
            &self,
            tenant_id: TenantId,
            policy: TenantTaxPolicy,
        ) -> Result<(), PolicyStoreError> {
            self.inner.save(tenant_id, policy)
        }
    }

    fn custom_policy() -> TenantTaxPolicy {
        TenantTaxPolicy {
            charge_tax: true,
            default_rate: TaxRate::from_percent(18),
            reduced_rate: Some(TaxRate::from_percent(9)),
            pricing_mode: PricingMode::Inclusive,
        }
    }

    #[test]
    fn missing_policy_falls_back_to_default() {
        let store = InMemoryPolicyStore::new();
        let policy = store.load_or_default(TenantId::new()).unwrap();
        assert!(policy.charge_tax);
        assert_eq!(policy.default_rate, TaxRate::from_percent(16));
        assert_eq!(policy.pricing_mode, PricingMode::Exclusive);
    }

    #[test]
    fn saved_policy_round_trips() {
        let store = InMemoryPolicyStore::new();
        let tenant_id = TenantId::new();
        store.save(tenant_id, custom_policy()).unwrap();
        assert_eq!(store.load(tenant_id).unwrap(), Some(custom_policy()));
    }

    #[test]
    fn cache_serves_repeat_loads_without_hitting_the_store() {
        let counting = Arc::new(CountingStore::new());
        let tenant_id = TenantId::new();
        counting.save(tenant_id, custom_policy()).unwrap();

        let cached = CachedPolicyStore::new(counting.clone(), Duration::from_secs(60));
        cached.load(tenant_id).unwrap();
        cached.load(tenant_id).unwrap();
        cached.load(tenant_id).unwrap();

        assert_eq!(counting.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn save_through_cache_is_visible_immediately() {
        let counting = Arc::new(CountingStore::new());
        let tenant_id = TenantId::new();
        let cached = CachedPolicyStore::new(counting.clone(), Duration::from_secs(60));

        // Prime the cache with the missing state.
        assert_eq!(cached.load(tenant_id).unwrap(), None);

        cached.save(tenant_id, custom_policy()).unwrap();
        assert_eq!(cached.load(tenant_id).unwrap(), Some(custom_policy()));
        // Second load came from cache, not the store.
        assert_eq!(counting.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalidate_forces_a_reload() {
        let counting = Arc::new(CountingStore::new());
        let tenant_id = TenantId::new();
        let cached = CachedPolicyStore::new(counting.clone(), Duration::from_secs(60));

        cached.load(tenant_id).unwrap();
        cached.invalidate(tenant_id);
        cached.load(tenant_id).unwrap();
        assert_eq!(counting.loads.load(Ordering::SeqCst), 2);
    }
}
