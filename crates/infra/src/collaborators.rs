//! Collaborator lookups the settlement engine depends on.
//!
//! Product and customer master data live outside this engine; it only needs
//! two narrow read interfaces from them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use dukapos_core::TenantId;
use dukapos_credit::CustomerId;
use dukapos_tax::{ProductId, ProductTaxProfile};

/// Read access to product tax configuration.
pub trait ProductCatalog: Send + Sync {
    /// Tax profile of a product, or `None` when the product is unknown.
    /// Unknown products settle at the standard classification.
    fn tax_profile(&self, tenant_id: TenantId, product_id: ProductId) -> Option<ProductTaxProfile>;
}

impl<C> ProductCatalog for Arc<C>
where
    C: ProductCatalog + ?Sized,
{
    fn tax_profile(&self, tenant_id: TenantId, product_id: ProductId) -> Option<ProductTaxProfile> {
        (**self).tax_profile(tenant_id, product_id)
    }
}

/// Read access to the customer register.
pub trait CustomerRegistry: Send + Sync {
    /// Whether the customer exists under this tenant. Credit accounts can
    /// only be opened for known customers.
    fn exists(&self, tenant_id: TenantId, customer_id: CustomerId) -> bool;
}

impl<R> CustomerRegistry for Arc<R>
where
    R: CustomerRegistry + ?Sized,
{
    fn exists(&self, tenant_id: TenantId, customer_id: CustomerId) -> bool {
        (**self).exists(tenant_id, customer_id)
    }
}

/// In-memory product catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryProductCatalog {
    profiles: RwLock<HashMap<(TenantId, ProductId), ProductTaxProfile>>,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, tenant_id: TenantId, product_id: ProductId, profile: ProductTaxProfile) {
        if let Ok(mut profiles) = self.profiles.write() {
            profiles.insert((tenant_id, product_id), profile);
        }
    }
}

impl ProductCatalog for InMemoryProductCatalog {
    fn tax_profile(&self, tenant_id: TenantId, product_id: ProductId) -> Option<ProductTaxProfile> {
        self.profiles
            .read()
            .ok()
            .and_then(|profiles| profiles.get(&(tenant_id, product_id)).cloned())
    }
}

/// In-memory customer registry for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCustomerRegistry {
    customers: RwLock<HashSet<(TenantId, CustomerId)>>,
}

impl InMemoryCustomerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tenant_id: TenantId, customer_id: CustomerId) {
        if let Ok(mut customers) = self.customers.write() {
            customers.insert((tenant_id, customer_id));
        }
    }
}

impl CustomerRegistry for InMemoryCustomerRegistry {
    fn exists(&self, tenant_id: TenantId, customer_id: CustomerId) -> bool {
        self.customers
            .read()
            .map(|customers| customers.contains(&(tenant_id, customer_id)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dukapos_core::AggregateId;
    use dukapos_tax::{TaxClassification, TaxRate};

    #[test]
    fn catalog_is_tenant_scoped() {
        let catalog = InMemoryProductCatalog::new();
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();
        let product_id = ProductId::new(AggregateId::new());

        catalog.upsert(
            tenant_a,
            product_id,
            ProductTaxProfile::with_override(TaxClassification::Standard, TaxRate::from_bps(825)),
        );

        assert!(catalog.tax_profile(tenant_a, product_id).is_some());
        assert!(catalog.tax_profile(tenant_b, product_id).is_none());
    }

    #[test]
    fn registry_only_knows_registered_customers() {
        let registry = InMemoryCustomerRegistry::new();
        let tenant_id = TenantId::new();
        let customer_id = CustomerId::new(AggregateId::new());

        assert!(!registry.exists(tenant_id, customer_id));
        registry.register(tenant_id, customer_id);
        assert!(registry.exists(tenant_id, customer_id));
        assert!(!registry.exists(TenantId::new(), customer_id));
    }
}
