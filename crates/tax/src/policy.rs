use serde::{Deserialize, Serialize};

use dukapos_core::ValueObject;

use crate::rate::{PricingMode, TaxRate};

/// Per-tenant tax policy.
///
/// One per tenant, created lazily with safe defaults the first time a tenant
/// transacts (an absent policy is never an error). Read-mostly: changed only
/// by rare administrative action.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantTaxPolicy {
    /// When false, every line resolves to a zero rate regardless of product
    /// configuration.
    pub charge_tax: bool,
    /// Rate applied to standard-rated products.
    pub default_rate: TaxRate,
    /// Rate applied to reduced-rated products; 8% when unset.
    pub reduced_rate: Option<TaxRate>,
    /// Whether listed prices contain tax.
    pub pricing_mode: PricingMode,
}

impl TenantTaxPolicy {
    const DEFAULT_REDUCED_RATE: TaxRate = TaxRate::from_percent(8);

    /// Effective reduced rate (configured, or the 8% fallback).
    pub fn reduced_rate(&self) -> TaxRate {
        self.reduced_rate.unwrap_or(Self::DEFAULT_REDUCED_RATE)
    }
}

impl Default for TenantTaxPolicy {
    /// Safe defaults: tax charged, 16% standard rate, tax-exclusive pricing.
    fn default() -> Self {
        Self {
            charge_tax: true,
            default_rate: TaxRate::from_percent(16),
            reduced_rate: None,
            pricing_mode: PricingMode::Exclusive,
        }
    }
}

impl ValueObject for TenantTaxPolicy {}
