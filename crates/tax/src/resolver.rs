//! Effective-rate resolution for one line item.

use crate::policy::TenantTaxPolicy;
use crate::product::ProductTaxProfile;
use crate::rate::{TaxClassification, TaxRate};

/// The effective rate and classification for a line item.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ResolvedTaxRule {
    pub rate: TaxRate,
    pub classification: TaxClassification,
}

/// Resolve the effective tax rate for a product under a tenant's policy.
///
/// Pure function over its inputs; there are no error conditions. Callers with
/// no stored policy pass `TenantTaxPolicy::default()`.
///
/// Precedence:
/// 1. `charge_tax == false` forces a zero rate (the stored override is ignored,
///    the classification is preserved for reporting);
/// 2. a product-specific rate override;
/// 3. the classification default (standard → tenant default rate, reduced →
///    tenant reduced rate, zero/exempt → 0).
pub fn resolve(profile: &ProductTaxProfile, policy: &TenantTaxPolicy) -> ResolvedTaxRule {
    let classification = profile.classification;

    if !policy.charge_tax {
        return ResolvedTaxRule {
            rate: TaxRate::ZERO,
            classification,
        };
    }

    if let Some(rate) = profile.rate_override {
        return ResolvedTaxRule {
            rate,
            classification,
        };
    }

    let rate = match classification {
        TaxClassification::Standard => policy.default_rate,
        TaxClassification::Reduced => policy.reduced_rate(),
        TaxClassification::Zero | TaxClassification::Exempt => TaxRate::ZERO,
    };

    ResolvedTaxRule {
        rate,
        classification,
    }
}
