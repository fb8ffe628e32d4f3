use serde::{Deserialize, Serialize};

use dukapos_core::{AggregateId, ValueObject};

use crate::rate::{TaxClassification, TaxRate};

/// Product identifier.
///
/// The catalog itself is an external collaborator; only the tax-relevant
/// slice of a product crosses into the settlement engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// The tax-relevant slice of a catalog entry.
///
/// Immutable per catalog entry except by explicit catalog edit (which happens
/// outside this engine).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductTaxProfile {
    pub classification: TaxClassification,
    /// Product-specific rate that overrides the classification default.
    pub rate_override: Option<TaxRate>,
}

impl ProductTaxProfile {
    pub fn new(classification: TaxClassification) -> Self {
        Self {
            classification,
            rate_override: None,
        }
    }

    pub fn with_override(classification: TaxClassification, rate: TaxRate) -> Self {
        Self {
            classification,
            rate_override: Some(rate),
        }
    }
}

impl ValueObject for ProductTaxProfile {}
