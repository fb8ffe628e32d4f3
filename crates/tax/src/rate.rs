use serde::{Deserialize, Serialize};

use dukapos_core::ValueObject;

/// Tax rate in basis points (825 = 8.25%).
///
/// Basis points keep rate math in integers; percentages with two decimal
/// places are exactly representable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxRate(u32);

impl TaxRate {
    pub const ZERO: TaxRate = TaxRate(0);

    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// From a whole percentage (16 = 16%).
    #[inline]
    pub const fn from_percent(percent: u32) -> Self {
        TaxRate(percent * 100)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl ValueObject for TaxRate {}

impl core::fmt::Display for TaxRate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.0 % 100 == 0 {
            write!(f, "{}%", self.0 / 100)
        } else {
            write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
        }
    }
}

/// Tax classification of a product, governing its default rate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxClassification {
    /// Taxed at the tenant's default rate.
    Standard,
    /// Taxed at the tenant's reduced rate.
    Reduced,
    /// Zero-rated supply (taxable at 0%, input tax recoverable).
    Zero,
    /// Exempt supply (outside the tax net).
    Exempt,
}

/// Whether listed prices already contain tax.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingMode {
    /// Listed price already contains tax; tax is carved out of it.
    Inclusive,
    /// Tax is added on top of the listed price.
    Exclusive,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_constructor_scales_to_bps() {
        assert_eq!(TaxRate::from_percent(16).bps(), 1600);
        assert_eq!(TaxRate::from_bps(825).bps(), 825);
    }

    #[test]
    fn display_shows_fractional_rates() {
        assert_eq!(TaxRate::from_percent(16).to_string(), "16%");
        assert_eq!(TaxRate::from_bps(825).to_string(), "8.25%");
    }
}
