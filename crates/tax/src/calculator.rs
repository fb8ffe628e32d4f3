//! Per-line tax calculation.

use serde::{Deserialize, Serialize};

use dukapos_core::{DomainError, DomainResult, Money, ValueObject};

use crate::rate::{PricingMode, TaxRate};

/// Net/tax/gross amounts for one line item.
///
/// Derived, never persisted on its own; computed fresh per sale and immutable
/// once the sale is saved (append-only settlement).
///
/// Invariant: `net + tax == gross` exactly, post-rounding. The calculator
/// guarantees this by rounding only the tax and deriving the complementary
/// amount by addition/subtraction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineTax {
    pub net: Money,
    pub tax: Money,
    pub gross: Money,
    pub rate: TaxRate,
}

impl ValueObject for LineTax {}

/// Compute net/tax/gross for one line item.
///
/// - Exclusive pricing: `net = unit_price × qty`, tax is added on top.
/// - Inclusive pricing: `gross = unit_price × qty`, tax is carved out of it
///   (`tax = gross × rate / (100 + rate)`).
///
/// Tax is rounded to the currency's minor unit half-to-even; the complementary
/// amount is derived from the rounded tax so the line-item invariant holds
/// exactly, not just in aggregate.
pub fn calculate(
    unit_price: Money,
    quantity: i64,
    rate: TaxRate,
    pricing_mode: PricingMode,
) -> DomainResult<LineTax> {
    if unit_price.is_negative() {
        return Err(DomainError::validation(format!(
            "unit price must not be negative, got {unit_price}"
        )));
    }
    if quantity < 1 {
        return Err(DomainError::validation(format!(
            "quantity must be at least 1, got {quantity}"
        )));
    }

    let line_amount = unit_price.times(quantity)?;
    let bps = rate.bps() as i64;

    match pricing_mode {
        PricingMode::Exclusive => {
            let net = line_amount;
            let tax = net.mul_div_half_even(bps, 10_000)?;
            let gross = net.checked_add(tax)?;
            Ok(LineTax {
                net,
                tax,
                gross,
                rate,
            })
        }
        PricingMode::Inclusive => {
            let gross = line_amount;
            let tax = gross.mul_div_half_even(bps, 10_000 + bps)?;
            let net = gross.checked_sub(tax)?;
            Ok(LineTax {
                net,
                tax,
                gross,
                rate,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exclusive_sixteen_percent_times_two() {
        // unit 100.00, qty 2, 16% exclusive -> net 200.00, tax 32.00, gross 232.00
        let line = calculate(
            Money::from_major(100),
            2,
            TaxRate::from_percent(16),
            PricingMode::Exclusive,
        )
        .unwrap();
        assert_eq!(line.net, Money::from_major(200));
        assert_eq!(line.tax, Money::from_major(32));
        assert_eq!(line.gross, Money::from_major(232));
    }

    #[test]
    fn inclusive_carves_tax_out_of_gross() {
        // 100.00 inclusive at 16%: tax = 10000 * 1600 / 11600 = 1379.31.. -> 13.79
        let line = calculate(
            Money::from_major(100),
            1,
            TaxRate::from_percent(16),
            PricingMode::Inclusive,
        )
        .unwrap();
        assert_eq!(line.gross, Money::from_major(100));
        assert_eq!(line.tax, Money::from_minor(1379));
        assert_eq!(line.net, Money::from_minor(8621));
        assert_eq!(line.net + line.tax, line.gross);
    }

    #[test]
    fn fractional_rate_rounds_half_even() {
        // 10.00 at 8.25% = 0.825 -> 0.82 (tie rounds to the even cent)
        let line = calculate(
            Money::from_major(10),
            1,
            TaxRate::from_bps(825),
            PricingMode::Exclusive,
        )
        .unwrap();
        assert_eq!(line.tax, Money::from_minor(82));
        assert_eq!(line.gross, Money::from_minor(1082));
    }

    #[test]
    fn zero_rate_has_zero_tax() {
        let line = calculate(
            Money::from_minor(333),
            3,
            TaxRate::ZERO,
            PricingMode::Exclusive,
        )
        .unwrap();
        assert_eq!(line.net, Money::from_minor(999));
        assert!(line.tax.is_zero());
        assert_eq!(line.gross, line.net);
    }

    #[test]
    fn negative_unit_price_is_rejected() {
        let err = calculate(
            Money::from_minor(-1),
            1,
            TaxRate::from_percent(16),
            PricingMode::Exclusive,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        for quantity in [0, -3] {
            let err = calculate(
                Money::from_major(10),
                quantity,
                TaxRate::from_percent(16),
                PricingMode::Exclusive,
            )
            .unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)));
        }
    }

    proptest! {
        /// Post-rounding, `net + tax == gross` must hold for every line item.
        #[test]
        fn net_plus_tax_equals_gross(
            unit_minor in 0i64..=10_000_000,
            quantity in 1i64..=1_000,
            bps in 0u32..=5_000,
            inclusive in any::<bool>(),
        ) {
            let mode = if inclusive { PricingMode::Inclusive } else { PricingMode::Exclusive };
            let line = calculate(
                Money::from_minor(unit_minor),
                quantity,
                TaxRate::from_bps(bps),
                mode,
            ).unwrap();

            prop_assert_eq!(line.net + line.tax, line.gross);
            prop_assert!(!line.tax.is_negative());
            prop_assert!(!line.net.is_negative());
        }

        /// Inclusive pricing never produces tax larger than the gross amount.
        #[test]
        fn inclusive_tax_bounded_by_gross(
            unit_minor in 0i64..=10_000_000,
            quantity in 1i64..=1_000,
            bps in 0u32..=5_000,
        ) {
            let line = calculate(
                Money::from_minor(unit_minor),
                quantity,
                TaxRate::from_bps(bps),
                PricingMode::Inclusive,
            ).unwrap();

            prop_assert!(line.tax <= line.gross);
            prop_assert_eq!(line.gross, Money::from_minor(unit_minor * quantity));
        }
    }
}
