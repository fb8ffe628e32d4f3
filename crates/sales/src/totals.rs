//! Sale-level totals from per-line tax calculations.

use serde::{Deserialize, Serialize};

use dukapos_core::{DomainError, DomainResult, Money, ValueObject};
use dukapos_tax::LineTax;

/// Aggregated amounts for one sale.
///
/// The discount applies only to the final total and is never redistributed
/// across line taxes, so `subtotal + tax_amount` may exceed `total_amount` by
/// exactly the applied discount.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleTotals {
    /// Sum of line net amounts.
    pub subtotal: Money,
    /// Sum of line tax amounts.
    pub tax_amount: Money,
    /// Discount applied to the gross sum.
    pub discount_amount: Money,
    /// `max(0, Σ gross − discount)`.
    pub total_amount: Money,
}

impl ValueObject for SaleTotals {}

/// Combine line calculations plus a discount into sale totals.
///
/// A discount exceeding the gross sum clamps the total at zero rather than
/// rejecting the sale; the excess stays visible to reporting as
/// `subtotal + tax_amount - total_amount`.
pub fn aggregate_totals(lines: &[LineTax], discount: Money) -> DomainResult<SaleTotals> {
    if discount.is_negative() {
        return Err(DomainError::validation(format!(
            "discount must not be negative, got {discount}"
        )));
    }

    let mut subtotal = Money::ZERO;
    let mut tax_amount = Money::ZERO;
    let mut gross_sum = Money::ZERO;
    for line in lines {
        subtotal = subtotal.checked_add(line.net)?;
        tax_amount = tax_amount.checked_add(line.tax)?;
        gross_sum = gross_sum.checked_add(line.gross)?;
    }

    let total_amount = if discount > gross_sum {
        Money::ZERO
    } else {
        gross_sum.checked_sub(discount)?
    };

    Ok(SaleTotals {
        subtotal,
        tax_amount,
        discount_amount: discount,
        total_amount,
    })
}
