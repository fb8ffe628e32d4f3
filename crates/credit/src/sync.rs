//! Sale-credit status synchronization.
//!
//! Pure decision functions: given what just happened on the credit side and
//! the sale's current status, decide whether the sale status must change.
//! `None` means no write, which is what makes retried commands idempotent.
//! The settlement engine applies the returned status in the same transaction
//! as the credit event.

use dukapos_core::Money;
use dukapos_sales::SaleStatus;

use crate::status::CreditStatus;

/// A credit account was opened against the sale.
///
/// A credit sale is not settled until its account is: demote the sale to
/// Pending unless the opening already covered the full total. Cancelled,
/// Refunded and Suspended sales are administrative states this engine never
/// touches.
pub fn on_account_opened(
    sale_status: SaleStatus,
    paid: Money,
    total: Money,
) -> Option<SaleStatus> {
    if !matches!(sale_status, SaleStatus::Pending | SaleStatus::Completed) {
        return None;
    }
    let target = if paid >= total {
        SaleStatus::Completed
    } else {
        SaleStatus::Pending
    };
    if sale_status == target {
        None
    } else {
        Some(target)
    }
}

/// A payment was recorded against the sale's credit account.
///
/// Only the transition into Paid promotes the sale; partial payments leave it
/// Pending.
pub fn on_payment_recorded(
    sale_status: SaleStatus,
    previous: CreditStatus,
    current: CreditStatus,
) -> Option<SaleStatus> {
    if sale_status != SaleStatus::Pending {
        return None;
    }
    if previous != CreditStatus::Paid && current == CreditStatus::Paid {
        return Some(SaleStatus::Completed);
    }
    None
}
