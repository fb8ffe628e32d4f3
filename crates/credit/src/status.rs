//! Credit account status evaluation.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use dukapos_core::Money;

/// Credit account status.
///
/// Closed and Suspended are manual administrative states; evaluation never
/// overrides them. Paid is terminal (the balance cannot grow again).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditStatus {
    Active,
    Overdue,
    Paid,
    Closed,
    Suspended,
}

impl CreditStatus {
    /// True for statuses that still accept payments.
    pub fn is_payable(self) -> bool {
        matches!(self, CreditStatus::Active | CreditStatus::Overdue)
    }
}

impl core::fmt::Display for CreditStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            CreditStatus::Active => "active",
            CreditStatus::Overdue => "overdue",
            CreditStatus::Paid => "paid",
            CreditStatus::Closed => "closed",
            CreditStatus::Suspended => "suspended",
        };
        f.write_str(s)
    }
}

/// Re-evaluate a status from the account's balance and due date.
///
/// The sticky check comes first: a manually Closed or Suspended account keeps
/// its status regardless of balance or calendar, until an explicit command
/// changes it. Settlement always wins over the calendar, so a zero balance is
/// Paid even when the due date has passed.
pub fn evaluate(
    current: CreditStatus,
    remaining: Money,
    today: NaiveDate,
    due_date: NaiveDate,
) -> CreditStatus {
    if matches!(current, CreditStatus::Closed | CreditStatus::Suspended) {
        return current;
    }
    if remaining.is_zero() {
        return CreditStatus::Paid;
    }
    if today > due_date {
        return CreditStatus::Overdue;
    }
    CreditStatus::Active
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn outstanding_balance_before_due_date_is_active() {
        let status = evaluate(
            CreditStatus::Active,
            Money::from_major(100),
            date("2025-03-01"),
            date("2025-03-31"),
        );
        assert_eq!(status, CreditStatus::Active);
    }

    #[test]
    fn on_the_due_date_is_still_active() {
        let status = evaluate(
            CreditStatus::Active,
            Money::from_major(100),
            date("2025-03-31"),
            date("2025-03-31"),
        );
        assert_eq!(status, CreditStatus::Active);
    }

    #[test]
    fn past_due_date_with_balance_is_overdue() {
        let status = evaluate(
            CreditStatus::Active,
            Money::from_major(100),
            date("2025-04-01"),
            date("2025-03-31"),
        );
        assert_eq!(status, CreditStatus::Overdue);
    }

    #[test]
    fn zero_balance_is_paid_even_past_due() {
        let status = evaluate(
            CreditStatus::Overdue,
            Money::ZERO,
            date("2025-04-15"),
            date("2025-03-31"),
        );
        assert_eq!(status, CreditStatus::Paid);
    }

    #[test]
    fn closed_and_suspended_are_sticky() {
        for sticky in [CreditStatus::Closed, CreditStatus::Suspended] {
            let status = evaluate(sticky, Money::ZERO, date("2025-04-15"), date("2025-03-31"));
            assert_eq!(status, sticky);

            let status = evaluate(
                sticky,
                Money::from_major(50),
                date("2025-04-15"),
                date("2025-03-31"),
            );
            assert_eq!(status, sticky);
        }
    }

    #[test]
    fn overdue_recovers_to_active_only_via_evaluation_inputs() {
        // Overdue is not sticky; it flips back if the due date moves forward
        // (e.g. a rescheduled account) or the balance clears.
        let status = evaluate(
            CreditStatus::Overdue,
            Money::from_major(10),
            date("2025-03-01"),
            date("2025-03-31"),
        );
        assert_eq!(status, CreditStatus::Active);
    }

    #[test]
    fn payable_statuses() {
        assert!(CreditStatus::Active.is_payable());
        assert!(CreditStatus::Overdue.is_payable());
        assert!(!CreditStatus::Paid.is_payable());
        assert!(!CreditStatus::Closed.is_payable());
        assert!(!CreditStatus::Suspended.is_payable());
    }
}
