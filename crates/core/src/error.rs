//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
///
/// Every message names the precondition that failed with concrete values so
/// the calling layer can render an actionable message, never a generic one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed or out-of-range input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A monetary amount violated a domain rule (negative, exceeds total, ...).
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// A credit account already exists for the sale (idempotency guard).
    #[error("duplicate credit account: {0}")]
    DuplicateCreditAccount(String),

    /// A payment was attempted against a closed or suspended account.
    #[error("account not payable: {0}")]
    AccountNotPayable(String),

    /// A payment exceeded the remaining balance; the whole payment is rejected.
    #[error("overpayment rejected: {0}")]
    OverpaymentRejected(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found: {0}")]
    NotFound(String),

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::InvalidAmount(msg.into())
    }

    pub fn duplicate_credit_account(msg: impl Into<String>) -> Self {
        Self::DuplicateCreditAccount(msg.into())
    }

    pub fn account_not_payable(msg: impl Into<String>) -> Self {
        Self::AccountNotPayable(msg.into())
    }

    pub fn overpayment_rejected(msg: impl Into<String>) -> Self {
        Self::OverpaymentRejected(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_specific_context() {
        let err = DomainError::overpayment_rejected(
            "payment amount 700.00 exceeds remaining balance 400.00",
        );
        assert_eq!(
            err.to_string(),
            "overpayment rejected: payment amount 700.00 exceeds remaining balance 400.00"
        );

        let err = DomainError::invalid_amount("upfront payment must not be negative, got -1.00");
        assert!(err.to_string().contains("-1.00"));
    }
}
