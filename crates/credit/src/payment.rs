//! Payment value objects and the payment entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dukapos_core::{AggregateId, Entity, Money, UserId};

/// Identifier of a credit customer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(pub AggregateId);

impl CustomerId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CustomerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Identifier of a single recorded payment.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub AggregateId);

impl PaymentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PaymentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// How a payment was tendered at the till.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    MobileMoney,
    Card,
    BankTransfer,
}

/// Human-readable receipt number, unique per tenant.
///
/// Format: `PAY-<unix millis>-<8 hex chars>`. The entropy tail comes from the
/// caller so generation stays deterministic under test.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentNumber(String);

impl PaymentNumber {
    pub fn generate(at: DateTime<Utc>, entropy: Uuid) -> Self {
        let simple = entropy.simple().to_string();
        let tail = &simple[simple.len() - 8..];
        Self(format!("PAY-{}-{}", at.timestamp_millis(), tail))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for PaymentNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One payment recorded against a credit account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditPayment {
    pub id: PaymentId,
    pub payment_number: PaymentNumber,
    pub amount: Money,
    pub method: PaymentMethod,
    pub received_by: Option<UserId>,
    pub received_at: DateTime<Utc>,
}

impl Entity for CreditPayment {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_number_format() {
        let at = DateTime::parse_from_rfc3339("2025-03-01T09:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let entropy = Uuid::parse_str("0195f2c4-1111-7222-8333-abcdef123456").unwrap();
        let number = PaymentNumber::generate(at, entropy);

        assert_eq!(number.as_str(), "PAY-1740821400000-ef123456");
    }

    #[test]
    fn payment_number_is_time_prefixed() {
        let earlier = DateTime::parse_from_rfc3339("2025-03-01T09:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = earlier + chrono::Duration::seconds(1);
        let entropy = Uuid::now_v7();

        let a = PaymentNumber::generate(earlier, entropy);
        let b = PaymentNumber::generate(later, entropy);
        assert_ne!(a, b);
        assert!(a.as_str() < b.as_str());
    }
}
