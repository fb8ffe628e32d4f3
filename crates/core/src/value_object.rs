//! Value object trait: equality by value, not identity.
//!
//! Value objects are defined entirely by their attribute values. Two value
//! objects with the same values are the same value.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one,
/// create a new one with the new values. This keeps them safe to share and
/// gives them primitive-like semantics.
///
/// Example: `Money` is a value object; a `CreditPayment` (which has an id and
/// a lifecycle) is an entity.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
