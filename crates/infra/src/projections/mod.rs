//! Reporting projections fed from the event bus.
//!
//! Projections are derived state, rebuildable from the event store. Delivery
//! is at-least-once, so every projection keeps a per-stream cursor and skips
//! envelopes it has already applied.

pub mod credit_ledger;
pub mod vat_report;

pub use credit_ledger::{CreditLedgerEntry, CreditLedgerProjection, ProjectionError};
pub use vat_report::{VatBucket, VatReportProjection};
