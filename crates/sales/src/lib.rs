//! Sale capture: the sale aggregate and sale-level totals.

pub mod sale;
pub mod totals;

pub use sale::{
    BranchId, ChangeSaleStatus, CreateSale, Sale, SaleCommand, SaleCreated, SaleEvent, SaleId,
    SaleLine, SaleStatus, SaleStatusChanged,
};
pub use totals::{SaleTotals, aggregate_totals};
