//! Tax rules and per-line tax math for sale settlement.
//!
//! Two pure components live here:
//! - the **resolver**, which turns a product's tax profile plus the tenant's
//!   tax policy into an effective rate and classification, and
//! - the **calculator**, which turns unit price, quantity, rate and pricing
//!   mode into exact net/tax/gross amounts for one line item.

pub mod calculator;
pub mod policy;
pub mod product;
pub mod rate;
pub mod resolver;

pub use calculator::{LineTax, calculate};
pub use policy::TenantTaxPolicy;
pub use product::{ProductId, ProductTaxProfile};
pub use rate::{PricingMode, TaxClassification, TaxRate};
pub use resolver::{ResolvedTaxRule, resolve};
