use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dukapos_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Money, TenantId};
use dukapos_events::Event;
use dukapos_tax::{LineTax, ProductId, TaxClassification};

use crate::totals::{SaleTotals, aggregate_totals};

/// Sale identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SaleId(pub AggregateId);

impl SaleId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SaleId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Branch (till location) identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(pub AggregateId);

impl BranchId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

/// Sale status lifecycle.
///
/// A captured sale lands Completed; the credit ledger demotes credit sales to
/// Pending until the account is settled. Cancelled/Suspended/Refunded are
/// administrative states set outside the settlement engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleStatus {
    Pending,
    Completed,
    Cancelled,
    Suspended,
    Refunded,
}

/// Sale line: product, quantity, unit price, and its computed tax amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Money,
    pub tax: LineTax,
    pub classification: TaxClassification,
}

/// Aggregate root: Sale.
///
/// Created once at sale time. After creation, `status` is the only field this
/// engine may mutate, and only through the sale-credit synchronizer path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sale {
    id: SaleId,
    tenant_id: Option<TenantId>,
    branch_id: Option<BranchId>,
    status: SaleStatus,
    lines: Vec<SaleLine>,
    totals: SaleTotals,
    is_credit_sale: bool,
    version: u64,
    created: bool,
}

impl Sale {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: SaleId) -> Self {
        Self {
            id,
            tenant_id: None,
            branch_id: None,
            status: SaleStatus::Pending,
            lines: Vec::new(),
            totals: SaleTotals {
                subtotal: Money::ZERO,
                tax_amount: Money::ZERO,
                discount_amount: Money::ZERO,
                total_amount: Money::ZERO,
            },
            is_credit_sale: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SaleId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    pub fn status(&self) -> SaleStatus {
        self.status
    }

    pub fn lines(&self) -> &[SaleLine] {
        &self.lines
    }

    pub fn totals(&self) -> &SaleTotals {
        &self.totals
    }

    pub fn total_amount(&self) -> Money {
        self.totals.total_amount
    }

    pub fn is_credit_sale(&self) -> bool {
        self.is_credit_sale
    }

    pub fn exists(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Sale {
    type Id = SaleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateSale.
///
/// Lines arrive with their tax already computed (resolver + calculator run in
/// the settlement engine); the aggregate re-validates the per-line invariant
/// and recomputes totals itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSale {
    pub tenant_id: TenantId,
    pub sale_id: SaleId,
    pub branch_id: BranchId,
    pub lines: Vec<SaleLine>,
    pub discount: Money,
    pub is_credit_sale: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeSaleStatus.
///
/// Reserved for the sale-credit synchronizer; idempotent (a same-status
/// command emits no events).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSaleStatus {
    pub tenant_id: TenantId,
    pub sale_id: SaleId,
    pub status: SaleStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaleCommand {
    CreateSale(CreateSale),
    ChangeSaleStatus(ChangeSaleStatus),
}

/// Event: SaleCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleCreated {
    pub tenant_id: TenantId,
    pub sale_id: SaleId,
    pub branch_id: BranchId,
    pub lines: Vec<SaleLine>,
    pub totals: SaleTotals,
    pub is_credit_sale: bool,
    pub status: SaleStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SaleStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleStatusChanged {
    pub tenant_id: TenantId,
    pub sale_id: SaleId,
    pub status: SaleStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaleEvent {
    SaleCreated(SaleCreated),
    SaleStatusChanged(SaleStatusChanged),
}

impl Event for SaleEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SaleEvent::SaleCreated(_) => "sales.sale.created",
            SaleEvent::SaleStatusChanged(_) => "sales.sale.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SaleEvent::SaleCreated(e) => e.occurred_at,
            SaleEvent::SaleStatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Sale {
    type Command = SaleCommand;
    type Event = SaleEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SaleEvent::SaleCreated(e) => {
                self.id = e.sale_id;
                self.tenant_id = Some(e.tenant_id);
                self.branch_id = Some(e.branch_id);
                self.lines = e.lines.clone();
                self.totals = e.totals;
                self.is_credit_sale = e.is_credit_sale;
                self.status = e.status;
                self.created = true;
            }
            SaleEvent::SaleStatusChanged(e) => {
                self.status = e.status;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SaleCommand::CreateSale(cmd) => self.handle_create(cmd),
            SaleCommand::ChangeSaleStatus(cmd) => self.handle_change_status(cmd),
        }
    }
}

impl Sale {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_sale_id(&self, sale_id: SaleId) -> Result<(), DomainError> {
        if self.id != sale_id {
            return Err(DomainError::invariant("sale_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateSale) -> Result<Vec<SaleEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("sale already exists"));
        }

        if cmd.lines.is_empty() {
            return Err(DomainError::validation("cannot capture sale without lines"));
        }

        for line in &cmd.lines {
            if line.quantity < 1 {
                return Err(DomainError::validation(format!(
                    "line {} quantity must be at least 1, got {}",
                    line.line_no, line.quantity
                )));
            }
            if line.unit_price.is_negative() {
                return Err(DomainError::validation(format!(
                    "line {} unit price must not be negative, got {}",
                    line.line_no, line.unit_price
                )));
            }
            if line.tax.net + line.tax.tax != line.tax.gross {
                return Err(DomainError::invariant(format!(
                    "line {} tax amounts are inconsistent: {} + {} != {}",
                    line.line_no, line.tax.net, line.tax.tax, line.tax.gross
                )));
            }
        }

        // Totals are always recomputed here; callers cannot supply them.
        let line_taxes: Vec<_> = cmd.lines.iter().map(|l| l.tax).collect();
        let totals = aggregate_totals(&line_taxes, cmd.discount)?;

        Ok(vec![SaleEvent::SaleCreated(SaleCreated {
            tenant_id: cmd.tenant_id,
            sale_id: cmd.sale_id,
            branch_id: cmd.branch_id,
            lines: cmd.lines.clone(),
            totals,
            is_credit_sale: cmd.is_credit_sale,
            status: SaleStatus::Completed,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(&self, cmd: &ChangeSaleStatus) -> Result<Vec<SaleEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!(
                "sale {} does not exist",
                cmd.sale_id
            )));
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_sale_id(cmd.sale_id)?;

        // Idempotent: a same-status command is a no-op, not an error.
        if self.status == cmd.status {
            return Ok(vec![]);
        }

        Ok(vec![SaleEvent::SaleStatusChanged(SaleStatusChanged {
            tenant_id: cmd.tenant_id,
            sale_id: cmd.sale_id,
            status: cmd.status,
            occurred_at: cmd.occurred_at,
        })])
    }
}
