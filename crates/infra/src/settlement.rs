//! Settlement engine: the command pipeline for sales and credit accounts.
//!
//! Every operation follows the same shape: load the stream, rehydrate the
//! aggregate, let it decide events, append with an optimistic version check,
//! then publish the committed events to the bus. Operations that touch both
//! a sale and its credit account append both streams in one transaction, so
//! the synchronizer's sale status change can never land without the credit
//! event that caused it (or vice versa).
//!
//! Appends that lose a concurrency race are retried a bounded number of
//! times with jittered backoff, reloading state each attempt; exhaustion
//! surfaces as `SettlementError::ConcurrencyConflict`.
//!
//! Publication happens after the append. If it fails the events are already
//! durable, so delivery is at-least-once and consumers must be idempotent.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use dukapos_core::{
    Aggregate, AggregateId, DomainError, ExpectedVersion, Money, TenantId, UserId,
};
use dukapos_credit::{
    CreditAccount, CreditAccountId, CreditCommand, CreditEvent, CustomerId, OpenCreditAccount,
    PaymentId, PaymentMethod, PaymentNumber, RecordPayment, UpfrontPayment, on_account_opened,
    on_payment_recorded,
};
use dukapos_events::{Event, EventBus, EventEnvelope};
use dukapos_sales::{BranchId, CreateSale, Sale, SaleCommand, SaleId, SaleLine};
use dukapos_tax::{ProductId, ProductTaxProfile, TaxClassification, calculate, resolve};

use crate::collaborators::{CustomerRegistry, ProductCatalog};
use crate::event_store::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};
use crate::index::{IndexError, SettlementIndex};
use crate::policy_store::{PolicyStoreError, TenantPolicyStore};

pub const SALE_AGGREGATE_TYPE: &str = "sales.sale";
pub const CREDIT_ACCOUNT_AGGREGATE_TYPE: &str = "credit.account";

const MAX_APPEND_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// An append lost the optimistic concurrency race on every attempt.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("event store failure: {0}")]
    Store(EventStoreError),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// Events were committed but publication failed (at-least-once; the
    /// store remains the source of truth).
    #[error("event publication failed: {0}")]
    Publish(String),

    #[error("failed to decode stored event: {0}")]
    Deserialize(String),

    #[error("policy store failure: {0}")]
    Policy(#[from] PolicyStoreError),

    #[error("settlement index failure: {0}")]
    Index(String),
}

impl From<EventStoreError> for SettlementError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::TenantIsolation(msg) => SettlementError::TenantIsolation(msg),
            other => SettlementError::Store(other),
        }
    }
}

/// A sale line as entered at the till, before tax resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleLineDraft {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSaleRequest {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub lines: Vec<SaleLineDraft>,
    pub discount: Money,
    pub is_credit_sale: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Money tendered at account opening. Zero upfront is expressed by omitting
/// the tender entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpfrontTender {
    pub amount: Money,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenCreditAccountRequest {
    pub tenant_id: TenantId,
    pub sale_id: SaleId,
    pub customer_id: CustomerId,
    pub due_date: NaiveDate,
    pub upfront: Option<UpfrontTender>,
    pub received_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPaymentRequest {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub received_by: Option<UserId>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Orchestrates sale capture and credit ledger commands against the event
/// store, keeping the two sides in sync.
pub struct SettlementEngine<S, B> {
    store: S,
    bus: B,
    index: Arc<dyn SettlementIndex>,
    policies: Arc<dyn TenantPolicyStore>,
    catalog: Arc<dyn ProductCatalog>,
    customers: Arc<dyn CustomerRegistry>,
}

impl<S, B> SettlementEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        store: S,
        bus: B,
        index: Arc<dyn SettlementIndex>,
        policies: Arc<dyn TenantPolicyStore>,
        catalog: Arc<dyn ProductCatalog>,
        customers: Arc<dyn CustomerRegistry>,
    ) -> Self {
        Self {
            store,
            bus,
            index,
            policies,
            catalog,
            customers,
        }
    }

    /// Capture a sale: resolve tax per line under the tenant's policy,
    /// compute totals, and persist the created sale.
    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id), err)]
    pub fn create_sale(&self, request: CreateSaleRequest) -> Result<Sale, SettlementError> {
        let tenant_id = request.tenant_id;
        let policy = self.policies.load_or_default(tenant_id)?;

        let mut lines = Vec::with_capacity(request.lines.len());
        for draft in &request.lines {
            let profile = self
                .catalog
                .tax_profile(tenant_id, draft.product_id)
                .unwrap_or_else(|| ProductTaxProfile::new(TaxClassification::Standard));
            let rule = resolve(&profile, &policy);
            let tax = calculate(draft.unit_price, draft.quantity, rule.rate, policy.pricing_mode)?;
            lines.push(SaleLine {
                line_no: draft.line_no,
                product_id: draft.product_id,
                quantity: draft.quantity,
                unit_price: draft.unit_price,
                tax,
                classification: rule.classification,
            });
        }

        let sale_id = SaleId::new(AggregateId::new());
        let mut sale = Sale::empty(sale_id);
        let events = sale.handle(&SaleCommand::CreateSale(CreateSale {
            tenant_id,
            sale_id,
            branch_id: request.branch_id,
            lines,
            discount: request.discount,
            is_credit_sale: request.is_credit_sale,
            occurred_at: request.occurred_at,
        }))?;

        let committed = self.store.append(
            to_uncommitted(tenant_id, sale_id.0, SALE_AGGREGATE_TYPE, &events)?,
            ExpectedVersion::Exact(0),
        )?;
        self.publish_all(&committed)?;

        for event in &events {
            sale.apply(event);
        }
        tracing::info!(sale_id = %sale_id, total = %sale.total_amount(), "sale captured");
        Ok(sale)
    }

    /// Open a credit account against a captured credit sale.
    ///
    /// At most one account per sale; the account total is the sale total.
    /// The synchronizer demotes the sale to Pending in the same transaction
    /// unless the upfront tender covers the whole total.
    #[instrument(
        skip(self, request),
        fields(tenant_id = %request.tenant_id, sale_id = %request.sale_id),
        err
    )]
    pub fn open_credit_account(
        &self,
        request: OpenCreditAccountRequest,
    ) -> Result<CreditAccount, SettlementError> {
        if !self.customers.exists(request.tenant_id, request.customer_id) {
            return Err(DomainError::not_found(format!(
                "customer {} is not registered under this tenant",
                request.customer_id
            ))
            .into());
        }

        let account_id = CreditAccountId::new(AggregateId::new());
        let account = self.with_retry("credit.open_account", || {
            self.try_open_account(&request, account_id)
        })?;
        tracing::info!(
            account_id = %account_id,
            total = %account.total(),
            status = %account.status(),
            "credit account opened"
        );
        Ok(account)
    }

    /// Record a payment against a credit account.
    ///
    /// The whole amount applies to this account's balance; overpayments are
    /// rejected outright. The transition into Paid promotes the linked sale
    /// to Completed in the same transaction.
    #[instrument(
        skip(self, request),
        fields(tenant_id = %request.tenant_id, account_id = %request.account_id),
        err
    )]
    pub fn record_payment(
        &self,
        request: RecordPaymentRequest,
    ) -> Result<CreditAccount, SettlementError> {
        let account = self.with_retry("credit.record_payment", || {
            self.try_record_payment(&request)
        })?;
        tracing::info!(
            remaining = %account.remaining(),
            status = %account.status(),
            "payment recorded"
        );
        Ok(account)
    }

    /// Administratively close a credit account.
    pub fn close_account(
        &self,
        tenant_id: TenantId,
        account_id: CreditAccountId,
        occurred_at: DateTime<Utc>,
    ) -> Result<CreditAccount, SettlementError> {
        let command = CreditCommand::Close(dukapos_credit::CloseAccount {
            tenant_id,
            account_id,
            occurred_at,
        });
        self.with_retry("credit.close_account", || {
            self.execute_account_command(tenant_id, account_id, &command)
        })
    }

    /// Administratively suspend a credit account.
    pub fn suspend_account(
        &self,
        tenant_id: TenantId,
        account_id: CreditAccountId,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<CreditAccount, SettlementError> {
        let command = CreditCommand::Suspend(dukapos_credit::SuspendAccount {
            tenant_id,
            account_id,
            reason,
            occurred_at,
        });
        self.with_retry("credit.suspend_account", || {
            self.execute_account_command(tenant_id, account_id, &command)
        })
    }

    /// Lift a suspension; the account status is re-evaluated from its
    /// balance and due date.
    pub fn resume_account(
        &self,
        tenant_id: TenantId,
        account_id: CreditAccountId,
        occurred_at: DateTime<Utc>,
    ) -> Result<CreditAccount, SettlementError> {
        let command = CreditCommand::Resume(dukapos_credit::ResumeAccount {
            tenant_id,
            account_id,
            occurred_at,
        });
        self.with_retry("credit.resume_account", || {
            self.execute_account_command(tenant_id, account_id, &command)
        })
    }

    /// Rehydrate a sale from its stream, if it exists.
    pub fn get_sale(
        &self,
        tenant_id: TenantId,
        sale_id: SaleId,
    ) -> Result<Option<Sale>, SettlementError> {
        let (sale, _) = self.load_sale(tenant_id, sale_id)?;
        Ok(sale.exists().then_some(sale))
    }

    /// Rehydrate a credit account from its stream, if it exists.
    pub fn get_credit_account(
        &self,
        tenant_id: TenantId,
        account_id: CreditAccountId,
    ) -> Result<Option<CreditAccount>, SettlementError> {
        let (account, _) = self.load_account(tenant_id, account_id)?;
        Ok(account.exists().then_some(account))
    }

    /// The credit account opened for a sale, if any.
    pub fn account_for_sale(
        &self,
        tenant_id: TenantId,
        sale_id: SaleId,
    ) -> Option<CreditAccountId> {
        self.index.account_for_sale(tenant_id, sale_id)
    }

    fn try_open_account(
        &self,
        request: &OpenCreditAccountRequest,
        account_id: CreditAccountId,
    ) -> Result<CreditAccount, SettlementError> {
        let tenant_id = request.tenant_id;
        let (sale, sale_version) = self.load_sale(tenant_id, request.sale_id)?;
        if !sale.exists() {
            return Err(DomainError::not_found(format!("sale {} not found", request.sale_id)).into());
        }
        if !sale.is_credit_sale() {
            return Err(DomainError::validation(format!(
                "sale {} was not captured as a credit sale",
                request.sale_id
            ))
            .into());
        }

        self.index
            .reserve_account_for_sale(tenant_id, request.sale_id, account_id)
            .map_err(|e| match e {
                IndexError::DuplicateAccount {
                    sale_id,
                    account_id,
                } => SettlementError::Domain(DomainError::duplicate_credit_account(format!(
                    "sale {sale_id} is already linked to credit account {account_id}"
                ))),
                other => SettlementError::Index(other.to_string()),
            })?;

        let mut reserved_number = None;
        let (account, committed) = match self.open_account_inner(
            request,
            account_id,
            &sale,
            sale_version,
            &mut reserved_number,
        ) {
            Ok(opened) => opened,
            Err(e) => {
                // Nothing committed, so the reservations back a stream that
                // will never exist. Undo them so a retry can start fresh.
                if let Some(number) = &reserved_number {
                    self.index.release_payment_number(tenant_id, number);
                }
                self.index.release_account_for_sale(tenant_id, request.sale_id);
                return Err(e);
            }
        };

        // Past this point the events are durable. A publish failure must not
        // release the reservations, or a retry would open a second account
        // for the same sale.
        self.publish_all(&committed)?;
        Ok(account)
    }

    fn open_account_inner(
        &self,
        request: &OpenCreditAccountRequest,
        account_id: CreditAccountId,
        sale: &Sale,
        sale_version: u64,
        reserved_number: &mut Option<PaymentNumber>,
    ) -> Result<(CreditAccount, Vec<StoredEvent>), SettlementError> {
        let tenant_id = request.tenant_id;
        let total = sale.total_amount();

        let upfront = match &request.upfront {
            None => None,
            Some(tender) => {
                let number = self.reserve_fresh_payment_number(tenant_id, request.occurred_at)?;
                *reserved_number = Some(number.clone());
                Some(UpfrontPayment {
                    payment_id: PaymentId::new(AggregateId::new()),
                    payment_number: number,
                    amount: tender.amount,
                    method: tender.method,
                })
            }
        };

        let mut account = CreditAccount::empty(account_id);
        let credit_events = account.handle(&CreditCommand::Open(OpenCreditAccount {
            tenant_id,
            account_id,
            sale_id: request.sale_id,
            customer_id: request.customer_id,
            total,
            due_date: request.due_date,
            upfront,
            received_by: request.received_by,
            occurred_at: request.occurred_at,
        }))?;

        let paid = request
            .upfront
            .as_ref()
            .map(|t| t.amount)
            .unwrap_or(Money::ZERO);
        let mut batches = vec![StreamAppend {
            events: to_uncommitted(
                tenant_id,
                account_id.0,
                CREDIT_ACCOUNT_AGGREGATE_TYPE,
                &credit_events,
            )?,
            expected_version: ExpectedVersion::Exact(0),
        }];
        if let Some(status) = on_account_opened(sale.status(), paid, total) {
            let sale_events = sale.handle(&SaleCommand::ChangeSaleStatus(
                dukapos_sales::ChangeSaleStatus {
                    tenant_id,
                    sale_id: request.sale_id,
                    status,
                    occurred_at: request.occurred_at,
                },
            ))?;
            if !sale_events.is_empty() {
                batches.push(StreamAppend {
                    events: to_uncommitted(
                        tenant_id,
                        request.sale_id.0,
                        SALE_AGGREGATE_TYPE,
                        &sale_events,
                    )?,
                    expected_version: ExpectedVersion::Exact(sale_version),
                });
            }
        }

        let committed = self.store.append_transactional(batches)?;

        for event in &credit_events {
            account.apply(event);
        }
        Ok((account, committed))
    }

    fn try_record_payment(
        &self,
        request: &RecordPaymentRequest,
    ) -> Result<CreditAccount, SettlementError> {
        let tenant_id = request.tenant_id;
        let (account, account_version) = self.load_account(tenant_id, request.account_id)?;
        if !account.exists() {
            return Err(DomainError::not_found(format!(
                "credit account {} not found",
                request.account_id
            ))
            .into());
        }
        let sale_id = account
            .sale_id()
            .ok_or_else(|| DomainError::invariant("credit account has no linked sale"))?;
        let (sale, sale_version) = self.load_sale(tenant_id, sale_id)?;

        let number = self.reserve_fresh_payment_number(tenant_id, request.occurred_at)?;
        let (account, committed) = match self.record_payment_inner(
            request,
            account,
            account_version,
            &sale,
            sale_version,
            number.clone(),
        ) {
            Ok(recorded) => recorded,
            Err(e) => {
                self.index.release_payment_number(tenant_id, &number);
                return Err(e);
            }
        };

        // The committed PaymentRecorded carries this number; keep it
        // reserved even if publication fails.
        self.publish_all(&committed)?;
        Ok(account)
    }

    fn record_payment_inner(
        &self,
        request: &RecordPaymentRequest,
        mut account: CreditAccount,
        account_version: u64,
        sale: &Sale,
        sale_version: u64,
        payment_number: PaymentNumber,
    ) -> Result<(CreditAccount, Vec<StoredEvent>), SettlementError> {
        let tenant_id = request.tenant_id;
        let credit_events = account.handle(&CreditCommand::RecordPayment(RecordPayment {
            tenant_id,
            account_id: request.account_id,
            payment_id: PaymentId::new(AggregateId::new()),
            payment_number,
            amount: request.amount,
            method: request.method,
            received_by: request.received_by,
            note: request.note.clone(),
            occurred_at: request.occurred_at,
        }))?;

        let (previous_status, new_status) = match credit_events.first() {
            Some(CreditEvent::PaymentRecorded(e)) => (e.previous_status, e.new_status),
            _ => {
                return Err(
                    DomainError::invariant("payment command produced no payment event").into(),
                );
            }
        };

        let mut batches = vec![StreamAppend {
            events: to_uncommitted(
                tenant_id,
                request.account_id.0,
                CREDIT_ACCOUNT_AGGREGATE_TYPE,
                &credit_events,
            )?,
            expected_version: ExpectedVersion::Exact(account_version),
        }];
        if let Some(status) = on_payment_recorded(sale.status(), previous_status, new_status) {
            let sale_events = sale.handle(&SaleCommand::ChangeSaleStatus(
                dukapos_sales::ChangeSaleStatus {
                    tenant_id,
                    sale_id: sale.id_typed(),
                    status,
                    occurred_at: request.occurred_at,
                },
            ))?;
            if !sale_events.is_empty() {
                batches.push(StreamAppend {
                    events: to_uncommitted(
                        tenant_id,
                        sale.id_typed().0,
                        SALE_AGGREGATE_TYPE,
                        &sale_events,
                    )?,
                    expected_version: ExpectedVersion::Exact(sale_version),
                });
            }
        }

        let committed = self.store.append_transactional(batches)?;

        for event in &credit_events {
            account.apply(event);
        }
        Ok((account, committed))
    }

    fn execute_account_command(
        &self,
        tenant_id: TenantId,
        account_id: CreditAccountId,
        command: &CreditCommand,
    ) -> Result<CreditAccount, SettlementError> {
        let (mut account, version) = self.load_account(tenant_id, account_id)?;
        if !account.exists() {
            return Err(DomainError::not_found(format!(
                "credit account {account_id} not found"
            ))
            .into());
        }
        let events = account.handle(command)?;
        if events.is_empty() {
            return Ok(account);
        }

        let committed = self.store.append(
            to_uncommitted(tenant_id, account_id.0, CREDIT_ACCOUNT_AGGREGATE_TYPE, &events)?,
            ExpectedVersion::Exact(version),
        )?;
        self.publish_all(&committed)?;

        for event in &events {
            account.apply(event);
        }
        Ok(account)
    }

    fn load_sale(
        &self,
        tenant_id: TenantId,
        sale_id: SaleId,
    ) -> Result<(Sale, u64), SettlementError> {
        let history = self.store.load_stream(tenant_id, sale_id.0)?;
        validate_loaded_stream(tenant_id, sale_id.0, &history)?;
        let version = stream_version(&history);
        let mut sale = Sale::empty(sale_id);
        apply_history(&mut sale, &history)?;
        Ok((sale, version))
    }

    fn load_account(
        &self,
        tenant_id: TenantId,
        account_id: CreditAccountId,
    ) -> Result<(CreditAccount, u64), SettlementError> {
        let history = self.store.load_stream(tenant_id, account_id.0)?;
        validate_loaded_stream(tenant_id, account_id.0, &history)?;
        let version = stream_version(&history);
        let mut account = CreditAccount::empty(account_id);
        apply_history(&mut account, &history)?;
        Ok((account, version))
    }

    fn reserve_fresh_payment_number(
        &self,
        tenant_id: TenantId,
        at: DateTime<Utc>,
    ) -> Result<PaymentNumber, SettlementError> {
        // Collisions are only possible within one millisecond; a couple of
        // regenerations is plenty.
        for _ in 0..3 {
            let number = PaymentNumber::generate(at, Uuid::now_v7());
            match self.index.reserve_payment_number(tenant_id, &number) {
                Ok(()) => return Ok(number),
                Err(IndexError::DuplicatePaymentNumber(_)) => continue,
                Err(e) => return Err(SettlementError::Index(e.to_string())),
            }
        }
        Err(SettlementError::Index(
            "could not allocate a unique payment number".to_string(),
        ))
    }

    fn publish_all(&self, committed: &[StoredEvent]) -> Result<(), SettlementError> {
        for stored in committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| SettlementError::Publish(format!("{e:?}")))?;
        }
        Ok(())
    }

    fn with_retry<T>(
        &self,
        op: &str,
        mut attempt: impl FnMut() -> Result<T, SettlementError>,
    ) -> Result<T, SettlementError> {
        let mut last = String::new();
        for n in 1..=MAX_APPEND_ATTEMPTS {
            match attempt() {
                Err(SettlementError::Store(EventStoreError::Concurrency(msg))) => {
                    tracing::warn!(op, attempt = n, %msg, "append lost a concurrency race");
                    last = msg;
                    if n < MAX_APPEND_ATTEMPTS {
                        let jitter = rand::thread_rng().gen_range(0..10u64);
                        std::thread::sleep(Duration::from_millis(5 * n as u64 + jitter));
                    }
                }
                other => return other,
            }
        }
        Err(SettlementError::ConcurrencyConflict(last))
    }
}

fn to_uncommitted<E>(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    aggregate_type: &str,
    events: &[E],
) -> Result<Vec<UncommittedEvent>, SettlementError>
where
    E: Event + Serialize,
{
    events
        .iter()
        .map(|event| {
            UncommittedEvent::from_typed(
                tenant_id,
                aggregate_id,
                aggregate_type,
                Uuid::now_v7(),
                event,
            )
            .map_err(SettlementError::from)
        })
        .collect()
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), SettlementError> {
    // Enforce isolation and ordering even if a buggy backend misbehaves.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(SettlementError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(SettlementError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(SettlementError::Deserialize(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), SettlementError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let event: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| SettlementError::Deserialize(e.to_string()))?;
        aggregate.apply(&event);
    }
    Ok(())
}
