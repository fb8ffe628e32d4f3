use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use dukapos_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Money, TenantId, UserId};
use dukapos_events::Event;
use dukapos_sales::SaleId;

use crate::payment::{CreditPayment, CustomerId, PaymentId, PaymentMethod, PaymentNumber};
use crate::status::{CreditStatus, evaluate};

/// Credit account identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreditAccountId(pub AggregateId);

impl CreditAccountId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CreditAccountId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: CreditAccount.
///
/// Opened exactly once per credit sale. Balances only move through recorded
/// payments; `paid + remaining == total` holds after every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditAccount {
    id: CreditAccountId,
    tenant_id: Option<TenantId>,
    sale_id: Option<SaleId>,
    customer_id: Option<CustomerId>,
    total: Money,
    paid: Money,
    remaining: Money,
    due_date: Option<NaiveDate>,
    status: CreditStatus,
    payments: Vec<CreditPayment>,
    closed_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl CreditAccount {
    /// Create an empty, not-yet-opened aggregate instance for rehydration.
    pub fn empty(id: CreditAccountId) -> Self {
        Self {
            id,
            tenant_id: None,
            sale_id: None,
            customer_id: None,
            total: Money::ZERO,
            paid: Money::ZERO,
            remaining: Money::ZERO,
            due_date: None,
            status: CreditStatus::Active,
            payments: Vec::new(),
            closed_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> CreditAccountId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn sale_id(&self) -> Option<SaleId> {
        self.sale_id
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn paid(&self) -> Money {
        self.paid
    }

    pub fn remaining(&self) -> Money {
        self.remaining
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    pub fn status(&self) -> CreditStatus {
        self.status
    }

    pub fn payments(&self) -> &[CreditPayment] {
        &self.payments
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn exists(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for CreditAccount {
    type Id = CreditAccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Upfront payment taken at account opening.
///
/// The payment identity is caller-supplied so `handle` stays deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpfrontPayment {
    pub payment_id: PaymentId,
    pub payment_number: PaymentNumber,
    pub amount: Money,
    pub method: PaymentMethod,
}

/// Command: OpenCreditAccount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCreditAccount {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub sale_id: SaleId,
    pub customer_id: CustomerId,
    pub total: Money,
    pub due_date: NaiveDate,
    pub upfront: Option<UpfrontPayment>,
    pub received_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayment {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub payment_id: PaymentId,
    pub payment_number: PaymentNumber,
    pub amount: Money,
    pub method: PaymentMethod,
    pub received_by: Option<UserId>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CloseAccount (manual administrative close).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseAccount {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SuspendAccount (manual administrative hold).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendAccount {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ResumeAccount (lift a suspension, re-evaluate status).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeAccount {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditCommand {
    Open(OpenCreditAccount),
    RecordPayment(RecordPayment),
    Close(CloseAccount),
    Suspend(SuspendAccount),
    Resume(ResumeAccount),
}

/// Event: CreditAccountOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAccountOpened {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub sale_id: SaleId,
    pub customer_id: CustomerId,
    pub total: Money,
    pub due_date: NaiveDate,
    pub status: CreditStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRecorded.
///
/// Carries the post-payment balances and statuses so replay never depends on
/// the clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub payment: CreditPayment,
    pub new_paid: Money,
    pub new_remaining: Money,
    pub previous_status: CreditStatus,
    pub new_status: CreditStatus,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AccountClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountClosed {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AccountSuspended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSuspended {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AccountResumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountResumed {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub status: CreditStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditEvent {
    AccountOpened(CreditAccountOpened),
    PaymentRecorded(PaymentRecorded),
    AccountClosed(AccountClosed),
    AccountSuspended(AccountSuspended),
    AccountResumed(AccountResumed),
}

impl Event for CreditEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CreditEvent::AccountOpened(_) => "credit.account.opened",
            CreditEvent::PaymentRecorded(_) => "credit.payment.recorded",
            CreditEvent::AccountClosed(_) => "credit.account.closed",
            CreditEvent::AccountSuspended(_) => "credit.account.suspended",
            CreditEvent::AccountResumed(_) => "credit.account.resumed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CreditEvent::AccountOpened(e) => e.occurred_at,
            CreditEvent::PaymentRecorded(e) => e.occurred_at,
            CreditEvent::AccountClosed(e) => e.occurred_at,
            CreditEvent::AccountSuspended(e) => e.occurred_at,
            CreditEvent::AccountResumed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for CreditAccount {
    type Command = CreditCommand;
    type Event = CreditEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CreditEvent::AccountOpened(e) => {
                self.id = e.account_id;
                self.tenant_id = Some(e.tenant_id);
                self.sale_id = Some(e.sale_id);
                self.customer_id = Some(e.customer_id);
                self.total = e.total;
                self.paid = Money::ZERO;
                self.remaining = e.total;
                self.due_date = Some(e.due_date);
                self.status = e.status;
                self.created = true;
            }
            CreditEvent::PaymentRecorded(e) => {
                self.payments.push(e.payment.clone());
                self.paid = e.new_paid;
                self.remaining = e.new_remaining;
                self.status = e.new_status;
                // Settlement closes the account; the timestamp sticks.
                if e.new_status == CreditStatus::Paid && self.closed_at.is_none() {
                    self.closed_at = Some(e.occurred_at);
                }
            }
            CreditEvent::AccountClosed(e) => {
                self.status = CreditStatus::Closed;
                self.closed_at = Some(e.occurred_at);
            }
            CreditEvent::AccountSuspended(_) => {
                self.status = CreditStatus::Suspended;
            }
            CreditEvent::AccountResumed(e) => {
                self.status = e.status;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CreditCommand::Open(cmd) => self.handle_open(cmd),
            CreditCommand::RecordPayment(cmd) => self.handle_record_payment(cmd),
            CreditCommand::Close(cmd) => self.handle_close(cmd),
            CreditCommand::Suspend(cmd) => self.handle_suspend(cmd),
            CreditCommand::Resume(cmd) => self.handle_resume(cmd),
        }
    }
}

impl CreditAccount {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_account_id(&self, account_id: CreditAccountId) -> Result<(), DomainError> {
        if self.id != account_id {
            return Err(DomainError::invariant("account_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!(
                "credit account {} does not exist",
                self.id
            )));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenCreditAccount) -> Result<Vec<CreditEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("credit account already exists"));
        }
        if !cmd.total.is_positive() {
            return Err(DomainError::invalid_amount(format!(
                "credit total must be positive, got {}",
                cmd.total
            )));
        }
        let today = cmd.occurred_at.date_naive();
        if cmd.due_date < today {
            return Err(DomainError::validation(format!(
                "due date {} is in the past",
                cmd.due_date
            )));
        }
        if let Some(upfront) = &cmd.upfront {
            if !upfront.amount.is_positive() {
                return Err(DomainError::invalid_amount(format!(
                    "upfront payment must be positive, got {}",
                    upfront.amount
                )));
            }
            if upfront.amount > cmd.total {
                return Err(DomainError::invalid_amount(format!(
                    "upfront payment {} exceeds credit total {}",
                    upfront.amount, cmd.total
                )));
            }
        }

        let mut events = vec![CreditEvent::AccountOpened(CreditAccountOpened {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            sale_id: cmd.sale_id,
            customer_id: cmd.customer_id,
            total: cmd.total,
            due_date: cmd.due_date,
            status: evaluate(CreditStatus::Active, cmd.total, today, cmd.due_date),
            occurred_at: cmd.occurred_at,
        })];

        if let Some(upfront) = &cmd.upfront {
            let new_paid = upfront.amount;
            let new_remaining = cmd.total.checked_sub(upfront.amount)?;
            let new_status = evaluate(CreditStatus::Active, new_remaining, today, cmd.due_date);
            let note = if new_remaining.is_zero() {
                "full upfront payment"
            } else {
                "initial partial payment"
            };
            events.push(CreditEvent::PaymentRecorded(PaymentRecorded {
                tenant_id: cmd.tenant_id,
                account_id: cmd.account_id,
                payment: CreditPayment {
                    id: upfront.payment_id,
                    payment_number: upfront.payment_number.clone(),
                    amount: upfront.amount,
                    method: upfront.method,
                    received_by: cmd.received_by,
                    received_at: cmd.occurred_at,
                },
                new_paid,
                new_remaining,
                previous_status: CreditStatus::Active,
                new_status,
                note: Some(note.to_string()),
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_record_payment(&self, cmd: &RecordPayment) -> Result<Vec<CreditEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_account_id(cmd.account_id)?;

        if !cmd.amount.is_positive() {
            return Err(DomainError::invalid_amount(format!(
                "payment amount must be positive, got {}",
                cmd.amount
            )));
        }
        if matches!(self.status, CreditStatus::Closed | CreditStatus::Suspended) {
            return Err(DomainError::account_not_payable(format!(
                "account {} is {}",
                self.id, self.status
            )));
        }
        if cmd.amount > self.remaining {
            return Err(DomainError::overpayment_rejected(format!(
                "payment amount {} exceeds remaining balance {}",
                cmd.amount, self.remaining
            )));
        }

        let due_date = self
            .due_date
            .ok_or_else(|| DomainError::invariant("account has no due date"))?;
        let new_paid = self.paid.checked_add(cmd.amount)?;
        let new_remaining = self.remaining.checked_sub(cmd.amount)?;
        if new_paid.checked_add(new_remaining)? != self.total {
            return Err(DomainError::invariant(format!(
                "balance drift: {} + {} != {}",
                new_paid, new_remaining, self.total
            )));
        }
        let new_status = evaluate(
            self.status,
            new_remaining,
            cmd.occurred_at.date_naive(),
            due_date,
        );

        Ok(vec![CreditEvent::PaymentRecorded(PaymentRecorded {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            payment: CreditPayment {
                id: cmd.payment_id,
                payment_number: cmd.payment_number.clone(),
                amount: cmd.amount,
                method: cmd.method,
                received_by: cmd.received_by,
                received_at: cmd.occurred_at,
            },
            new_paid,
            new_remaining,
            previous_status: self.status,
            new_status,
            note: cmd.note.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_close(&self, cmd: &CloseAccount) -> Result<Vec<CreditEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_account_id(cmd.account_id)?;

        // Idempotent: closing a closed account is a no-op.
        if self.status == CreditStatus::Closed {
            return Ok(vec![]);
        }

        Ok(vec![CreditEvent::AccountClosed(AccountClosed {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_suspend(&self, cmd: &SuspendAccount) -> Result<Vec<CreditEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_account_id(cmd.account_id)?;

        if self.status == CreditStatus::Suspended {
            return Ok(vec![]);
        }
        if !self.status.is_payable() {
            return Err(DomainError::conflict(format!(
                "cannot suspend account with status {}",
                self.status
            )));
        }

        Ok(vec![CreditEvent::AccountSuspended(AccountSuspended {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_resume(&self, cmd: &ResumeAccount) -> Result<Vec<CreditEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_account_id(cmd.account_id)?;

        if self.status != CreditStatus::Suspended {
            return Err(DomainError::conflict(format!(
                "cannot resume account with status {}",
                self.status
            )));
        }

        let due_date = self
            .due_date
            .ok_or_else(|| DomainError::invariant("account has no due date"))?;
        let status = evaluate(
            CreditStatus::Active,
            self.remaining,
            cmd.occurred_at.date_naive(),
            due_date,
        );

        Ok(vec![CreditEvent::AccountResumed(AccountResumed {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            status,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_account_id() -> CreditAccountId {
        CreditAccountId::new(AggregateId::new())
    }

    fn test_sale_id() -> SaleId {
        SaleId::new(AggregateId::new())
    }

    fn test_customer_id() -> CustomerId {
        CustomerId::new(AggregateId::new())
    }

    fn test_payment_id() -> PaymentId {
        PaymentId::new(AggregateId::new())
    }

    fn time(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn open_cmd(
        tenant_id: TenantId,
        account_id: CreditAccountId,
        total_major: i64,
        upfront_major: Option<i64>,
    ) -> OpenCreditAccount {
        OpenCreditAccount {
            tenant_id,
            account_id,
            sale_id: test_sale_id(),
            customer_id: test_customer_id(),
            total: Money::from_major(total_major),
            due_date: date("2025-03-31"),
            upfront: upfront_major.map(|amount| UpfrontPayment {
                payment_id: test_payment_id(),
                payment_number: PaymentNumber::generate(
                    time("2025-03-01T09:00:00Z"),
                    Uuid::now_v7(),
                ),
                amount: Money::from_major(amount),
                method: PaymentMethod::Cash,
            }),
            received_by: None,
            occurred_at: time("2025-03-01T09:00:00Z"),
        }
    }

    fn pay_cmd(
        tenant_id: TenantId,
        account_id: CreditAccountId,
        amount_major: i64,
        at: &str,
    ) -> RecordPayment {
        RecordPayment {
            tenant_id,
            account_id,
            payment_id: test_payment_id(),
            payment_number: PaymentNumber::generate(time(at), Uuid::now_v7()),
            amount: Money::from_major(amount_major),
            method: PaymentMethod::MobileMoney,
            received_by: None,
            note: None,
            occurred_at: time(at),
        }
    }

    fn opened_account(
        tenant_id: TenantId,
        account_id: CreditAccountId,
        total_major: i64,
        upfront_major: Option<i64>,
    ) -> CreditAccount {
        let mut account = CreditAccount::empty(account_id);
        let events = account
            .handle(&CreditCommand::Open(open_cmd(
                tenant_id,
                account_id,
                total_major,
                upfront_major,
            )))
            .unwrap();
        for event in &events {
            account.apply(event);
        }
        account
    }

    #[test]
    fn open_without_upfront_is_active_with_full_balance() {
        let tenant_id = test_tenant_id();
        let account_id = test_account_id();
        let account = opened_account(tenant_id, account_id, 1000, None);

        assert_eq!(account.status(), CreditStatus::Active);
        assert_eq!(account.total(), Money::from_major(1000));
        assert_eq!(account.paid(), Money::ZERO);
        assert_eq!(account.remaining(), Money::from_major(1000));
        assert_eq!(account.version(), 1);
    }

    #[test]
    fn open_with_partial_upfront_records_one_payment() {
        let account = opened_account(test_tenant_id(), test_account_id(), 1000, Some(300));

        assert_eq!(account.status(), CreditStatus::Active);
        assert_eq!(account.paid(), Money::from_major(300));
        assert_eq!(account.remaining(), Money::from_major(700));
        assert_eq!(account.payments().len(), 1);
        assert_eq!(account.version(), 2);
    }

    #[test]
    fn open_with_full_upfront_is_immediately_paid() {
        let tenant_id = test_tenant_id();
        let account_id = test_account_id();
        let mut account = CreditAccount::empty(account_id);
        let events = account
            .handle(&CreditCommand::Open(open_cmd(
                tenant_id, account_id, 500, Some(500),
            )))
            .unwrap();
        assert_eq!(events.len(), 2);
        match &events[1] {
            CreditEvent::PaymentRecorded(e) => {
                assert_eq!(e.new_status, CreditStatus::Paid);
                assert_eq!(e.note.as_deref(), Some("full upfront payment"));
            }
            _ => panic!("Expected PaymentRecorded event"),
        }
        for event in &events {
            account.apply(event);
        }
        assert_eq!(account.status(), CreditStatus::Paid);
        assert!(account.remaining().is_zero());
        assert!(account.closed_at().is_some());
    }

    #[test]
    fn cannot_open_twice() {
        let tenant_id = test_tenant_id();
        let account_id = test_account_id();
        let account = opened_account(tenant_id, account_id, 1000, None);

        let err = account
            .handle(&CreditCommand::Open(open_cmd(tenant_id, account_id, 1000, None)))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn upfront_exceeding_total_is_rejected() {
        let account = CreditAccount::empty(test_account_id());
        let cmd = open_cmd(test_tenant_id(), test_account_id(), 100, Some(150));
        let err = account.handle(&CreditCommand::Open(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidAmount(_)));
    }

    #[test]
    fn due_date_in_the_past_is_rejected() {
        let account = CreditAccount::empty(test_account_id());
        let mut cmd = open_cmd(test_tenant_id(), test_account_id(), 100, None);
        cmd.due_date = date("2025-02-01");
        let err = account.handle(&CreditCommand::Open(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn payments_settle_the_account() {
        let tenant_id = test_tenant_id();
        let account_id = test_account_id();
        let mut account = opened_account(tenant_id, account_id, 1000, None);

        let events = account
            .handle(&CreditCommand::RecordPayment(pay_cmd(
                tenant_id,
                account_id,
                400,
                "2025-03-10T10:00:00Z",
            )))
            .unwrap();
        account.apply(&events[0]);
        assert_eq!(account.paid(), Money::from_major(400));
        assert_eq!(account.remaining(), Money::from_major(600));
        assert_eq!(account.status(), CreditStatus::Active);

        let events = account
            .handle(&CreditCommand::RecordPayment(pay_cmd(
                tenant_id,
                account_id,
                600,
                "2025-03-20T10:00:00Z",
            )))
            .unwrap();
        match &events[0] {
            CreditEvent::PaymentRecorded(e) => {
                assert_eq!(e.previous_status, CreditStatus::Active);
                assert_eq!(e.new_status, CreditStatus::Paid);
            }
            _ => panic!("Expected PaymentRecorded event"),
        }
        account.apply(&events[0]);
        assert_eq!(account.status(), CreditStatus::Paid);
        assert!(account.remaining().is_zero());
        assert_eq!(account.paid() + account.remaining(), account.total());
        assert!(account.closed_at().is_some());
    }

    #[test]
    fn overpayment_is_rejected_whole_and_state_unchanged() {
        let tenant_id = test_tenant_id();
        let account_id = test_account_id();
        let mut account = opened_account(tenant_id, account_id, 1000, None);

        let events = account
            .handle(&CreditCommand::RecordPayment(pay_cmd(
                tenant_id,
                account_id,
                600,
                "2025-03-10T10:00:00Z",
            )))
            .unwrap();
        account.apply(&events[0]);

        let before = account.clone();
        let err = account
            .handle(&CreditCommand::RecordPayment(pay_cmd(
                tenant_id,
                account_id,
                700,
                "2025-03-11T10:00:00Z",
            )))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "overpayment rejected: payment amount 700.00 exceeds remaining balance 400.00"
        );
        assert_eq!(account, before);
    }

    #[test]
    fn paid_account_rejects_further_payments() {
        let tenant_id = test_tenant_id();
        let account_id = test_account_id();
        let account = opened_account(tenant_id, account_id, 500, Some(500));

        let err = account
            .handle(&CreditCommand::RecordPayment(pay_cmd(
                tenant_id,
                account_id,
                1,
                "2025-03-02T10:00:00Z",
            )))
            .unwrap_err();
        assert!(matches!(err, DomainError::OverpaymentRejected(_)));
    }

    #[test]
    fn non_positive_payment_is_rejected() {
        let tenant_id = test_tenant_id();
        let account_id = test_account_id();
        let account = opened_account(tenant_id, account_id, 1000, None);

        for amount in [0, -50] {
            let err = account
                .handle(&CreditCommand::RecordPayment(pay_cmd(
                    tenant_id,
                    account_id,
                    amount,
                    "2025-03-10T10:00:00Z",
                )))
                .unwrap_err();
            assert!(matches!(err, DomainError::InvalidAmount(_)));
        }
    }

    #[test]
    fn payment_past_due_date_marks_account_overdue() {
        let tenant_id = test_tenant_id();
        let account_id = test_account_id();
        let mut account = opened_account(tenant_id, account_id, 1000, None);

        let events = account
            .handle(&CreditCommand::RecordPayment(pay_cmd(
                tenant_id,
                account_id,
                100,
                "2025-04-05T10:00:00Z",
            )))
            .unwrap();
        account.apply(&events[0]);
        assert_eq!(account.status(), CreditStatus::Overdue);
    }

    #[test]
    fn suspended_account_rejects_payments() {
        let tenant_id = test_tenant_id();
        let account_id = test_account_id();
        let mut account = opened_account(tenant_id, account_id, 1000, None);

        let events = account
            .handle(&CreditCommand::Suspend(SuspendAccount {
                tenant_id,
                account_id,
                reason: Some("disputed delivery".to_string()),
                occurred_at: time("2025-03-05T10:00:00Z"),
            }))
            .unwrap();
        account.apply(&events[0]);
        assert_eq!(account.status(), CreditStatus::Suspended);

        let err = account
            .handle(&CreditCommand::RecordPayment(pay_cmd(
                tenant_id,
                account_id,
                100,
                "2025-03-06T10:00:00Z",
            )))
            .unwrap_err();
        assert!(matches!(err, DomainError::AccountNotPayable(_)));
    }

    #[test]
    fn resume_re_evaluates_status() {
        let tenant_id = test_tenant_id();
        let account_id = test_account_id();
        let mut account = opened_account(tenant_id, account_id, 1000, None);

        let events = account
            .handle(&CreditCommand::Suspend(SuspendAccount {
                tenant_id,
                account_id,
                reason: None,
                occurred_at: time("2025-03-05T10:00:00Z"),
            }))
            .unwrap();
        account.apply(&events[0]);

        // Resumed past the due date with a balance: straight to Overdue.
        let events = account
            .handle(&CreditCommand::Resume(ResumeAccount {
                tenant_id,
                account_id,
                occurred_at: time("2025-04-10T10:00:00Z"),
            }))
            .unwrap();
        account.apply(&events[0]);
        assert_eq!(account.status(), CreditStatus::Overdue);
    }

    #[test]
    fn close_is_idempotent_and_blocks_payments() {
        let tenant_id = test_tenant_id();
        let account_id = test_account_id();
        let mut account = opened_account(tenant_id, account_id, 1000, None);

        let events = account
            .handle(&CreditCommand::Close(CloseAccount {
                tenant_id,
                account_id,
                occurred_at: time("2025-03-05T10:00:00Z"),
            }))
            .unwrap();
        account.apply(&events[0]);
        assert_eq!(account.status(), CreditStatus::Closed);
        assert!(account.closed_at().is_some());

        let events = account
            .handle(&CreditCommand::Close(CloseAccount {
                tenant_id,
                account_id,
                occurred_at: time("2025-03-06T10:00:00Z"),
            }))
            .unwrap();
        assert!(events.is_empty());

        let err = account
            .handle(&CreditCommand::RecordPayment(pay_cmd(
                tenant_id,
                account_id,
                100,
                "2025-03-07T10:00:00Z",
            )))
            .unwrap_err();
        assert!(matches!(err, DomainError::AccountNotPayable(_)));
    }

    #[test]
    fn cannot_suspend_a_settled_account() {
        let tenant_id = test_tenant_id();
        let account_id = test_account_id();
        let account = opened_account(tenant_id, account_id, 500, Some(500));

        let err = account
            .handle(&CreditCommand::Suspend(SuspendAccount {
                tenant_id,
                account_id,
                reason: None,
                occurred_at: time("2025-03-05T10:00:00Z"),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn balance_invariant_holds_across_payment_sequences() {
        let tenant_id = test_tenant_id();
        let account_id = test_account_id();
        let mut account = opened_account(tenant_id, account_id, 1000, Some(100));

        let mut last_remaining = account.remaining();
        for amount in [250, 150, 300, 200] {
            let events = account
                .handle(&CreditCommand::RecordPayment(pay_cmd(
                    tenant_id,
                    account_id,
                    amount,
                    "2025-03-10T10:00:00Z",
                )))
                .unwrap();
            account.apply(&events[0]);
            assert_eq!(account.paid() + account.remaining(), account.total());
            assert!(account.remaining() < last_remaining);
            last_remaining = account.remaining();
        }
        assert_eq!(account.status(), CreditStatus::Paid);
    }

    #[test]
    fn rehydration_from_events_matches_live_state() {
        let tenant_id = test_tenant_id();
        let account_id = test_account_id();
        let mut live = CreditAccount::empty(account_id);
        let mut history = Vec::new();

        let events = live
            .handle(&CreditCommand::Open(open_cmd(tenant_id, account_id, 1000, Some(200))))
            .unwrap();
        for event in events {
            live.apply(&event);
            history.push(event);
        }
        let events = live
            .handle(&CreditCommand::RecordPayment(pay_cmd(
                tenant_id,
                account_id,
                800,
                "2025-03-15T10:00:00Z",
            )))
            .unwrap();
        for event in events {
            live.apply(&event);
            history.push(event);
        }

        let mut rehydrated = CreditAccount::empty(account_id);
        for event in &history {
            rehydrated.apply(event);
        }
        assert_eq!(rehydrated, live);
        assert_eq!(rehydrated.version(), 3);
        assert_eq!(rehydrated.status(), CreditStatus::Paid);
    }
}
