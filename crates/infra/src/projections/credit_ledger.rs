//! Credit ledger read model: one row per credit account.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use dukapos_core::{AggregateId, Money, TenantId};
use dukapos_credit::{CreditAccountId, CreditEvent, CreditStatus, CustomerId};
use dukapos_events::EventEnvelope;
use dukapos_sales::SaleId;

use crate::read_model::TenantStore;
use crate::settlement::CREDIT_ACCOUNT_AGGREGATE_TYPE;

/// Read model: one credit account's balances and status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditLedgerEntry {
    pub account_id: CreditAccountId,
    pub sale_id: SaleId,
    pub customer_id: CustomerId,
    pub total: Money,
    pub paid: Money,
    pub remaining: Money,
    pub due_date: NaiveDate,
    pub status: CreditStatus,
    pub payment_count: u32,
    pub last_payment_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("ledger entry missing for account stream")]
    MissingEntry,
}

/// Credit ledger projection: per-account summaries for collection work.
///
/// Rebuildable from credit account events. Tenant-isolated.
#[derive(Debug)]
pub struct CreditLedgerProjection<S>
where
    S: TenantStore<CreditAccountId, CreditLedgerEntry>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> CreditLedgerProjection<S>
where
    S: TenantStore<CreditAccountId, CreditLedgerEntry>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, tenant_id: TenantId, account_id: &CreditAccountId) -> Option<CreditLedgerEntry> {
        self.store.get(tenant_id, account_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<CreditLedgerEntry> {
        self.store.list(tenant_id)
    }

    /// Accounts with an outstanding balance past their due date.
    pub fn list_overdue(&self, tenant_id: TenantId) -> Vec<CreditLedgerEntry> {
        self.store
            .list(tenant_id)
            .into_iter()
            .filter(|e| e.status == CreditStatus::Overdue)
            .collect()
    }

    /// Accounts that still accept payments, sorted by due date.
    pub fn list_open(&self, tenant_id: TenantId) -> Vec<CreditLedgerEntry> {
        let mut open: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|e| e.status.is_payable())
            .collect();
        open.sort_by_key(|e| e.due_date);
        open
    }

    fn cursor(&self, key: CursorKey) -> u64 {
        self.cursors
            .read()
            .ok()
            .and_then(|cursors| cursors.get(&key).copied())
            .unwrap_or(0)
    }

    fn advance_cursor(&self, key: CursorKey, sequence_number: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(key, sequence_number);
        }
    }

    /// Apply one envelope. Already-seen sequence numbers are skipped, which
    /// makes redelivery harmless.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != CREDIT_ACCOUNT_AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        let key = CursorKey {
            tenant_id,
            aggregate_id,
        };

        let last = self.cursor(key);
        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if last != 0 && seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: CreditEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let event_tenant = match &event {
            CreditEvent::AccountOpened(e) => e.tenant_id,
            CreditEvent::PaymentRecorded(e) => e.tenant_id,
            CreditEvent::AccountClosed(e) => e.tenant_id,
            CreditEvent::AccountSuspended(e) => e.tenant_id,
            CreditEvent::AccountResumed(e) => e.tenant_id,
        };
        if event_tenant != tenant_id {
            return Err(ProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }

        match event {
            CreditEvent::AccountOpened(e) => {
                self.store.upsert(
                    tenant_id,
                    e.account_id,
                    CreditLedgerEntry {
                        account_id: e.account_id,
                        sale_id: e.sale_id,
                        customer_id: e.customer_id,
                        total: e.total,
                        paid: Money::ZERO,
                        remaining: e.total,
                        due_date: e.due_date,
                        status: e.status,
                        payment_count: 0,
                        last_payment_at: None,
                    },
                );
            }
            CreditEvent::PaymentRecorded(e) => {
                let mut entry = self
                    .store
                    .get(tenant_id, &e.account_id)
                    .ok_or(ProjectionError::MissingEntry)?;
                entry.paid = e.new_paid;
                entry.remaining = e.new_remaining;
                entry.status = e.new_status;
                entry.payment_count += 1;
                entry.last_payment_at = Some(e.payment.received_at);
                self.store.upsert(tenant_id, e.account_id, entry);
            }
            CreditEvent::AccountClosed(e) => {
                let mut entry = self
                    .store
                    .get(tenant_id, &e.account_id)
                    .ok_or(ProjectionError::MissingEntry)?;
                entry.status = CreditStatus::Closed;
                self.store.upsert(tenant_id, e.account_id, entry);
            }
            CreditEvent::AccountSuspended(e) => {
                let mut entry = self
                    .store
                    .get(tenant_id, &e.account_id)
                    .ok_or(ProjectionError::MissingEntry)?;
                entry.status = CreditStatus::Suspended;
                self.store.upsert(tenant_id, e.account_id, entry);
            }
            CreditEvent::AccountResumed(e) => {
                let mut entry = self
                    .store
                    .get(tenant_id, &e.account_id)
                    .ok_or(ProjectionError::MissingEntry)?;
                entry.status = e.status;
                self.store.upsert(tenant_id, e.account_id, entry);
            }
        }

        self.advance_cursor(key, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
            tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
            tenants.dedup();
            for t in tenants {
                self.store.clear_tenant(t);
                if let Ok(mut cursors) = self.cursors.write() {
                    cursors.retain(|k, _| k.tenant_id != t);
                }
            }
        }

        envs.sort_by_key(|e| {
            (
                *e.tenant_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}
