//! Settlement uniqueness index.
//!
//! Two facts must be unique per tenant and are not expressible as event
//! stream versions: a payment number, and the one-account-per-sale rule.
//! The index reserves them before the event append and releases them again
//! if the append fails, so a crash between the two leaves at worst an
//! orphaned reservation, never a duplicate.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::instrument;

use dukapos_core::TenantId;
use dukapos_credit::{CreditAccountId, PaymentNumber};
use dukapos_sales::SaleId;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("payment number {0} is already in use")]
    DuplicatePaymentNumber(String),

    #[error("sale {sale_id} already has credit account {account_id}")]
    DuplicateAccount {
        sale_id: SaleId,
        account_id: CreditAccountId,
    },

    #[error("index storage failure: {0}")]
    Storage(String),
}

/// Tenant-scoped uniqueness reservations for settlement.
pub trait SettlementIndex: Send + Sync {
    /// Reserve a payment number. Fails if it is already reserved.
    fn reserve_payment_number(
        &self,
        tenant_id: TenantId,
        number: &PaymentNumber,
    ) -> Result<(), IndexError>;

    /// Release a payment number reservation after a failed append.
    fn release_payment_number(&self, tenant_id: TenantId, number: &PaymentNumber);

    /// Reserve the sale → credit account link. Fails with the existing
    /// account id if the sale already has one.
    fn reserve_account_for_sale(
        &self,
        tenant_id: TenantId,
        sale_id: SaleId,
        account_id: CreditAccountId,
    ) -> Result<(), IndexError>;

    /// Release a sale → account reservation after a failed append.
    fn release_account_for_sale(&self, tenant_id: TenantId, sale_id: SaleId);

    /// Look up the credit account opened for a sale, if any.
    fn account_for_sale(&self, tenant_id: TenantId, sale_id: SaleId) -> Option<CreditAccountId>;
}

impl<S> SettlementIndex for Arc<S>
where
    S: SettlementIndex + ?Sized,
{
    fn reserve_payment_number(
        &self,
        tenant_id: TenantId,
        number: &PaymentNumber,
    ) -> Result<(), IndexError> {
        (**self).reserve_payment_number(tenant_id, number)
    }

    fn release_payment_number(&self, tenant_id: TenantId, number: &PaymentNumber) {
        (**self).release_payment_number(tenant_id, number)
    }

    fn reserve_account_for_sale(
        &self,
        tenant_id: TenantId,
        sale_id: SaleId,
        account_id: CreditAccountId,
    ) -> Result<(), IndexError> {
        (**self).reserve_account_for_sale(tenant_id, sale_id, account_id)
    }

    fn release_account_for_sale(&self, tenant_id: TenantId, sale_id: SaleId) {
        (**self).release_account_for_sale(tenant_id, sale_id)
    }

    fn account_for_sale(&self, tenant_id: TenantId, sale_id: SaleId) -> Option<CreditAccountId> {
        (**self).account_for_sale(tenant_id, sale_id)
    }
}

/// In-memory settlement index for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySettlementIndex {
    payment_numbers: RwLock<HashSet<(TenantId, String)>>,
    sale_accounts: RwLock<HashMap<(TenantId, SaleId), CreditAccountId>>,
}

impl InMemorySettlementIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettlementIndex for InMemorySettlementIndex {
    fn reserve_payment_number(
        &self,
        tenant_id: TenantId,
        number: &PaymentNumber,
    ) -> Result<(), IndexError> {
        let mut numbers = self
            .payment_numbers
            .write()
            .map_err(|_| IndexError::Storage("lock poisoned".to_string()))?;
        if !numbers.insert((tenant_id, number.as_str().to_string())) {
            return Err(IndexError::DuplicatePaymentNumber(
                number.as_str().to_string(),
            ));
        }
        Ok(())
    }

    fn release_payment_number(&self, tenant_id: TenantId, number: &PaymentNumber) {
        if let Ok(mut numbers) = self.payment_numbers.write() {
            numbers.remove(&(tenant_id, number.as_str().to_string()));
        }
    }

    fn reserve_account_for_sale(
        &self,
        tenant_id: TenantId,
        sale_id: SaleId,
        account_id: CreditAccountId,
    ) -> Result<(), IndexError> {
        let mut accounts = self
            .sale_accounts
            .write()
            .map_err(|_| IndexError::Storage("lock poisoned".to_string()))?;
        if let Some(existing) = accounts.get(&(tenant_id, sale_id)) {
            return Err(IndexError::DuplicateAccount {
                sale_id,
                account_id: *existing,
            });
        }
        accounts.insert((tenant_id, sale_id), account_id);
        Ok(())
    }

    fn release_account_for_sale(&self, tenant_id: TenantId, sale_id: SaleId) {
        if let Ok(mut accounts) = self.sale_accounts.write() {
            accounts.remove(&(tenant_id, sale_id));
        }
    }

    fn account_for_sale(&self, tenant_id: TenantId, sale_id: SaleId) -> Option<CreditAccountId> {
        self.sale_accounts
            .read()
            .ok()
            .and_then(|accounts| accounts.get(&(tenant_id, sale_id)).copied())
    }
}

/// Postgres-backed settlement index.
///
/// Reservations are plain rows guarded by primary keys; `ON CONFLICT DO
/// NOTHING` plus a rows-affected check gives check-and-set semantics without
/// advisory locks.
#[derive(Debug, Clone)]
pub struct PostgresSettlementIndex {
    pool: Arc<sqlx::PgPool>,
}

impl PostgresSettlementIndex {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    fn handle() -> Result<tokio::runtime::Handle, IndexError> {
        tokio::runtime::Handle::try_current()
            .map_err(|_| IndexError::Storage("requires a tokio runtime context".to_string()))
    }
}

impl SettlementIndex for PostgresSettlementIndex {
    #[instrument(skip(self), fields(tenant_id = %tenant_id.as_uuid()), err)]
    fn reserve_payment_number(
        &self,
        tenant_id: TenantId,
        number: &PaymentNumber,
    ) -> Result<(), IndexError> {
        let pool = self.pool.clone();
        let result = Self::handle()?.block_on(async move {
            sqlx::query(
                r#"
                INSERT INTO payment_numbers (tenant_id, payment_number)
                VALUES ($1, $2)
                ON CONFLICT (tenant_id, payment_number) DO NOTHING
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(number.as_str())
            .execute(&*pool)
            .await
        });

        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(()),
            Ok(_) => Err(IndexError::DuplicatePaymentNumber(
                number.as_str().to_string(),
            )),
            Err(e) => Err(IndexError::Storage(e.to_string())),
        }
    }

    fn release_payment_number(&self, tenant_id: TenantId, number: &PaymentNumber) {
        let pool = self.pool.clone();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let _ = handle.block_on(async move {
            sqlx::query("DELETE FROM payment_numbers WHERE tenant_id = $1 AND payment_number = $2")
                .bind(tenant_id.as_uuid())
                .bind(number.as_str())
                .execute(&*pool)
                .await
        });
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id.as_uuid(), sale_id = %sale_id), err)]
    fn reserve_account_for_sale(
        &self,
        tenant_id: TenantId,
        sale_id: SaleId,
        account_id: CreditAccountId,
    ) -> Result<(), IndexError> {
        let pool = self.pool.clone();
        let result = Self::handle()?.block_on(async move {
            sqlx::query(
                r#"
                INSERT INTO sale_credit_accounts (tenant_id, sale_id, account_id)
                VALUES ($1, $2, $3)
                ON CONFLICT (tenant_id, sale_id) DO NOTHING
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(sale_id.0.as_uuid())
            .bind(account_id.0.as_uuid())
            .execute(&*pool)
            .await
        });

        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(()),
            Ok(_) => {
                let existing = self
                    .account_for_sale(tenant_id, sale_id)
                    .unwrap_or(account_id);
                Err(IndexError::DuplicateAccount {
                    sale_id,
                    account_id: existing,
                })
            }
            Err(e) => Err(IndexError::Storage(e.to_string())),
        }
    }

    fn release_account_for_sale(&self, tenant_id: TenantId, sale_id: SaleId) {
        let pool = self.pool.clone();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let _ = handle.block_on(async move {
            sqlx::query("DELETE FROM sale_credit_accounts WHERE tenant_id = $1 AND sale_id = $2")
                .bind(tenant_id.as_uuid())
                .bind(sale_id.0.as_uuid())
                .execute(&*pool)
                .await
        });
    }

    fn account_for_sale(&self, tenant_id: TenantId, sale_id: SaleId) -> Option<CreditAccountId> {
        let pool = self.pool.clone();
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let row = handle
            .block_on(async move {
                sqlx::query(
                    "SELECT account_id FROM sale_credit_accounts WHERE tenant_id = $1 AND sale_id = $2",
                )
                .bind(tenant_id.as_uuid())
                .bind(sale_id.0.as_uuid())
                .fetch_optional(&*pool)
                .await
            })
            .ok()??;

        let account_id: uuid::Uuid = sqlx::Row::try_get(&row, "account_id").ok()?;
        Some(CreditAccountId::new(dukapos_core::AggregateId::from_uuid(
            account_id,
        )))
    }
}
