//! VAT breakdown read model: taxable amounts per classification.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;

use dukapos_core::{AggregateId, Money, TenantId};
use dukapos_events::EventEnvelope;
use dukapos_sales::SaleEvent;
use dukapos_tax::TaxClassification;

use crate::projections::credit_ledger::ProjectionError;
use crate::read_model::TenantStore;
use crate::settlement::SALE_AGGREGATE_TYPE;

/// Read model: accumulated net/tax/gross per tax classification.
///
/// This is the shape a VAT return wants: standard-rated, reduced-rated,
/// zero-rated and exempt supplies reported separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VatBucket {
    pub classification: TaxClassification,
    pub net: Money,
    pub tax: Money,
    pub gross: Money,
    pub line_count: u64,
}

impl VatBucket {
    fn new(classification: TaxClassification) -> Self {
        Self {
            classification,
            net: Money::ZERO,
            tax: Money::ZERO,
            gross: Money::ZERO,
            line_count: 0,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// VAT report projection over captured sales.
///
/// Only `SaleCreated` moves the numbers; status changes never alter the tax
/// position of a captured sale (settlement is append-only).
#[derive(Debug)]
pub struct VatReportProjection<S>
where
    S: TenantStore<TaxClassification, VatBucket>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> VatReportProjection<S>
where
    S: TenantStore<TaxClassification, VatBucket>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn bucket(
        &self,
        tenant_id: TenantId,
        classification: TaxClassification,
    ) -> Option<VatBucket> {
        self.store.get(tenant_id, &classification)
    }

    pub fn buckets(&self, tenant_id: TenantId) -> Vec<VatBucket> {
        self.store.list(tenant_id)
    }

    /// Total tax collected across all classifications.
    pub fn total_tax(&self, tenant_id: TenantId) -> Money {
        self.store
            .list(tenant_id)
            .into_iter()
            .fold(Money::ZERO, |acc, b| acc + b.tax)
    }

    fn cursor(&self, key: CursorKey) -> u64 {
        self.cursors
            .read()
            .ok()
            .and_then(|cursors| cursors.get(&key).copied())
            .unwrap_or(0)
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != SALE_AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let key = CursorKey {
            tenant_id,
            aggregate_id: envelope.aggregate_id(),
        };
        let seq = envelope.sequence_number();
        if seq <= self.cursor(key) {
            return Ok(());
        }

        let event: SaleEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        if let SaleEvent::SaleCreated(e) = &event {
            if e.tenant_id != tenant_id {
                return Err(ProjectionError::TenantIsolation(
                    "event tenant_id does not match envelope tenant_id".to_string(),
                ));
            }
            for line in &e.lines {
                let mut bucket = self
                    .store
                    .get(tenant_id, &line.classification)
                    .unwrap_or_else(|| VatBucket::new(line.classification));
                bucket.net = bucket.net + line.tax.net;
                bucket.tax = bucket.tax + line.tax.tax;
                bucket.gross = bucket.gross + line.tax.gross;
                bucket.line_count += 1;
                self.store.upsert(tenant_id, line.classification, bucket);
            }
        }

        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(key, seq);
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryTenantStore;
    use chrono::Utc;
    use dukapos_sales::{BranchId, SaleCreated, SaleId, SaleLine, SaleStatus, aggregate_totals};
    use dukapos_tax::{PricingMode, ProductId, TaxRate, calculate};
    use std::sync::Arc;
    use uuid::Uuid;

    fn line(line_no: u32, unit_major: i64, quantity: i64, percent: u32, classification: TaxClassification) -> SaleLine {
        let unit_price = Money::from_major(unit_major);
        let tax = calculate(
            unit_price,
            quantity,
            TaxRate::from_percent(percent),
            PricingMode::Exclusive,
        )
        .unwrap();
        SaleLine {
            line_no,
            product_id: ProductId::new(AggregateId::new()),
            quantity,
            unit_price,
            tax,
            classification,
        }
    }

    fn sale_created(tenant_id: TenantId, lines: Vec<SaleLine>) -> SaleEvent {
        let line_taxes: Vec<_> = lines.iter().map(|l| l.tax).collect();
        let totals = aggregate_totals(&line_taxes, Money::ZERO).unwrap();
        SaleEvent::SaleCreated(SaleCreated {
            tenant_id,
            sale_id: SaleId::new(AggregateId::new()),
            branch_id: BranchId::new(AggregateId::new()),
            lines,
            totals,
            is_credit_sale: false,
            status: SaleStatus::Completed,
            occurred_at: Utc::now(),
        })
    }

    fn envelope(tenant_id: TenantId, event: &SaleEvent) -> EventEnvelope<JsonValue> {
        let aggregate_id = match event {
            SaleEvent::SaleCreated(e) => e.sale_id.0,
            SaleEvent::SaleStatusChanged(e) => e.sale_id.0,
        };
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            SALE_AGGREGATE_TYPE.to_string(),
            1,
            serde_json::to_value(event).unwrap(),
        )
    }

    #[test]
    fn buckets_split_by_classification() {
        let store = Arc::new(InMemoryTenantStore::new());
        let proj = VatReportProjection::new(store);
        let tenant_id = TenantId::new();

        let event = sale_created(
            tenant_id,
            vec![
                line(1, 100, 2, 16, TaxClassification::Standard),
                line(2, 50, 1, 8, TaxClassification::Reduced),
                line(3, 30, 1, 0, TaxClassification::Exempt),
            ],
        );
        proj.apply_envelope(&envelope(tenant_id, &event)).unwrap();

        let standard = proj.bucket(tenant_id, TaxClassification::Standard).unwrap();
        assert_eq!(standard.net, Money::from_major(200));
        assert_eq!(standard.tax, Money::from_major(32));
        assert_eq!(standard.gross, Money::from_major(232));

        let reduced = proj.bucket(tenant_id, TaxClassification::Reduced).unwrap();
        assert_eq!(reduced.tax, Money::from_major(4));

        let exempt = proj.bucket(tenant_id, TaxClassification::Exempt).unwrap();
        assert!(exempt.tax.is_zero());
        assert_eq!(exempt.net, Money::from_major(30));

        assert_eq!(proj.total_tax(tenant_id), Money::from_major(36));
    }

    #[test]
    fn redelivery_does_not_double_count() {
        let store = Arc::new(InMemoryTenantStore::new());
        let proj = VatReportProjection::new(store);
        let tenant_id = TenantId::new();

        let event = sale_created(tenant_id, vec![line(1, 100, 1, 16, TaxClassification::Standard)]);
        let env = envelope(tenant_id, &event);
        proj.apply_envelope(&env).unwrap();
        proj.apply_envelope(&env).unwrap();

        let standard = proj.bucket(tenant_id, TaxClassification::Standard).unwrap();
        assert_eq!(standard.tax, Money::from_major(16));
        assert_eq!(standard.line_count, 1);
    }

    #[test]
    fn tenants_do_not_share_buckets() {
        let store = Arc::new(InMemoryTenantStore::new());
        let proj = VatReportProjection::new(store);
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();

        let event = sale_created(tenant_a, vec![line(1, 100, 1, 16, TaxClassification::Standard)]);
        proj.apply_envelope(&envelope(tenant_a, &event)).unwrap();

        assert!(proj.bucket(tenant_b, TaxClassification::Standard).is_none());
    }
}
