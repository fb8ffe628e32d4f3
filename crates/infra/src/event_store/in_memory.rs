use std::collections::HashMap;
use std::sync::RwLock;

use dukapos_core::{AggregateId, TenantId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamKey, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    fn validate_batch(events: &[UncommittedEvent]) -> Result<StreamKey, EventStoreError> {
        let tenant_id = events[0].tenant_id;
        let aggregate_id = events[0].aggregate_id;
        let aggregate_type = &events[0].aggregate_type;

        for (idx, e) in events.iter().enumerate() {
            if e.tenant_id != tenant_id {
                return Err(EventStoreError::TenantIsolation(format!(
                    "batch contains multiple tenant_ids (index {idx})"
                )));
            }
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if &e.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        Ok(StreamKey {
            tenant_id,
            aggregate_id,
        })
    }
}

impl EventStore for InMemoryEventStore {
    fn append_transactional(
        &self,
        batches: Vec<StreamAppend>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let batches: Vec<StreamAppend> = batches
            .into_iter()
            .filter(|b| !b.events.is_empty())
            .collect();
        if batches.is_empty() {
            return Ok(vec![]);
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        // Validation pass: nothing is written until every batch checks out.
        // `staged_versions` accounts for earlier batches targeting the same
        // stream within this transaction.
        let mut staged_versions: HashMap<StreamKey, u64> = HashMap::new();
        let mut keys = Vec::with_capacity(batches.len());
        for batch in &batches {
            let key = Self::validate_batch(&batch.events)?;
            let current = *staged_versions.entry(key).or_insert_with(|| {
                streams.get(&key).map(|s| Self::current_version(s)).unwrap_or(0)
            });

            if !batch.expected_version.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "expected {:?}, found {current}",
                    batch.expected_version
                )));
            }

            if let Some(existing) = streams.get(&key).and_then(|s| s.first()) {
                if existing.aggregate_type != batch.events[0].aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted append with '{}'",
                        existing.aggregate_type, batch.events[0].aggregate_type
                    )));
                }
            }

            staged_versions.insert(key, current + batch.events.len() as u64);
            keys.push(key);
        }

        // Commit pass: assign sequence numbers and append (append-only).
        let mut committed = Vec::new();
        for (batch, key) in batches.into_iter().zip(keys) {
            let stream = streams.entry(key).or_default();
            let mut next = Self::current_version(stream) + 1;
            for e in batch.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    tenant_id: e.tenant_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                stream.push(stored.clone());
                committed.push(stored);
            }
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            tenant_id,
            aggregate_id,
        };

        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(streams.get(&key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dukapos_core::ExpectedVersion;
    use serde_json::json;
    use uuid::Uuid;

    fn uncommitted(
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: "test.event".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: json!({"ok": true}),
        }
    }

    #[test]
    fn append_assigns_sequence_numbers_from_one() {
        let store = InMemoryEventStore::new();
        let tenant_id = TenantId::new();
        let aggregate_id = AggregateId::new();

        let committed = store
            .append(
                vec![
                    uncommitted(tenant_id, aggregate_id, "sales.sale"),
                    uncommitted(tenant_id, aggregate_id, "sales.sale"),
                ],
                ExpectedVersion::Exact(0),
            )
            .unwrap();

        assert_eq!(committed.len(), 2);
        assert_eq!(committed[0].sequence_number, 1);
        assert_eq!(committed[1].sequence_number, 2);
    }

    #[test]
    fn stale_version_is_rejected() {
        let store = InMemoryEventStore::new();
        let tenant_id = TenantId::new();
        let aggregate_id = AggregateId::new();

        store
            .append(
                vec![uncommitted(tenant_id, aggregate_id, "sales.sale")],
                ExpectedVersion::Exact(0),
            )
            .unwrap();

        let err = store
            .append(
                vec![uncommitted(tenant_id, aggregate_id, "sales.sale")],
                ExpectedVersion::Exact(0),
            )
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
    }

    #[test]
    fn transactional_append_spans_two_streams() {
        let store = InMemoryEventStore::new();
        let tenant_id = TenantId::new();
        let sale_stream = AggregateId::new();
        let account_stream = AggregateId::new();

        let committed = store
            .append_transactional(vec![
                StreamAppend {
                    events: vec![uncommitted(tenant_id, account_stream, "credit.account")],
                    expected_version: ExpectedVersion::Exact(0),
                },
                StreamAppend {
                    events: vec![uncommitted(tenant_id, sale_stream, "sales.sale")],
                    expected_version: ExpectedVersion::Exact(0),
                },
            ])
            .unwrap();

        assert_eq!(committed.len(), 2);
        assert_eq!(store.load_stream(tenant_id, sale_stream).unwrap().len(), 1);
        assert_eq!(
            store.load_stream(tenant_id, account_stream).unwrap().len(),
            1
        );
    }

    #[test]
    fn transactional_append_is_all_or_nothing() {
        let store = InMemoryEventStore::new();
        let tenant_id = TenantId::new();
        let sale_stream = AggregateId::new();
        let account_stream = AggregateId::new();

        store
            .append(
                vec![uncommitted(tenant_id, sale_stream, "sales.sale")],
                ExpectedVersion::Exact(0),
            )
            .unwrap();

        // Second batch carries a stale version; the first batch must not land.
        let err = store
            .append_transactional(vec![
                StreamAppend {
                    events: vec![uncommitted(tenant_id, account_stream, "credit.account")],
                    expected_version: ExpectedVersion::Exact(0),
                },
                StreamAppend {
                    events: vec![uncommitted(tenant_id, sale_stream, "sales.sale")],
                    expected_version: ExpectedVersion::Exact(0),
                },
            ])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
        assert!(store
            .load_stream(tenant_id, account_stream)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn streams_are_tenant_isolated() {
        let store = InMemoryEventStore::new();
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();
        let aggregate_id = AggregateId::new();

        store
            .append(
                vec![uncommitted(tenant_a, aggregate_id, "sales.sale")],
                ExpectedVersion::Exact(0),
            )
            .unwrap();

        assert!(store.load_stream(tenant_b, aggregate_id).unwrap().is_empty());
    }

    #[test]
    fn mixed_tenant_batch_is_rejected() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();

        let err = store
            .append(
                vec![
                    uncommitted(TenantId::new(), aggregate_id, "sales.sale"),
                    uncommitted(TenantId::new(), aggregate_id, "sales.sale"),
                ],
                ExpectedVersion::Any,
            )
            .unwrap_err();
        assert!(matches!(err, EventStoreError::TenantIsolation(_)));
    }

    #[test]
    fn aggregate_type_is_stable_per_stream() {
        let store = InMemoryEventStore::new();
        let tenant_id = TenantId::new();
        let aggregate_id = AggregateId::new();

        store
            .append(
                vec![uncommitted(tenant_id, aggregate_id, "sales.sale")],
                ExpectedVersion::Exact(0),
            )
            .unwrap();

        let err = store
            .append(
                vec![uncommitted(tenant_id, aggregate_id, "credit.account")],
                ExpectedVersion::Exact(1),
            )
            .unwrap_err();
        assert!(matches!(err, EventStoreError::AggregateTypeMismatch(_)));
    }
}
