//! The event store: the single source of truth every other component reads.

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{EventLog, PreparedAppend};
use crate::storage::{EventStorageConfig, PostgresEventStore};
use crate::types::{
    AppendReceipt, EventEnvelope, EventFilter, EventPage, ExpectedVersion, NewEvent,
    MAX_QUERY_LIMIT,
};
use async_trait::async_trait;
use std::sync::{RwLock, RwLockReadGuard};
use tokio::sync::Mutex;
use tracing::debug;

/// Append-only, totally ordered event storage.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Sequence and durably append one event.
    async fn append(&self, event: NewEvent, expected: ExpectedVersion)
        -> LedgerResult<AppendReceipt>;

    /// Filtered page ordered by `global_seq` ascending.
    async fn query(&self, filter: &EventFilter) -> LedgerResult<EventPage>;

    /// All events of one stream in `stream_seq` order.
    async fn read_stream(&self, stream_id: &str) -> LedgerResult<Vec<EventEnvelope>>;

    async fn get(&self, event_id: &str) -> LedgerResult<Option<EventEnvelope>>;

    /// Events with `global_seq` greater than `after`.
    async fn events_since(&self, after: u64) -> LedgerResult<Vec<EventEnvelope>>;

    /// Highest assigned `global_seq` (0 when empty).
    async fn head(&self) -> LedgerResult<u64>;
}

/// Collect every event matching `filter`, following cursors to the end.
pub async fn scan(store: &dyn EventStore, mut filter: EventFilter) -> LedgerResult<Vec<EventEnvelope>> {
    filter.limit = Some(MAX_QUERY_LIMIT);
    let mut events = Vec::new();
    loop {
        let page = store.query(&filter).await?;
        events.extend(page.events);
        match page.next_cursor {
            Some(cursor) if page.has_more => filter.cursor = Some(cursor),
            _ => return Ok(events),
        }
    }
}

#[derive(Debug)]
enum Backend {
    Memory,
    Postgres(PostgresEventStore),
}

/// Event store that keeps the authoritative log in memory and optionally
/// mirrors every event to PostgreSQL.
///
/// Appends are serialized through `writer`; sequence numbers are computed
/// while holding it and the event is persisted before it becomes visible.
/// Readers only take the log's read lock for the duration of a copy.
#[derive(Debug)]
pub struct LedgerStore {
    writer: Mutex<Backend>,
    log: RwLock<EventLog>,
}

impl LedgerStore {
    pub fn in_memory() -> Self {
        Self {
            writer: Mutex::new(Backend::Memory),
            log: RwLock::new(EventLog::new()),
        }
    }

    pub async fn bootstrap(config: EventStorageConfig) -> LedgerResult<Self> {
        match config {
            EventStorageConfig::Memory => Ok(Self::in_memory()),
            EventStorageConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let store = PostgresEventStore::connect(&database_url, max_connections).await?;
                store.ensure_schema().await?;
                let events = store.load_events().await?;
                let log = EventLog::from_events(events)?;
                tracing::info!(events = log.len(), "hydrated event log from postgres");
                Ok(Self {
                    writer: Mutex::new(Backend::Postgres(store)),
                    log: RwLock::new(log),
                })
            }
        }
    }

    pub async fn backend_label(&self) -> &'static str {
        match &*self.writer.lock().await {
            Backend::Memory => "memory",
            Backend::Postgres(_) => "postgres",
        }
    }

    pub fn len(&self) -> LedgerResult<usize> {
        Ok(self.read_log()?.len())
    }

    pub fn is_empty(&self) -> LedgerResult<bool> {
        Ok(self.read_log()?.is_empty())
    }

    pub fn verify_chain(&self) -> LedgerResult<bool> {
        Ok(self.read_log()?.verify_chain())
    }

    fn read_log(&self) -> LedgerResult<RwLockReadGuard<'_, EventLog>> {
        self.log
            .read()
            .map_err(|_| LedgerError::Storage("event log lock poisoned".to_string()))
    }
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[async_trait]
impl EventStore for LedgerStore {
    async fn append(
        &self,
        event: NewEvent,
        expected: ExpectedVersion,
    ) -> LedgerResult<AppendReceipt> {
        let backend = self.writer.lock().await;

        let prepared = self.read_log()?.prepare(event, expected)?;
        let event = match prepared {
            PreparedAppend::Existing(receipt) => {
                debug!(event_id = %receipt.event_id, "append matched existing event");
                return Ok(receipt);
            }
            PreparedAppend::New(event) => event,
        };

        if let Backend::Postgres(store) = &*backend {
            store.insert_event(&event).await?;
        }

        let receipt = AppendReceipt {
            event_id: event.event_id.clone(),
            stream_seq: event.stream_seq,
            global_seq: event.global_seq,
            duplicate: false,
        };
        debug!(
            event_id = %receipt.event_id,
            event_type = %event.event_type,
            stream_id = %event.stream_id,
            global_seq = receipt.global_seq,
            "event appended"
        );

        self.log
            .write()
            .map_err(|_| LedgerError::Storage("event log lock poisoned".to_string()))?
            .commit(event)?;

        drop(backend);
        Ok(receipt)
    }

    async fn query(&self, filter: &EventFilter) -> LedgerResult<EventPage> {
        Ok(self.read_log()?.query(filter))
    }

    async fn read_stream(&self, stream_id: &str) -> LedgerResult<Vec<EventEnvelope>> {
        Ok(self.read_log()?.read_stream(stream_id))
    }

    async fn get(&self, event_id: &str) -> LedgerResult<Option<EventEnvelope>> {
        Ok(self.read_log()?.get(event_id).cloned())
    }

    async fn events_since(&self, after: u64) -> LedgerResult<Vec<EventEnvelope>> {
        Ok(self.read_log()?.since(after).to_vec())
    }

    async fn head(&self) -> LedgerResult<u64> {
        Ok(self.read_log()?.last_global_seq())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{Actor, ActorKind};
    use crate::types::StreamKind;
    use std::sync::Arc;

    fn run_event(stream: &str) -> NewEvent {
        NewEvent::new(stream, StreamKind::Run, "RunStarted", Actor::system("oracle-runner"))
    }

    #[tokio::test]
    async fn memory_store_appends_and_verifies_chain() {
        let store = LedgerStore::bootstrap(EventStorageConfig::memory())
            .await
            .unwrap();

        store.append(run_event("run_1"), ExpectedVersion::Any).await.unwrap();
        store.append(run_event("run_1"), ExpectedVersion::Any).await.unwrap();

        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.head().await.unwrap(), 2);
        assert!(store.verify_chain().unwrap());
        assert_eq!(store.backend_label().await, "memory");
    }

    #[tokio::test]
    async fn concurrent_appends_receive_distinct_sequences() {
        let store = Arc::new(LedgerStore::in_memory());

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append(run_event(&format!("run_{}", i % 4)), ExpectedVersion::Any)
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut global: Vec<u64> = Vec::new();
        for task in tasks {
            global.push(task.await.unwrap().global_seq);
        }
        global.sort_unstable();
        assert_eq!(global, (1..=32).collect::<Vec<u64>>());

        for stream in 0..4 {
            let seqs: Vec<u64> = store
                .read_stream(&format!("run_{}", stream))
                .await
                .unwrap()
                .iter()
                .map(|e| e.stream_seq)
                .collect();
            assert_eq!(seqs, (1..=8).collect::<Vec<u64>>());
        }
    }

    #[tokio::test]
    async fn query_filters_by_actor_kind() {
        let store = LedgerStore::in_memory();
        store.append(run_event("run_1"), ExpectedVersion::Any).await.unwrap();
        store
            .append(
                NewEvent::new("loop_1", StreamKind::Loop, "LoopCreated", Actor::human("alice")),
                ExpectedVersion::Any,
            )
            .await
            .unwrap();

        let page = store
            .query(&EventFilter {
                actor_kind: Some(ActorKind::Human),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.events[0].event_type, "LoopCreated");
    }

    #[tokio::test]
    async fn failed_append_leaves_no_trace() {
        let store = LedgerStore::in_memory();
        store.append(run_event("run_1"), ExpectedVersion::Any).await.unwrap();

        let err = store
            .append(run_event("run_1"), ExpectedVersion::Exact(0))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
        assert_eq!(store.head().await.unwrap(), 1);
    }
}
