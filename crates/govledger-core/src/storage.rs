use crate::actor::ActorKind;
use crate::error::{LedgerError, LedgerResult};
use crate::types::{EventEnvelope, StreamKind, TypedRef};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

/// Event persistence backend configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventStorageConfig {
    /// Keep every event in process memory only.
    Memory,
    /// Persist every event in PostgreSQL and hydrate the log on startup.
    Postgres {
        database_url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_max_connections() -> u32 {
    5
}

impl EventStorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

impl Default for EventStorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// Durable mirror of the event log.
///
/// The unique constraints on `event_id` and `(stream_id, stream_seq)` back up
/// the in-process sequencing if two processes ever share a database.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| LedgerError::Storage(format!("postgres connect failed: {e}")))?;

        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> LedgerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS govledger_events (
                global_seq BIGINT PRIMARY KEY,
                event_id TEXT NOT NULL UNIQUE,
                stream_id TEXT NOT NULL,
                stream_kind TEXT NOT NULL,
                stream_seq BIGINT NOT NULL,
                event_type TEXT NOT NULL,
                occurred_at TIMESTAMPTZ NOT NULL,
                actor_kind TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                correlation_id TEXT NULL,
                causation_id TEXT NULL,
                supersedes JSONB NOT NULL,
                refs JSONB NOT NULL,
                payload JSONB NOT NULL,
                previous_hash TEXT NULL,
                event_hash TEXT NOT NULL,
                UNIQUE (stream_id, stream_seq)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("postgres schema create failed: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_govledger_events_type ON govledger_events (event_type)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("postgres index create failed: {e}")))?;

        Ok(())
    }

    pub async fn load_events(&self) -> LedgerResult<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT
                global_seq,
                event_id,
                stream_id,
                stream_kind,
                stream_seq,
                event_type,
                occurred_at,
                actor_kind,
                actor_id,
                correlation_id,
                causation_id,
                supersedes,
                refs,
                payload,
                previous_hash,
                event_hash
            FROM govledger_events
            ORDER BY global_seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("postgres load failed: {e}")))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let global_seq: i64 = decode(&row, "global_seq")?;
            let stream_seq: i64 = decode(&row, "stream_seq")?;
            let stream_kind: String = decode(&row, "stream_kind")?;
            let actor_kind: String = decode(&row, "actor_kind")?;
            let supersedes: serde_json::Value = decode(&row, "supersedes")?;
            let refs: serde_json::Value = decode(&row, "refs")?;

            events.push(EventEnvelope {
                event_id: decode(&row, "event_id")?,
                stream_id: decode(&row, "stream_id")?,
                stream_kind: stream_kind.parse::<StreamKind>()?,
                stream_seq: to_u64(stream_seq, "stream_seq")?,
                global_seq: to_u64(global_seq, "global_seq")?,
                event_type: decode(&row, "event_type")?,
                occurred_at: decode(&row, "occurred_at")?,
                actor_kind: actor_kind.parse::<ActorKind>()?,
                actor_id: decode(&row, "actor_id")?,
                correlation_id: decode(&row, "correlation_id")?,
                causation_id: decode(&row, "causation_id")?,
                supersedes: serde_json::from_value::<Vec<String>>(supersedes)?,
                refs: serde_json::from_value::<Vec<TypedRef>>(refs)?,
                payload: decode(&row, "payload")?,
                previous_hash: decode(&row, "previous_hash")?,
                event_hash: decode(&row, "event_hash")?,
            });
        }

        Ok(events)
    }

    pub async fn insert_event(&self, event: &EventEnvelope) -> LedgerResult<()> {
        let global_seq = to_i64(event.global_seq, "global_seq")?;
        let stream_seq = to_i64(event.stream_seq, "stream_seq")?;
        let supersedes = serde_json::to_value(&event.supersedes)?;
        let refs = serde_json::to_value(&event.refs)?;

        sqlx::query(
            r#"
            INSERT INTO govledger_events (
                global_seq,
                event_id,
                stream_id,
                stream_kind,
                stream_seq,
                event_type,
                occurred_at,
                actor_kind,
                actor_id,
                correlation_id,
                causation_id,
                supersedes,
                refs,
                payload,
                previous_hash,
                event_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(global_seq)
        .bind(&event.event_id)
        .bind(&event.stream_id)
        .bind(event.stream_kind.as_str())
        .bind(stream_seq)
        .bind(&event.event_type)
        .bind(event.occurred_at)
        .bind(event.actor_kind.as_str())
        .bind(&event.actor_id)
        .bind(&event.correlation_id)
        .bind(&event.causation_id)
        .bind(supersedes)
        .bind(refs)
        .bind(&event.payload)
        .bind(&event.previous_hash)
        .bind(&event.event_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("postgres insert failed: {e}")))?;

        Ok(())
    }
}

fn decode<'r, T>(row: &'r sqlx::postgres::PgRow, column: &str) -> LedgerResult<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| LedgerError::Storage(format!("postgres decode {column} failed: {e}")))
}

fn to_u64(value: i64, column: &str) -> LedgerResult<u64> {
    value
        .try_into()
        .map_err(|_| LedgerError::Storage(format!("negative {column} in storage")))
}

fn to_i64(value: u64, column: &str) -> LedgerResult<i64> {
    value
        .try_into()
        .map_err(|_| LedgerError::Storage(format!("{column} exceeds postgres BIGINT range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_match_backends() {
        assert_eq!(EventStorageConfig::memory().label(), "memory");
        assert_eq!(
            EventStorageConfig::postgres("postgres://localhost/govledger", 4).label(),
            "postgres"
        );
        assert_eq!(EventStorageConfig::default(), EventStorageConfig::Memory);
    }

    #[test]
    fn storage_config_deserializes_tagged() {
        let config: EventStorageConfig = serde_json::from_value(serde_json::json!({
            "type": "postgres",
            "database_url": "postgres://localhost/govledger"
        }))
        .unwrap();
        assert_eq!(
            config,
            EventStorageConfig::postgres("postgres://localhost/govledger", 5)
        );
    }

    #[test]
    fn sequence_conversions_guard_ranges() {
        assert!(to_u64(-1, "global_seq").is_err());
        assert_eq!(to_u64(7, "global_seq").unwrap(), 7);
        assert!(to_i64(u64::MAX, "global_seq").is_err());
    }
}
