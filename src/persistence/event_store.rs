//! Event store repository
//!
//! Append-only log partitioned by `(aggregate_type, aggregate_id)`. Version
//! contention is decided by the unique constraint: the second writer at the
//! same version loses the insert and surfaces `ConcurrentModification`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::core_types::Version;
use crate::errors::LedgerError;
use crate::models::{AggregateType, Event, EventType};

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub aggregate_type: AggregateType,
    pub aggregate_id: String,
    pub event_type: EventType,
    pub event_data: serde_json::Value,
    pub version: Version,
    pub metadata: Option<serde_json::Value>,
}

#[async_trait]
pub trait EventStoreRepository: Send + Sync {
    /// Insert the event; fails with `ConcurrentModification` when
    /// `(aggregate_type, aggregate_id, version)` is already taken.
    async fn save(&self, event: &NewEvent) -> Result<Event, LedgerError>;

    /// Events of one aggregate, version ascending.
    async fn get_events(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &str,
    ) -> Result<Vec<Event>, LedgerError>;

    async fn get_events_by_type(&self, event_type: EventType) -> Result<Vec<Event>, LedgerError>;

    async fn get_events_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, LedgerError>;

    /// Highest persisted version for the partition, 0 when empty.
    async fn get_last_version(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &str,
    ) -> Result<Version, LedgerError>;
}

pub struct PgEventStoreRepository {
    pool: PgPool,
}

impl PgEventStoreRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: &PgRow) -> Result<Event, LedgerError> {
        let aggregate_type: String = row.get("aggregate_type");
        let event_type: String = row.get("event_type");

        let aggregate_type = AggregateType::from_str(&aggregate_type).ok_or_else(|| {
            sqlx::Error::ColumnDecode {
                index: "aggregate_type".into(),
                source: format!("unknown aggregate type: {}", aggregate_type).into(),
            }
        })?;
        let event_type =
            EventType::from_str(&event_type).ok_or_else(|| sqlx::Error::ColumnDecode {
                index: "event_type".into(),
                source: format!("unknown event type: {}", event_type).into(),
            })?;

        Ok(Event {
            id: row.get("id"),
            aggregate_type,
            aggregate_id: row.get("aggregate_id"),
            event_type,
            event_data: row.get("event_data"),
            version: row.get("version"),
            created_at: row.get("created_at"),
            metadata: row.get("metadata"),
        })
    }
}

const EVENT_COLUMNS: &str =
    "id, aggregate_type, aggregate_id, event_type, event_data, version, created_at, metadata";

#[async_trait]
impl EventStoreRepository for PgEventStoreRepository {
    async fn save(&self, event: &NewEvent) -> Result<Event, LedgerError> {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO event_store
                (aggregate_type, aggregate_id, event_type, event_data, version, created_at, metadata)
            VALUES ($1, $2, $3, $4, $5, NOW(), $6)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(event.aggregate_type.as_str())
        .bind(&event.aggregate_id)
        .bind(event.event_type.as_str())
        .bind(&event.event_data)
        .bind(event.version)
        .bind(&event.metadata)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Self::row_to_event(&row),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(LedgerError::ConcurrentModification {
                    aggregate_type: event.aggregate_type.as_str(),
                    aggregate_id: event.aggregate_id.clone(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_events(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &str,
    ) -> Result<Vec<Event>, LedgerError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM event_store
            WHERE aggregate_type = $1 AND aggregate_id = $2
            ORDER BY version ASC
            "#
        ))
        .bind(aggregate_type.as_str())
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_event).collect()
    }

    async fn get_events_by_type(&self, event_type: EventType) -> Result<Vec<Event>, LedgerError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM event_store
            WHERE event_type = $1
            ORDER BY created_at ASC
            "#
        ))
        .bind(event_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_event).collect()
    }

    async fn get_events_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, LedgerError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM event_store
            WHERE created_at BETWEEN $1 AND $2
            ORDER BY created_at ASC
            "#
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_event).collect()
    }

    async fn get_last_version(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &str,
    ) -> Result<Version, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(version), 0) AS last_version
            FROM event_store
            WHERE aggregate_type = $1 AND aggregate_id = $2
            "#,
        )
        .bind(aggregate_type.as_str())
        .bind(aggregate_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("last_version"))
    }
}
