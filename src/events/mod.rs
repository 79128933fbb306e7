//! Event store service
//!
//! Append discipline over the repository: the writer reads the partition's
//! last version, appends at `last + 1`, and on a version conflict re-reads
//! and retries exactly once before surfacing `ConcurrentModification`.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core_types::Version;
use crate::errors::LedgerError;
use crate::models::{AggregateType, Event, EventType};
use crate::persistence::{EventStoreRepository, NewEvent};

pub mod replay;

pub use replay::ReplayEngine;

pub struct EventStoreService {
    repo: Arc<dyn EventStoreRepository>,
}

impl EventStoreService {
    pub fn new(repo: Arc<dyn EventStoreRepository>) -> Self {
        Self { repo }
    }

    /// Append an event at the next version of its partition.
    pub async fn append(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &str,
        event_type: EventType,
        event_data: serde_json::Value,
    ) -> Result<Event, LedgerError> {
        match self
            .try_append(aggregate_type, aggregate_id, event_type, event_data.clone())
            .await
        {
            Err(LedgerError::ConcurrentModification { .. }) => {
                // Lost the race for this version; one re-read and retry.
                tracing::debug!(
                    aggregate_type = aggregate_type.as_str(),
                    aggregate_id,
                    "Version conflict on event append, retrying once"
                );
                self.try_append(aggregate_type, aggregate_id, event_type, event_data)
                    .await
            }
            other => other,
        }
    }

    async fn try_append(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &str,
        event_type: EventType,
        event_data: serde_json::Value,
    ) -> Result<Event, LedgerError> {
        let last_version = self
            .repo
            .get_last_version(aggregate_type, aggregate_id)
            .await?;

        self.repo
            .save(&NewEvent {
                aggregate_type,
                aggregate_id: aggregate_id.to_string(),
                event_type,
                event_data,
                version: last_version + 1,
                metadata: None,
            })
            .await
    }

    /// Save an event at a caller-chosen version. Stale versions fail with
    /// `ConcurrentModification`; no retry.
    pub async fn save_event(&self, event: &NewEvent) -> Result<Event, LedgerError> {
        self.repo.save(event).await
    }

    pub async fn get_events(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &str,
    ) -> Result<Vec<Event>, LedgerError> {
        self.repo.get_events(aggregate_type, aggregate_id).await
    }

    pub async fn get_events_by_type(
        &self,
        event_type: EventType,
    ) -> Result<Vec<Event>, LedgerError> {
        self.repo.get_events_by_type(event_type).await
    }

    pub async fn get_events_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, LedgerError> {
        self.repo.get_events_by_time_range(start, end).await
    }

    pub async fn get_last_version(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &str,
    ) -> Result<Version, LedgerError> {
        self.repo.get_last_version(aggregate_type, aggregate_id).await
    }
}
