//! Replay engine
//!
//! Rebuilds projected state from the event log. Replay is a recovery tool:
//! it assumes the aggregate is not receiving live writes while it runs.
//! Applying the same event sequence twice yields the same final state.

use std::sync::Arc;

use serde::Deserialize;

use crate::core_types::{TransactionId, UserId};
use crate::errors::LedgerError;
use crate::events::EventStoreService;
use crate::models::{AggregateType, Balance, Event, EventType, TransactionStatus};
use crate::persistence::{BalanceRepository, TransactionRepository};

fn decode_error(err: serde_json::Error) -> LedgerError {
    LedgerError::Storage(sqlx::Error::Decode(Box::new(err)))
}

pub struct ReplayEngine {
    events: Arc<EventStoreService>,
    balances: Arc<dyn BalanceRepository>,
    transactions: Arc<dyn TransactionRepository>,
}

impl ReplayEngine {
    pub fn new(
        events: Arc<EventStoreService>,
        balances: Arc<dyn BalanceRepository>,
        transactions: Arc<dyn TransactionRepository>,
    ) -> Self {
        Self {
            events,
            balances,
            transactions,
        }
    }

    /// Iterate the aggregate's events in version order, invoking `handler`
    /// for each. Stops at the first handler error. Returns the number of
    /// events applied.
    pub async fn replay_events<H>(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &str,
        handler: &mut H,
    ) -> Result<usize, LedgerError>
    where
        H: FnMut(&Event) -> Result<(), LedgerError> + Send,
    {
        let events = self.events.get_events(aggregate_type, aggregate_id).await?;

        let mut applied = 0;
        for event in &events {
            handler(event)?;
            applied += 1;
        }

        tracing::info!(
            aggregate_type = aggregate_type.as_str(),
            aggregate_id,
            applied,
            "Replay completed"
        );
        Ok(applied)
    }

    /// Re-apply every `balance_updated` event to the store in version order.
    /// Returns the number of events applied.
    pub async fn replay_balance_events(&self, user_id: UserId) -> Result<usize, LedgerError> {
        let events = self
            .events
            .get_events(AggregateType::Balance, &user_id.to_string())
            .await?;

        let mut applied = 0;
        for event in &events {
            if event.event_type != EventType::BalanceUpdated {
                continue;
            }
            let balance = Balance::deserialize(&event.event_data).map_err(decode_error)?;
            self.balances.upsert(&balance).await?;
            applied += 1;
        }

        tracing::info!(user_id, applied, "Balance events replayed");
        Ok(applied)
    }

    /// Reconstitute the Balance row from its `balance_updated` events.
    /// Returns the rebuilt balance, or `None` when the log has no balance
    /// events for the user.
    pub async fn rebuild_balance_state(
        &self,
        user_id: UserId,
    ) -> Result<Option<Balance>, LedgerError> {
        let events = self
            .events
            .get_events(AggregateType::Balance, &user_id.to_string())
            .await?;

        let mut latest: Option<Balance> = None;
        for event in &events {
            if event.event_type == EventType::BalanceUpdated {
                latest =
                    Some(Balance::deserialize(&event.event_data).map_err(decode_error)?);
            }
        }

        match latest {
            Some(balance) => {
                let stored = self.balances.upsert(&balance).await?;
                tracing::info!(user_id, amount = %stored.amount, "Balance state rebuilt from events");
                Ok(Some(stored))
            }
            None => Ok(None),
        }
    }

    /// Restore a transaction's status from its lifecycle events.
    pub async fn rebuild_transaction_state(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<TransactionStatus>, LedgerError> {
        let events = self
            .events
            .get_events(AggregateType::Transaction, &transaction_id.to_string())
            .await?;

        let mut status: Option<TransactionStatus> = None;
        for event in &events {
            status = Some(match event.event_type {
                EventType::TransactionCreated => TransactionStatus::Pending,
                EventType::TransactionCompleted => TransactionStatus::Completed,
                EventType::TransactionFailed => TransactionStatus::Failed,
                EventType::BalanceUpdated => continue,
            });
        }

        if let Some(status) = status {
            self.transactions
                .update_status(transaction_id, status)
                .await?;
            tracing::info!(
                transaction_id,
                status = status.as_str(),
                "Transaction state rebuilt from events"
            );
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{
        MemoryBalanceRepository, MemoryEventStoreRepository, MemoryTransactionRepository,
        NewTransaction,
    };
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn engine() -> (
        ReplayEngine,
        Arc<EventStoreService>,
        Arc<MemoryBalanceRepository>,
        Arc<MemoryTransactionRepository>,
    ) {
        let events = Arc::new(EventStoreService::new(Arc::new(
            MemoryEventStoreRepository::new(),
        )));
        let balances = Arc::new(MemoryBalanceRepository::new());
        let transactions = Arc::new(MemoryTransactionRepository::new());
        let engine = ReplayEngine::new(events.clone(), balances.clone(), transactions.clone());
        (engine, events, balances, transactions)
    }

    fn balance_payload(user_id: i64, amount: Decimal) -> serde_json::Value {
        serde_json::to_value(Balance {
            user_id,
            amount,
            last_updated_at: Utc::now(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_rebuild_balance_applies_latest_event() {
        let (engine, events, balances, _) = engine();

        for amount in [Decimal::new(1000, 2), Decimal::new(2500, 2)] {
            events
                .append(
                    AggregateType::Balance,
                    "1",
                    EventType::BalanceUpdated,
                    balance_payload(1, amount),
                )
                .await
                .unwrap();
        }

        let rebuilt = engine.rebuild_balance_state(1).await.unwrap().unwrap();
        assert_eq!(rebuilt.amount, Decimal::new(2500, 2));

        let stored = balances.find_by_user_id(1).await.unwrap().unwrap();
        assert_eq!(stored.amount, Decimal::new(2500, 2));
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let (engine, events, _, _) = engine();

        events
            .append(
                AggregateType::Balance,
                "2",
                EventType::BalanceUpdated,
                balance_payload(2, Decimal::new(750, 2)),
            )
            .await
            .unwrap();

        let first = engine.rebuild_balance_state(2).await.unwrap().unwrap();
        let second = engine.rebuild_balance_state(2).await.unwrap().unwrap();
        assert_eq!(first.amount, second.amount);
    }

    #[tokio::test]
    async fn test_rebuild_without_events_is_none() {
        let (engine, _, _, _) = engine();
        assert!(engine.rebuild_balance_state(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rebuild_transaction_status() {
        let (engine, events, _, transactions) = engine();

        let tx = transactions
            .create(&NewTransaction {
                from_user_id: None,
                to_user_id: Some(1),
                amount: Decimal::new(100, 2),
                tx_type: crate::models::TransactionType::Deposit,
                description: None,
            })
            .await
            .unwrap();

        let id = tx.id.to_string();
        events
            .append(
                AggregateType::Transaction,
                &id,
                EventType::TransactionCreated,
                serde_json::json!({}),
            )
            .await
            .unwrap();
        events
            .append(
                AggregateType::Transaction,
                &id,
                EventType::TransactionCompleted,
                serde_json::json!({}),
            )
            .await
            .unwrap();

        let status = engine.rebuild_transaction_state(tx.id).await.unwrap();
        assert_eq!(status, Some(TransactionStatus::Completed));

        let stored = transactions.find_by_id(tx.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn test_replay_stops_at_first_handler_error() {
        let (engine, events, _, _) = engine();

        for _ in 0..3 {
            events
                .append(
                    AggregateType::Balance,
                    "5",
                    EventType::BalanceUpdated,
                    balance_payload(5, Decimal::ZERO),
                )
                .await
                .unwrap();
        }

        let mut seen = 0;
        let result = engine
            .replay_events(AggregateType::Balance, "5", &mut |_event| {
                seen += 1;
                if seen == 2 {
                    Err(LedgerError::Storage(sqlx::Error::PoolClosed))
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(seen, 2);
    }
}
