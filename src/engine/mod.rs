//! Transaction engine
//!
//! Validates and orchestrates money movements. Every operation follows the
//! same discipline: validate, precheck balances, persist a pending
//! transaction, enqueue it on the worker pool, and return the pending row
//! immediately - completion is observable through subsequent reads. A full
//! queue marks the transaction failed and surfaces `Overloaded`.
//!
//! Transfers are two-phase and locally compensating: debit the sender, credit
//! the receiver, and on credit failure restore the sender with a compensating
//! credit. A failed compensation is the one condition that can leave the
//! ledger inconsistent; it is surfaced as `CompensationFailed` and recorded
//! in the audit log.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::balance::BalanceService;
use crate::concurrent::{TransactionProcessor, WorkerPool};
use crate::config::WorkerPoolConfig;
use crate::core_types::{TransactionId, UserId};
use crate::errors::LedgerError;
use crate::events::EventStoreService;
use crate::models::{
    AggregateType, AuditAction, BalanceOperation, EntityType, EventType, Transaction,
    TransactionStats, TransactionStatus, TransactionType,
};
use crate::persistence::{
    AuditLogRepository, BalanceRepository, NewAuditLog, NewTransaction, TransactionRepository,
};

/// Completed transactions may be rolled back within this window.
const ROLLBACK_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

pub struct TransactionEngine {
    transactions: Arc<dyn TransactionRepository>,
    balances: Arc<dyn BalanceRepository>,
    kernel: Arc<BalanceService>,
    audit: Arc<dyn AuditLogRepository>,
    events: Arc<EventStoreService>,
    pool: Arc<WorkerPool>,
}

impl TransactionEngine {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        balances: Arc<dyn BalanceRepository>,
        kernel: Arc<BalanceService>,
        audit: Arc<dyn AuditLogRepository>,
        events: Arc<EventStoreService>,
        pool_config: WorkerPoolConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<TransactionEngine>| {
            let weak = weak.clone();
            let processor: TransactionProcessor = Arc::new(move |transaction| {
                let weak = weak.clone();
                Box::pin(async move {
                    match weak.upgrade() {
                        Some(engine) => engine.process(transaction).await,
                        None => Ok(()),
                    }
                })
            });

            Self {
                transactions,
                balances,
                kernel,
                audit,
                events,
                pool: Arc::new(WorkerPool::new(
                    pool_config.num_workers,
                    pool_config.queue_capacity,
                    processor,
                )),
            }
        })
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    pub async fn deposit_funds(
        &self,
        user_id: UserId,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<Transaction, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        // Deposits create the receiving balance on first use.
        self.kernel.initialize_balance(user_id).await?;

        self.persist_and_enqueue(NewTransaction {
            from_user_id: None,
            to_user_id: Some(user_id),
            amount,
            tx_type: TransactionType::Deposit,
            description,
        })
        .await
    }

    pub async fn withdraw_funds(
        &self,
        user_id: UserId,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<Transaction, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        let balance = self
            .balances
            .find_by_user_id(user_id)
            .await?
            .ok_or(LedgerError::BalanceNotFound(user_id))?;
        if balance.amount < amount {
            tracing::warn!(user_id, balance = %balance.amount, amount = %amount, "Withdrawal exceeds balance");
            return Err(LedgerError::InsufficientFunds);
        }

        self.persist_and_enqueue(NewTransaction {
            from_user_id: Some(user_id),
            to_user_id: None,
            amount,
            tx_type: TransactionType::Withdraw,
            description,
        })
        .await
    }

    pub async fn transfer_funds(
        &self,
        from_user_id: UserId,
        to_user_id: UserId,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<Transaction, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if from_user_id == to_user_id {
            return Err(LedgerError::InvalidTransaction(
                "transfer to the same account",
            ));
        }

        let from_balance = self
            .balances
            .find_by_user_id(from_user_id)
            .await?
            .ok_or(LedgerError::BalanceNotFound(from_user_id))?;
        if from_balance.amount < amount {
            tracing::warn!(
                from_user_id,
                balance = %from_balance.amount,
                amount = %amount,
                "Transfer exceeds sender balance"
            );
            return Err(LedgerError::InsufficientFunds);
        }

        // The receiving balance is created on first use.
        self.kernel.initialize_balance(to_user_id).await?;

        self.persist_and_enqueue(NewTransaction {
            from_user_id: Some(from_user_id),
            to_user_id: Some(to_user_id),
            amount,
            tx_type: TransactionType::Transfer,
            description,
        })
        .await
    }

    /// Fan a list out to concurrent tasks and wait for all of them to settle.
    /// Item order is not preserved; per-item semantics match the individual
    /// operations. Returns `(processed, failed)`.
    pub async fn process_batch(
        self: &Arc<Self>,
        items: Vec<NewTransaction>,
    ) -> (usize, usize) {
        if items.is_empty() {
            return (0, 0);
        }

        let mut handles = Vec::with_capacity(items.len());
        for item in items {
            let engine = self.clone();
            handles.push(tokio::spawn(async move {
                engine.run_batch_item(item).await
            }));
        }

        let mut processed = 0;
        let mut failed = 0;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => processed += 1,
                _ => failed += 1,
            }
        }

        tracing::info!(processed, failed, "Batch processing settled");
        (processed, failed)
    }

    /// Admin operation: reverse a completed transaction within the 24h
    /// window.
    pub async fn rollback_transaction(&self, id: TransactionId) -> Result<(), LedgerError> {
        let transaction = self
            .transactions
            .find_by_id(id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(id))?;

        if !self.is_eligible_for_rollback(&transaction) {
            return Err(LedgerError::NotEligibleForRollback(id));
        }

        match transaction.tx_type {
            TransactionType::Deposit => {
                let to = transaction
                    .to_user_id
                    .ok_or(LedgerError::InvalidTransaction("deposit without receiver"))?;

                // The deposited funds may already be gone.
                let balance = self
                    .balances
                    .find_by_user_id(to)
                    .await?
                    .ok_or(LedgerError::BalanceNotFound(to))?;
                if balance.amount < transaction.amount {
                    return Err(LedgerError::InsufficientFunds);
                }

                self.kernel
                    .debit(to, transaction.amount, BalanceOperation::Withdraw, Some(id))
                    .await?;
            }
            TransactionType::Withdraw => {
                let from = transaction
                    .from_user_id
                    .ok_or(LedgerError::InvalidTransaction("withdrawal without sender"))?;

                self.kernel
                    .credit(from, transaction.amount, BalanceOperation::Deposit, Some(id))
                    .await?;
            }
            TransactionType::Transfer => {
                let from = transaction
                    .from_user_id
                    .ok_or(LedgerError::InvalidTransaction("transfer without sender"))?;
                let to = transaction
                    .to_user_id
                    .ok_or(LedgerError::InvalidTransaction("transfer without receiver"))?;

                let balance = self
                    .balances
                    .find_by_user_id(to)
                    .await?
                    .ok_or(LedgerError::BalanceNotFound(to))?;
                if balance.amount < transaction.amount {
                    return Err(LedgerError::InsufficientFunds);
                }

                self.kernel
                    .debit(
                        to,
                        transaction.amount,
                        BalanceOperation::TransferOut,
                        Some(id),
                    )
                    .await?;

                if let Err(err) = self
                    .kernel
                    .credit(
                        from,
                        transaction.amount,
                        BalanceOperation::TransferIn,
                        Some(id),
                    )
                    .await
                {
                    tracing::error!(
                        transaction_id = id,
                        error = %err,
                        "Rollback credit failed after receiver was debited"
                    );
                    self.emit_audit(
                        id,
                        AuditAction::Rollback,
                        format!("rollback compensation failed for transaction {}: {}", id, err),
                    )
                    .await;
                    return Err(LedgerError::CompensationFailed(id));
                }
            }
        }

        self.transactions
            .update_status(id, TransactionStatus::RolledBack)
            .await?;

        self.emit_audit(
            id,
            AuditAction::Rollback,
            format!("transaction {} rolled back", id),
        )
        .await;

        tracing::info!(
            transaction_id = id,
            tx_type = transaction.tx_type.as_str(),
            amount = %transaction.amount,
            "Transaction rolled back"
        );
        Ok(())
    }

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        self.transactions
            .find_by_id(id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    pub async fn get_user_transactions(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.transactions.find_by_user(user_id).await
    }

    pub async fn list_transactions(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.transactions.list(limit, offset).await
    }

    pub fn worker_pool_stats(&self) -> TransactionStats {
        let stats = self.pool.stats();
        TransactionStats {
            submitted: stats.submitted,
            completed: stats.completed,
            failed: stats.failed,
            rejected: stats.rejected,
            avg_process_time_nanos: stats.avg_process_time.as_nanos() as u64,
            queue_length: self.pool.queue_length(),
            queue_capacity: self.pool.queue_capacity(),
        }
    }

    /// Stop accepting submissions and drain the worker pool.
    pub async fn shutdown(&self) {
        self.pool.stop().await;
        tracing::info!("Transaction engine shut down");
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn persist_and_enqueue(&self, new_tx: NewTransaction) -> Result<Transaction, LedgerError> {
        self.pool.start();

        let transaction = self.transactions.create(&new_tx).await?;
        self.emit_transaction_event(&transaction, EventType::TransactionCreated)
            .await;

        if !self.pool.submit(transaction.clone()) {
            tracing::error!(transaction_id = transaction.id, "Worker queue refused transaction");
            self.transactions
                .update_status(transaction.id, TransactionStatus::Failed)
                .await?;
            return Err(LedgerError::Overloaded);
        }

        Ok(transaction)
    }

    async fn run_batch_item(self: Arc<Self>, item: NewTransaction) -> Result<(), LedgerError> {
        if item.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        let transaction = self.transactions.create(&item).await?;
        if !transaction.shape_is_valid() {
            self.transactions
                .update_status(transaction.id, TransactionStatus::Failed)
                .await?;
            return Err(LedgerError::InvalidTransaction("malformed participants"));
        }

        self.emit_transaction_event(&transaction, EventType::TransactionCreated)
            .await;
        self.process(transaction).await
    }

    /// Worker-side state transition for one pending transaction.
    async fn process(&self, transaction: Transaction) -> Result<(), LedgerError> {
        let result = match transaction.tx_type {
            TransactionType::Deposit => self.process_deposit(&transaction).await,
            TransactionType::Withdraw => self.process_withdraw(&transaction).await,
            TransactionType::Transfer => self.process_transfer(&transaction).await,
        };

        match &result {
            Ok(()) => {
                self.transactions
                    .update_status(transaction.id, TransactionStatus::Completed)
                    .await?;
                self.emit_transaction_event(&transaction, EventType::TransactionCompleted)
                    .await;
                self.emit_audit(
                    transaction.id,
                    AuditAction::Create,
                    format!(
                        "{} completed: {}",
                        transaction.tx_type.as_str(),
                        transaction.amount
                    ),
                )
                .await;
            }
            Err(err) => {
                tracing::error!(
                    transaction_id = transaction.id,
                    tx_type = transaction.tx_type.as_str(),
                    error = %err,
                    "Transaction processing failed"
                );
                if let Err(status_err) = self
                    .transactions
                    .update_status(transaction.id, TransactionStatus::Failed)
                    .await
                {
                    tracing::error!(
                        transaction_id = transaction.id,
                        error = %status_err,
                        "Failed to mark transaction failed"
                    );
                }
                self.emit_transaction_event(&transaction, EventType::TransactionFailed)
                    .await;
            }
        }

        result
    }

    async fn process_deposit(&self, transaction: &Transaction) -> Result<(), LedgerError> {
        let to = transaction
            .to_user_id
            .ok_or(LedgerError::InvalidTransaction("deposit without receiver"))?;

        self.kernel
            .credit(
                to,
                transaction.amount,
                BalanceOperation::Deposit,
                Some(transaction.id),
            )
            .await?;
        Ok(())
    }

    async fn process_withdraw(&self, transaction: &Transaction) -> Result<(), LedgerError> {
        let from = transaction
            .from_user_id
            .ok_or(LedgerError::InvalidTransaction("withdrawal without sender"))?;

        self.kernel
            .debit(
                from,
                transaction.amount,
                BalanceOperation::Withdraw,
                Some(transaction.id),
            )
            .await?;
        Ok(())
    }

    async fn process_transfer(&self, transaction: &Transaction) -> Result<(), LedgerError> {
        let from = transaction
            .from_user_id
            .ok_or(LedgerError::InvalidTransaction("transfer without sender"))?;
        let to = transaction
            .to_user_id
            .ok_or(LedgerError::InvalidTransaction("transfer without receiver"))?;

        self.kernel
            .debit(
                from,
                transaction.amount,
                BalanceOperation::TransferOut,
                Some(transaction.id),
            )
            .await?;

        match self
            .kernel
            .credit(
                to,
                transaction.amount,
                BalanceOperation::TransferIn,
                Some(transaction.id),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(credit_err) => {
                tracing::error!(
                    transaction_id = transaction.id,
                    to_user_id = to,
                    error = %credit_err,
                    "Transfer credit failed, compensating sender"
                );

                // Compensating internal move: no transaction reference.
                match self
                    .kernel
                    .credit(from, transaction.amount, BalanceOperation::TransferIn, None)
                    .await
                {
                    Ok(_) => {
                        self.emit_audit(
                            transaction.id,
                            AuditAction::Update,
                            format!(
                                "transfer {} compensated: {} restored to user {}",
                                transaction.id, transaction.amount, from
                            ),
                        )
                        .await;
                        Err(credit_err)
                    }
                    Err(comp_err) => {
                        // The sender is debited and the receiver never
                        // credited. Surface loudly.
                        tracing::error!(
                            transaction_id = transaction.id,
                            from_user_id = from,
                            error = %comp_err,
                            "Compensation failed, ledger may be inconsistent"
                        );
                        self.emit_audit(
                            transaction.id,
                            AuditAction::Update,
                            format!(
                                "compensation failed for transfer {}: {} not restored to user {}",
                                transaction.id, transaction.amount, from
                            ),
                        )
                        .await;
                        Err(LedgerError::CompensationFailed(transaction.id))
                    }
                }
            }
        }
    }

    fn is_eligible_for_rollback(&self, transaction: &Transaction) -> bool {
        if transaction.status != TransactionStatus::Completed {
            return false;
        }

        let age = Utc::now().signed_duration_since(transaction.created_at);
        age.to_std()
            .map(|age| age < ROLLBACK_WINDOW)
            .unwrap_or(true)
    }

    async fn emit_transaction_event(&self, transaction: &Transaction, event_type: EventType) {
        let payload = match serde_json::to_value(transaction) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(transaction_id = transaction.id, error = %err, "Transaction event encode failed");
                return;
            }
        };

        if let Err(err) = self
            .events
            .append(
                AggregateType::Transaction,
                &transaction.id.to_string(),
                event_type,
                payload,
            )
            .await
        {
            tracing::error!(
                transaction_id = transaction.id,
                event_type = event_type.as_str(),
                error = %err,
                "Transaction event append failed"
            );
        }
    }

    async fn emit_audit(&self, transaction_id: TransactionId, action: AuditAction, details: String) {
        if let Err(err) = self
            .audit
            .create(&NewAuditLog {
                entity_type: EntityType::Transaction,
                entity_id: transaction_id,
                action,
                details,
            })
            .await
        {
            tracing::error!(transaction_id, error = %err, "Audit log write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{
        MemoryAuditLogRepository, MemoryBalanceRepository, MemoryEventStoreRepository,
        MemoryTransactionRepository,
    };

    pub(crate) struct Fixture {
        pub engine: Arc<TransactionEngine>,
        pub balances: Arc<MemoryBalanceRepository>,
        pub transactions: Arc<MemoryTransactionRepository>,
        pub audit: Arc<MemoryAuditLogRepository>,
        pub events: Arc<EventStoreService>,
        pub kernel: Arc<BalanceService>,
    }

    pub(crate) fn fixture() -> Fixture {
        let balances = Arc::new(MemoryBalanceRepository::new());
        let transactions = Arc::new(MemoryTransactionRepository::new());
        let audit = Arc::new(MemoryAuditLogRepository::new());
        let events = Arc::new(EventStoreService::new(Arc::new(
            MemoryEventStoreRepository::new(),
        )));
        let kernel = Arc::new(BalanceService::new(
            balances.clone(),
            audit.clone(),
            events.clone(),
        ));
        let engine = TransactionEngine::new(
            transactions.clone(),
            balances.clone(),
            kernel.clone(),
            audit.clone(),
            events.clone(),
            WorkerPoolConfig::default(),
        );
        Fixture {
            engine,
            balances,
            transactions,
            audit,
            events,
            kernel,
        }
    }

    pub(crate) fn dec(value: i64) -> Decimal {
        Decimal::new(value, 2)
    }

    /// Poll until the transaction reaches a terminal status.
    pub(crate) async fn settle(f: &Fixture, id: TransactionId) -> TransactionStatus {
        for _ in 0..200 {
            let tx = f.engine.get_transaction(id).await.unwrap();
            if tx.status.is_terminal() {
                return tx.status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("transaction {} did not settle", id);
    }

    #[tokio::test]
    async fn test_deposit_rejects_zero_amount() {
        let f = fixture();
        let result = f.engine.deposit_funds(1, Decimal::ZERO, None).await;
        assert!(matches!(result, Err(LedgerError::InvalidAmount)));
    }

    #[tokio::test]
    async fn test_withdraw_insufficient_is_synchronous_without_row() {
        let f = fixture();
        f.kernel.initialize_balance(1).await.unwrap();
        f.kernel.deposit_atomically(1, dec(5000)).await.unwrap();

        let result = f.engine.withdraw_funds(1, dec(6000), None).await;
        assert!(matches!(result, Err(LedgerError::InsufficientFunds)));

        // No transaction row was created.
        assert!(f.engine.get_user_transactions(1).await.unwrap().is_empty());
        let balance = f.kernel.get_balance(1).await.unwrap();
        assert_eq!(balance.amount, dec(5000));
    }

    #[tokio::test]
    async fn test_transfer_to_self_is_rejected() {
        let f = fixture();
        let result = f.engine.transfer_funds(1, 1, dec(100), None).await;
        assert!(matches!(result, Err(LedgerError::InvalidTransaction(_))));
    }

    #[tokio::test]
    async fn test_deposit_completes_and_emits_lifecycle_events() {
        let f = fixture();
        f.kernel.initialize_balance(1).await.unwrap();

        let tx = f.engine.deposit_funds(1, dec(10000), None).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(settle(&f, tx.id).await, TransactionStatus::Completed);

        let balance = f.kernel.get_balance(1).await.unwrap();
        assert_eq!(balance.amount, dec(10000));

        let events = f
            .events
            .get_events(AggregateType::Transaction, &tx.id.to_string())
            .await
            .unwrap();
        let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![EventType::TransactionCreated, EventType::TransactionCompleted]
        );
        assert_eq!(events[0].version, 1);
        assert_eq!(events[1].version, 2);
    }

    #[tokio::test]
    async fn test_transfer_moves_funds_and_writes_both_history_rows() {
        let f = fixture();
        f.kernel.initialize_balance(1).await.unwrap();
        f.kernel.initialize_balance(2).await.unwrap();
        f.kernel.deposit_atomically(1, dec(10000)).await.unwrap();

        let tx = f
            .engine
            .transfer_funds(1, 2, dec(2550), None)
            .await
            .unwrap();
        assert_eq!(settle(&f, tx.id).await, TransactionStatus::Completed);

        assert_eq!(f.kernel.get_balance(1).await.unwrap().amount, dec(7450));
        assert_eq!(f.kernel.get_balance(2).await.unwrap().amount, dec(2550));

        let history = f.balances.history_snapshot();
        let ops: Vec<(UserId, BalanceOperation)> = history
            .iter()
            .filter(|h| h.transaction_id == Some(tx.id))
            .map(|h| (h.user_id, h.operation))
            .collect();
        assert!(ops.contains(&(1, BalanceOperation::TransferOut)));
        assert!(ops.contains(&(2, BalanceOperation::TransferIn)));
    }

    #[tokio::test]
    async fn test_transfer_credit_failure_compensates_sender() {
        let f = fixture();
        f.kernel.initialize_balance(1).await.unwrap();
        f.kernel.initialize_balance(2).await.unwrap();
        f.kernel.deposit_atomically(1, dec(10000)).await.unwrap();

        // Receiver's storage fails after the sender debit succeeds.
        f.balances.fail_updates_for(2);

        let tx = f
            .engine
            .transfer_funds(1, 2, dec(3000), None)
            .await
            .unwrap();
        assert_eq!(settle(&f, tx.id).await, TransactionStatus::Failed);

        // Compensation restored the sender; pre-state holds.
        assert_eq!(f.kernel.get_balance(1).await.unwrap().amount, dec(10000));

        let audit = f.audit.snapshot();
        assert!(
            audit
                .iter()
                .any(|entry| entry.details.contains("compensated")),
            "audit log must record the compensating action"
        );
    }

    #[tokio::test]
    async fn test_transfer_compensation_failure_is_audited() {
        let f = fixture();
        f.kernel.initialize_balance(1).await.unwrap();
        f.kernel.initialize_balance(2).await.unwrap();
        f.kernel.deposit_atomically(1, dec(10000)).await.unwrap();

        // Receiver credit fails; the sender debit is allowed once and the
        // compensating credit then fails too.
        f.balances.fail_updates_for(2);
        f.balances.fail_updates_after(1, 1);

        let tx = f
            .engine
            .transfer_funds(1, 2, dec(3000), None)
            .await
            .unwrap();
        assert_eq!(settle(&f, tx.id).await, TransactionStatus::Failed);

        let audit = f.audit.snapshot();
        assert!(
            audit
                .iter()
                .any(|entry| entry.details.contains("compensation failed")),
            "audit log must record the failed compensation"
        );
    }

    #[tokio::test]
    async fn test_rollback_deposit_within_window() {
        let f = fixture();
        f.kernel.initialize_balance(1).await.unwrap();

        let tx = f.engine.deposit_funds(1, dec(4000), None).await.unwrap();
        assert_eq!(settle(&f, tx.id).await, TransactionStatus::Completed);

        f.engine.rollback_transaction(tx.id).await.unwrap();

        assert_eq!(f.kernel.get_balance(1).await.unwrap().amount, Decimal::ZERO);
        let rolled = f.engine.get_transaction(tx.id).await.unwrap();
        assert_eq!(rolled.status, TransactionStatus::RolledBack);

        // Status is terminal: a second rollback is rejected.
        let again = f.engine.rollback_transaction(tx.id).await;
        assert!(matches!(again, Err(LedgerError::NotEligibleForRollback(_))));
    }

    #[tokio::test]
    async fn test_rollback_outside_window_is_rejected() {
        let f = fixture();
        f.kernel.initialize_balance(1).await.unwrap();

        let tx = f.engine.deposit_funds(1, dec(4000), None).await.unwrap();
        assert_eq!(settle(&f, tx.id).await, TransactionStatus::Completed);

        f.transactions
            .backdate(tx.id, Utc::now() - chrono::Duration::hours(25));

        let result = f.engine.rollback_transaction(tx.id).await;
        assert!(matches!(result, Err(LedgerError::NotEligibleForRollback(_))));
        assert_eq!(f.kernel.get_balance(1).await.unwrap().amount, dec(4000));
    }

    #[tokio::test]
    async fn test_rollback_transfer_reverses_both_legs() {
        let f = fixture();
        f.kernel.initialize_balance(1).await.unwrap();
        f.kernel.initialize_balance(2).await.unwrap();
        f.kernel.deposit_atomically(1, dec(10000)).await.unwrap();

        let tx = f
            .engine
            .transfer_funds(1, 2, dec(2500), None)
            .await
            .unwrap();
        assert_eq!(settle(&f, tx.id).await, TransactionStatus::Completed);

        f.engine.rollback_transaction(tx.id).await.unwrap();
        assert_eq!(f.kernel.get_balance(1).await.unwrap().amount, dec(10000));
        assert_eq!(f.kernel.get_balance(2).await.unwrap().amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_batch_settles_with_counts() {
        let f = fixture();
        f.kernel.initialize_balance(1).await.unwrap();
        f.kernel.deposit_atomically(1, dec(10000)).await.unwrap();

        let items = vec![
            NewTransaction {
                from_user_id: None,
                to_user_id: Some(1),
                amount: dec(1000),
                tx_type: TransactionType::Deposit,
                description: None,
            },
            NewTransaction {
                from_user_id: Some(1),
                to_user_id: None,
                amount: dec(500),
                tx_type: TransactionType::Withdraw,
                description: None,
            },
            // Fails during processing: balance 99 does not exist.
            NewTransaction {
                from_user_id: None,
                to_user_id: Some(99),
                amount: dec(100),
                tx_type: TransactionType::Deposit,
                description: None,
            },
        ];

        let (processed, failed) = f.engine.process_batch(items).await;
        assert_eq!(processed, 2);
        assert_eq!(failed, 1);

        assert_eq!(f.kernel.get_balance(1).await.unwrap().amount, dec(10500));
    }

    #[tokio::test]
    async fn test_worker_pool_stats_are_exposed() {
        let f = fixture();
        f.kernel.initialize_balance(1).await.unwrap();

        let tx = f.engine.deposit_funds(1, dec(100), None).await.unwrap();
        settle(&f, tx.id).await;

        let stats = f.engine.worker_pool_stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.queue_capacity, WorkerPoolConfig::default().queue_capacity);

        f.engine.shutdown().await;
    }
}
