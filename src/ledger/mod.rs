//! The durable record of merchant balances and the withdrawal transactions that
//! mutate them.
//!
//! All balance mutation goes through [`LedgerStore`]. `reserve_and_debit` is the only
//! point where money leaves the internal ledger, and it always happens before any
//! external network call.

mod memory;
mod model;

pub use memory::InMemoryLedger;
pub use model::*;

use async_trait::async_trait;
use uuid::Uuid;

/// Payload for creating a new withdrawal transaction while reserving its funds.
///
/// The destination is snapshotted from the merchant account by the orchestrator so the
/// transaction keeps paying out to the destination that was configured when it was
/// created.
#[derive(Debug, Clone)]
pub struct NewWithdrawal {
    pub amount_in_minor: u64,
    pub fee_in_minor: u64,
    pub destination: PayoutDestination,
    pub metadata: TransactionMetadata,
}

/// Storage contract for merchant balances and withdrawal transactions.
///
/// Implementations must serialize concurrent operations per merchant account: two
/// simultaneous `reserve_and_debit` calls must never both pass the balance check
/// against a stale balance.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Looks up a merchant account.
    async fn merchant(&self, merchant_id: &str) -> Result<MerchantAccount, LedgerError>;

    /// Atomically checks the balance covers `amount + fee`, creates a `Pending`
    /// withdrawal transaction and debits the total, all in one step.
    async fn reserve_and_debit(
        &self,
        merchant_id: &str,
        withdrawal: NewWithdrawal,
    ) -> Result<WithdrawalTransaction, LedgerError>;

    /// Transitions a transaction to `Completed`, recording the provider's reference.
    ///
    /// Idempotent: marking an already-completed transaction is a no-op.
    async fn mark_completed(
        &self,
        transaction_id: Uuid,
        provider_reference: &str,
    ) -> Result<WithdrawalTransaction, LedgerError>;

    /// Transitions a transaction to `Failed` and credits the total back to the
    /// merchant balance in the same atomic operation. This is the compensating action
    /// for a withdrawal that could not be settled externally.
    ///
    /// Idempotent: marking an already-failed transaction is a no-op and does not
    /// refund twice.
    async fn mark_failed_and_refund(
        &self,
        transaction_id: Uuid,
        reason: &str,
    ) -> Result<WithdrawalTransaction, LedgerError>;

    /// Attaches the most recent raw provider status payload to a transaction for audit.
    async fn record_status_payload(
        &self,
        transaction_id: Uuid,
        payload: serde_json::Value,
    ) -> Result<(), LedgerError>;

    /// Looks up a single withdrawal transaction.
    async fn transaction(&self, transaction_id: Uuid) -> Result<WithdrawalTransaction, LedgerError>;

    /// Returns every `Pending` transaction created at least `min_age` ago, the feed
    /// for the reconciliation loop.
    async fn pending_older_than(
        &self,
        min_age: chrono::Duration,
    ) -> Result<Vec<WithdrawalTransaction>, LedgerError>;
}

/// Failure modes of the [`LedgerStore`].
#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("merchant {0} not found")]
    UnknownMerchant(String),
    #[error("withdrawal transaction {0} not found")]
    UnknownTransaction(Uuid),
    /// The requested amount plus fee exceeds the available balance. Reported to the
    /// caller, never retried.
    #[error("insufficient funds: {required_in_minor} required, {available_in_minor} available")]
    InsufficientFunds {
        available_in_minor: u64,
        required_in_minor: u64,
    },
    /// Two simultaneous withdrawal attempts raced on the same account. The caller
    /// retries once with a re-read before surfacing this.
    #[error("concurrent modification of merchant {0}")]
    ConcurrencyConflict(String),
    #[error("transaction {id} is {current:?}, cannot transition to {requested:?}")]
    InvalidTransition {
        id: Uuid,
        current: WithdrawalStatus,
        requested: WithdrawalStatus,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
