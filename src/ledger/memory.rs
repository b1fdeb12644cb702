use super::{
    LedgerError, LedgerStore, MerchantAccount, NewWithdrawal, WithdrawalStatus,
    WithdrawalTransaction,
};
use async_trait::async_trait;
use chrono::Utc;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use uuid::Uuid;

/// In-memory [`LedgerStore`].
///
/// A single mutex guards accounts and transactions together, which gives every trait
/// method the required atomicity: concurrent `reserve_and_debit` calls on the same
/// account serialize on the lock instead of racing the balance check.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    inner: Arc<Mutex<LedgerInner>>,
}

#[derive(Debug, Default)]
struct LedgerInner {
    accounts: HashMap<String, MerchantAccount>,
    transactions: HashMap<Uuid, WithdrawalTransaction>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a merchant account. Merchant onboarding happens outside this subsystem.
    pub fn insert_account(&self, account: MerchantAccount) {
        let mut inner = self.inner.lock().unwrap();
        inner.accounts.insert(account.id.clone(), account);
    }

    /// Current balance of a merchant, in minor units.
    pub fn balance_of(&self, merchant_id: &str) -> Option<u64> {
        let inner = self.inner.lock().unwrap();
        inner
            .accounts
            .get(merchant_id)
            .map(|a| a.balance_in_minor)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn merchant(&self, merchant_id: &str) -> Result<MerchantAccount, LedgerError> {
        let inner = self.inner.lock().unwrap();
        inner
            .accounts
            .get(merchant_id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownMerchant(merchant_id.to_string()))
    }

    async fn reserve_and_debit(
        &self,
        merchant_id: &str,
        withdrawal: NewWithdrawal,
    ) -> Result<WithdrawalTransaction, LedgerError> {
        let total_in_minor = withdrawal
            .amount_in_minor
            .checked_add(withdrawal.fee_in_minor)
            .ok_or_else(|| LedgerError::Other(anyhow::anyhow!("amount + fee overflows")))?;

        let mut inner = self.inner.lock().unwrap();
        let account = inner
            .accounts
            .get_mut(merchant_id)
            .ok_or_else(|| LedgerError::UnknownMerchant(merchant_id.to_string()))?;

        if account.balance_in_minor < total_in_minor {
            return Err(LedgerError::InsufficientFunds {
                available_in_minor: account.balance_in_minor,
                required_in_minor: total_in_minor,
            });
        }

        account.balance_in_minor -= total_in_minor;
        let currency = account.currency.clone();

        let transaction = WithdrawalTransaction {
            id: Uuid::new_v4(),
            merchant_id: merchant_id.to_string(),
            amount_in_minor: withdrawal.amount_in_minor,
            fee_in_minor: withdrawal.fee_in_minor,
            total_in_minor,
            currency,
            status: WithdrawalStatus::Pending,
            provider_reference: None,
            destination: withdrawal.destination,
            created_at: Utc::now(),
            completed_at: None,
            metadata: withdrawal.metadata,
        };
        inner
            .transactions
            .insert(transaction.id, transaction.clone());

        Ok(transaction)
    }

    async fn mark_completed(
        &self,
        transaction_id: Uuid,
        provider_reference: &str,
    ) -> Result<WithdrawalTransaction, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let transaction = inner
            .transactions
            .get_mut(&transaction_id)
            .ok_or(LedgerError::UnknownTransaction(transaction_id))?;

        match transaction.status {
            // No-op on repeat calls
            WithdrawalStatus::Completed => Ok(transaction.clone()),
            WithdrawalStatus::Failed => Err(LedgerError::InvalidTransition {
                id: transaction_id,
                current: transaction.status,
                requested: WithdrawalStatus::Completed,
            }),
            WithdrawalStatus::Pending => {
                transaction.status = WithdrawalStatus::Completed;
                transaction.provider_reference = Some(provider_reference.to_string());
                transaction.completed_at = Some(Utc::now());
                Ok(transaction.clone())
            }
        }
    }

    async fn mark_failed_and_refund(
        &self,
        transaction_id: Uuid,
        reason: &str,
    ) -> Result<WithdrawalTransaction, LedgerError> {
        let mut inner = self.inner.lock().unwrap();

        let transaction = inner
            .transactions
            .get(&transaction_id)
            .ok_or(LedgerError::UnknownTransaction(transaction_id))?
            .clone();

        match transaction.status {
            // No-op on repeat calls; the refund must not be applied twice
            WithdrawalStatus::Failed => Ok(transaction),
            WithdrawalStatus::Completed => Err(LedgerError::InvalidTransition {
                id: transaction_id,
                current: transaction.status,
                requested: WithdrawalStatus::Failed,
            }),
            WithdrawalStatus::Pending => {
                let account = inner
                    .accounts
                    .get_mut(&transaction.merchant_id)
                    .ok_or_else(|| {
                        LedgerError::UnknownMerchant(transaction.merchant_id.clone())
                    })?;
                account.balance_in_minor += transaction.total_in_minor;

                let transaction = inner
                    .transactions
                    .get_mut(&transaction_id)
                    .ok_or(LedgerError::UnknownTransaction(transaction_id))?;
                transaction.status = WithdrawalStatus::Failed;
                transaction.completed_at = Some(Utc::now());
                transaction.metadata.failure_reason = Some(reason.to_string());
                Ok(transaction.clone())
            }
        }
    }

    async fn record_status_payload(
        &self,
        transaction_id: Uuid,
        payload: serde_json::Value,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let transaction = inner
            .transactions
            .get_mut(&transaction_id)
            .ok_or(LedgerError::UnknownTransaction(transaction_id))?;
        transaction.metadata.last_status_payload = Some(payload);
        Ok(())
    }

    async fn transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<WithdrawalTransaction, LedgerError> {
        let inner = self.inner.lock().unwrap();
        inner
            .transactions
            .get(&transaction_id)
            .cloned()
            .ok_or(LedgerError::UnknownTransaction(transaction_id))
    }

    async fn pending_older_than(
        &self,
        min_age: chrono::Duration,
    ) -> Result<Vec<WithdrawalTransaction>, LedgerError> {
        let cutoff = Utc::now() - min_age;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .transactions
            .values()
            .filter(|t| t.status == WithdrawalStatus::Pending && t.created_at <= cutoff)
            .cloned()
            .collect())
    }
}
