//! The withdrawal orchestrator.
//!
//! One call to [`WithdrawalEngine::execute`] drives a withdrawal through
//! `Requested -> Reserved -> TokenAcquired -> Submitted` and into a terminal
//! `Completed`/`Failed` state, or leaves it `Pending` for the
//! [`Reconciler`](crate::reconciliation::Reconciler) when the provider outcome is not
//! yet known.
//!
//! The provider is only ever contacted after funds are reserved in the ledger, and
//! every terminal state leaves the ledger and the provider's view of the transfer
//! consistent: either both reflect money moved, or both reflect money returned.

use crate::{
    apis::{
        auth::AuthError,
        disbursements::{
            CreateTransferRequest, Payee, TransferOutcome, TransferRejection, TransferStatus,
        },
    },
    client::ProviderClient,
    config::{ConfigError, ConfigResolver, Environment, ProviderConfig, ProviderKind},
    fees::{FeeSchedule, UnknownTier},
    ledger::{
        LedgerError, LedgerStore, MerchantAccount, NewWithdrawal, TransactionMetadata,
        WithdrawalStatus, WithdrawalTransaction,
    },
    notifications::{NotificationSink, TracingSink, WithdrawalEvent, WithdrawalEventKind},
    Error,
};
use retry_policies::{policies::ExponentialBackoff, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt::{Debug, Formatter},
    sync::Arc,
    time::Duration,
};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Inbound withdrawal request.
///
/// Currency, payout rail and destination are derived from the stored merchant
/// account, never from the caller, so a caller cannot redirect funds to an
/// unconfigured destination.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WithdrawalRequest {
    pub merchant_id: String,
    pub amount_in_minor: u64,
}

/// Response to an accepted withdrawal.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WithdrawalReceipt {
    pub transaction_id: Uuid,
    /// The provider's identifier for the executed transfer. `None` while the outcome
    /// is still being reconciled.
    pub provider_reference: Option<String>,
    pub amount_in_minor: u64,
    pub fee_in_minor: u64,
    pub total_in_minor: u64,
    pub status: WithdrawalStatus,
}

/// Structured failure of a withdrawal, one variant per user- or operator-facing kind.
#[derive(thiserror::Error, Debug)]
pub enum WithdrawalError {
    /// Amount plus fee exceeds the merchant balance. No state was created.
    #[error("insufficient funds: {required_in_minor} required, {available_in_minor} available")]
    InsufficientFunds {
        available_in_minor: u64,
        required_in_minor: u64,
    },
    /// The merchant has no payout destination configured. No state was created.
    #[error("no payout destination configured for this merchant")]
    DestinationNotConfigured,
    #[error(transparent)]
    UnknownPlanTier(#[from] UnknownTier),
    /// No active provider configuration for the merchant's rail and country.
    /// The withdrawal was refunded.
    #[error("provider not configured: {0}")]
    NotConfigured(#[from] ConfigError),
    /// The provider rejected our credentials. The withdrawal was refunded; an
    /// operator has to fix the credential set before retrying.
    #[error("provider rejected the configured credentials (HTTP {status})")]
    AuthenticationFailed { status: u16 },
    /// The provider could not be reached within the bounded retries.
    /// The withdrawal was refunded.
    #[error("provider unavailable, withdrawal refunded")]
    ProviderUnavailable,
    /// The provider explicitly rejected or failed the transfer.
    /// The withdrawal was refunded.
    #[error("provider rejected the transfer: {rejection}")]
    ProviderRejected { rejection: TransferRejection },
    #[error(transparent)]
    Ledger(LedgerError),
    #[error(transparent)]
    Internal(#[from] Error),
}

impl From<LedgerError> for WithdrawalError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds {
                available_in_minor,
                required_in_minor,
            } => WithdrawalError::InsufficientFunds {
                available_in_minor,
                required_in_minor,
            },
            other => WithdrawalError::Ledger(other),
        }
    }
}

/// Orchestrates withdrawals from merchant balances to external payout rails.
#[derive(Clone)]
pub struct WithdrawalEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    ledger: Arc<dyn LedgerStore>,
    resolver: Arc<dyn ConfigResolver>,
    sink: Arc<dyn NotificationSink>,
    fees: FeeSchedule,
    environment: Environment,
    status_poll_delay: Duration,
    retry_policy: Option<Arc<dyn RetryPolicy + Send + Sync>>,
    http_client: Option<reqwest::Client>,
    /// One client (and therefore one cached token) per provider configuration.
    clients: Mutex<HashMap<(ProviderKind, String, Environment), ProviderClient>>,
}

impl Debug for WithdrawalEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WithdrawalEngine")
            .field("environment", &self.inner.environment)
            .finish_non_exhaustive()
    }
}

enum SettleOutcome {
    Completed { provider_reference: String },
    PendingReconciliation,
}

impl WithdrawalEngine {
    /// Returns a new builder to configure a [`WithdrawalEngine`].
    pub fn builder(
        ledger: Arc<dyn LedgerStore>,
        resolver: Arc<dyn ConfigResolver>,
    ) -> WithdrawalEngineBuilder {
        WithdrawalEngineBuilder::new(ledger, resolver)
    }

    /// Executes one withdrawal end to end.
    ///
    /// On `Ok`, the receipt's status is either `Completed`, or `Pending` when the
    /// provider outcome is not yet known and reconciliation will settle it later.
    /// On `Err`, any reserved funds have been refunded.
    #[tracing::instrument(
        name = "Execute Withdrawal",
        skip(self, request),
        fields(
            merchant_id = %request.merchant_id,
            amount_in_minor = request.amount_in_minor,
        )
    )]
    pub async fn execute(
        &self,
        request: &WithdrawalRequest,
    ) -> Result<WithdrawalReceipt, WithdrawalError> {
        let account = self.inner.ledger.merchant(&request.merchant_id).await?;
        let destination = account
            .payout_destination
            .clone()
            .ok_or(WithdrawalError::DestinationNotConfigured)?;

        let fee_in_minor = self
            .inner
            .fees
            .fee_for(account.plan, request.amount_in_minor)?;

        // Funds are reserved before any external call: a committed `Pending`
        // transaction is the source of truth for "money left the account".
        let new_withdrawal = NewWithdrawal {
            amount_in_minor: request.amount_in_minor,
            fee_in_minor,
            metadata: TransactionMetadata {
                provider: Some(destination.provider_kind()),
                environment: Some(self.inner.environment),
                ..Default::default()
            },
            destination,
        };
        let transaction = self
            .reserve_with_retry(&request.merchant_id, new_withdrawal)
            .await?;

        tracing::info!(
            transaction_id = %transaction.id,
            total_in_minor = transaction.total_in_minor,
            "reserved withdrawal funds"
        );
        self.notify(WithdrawalEventKind::Initiated, &account, &transaction)
            .await;

        match self.settle(&account, &transaction).await {
            Ok(SettleOutcome::Completed { provider_reference }) => {
                self.notify(WithdrawalEventKind::Completed, &account, &transaction)
                    .await;
                Ok(WithdrawalReceipt {
                    transaction_id: transaction.id,
                    provider_reference: Some(provider_reference),
                    amount_in_minor: transaction.amount_in_minor,
                    fee_in_minor: transaction.fee_in_minor,
                    total_in_minor: transaction.total_in_minor,
                    status: WithdrawalStatus::Completed,
                })
            }
            Ok(SettleOutcome::PendingReconciliation) => {
                tracing::info!(
                    transaction_id = %transaction.id,
                    "withdrawal outcome unknown, left pending for reconciliation"
                );
                Ok(WithdrawalReceipt {
                    transaction_id: transaction.id,
                    provider_reference: None,
                    amount_in_minor: transaction.amount_in_minor,
                    fee_in_minor: transaction.fee_in_minor,
                    total_in_minor: transaction.total_in_minor,
                    status: WithdrawalStatus::Pending,
                })
            }
            Err(e) => {
                self.notify(WithdrawalEventKind::Failed, &account, &transaction)
                    .await;
                Err(e)
            }
        }
    }

    /// Every `Pending` transaction created at least `min_age` ago.
    pub async fn pending_transactions(
        &self,
        min_age: chrono::Duration,
    ) -> Result<Vec<WithdrawalTransaction>, WithdrawalError> {
        Ok(self.inner.ledger.pending_older_than(min_age).await?)
    }

    /// Re-polls one pending transaction and applies the same terminal transitions as
    /// the post-submission poll. Returns the (possibly unchanged) ledger status.
    pub async fn reconcile_transaction(
        &self,
        transaction: &WithdrawalTransaction,
    ) -> Result<WithdrawalStatus, WithdrawalError> {
        let account = self.inner.ledger.merchant(&transaction.merchant_id).await?;
        let config = self
            .inner
            .resolver
            .active_config(
                transaction.destination.provider_kind(),
                &account.country,
                self.inner.environment,
            )
            .await?;
        let client = self.client_for(&config).await;

        match client
            .disbursements
            .get_by_reference(transaction.id)
            .await?
        {
            Some(transfer) => {
                self.record_status_payload(transaction.id, &transfer).await;
                match transfer.status {
                    TransferStatus::Successful {
                        financial_transaction_id,
                        ..
                    } => {
                        self.inner
                            .ledger
                            .mark_completed(transaction.id, &financial_transaction_id)
                            .await?;
                        self.notify(WithdrawalEventKind::Completed, &account, transaction)
                            .await;
                        Ok(WithdrawalStatus::Completed)
                    }
                    TransferStatus::Failed { reason, .. } => {
                        self.inner
                            .ledger
                            .mark_failed_and_refund(transaction.id, &reason)
                            .await?;
                        self.notify(WithdrawalEventKind::Failed, &account, transaction)
                            .await;
                        Ok(WithdrawalStatus::Failed)
                    }
                    TransferStatus::Pending => Ok(WithdrawalStatus::Pending),
                }
            }
            None => {
                // The provider has no record under this reference. That can be a
                // replication lag artifact, so the transaction stays pending rather
                // than being guessed into a failure.
                tracing::warn!(
                    transaction_id = %transaction.id,
                    "provider has no transfer for pending withdrawal"
                );
                Ok(WithdrawalStatus::Pending)
            }
        }
    }

    async fn reserve_with_retry(
        &self,
        merchant_id: &str,
        new_withdrawal: NewWithdrawal,
    ) -> Result<WithdrawalTransaction, WithdrawalError> {
        match self
            .inner
            .ledger
            .reserve_and_debit(merchant_id, new_withdrawal.clone())
            .await
        {
            Err(LedgerError::ConcurrencyConflict(_)) => {
                // Two withdrawals raced on this account: re-read and retry once
                tracing::debug!("ledger reservation conflicted, retrying once");
                let account = self.inner.ledger.merchant(merchant_id).await?;
                let fee_in_minor = self
                    .inner
                    .fees
                    .fee_for(account.plan, new_withdrawal.amount_in_minor)?;
                Ok(self
                    .inner
                    .ledger
                    .reserve_and_debit(
                        merchant_id,
                        NewWithdrawal {
                            fee_in_minor,
                            ..new_withdrawal
                        },
                    )
                    .await?)
            }
            other => Ok(other?),
        }
    }

    /// Runs the external half of the state machine. Any `Err` return has already
    /// compensated the ledger through `mark_failed_and_refund`.
    async fn settle(
        &self,
        account: &MerchantAccount,
        transaction: &WithdrawalTransaction,
    ) -> Result<SettleOutcome, WithdrawalError> {
        let kind = transaction.destination.provider_kind();

        let config = match self
            .inner
            .resolver
            .active_config(kind, &account.country, self.inner.environment)
            .await
        {
            Ok(config) => config,
            Err(e) => {
                return self
                    .fail(transaction, "provider not configured", e.into())
                    .await;
            }
        };
        let client = self.client_for(&config).await;

        // Acquire a session before submitting anything. The token is cached by the
        // client, so subsequent requests reuse it.
        if let Err(e) = client.auth.get_access_token().await {
            return match e {
                AuthError::InvalidCredentials { status, .. } => {
                    tracing::error!(
                        status,
                        provider = %kind,
                        country = %account.country,
                        environment = %self.inner.environment,
                        "provider rejected the configured credentials, operator attention required"
                    );
                    self.fail(
                        transaction,
                        "provider rejected credentials",
                        WithdrawalError::AuthenticationFailed { status },
                    )
                    .await
                }
                AuthError::ProviderUnavailable { .. } => {
                    self.fail(
                        transaction,
                        "provider auth endpoint unavailable",
                        WithdrawalError::ProviderUnavailable,
                    )
                    .await
                }
            };
        }

        // Sandbox hosts may force a fixed currency
        let currency = config
            .currency_override
            .clone()
            .unwrap_or_else(|| transaction.currency.clone());
        let transfer_request = CreateTransferRequest {
            amount_in_minor: transaction.amount_in_minor,
            currency,
            payee: Payee::from(&transaction.destination),
            payer_message: Some(format!("Withdrawal {}", transaction.id)),
            payee_note: Some("Merchant balance withdrawal".to_string()),
        };

        // The transaction id is the idempotency reference: a crash-and-retry of the
        // orchestrator resubmits the same reference instead of double-paying.
        match client
            .disbursements
            .submit(transaction.id, &transfer_request)
            .await
        {
            Ok(TransferOutcome::Accepted(_)) => {}
            Ok(TransferOutcome::Rejected(TransferRejection::DuplicateReference)) => {
                tracing::info!(
                    transaction_id = %transaction.id,
                    "transfer already submitted under this reference"
                );
            }
            Ok(TransferOutcome::Rejected(rejection)) if rejection.is_retryable() => {
                // The retry middleware already spent its bounded budget
                return self
                    .fail(
                        transaction,
                        "provider unavailable during submission",
                        WithdrawalError::ProviderUnavailable,
                    )
                    .await;
            }
            Ok(TransferOutcome::Rejected(rejection)) => {
                return self
                    .fail(
                        transaction,
                        &format!("transfer rejected: {}", rejection),
                        WithdrawalError::ProviderRejected { rejection },
                    )
                    .await;
            }
            Err(e) => {
                return self
                    .fail(transaction, "transfer submission failed", e.into())
                    .await;
            }
        }

        // Most providers settle asynchronously: wait briefly, then poll once. Anything
        // still unknown afterwards belongs to the reconciler.
        tokio::time::sleep(self.inner.status_poll_delay).await;

        match client
            .disbursements
            .get_by_reference(transaction.id)
            .await
        {
            Ok(Some(transfer)) => {
                self.record_status_payload(transaction.id, &transfer).await;
                match transfer.status {
                    TransferStatus::Successful {
                        financial_transaction_id,
                        ..
                    } => {
                        self.inner
                            .ledger
                            .mark_completed(transaction.id, &financial_transaction_id)
                            .await?;
                        Ok(SettleOutcome::Completed {
                            provider_reference: financial_transaction_id,
                        })
                    }
                    TransferStatus::Failed { reason, .. } => {
                        self.fail(
                            transaction,
                            &reason,
                            WithdrawalError::ProviderRejected {
                                rejection: TransferRejection::Other {
                                    code: Some(reason.clone()),
                                },
                            },
                        )
                        .await
                    }
                    TransferStatus::Pending => Ok(SettleOutcome::PendingReconciliation),
                }
            }
            // The transfer was accepted, so an unreadable status must never trigger a
            // refund: the funds stay debited until reconciliation learns the truth.
            Ok(None) => Ok(SettleOutcome::PendingReconciliation),
            Err(e) => {
                tracing::warn!(
                    transaction_id = %transaction.id,
                    error = %e,
                    "status poll failed, leaving withdrawal pending"
                );
                Ok(SettleOutcome::PendingReconciliation)
            }
        }
    }

    async fn fail(
        &self,
        transaction: &WithdrawalTransaction,
        reason: &str,
        error: WithdrawalError,
    ) -> Result<SettleOutcome, WithdrawalError> {
        self.inner
            .ledger
            .mark_failed_and_refund(transaction.id, reason)
            .await?;
        tracing::info!(
            transaction_id = %transaction.id,
            reason,
            "withdrawal failed and refunded"
        );
        Err(error)
    }

    async fn record_status_payload(
        &self,
        transaction_id: Uuid,
        transfer: &crate::apis::disbursements::Transfer,
    ) {
        // Audit trail only, ignore serialization noise
        if let Ok(payload) = serde_json::to_value(transfer) {
            if let Err(e) = self
                .inner
                .ledger
                .record_status_payload(transaction_id, payload)
                .await
            {
                tracing::warn!(error = %e, "failed to record provider status payload");
            }
        }
    }

    async fn notify(
        &self,
        kind: WithdrawalEventKind,
        account: &MerchantAccount,
        transaction: &WithdrawalTransaction,
    ) {
        let event = WithdrawalEvent {
            kind,
            recipient: account.contact_email.clone(),
            amount_in_minor: transaction.amount_in_minor,
            fee_in_minor: transaction.fee_in_minor,
            reference: transaction.id,
            destination_descriptor: transaction.destination.descriptor(),
        };

        // Best effort: a broken sink must never fail the withdrawal
        if let Err(e) = self.inner.sink.notify(event).await {
            tracing::warn!(error = %e, kind = kind.as_str(), "notification dispatch failed");
        }
    }

    async fn client_for(&self, config: &ProviderConfig) -> ProviderClient {
        let key = (
            config.provider,
            config.country.clone(),
            config.environment,
        );

        let mut clients = self.inner.clients.lock().await;
        clients
            .entry(key)
            .or_insert_with(|| {
                let mut builder = ProviderClient::builder(config.clone())
                    .with_retry_policy(self.inner.retry_policy.clone());
                if let Some(client) = &self.inner.http_client {
                    builder = builder.with_http_client(client.clone());
                }
                builder.build()
            })
            .clone()
    }
}

/// Builder for a [`WithdrawalEngine`].
pub struct WithdrawalEngineBuilder {
    ledger: Arc<dyn LedgerStore>,
    resolver: Arc<dyn ConfigResolver>,
    sink: Arc<dyn NotificationSink>,
    fees: FeeSchedule,
    environment: Environment,
    status_poll_delay: Duration,
    retry_policy: Option<Arc<dyn RetryPolicy + Send + Sync>>,
    http_client: Option<reqwest::Client>,
}

impl Debug for WithdrawalEngineBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WithdrawalEngineBuilder")
            .field("environment", &self.environment)
            .field("status_poll_delay", &self.status_poll_delay)
            .finish_non_exhaustive()
    }
}

impl WithdrawalEngineBuilder {
    fn new(ledger: Arc<dyn LedgerStore>, resolver: Arc<dyn ConfigResolver>) -> Self {
        Self {
            ledger,
            resolver,
            sink: Arc::new(TracingSink),
            fees: FeeSchedule::default(),
            environment: Environment::Production,
            status_poll_delay: Duration::from_secs(5),
            retry_policy: Some(Arc::new(
                ExponentialBackoff::builder().build_with_max_retries(2),
            )),
            http_client: None,
        }
    }

    /// Consumes the builder and builds a new [`WithdrawalEngine`].
    pub fn build(self) -> WithdrawalEngine {
        WithdrawalEngine {
            inner: Arc::new(EngineInner {
                ledger: self.ledger,
                resolver: self.resolver,
                sink: self.sink,
                fees: self.fees,
                environment: self.environment,
                status_poll_delay: self.status_poll_delay,
                retry_policy: self.retry_policy,
                http_client: self.http_client,
                clients: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Sets the fee schedule. Defaults to [`FeeSchedule::default`].
    pub fn with_fee_schedule(mut self, fees: FeeSchedule) -> Self {
        self.fees = fees;
        self
    }

    /// Sets the notification sink. Defaults to the log-only
    /// [`TracingSink`](crate::notifications::TracingSink).
    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Selects which provider environment configurations are resolved against.
    ///
    /// Defaults to [`Environment::Production`].
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Sets the fixed delay between accepting a transfer and the first status poll.
    ///
    /// Defaults to 5 seconds.
    pub fn with_status_poll_delay(mut self, delay: Duration) -> Self {
        self.status_poll_delay = delay;
        self
    }

    /// Sets the [`RetryPolicy`](retry_policies::RetryPolicy) used for transient
    /// provider failures (both token exchanges and idempotent disbursement requests).
    ///
    /// To disable automatic retrying, use `None`.
    pub fn with_retry_policy(
        mut self,
        retry_policy: impl Into<Option<Arc<dyn RetryPolicy + Send + Sync + 'static>>>,
    ) -> Self {
        self.retry_policy = retry_policy.into();
        self
    }

    /// Sets a specific reqwest [`Client`](reqwest::Client) for all provider traffic.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }
}
