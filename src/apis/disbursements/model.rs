use crate::{
    error::ApiError,
    ledger::{Currency, PayoutDestination},
    pollable::IsInTerminalState,
    Error, Pollable, ProviderClient,
};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Body of a transfer submission.
///
/// The idempotency reference travels in the `Idempotency-Key` header, not in the body:
/// it is supplied by the caller once per withdrawal attempt and reused on every retry
/// of that attempt.
#[derive(Serialize, Deserialize, Debug, Clone, Builder)]
pub struct CreateTransferRequest {
    pub amount_in_minor: u64,
    pub currency: Currency,
    pub payee: Payee,
    #[builder(default)]
    pub payer_message: Option<String>,
    #[builder(default)]
    pub payee_note: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct Payee {
    pub party_id_type: PartyIdType,
    pub party_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PartyIdType {
    Msisdn,
    BankAccount,
}

impl From<&PayoutDestination> for Payee {
    fn from(destination: &PayoutDestination) -> Self {
        match destination {
            PayoutDestination::MobileWallet { msisdn } => Payee {
                party_id_type: PartyIdType::Msisdn,
                party_id: msisdn.clone(),
            },
            PayoutDestination::BankAccount { account_number, .. } => Payee {
                party_id_type: PartyIdType::BankAccount,
                party_id: account_number.clone(),
            },
        }
    }
}

/// Outcome of a transfer submission, classified for the orchestrator.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TransferOutcome {
    Accepted(TransferAccepted),
    Rejected(TransferRejection),
}

/// The provider accepted the transfer for (asynchronous) processing.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TransferAccepted {
    pub reference: Uuid,
}

/// Why the provider refused a transfer submission.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TransferRejection {
    InvalidAmountOrCurrency,
    InvalidDestination,
    /// The provider already holds a transfer under this reference. Not a new failure:
    /// the transfer is in flight and its status can be polled.
    DuplicateReference,
    /// The provider could not process the submission right now.
    ProviderUnavailable,
    Other { code: Option<String> },
}

impl TransferRejection {
    /// Returns `true` if resubmitting with the same reference may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferRejection::ProviderUnavailable)
    }
}

impl Display for TransferRejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferRejection::InvalidAmountOrCurrency => write!(f, "invalid amount or currency"),
            TransferRejection::InvalidDestination => write!(f, "invalid payout destination"),
            TransferRejection::DuplicateReference => write!(f, "duplicate reference"),
            TransferRejection::ProviderUnavailable => write!(f, "provider unavailable"),
            TransferRejection::Other { code: Some(code) } => write!(f, "rejected: {}", code),
            TransferRejection::Other { code: None } => write!(f, "rejected"),
        }
    }
}

/// Maps a provider error response to a [`TransferRejection`].
pub(crate) fn classify_rejection(api_error: &ApiError) -> TransferRejection {
    if api_error.status == 409 {
        return TransferRejection::DuplicateReference;
    }
    if api_error.is_transient() {
        return TransferRejection::ProviderUnavailable;
    }

    match api_error.code.as_deref() {
        Some("DUPLICATE_REFERENCE") => TransferRejection::DuplicateReference,
        Some("INVALID_AMOUNT") | Some("INVALID_CURRENCY") => {
            TransferRejection::InvalidAmountOrCurrency
        }
        Some("PAYEE_NOT_FOUND") | Some("INVALID_PAYEE") => TransferRejection::InvalidDestination,
        code => TransferRejection::Other {
            code: code.map(str::to_owned),
        },
    }
}

/// A transfer as seen by the provider.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Transfer {
    pub reference: Uuid,
    pub amount_in_minor: u64,
    pub currency: Currency,
    pub payee: Payee,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub status: TransferStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferStatus {
    /// Not an error: most providers process disbursements asynchronously, and a
    /// transfer may stay pending for a while.
    Pending,
    Successful {
        financial_transaction_id: String,
        executed_at: DateTime<Utc>,
    },
    Failed {
        reason: String,
        failed_at: DateTime<Utc>,
    },
}

#[async_trait]
impl Pollable for TransferAccepted {
    type Output = Transfer;

    async fn poll_once(&self, client: &ProviderClient) -> Result<Self::Output, Error> {
        client
            .disbursements
            .get_by_reference(self.reference)
            .await
            .transpose()
            .unwrap_or_else(|| {
                Err(Error::Other(anyhow!(
                    "Transfer returned 404 while polling"
                )))
            })
    }
}

#[async_trait]
impl Pollable for Transfer {
    type Output = Transfer;

    async fn poll_once(&self, client: &ProviderClient) -> Result<Self::Output, Error> {
        client
            .disbursements
            .get_by_reference(self.reference)
            .await
            .transpose()
            .unwrap_or_else(|| {
                Err(Error::Other(anyhow!(
                    "Transfer returned 404 while polling"
                )))
            })
    }
}

impl IsInTerminalState for Transfer {
    /// A transfer is in a terminal state if it is `Successful` or `Failed`.
    fn is_in_terminal_state(&self) -> bool {
        matches!(
            self.status,
            TransferStatus::Successful { .. } | TransferStatus::Failed { .. }
        )
    }
}
