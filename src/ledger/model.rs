use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

use crate::config::{Environment, ProviderKind};

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Eur,
    Ghs,
    Kes,
    Ugx,
    Zmw,
}

impl Display for Currency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Currency::Eur => write!(f, "EUR"),
            Currency::Ghs => write!(f, "GHS"),
            Currency::Kes => write!(f, "KES"),
            Currency::Ugx => write!(f, "UGX"),
            Currency::Zmw => write!(f, "ZMW"),
        }
    }
}

/// Subscription plan of a merchant. Drives the withdrawal fee rate.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Starter,
    Professional,
    Business,
}

impl Display for PlanTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanTier::Starter => write!(f, "starter"),
            PlanTier::Professional => write!(f, "professional"),
            PlanTier::Business => write!(f, "business"),
        }
    }
}

/// Where a merchant's withdrawals are paid out to.
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PayoutDestination {
    MobileWallet {
        msisdn: String,
    },
    BankAccount {
        account_number: String,
        bank_code: String,
    },
}

impl PayoutDestination {
    /// The raw identifier funds are sent to.
    pub fn identifier(&self) -> &str {
        match self {
            PayoutDestination::MobileWallet { msisdn } => msisdn,
            PayoutDestination::BankAccount { account_number, .. } => account_number,
        }
    }

    /// The payout rail this destination belongs to.
    pub fn provider_kind(&self) -> ProviderKind {
        match self {
            PayoutDestination::MobileWallet { .. } => ProviderKind::MobileMoney,
            PayoutDestination::BankAccount { .. } => ProviderKind::BankTransfer,
        }
    }

    /// A masked, human-readable description safe for notifications and logs.
    pub fn descriptor(&self) -> String {
        match self {
            PayoutDestination::MobileWallet { msisdn } => {
                format!("mobile wallet {}", mask(msisdn))
            }
            PayoutDestination::BankAccount {
                account_number,
                bank_code,
            } => format!("bank account {} ({})", mask(account_number), bank_code),
        }
    }
}

fn mask(identifier: &str) -> String {
    let visible: String = identifier
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{}", visible)
}

/// A merchant's internal balance and payout configuration.
///
/// Created at onboarding, outside this crate. The balance is only ever mutated through
/// the [`LedgerStore`](crate::ledger::LedgerStore) atomic operations and never goes
/// negative.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MerchantAccount {
    pub id: String,
    pub balance_in_minor: u64,
    pub currency: Currency,
    pub plan: PlanTier,
    pub payout_destination: Option<PayoutDestination>,
    /// ISO 3166-1 alpha-2 country code, selects the provider configuration.
    pub country: String,
    pub contact_email: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Completed,
    Failed,
}

/// Structured audit trail attached to a withdrawal transaction.
///
/// Must never contain credentials or tokens.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TransactionMetadata {
    pub provider: Option<ProviderKind>,
    pub environment: Option<Environment>,
    pub failure_reason: Option<String>,
    /// Raw provider status payload from the most recent poll, kept for audit.
    pub last_status_payload: Option<serde_json::Value>,
}

/// Durable record of one withdrawal attempt.
///
/// Created the instant funds are reserved, before any external call: a committed
/// `Pending` row is the single source of truth for "funds left the account".
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WithdrawalTransaction {
    /// Also serves as the idempotency reference sent to the provider. Generated once
    /// per withdrawal attempt, reused for every retry of that attempt.
    pub id: Uuid,
    pub merchant_id: String,
    pub amount_in_minor: u64,
    pub fee_in_minor: u64,
    /// `amount + fee`, immutable once the transaction is created.
    pub total_in_minor: u64,
    pub currency: Currency,
    pub status: WithdrawalStatus,
    /// The provider's own identifier for the executed transfer, once known.
    pub provider_reference: Option<String>,
    /// Snapshot of the destination at the time of the withdrawal.
    pub destination: PayoutDestination,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: TransactionMetadata,
}
