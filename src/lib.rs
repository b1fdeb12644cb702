//! Withdrawal settlement engine: moves funds from a merchant's internal balance to an
//! external payout rail (mobile-money or bank transfer) through a third-party payment
//! provider, and keeps the internal ledger and the provider's view of each transfer
//! consistent across network failures, partial failures and provider timeouts.
//!
//! # Usage
//!
//! ## Build a `WithdrawalEngine`
//!
//! The engine is constructed from its collaborators: a [`LedgerStore`](crate::ledger::LedgerStore)
//! owning balances and transactions, and a [`ConfigResolver`](crate::config::ConfigResolver)
//! supplying active provider configurations.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use payout_engine::{WithdrawalEngine, config::{Environment, StaticConfigResolver}, ledger::InMemoryLedger};
//! let ledger = Arc::new(InMemoryLedger::new());
//! let resolver = Arc::new(StaticConfigResolver::new());
//!
//! let engine = WithdrawalEngine::builder(ledger, resolver)
//!     .with_environment(Environment::Sandbox)
//!     .build();
//! ```
//!
//! ## Execute a withdrawal
//!
//! ```rust,no_run
//! # use payout_engine::engine::{WithdrawalEngine, WithdrawalError, WithdrawalRequest};
//! #
//! # #[tokio::main]
//! # async fn main() -> Result<(), WithdrawalError> {
//! # let engine: WithdrawalEngine = unreachable!();
//! #
//! let receipt = engine
//!     .execute(&WithdrawalRequest {
//!         merchant_id: "some-merchant-id".to_string(),
//!         amount_in_minor: 10_000,
//!     })
//!     .await?;
//!
//! println!(
//!     "Withdrawal {}: {} debited ({} fee), status {:?}",
//!     receipt.transaction_id, receipt.total_in_minor, receipt.fee_in_minor, receipt.status
//! );
//! # Ok(())
//! # }
//! ```
//!
//! Funds are always reserved in the ledger before the provider is contacted. A
//! withdrawal that fails after reservation is refunded through an idempotent
//! compensating transition; a withdrawal whose provider outcome is not yet known stays
//! `Pending` with its funds debited and is settled later by the
//! [`Reconciler`](crate::reconciliation::Reconciler):
//!
//! ```rust,no_run
//! # use payout_engine::{engine::WithdrawalEngine, reconciliation::Reconciler};
//! # use std::time::Duration;
//! # let engine: WithdrawalEngine = unreachable!();
//! let reconciler = Reconciler::new(engine);
//! tokio::spawn(async move { reconciler.run(Duration::from_secs(60)).await });
//! ```
//!
//! ## Talk to a provider directly
//!
//! [`ProviderClient`](crate::client::ProviderClient) is the lower-level client bound to
//! one resolved provider configuration. It handles the credential exchange, token
//! caching and transient retries; submissions are idempotent under a caller-supplied
//! reference.
//!
//! ```rust,no_run
//! # use payout_engine::{ProviderClient, Error, apis::disbursements::*, ledger::Currency};
//! # use uuid::Uuid;
//! #
//! # #[tokio::main]
//! # async fn main() -> Result<(), Error> {
//! # let client: ProviderClient = unreachable!();
//! #
//! let transfer_request = CreateTransferRequestBuilder::default()
//!     .amount_in_minor(10_000u64)
//!     .currency(Currency::Ugx)
//!     .payee(Payee {
//!         party_id_type: PartyIdType::Msisdn,
//!         party_id: "256772123456".to_string(),
//!     })
//!     .build()
//!     .unwrap();
//!
//! let outcome = client
//!     .disbursements
//!     .submit(Uuid::new_v4(), &transfer_request)
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_debug_implementations)]
#![forbid(unsafe_code)]

pub mod apis;
pub(crate) mod authenticator;
pub mod client;
mod common;
pub mod config;
pub mod engine;
pub mod error;
pub mod fees;
pub mod ledger;
mod middlewares;
pub mod notifications;
pub mod pollable;
pub mod reconciliation;

pub use client::ProviderClient;
pub use engine::WithdrawalEngine;
pub use error::Error;
pub use pollable::{Pollable, PollableUntilTerminalState};
