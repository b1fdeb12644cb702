//! Background reconciliation of withdrawals whose provider outcome was unknown at
//! execution time.
//!
//! A withdrawal left `Pending` keeps its funds debited until the provider reports a
//! terminal status. The reconciler re-polls every such transaction older than a
//! configured age and applies the same terminal transitions as the orchestrator,
//! which bounds the window of ledger/provider inconsistency instead of leaving it
//! open forever.

use crate::{
    engine::{WithdrawalEngine, WithdrawalError},
    ledger::WithdrawalStatus,
};
use std::time::Duration;

/// Summary of one reconciliation sweep.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ReconciliationReport {
    pub examined: usize,
    pub completed: usize,
    pub failed: usize,
    pub still_pending: usize,
    /// Transactions whose poll errored this sweep; they stay pending and are picked
    /// up again next time.
    pub errored: usize,
}

/// Low-frequency polling job settling `Pending` withdrawals.
#[derive(Debug, Clone)]
pub struct Reconciler {
    engine: WithdrawalEngine,
    min_age: chrono::Duration,
}

impl Reconciler {
    pub fn new(engine: WithdrawalEngine) -> Self {
        Self {
            engine,
            min_age: chrono::Duration::minutes(5),
        }
    }

    /// Only transactions created at least this long ago are re-polled, leaving
    /// freshly submitted transfers time to settle on their own.
    ///
    /// Defaults to 5 minutes.
    pub fn with_min_age(mut self, min_age: chrono::Duration) -> Self {
        self.min_age = min_age;
        self
    }

    /// Performs one sweep over all pending withdrawals old enough to reconcile.
    #[tracing::instrument(name = "Reconcile Pending Withdrawals", skip(self))]
    pub async fn run_once(&self) -> Result<ReconciliationReport, WithdrawalError> {
        let pending = self.engine.pending_transactions(self.min_age).await?;

        let mut report = ReconciliationReport {
            examined: pending.len(),
            ..Default::default()
        };

        for transaction in pending {
            match self.engine.reconcile_transaction(&transaction).await {
                Ok(WithdrawalStatus::Completed) => report.completed += 1,
                Ok(WithdrawalStatus::Failed) => report.failed += 1,
                Ok(WithdrawalStatus::Pending) => report.still_pending += 1,
                Err(e) => {
                    // The transaction stays pending; the next sweep retries it
                    tracing::warn!(
                        transaction_id = %transaction.id,
                        error = %e,
                        "reconciliation poll failed"
                    );
                    report.errored += 1;
                }
            }
        }

        tracing::info!(
            examined = report.examined,
            completed = report.completed,
            failed = report.failed,
            still_pending = report.still_pending,
            errored = report.errored,
            "reconciliation sweep finished"
        );

        Ok(report)
    }

    /// Runs reconciliation sweeps forever at the given interval. Intended to be
    /// spawned as a background task.
    pub async fn run(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        // Sweeps that overrun the interval just start late
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                tracing::error!(error = %e, "reconciliation sweep failed");
            }
        }
    }
}
