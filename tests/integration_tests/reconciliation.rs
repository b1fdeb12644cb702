use crate::common::{failed_status, pending_status, successful_status, TestContext};
use payout_engine::{
    ledger::{LedgerStore, PlanTier, WithdrawalStatus},
    notifications::WithdrawalEventKind,
    reconciliation::Reconciler,
};

/// Runs a withdrawal whose first status poll comes back `pending`, leaving the
/// transaction debited and awaiting reconciliation.
async fn pending_withdrawal(ctx: &TestContext) -> uuid::Uuid {
    ctx.seed_merchant(1000, PlanTier::Starter);
    ctx.mock_token_success().await;
    ctx.mock_submit_accepted().await;
    ctx.mock_transfer_status(pending_status()).await;

    let receipt = ctx.execute(100).await.unwrap();
    assert_eq!(receipt.status, WithdrawalStatus::Pending);
    assert_eq!(ctx.balance(), 895);

    receipt.transaction_id
}

#[tokio::test]
async fn pending_withdrawal_reconciles_to_completed() {
    let ctx = TestContext::start().await;
    let transaction_id = pending_withdrawal(&ctx).await;

    // The provider settles the transfer some time later
    ctx.provider.reset().await;
    ctx.mock_transfer_status(successful_status()).await;

    let report = Reconciler::new(ctx.engine.clone())
        .with_min_age(chrono::Duration::zero())
        .run_once()
        .await
        .unwrap();

    assert_eq!(report.examined, 1);
    assert_eq!(report.completed, 1);

    // Completion applies no further balance change: the debit was already in place
    assert_eq!(ctx.balance(), 895);
    let transaction = ctx.ledger.transaction(transaction_id).await.unwrap();
    assert_eq!(transaction.status, WithdrawalStatus::Completed);
    assert_eq!(transaction.provider_reference.as_deref(), Some("fin-tx-1"));

    assert_eq!(
        ctx.sink.kinds(),
        vec![
            WithdrawalEventKind::Initiated,
            WithdrawalEventKind::Completed
        ]
    );
}

#[tokio::test]
async fn pending_withdrawal_reconciles_to_failed_with_refund() {
    let ctx = TestContext::start().await;
    let transaction_id = pending_withdrawal(&ctx).await;

    ctx.provider.reset().await;
    ctx.mock_transfer_status(failed_status("payee_limit_exceeded"))
        .await;

    let report = Reconciler::new(ctx.engine.clone())
        .with_min_age(chrono::Duration::zero())
        .run_once()
        .await
        .unwrap();

    assert_eq!(report.examined, 1);
    assert_eq!(report.failed, 1);

    // The compensating refund restores the full amount plus fee
    assert_eq!(ctx.balance(), 1000);
    let transaction = ctx.ledger.transaction(transaction_id).await.unwrap();
    assert_eq!(transaction.status, WithdrawalStatus::Failed);
    assert_eq!(
        transaction.metadata.failure_reason.as_deref(),
        Some("payee_limit_exceeded")
    );

    assert_eq!(
        ctx.sink.kinds(),
        vec![WithdrawalEventKind::Initiated, WithdrawalEventKind::Failed]
    );
}

#[tokio::test]
async fn still_pending_transfers_are_left_alone() {
    let ctx = TestContext::start().await;
    let transaction_id = pending_withdrawal(&ctx).await;

    let report = Reconciler::new(ctx.engine.clone())
        .with_min_age(chrono::Duration::zero())
        .run_once()
        .await
        .unwrap();

    assert_eq!(report.examined, 1);
    assert_eq!(report.still_pending, 1);

    // Not guessed into a terminal state: funds stay debited
    assert_eq!(ctx.balance(), 895);
    let transaction = ctx.ledger.transaction(transaction_id).await.unwrap();
    assert_eq!(transaction.status, WithdrawalStatus::Pending);
}

#[tokio::test]
async fn fresh_transactions_are_not_reconciled_yet() {
    let ctx = TestContext::start().await;
    pending_withdrawal(&ctx).await;

    // The just-created transaction is younger than the one-hour minimum age
    let report = Reconciler::new(ctx.engine.clone())
        .with_min_age(chrono::Duration::hours(1))
        .run_once()
        .await
        .unwrap();

    assert_eq!(report.examined, 0);
    assert_eq!(ctx.balance(), 895);
}

#[tokio::test]
async fn poll_errors_keep_the_transaction_pending() {
    let ctx = TestContext::start().await;
    let transaction_id = pending_withdrawal(&ctx).await;

    // The provider starts erroring on status queries
    ctx.provider.reset().await;

    let report = Reconciler::new(ctx.engine.clone())
        .with_min_age(chrono::Duration::zero())
        .run_once()
        .await
        .unwrap();

    assert_eq!(report.examined, 1);
    assert_eq!(report.errored + report.still_pending, 1);

    // No refund without an explicit provider failure
    assert_eq!(ctx.balance(), 895);
    let transaction = ctx.ledger.transaction(transaction_id).await.unwrap();
    assert_eq!(transaction.status, WithdrawalStatus::Pending);
}
