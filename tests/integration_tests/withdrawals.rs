use crate::common::{
    failed_status, pending_status, successful_status, FailingSink, TestContext, MERCHANT_ID,
};
use payout_engine::{
    apis::disbursements::TransferRejection,
    engine::{WithdrawalError, WithdrawalRequest},
    fees::FeeSchedule,
    ledger::{LedgerStore, PlanTier, WithdrawalStatus},
    notifications::WithdrawalEventKind,
};
use std::sync::Arc;
use wiremock::{
    matchers::{method, path},
    Mock, ResponseTemplate,
};

#[tokio::test]
async fn successful_withdrawal_debits_amount_plus_fee() {
    let ctx = TestContext::start().await;
    ctx.seed_merchant(1000, PlanTier::Starter);
    ctx.mock_token_success().await;
    ctx.mock_submit_accepted().await;
    ctx.mock_transfer_status(successful_status()).await;

    let receipt = ctx.execute(100).await.unwrap();

    // Starter pays 5%: 100 + 5 leaves 895 of 1000
    assert_eq!(receipt.amount_in_minor, 100);
    assert_eq!(receipt.fee_in_minor, 5);
    assert_eq!(receipt.total_in_minor, 105);
    assert_eq!(receipt.status, WithdrawalStatus::Completed);
    assert_eq!(receipt.provider_reference.as_deref(), Some("fin-tx-1"));
    assert_eq!(ctx.balance(), 895);

    let transaction = ctx
        .ledger
        .transaction(receipt.transaction_id)
        .await
        .unwrap();
    assert_eq!(transaction.status, WithdrawalStatus::Completed);
    assert!(transaction.completed_at.is_some());
    assert!(transaction.metadata.last_status_payload.is_some());

    assert_eq!(
        ctx.sink.kinds(),
        vec![
            WithdrawalEventKind::Initiated,
            WithdrawalEventKind::Completed
        ]
    );
    // Notifications only ever see the masked destination
    for event in ctx.sink.events() {
        assert_eq!(event.destination_descriptor, "mobile wallet ****3456");
    }
}

#[tokio::test]
async fn insufficient_funds_never_reaches_the_provider() {
    let ctx = TestContext::start().await;
    ctx.seed_merchant(50, PlanTier::Starter);

    // Any provider traffic at all fails the test
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&ctx.provider)
        .await;

    let err = ctx.execute(100).await.unwrap_err();

    assert!(matches!(
        err,
        WithdrawalError::InsufficientFunds {
            available_in_minor: 50,
            required_in_minor: 105,
        }
    ));
    assert_eq!(ctx.balance(), 50);
    // Rejected before reservation: no transaction exists and nothing was notified
    assert!(ctx
        .ledger
        .pending_older_than(chrono::Duration::zero())
        .await
        .unwrap()
        .is_empty());
    assert!(ctx.sink.kinds().is_empty());
}

#[tokio::test]
async fn missing_destination_is_rejected_before_reservation() {
    let ctx = TestContext::start().await;
    ctx.seed_merchant_without_destination(1000);

    let err = ctx.execute(100).await.unwrap_err();

    assert!(matches!(err, WithdrawalError::DestinationNotConfigured));
    assert_eq!(ctx.balance(), 1000);
    assert!(ctx.sink.kinds().is_empty());
}

#[tokio::test]
async fn unknown_merchant_is_rejected() {
    let ctx = TestContext::start().await;

    let err = ctx
        .engine
        .execute(&WithdrawalRequest {
            merchant_id: "no-such-merchant".into(),
            amount_in_minor: 100,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, WithdrawalError::Ledger(_)));
}

#[tokio::test]
async fn rejected_credentials_refund_in_full() {
    // Business-equivalent override: flat 20% for this scenario
    let ctx = TestContext::start_with_fees(
        FeeSchedule::default().with_rate_bps(PlanTier::Business, 2_000),
    )
    .await;
    ctx.seed_merchant(1000, PlanTier::Business);
    ctx.mock_token_rejection(401).await;

    let err = ctx.execute(100).await.unwrap_err();

    assert!(matches!(
        err,
        WithdrawalError::AuthenticationFailed { status: 401 }
    ));
    // The full 120 (100 + 20 fee) is back on the balance
    assert_eq!(ctx.balance(), 1000);

    let transaction = &ctx
        .ledger
        .pending_older_than(chrono::Duration::zero())
        .await
        .unwrap();
    assert!(transaction.is_empty());
    assert_eq!(
        ctx.sink.kinds(),
        vec![WithdrawalEventKind::Initiated, WithdrawalEventKind::Failed]
    );
}

#[tokio::test]
async fn explicit_rejection_refunds_without_retry() {
    let ctx = TestContext::start().await;
    ctx.seed_merchant(1000, PlanTier::Professional);
    ctx.mock_token_success().await;

    Mock::given(method("POST"))
        .and(path("/disbursements"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "code": "PAYEE_NOT_FOUND",
            "message": "unknown msisdn"
        })))
        .expect(1) // No retry on an explicit rejection
        .mount(&ctx.provider)
        .await;

    let err = ctx.execute(100).await.unwrap_err();

    assert!(matches!(
        err,
        WithdrawalError::ProviderRejected {
            rejection: TransferRejection::InvalidDestination
        }
    ));
    assert_eq!(ctx.balance(), 1000);
}

#[tokio::test]
async fn provider_unavailability_is_retried_then_refunded() {
    let ctx = TestContext::start().await;
    ctx.seed_merchant(1000, PlanTier::Starter);
    ctx.mock_token_success().await;

    Mock::given(method("POST"))
        .and(path("/disbursements"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3) // Initial attempt + 2 bounded retries under the same reference
        .mount(&ctx.provider)
        .await;

    let err = ctx.execute(100).await.unwrap_err();

    assert!(matches!(err, WithdrawalError::ProviderUnavailable));
    assert_eq!(ctx.balance(), 1000);
    assert_eq!(
        ctx.sink.kinds(),
        vec![WithdrawalEventKind::Initiated, WithdrawalEventKind::Failed]
    );
}

#[tokio::test]
async fn duplicate_reference_does_not_double_pay() {
    let ctx = TestContext::start().await;
    ctx.seed_merchant(1000, PlanTier::Starter);
    ctx.mock_token_success().await;

    // The provider already holds a transfer under this reference (e.g. a resubmission
    // after a crash). Submission reports a duplicate and the poll finds it settled.
    ctx.mock_submit_rejection(409, "DUPLICATE_REFERENCE").await;
    ctx.mock_transfer_status(successful_status()).await;

    let receipt = ctx.execute(100).await.unwrap();

    assert_eq!(receipt.status, WithdrawalStatus::Completed);
    // Exactly one debit
    assert_eq!(ctx.balance(), 895);
}

#[tokio::test]
async fn failed_transfer_after_acceptance_refunds() {
    let ctx = TestContext::start().await;
    ctx.seed_merchant(1000, PlanTier::Starter);
    ctx.mock_token_success().await;
    ctx.mock_submit_accepted().await;
    ctx.mock_transfer_status(failed_status("payee_limit_exceeded"))
        .await;

    let err = ctx.execute(100).await.unwrap_err();

    assert!(matches!(err, WithdrawalError::ProviderRejected { .. }));
    assert_eq!(ctx.balance(), 1000);

    let pending = ctx
        .ledger
        .pending_older_than(chrono::Duration::zero())
        .await
        .unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn unknown_outcome_stays_pending_with_funds_debited() {
    let ctx = TestContext::start().await;
    ctx.seed_merchant(1000, PlanTier::Starter);
    ctx.mock_token_success().await;
    ctx.mock_submit_accepted().await;
    ctx.mock_transfer_status(pending_status()).await;

    let receipt = ctx.execute(100).await.unwrap();

    // Never guessed into success or failure: pending, with the debit in place
    assert_eq!(receipt.status, WithdrawalStatus::Pending);
    assert_eq!(receipt.provider_reference, None);
    assert_eq!(ctx.balance(), 895);

    // No terminal notification yet
    assert_eq!(ctx.sink.kinds(), vec![WithdrawalEventKind::Initiated]);
}

#[tokio::test]
async fn missing_provider_config_refunds() {
    let ctx = TestContext::start().await;
    // Config is registered for UG only
    ctx.ledger.insert_account(payout_engine::ledger::MerchantAccount {
        id: MERCHANT_ID.into(),
        balance_in_minor: 1000,
        currency: payout_engine::ledger::Currency::Kes,
        plan: PlanTier::Starter,
        payout_destination: Some(payout_engine::ledger::PayoutDestination::MobileWallet {
            msisdn: "254712345678".into(),
        }),
        country: "KE".into(),
        contact_email: None,
    });

    let err = ctx.execute(100).await.unwrap_err();

    assert!(matches!(err, WithdrawalError::NotConfigured(_)));
    assert_eq!(ctx.balance(), 1000);
    assert_eq!(
        ctx.sink.kinds(),
        vec![WithdrawalEventKind::Initiated, WithdrawalEventKind::Failed]
    );
}

#[tokio::test]
async fn access_token_is_reused_across_withdrawals() {
    let ctx = TestContext::start().await;
    ctx.seed_merchant(1000, PlanTier::Starter);
    ctx.mock_submit_accepted().await;
    ctx.mock_transfer_status(successful_status()).await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token_type": "Bearer",
            "access_token": "mock-access-token",
            "expires_in": 3600
        })))
        .expect(1) // One exchange serves both withdrawals
        .mount(&ctx.provider)
        .await;

    ctx.execute(100).await.unwrap();
    ctx.execute(200).await.unwrap();

    assert_eq!(ctx.balance(), 1000 - 105 - 210);
}

#[tokio::test]
async fn notification_failures_never_fail_the_withdrawal() {
    let ctx = TestContext::start().await;
    // Rebuild the engine with a failing sink over the same ledger and provider
    let engine = {
        use payout_engine::config::{Environment, StaticConfigResolver};

        let resolver = StaticConfigResolver::new().with_config(crate::common::provider_config(
            &ctx.provider,
            payout_engine::config::ProviderKind::MobileMoney,
        ));
        payout_engine::WithdrawalEngine::builder(ctx.ledger.clone(), Arc::new(resolver))
            .with_environment(Environment::Sandbox)
            .with_notification_sink(Arc::new(FailingSink))
            .with_status_poll_delay(std::time::Duration::from_millis(10))
            .build()
    };
    ctx.seed_merchant(1000, PlanTier::Starter);
    ctx.mock_token_success().await;
    ctx.mock_submit_accepted().await;
    ctx.mock_transfer_status(successful_status()).await;

    let receipt = engine
        .execute(&WithdrawalRequest {
            merchant_id: MERCHANT_ID.into(),
            amount_in_minor: 100,
        })
        .await
        .unwrap();

    assert_eq!(receipt.status, WithdrawalStatus::Completed);
    assert_eq!(ctx.balance(), 895);
}
