use async_trait::async_trait;
use payout_engine::{
    apis::auth::Credentials,
    config::{Environment, ProviderConfig, ProviderKind, StaticConfigResolver},
    engine::{WithdrawalEngine, WithdrawalError, WithdrawalReceipt, WithdrawalRequest},
    fees::FeeSchedule,
    ledger::{Currency, InMemoryLedger, MerchantAccount, PayoutDestination, PlanTier},
    notifications::{NotificationSink, WithdrawalEvent, WithdrawalEventKind},
};
use retry_policies::{policies::ExponentialBackoff, RetryPolicy};
use serde_json::json;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use wiremock::{
    matchers::{method, path, path_regex},
    Mock, MockServer, Request, ResponseTemplate,
};

pub static MERCHANT_ID: &str = "merchant-1";
pub static MOCK_ACCESS_TOKEN: &str = "mock-access-token";
pub static MOCK_MSISDN: &str = "256772123456";

/// Notification sink recording every event it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<WithdrawalEvent>>,
}

impl RecordingSink {
    pub fn kinds(&self) -> Vec<WithdrawalEventKind> {
        self.events.lock().unwrap().iter().map(|e| e.kind).collect()
    }

    pub fn events(&self) -> Vec<WithdrawalEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, event: WithdrawalEvent) -> Result<(), anyhow::Error> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Notification sink that always errors, to prove sink failures stay contained.
#[derive(Debug, Default)]
pub struct FailingSink;

#[async_trait]
impl NotificationSink for FailingSink {
    async fn notify(&self, _event: WithdrawalEvent) -> Result<(), anyhow::Error> {
        Err(anyhow::anyhow!("smtp relay down"))
    }
}

/// Shared state for one integration test: an engine wired to an in-memory ledger and
/// a wiremock payout provider.
pub struct TestContext {
    pub engine: WithdrawalEngine,
    pub ledger: Arc<InMemoryLedger>,
    pub provider: MockServer,
    pub sink: Arc<RecordingSink>,
}

impl TestContext {
    pub async fn start() -> Self {
        Self::start_with_fees(FeeSchedule::default()).await
    }

    pub async fn start_with_fees(fees: FeeSchedule) -> Self {
        let provider = MockServer::start().await;
        let ledger = Arc::new(InMemoryLedger::new());
        let sink = Arc::new(RecordingSink::default());

        let resolver = StaticConfigResolver::new()
            .with_config(provider_config(&provider, ProviderKind::MobileMoney))
            .with_config(provider_config(&provider, ProviderKind::BankTransfer));

        let retry_policy: Arc<dyn RetryPolicy + Send + Sync> = Arc::new(
            ExponentialBackoff::builder()
                .retry_bounds(Duration::from_millis(10), Duration::from_millis(50))
                .build_with_max_retries(2),
        );

        let engine = WithdrawalEngine::builder(ledger.clone(), Arc::new(resolver))
            .with_environment(Environment::Sandbox)
            .with_fee_schedule(fees)
            .with_notification_sink(sink.clone())
            .with_status_poll_delay(Duration::from_millis(10))
            .with_retry_policy(retry_policy)
            .build();

        Self {
            engine,
            ledger,
            provider,
            sink,
        }
    }

    pub fn seed_merchant(&self, balance_in_minor: u64, plan: PlanTier) {
        self.ledger.insert_account(MerchantAccount {
            id: MERCHANT_ID.into(),
            balance_in_minor,
            currency: Currency::Ugx,
            plan,
            payout_destination: Some(PayoutDestination::MobileWallet {
                msisdn: MOCK_MSISDN.into(),
            }),
            country: "UG".into(),
            contact_email: Some("owner@example.com".into()),
        });
    }

    pub fn seed_merchant_without_destination(&self, balance_in_minor: u64) {
        self.ledger.insert_account(MerchantAccount {
            id: MERCHANT_ID.into(),
            balance_in_minor,
            currency: Currency::Ugx,
            plan: PlanTier::Starter,
            payout_destination: None,
            country: "UG".into(),
            contact_email: None,
        });
    }

    pub async fn execute(&self, amount_in_minor: u64) -> Result<WithdrawalReceipt, WithdrawalError> {
        self.engine
            .execute(&WithdrawalRequest {
                merchant_id: MERCHANT_ID.into(),
                amount_in_minor,
            })
            .await
    }

    pub fn balance(&self) -> u64 {
        self.ledger.balance_of(MERCHANT_ID).unwrap()
    }

    pub async fn mock_token_success(&self) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "Bearer",
                "access_token": MOCK_ACCESS_TOKEN,
                "expires_in": 3600
            })))
            .mount(&self.provider)
            .await;
    }

    pub async fn mock_token_rejection(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "code": "INVALID_CREDENTIALS",
                "message": "login failed"
            })))
            .mount(&self.provider)
            .await;
    }

    pub async fn mock_submit_accepted(&self) {
        Mock::given(method("POST"))
            .and(path("/disbursements"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&self.provider)
            .await;
    }

    pub async fn mock_submit_rejection(&self, status: u16, code: &str) {
        Mock::given(method("POST"))
            .and(path("/disbursements"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "code": code,
                "message": "rejected"
            })))
            .mount(&self.provider)
            .await;
    }

    /// Mounts a `GET /disbursements/{reference}` mock answering with the given status
    /// fields, echoing back whatever reference is queried.
    pub async fn mock_transfer_status(&self, status_fields: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path_regex(r"^/disbursements/[0-9a-f-]+$"))
            .respond_with(transfer_status_responder(status_fields))
            .mount(&self.provider)
            .await;
    }
}

pub fn provider_config(provider: &MockServer, kind: ProviderKind) -> ProviderConfig {
    ProviderConfig {
        provider: kind,
        country: "UG".into(),
        environment: Environment::Sandbox,
        base_url: reqwest::Url::parse(&provider.uri()).unwrap(),
        target_environment: "sandbox".into(),
        subscription_key: "mock-subscription-key".into(),
        credentials: Credentials::new("mock-api-user", "mock-api-key"),
        // The provider sandbox settles everything in EUR
        currency_override: Some(Currency::Eur),
    }
}

/// Builds a responder for transfer status queries, merging `status_fields` into a
/// transfer body whose reference echoes the request path.
pub fn transfer_status_responder(
    status_fields: serde_json::Value,
) -> impl Fn(&Request) -> ResponseTemplate + Send + Sync {
    move |request: &Request| {
        let reference = request
            .url
            .path_segments()
            .and_then(|segments| segments.last())
            .unwrap_or_default()
            .to_string();

        let mut body = json!({
            "reference": reference,
            "amount_in_minor": 100,
            "currency": "EUR",
            "payee": { "party_id_type": "msisdn", "party_id": MOCK_MSISDN },
            "created_at": "2024-03-01T10:00:00Z"
        });
        if let (Some(body_map), Some(extra)) = (body.as_object_mut(), status_fields.as_object()) {
            for (k, v) in extra {
                body_map.insert(k.clone(), v.clone());
            }
        }

        ResponseTemplate::new(200).set_body_json(body)
    }
}

pub fn successful_status() -> serde_json::Value {
    json!({
        "status": "successful",
        "financial_transaction_id": "fin-tx-1",
        "executed_at": "2024-03-01T10:00:05Z"
    })
}

pub fn failed_status(reason: &str) -> serde_json::Value {
    json!({
        "status": "failed",
        "reason": reason,
        "failed_at": "2024-03-01T10:00:05Z"
    })
}

pub fn pending_status() -> serde_json::Value {
    json!({ "status": "pending" })
}
