//! Module containing the HTTP client for one resolved provider configuration.

use crate::{
    apis::{auth::AuthApi, disbursements::DisbursementsApi, ProviderClientInner},
    authenticator::Authenticator,
    common::{DEFAULT_REQUEST_TIMEOUT, DEFAULT_TOKEN_TIMEOUT},
    config::ProviderConfig,
    middlewares::{
        authentication::AuthenticationMiddleware,
        error_handling::ErrorHandlingMiddleware,
        retry_idempotent::{BoxedRetryPolicy, RetryIdempotentMiddleware},
    },
};
use reqwest_middleware::ClientWithMiddleware;
use reqwest_tracing::TracingMiddleware;
use retry_policies::{policies::ExponentialBackoff, RetryPolicy};
use std::sync::Arc;

/// Client for one payout provider, bound to a single resolved
/// [`ProviderConfig`](crate::config::ProviderConfig).
///
/// Holds the authenticator (and with it the cached access token), so reusing one
/// client per (provider, country, environment) avoids redundant token exchanges.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    /// Authentication API client.
    pub auth: AuthApi,
    /// Disbursements API client.
    pub disbursements: DisbursementsApi,
}

impl ProviderClient {
    /// Builds a new [`ProviderClient`] with the default configuration.
    pub fn new(config: ProviderConfig) -> ProviderClient {
        ProviderClientBuilder::new(config).build()
    }

    /// Returns a new builder to configure a new [`ProviderClient`].
    pub fn builder(config: ProviderConfig) -> ProviderClientBuilder {
        ProviderClientBuilder::new(config)
    }
}

/// Builder for a [`ProviderClient`].
#[derive(Debug)]
pub struct ProviderClientBuilder {
    config: ProviderConfig,
    client: Option<reqwest::Client>,
    retry_policy: Option<BoxedRetryPolicy>,
}

impl ProviderClientBuilder {
    /// Creates a new builder to configure a [`ProviderClient`].
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            client: None,
            retry_policy: Some(BoxedRetryPolicy(Arc::new(
                ExponentialBackoff::builder().build_with_max_retries(2),
            ))),
        }
    }

    /// Consumes the builder and builds a new [`ProviderClient`].
    pub fn build(self) -> ProviderClient {
        // Every external call carries a bounded timeout; the token exchange is a short
        // round trip and gets a tighter one.
        let disbursement_client = self.client.clone().unwrap_or_else(|| {
            reqwest::Client::builder()
                .timeout(DEFAULT_REQUEST_TIMEOUT)
                .build()
                .unwrap()
        });
        let token_client = self.client.unwrap_or_else(|| {
            reqwest::Client::builder()
                .timeout(DEFAULT_TOKEN_TIMEOUT)
                .build()
                .unwrap()
        });

        // Transient token endpoint failures are retried by the authenticator itself
        // with the same bounded policy used for idempotent disbursement requests.
        let auth_retry_policy: Arc<dyn RetryPolicy + Send + Sync> = match &self.retry_policy {
            Some(policy) => policy.0.clone(),
            None => Arc::new(ExponentialBackoff::builder().build_with_max_retries(0)),
        };

        // Build an authenticator
        let authenticator = Authenticator::new(
            build_client_with_middleware(token_client, self.retry_policy.clone(), None),
            self.config.base_url.join("/token").unwrap(),
            self.config.subscription_key.clone(),
            self.config.credentials.clone(),
            auth_retry_policy,
        );

        let auth_middleware = AuthenticationMiddleware {
            authenticator: authenticator.clone(),
        };

        // Build the actual provider client
        let inner = Arc::new(ProviderClientInner {
            client: build_client_with_middleware(
                disbursement_client,
                self.retry_policy,
                Some(auth_middleware),
            ),
            authenticator,
            config: self.config,
        });

        ProviderClient {
            auth: AuthApi::new(inner.clone()),
            disbursements: DisbursementsApi::new(inner),
        }
    }

    /// Sets a specific reqwest [`Client`](reqwest::Client) to use.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Sets a specific [`RetryPolicy`](retry_policies::RetryPolicy) to use when
    /// retrying transient failures.
    ///
    /// To disable automatic retrying of failed requests, use `None`.
    pub fn with_retry_policy(
        mut self,
        retry_policy: impl Into<Option<Arc<dyn RetryPolicy + Send + Sync + 'static>>>,
    ) -> Self {
        self.retry_policy = retry_policy.into().map(BoxedRetryPolicy);
        self
    }
}

fn build_client_with_middleware(
    client: reqwest::Client,
    retry_policy: Option<BoxedRetryPolicy>,
    auth_middleware: Option<AuthenticationMiddleware>,
) -> ClientWithMiddleware {
    let mut builder = reqwest_middleware::ClientBuilder::new(client)
        .with(TracingMiddleware::default())
        .with(ErrorHandlingMiddleware);

    if let Some(retry_policy) = retry_policy {
        builder = builder.with(RetryIdempotentMiddleware::new(retry_policy));
    }

    if let Some(auth_middleware) = auth_middleware {
        builder = builder.with(auth_middleware);
    }

    builder.build()
}
