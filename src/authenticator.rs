use crate::{
    apis::auth::{AccessToken, AuthError, Credentials, Token},
    common::SUBSCRIPTION_KEY_HEADER,
    error::Error,
};
use chrono::{DateTime, Duration, Utc};
use reqwest::Url;
use reqwest_middleware::ClientWithMiddleware;
use retry_policies::{RetryDecision, RetryPolicy};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Manager for provider credentials and access tokens.
///
/// A token is either obtained whole or not obtained at all; there is no partial state
/// to compensate on failure.
#[derive(Debug, Clone)]
pub struct Authenticator {
    tx: mpsc::UnboundedSender<oneshot::Sender<Result<AccessToken, AuthError>>>,
}

impl Authenticator {
    /// Starts a new authenticator with the given credentials.
    ///
    /// Transient failures of the token endpoint are retried according to
    /// `retry_policy`; credential rejections are never retried.
    pub fn new(
        client: ClientWithMiddleware,
        token_url: Url,
        subscription_key: Token,
        credentials: Credentials,
        retry_policy: Arc<dyn RetryPolicy + Send + Sync>,
    ) -> Self {
        let state = AuthenticatorState {
            client,
            token_url,
            subscription_key,
            credentials,
            retry_policy,
            access_token: None,
        };

        // Long running task processing token requests until the authenticator is dropped
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            process_loop(state, rx).await;
        });

        Self { tx }
    }

    /// Returns the current access token, requesting a new one from the provider if none
    /// is cached or the cached one is close to expiry.
    ///
    /// Concurrent calls are batched into one single request to the provider.
    pub async fn get_access_token(&self) -> Result<AccessToken, AuthError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(tx).unwrap();

        rx.await.unwrap()
    }
}

/// Internal state of the authenticator.
struct AuthenticatorState {
    client: ClientWithMiddleware,
    token_url: Url,
    subscription_key: Token,
    credentials: Credentials,
    retry_policy: Arc<dyn RetryPolicy + Send + Sync>,
    access_token: Option<AccessToken>,
}

async fn process_loop(
    mut state: AuthenticatorState,
    mut rx: mpsc::UnboundedReceiver<oneshot::Sender<Result<AccessToken, AuthError>>>,
) {
    while let Some(reply) = rx.recv().await {
        if reply
            .send(process_get_access_token(&mut state).await)
            .is_err()
        {
            tracing::warn!("Receiver dropped before the reply");
        }
    }
}

#[tracing::instrument(name = "Get Access Token", level = "debug", skip(state))]
async fn process_get_access_token(
    state: &mut AuthenticatorState,
) -> Result<AccessToken, AuthError> {
    // If we hold a token that is still comfortably valid, reuse it
    if let Some(token) = &state.access_token {
        if !should_refresh_token(token) {
            tracing::debug!("Reusing existing access token");
            return Ok(token.clone());
        }
    }

    // Exchange credentials, retrying transient failures with bounded backoff
    let mut n_past_retries = 0;
    let token = loop {
        match exchange_credentials(state).await {
            Ok(token) => break token,
            Err(e) if e.is_transient() => match state.retry_policy.should_retry(n_past_retries) {
                RetryDecision::Retry { execute_after } => {
                    let wait = (execute_after - Utc::now()).to_std().unwrap_or_default();
                    tracing::debug!(
                        "Token endpoint failed transiently, retrying in {:.2}s",
                        wait.as_secs_f64()
                    );
                    tokio::time::sleep(wait).await;
                    n_past_retries += 1;
                }
                RetryDecision::DoNotRetry => {
                    return Err(AuthError::ProviderUnavailable {
                        source: Box::new(e),
                    })
                }
            },
            Err(Error::ApiError(api_error)) if api_error.status < 500 => {
                // A 4xx here means the wrong credential set for this product or
                // environment. Only an operator can fix that.
                return Err(AuthError::InvalidCredentials {
                    status: api_error.status,
                    detail: api_error.code.clone(),
                });
            }
            Err(e) => {
                return Err(AuthError::ProviderUnavailable {
                    source: Box::new(e),
                })
            }
        }
    };

    tracing::info!("Got new access token");
    state.access_token = Some(token.clone());

    Ok(token)
}

async fn exchange_credentials(state: &AuthenticatorState) -> Result<AccessToken, Error> {
    let response = state
        .client
        .post(state.token_url.clone())
        .header(
            SUBSCRIPTION_KEY_HEADER,
            state.subscription_key.expose_secret(),
        )
        .json(&state.credentials)
        .send()
        .await?;

    // Classify non-success responses even when no error-handling middleware is
    // installed on the underlying client.
    let status = response.status();
    if !status.is_success() {
        let bytes = response.bytes().await?;
        return Err(Error::ApiError(
            crate::middlewares::error_handling::api_error_from_body(status, &bytes),
        ));
    }

    let res: RawTokenResponse = response.json().await?;

    if res.token_type != "Bearer" {
        return Err(Error::Other(anyhow::anyhow!(
            "Unsupported access token type: {}",
            res.token_type,
        )));
    }

    Ok(AccessToken {
        token: res.access_token.into(),
        expires_at: res
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs)),
    })
}

/// Returns `true` if the token is within one minute of expiration and should be
/// refreshed. A token without expiry never refreshes.
fn should_refresh_token(token: &AccessToken) -> bool {
    token.expires_at.map_or(false, |expires_at: DateTime<Utc>| {
        Utc::now() >= expires_at - Duration::seconds(60)
    })
}

/// Successful response of a token exchange.
#[derive(serde::Deserialize)]
struct RawTokenResponse {
    access_token: String,
    token_type: String,
    expires_in: Option<i64>,
}
