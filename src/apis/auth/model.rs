use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// Credentials used to authenticate against a payout provider.
///
/// Providers issue one credential pair per product and environment; using sandbox
/// credentials against a production host is rejected with `401` by the provider.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Credentials {
    pub api_user: String,
    pub api_key: Token,
}

impl Credentials {
    pub fn new(api_user: impl Into<String>, api_key: impl Into<Token>) -> Self {
        Self {
            api_user: api_user.into(),
            api_key: api_key.into(),
        }
    }
}

/// Opaque access token used to authenticate disbursement requests.
///
/// This is the ephemeral provider session: it lives in memory for its validity
/// window and is never persisted.
#[derive(Clone, Debug)]
pub struct AccessToken {
    pub(crate) token: Token,
    pub(crate) expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Actual token contents held by this `AccessToken` instance.
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Expiration date of the token.
    ///
    /// Returns `None` if this token does not expire.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

impl Deref for AccessToken {
    type Target = Token;

    fn deref(&self) -> &Self::Target {
        self.token()
    }
}

/// Failure of a token exchange, classified for the orchestrator.
#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    /// The provider rejected the credentials. Not retryable: only an operator can fix
    /// a misconfigured credential set.
    #[error("provider rejected the credentials (HTTP {status})")]
    InvalidCredentials { status: u16, detail: Option<String> },
    /// The provider's auth endpoint could not be reached or kept failing after the
    /// bounded retries were exhausted.
    #[error("provider authentication unavailable: {source}")]
    ProviderUnavailable {
        #[source]
        source: Box<crate::Error>,
    },
}

/// Wrapper for a secret string that makes it harder to accidentally expose secrets
/// and ensures the backing memory is wiped on drop.
///
/// It is a wrapper around a [`secrecy::Secret`](secrecy::Secret).
///
/// ```rust
/// # use payout_engine::apis::auth::Token;
/// let token = Token::new("supersecret");
///
/// // The secret is redacted when printed with Debug
/// assert!(!format!("{:?}", token).contains("supersecret"));
///
/// // But can be manually exposed calling `expose_secret()`...
/// assert_eq!(token.expose_secret(), "supersecret");
///
/// // ... Or if serialized with Serde
/// let serialized = serde_json::to_string(&token).unwrap();
/// assert!(serialized.contains("supersecret"));
/// ```
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Token(#[serde(serialize_with = "serialize_secret")] Secret<String>);

impl Token {
    /// Wraps a secret string in a new `Token`.
    pub fn new<T: Into<String>>(s: T) -> Self {
        Self(Secret::new(s.into()))
    }

    /// Exposes a reference to the underlying secret string.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl<T> From<T> for Token
where
    T: Into<String>,
{
    fn from(s: T) -> Self {
        Token::new(s)
    }
}

fn serialize_secret<S>(secret: &Secret<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::ser::Serializer,
{
    secret.expose_secret().serialize(serializer)
}
