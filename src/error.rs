//! Standard errors used by all functions in the crate.

use std::fmt;

/// Error collecting all possible failures when talking to a payout provider.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Reqwest error.
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    /// Error returned by a provider API endpoint.
    #[error("{0}")]
    ApiError(#[from] ApiError),
    /// Authentication against the provider failed.
    #[error("authentication error: {0}")]
    AuthError(#[from] crate::apis::auth::AuthError),
    /// Catch-all variant for unexpected errors.
    #[error(transparent)]
    Other(anyhow::Error),
}

impl From<reqwest_middleware::Error> for Error {
    fn from(e: reqwest_middleware::Error) -> Self {
        match e {
            reqwest_middleware::Error::Reqwest(e) => Error::HttpError(e),
            reqwest_middleware::Error::Middleware(e) => {
                e.downcast::<Error>().unwrap_or_else(Error::Other)
            }
        }
    }
}

impl From<Error> for reqwest_middleware::Error {
    fn from(e: Error) -> Self {
        reqwest_middleware::Error::Middleware(e.into())
    }
}

impl Error {
    /// Returns `true` if this error looks transient: a network-level failure, a timeout,
    /// or a 5xx/429 response from the provider.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::ApiError(api_error) => api_error.is_transient(),
            _ => false,
        }
    }
}

/// Provider HTTP APIs error.
#[derive(thiserror::Error, Debug)]
pub struct ApiError {
    /// HTTP status returned by the server.
    pub status: u16,
    /// Machine-readable error code returned by the provider, if any.
    pub code: Option<String>,
    /// Human readable description of the error.
    pub message: String,
    /// The provider correlation identifier for the request, when echoed back.
    pub correlation_id: Option<String>,
}

impl ApiError {
    /// Returns `true` for statuses worth retrying (server faults and throttling).
    pub fn is_transient(&self) -> bool {
        self.status >= 500 || self.status == 429
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provider HTTP error {}: {}", self.status, self.message)?;

        if let Some(ref code) = self.code {
            write!(f, " ({})", code)?;
        }

        if let Some(ref correlation_id) = self.correlation_id {
            write!(f, "\nCorrelation ID: {}", correlation_id)?;
        }

        Ok(())
    }
}
