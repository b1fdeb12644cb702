//! Common logic to poll the provider for updates on resources.
//!
//! Reconciliation is built on top of this: a pending transfer is re-polled until it
//! reaches a terminal state, and `pending` in the meantime is never treated as an
//! error.

use crate::{Error, ProviderClient};
use async_trait::async_trait;
use chrono::Utc;
use retry_policies::{policies::ExponentialBackoff, RetryDecision, RetryPolicy};
use std::time::Duration;

/// Options to configure the behaviour of [`Pollable::poll_until`](crate::pollable::Pollable::poll_until).
///
/// The default is an exponential backoff between retries from 1 to 30 seconds for a total of 5 minutes.
#[derive(Debug)]
pub struct PollOptions<R: RetryPolicy> {
    retry_policy: R,
}

impl Default for PollOptions<ExponentialBackoff> {
    fn default() -> Self {
        Self {
            retry_policy: ExponentialBackoff::builder()
                .retry_bounds(Duration::from_secs(1), Duration::from_secs(30))
                .build_with_total_retry_duration(Duration::from_secs(60 * 5 /* 5 mins */)),
        }
    }
}

impl<R: RetryPolicy> PollOptions<R> {
    /// Sets a retry policy.
    pub fn with_retry_policy<T: RetryPolicy>(self, retry_policy: T) -> PollOptions<T> {
        PollOptions { retry_policy }
    }
}

/// Error returned from [`Pollable::poll_until`](crate::pollable::Pollable::poll_until).
#[derive(thiserror::Error, Debug)]
pub enum PollError {
    /// Polling timed out before the condition was met.
    #[error("Polling timeout")]
    Timeout,
    /// Other error.
    #[error(transparent)]
    Error(#[from] Error),
}

/// A resource that can be continuously polled for updates.
#[async_trait]
pub trait Pollable: private::Sealed {
    type Output: Send;

    /// Makes a single request to retrieve the most up-to-date version of this resource
    /// from the provider.
    async fn poll_once(&self, client: &ProviderClient) -> Result<Self::Output, Error>;

    /// Continuously polls the provider for updates on this resource until the given condition is met.
    #[tracing::instrument(name = "Poll for updates", skip_all)]
    async fn poll_until<R, F>(
        &self,
        client: &ProviderClient,
        poll_options: PollOptions<R>,
        predicate: F,
    ) -> Result<Self::Output, PollError>
    where
        R: RetryPolicy + Send + Sync,
        F: for<'a> Fn(&'a Self::Output) -> bool + Send,
    {
        // Loop until we match the predicate
        let mut i = 0;
        loop {
            // Update the resource
            let res = self.poll_once(client).await?;

            // Check predicate
            if predicate(&res) {
                return Ok(res);
            }

            // Wait
            match poll_options.retry_policy.should_retry(i) {
                RetryDecision::Retry { execute_after } => {
                    let wait_time = (execute_after - Utc::now()).to_std().unwrap_or_default();

                    tracing::debug!(
                        "Waiting {} seconds before trying again",
                        wait_time.as_secs_f64()
                    );

                    tokio::time::sleep(wait_time).await;
                }
                RetryDecision::DoNotRetry => {
                    return Err(PollError::Timeout);
                }
            }

            i += 1;
        }
    }
}

/// A resource that can be in a terminal state.
pub trait IsInTerminalState {
    /// Returns `true` if this resource is in a terminal state.
    fn is_in_terminal_state(&self) -> bool;
}

/// A resource that can be continuously polled for updates until it reaches a terminal state.
#[async_trait]
pub trait PollableUntilTerminalState: Pollable {
    /// Continuously polls the provider for updates on this resource until it reaches a terminal state.
    async fn poll_until_terminal_state<R: RetryPolicy + Send + Sync>(
        &self,
        client: &ProviderClient,
        poll_options: PollOptions<R>,
    ) -> Result<Self::Output, PollError>;
}

#[async_trait]
impl<T> PollableUntilTerminalState for T
where
    T: Pollable + Send + Sync,
    <T as Pollable>::Output: IsInTerminalState,
{
    async fn poll_until_terminal_state<R: RetryPolicy + Send + Sync>(
        &self,
        client: &ProviderClient,
        poll_options: PollOptions<R>,
    ) -> Result<Self::Output, PollError> {
        self.poll_until(client, poll_options, Self::Output::is_in_terminal_state)
            .await
    }
}

// Prevent users from implementing the `Pollable` trait.
mod private {
    pub trait Sealed {}

    impl Sealed for crate::apis::disbursements::Transfer {}
    impl Sealed for crate::apis::disbursements::TransferAccepted {}

    #[cfg(test)]
    impl<F> Sealed for super::tests::PollableMock<F> {}
}
