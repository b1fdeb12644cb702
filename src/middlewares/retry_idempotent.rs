use crate::common::IDEMPOTENCY_KEY_HEADER;
use async_trait::async_trait;
use reqwest::{Method, Request, Response};
use reqwest_middleware::{Middleware, Next};
use reqwest_retry::RetryTransientMiddleware;
use retry_policies::{RetryDecision, RetryPolicy};
use std::{
    fmt::{Debug, Formatter},
    sync::Arc,
};
use task_local_extensions::Extensions;

/// Middleware that automatically retries transient failures only on idempotent requests.
///
/// A request is considered idempotent if and only if:
/// - Has an idempotent method (`GET`, `HEAD`, `OPTIONS`, `TRACE`, `PUT` or `DELETE`), or
/// - Has a `POST` or `PATCH` method *and* an `Idempotency-Key` header set.
///
/// Transfer submissions always carry the withdrawal's idempotency reference in that
/// header, which is what makes a network-level retry safe: the provider recognizes the
/// repeated reference as the same transfer instead of paying out twice.
pub struct RetryIdempotentMiddleware {
    inner: RetryTransientMiddleware<BoxedRetryPolicy>,
}

impl RetryIdempotentMiddleware {
    pub fn new(retry_policy: BoxedRetryPolicy) -> Self {
        Self {
            inner: RetryTransientMiddleware::new_with_policy(retry_policy),
        }
    }
}

#[async_trait]
impl Middleware for RetryIdempotentMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let is_idempotent = match *req.method() {
            Method::GET
            | Method::HEAD
            | Method::OPTIONS
            | Method::TRACE
            | Method::PUT
            | Method::DELETE => true,
            Method::POST | Method::PATCH => req
                .headers()
                .get(IDEMPOTENCY_KEY_HEADER)
                .map_or(false, |v| !v.is_empty()),
            _ => false,
        };

        // If the request is idempotent, use the retry middleware, otherwise, do nothing
        if is_idempotent {
            self.inner.handle(req, extensions, next).await
        } else {
            next.run(req, extensions).await
        }
    }
}

/// Wrapper type around a retry policy because `dyn RetryPolicy` does not implement `RetryPolicy`.
#[derive(Clone)]
pub struct BoxedRetryPolicy(pub Arc<dyn RetryPolicy + Send + Sync + 'static>);

impl RetryPolicy for BoxedRetryPolicy {
    fn should_retry(&self, n_past_retries: u32) -> RetryDecision {
        self.0.should_retry(n_past_retries)
    }
}

impl Debug for BoxedRetryPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxedRetryPolicy").finish_non_exhaustive()
    }
}
