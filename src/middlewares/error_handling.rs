use crate::error::{ApiError, Error};
use async_trait::async_trait;
use reqwest::{Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next};
use task_local_extensions::Extensions;

/// Reqwest middleware which translates JSON error responses returned from the payout
/// provider into [`Error::ApiError`](crate::error::Error)s.
pub struct ErrorHandlingMiddleware;

#[async_trait]
impl Middleware for ErrorHandlingMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        // Capture the response
        let response = next.run(req, extensions).await?;

        // Build an error if the response is not a success.
        if !response.status().is_success() {
            let status = response.status();
            let correlation_id = response
                .headers()
                .get("X-Correlation-Id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let bytes = response.bytes().await?;

            tracing::debug!("Failed HTTP request. Status code: {}", status);

            let mut api_error = api_error_from_body(status, &bytes);
            api_error.correlation_id = correlation_id;
            return Err(Error::ApiError(api_error).into());
        }

        Ok(response)
    }
}

/// Parses a provider error body into an [`ApiError`].
///
/// Providers answer with `{ "code": ..., "message": ... }`; anything else is kept
/// verbatim as the error message.
pub(crate) fn api_error_from_body(status: StatusCode, bytes: &[u8]) -> ApiError {
    let error_response: ErrorResponse =
        serde_json::from_slice(bytes).unwrap_or_else(|_| ErrorResponse {
            code: None,
            message: if bytes.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("Unknown Error")
                    .to_string()
            } else {
                String::from_utf8_lossy(bytes).into_owned()
            },
        });

    ApiError {
        status: status.as_u16(),
        code: error_response.code,
        message: error_response.message,
        correlation_id: None,
    }
}

/// Error response from provider APIs.
#[derive(serde::Deserialize, Debug)]
struct ErrorResponse {
    code: Option<String>,
    message: String,
}
