// Header names
pub static IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
pub static SUBSCRIPTION_KEY_HEADER: &str = "X-Subscription-Key";
pub static TARGET_ENVIRONMENT_HEADER: &str = "X-Target-Environment";

/// Default timeout applied to every disbursement HTTP request.
pub(crate) static DEFAULT_REQUEST_TIMEOUT: std::time::Duration =
    std::time::Duration::from_secs(30);

/// Token exchanges are short round trips and get a tighter bound.
pub(crate) static DEFAULT_TOKEN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
