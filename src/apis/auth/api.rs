use crate::apis::{
    auth::{AccessToken, AuthError},
    ProviderClientInner,
};
use std::sync::Arc;

/// Provider authentication API client.
#[derive(Debug, Clone)]
pub struct AuthApi {
    inner: Arc<ProviderClientInner>,
}

impl AuthApi {
    pub(crate) fn new(inner: Arc<ProviderClientInner>) -> Self {
        Self { inner }
    }

    /// Returns the current [`AccessToken`](crate::apis::auth::AccessToken) used to
    /// authenticate disbursement requests. If the client holds no token yet, or the
    /// cached one is about to expire, a new credential exchange is fired.
    pub async fn get_access_token(&self) -> Result<AccessToken, AuthError> {
        // Just delegate to the authenticator
        self.inner.authenticator.get_access_token().await
    }
}
