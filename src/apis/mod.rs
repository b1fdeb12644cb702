//! Clients for the payout provider APIs.

use crate::{authenticator::Authenticator, config::ProviderConfig};
use reqwest_middleware::ClientWithMiddleware;
use std::fmt::{Debug, Formatter};

pub mod auth;
pub mod disbursements;

pub(crate) struct ProviderClientInner {
    pub(crate) client: ClientWithMiddleware,
    pub(crate) authenticator: Authenticator,
    pub(crate) config: ProviderConfig,
}

impl Debug for ProviderClientInner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClientInner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
