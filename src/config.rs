//! Provider configuration and the read-only resolver that supplies it.
//!
//! Configuration management (admin screens, secret storage) lives outside this crate;
//! the orchestrator only ever consumes a fully resolved [`ProviderConfig`], injected
//! through the [`ConfigResolver`] seam. Nothing in here is read from ambient process
//! state.

use crate::{
    apis::auth::{Credentials, Token},
    ledger::Currency,
};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt::{Display, Formatter},
};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Sandbox,
    Production,
}

impl Display for Environment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Sandbox => write!(f, "sandbox"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// The payout rail a withdrawal settles over.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    MobileMoney,
    BankTransfer,
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::MobileMoney => write!(f, "mobile-money"),
            ProviderKind::BankTransfer => write!(f, "bank-transfer"),
        }
    }
}

/// Fully resolved configuration for one (provider, country, environment) triple.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    /// ISO 3166-1 alpha-2 country code.
    pub country: String,
    pub environment: Environment,
    pub base_url: Url,
    /// Tag selecting the target environment on shared provider hosts.
    pub target_environment: String,
    pub subscription_key: Token,
    pub credentials: Credentials,
    /// Sandbox hosts typically accept a single fixed currency. When set, transfers
    /// are submitted in this currency regardless of the merchant's own.
    pub currency_override: Option<Currency>,
}

/// Read-only lookup of active provider configurations.
#[async_trait]
pub trait ConfigResolver: Send + Sync {
    async fn active_config(
        &self,
        provider: ProviderKind,
        country: &str,
        environment: Environment,
    ) -> Result<ProviderConfig, ConfigError>;
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// No active configuration exists for the requested triple. Only an administrator
    /// can fix this.
    #[error("no active {provider} configuration for {country}/{environment}")]
    NotConfigured {
        provider: ProviderKind,
        country: String,
        environment: Environment,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// [`ConfigResolver`] backed by an in-memory table.
#[derive(Debug, Default)]
pub struct StaticConfigResolver {
    configs: HashMap<(ProviderKind, String, Environment), ProviderConfig>,
}

impl StaticConfigResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a configuration under its own (provider, country, environment) triple.
    pub fn with_config(mut self, config: ProviderConfig) -> Self {
        self.configs.insert(
            (config.provider, config.country.clone(), config.environment),
            config,
        );
        self
    }
}

#[async_trait]
impl ConfigResolver for StaticConfigResolver {
    async fn active_config(
        &self,
        provider: ProviderKind,
        country: &str,
        environment: Environment,
    ) -> Result<ProviderConfig, ConfigError> {
        self.configs
            .get(&(provider, country.to_string(), environment))
            .cloned()
            .ok_or_else(|| ConfigError::NotConfigured {
                provider,
                country: country.to_string(),
                environment,
            })
    }
}
