use std::collections::HashMap;

use async_trait::async_trait;

use super::provider::Provider;
use crate::error::AppError;

/// What the provider redirected back with, minus `state`.
#[derive(Debug, Clone)]
pub struct CallbackPayload {
    pub code: String,
    pub params: HashMap<String, String>,
}

/// The provider-side account the code resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderIdentity {
    pub provider_user_id: String,
    pub email: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("provider {0} unreachable: {1}")]
    Unreachable(String, String),
    #[error("provider {0} denied the request: {1}")]
    Denied(String, String),
    #[error("provider {0} returned malformed data: {1}")]
    Malformed(String, String),
    #[error("token exchange for {0} is not configured")]
    NotConfigured(String),
}

impl From<ExchangeError> for AppError {
    fn from(e: ExchangeError) -> Self {
        AppError::Upstream(e.to_string())
    }
}

/// Turns an authorization code into a provider identity.
///
/// Implementations talk to the provider's token endpoint. They are called
/// only after the state check has passed and the state was consumed, are
/// bounded by the configured exchange timeout, and must not hold locks
/// across the network call.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(
        &self,
        provider: &Provider,
        payload: &CallbackPayload,
    ) -> Result<ProviderIdentity, ExchangeError>;
}

/// Default exchange: fails every call so an unconfigured deployment cannot
/// silently link accounts.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredExchange;

#[async_trait]
impl TokenExchange for UnconfiguredExchange {
    async fn exchange(
        &self,
        provider: &Provider,
        _payload: &CallbackPayload,
    ) -> Result<ProviderIdentity, ExchangeError> {
        Err(ExchangeError::NotConfigured(provider.name.clone()))
    }
}
