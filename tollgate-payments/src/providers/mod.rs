//! Provider adapters

#[cfg(feature = "azul")]
pub mod azul;
mod client;
#[cfg(feature = "stripe")]
pub mod stripe;

#[cfg(feature = "azul")]
pub use azul::AzulProvider;
pub use client::{ProviderAuth, ProviderClient, status_error};
#[cfg(feature = "stripe")]
pub use stripe::StripeProvider;

use std::time::Duration;

/// Credentials and endpoint for one provider
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub api_key: String,
    /// Second credential for split auth (Azul `Auth2`)
    pub secondary_key: Option<String>,
    pub merchant_id: Option<String>,
    pub webhook_secret: Option<String>,
    /// Override for sandbox endpoints
    pub base_url: Option<String>,
    /// Bound on each HTTP call
    pub timeout: Duration,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secondary_key: None,
            merchant_id: None,
            webhook_secret: None,
            base_url: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_secondary_key(mut self, key: impl Into<String>) -> Self {
        self.secondary_key = Some(key.into());
        self
    }

    pub fn with_merchant_id(mut self, merchant_id: impl Into<String>) -> Self {
        self.merchant_id = Some(merchant_id.into());
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &"[REDACTED]")
            .field("merchant_id", &self.merchant_id)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
