//! Error types for payment orchestration

use crate::gateway::GatewayId;
use crate::money::Currency;
use thiserror::Error;

/// Gateway error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// Malformed request, rejected before any side effect
    #[error("Validation error: {0}")]
    Validation(String),

    /// No provider registered under this identifier
    #[error("Gateway not registered: {0}")]
    NotRegistered(GatewayId),

    /// No default gateway configured or registered
    #[error("No default gateway configured")]
    NoDefaultConfigured,

    /// Nothing registered, enabled and healthy can serve the request
    #[error("No gateway available: {0}")]
    NoGatewayAvailable(String),

    /// Gateway switched off for new payers
    #[error("Gateway {0} is not enabled for new payers")]
    GatewayDisabled(GatewayId),

    /// Same idempotency key still in flight
    #[error("Request already in progress: {0}")]
    Conflict(String),

    /// Definitive decline: no money was captured
    #[error("Declined by provider ({code}): {message}")]
    ProviderDeclined { code: String, message: String },

    /// Provider unreachable or answered with a server error; outcome unknown
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Provider did not answer in time; outcome unknown
    #[error("Provider call timed out")]
    Timeout,

    /// Exchange rate older than the configured maximum
    #[error("Exchange rate for {currency} is {age_secs}s old")]
    StaleRateRejected { currency: Currency, age_secs: i64 },

    /// No rate in cache, storage or the central source
    #[error("No exchange rate available for {0}")]
    RateUnavailable(Currency),

    /// Webhook signature did not verify
    #[error("Invalid webhook signature")]
    SignatureInvalid,

    /// Entity lookup failed
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Gateway lacks a capability the request needs
    #[error("Gateway {gateway} does not support {capability}")]
    UnsupportedCapability {
        gateway: GatewayId,
        capability: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Persistence backend failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl GatewayError {
    /// Shorthand for [`GatewayError::NotFound`]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`GatewayError::ProviderDeclined`]
    pub fn declined(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderDeclined {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Money may or may not have moved.
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_) | Self::Timeout | Self::Serialization(_)
        )
    }

    /// The provider refused and nothing was captured.
    pub fn is_definitive(&self) -> bool {
        matches!(self, Self::ProviderDeclined { .. })
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotRegistered(_) => "not_registered",
            Self::NoDefaultConfigured => "no_default_configured",
            Self::NoGatewayAvailable(_) => "no_gateway_available",
            Self::GatewayDisabled(_) => "gateway_disabled",
            Self::Conflict(_) => "conflict",
            Self::ProviderDeclined { .. } => "provider_declined",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::Timeout => "timeout",
            Self::StaleRateRejected { .. } => "stale_rate_rejected",
            Self::RateUnavailable(_) => "rate_unavailable",
            Self::SignatureInvalid => "signature_invalid",
            Self::NotFound { .. } => "not_found",
            Self::UnsupportedCapability { .. } => "unsupported_capability",
            Self::Config(_) => "config_error",
            Self::Serialization(_) => "serialization_error",
            Self::Storage(_) => "storage_error",
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_decode() {
            GatewayError::Serialization(err.to_string())
        } else {
            GatewayError::ProviderUnavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for GatewayError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        GatewayError::Timeout
    }
}

impl From<tollgate_features::FlagError> for GatewayError {
    fn from(err: tollgate_features::FlagError) -> Self {
        GatewayError::Config(err.to_string())
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
