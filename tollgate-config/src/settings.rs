//! Typed gateway settings.
//!
//! Every section has serde defaults so a partial file (or none at all)
//! yields a complete, valid configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Currency revenue and taxes are reported in.
    pub settlement_currency: String,
    /// Currencies accepted on incoming charge requests.
    pub supported_currencies: Vec<String>,
    pub orchestrator: OrchestratorSettings,
    pub exchange: ExchangeSettings,
    pub features: FeatureSettings,
    pub gateways: GatewaySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            settlement_currency: "DOP".to_string(),
            supported_currencies: vec!["DOP".to_string(), "USD".to_string(), "EUR".to_string()],
            orchestrator: OrchestratorSettings::default(),
            exchange: ExchangeSettings::default(),
            features: FeatureSettings::default(),
            gateways: GatewaySettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Upper bound on a single provider call.
    pub provider_timeout_ms: u64,
    /// Lifetime of an idempotency record.
    pub idempotency_ttl_secs: u64,
    /// How long a duplicate request waits for the in-flight original.
    /// Zero rejects it at once.
    pub in_flight_wait_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            provider_timeout_ms: 30_000,
            idempotency_ttl_secs: 86_400,
            in_flight_wait_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    /// Rates older than this are applied but flagged stale.
    pub rate_freshness_secs: u64,
    /// Rates older than this are refused.
    pub max_rate_staleness_secs: u64,
    /// Lifetime of an in-process cached rate.
    pub cache_ttl_secs: u64,
    /// Lifetime of a cached fallback rate while the central bank is failing.
    pub fallback_cache_ttl_secs: u64,
    /// Tax levied on converted amounts, as a fraction (0.0015 = 0.15%).
    pub tax_rate: Decimal,
    /// Central bank rate endpoint. Without it only stored rates are used.
    pub central_bank_url: Option<String>,
    pub source_timeout_ms: u64,
    /// Currencies refreshed by the scheduled job.
    pub tracked_currencies: Vec<String>,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            rate_freshness_secs: 43_200,
            max_rate_staleness_secs: 86_400,
            cache_ttl_secs: 3_600,
            fallback_cache_ttl_secs: 60,
            tax_rate: Decimal::new(15, 4),
            central_bank_url: None,
            source_timeout_ms: 5_000,
            tracked_currencies: vec!["USD".to_string(), "EUR".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSettings {
    /// Remote flag store. Without it the local fallbacks decide.
    pub flag_store_url: Option<String>,
    pub flag_timeout_ms: u64,
    /// Per-gateway answer used when the flag store cannot be reached.
    pub fallback: BTreeMap<String, bool>,
    /// Answer for gateways missing from `fallback`.
    pub fallback_default: bool,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            flag_store_url: None,
            flag_timeout_ms: 500,
            fallback: BTreeMap::new(),
            fallback_default: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Gateway used when the payer does not choose one.
    pub default: Option<String>,
    /// Credentials keyed by gateway identifier (`azul`, `stripe`, ...).
    pub providers: BTreeMap<String, ProviderCredentials>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderCredentials {
    pub enabled: bool,
    pub api_key: String,
    /// Second credential for providers with split auth (Azul `Auth2`).
    pub secondary_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub merchant_id: Option<String>,
    /// Override for sandbox endpoints.
    pub base_url: Option<String>,
}

impl Default for ProviderCredentials {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: String::new(),
            secondary_key: None,
            webhook_secret: None,
            merchant_id: None,
            base_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.settlement_currency, "DOP");
        assert_eq!(settings.orchestrator.provider_timeout_ms, 30_000);
        assert_eq!(settings.exchange.tax_rate, Decimal::new(15, 4));
        assert!(settings.features.fallback_default);
        assert!(settings.gateways.providers.is_empty());
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let settings: Settings = serde_json::from_value(serde_json::json!({
            "exchange": {"cache_ttl_secs": 60},
            "gateways": {"providers": {"azul": {"api_key": "k"}}}
        }))
        .unwrap();

        assert_eq!(settings.exchange.cache_ttl_secs, 60);
        assert_eq!(settings.exchange.max_rate_staleness_secs, 86_400);
        assert!(settings.gateways.providers["azul"].enabled);
    }
}
