//! Typed payments configuration built from [`Settings`]

use crate::{
    error::GatewayError,
    exchange::ExchangeConfig,
    gateway::GatewayId,
    money::Currency,
    orchestrator::OrchestratorConfig,
    providers::ProviderConfig,
};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tollgate_config::Settings;

/// Feature-flag store settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureConfig {
    pub flag_store_url: Option<String>,
    pub flag_timeout: Duration,
    pub fallback: HashMap<GatewayId, bool>,
    pub fallback_default: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            flag_store_url: None,
            flag_timeout: Duration::from_millis(500),
            fallback: HashMap::new(),
            fallback_default: true,
        }
    }
}

/// Everything the payments core needs at startup
#[derive(Debug, Clone, Default)]
pub struct PaymentsConfig {
    pub orchestrator: OrchestratorConfig,
    pub exchange: ExchangeConfig,
    pub central_bank_url: Option<String>,
    pub features: FeatureConfig,
    pub default_gateway: Option<GatewayId>,
    /// Enabled providers only
    pub providers: BTreeMap<GatewayId, ProviderConfig>,
}

fn currency(code: &str, field: &str) -> Result<Currency, GatewayError> {
    Currency::from_code(code)
        .ok_or_else(|| GatewayError::Config(format!("{}: unknown currency {:?}", field, code)))
}

fn currencies(codes: &[String], field: &str) -> Result<Vec<Currency>, GatewayError> {
    codes.iter().map(|code| currency(code, field)).collect()
}

impl TryFrom<&Settings> for PaymentsConfig {
    type Error = GatewayError;

    fn try_from(settings: &Settings) -> Result<Self, Self::Error> {
        let settlement_currency = currency(&settings.settlement_currency, "settlement_currency")?;
        let provider_timeout = Duration::from_millis(settings.orchestrator.provider_timeout_ms);

        let idempotency_ttl = i64::try_from(settings.orchestrator.idempotency_ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| GatewayError::Config("orchestrator.idempotency_ttl_secs is too large".into()))?;

        let orchestrator = OrchestratorConfig {
            supported_currencies: currencies(&settings.supported_currencies, "supported_currencies")?,
            provider_timeout,
            idempotency_ttl,
            in_flight_wait: Duration::from_millis(settings.orchestrator.in_flight_wait_ms),
        };

        let ex = &settings.exchange;
        let exchange = ExchangeConfig {
            settlement_currency,
            rate_freshness: Duration::from_secs(ex.rate_freshness_secs),
            max_rate_staleness: Duration::from_secs(ex.max_rate_staleness_secs),
            cache_ttl: Duration::from_secs(ex.cache_ttl_secs),
            fallback_cache_ttl: Duration::from_secs(ex.fallback_cache_ttl_secs),
            tax_rate: ex.tax_rate,
            source_timeout: Duration::from_millis(ex.source_timeout_ms),
            tracked_currencies: currencies(&ex.tracked_currencies, "exchange.tracked_currencies")?,
        };

        let mut fallback = HashMap::new();
        for (name, enabled) in &settings.features.fallback {
            fallback.insert(name.parse::<GatewayId>()?, *enabled);
        }
        let features = FeatureConfig {
            flag_store_url: settings.features.flag_store_url.clone(),
            flag_timeout: Duration::from_millis(settings.features.flag_timeout_ms),
            fallback,
            fallback_default: settings.features.fallback_default,
        };

        let mut providers = BTreeMap::new();
        for (name, credentials) in &settings.gateways.providers {
            let id = name.parse::<GatewayId>()?;
            if !credentials.enabled {
                continue;
            }

            let mut config = ProviderConfig::new(&credentials.api_key).with_timeout(provider_timeout);
            config.secondary_key = credentials.secondary_key.clone();
            config.merchant_id = credentials.merchant_id.clone();
            config.webhook_secret = credentials.webhook_secret.clone();
            config.base_url = credentials.base_url.clone();
            providers.insert(id, config);
        }

        let default_gateway = settings
            .gateways
            .default
            .as_deref()
            .map(str::parse::<GatewayId>)
            .transpose()?;

        Ok(Self {
            orchestrator,
            exchange,
            central_bank_url: settings.exchange.central_bank_url.clone(),
            features,
            default_gateway,
            providers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_config::ProviderCredentials;

    #[test]
    fn test_defaults_convert() {
        let config = PaymentsConfig::try_from(&Settings::default()).unwrap();

        assert_eq!(config.exchange.settlement_currency, Currency::DOP);
        assert_eq!(config.exchange.rate_freshness, Duration::from_secs(12 * 3600));
        assert_eq!(config.orchestrator.provider_timeout, Duration::from_secs(30));
        assert_eq!(config.orchestrator.idempotency_ttl, chrono::Duration::hours(24));
        assert_eq!(
            config.orchestrator.supported_currencies,
            vec![Currency::DOP, Currency::USD, Currency::EUR]
        );
        assert!(config.orchestrator.in_flight_wait.is_zero());
        assert!(config.providers.is_empty());
        assert!(config.default_gateway.is_none());
    }

    #[test]
    fn test_in_flight_wait_maps_from_settings() {
        let mut settings = Settings::default();
        settings.orchestrator.in_flight_wait_ms = 2_500;

        let config = PaymentsConfig::try_from(&settings).unwrap();
        assert_eq!(config.orchestrator.in_flight_wait, Duration::from_millis(2_500));
    }

    #[test]
    fn test_providers_and_fallbacks() {
        let mut settings = Settings::default();
        settings.gateways.default = Some("azul".into());
        settings.gateways.providers.insert(
            "azul".into(),
            ProviderCredentials {
                api_key: "auth1".into(),
                secondary_key: Some("auth2".into()),
                merchant_id: Some("39038540035".into()),
                ..Default::default()
            },
        );
        settings.gateways.providers.insert(
            "stripe".into(),
            ProviderCredentials {
                enabled: false,
                api_key: "sk_test_1".into(),
                ..Default::default()
            },
        );
        settings.features.fallback.insert("stripe".into(), false);

        let config = PaymentsConfig::try_from(&settings).unwrap();
        assert_eq!(config.default_gateway, Some(GatewayId::Azul));
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[&GatewayId::Azul].secondary_key.as_deref(), Some("auth2"));
        assert_eq!(config.features.fallback.get(&GatewayId::Stripe), Some(&false));
    }

    #[test]
    fn test_unknown_identifiers_rejected() {
        let mut settings = Settings::default();
        settings.supported_currencies.push("XYZ".into());
        assert!(matches!(
            PaymentsConfig::try_from(&settings),
            Err(GatewayError::Config(_))
        ));

        let mut settings = Settings::default();
        settings.gateways.default = Some("paypal".into());
        assert!(matches!(
            PaymentsConfig::try_from(&settings),
            Err(GatewayError::Config(_))
        ));
    }
}
