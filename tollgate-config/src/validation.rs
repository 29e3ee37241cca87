// Configuration validation

use crate::{ConfigError, Result, Settings};
use rust_decimal::Decimal;

/// Trait for validating configuration
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Configuration validator with rules
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate that a value is not empty
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{} cannot be empty",
                field
            )));
        }
        Ok(())
    }

    /// Validate that a number is within `[min, max]`
    pub fn in_range<T: PartialOrd + std::fmt::Display>(
        value: T,
        min: T,
        max: T,
        field: &str,
    ) -> Result<()> {
        if value < min || value > max {
            return Err(ConfigError::ValidationError(format!(
                "{} must be between {} and {}, got {}",
                field, min, max, value
            )));
        }
        Ok(())
    }

    /// Validate that a duration-like value is non-zero
    pub fn positive(value: u64, field: &str) -> Result<()> {
        if value == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{} must be greater than zero",
                field
            )));
        }
        Ok(())
    }

    /// Validate URL format
    pub fn is_url(value: &str, field: &str) -> Result<()> {
        if !value.starts_with("http://") && !value.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!(
                "{} must be a valid URL",
                field
            )));
        }
        Ok(())
    }

    /// Validate an ISO 4217 alphabetic code (three ASCII letters)
    pub fn is_currency_code(value: &str, field: &str) -> Result<()> {
        if value.len() != 3 || !value.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::ValidationError(format!(
                "{} must be a three-letter ISO 4217 code, got {:?}",
                field, value
            )));
        }
        Ok(())
    }
}

impl Validate for Settings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::is_currency_code(&self.settlement_currency, "settlement_currency")?;
        for code in &self.supported_currencies {
            ConfigValidator::is_currency_code(code, "supported_currencies")?;
        }

        ConfigValidator::positive(
            self.orchestrator.provider_timeout_ms,
            "orchestrator.provider_timeout_ms",
        )?;
        ConfigValidator::positive(
            self.orchestrator.idempotency_ttl_secs,
            "orchestrator.idempotency_ttl_secs",
        )?;

        let exchange = &self.exchange;
        ConfigValidator::positive(exchange.rate_freshness_secs, "exchange.rate_freshness_secs")?;
        ConfigValidator::positive(exchange.source_timeout_ms, "exchange.source_timeout_ms")?;
        if exchange.rate_freshness_secs > exchange.max_rate_staleness_secs {
            return Err(ConfigError::ValidationError(
                "exchange.rate_freshness_secs cannot exceed exchange.max_rate_staleness_secs"
                    .to_string(),
            ));
        }
        if exchange.tax_rate < Decimal::ZERO || exchange.tax_rate >= Decimal::ONE {
            return Err(ConfigError::ValidationError(format!(
                "exchange.tax_rate must be in [0, 1), got {}",
                exchange.tax_rate
            )));
        }
        if let Some(url) = &exchange.central_bank_url {
            ConfigValidator::is_url(url, "exchange.central_bank_url")?;
        }
        for code in &exchange.tracked_currencies {
            ConfigValidator::is_currency_code(code, "exchange.tracked_currencies")?;
        }

        ConfigValidator::positive(self.features.flag_timeout_ms, "features.flag_timeout_ms")?;
        if let Some(url) = &self.features.flag_store_url {
            ConfigValidator::is_url(url, "features.flag_store_url")?;
        }

        for (name, credentials) in &self.gateways.providers {
            if credentials.enabled {
                ConfigValidator::not_empty(
                    &credentials.api_key,
                    &format!("gateways.providers.{}.api_key", name),
                )?;
            }
            if let Some(url) = &credentials.base_url {
                ConfigValidator::is_url(url, &format!("gateways.providers.{}.base_url", name))?;
            }
        }

        if let Some(default) = &self.gateways.default
            && self.gateways.providers.get(default).is_some_and(|p| !p.enabled)
        {
            return Err(ConfigError::ValidationError(format!(
                "gateways.default names disabled provider {}",
                default
            )));
        }

        Ok(())
    }
}
