//! Central bank rate source.

use crate::{
    error::{GatewayError, GatewayResult},
    money::Currency,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// One published buy rate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedRate {
    pub currency: Currency,
    /// Settlement currency units per unit of `currency`
    pub buy_rate: Decimal,
    pub rate_date: NaiveDate,
}

/// Remote publisher of daily rates
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Source identifier stored with each rate
    fn name(&self) -> &str;

    /// Today's rates for the given currencies
    async fn fetch_rates(&self, currencies: &[Currency]) -> GatewayResult<Vec<QuotedRate>>;
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    date: NaiveDate,
    rates: Vec<RateEntry>,
}

#[derive(Debug, Deserialize)]
struct RateEntry {
    currency: String,
    buy: Decimal,
}

/// Central bank JSON endpoint.
///
/// `GET {base}/rates?currencies=USD,EUR` answers
/// `{"date": "2026-10-18", "rates": [{"currency": "USD", "buy": "58.95"}]}`.
pub struct HttpRateSource {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpRateSource {
    pub fn new(base_url: &str, timeout: Duration) -> GatewayResult<Self> {
        let mut base_url =
            Url::parse(base_url).map_err(|e| GatewayError::Config(format!("central bank url: {}", e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    fn name(&self) -> &str {
        "central_bank"
    }

    async fn fetch_rates(&self, currencies: &[Currency]) -> GatewayResult<Vec<QuotedRate>> {
        let mut url = self
            .base_url
            .join("rates")
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        let codes: Vec<&str> = currencies.iter().map(|c| c.code()).collect();
        url.query_pairs_mut().append_pair("currencies", &codes.join(","));

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(GatewayError::ProviderUnavailable(format!(
                "central bank answered {}",
                response.status()
            )));
        }

        let body: RatesResponse = response.json().await?;
        let mut quoted = Vec::with_capacity(body.rates.len());
        for entry in body.rates {
            let Some(currency) = Currency::from_code(&entry.currency) else {
                tracing::debug!(currency = %entry.currency, "Skipping unsupported currency");
                continue;
            };
            if entry.buy <= Decimal::ZERO {
                return Err(GatewayError::Serialization(format!(
                    "non-positive rate for {}",
                    currency
                )));
            }
            quoted.push(QuotedRate {
                currency,
                buy_rate: entry.buy,
                rate_date: body.date,
            });
        }

        Ok(quoted)
    }
}
