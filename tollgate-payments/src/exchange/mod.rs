//! Exchange rates and currency conversion
//!
//! Rates are looked up cache first, then storage, then the central bank
//! source. Every conversion tied to a transaction is recorded for audit.

mod cache;
mod source;

pub use cache::RateCache;
pub use source::{HttpRateSource, QuotedRate, RateSource};

use crate::{
    error::{GatewayError, GatewayResult},
    money::{Currency, Money},
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tollgate_log::targets;
use uuid::Uuid;

/// Daily buy rate for one currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub id: Uuid,
    pub currency: Currency,
    pub rate_date: NaiveDate,
    /// Settlement currency units per unit of `currency`
    pub buy_rate: Decimal,
    pub source: String,
    pub active: bool,
    pub fetched_at: DateTime<Utc>,
}

impl ExchangeRate {
    /// Active rate for today, fetched now
    pub fn new(currency: Currency, buy_rate: Decimal, source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            currency,
            rate_date: now.date_naive(),
            buy_rate,
            source: source.into(),
            active: true,
            fetched_at: now,
        }
    }

    pub fn with_date(mut self, rate_date: NaiveDate) -> Self {
        self.rate_date = rate_date;
        self
    }

    pub fn fetched_at(mut self, fetched_at: DateTime<Utc>) -> Self {
        self.fetched_at = fetched_at;
        self
    }

    /// Seconds since the rate was fetched
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.fetched_at).num_seconds()
    }
}

/// Audit record of a conversion applied to a transaction.
///
/// Write-once except `fiscal_document`, which is attached at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyConversion {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub original: Money,
    pub rate_id: Uuid,
    pub rate: Decimal,
    /// Converted amount, in settlement currency
    pub converted: Money,
    pub tax: Money,
    pub stale: bool,
    pub fiscal_document: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Rate persistence. History is append-only.
#[async_trait]
pub trait ExchangeRateRepository: Send + Sync {
    /// Insert a rate, deactivating the active one for the same
    /// `(currency, rate_date)`.
    async fn save(&self, rate: ExchangeRate) -> GatewayResult<ExchangeRate>;

    async fn get_active(&self, currency: Currency, date: NaiveDate) -> GatewayResult<Option<ExchangeRate>>;

    /// Most recent active rate, any date
    async fn latest(&self, currency: Currency) -> GatewayResult<Option<ExchangeRate>>;

    /// Save a batch as one unit: either every rate becomes active or none.
    async fn replace_active(&self, rates: Vec<ExchangeRate>) -> GatewayResult<()>;

    /// Every rate ever saved for `(currency, date)`, oldest first
    async fn history(&self, currency: Currency, date: NaiveDate) -> GatewayResult<Vec<ExchangeRate>>;
}

/// Conversion audit persistence
#[async_trait]
pub trait ConversionRepository: Send + Sync {
    /// Fails with `Conflict` when the transaction already has a conversion
    async fn create(&self, conversion: CurrencyConversion) -> GatewayResult<()>;

    async fn get(&self, id: Uuid) -> GatewayResult<Option<CurrencyConversion>>;

    async fn find_by_transaction(&self, transaction_id: Uuid) -> GatewayResult<Option<CurrencyConversion>>;

    /// Set the fiscal document once; fails with `Conflict` afterwards
    async fn attach_fiscal_document(&self, id: Uuid, reference: &str) -> GatewayResult<CurrencyConversion>;
}

/// Conversion into settlement currency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionQuote {
    pub original: Money,
    pub rate: ExchangeRate,
    pub converted: Money,
    pub tax: Money,
    /// Converted plus tax
    pub total: Money,
    /// Rate older than the freshness window
    pub stale: bool,
    /// Audit record id, when tied to a transaction
    pub conversion_id: Option<Uuid>,
}

/// Exchange service settings
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeConfig {
    pub settlement_currency: Currency,
    pub rate_freshness: Duration,
    pub max_rate_staleness: Duration,
    pub cache_ttl: Duration,
    /// Cache lifetime of a stored rate used because the source failed
    pub fallback_cache_ttl: Duration,
    /// Fraction of the converted amount
    pub tax_rate: Decimal,
    pub source_timeout: Duration,
    pub tracked_currencies: Vec<Currency>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            settlement_currency: Currency::DOP,
            rate_freshness: Duration::from_secs(12 * 3600),
            max_rate_staleness: Duration::from_secs(24 * 3600),
            cache_ttl: Duration::from_secs(3600),
            fallback_cache_ttl: Duration::from_secs(60),
            tax_rate: Decimal::new(15, 4),
            source_timeout: Duration::from_secs(5),
            tracked_currencies: vec![Currency::USD, Currency::EUR],
        }
    }
}

/// Authoritative rates and recorded conversions
pub struct ExchangeRateService {
    config: ExchangeConfig,
    rates: Arc<dyn ExchangeRateRepository>,
    conversions: Arc<dyn ConversionRepository>,
    source: Option<Arc<dyn RateSource>>,
    cache: RateCache,
}

impl ExchangeRateService {
    pub fn new(
        config: ExchangeConfig,
        rates: Arc<dyn ExchangeRateRepository>,
        conversions: Arc<dyn ConversionRepository>,
    ) -> Self {
        Self {
            cache: RateCache::new(config.cache_ttl),
            config,
            rates,
            conversions,
            source: None,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn RateSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn settlement_currency(&self) -> Currency {
        self.config.settlement_currency
    }

    pub fn cache(&self) -> &RateCache {
        &self.cache
    }

    /// Current rate: cache, then today's stored rate, then the central
    /// source, then the latest stored rate of any date.
    pub async fn get_current_rate(&self, currency: Currency) -> GatewayResult<ExchangeRate> {
        if currency == self.config.settlement_currency {
            return Err(GatewayError::Validation(format!(
                "{} is the settlement currency",
                currency
            )));
        }

        if let Some(rate) = self.cache.get(currency) {
            return Ok(rate);
        }

        let today = Utc::now().date_naive();
        if let Some(rate) = self.rates.get_active(currency, today).await? {
            self.cache.put(rate.clone());
            return Ok(rate);
        }

        if let Some(source) = &self.source {
            match self.fetch_from_source(source.as_ref(), &[currency]).await {
                Ok(fetched) => {
                    if let Some(quoted) = fetched.into_iter().find(|q| q.currency == currency) {
                        let rate = self
                            .rates
                            .save(ExchangeRate::new(currency, quoted.buy_rate, source.name()).with_date(quoted.rate_date))
                            .await?;
                        self.cache.put(rate.clone());
                        return Ok(rate);
                    }
                    tracing::warn!(currency = %currency, "Central bank returned no rate");
                }
                Err(e) => {
                    tracing::warn!(currency = %currency, error = %e, "Central bank fetch failed, using stored rate");
                }
            }
        }

        match self.rates.latest(currency).await? {
            Some(rate) => {
                tracing::info!(
                    currency = %currency,
                    rate_date = %rate.rate_date,
                    "No rate for today, falling back to latest stored rate"
                );
                let ttl = self.config.fallback_cache_ttl.min(self.config.cache_ttl);
                self.cache.put_for(rate.clone(), ttl);
                Ok(rate)
            }
            None => Err(GatewayError::RateUnavailable(currency)),
        }
    }

    async fn fetch_from_source(
        &self,
        source: &dyn RateSource,
        currencies: &[Currency],
    ) -> GatewayResult<Vec<QuotedRate>> {
        tokio::time::timeout(self.config.source_timeout, source.fetch_rates(currencies)).await?
    }

    /// Reject rates past the maximum staleness; report whether the rate
    /// is past the freshness window.
    fn check_staleness(&self, rate: &ExchangeRate, now: DateTime<Utc>) -> GatewayResult<bool> {
        let age_secs = rate.age_secs(now);
        if age_secs > self.config.max_rate_staleness.as_secs() as i64 {
            return Err(GatewayError::StaleRateRejected {
                currency: rate.currency,
                age_secs,
            });
        }
        Ok(age_secs > self.config.rate_freshness.as_secs() as i64)
    }

    /// Convert into settlement currency with tax.
    ///
    /// With a `transaction_id` the conversion is recorded for audit and
    /// the quote carries the record id.
    pub async fn convert_to_settlement(
        &self,
        amount: Money,
        transaction_id: Option<Uuid>,
    ) -> GatewayResult<ConversionQuote> {
        let settlement = self.config.settlement_currency;
        let rate = self.get_current_rate(amount.currency).await?;
        let now = Utc::now();
        let stale = self.check_staleness(&rate, now)?;

        let converted = Money::from_decimal(amount.to_decimal() * rate.buy_rate, settlement)
            .ok_or_else(|| GatewayError::Validation(format!("{} is too large to convert", amount)))?;
        let tax = Money::from_decimal(converted.to_decimal() * self.config.tax_rate, settlement)
            .ok_or_else(|| GatewayError::Validation("tax overflow".into()))?;
        let total = converted
            .checked_add(tax)
            .ok_or_else(|| GatewayError::Validation("total overflow".into()))?;

        let mut quote = ConversionQuote {
            original: amount,
            rate,
            converted,
            tax,
            total,
            stale,
            conversion_id: None,
        };

        if let Some(transaction_id) = transaction_id {
            let conversion = CurrencyConversion {
                id: Uuid::new_v4(),
                transaction_id,
                original: amount,
                rate_id: quote.rate.id,
                rate: quote.rate.buy_rate,
                converted,
                tax,
                stale,
                fiscal_document: None,
                created_at: now,
            };
            let conversion_id = conversion.id;
            self.conversions.create(conversion).await?;

            tracing::info!(
                target: targets::AUDIT,
                transaction_id = %transaction_id,
                conversion_id = %conversion_id,
                original = %amount,
                rate = %quote.rate.buy_rate,
                converted = %converted,
                tax = %tax,
                stale,
                "Currency conversion recorded"
            );
            quote.conversion_id = Some(conversion_id);
        }

        Ok(quote)
    }

    /// Convert a settlement amount into `target` at the current rate.
    pub async fn convert_from_settlement(&self, amount: Money, target: Currency) -> GatewayResult<Money> {
        if amount.currency != self.config.settlement_currency {
            return Err(GatewayError::Validation(format!(
                "{} is not in settlement currency",
                amount
            )));
        }
        let rate = self.get_current_rate(target).await?;
        self.check_staleness(&rate, Utc::now())?;

        let value = amount
            .to_decimal()
            .checked_div(rate.buy_rate)
            .ok_or_else(|| GatewayError::Validation(format!("invalid rate for {}", target)))?
            .round_dp_with_strategy(target.decimals(), RoundingStrategy::MidpointAwayFromZero);

        Money::from_decimal(value, target)
            .ok_or_else(|| GatewayError::Validation(format!("{} is too large to convert", amount)))
    }

    /// Pull today's rates for every tracked currency and activate them
    /// together. A partial answer changes nothing.
    pub async fn refresh_rates_from_central_source(&self) -> GatewayResult<Vec<ExchangeRate>> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| GatewayError::Config("no central bank source configured".into()))?;

        let tracked = &self.config.tracked_currencies;
        let fetched = self.fetch_from_source(source.as_ref(), tracked).await?;

        let mut rates = Vec::with_capacity(tracked.len());
        for currency in tracked {
            let quoted = fetched
                .iter()
                .find(|q| q.currency == *currency)
                .ok_or(GatewayError::RateUnavailable(*currency))?;
            rates.push(ExchangeRate::new(*currency, quoted.buy_rate, source.name()).with_date(quoted.rate_date));
        }

        self.rates.replace_active(rates.clone()).await?;
        for rate in &rates {
            self.cache.put(rate.clone());
        }

        tracing::info!(count = rates.len(), source = source.name(), "Exchange rates refreshed");
        Ok(rates)
    }

    /// Attach the compliance document to a recorded conversion
    pub async fn attach_fiscal_document(
        &self,
        conversion_id: Uuid,
        reference: &str,
    ) -> GatewayResult<CurrencyConversion> {
        if reference.trim().is_empty() {
            return Err(GatewayError::Validation("fiscal document reference is empty".into()));
        }
        self.conversions.attach_fiscal_document(conversion_id, reference).await
    }

    pub async fn conversion_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> GatewayResult<Option<CurrencyConversion>> {
        self.conversions.find_by_transaction(transaction_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryConversionRepository, InMemoryExchangeRateRepository};
    use rust_decimal_macros::dec;

    fn service() -> (ExchangeRateService, Arc<InMemoryExchangeRateRepository>) {
        let rates = Arc::new(InMemoryExchangeRateRepository::new());
        let service = ExchangeRateService::new(
            ExchangeConfig::default(),
            rates.clone(),
            Arc::new(InMemoryConversionRepository::new()),
        );
        (service, rates)
    }

    #[tokio::test]
    async fn test_conversion_with_tax() {
        let (service, rates) = service();
        rates.save(ExchangeRate::new(Currency::USD, dec!(58.95), "test")).await.unwrap();

        let quote = service
            .convert_to_settlement(Money::new(10_000, Currency::USD), None)
            .await
            .unwrap();

        assert_eq!(quote.converted, Money::new(589_500, Currency::DOP));
        // 0.15% of 5895.00 = 8.8425, rounded to 8.84
        assert_eq!(quote.tax, Money::new(884, Currency::DOP));
        assert_eq!(quote.total, Money::new(590_384, Currency::DOP));
        assert!(!quote.stale);
        assert!(quote.conversion_id.is_none());
    }

    #[tokio::test]
    async fn test_staleness_windows() {
        let (service, rates) = service();
        let fetched = Utc::now() - chrono::Duration::hours(13);
        rates
            .save(ExchangeRate::new(Currency::USD, dec!(58.95), "test").fetched_at(fetched))
            .await
            .unwrap();

        let quote = service
            .convert_to_settlement(Money::new(100, Currency::USD), None)
            .await
            .unwrap();
        assert!(quote.stale);

        let too_old = Utc::now() - chrono::Duration::hours(25);
        rates
            .save(ExchangeRate::new(Currency::EUR, dec!(64.10), "test").fetched_at(too_old))
            .await
            .unwrap();
        let result = service
            .convert_to_settlement(Money::new(100, Currency::EUR), None)
            .await;
        assert!(matches!(
            result,
            Err(GatewayError::StaleRateRejected {
                currency: Currency::EUR,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_missing_rate() {
        let (service, _) = service();
        let result = service.get_current_rate(Currency::USD).await;
        assert!(matches!(result, Err(GatewayError::RateUnavailable(Currency::USD))));

        let settlement = service.get_current_rate(Currency::DOP).await;
        assert!(matches!(settlement, Err(GatewayError::Validation(_))));
    }

    #[tokio::test]
    async fn test_inverse_conversion() {
        let (service, rates) = service();
        rates.save(ExchangeRate::new(Currency::USD, dec!(58.95), "test")).await.unwrap();

        let usd = service
            .convert_from_settlement(Money::new(589_500, Currency::DOP), Currency::USD)
            .await
            .unwrap();
        assert_eq!(usd, Money::new(10_000, Currency::USD));

        let wrong = service
            .convert_from_settlement(Money::new(100, Currency::USD), Currency::EUR)
            .await;
        assert!(wrong.is_err());
    }

    struct FailingSource {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl RateSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        async fn fetch_rates(&self, _currencies: &[Currency]) -> GatewayResult<Vec<QuotedRate>> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(GatewayError::ProviderUnavailable("connection refused".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_rate_cached_during_outage() {
        let rates = Arc::new(InMemoryExchangeRateRepository::new());
        let source = Arc::new(FailingSource {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let service = ExchangeRateService::new(
            ExchangeConfig::default(),
            rates.clone(),
            Arc::new(InMemoryConversionRepository::new()),
        )
        .with_source(source.clone());

        let yesterday = Utc::now().date_naive().pred_opt().unwrap();
        rates
            .save(ExchangeRate::new(Currency::USD, dec!(58.70), "test").with_date(yesterday))
            .await
            .unwrap();

        for _ in 0..3 {
            let rate = service.get_current_rate(Currency::USD).await.unwrap();
            assert_eq!(rate.buy_rate, dec!(58.70));
        }
        assert_eq!(source.calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        service.get_current_rate(Currency::USD).await.unwrap();
        assert_eq!(source.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_without_source() {
        let (service, _) = service();
        assert!(matches!(
            service.refresh_rates_from_central_source().await,
            Err(GatewayError::Config(_))
        ));
    }
}
