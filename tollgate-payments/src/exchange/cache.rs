//! In-process rate cache, the first tier of rate lookup.

use super::ExchangeRate;
use crate::money::Currency;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

struct CacheEntry {
    rate: ExchangeRate,
    expires_at: Instant,
}

/// Rates keyed by currency, each expiring after a fixed TTL
pub struct RateCache {
    entries: RwLock<HashMap<Currency, CacheEntry>>,
    ttl: Duration,
}

impl RateCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn get(&self, currency: Currency) -> Option<ExchangeRate> {
        let entries = self.entries.read();
        let entry = entries.get(&currency)?;
        if Instant::now() >= entry.expires_at {
            return None;
        }
        Some(entry.rate.clone())
    }

    pub fn put(&self, rate: ExchangeRate) {
        self.put_for(rate, self.ttl);
    }

    /// Cache with a lifetime other than the default TTL
    pub fn put_for(&self, rate: ExchangeRate, ttl: Duration) {
        let entry = CacheEntry {
            expires_at: Instant::now() + ttl,
            rate,
        };
        self.entries.write().insert(entry.rate.currency, entry);
    }

    pub fn invalidate(&self, currency: Currency) {
        self.entries.write().remove(&currency);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Drop expired entries
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = RateCache::new(Duration::from_secs(60));
        cache.put(ExchangeRate::new(Currency::USD, dec!(58.95), "test"));

        assert!(cache.get(Currency::USD).is_some());
        assert!(cache.get(Currency::EUR).is_none());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get(Currency::USD).is_none());
        assert_eq!(cache.cleanup_expired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_for_overrides_ttl() {
        let cache = RateCache::new(Duration::from_secs(3600));
        cache.put_for(ExchangeRate::new(Currency::EUR, dec!(64.10), "test"), Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cache.get(Currency::EUR).is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.get(Currency::EUR).is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_and_invalidate_removes() {
        let cache = RateCache::new(Duration::from_secs(60));
        cache.put(ExchangeRate::new(Currency::USD, dec!(58.95), "test"));
        cache.put(ExchangeRate::new(Currency::USD, dec!(59.10), "test"));

        assert_eq!(cache.get(Currency::USD).unwrap().buy_rate, dec!(59.10));

        cache.invalidate(Currency::USD);
        assert!(cache.get(Currency::USD).is_none());
    }
}
