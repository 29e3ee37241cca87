//! Flag store backends.

use crate::{FeatureFlag, FlagError, FlagResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

/// Source of truth for feature flags.
#[async_trait]
pub trait FlagStore: Send + Sync {
    /// Fetch one flag. `Ok(None)` means the store has no such flag.
    async fn get_flag(&self, key: &str) -> FlagResult<Option<FeatureFlag>>;

    /// Fetch every flag the store knows.
    async fn list_flags(&self) -> FlagResult<Vec<FeatureFlag>>;

    /// Whether a flag is on. `Ok(None)` when the flag is unknown.
    async fn is_enabled(&self, key: &str) -> FlagResult<Option<bool>> {
        Ok(self.get_flag(key).await?.map(|flag| flag.enabled))
    }
}

/// Process-local store, used in tests and single-node deployments.
#[derive(Clone, Default)]
pub struct InMemoryFlagStore {
    flags: Arc<RwLock<HashMap<String, FeatureFlag>>>,
}

impl InMemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a flag
    pub async fn upsert(&self, flag: FeatureFlag) {
        self.flags.write().await.insert(flag.key.clone(), flag);
    }

    /// Set a flag's state, creating it when missing
    pub async fn set(&self, key: &str, enabled: bool) {
        let mut flags = self.flags.write().await;
        flags
            .entry(key.to_string())
            .or_insert_with(|| FeatureFlag::boolean(key, enabled))
            .set(enabled);
    }

    /// Remove a flag, returning whether it existed
    pub async fn remove(&self, key: &str) -> bool {
        self.flags.write().await.remove(key).is_some()
    }
}

#[async_trait]
impl FlagStore for InMemoryFlagStore {
    async fn get_flag(&self, key: &str) -> FlagResult<Option<FeatureFlag>> {
        Ok(self.flags.read().await.get(key).cloned())
    }

    async fn list_flags(&self) -> FlagResult<Vec<FeatureFlag>> {
        let mut flags: Vec<FeatureFlag> = self.flags.read().await.values().cloned().collect();
        flags.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(flags)
    }
}

/// Remote flag service over HTTP.
///
/// `GET {base}/flags/{key}` answers a [`FeatureFlag`] or 404;
/// `GET {base}/flags` answers the full list.
pub struct HttpFlagStore {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpFlagStore {
    /// Create a store with a per-request timeout
    pub fn new(base_url: &str, timeout: Duration) -> FlagResult<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FlagError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    fn map_send_error(&self, err: reqwest::Error) -> FlagError {
        if err.is_timeout() {
            FlagError::Timeout(self.timeout.as_millis() as u64)
        } else {
            err.into()
        }
    }
}

#[async_trait]
impl FlagStore for HttpFlagStore {
    async fn get_flag(&self, key: &str) -> FlagResult<Option<FeatureFlag>> {
        let url = self.base_url.join("flags/")?.join(key)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(FlagError::Unavailable(format!("flag store answered {}", status))),
        }
    }

    async fn list_flags(&self) -> FlagResult<Vec<FeatureFlag>> {
        let url = self.base_url.join("flags")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(FlagError::Unavailable(format!(
                "flag store answered {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_set_and_get() {
        let store = InMemoryFlagStore::new();
        assert_eq!(store.is_enabled("a").await.unwrap(), None);

        store.set("a", true).await;
        assert_eq!(store.is_enabled("a").await.unwrap(), Some(true));

        store.set("a", false).await;
        assert_eq!(store.is_enabled("a").await.unwrap(), Some(false));
    }

    #[tokio::test]
    async fn test_in_memory_list_is_sorted() {
        let store = InMemoryFlagStore::new();
        store.upsert(FeatureFlag::boolean("b", true)).await;
        store.upsert(FeatureFlag::boolean("a", false)).await;

        let keys: Vec<String> = store
            .list_flags()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.key)
            .collect();
        assert_eq!(keys, vec!["a", "b"]);

        assert!(store.remove("a").await);
        assert!(!store.remove("a").await);
    }

    #[test]
    fn test_http_store_rejects_bad_url() {
        assert!(matches!(
            HttpFlagStore::new("not a url", Duration::from_millis(100)),
            Err(FlagError::Config(_))
        ));
    }
}
