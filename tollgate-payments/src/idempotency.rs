//! Request deduplication by caller-supplied key

use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use std::future::Future;

/// Unique `(key, payer)` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub key: String,
    pub payer_id: String,
}

impl IdempotencyKey {
    pub fn new(key: impl Into<String>, payer_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            payer_id: payer_id.into(),
        }
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.payer_id, self.key)
    }
}

/// Operation a key was first used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotentOperation {
    Charge,
    Refund,
}

impl fmt::Display for IdempotentOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Charge => "charge",
            Self::Refund => "refund",
        })
    }
}

/// Stored state of a key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub operation: IdempotentOperation,
    pub is_processing: bool,
    /// Serialized response, set once the attempt completes
    pub response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn processing(key: IdempotencyKey, operation: IdempotentOperation, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            key,
            operation,
            is_processing: true,
            response: None,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Result of claiming a key
#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// Key was free and is now held by the caller
    Started,
    /// Another attempt holds the key
    InFlight(IdempotencyRecord),
    /// An earlier attempt finished
    Completed(IdempotencyRecord),
}

/// Idempotency record persistence.
///
/// `begin` must be atomic: of two concurrent callers with the same key,
/// exactly one observes [`BeginOutcome::Started`]. Expired records count
/// as absent.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn begin(
        &self,
        key: &IdempotencyKey,
        operation: IdempotentOperation,
        ttl: Duration,
    ) -> GatewayResult<BeginOutcome>;

    /// Store the final response and clear the processing flag
    async fn complete(&self, key: &IdempotencyKey, response: serde_json::Value)
    -> GatewayResult<()>;

    /// Drop a held key so the caller may retry
    async fn release(&self, key: &IdempotencyKey) -> GatewayResult<()>;

    async fn get(&self, key: &IdempotencyKey) -> GatewayResult<Option<IdempotencyRecord>>;

    /// Remove expired records, returning how many were removed
    async fn purge_expired(&self) -> GatewayResult<usize>;
}

/// Run `f` at most once per key.
///
/// A completed key replays its stored response; a held key fails with
/// [`GatewayError::Conflict`]. Errors from `f` release the key.
pub(crate) async fn run_idempotent<T, F, Fut>(
    store: &dyn IdempotencyStore,
    key: &IdempotencyKey,
    operation: IdempotentOperation,
    ttl: Duration,
    f: F,
) -> GatewayResult<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
{
    match store.begin(key, operation, ttl).await? {
        BeginOutcome::Started => {}
        BeginOutcome::InFlight(record) => {
            check_operation(&record, operation)?;
            return Err(GatewayError::Conflict(format!(
                "request {} is still being processed",
                key.key
            )));
        }
        BeginOutcome::Completed(record) => {
            check_operation(&record, operation)?;
            tracing::debug!(key = %key, "Replaying stored response");
            let response = record.response.ok_or_else(|| {
                GatewayError::Storage(format!("completed key {} has no response", key))
            })?;
            return Ok(serde_json::from_value(response)?);
        }
    }

    match f().await {
        Ok(value) => {
            let stored = serde_json::to_value(&value)?;
            if let Err(e) = store.complete(key, stored).await {
                tracing::error!(key = %key, error = %e, "Failed to finalize idempotency record");
            }
            Ok(value)
        }
        Err(err) => {
            if let Err(e) = store.release(key).await {
                tracing::error!(key = %key, error = %e, "Failed to release idempotency record");
            }
            Err(err)
        }
    }
}

/// Poll a held key for up to `wait`, returning the stored response once
/// the holder completes. `None` when the key is released or still held.
pub(crate) async fn await_completion<T: DeserializeOwned>(
    store: &dyn IdempotencyStore,
    key: &IdempotencyKey,
    wait: std::time::Duration,
) -> GatewayResult<Option<T>> {
    const POLL: std::time::Duration = std::time::Duration::from_millis(25);
    let deadline = tokio::time::Instant::now() + wait;

    loop {
        match store.get(key).await? {
            Some(record) if !record.is_processing => {
                return match record.response {
                    Some(response) => Ok(Some(serde_json::from_value(response)?)),
                    None => Ok(None),
                };
            }
            Some(_) => {}
            None => return Ok(None),
        }

        if tokio::time::Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(POLL).await;
    }
}

fn check_operation(record: &IdempotencyRecord, operation: IdempotentOperation) -> GatewayResult<()> {
    if record.operation != operation {
        return Err(GatewayError::Validation(format!(
            "idempotency key {} was used for a {}",
            record.key.key, record.operation
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryIdempotencyStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ttl() -> Duration {
        Duration::hours(24)
    }

    #[tokio::test]
    async fn test_runs_once_and_replays() {
        let store = InMemoryIdempotencyStore::new();
        let key = IdempotencyKey::new("k1", "payer-1");
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: u32 = run_idempotent(&store, &key, IdempotentOperation::Charge, ttl(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            })
            .await
            .unwrap();
            assert_eq!(value, 42);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_releases_key() {
        let store = InMemoryIdempotencyStore::new();
        let key = IdempotencyKey::new("k1", "payer-1");

        let failed: GatewayResult<u32> =
            run_idempotent(&store, &key, IdempotentOperation::Charge, ttl(), || async {
                Err(GatewayError::RateUnavailable(crate::money::Currency::USD))
            })
            .await;
        assert!(failed.is_err());
        assert!(store.get(&key).await.unwrap().is_none());

        let retried: u32 = run_idempotent(&store, &key, IdempotentOperation::Charge, ttl(), || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(retried, 7);
    }

    #[tokio::test]
    async fn test_in_flight_is_conflict() {
        let store = InMemoryIdempotencyStore::new();
        let key = IdempotencyKey::new("k1", "payer-1");
        store.begin(&key, IdempotentOperation::Charge, ttl()).await.unwrap();

        let result: GatewayResult<u32> =
            run_idempotent(&store, &key, IdempotentOperation::Charge, ttl(), || async { Ok(1) }).await;
        assert!(matches!(result, Err(GatewayError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_await_completion_sees_stored_response() {
        let store = InMemoryIdempotencyStore::new();
        let key = IdempotencyKey::new("k1", "payer-1");
        store.begin(&key, IdempotentOperation::Charge, ttl()).await.unwrap();

        let wait = std::time::Duration::from_millis(100);
        let pending: Option<u32> = await_completion(&store, &key, wait).await.unwrap();
        assert_eq!(pending, None);

        store.complete(&key, serde_json::json!(9)).await.unwrap();
        let done: Option<u32> = await_completion(&store, &key, wait).await.unwrap();
        assert_eq!(done, Some(9));
    }

    #[tokio::test]
    async fn test_key_reused_for_other_operation() {
        let store = InMemoryIdempotencyStore::new();
        let key = IdempotencyKey::new("k1", "payer-1");
        let _: u32 = run_idempotent(&store, &key, IdempotentOperation::Charge, ttl(), || async { Ok(1) })
            .await
            .unwrap();

        let result: GatewayResult<u32> =
            run_idempotent(&store, &key, IdempotentOperation::Refund, ttl(), || async { Ok(2) }).await;
        assert!(matches!(result, Err(GatewayError::Validation(_))));
    }

    #[tokio::test]
    async fn test_keys_are_scoped_per_payer() {
        let store = InMemoryIdempotencyStore::new();
        let a: u32 = run_idempotent(
            &store,
            &IdempotencyKey::new("k1", "payer-1"),
            IdempotentOperation::Charge,
            ttl(),
            || async { Ok(1) },
        )
        .await
        .unwrap();
        let b: u32 = run_idempotent(
            &store,
            &IdempotencyKey::new("k1", "payer-2"),
            IdempotentOperation::Charge,
            ttl(),
            || async { Ok(2) },
        )
        .await
        .unwrap();
        assert_eq!((a, b), (1, 2));
    }
}
