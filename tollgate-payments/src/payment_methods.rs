//! Saved (tokenized) payment methods

use crate::{error::GatewayResult, gateway::GatewayId, types::CardBrand};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tokenized instrument saved for a payer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedPaymentMethod {
    pub id: Uuid,
    pub payer_id: String,
    /// Gateway holding the token; charges always go there
    pub gateway: GatewayId,
    /// Opaque provider token
    pub token: String,
    pub brand: CardBrand,
    pub last4: String,
    pub exp_month: u8,
    pub exp_year: u16,
    pub is_default: bool,
    pub usage_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl SavedPaymentMethod {
    pub fn new(
        payer_id: impl Into<String>,
        gateway: GatewayId,
        token: impl Into<String>,
        brand: CardBrand,
        last4: impl Into<String>,
        exp_month: u8,
        exp_year: u16,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payer_id: payer_id.into(),
            gateway,
            token: token.into(),
            brand,
            last4: last4.into(),
            exp_month,
            exp_year,
            is_default: false,
            usage_count: 0,
            last_used_at: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Same card as described by the de-duplication guard
    pub fn is_similar(&self, fingerprint: &CardFingerprint) -> bool {
        self.active
            && self.last4 == fingerprint.last4
            && self.brand == fingerprint.brand
            && self.exp_month == fingerprint.exp_month
            && self.exp_year == fingerprint.exp_year
    }
}

/// Card attributes compared to detect an already-saved instrument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardFingerprint {
    pub last4: String,
    pub brand: CardBrand,
    pub exp_month: u8,
    pub exp_year: u16,
}

/// Saved method persistence.
///
/// At most one active method per payer is default. `create` with
/// `is_default` and `set_as_default` clear the previous default in the
/// same critical section.
#[async_trait]
pub trait PaymentMethodStore: Send + Sync {
    async fn create(&self, method: SavedPaymentMethod) -> GatewayResult<SavedPaymentMethod>;

    async fn get(&self, id: Uuid) -> GatewayResult<Option<SavedPaymentMethod>>;

    /// Active methods, default first then newest
    async fn list_for_payer(&self, payer_id: &str) -> GatewayResult<Vec<SavedPaymentMethod>>;

    async fn get_default(&self, payer_id: &str) -> GatewayResult<Option<SavedPaymentMethod>>;

    /// Make `id` the payer's only default. Fails with `NotFound` when the
    /// method is missing, inactive or owned by someone else.
    async fn set_as_default(&self, id: Uuid, payer_id: &str) -> GatewayResult<SavedPaymentMethod>;

    async fn find_similar(
        &self,
        payer_id: &str,
        fingerprint: &CardFingerprint,
    ) -> GatewayResult<Option<SavedPaymentMethod>>;

    async fn exists_similar(&self, payer_id: &str, fingerprint: &CardFingerprint) -> GatewayResult<bool> {
        Ok(self.find_similar(payer_id, fingerprint).await?.is_some())
    }

    /// Count a successful charge
    async fn record_usage(&self, id: Uuid, used_at: DateTime<Utc>) -> GatewayResult<()>;

    /// Soft delete. When the method was the default, the payer's most
    /// recently added active method becomes the default in the same write;
    /// its id is returned.
    async fn deactivate(&self, id: Uuid) -> GatewayResult<Option<Uuid>>;

    /// Hard delete; only when no transaction references the method.
    /// Promotes a new default like [`deactivate`](Self::deactivate).
    async fn delete(&self, id: Uuid) -> GatewayResult<Option<Uuid>>;
}
