//! Gateway provider abstraction
//!
//! Each external processor implements [`GatewayProvider`]. Providers are
//! built once at startup, registered into a [`GatewayRegistry`] and shared
//! read-only afterwards.

mod availability;
mod factory;
mod registry;

pub use availability::{GatewayAvailabilityService, new_payers_flag};
pub use factory::{GatewayCost, GatewayFactory, GatewayStats};
pub use registry::GatewayRegistry;

use crate::{
    error::{GatewayError, GatewayResult},
    money::{Currency, Money},
    transaction::TransactionStatus,
    types::{CardBrand, CardDetails},
    webhook::WebhookEvent,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// External processor identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayId {
    /// Bank-direct acquirer (Banco Popular)
    Azul,
    /// Bank-direct acquirer network
    CardNet,
    /// Regional fintech aggregator
    PixelPay,
    /// International aggregator
    Stripe,
}

impl GatewayId {
    pub const ALL: [GatewayId; 4] = [
        GatewayId::Azul,
        GatewayId::CardNet,
        GatewayId::PixelPay,
        GatewayId::Stripe,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Azul => "azul",
            Self::CardNet => "cardnet",
            Self::PixelPay => "pixelpay",
            Self::Stripe => "stripe",
        }
    }
}

impl FromStr for GatewayId {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| GatewayError::Config(format!("unknown gateway: {}", s)))
    }
}

impl fmt::Display for GatewayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of institution behind a gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayCategory {
    BankDirect,
    Aggregator,
    Fintech,
}

/// Payment method kinds a gateway accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodKind {
    Card,
    BankTransfer,
    Wallet,
}

/// What a gateway can do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCapabilities {
    pub supports_tokenization: bool,
    pub currencies: Vec<Currency>,
    pub payment_methods: Vec<PaymentMethodKind>,
}

impl GatewayCapabilities {
    pub fn supports_currency(&self, currency: Currency) -> bool {
        self.currencies.contains(&currency)
    }

    pub fn supports_method(&self, kind: PaymentMethodKind) -> bool {
        self.payment_methods.contains(&kind)
    }
}

/// Instrument forwarded to the provider
#[derive(Debug, Clone)]
pub enum ChargeSource {
    Card(CardDetails),
    /// Provider-side token from an earlier tokenization
    Token(String),
}

/// Charge as sent to a provider
#[derive(Debug, Clone)]
pub struct ProviderCharge {
    /// Internal transaction id, echoed back by webhooks and status queries
    pub reference: String,
    pub amount: Money,
    pub source: ChargeSource,
    pub payer_id: String,
    pub description: Option<String>,
    /// Merchant-initiated recurring collection
    pub recurring: bool,
    /// Capture immediately; `false` only authorizes
    pub capture: bool,
}

/// Refund as sent to a provider
#[derive(Debug, Clone)]
pub struct ProviderRefund {
    pub reference: String,
    pub external_id: String,
    pub amount: Money,
    pub reason: Option<String>,
}

/// Provider answer to a money-moving call or status query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReceipt {
    pub external_id: String,
    pub status: TransactionStatus,
    pub response_code: Option<String>,
    pub message: Option<String>,
    pub authorization_code: Option<String>,
    pub amount: Option<Money>,
    pub commission: Option<Money>,
    pub net_amount: Option<Money>,
}

impl ProviderReceipt {
    pub fn new(external_id: impl Into<String>, status: TransactionStatus) -> Self {
        Self {
            external_id: external_id.into(),
            status,
            response_code: None,
            message: None,
            authorization_code: None,
            amount: None,
            commission: None,
            net_amount: None,
        }
    }

    pub fn with_response(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.response_code = Some(code.into());
        self.message = Some(message.into());
        self
    }
}

/// Result of a provider-side tokenization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedCard {
    pub token: String,
    pub brand: CardBrand,
    pub last4: String,
    pub exp_month: u8,
    pub exp_year: u16,
}

impl TokenizedCard {
    /// Describe a card under a provider token
    pub fn from_card(token: impl Into<String>, card: &CardDetails) -> Self {
        Self {
            token: token.into(),
            brand: card.brand(),
            last4: card.last4(),
            exp_month: card.exp_month,
            exp_year: card.exp_year,
        }
    }
}

/// Gateway provider trait
///
/// Implement this trait for each external processor. Declines are
/// reported as [`GatewayError::ProviderDeclined`]; transport failures as
/// [`GatewayError::Timeout`] or [`GatewayError::ProviderUnavailable`].
#[async_trait]
pub trait GatewayProvider: Send + Sync {
    fn id(&self) -> GatewayId;

    fn display_name(&self) -> &str;

    fn category(&self) -> GatewayCategory;

    fn capabilities(&self) -> &GatewayCapabilities;

    /// Liveness probe
    async fn health_check(&self) -> bool;

    /// Configuration problems; empty when usable
    fn validate_configuration(&self) -> Vec<String>;

    /// Charge, or authorize only when `capture` is false
    async fn charge(&self, request: &ProviderCharge) -> GatewayResult<ProviderReceipt>;

    /// Authorize without capturing
    async fn authorize(&self, request: &ProviderCharge) -> GatewayResult<ProviderReceipt> {
        let request = ProviderCharge {
            capture: false,
            ..request.clone()
        };
        self.charge(&request).await
    }

    /// Capture a previous authorization
    async fn capture(&self, external_id: &str, amount: Money) -> GatewayResult<ProviderReceipt>;

    async fn refund(&self, request: &ProviderRefund) -> GatewayResult<ProviderReceipt>;

    /// Exchange card data for a reusable token
    async fn tokenize(&self, payer_id: &str, card: &CardDetails) -> GatewayResult<TokenizedCard>;

    /// Look up a charge by internal reference. `Ok(None)` when the
    /// provider never received it.
    async fn query_status(&self, reference: &str) -> GatewayResult<Option<ProviderReceipt>>;

    /// Verify a webhook signature
    fn verify_webhook(&self, payload: &[u8], signature: &str) -> GatewayResult<()>;

    /// Parse a verified payload. `Ok(None)` for events that do not
    /// concern a transaction.
    fn parse_webhook(&self, payload: &[u8]) -> GatewayResult<Option<WebhookEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_id_round_trip() {
        for id in GatewayId::ALL {
            assert_eq!(id.as_str().parse::<GatewayId>().unwrap(), id);
        }
        assert_eq!("AZUL".parse::<GatewayId>().unwrap(), GatewayId::Azul);
        assert!("paypal".parse::<GatewayId>().is_err());
        assert_eq!(serde_json::to_string(&GatewayId::CardNet).unwrap(), "\"cardnet\"");
    }

    #[test]
    fn test_capabilities() {
        let caps = GatewayCapabilities {
            supports_tokenization: true,
            currencies: vec![Currency::DOP],
            payment_methods: vec![PaymentMethodKind::Card],
        };
        assert!(caps.supports_currency(Currency::DOP));
        assert!(!caps.supports_currency(Currency::USD));
        assert!(!caps.supports_method(PaymentMethodKind::Wallet));
    }
}
