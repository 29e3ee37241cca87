//! Request and response types for the caller-facing operations

use crate::{
    error::{GatewayError, GatewayResult},
    gateway::GatewayId,
    money::{Currency, Money},
    transaction::TransactionStatus,
};
use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Card brand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardBrand {
    Visa,
    Mastercard,
    Amex,
    Discover,
    Unknown,
}

impl CardBrand {
    /// Detect the brand from the card number prefix
    pub fn from_number(number: &str) -> Self {
        let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
        let prefix2: u32 = digits.get(..2).and_then(|p| p.parse().ok()).unwrap_or(0);
        let prefix4: u32 = digits.get(..4).and_then(|p| p.parse().ok()).unwrap_or(0);

        if digits.starts_with('4') {
            Self::Visa
        } else if (51..=55).contains(&prefix2) || (2221..=2720).contains(&prefix4) {
            Self::Mastercard
        } else if prefix2 == 34 || prefix2 == 37 {
            Self::Amex
        } else if digits.starts_with("6011") || prefix2 == 65 {
            Self::Discover
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Visa => "visa",
            Self::Mastercard => "mastercard",
            Self::Amex => "amex",
            Self::Discover => "discover",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CardBrand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw card data. Never persisted; only forwarded to a provider.
pub struct CardDetails {
    number: SecretString,
    /// Expiry month (1-12)
    pub exp_month: u8,
    /// Four-digit expiry year
    pub exp_year: u16,
    cvv: SecretString,
    /// Name printed on the card
    pub holder_name: Option<String>,
}

impl CardDetails {
    pub fn new(
        number: impl Into<String>,
        exp_month: u8,
        exp_year: u16,
        cvv: impl Into<String>,
    ) -> Self {
        let number: String = number.into().chars().filter(|c| !c.is_whitespace()).collect();
        Self {
            number: SecretString::from(number),
            exp_month,
            exp_year,
            cvv: SecretString::from(cvv.into()),
            holder_name: None,
        }
    }

    /// Set the card holder name
    pub fn with_holder(mut self, name: impl Into<String>) -> Self {
        self.holder_name = Some(name.into());
        self
    }

    /// Full card number, for provider adapters only
    pub fn number(&self) -> &str {
        self.number.expose_secret()
    }

    /// Security code, for provider adapters only
    pub fn cvv(&self) -> &str {
        self.cvv.expose_secret()
    }

    pub fn brand(&self) -> CardBrand {
        CardBrand::from_number(self.number())
    }

    pub fn last4(&self) -> String {
        let number = self.number();
        number[number.len().saturating_sub(4)..].to_string()
    }

    /// Expiry as `YYYYMM`, the format bank acquirers expect
    pub fn expiration_yyyymm(&self) -> String {
        format!("{:04}{:02}", self.exp_year, self.exp_month)
    }

    /// Check number format, Luhn checksum, expiry and security code.
    pub fn validate(&self, now: DateTime<Utc>) -> GatewayResult<()> {
        let number = self.number();
        if !(12..=19).contains(&number.len()) || !number.chars().all(|c| c.is_ascii_digit()) {
            return Err(GatewayError::Validation("card number must be 12-19 digits".into()));
        }
        if !luhn_valid(number) {
            return Err(GatewayError::Validation("card number failed checksum".into()));
        }
        if !(1..=12).contains(&self.exp_month) {
            return Err(GatewayError::Validation("expiry month must be 1-12".into()));
        }
        let current = (now.year(), now.month());
        if (i32::from(self.exp_year), u32::from(self.exp_month)) < current {
            return Err(GatewayError::Validation("card is expired".into()));
        }
        let cvv = self.cvv();
        if !(3..=4).contains(&cvv.len()) || !cvv.chars().all(|c| c.is_ascii_digit()) {
            return Err(GatewayError::Validation("security code must be 3-4 digits".into()));
        }
        Ok(())
    }
}

impl Clone for CardDetails {
    fn clone(&self) -> Self {
        Self {
            number: SecretString::from(self.number().to_string()),
            exp_month: self.exp_month,
            exp_year: self.exp_year,
            cvv: SecretString::from(self.cvv().to_string()),
            holder_name: self.holder_name.clone(),
        }
    }
}

impl fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardDetails")
            .field("brand", &self.brand())
            .field("last4", &self.last4())
            .field("exp_month", &self.exp_month)
            .field("exp_year", &self.exp_year)
            .finish_non_exhaustive()
    }
}

fn luhn_valid(number: &str) -> bool {
    let mut sum = 0;
    for (i, c) in number.chars().rev().enumerate() {
        let Some(mut digit) = c.to_digit(10) else {
            return false;
        };
        if i % 2 == 1 {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
    }
    sum % 10 == 0
}

/// How the payer pays: fresh card data or a method saved earlier, never both
#[derive(Debug, Clone)]
pub enum PaymentInstrument {
    /// First-time card; the gateway is chosen on the new-payer path
    Card(CardDetails),
    /// Existing saved method; charged on the gateway it is bound to
    SavedMethod(Uuid),
}

/// Charge request
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    /// Payer identity
    pub payer_id: String,
    /// Amount in the payer's currency
    pub amount: Money,
    pub instrument: PaymentInstrument,
    /// Caller-supplied deduplication key
    pub idempotency_key: String,
    /// Recurring collection
    pub recurring: bool,
    /// Subscription this collection belongs to
    pub subscription_id: Option<String>,
    /// Gateway explicitly requested by the payer
    pub gateway: Option<GatewayId>,
    pub description: Option<String>,
    /// Capture immediately; `false` only authorizes
    pub capture: bool,
}

impl ChargeRequest {
    /// One-off charge with fresh card data
    pub fn with_card(
        payer_id: impl Into<String>,
        amount: Money,
        card: CardDetails,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            payer_id: payer_id.into(),
            amount,
            instrument: PaymentInstrument::Card(card),
            idempotency_key: idempotency_key.into(),
            recurring: false,
            subscription_id: None,
            gateway: None,
            description: None,
            capture: true,
        }
    }

    /// Charge against a saved method
    pub fn with_saved_method(
        payer_id: impl Into<String>,
        amount: Money,
        method_id: Uuid,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            payer_id: payer_id.into(),
            amount,
            instrument: PaymentInstrument::SavedMethod(method_id),
            idempotency_key: idempotency_key.into(),
            recurring: false,
            subscription_id: None,
            gateway: None,
            description: None,
            capture: true,
        }
    }

    /// Mark as a recurring subscription collection
    pub fn recurring(mut self, subscription_id: impl Into<String>) -> Self {
        self.recurring = true;
        self.subscription_id = Some(subscription_id.into());
        self
    }

    /// Request a specific gateway
    pub fn on_gateway(mut self, gateway: GatewayId) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Hold the funds; capture later through the orchestrator
    pub fn authorize_only(mut self) -> Self {
        self.capture = false;
        self
    }

    /// Reject malformed requests before any side effect.
    pub fn validate(&self, supported: &[Currency]) -> GatewayResult<()> {
        if self.payer_id.trim().is_empty() {
            return Err(GatewayError::Validation("payer id is required".into()));
        }
        if self.idempotency_key.trim().is_empty() {
            return Err(GatewayError::Validation("idempotency key is required".into()));
        }
        if !self.amount.is_positive() {
            return Err(GatewayError::Validation("amount must be greater than zero".into()));
        }
        if !supported.contains(&self.amount.currency) {
            return Err(GatewayError::Validation(format!(
                "currency {} is not supported",
                self.amount.currency
            )));
        }
        if let PaymentInstrument::SavedMethod(_) = self.instrument
            && self.gateway.is_some()
        {
            return Err(GatewayError::Validation(
                "a saved method is charged on its own gateway".into(),
            ));
        }
        if let PaymentInstrument::Card(card) = &self.instrument {
            card.validate(Utc::now())?;
        }
        Ok(())
    }
}

/// Final outcome reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeOutcome {
    /// Money moved (captured or authorized)
    Approved,
    /// Provider refused
    Declined,
    /// Outcome unknown; resolved later by webhook or reconciliation
    PendingVerification,
}

/// Currency conversion applied to a charge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionSummary {
    pub rate_id: Uuid,
    pub rate: Decimal,
    /// Applied rate was older than the freshness window
    pub stale: bool,
    pub converted: Money,
    pub tax: Money,
    pub total: Money,
}

/// Charge response. Stored verbatim for idempotent replays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeResponse {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub outcome: ChargeOutcome,
    pub gateway: GatewayId,
    pub external_id: Option<String>,
    /// Amount charged, in settlement currency
    pub amount: Money,
    /// Amount as requested
    pub original_amount: Money,
    pub response_code: Option<String>,
    pub response_message: Option<String>,
    pub authorization_code: Option<String>,
    pub conversion: Option<ConversionSummary>,
    pub payment_method_id: Option<Uuid>,
    pub processed_at: DateTime<Utc>,
}

/// Refund request
#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub payer_id: String,
    pub transaction_id: Uuid,
    /// Partial amount in settlement currency; `None` refunds the remainder
    pub amount: Option<Money>,
    pub idempotency_key: String,
    pub reason: Option<String>,
}

impl RefundRequest {
    pub fn full(
        payer_id: impl Into<String>,
        transaction_id: Uuid,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            payer_id: payer_id.into(),
            transaction_id,
            amount: None,
            idempotency_key: idempotency_key.into(),
            reason: None,
        }
    }

    pub fn partial(
        payer_id: impl Into<String>,
        transaction_id: Uuid,
        amount: Money,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            amount: Some(amount),
            ..Self::full(payer_id, transaction_id, idempotency_key)
        }
    }
}

/// Refund result reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundOutcome {
    /// Provider confirmed the refund and it is accounted
    Completed,
    /// Provider outcome unknown; the transaction is flagged and the refund
    /// is settled by webhook or reconciliation
    PendingVerification,
}

/// Refund response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundResponse {
    pub transaction_id: Uuid,
    pub outcome: RefundOutcome,
    /// Provider refund id; `None` while the outcome is unknown
    pub refund_id: Option<String>,
    /// Amount requested
    pub refunded: Money,
    /// Total refunded so far on the transaction
    pub total_refunded: Money,
    pub status: TransactionStatus,
    pub processed_at: DateTime<Utc>,
}

/// Save a card for later use
#[derive(Debug, Clone)]
pub struct TokenizeRequest {
    pub payer_id: String,
    pub card: CardDetails,
    /// Gateway explicitly requested by the payer
    pub gateway: Option<GatewayId>,
    /// Make this the payer's default method
    pub make_default: bool,
}

impl TokenizeRequest {
    pub fn new(payer_id: impl Into<String>, card: CardDetails) -> Self {
        Self {
            payer_id: payer_id.into(),
            card,
            gateway: None,
            make_default: false,
        }
    }

    pub fn on_gateway(mut self, gateway: GatewayId) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn as_default(mut self) -> Self {
        self.make_default = true;
        self
    }
}

/// What removing a saved method did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// Transactions reference it; kept as inactive
    Deactivated,
    /// No history; removed
    Deleted,
}
