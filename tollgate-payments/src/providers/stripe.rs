//! Stripe payment provider implementation

use crate::{
    error::{GatewayError, GatewayResult},
    gateway::{
        ChargeSource, GatewayCapabilities, GatewayCategory, GatewayId, GatewayProvider,
        PaymentMethodKind, ProviderCharge, ProviderReceipt, ProviderRefund, TokenizedCard,
    },
    money::{Currency, Money},
    providers::{ProviderAuth, ProviderClient, ProviderConfig, status_error},
    signature::{SignatureAlgorithm, WebhookSigner},
    transaction::{RefundReport, TransactionStatus},
    types::{CardBrand, CardDetails},
    webhook::WebhookEvent,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, de::DeserializeOwned};
use std::collections::HashMap;

const DEFAULT_BASE_URL: &str = "https://api.stripe.com/v1";

/// Accepted clock skew on `Stripe-Signature` timestamps
pub const SIGNATURE_TOLERANCE_SECS: u64 = 300;

/// Signature header name
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Stripe provider
pub struct StripeProvider {
    config: ProviderConfig,
    client: ProviderClient,
    signer: Option<WebhookSigner>,
    capabilities: GatewayCapabilities,
}

impl StripeProvider {
    /// Create a new Stripe provider
    pub fn new(config: ProviderConfig) -> GatewayResult<Self> {
        let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let client = ProviderClient::new(base_url, ProviderAuth::Bearer(config.api_key.clone()), config.timeout)?;
        let signer = config
            .webhook_secret
            .as_ref()
            .map(|secret| WebhookSigner::new(secret.clone(), SignatureAlgorithm::HmacSha256));

        Ok(Self {
            config,
            client,
            signer,
            capabilities: GatewayCapabilities {
                supports_tokenization: true,
                currencies: Currency::ALL.to_vec(),
                payment_methods: vec![PaymentMethodKind::Card, PaymentMethodKind::Wallet],
            },
        })
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> GatewayResult<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::PAYMENT_REQUIRED
            && let Ok(error) = serde_json::from_str::<StripeError>(&body)
        {
            let code = error
                .error
                .decline_code
                .or(error.error.code)
                .unwrap_or_else(|| "card_declined".to_string());
            return Err(GatewayError::declined(code, error.error.message));
        }
        Err(status_error(status, &body))
    }

    async fn create_payment_method(&self, card: &CardDetails) -> GatewayResult<StripePaymentMethod> {
        let mut params = HashMap::new();
        params.insert("type", "card".to_string());
        params.insert("card[number]", card.number().to_string());
        params.insert("card[exp_month]", card.exp_month.to_string());
        params.insert("card[exp_year]", card.exp_year.to_string());
        params.insert("card[cvc]", card.cvv().to_string());

        Self::read(self.client.post_form("/payment_methods", &params).await?).await
    }

    async fn create_customer(&self, payer_id: &str) -> GatewayResult<StripeObject> {
        let mut params = HashMap::new();
        params.insert("metadata[payer_id]", payer_id.to_string());

        Self::read(self.client.post_form("/customers", &params).await?).await
    }

    async fn attach_payment_method(&self, method_id: &str, customer_id: &str) -> GatewayResult<StripePaymentMethod> {
        let mut params = HashMap::new();
        params.insert("customer", customer_id.to_string());

        let path = format!("/payment_methods/{}/attach", method_id);
        Self::read(self.client.post_form(&path, &params).await?).await
    }

    fn intent_receipt(intent: StripePaymentIntent) -> ProviderReceipt {
        let currency = Currency::from_code(&intent.currency).unwrap_or(Currency::USD);
        let status = intent_status(&intent.status);
        let error = intent.last_payment_error;
        ProviderReceipt {
            external_id: intent.id,
            status,
            response_code: error
                .as_ref()
                .and_then(|e| e.decline_code.clone().or(e.code.clone()))
                .or_else(|| Some(intent.status.clone())),
            message: error.map(|e| e.message),
            authorization_code: None,
            amount: Some(Money::new(intent.amount, currency)),
            commission: None,
            net_amount: None,
        }
    }
}

/// Saved-method token: `{customer}:{payment_method}`
fn split_token(token: &str) -> (Option<&str>, &str) {
    match token.split_once(':') {
        Some((customer, method)) => (Some(customer), method),
        None => (None, token),
    }
}

fn intent_status(status: &str) -> TransactionStatus {
    match status {
        "succeeded" => TransactionStatus::Captured,
        "requires_capture" => TransactionStatus::Authorized,
        "requires_payment_method" | "canceled" => TransactionStatus::Failed,
        _ => TransactionStatus::Pending,
    }
}

fn brand_from_stripe(brand: &str) -> CardBrand {
    match brand {
        "visa" => CardBrand::Visa,
        "mastercard" => CardBrand::Mastercard,
        "amex" => CardBrand::Amex,
        "discover" => CardBrand::Discover,
        _ => CardBrand::Unknown,
    }
}

#[derive(Debug, Deserialize)]
struct StripeError {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: String,
    code: Option<String>,
    decline_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripeObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripePaymentMethod {
    id: String,
    card: Option<StripeCard>,
}

#[derive(Debug, Deserialize)]
struct StripeCard {
    brand: String,
    last4: String,
    exp_month: u8,
    exp_year: u16,
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    amount: i64,
    currency: String,
    status: String,
    last_payment_error: Option<StripeErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    status: String,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct StripeWebhookEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

#[async_trait]
impl GatewayProvider for StripeProvider {
    fn id(&self) -> GatewayId {
        GatewayId::Stripe
    }

    fn display_name(&self) -> &str {
        "Stripe"
    }

    fn category(&self) -> GatewayCategory {
        GatewayCategory::Aggregator
    }

    fn capabilities(&self) -> &GatewayCapabilities {
        &self.capabilities
    }

    async fn health_check(&self) -> bool {
        match self.client.get("/balance").await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Stripe health check failed");
                false
            }
        }
    }

    fn validate_configuration(&self) -> Vec<String> {
        let key = self.config.api_key.trim();
        if key.is_empty() {
            vec!["API key is not configured".to_string()]
        } else if !(key.starts_with("sk_") || key.starts_with("rk_")) {
            vec!["API key must be a secret (sk_) or restricted (rk_) key".to_string()]
        } else {
            Vec::new()
        }
    }

    async fn charge(&self, request: &ProviderCharge) -> GatewayResult<ProviderReceipt> {
        let mut params = HashMap::new();
        params.insert("amount", request.amount.amount.to_string());
        params.insert("currency", request.amount.currency.code().to_lowercase());
        params.insert("confirm", "true".to_string());
        params.insert(
            "capture_method",
            if request.capture { "automatic" } else { "manual" }.to_string(),
        );
        params.insert("metadata[reference]", request.reference.clone());
        params.insert("metadata[payer_id]", request.payer_id.clone());

        if let Some(desc) = &request.description {
            params.insert("description", desc.clone());
        }

        match &request.source {
            ChargeSource::Card(card) => {
                let method = self.create_payment_method(card).await?;
                params.insert("payment_method", method.id);
            }
            ChargeSource::Token(token) => {
                let (customer, method) = split_token(token);
                if let Some(customer) = customer {
                    params.insert("customer", customer.to_string());
                }
                params.insert("payment_method", method.to_string());
                if request.recurring {
                    params.insert("off_session", "true".to_string());
                }
            }
        }

        let intent: StripePaymentIntent =
            Self::read(self.client.post_form("/payment_intents", &params).await?).await?;

        match intent.status.as_str() {
            "requires_payment_method" | "canceled" => {
                let error = intent.last_payment_error;
                let code = error
                    .as_ref()
                    .and_then(|e| e.decline_code.clone().or(e.code.clone()))
                    .unwrap_or_else(|| intent.status.clone());
                let message = error.map(|e| e.message).unwrap_or_else(|| "payment failed".into());
                Err(GatewayError::declined(code, message))
            }
            "requires_action" | "requires_confirmation" => Err(GatewayError::declined(
                "authentication_required",
                "payment requires customer authentication",
            )),
            _ => Ok(Self::intent_receipt(intent)),
        }
    }

    async fn capture(&self, external_id: &str, amount: Money) -> GatewayResult<ProviderReceipt> {
        let mut params = HashMap::new();
        params.insert("amount_to_capture", amount.amount.to_string());

        let path = format!("/payment_intents/{}/capture", external_id);
        let intent: StripePaymentIntent = Self::read(self.client.post_form(&path, &params).await?).await?;
        Ok(Self::intent_receipt(intent))
    }

    async fn refund(&self, request: &ProviderRefund) -> GatewayResult<ProviderReceipt> {
        let mut params = HashMap::new();
        params.insert("payment_intent", request.external_id.clone());
        params.insert("amount", request.amount.amount.to_string());
        params.insert("metadata[reference]", request.reference.clone());
        if let Some(reason) = &request.reason {
            params.insert("metadata[reason]", reason.clone());
        }

        let refund: StripeRefund = Self::read(self.client.post_form("/refunds", &params).await?).await?;
        let currency = Currency::from_code(&refund.currency).unwrap_or(request.amount.currency);

        match refund.status.as_str() {
            "failed" | "canceled" => Err(GatewayError::declined(refund.status, "refund was not processed")),
            "succeeded" => {
                let mut receipt = ProviderReceipt::new(refund.id, TransactionStatus::Refunded);
                receipt.amount = Some(Money::new(refund.amount, currency));
                Ok(receipt)
            }
            _ => Err(GatewayError::ProviderUnavailable(format!(
                "refund {} is {}",
                refund.id, refund.status
            ))),
        }
    }

    async fn tokenize(&self, payer_id: &str, card: &CardDetails) -> GatewayResult<TokenizedCard> {
        let customer = self.create_customer(payer_id).await?;
        let method = self.create_payment_method(card).await?;
        let method = self.attach_payment_method(&method.id, &customer.id).await?;

        let token = format!("{}:{}", customer.id, method.id);
        Ok(match method.card {
            Some(details) => TokenizedCard {
                token,
                brand: brand_from_stripe(&details.brand),
                last4: details.last4,
                exp_month: details.exp_month,
                exp_year: details.exp_year,
            },
            None => TokenizedCard::from_card(token, card),
        })
    }

    async fn query_status(&self, reference: &str) -> GatewayResult<Option<ProviderReceipt>> {
        let query = [("query", format!("metadata['reference']:'{}'", reference))];
        let list: StripeList<StripePaymentIntent> =
            Self::read(self.client.get_query("/payment_intents/search", &query).await?).await?;

        Ok(list.data.into_iter().next().map(Self::intent_receipt))
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> GatewayResult<()> {
        let signer = self.signer.as_ref().ok_or(GatewayError::SignatureInvalid)?;
        signer.verify_timestamped(payload, signature, SIGNATURE_TOLERANCE_SECS, Utc::now().timestamp())
    }

    fn parse_webhook(&self, payload: &[u8]) -> GatewayResult<Option<WebhookEvent>> {
        let event: StripeWebhookEvent = serde_json::from_slice(payload)?;
        let object = &event.data.object;
        let text = |field: &str| object.get(field).and_then(|v| v.as_str()).map(str::to_string);
        let number = |field: &str| object.get(field).and_then(|v| v.as_i64());

        let mut refunded_minor = None;
        let (status, external_id) = match event.event_type.as_str() {
            "payment_intent.succeeded" => (TransactionStatus::Captured, text("id")),
            "payment_intent.amount_capturable_updated" => (TransactionStatus::Authorized, text("id")),
            "payment_intent.payment_failed" | "payment_intent.canceled" => {
                (TransactionStatus::Failed, text("id"))
            }
            "charge.refunded" => {
                let (Some(charged), Some(refunded)) = (number("amount"), number("amount_refunded")) else {
                    return Err(GatewayError::Serialization(
                        "charge.refunded without amount and amount_refunded".into(),
                    ));
                };
                refunded_minor = Some(refunded);
                let status = if refunded >= charged {
                    TransactionStatus::Refunded
                } else {
                    TransactionStatus::PartiallyRefunded
                };
                (status, text("payment_intent"))
            }
            _ => return Ok(None),
        };

        let currency = text("currency").and_then(|c| Currency::from_code(&c));
        let amount = match (number("amount"), currency) {
            (Some(amount), Some(currency)) => Some(Money::new(amount, currency)),
            _ => None,
        };
        // Stripe reports the running total; the refund list is present only
        // when expanded
        let refund = match (refunded_minor, currency) {
            (Some(total), Some(currency)) => Some(RefundReport::Cumulative {
                total: Money::new(total, currency),
                refund_ids: object
                    .pointer("/refunds/data")
                    .and_then(|data| data.as_array())
                    .map(|data| {
                        data.iter()
                            .filter_map(|r| r.get("id").and_then(|id| id.as_str()))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            }),
            _ => None,
        };
        let reference = object
            .get("metadata")
            .and_then(|m| m.get("reference"))
            .and_then(|r| r.as_str())
            .map(str::to_string);

        Ok(Some(WebhookEvent {
            event_id: event.id,
            gateway: GatewayId::Stripe,
            external_id,
            reference,
            status,
            amount,
            refund,
            occurred_at: Utc.timestamp_opt(event.created, 0).single().unwrap_or_else(Utc::now),
        }))
    }
}
