//! Azul payment provider implementation
//!
//! Bank-direct acquirer. JSON web service authenticated by the `Auth1` and
//! `Auth2` headers; cards are tokenized in the DataVault.

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
use chrono::Utc;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://pagos.azul.com.do/WebServices/JSON/Default.aspx";
const APPROVED: &str = "00";

/// Header carrying the hex HMAC-SHA512 of a webhook body
pub const SIGNATURE_HEADER: &str = "X-Azul-Signature";

/// Azul provider
pub struct AzulProvider {
    config: ProviderConfig,
    client: ProviderClient,
    signer: Option<WebhookSigner>,
    capabilities: GatewayCapabilities,
}

impl AzulProvider {
    /// Create a new Azul provider. `api_key` is `Auth1`, `secondary_key`
    /// is `Auth2` and `merchant_id` the store code.
    pub fn new(config: ProviderConfig) -> GatewayResult<Self> {
        let auth = ProviderAuth::Headers(vec![
            ("Auth1", config.api_key.clone()),
            ("Auth2", config.secondary_key.clone().unwrap_or_default()),
        ]);
        let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let client = ProviderClient::new(base_url, auth, config.timeout)?;
        let signer = config
            .webhook_secret
            .as_ref()
            .map(|secret| WebhookSigner::new(secret.clone(), SignatureAlgorithm::HmacSha512));

        Ok(Self {
            config,
            client,
            signer,
            capabilities: GatewayCapabilities {
                supports_tokenization: true,
                currencies: vec![Currency::DOP, Currency::USD],
                payment_methods: vec![PaymentMethodKind::Card],
            },
        })
    }

    fn store(&self) -> String {
        self.config.merchant_id.clone().unwrap_or_default()
    }

    async fn send(&self, path: &str, request: &AzulRequest) -> GatewayResult<AzulResponse> {
        let response = self.client.post(path, request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        Ok(response.json().await?)
    }
}

/// Outgoing transaction message. No `Debug`: it carries card data.
#[derive(Default, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AzulRequest {
    channel: &'static str,
    store: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    card_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiration: Option<String>,
    #[serde(rename = "CVC", skip_serializing_if = "Option::is_none")]
    cvc: Option<String>,
    pos_input_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    trx_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    itbis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    currency_pos_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    custom_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    azul_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_vault_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    save_to_data_vault: Option<&'static str>,
}

impl AzulRequest {
    fn new(store: String, recurring: bool) -> Self {
        Self {
            channel: "EC",
            store,
            pos_input_mode: if recurring { "E-Commerce-Recurring" } else { "E-Commerce" },
            ..Self::default()
        }
    }

    fn with_amount(mut self, amount: Money) -> Self {
        self.amount = Some(amount.amount.to_string());
        self.itbis = Some("0".to_string());
        self.currency_pos_code = Some(match amount.currency {
            Currency::USD => "$",
            _ => "RD$",
        });
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AzulResponse {
    #[serde(default)]
    iso_code: Option<String>,
    #[serde(default)]
    response_message: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    authorization_code: Option<String>,
    #[serde(default)]
    azul_order_id: Option<String>,
    #[serde(default)]
    data_vault_token: Option<String>,
    #[serde(default)]
    data_vault_brand: Option<String>,
    #[serde(default)]
    found: Option<bool>,
    #[serde(default)]
    transaction_type: Option<String>,
    /// Minor units, on status queries
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    currency_pos_code: Option<String>,
}

impl AzulResponse {
    fn reported_amount(&self) -> Option<Money> {
        let minor = self.amount.as_deref()?.parse::<i64>().ok()?;
        let currency = match self.currency_pos_code.as_deref() {
            Some("$") => Currency::USD,
            _ => Currency::DOP,
        };
        Some(Money::new(minor, currency))
    }

    fn approved(&self) -> bool {
        self.iso_code.as_deref() == Some(APPROVED)
    }

    fn decline(&self) -> GatewayError {
        let message = self
            .error_description
            .clone()
            .filter(|d| !d.is_empty())
            .or_else(|| self.response_message.clone())
            .unwrap_or_else(|| "declined".to_string());
        GatewayError::declined(self.iso_code.clone().unwrap_or_else(|| "unknown".into()), message)
    }

    fn into_receipt(self, status: TransactionStatus) -> GatewayResult<ProviderReceipt> {
        let external_id = self
            .azul_order_id
            .clone()
            .ok_or_else(|| GatewayError::Serialization("response without AzulOrderId".into()))?;
        Ok(ProviderReceipt {
            external_id,
            status,
            response_code: self.iso_code,
            message: self.response_message,
            authorization_code: self.authorization_code,
            amount: None,
            commission: None,
            net_amount: None,
        })
    }
}

fn brand_from_azul(brand: Option<&str>) -> Option<CardBrand> {
    match brand?.to_ascii_uppercase().as_str() {
        "VISA" => Some(CardBrand::Visa),
        "MASTERCARD" => Some(CardBrand::Mastercard),
        "AMEX" | "AMERICAN EXPRESS" => Some(CardBrand::Amex),
        "DISCOVER" => Some(CardBrand::Discover),
        _ => None,
    }
}

/// Webhook body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AzulNotification {
    event_id: String,
    azul_order_id: Option<String>,
    custom_order_id: Option<String>,
    transaction_type: String,
    iso_code: String,
    amount: Option<String>,
    currency: Option<String>,
    date_time: Option<chrono::DateTime<Utc>>,
}

#[async_trait]
impl GatewayProvider for AzulProvider {
    fn id(&self) -> GatewayId {
        GatewayId::Azul
    }

    fn display_name(&self) -> &str {
        "Azul"
    }

    fn category(&self) -> GatewayCategory {
        GatewayCategory::BankDirect
    }

    fn capabilities(&self) -> &GatewayCapabilities {
        &self.capabilities
    }

    async fn health_check(&self) -> bool {
        match self.client.get("").await {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                tracing::debug!(error = %e, "Azul health check failed");
                false
            }
        }
    }

    fn validate_configuration(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.config.api_key.trim().is_empty() {
            problems.push("Auth1 is not configured".to_string());
        }
        if self.config.secondary_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
            problems.push("Auth2 is not configured".to_string());
        }
        if self.config.merchant_id.as_deref().is_none_or(|m| m.trim().is_empty()) {
            problems.push("merchant id (Store) is not configured".to_string());
        }
        problems
    }

    async fn charge(&self, request: &ProviderCharge) -> GatewayResult<ProviderReceipt> {
        let mut message = AzulRequest::new(self.store(), request.recurring).with_amount(request.amount);
        message.trx_type = Some(if request.capture { "Sale" } else { "Hold" });
        message.custom_order_id = Some(request.reference.clone());

        match &request.source {
            ChargeSource::Card(card) => {
                message.card_number = Some(card.number().to_string());
                message.expiration = Some(card.expiration_yyyymm());
                message.cvc = Some(card.cvv().to_string());
            }
            ChargeSource::Token(token) => {
                message.data_vault_token = Some(token.clone());
            }
        }

        let response = self.send("", &message).await?;
        if !response.approved() {
            return Err(response.decline());
        }

        let status = if request.capture {
            TransactionStatus::Captured
        } else {
            TransactionStatus::Authorized
        };
        let mut receipt = response.into_receipt(status)?;
        receipt.amount = Some(request.amount);
        Ok(receipt)
    }

    async fn capture(&self, external_id: &str, amount: Money) -> GatewayResult<ProviderReceipt> {
        let mut message = AzulRequest::new(self.store(), false).with_amount(amount);
        message.azul_order_id = Some(external_id.to_string());

        let response = self.send("?ProcessPost", &message).await?;
        if !response.approved() {
            return Err(response.decline());
        }
        let mut receipt = response.into_receipt(TransactionStatus::Captured)?;
        receipt.amount = Some(amount);
        Ok(receipt)
    }

    async fn refund(&self, request: &ProviderRefund) -> GatewayResult<ProviderReceipt> {
        let mut message = AzulRequest::new(self.store(), false).with_amount(request.amount);
        message.trx_type = Some("Refund");
        message.azul_order_id = Some(request.external_id.clone());
        message.custom_order_id = Some(request.reference.clone());

        let response = self.send("", &message).await?;
        if !response.approved() {
            return Err(response.decline());
        }
        let mut receipt = response.into_receipt(TransactionStatus::Refunded)?;
        receipt.amount = Some(request.amount);
        Ok(receipt)
    }

    async fn tokenize(&self, _payer_id: &str, card: &CardDetails) -> GatewayResult<TokenizedCard> {
        let mut message = AzulRequest::new(self.store(), false);
        message.trx_type = Some("CREATE");
        message.card_number = Some(card.number().to_string());
        message.expiration = Some(card.expiration_yyyymm());
        message.cvc = Some(card.cvv().to_string());
        message.save_to_data_vault = Some("1");

        let response = self.send("?ProcessDatavault", &message).await?;
        if !response.approved() {
            return Err(response.decline());
        }

        let token = response
            .data_vault_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GatewayError::Serialization("DataVault answered without a token".into()))?;
        let mut tokenized = TokenizedCard::from_card(token, card);
        if let Some(brand) = brand_from_azul(response.data_vault_brand.as_deref()) {
            tokenized.brand = brand;
        }
        Ok(tokenized)
    }

    async fn query_status(&self, reference: &str) -> GatewayResult<Option<ProviderReceipt>> {
        let mut message = AzulRequest::new(self.store(), false);
        message.custom_order_id = Some(reference.to_string());

        let response = self.send("?VerifyPayment", &message).await?;
        if response.found != Some(true) {
            return Ok(None);
        }

        let status = match (response.approved(), response.transaction_type.as_deref()) {
            (false, _) => TransactionStatus::Failed,
            (true, Some("Hold")) => TransactionStatus::Authorized,
            (true, Some("Refund")) => TransactionStatus::Refunded,
            (true, _) => TransactionStatus::Captured,
        };
        let amount = response.reported_amount();
        let mut receipt = response.into_receipt(status)?;
        receipt.amount = amount;
        Ok(Some(receipt))
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> GatewayResult<()> {
        let signer = self.signer.as_ref().ok_or(GatewayError::SignatureInvalid)?;
        signer.verify(payload, signature)
    }

    fn parse_webhook(&self, payload: &[u8]) -> GatewayResult<Option<WebhookEvent>> {
        let notification: AzulNotification = serde_json::from_slice(payload)?;
        let approved = notification.iso_code == APPROVED;

        let status = match (notification.transaction_type.as_str(), approved) {
            ("Sale" | "Post", true) => TransactionStatus::Captured,
            ("Hold", true) => TransactionStatus::Authorized,
            ("Refund", true) => TransactionStatus::Refunded,
            ("Sale" | "Hold", false) | ("Void", true) => TransactionStatus::Failed,
            _ => return Ok(None),
        };

        let currency = notification
            .currency
            .as_deref()
            .and_then(Currency::from_code)
            .unwrap_or(Currency::DOP);
        let amount = notification
            .amount
            .as_deref()
            .and_then(|a| a.parse::<i64>().ok())
            .map(|minor| Money::new(minor, currency));

        // A refund notification carries the refund's own AzulOrderId
        let refund = match (status, amount) {
            (TransactionStatus::Refunded, Some(amount)) => Some(RefundReport::Single {
                refund_id: notification
                    .azul_order_id
                    .clone()
                    .unwrap_or_else(|| notification.event_id.clone()),
                amount,
            }),
            _ => None,
        };

        Ok(Some(WebhookEvent {
            event_id: notification.event_id,
            gateway: GatewayId::Azul,
            external_id: notification.azul_order_id,
            reference: notification.custom_order_id,
            status,
            amount,
            refund,
            occurred_at: notification.date_time.unwrap_or_else(Utc::now),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> AzulProvider {
        AzulProvider::new(
            ProviderConfig::new("auth1")
                .with_secondary_key("auth2")
                .with_merchant_id("39038540035")
                .with_webhook_secret("azul-secret"),
        )
        .unwrap()
    }

    #[test]
    fn test_request_serialization() {
        let mut message = AzulRequest::new("39038540035".into(), false)
            .with_amount(Money::new(150_000, Currency::DOP));
        message.trx_type = Some("Sale");

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["Channel"], "EC");
        assert_eq!(json["Store"], "39038540035");
        assert_eq!(json["Amount"], "150000");
        assert_eq!(json["TrxType"], "Sale");
        assert_eq!(json["PosInputMode"], "E-Commerce");
        assert!(json.get("CardNumber").is_none());
    }

    #[test]
    fn test_configuration_problems() {
        assert!(provider().validate_configuration().is_empty());

        let bare = AzulProvider::new(ProviderConfig::new("")).unwrap();
        assert_eq!(bare.validate_configuration().len(), 3);
    }

    #[test]
    fn test_parse_webhook() {
        let payload = br#"{
            "EventId": "evt-1",
            "AzulOrderId": "44021",
            "CustomOrderId": "order-1",
            "TransactionType": "Sale",
            "IsoCode": "00",
            "Amount": "150000",
            "Currency": "DOP"
        }"#;

        let event = provider().parse_webhook(payload).unwrap().unwrap();
        assert_eq!(event.status, TransactionStatus::Captured);
        assert_eq!(event.external_id.as_deref(), Some("44021"));
        assert_eq!(event.amount, Some(Money::new(150_000, Currency::DOP)));

        assert!(event.refund.is_none());

        let unknown = br#"{"EventId": "e", "TransactionType": "Batch", "IsoCode": "00"}"#;
        assert!(provider().parse_webhook(unknown).unwrap().is_none());
    }

    #[test]
    fn test_parse_partial_refund_webhook() {
        let payload = br#"{
            "EventId": "evt-2",
            "AzulOrderId": "44022",
            "CustomOrderId": "order-1",
            "TransactionType": "Refund",
            "IsoCode": "00",
            "Amount": "2000",
            "Currency": "DOP"
        }"#;

        let event = provider().parse_webhook(payload).unwrap().unwrap();
        assert!(event.status.is_refund());
        assert_eq!(
            event.refund,
            Some(RefundReport::Single {
                refund_id: "44022".into(),
                amount: Money::new(2000, Currency::DOP),
            })
        );

        let without_amount = br#"{"EventId": "evt-3", "TransactionType": "Refund", "IsoCode": "00"}"#;
        let event = provider().parse_webhook(without_amount).unwrap().unwrap();
        assert!(event.refund.is_none());
    }

    #[test]
    fn test_status_query_reports_refund_amount() {
        let response: AzulResponse = serde_json::from_value(serde_json::json!({
            "IsoCode": "00",
            "AzulOrderId": "44022",
            "Found": true,
            "TransactionType": "Refund",
            "Amount": "2000",
            "CurrencyPosCode": "RD$"
        }))
        .unwrap();
        assert_eq!(response.reported_amount(), Some(Money::new(2000, Currency::DOP)));
    }

    #[test]
    fn test_webhook_signature() {
        let provider = provider();
        let payload = br#"{"EventId":"evt-1"}"#;
        let signature = WebhookSigner::new("azul-secret", SignatureAlgorithm::HmacSha512)
            .sign(payload)
            .unwrap();

        assert!(provider.verify_webhook(payload, &signature).is_ok());
        assert!(provider.verify_webhook(payload, "00").is_err());

        let unsigned = AzulProvider::new(ProviderConfig::new("auth1")).unwrap();
        assert!(unsigned.verify_webhook(payload, &signature).is_err());
    }
}
