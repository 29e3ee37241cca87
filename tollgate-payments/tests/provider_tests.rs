//! Provider adapters and the central bank source against mock HTTP servers

mod common;

use common::{card, dop, usd};
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tollgate_payments::exchange::HttpRateSource;
use tollgate_payments::gateway::{ChargeSource, ProviderCharge, ProviderRefund};
use tollgate_payments::memory::{InMemoryConversionRepository, InMemoryExchangeRateRepository};
use tollgate_payments::providers::{AzulProvider, ProviderConfig, StripeProvider};
use tollgate_payments::*;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn azul(server: &MockServer) -> AzulProvider {
    AzulProvider::new(
        ProviderConfig::new("auth1")
            .with_secondary_key("auth2")
            .with_merchant_id("39038540035")
            .with_base_url(server.uri())
            .with_timeout(Duration::from_secs(5)),
    )
    .unwrap()
}

fn stripe(server: &MockServer) -> StripeProvider {
    StripeProvider::new(
        ProviderConfig::new("sk_test_123")
            .with_base_url(server.uri())
            .with_timeout(Duration::from_secs(5)),
    )
    .unwrap()
}

fn charge_request(amount: Money, source: ChargeSource) -> ProviderCharge {
    ProviderCharge {
        reference: "tx-1".to_string(),
        amount,
        source,
        payer_id: "payer-1".to_string(),
        description: None,
        recurring: false,
        capture: true,
    }
}

// ── Azul ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_azul_sale_approved() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(header("Auth1", "auth1"))
        .and(header("Auth2", "auth2"))
        .and(body_partial_json(json!({
            "Store": "39038540035",
            "TrxType": "Sale",
            "Amount": "150000",
            "CurrencyPosCode": "RD$",
            "CustomOrderId": "tx-1",
            "CardNumber": "4111111111111111",
            "Expiration": "203012",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "IsoCode": "00",
            "ResponseMessage": "APROBADA",
            "AuthorizationCode": "OK1234",
            "AzulOrderId": "44021",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let receipt = azul(&server)
        .charge(&charge_request(dop(150_000), ChargeSource::Card(card())))
        .await
        .unwrap();

    assert_eq!(receipt.external_id, "44021");
    assert_eq!(receipt.status, TransactionStatus::Captured);
    assert_eq!(receipt.response_code.as_deref(), Some("00"));
    assert_eq!(receipt.authorization_code.as_deref(), Some("OK1234"));
    assert_eq!(receipt.amount, Some(dop(150_000)));
}

#[tokio::test]
async fn test_azul_decline_carries_iso_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "IsoCode": "51",
            "ResponseMessage": "DECLINADA",
            "ErrorDescription": "Fondos insuficientes",
            "AzulOrderId": "44022",
        })))
        .mount(&server)
        .await;

    let result = azul(&server)
        .charge(&charge_request(usd(2_500), ChargeSource::Token("DV-1".into())))
        .await;

    match result {
        Err(GatewayError::ProviderDeclined { code, message }) => {
            assert_eq!(code, "51");
            assert_eq!(message, "Fondos insuficientes");
        }
        other => panic!("expected decline, got {:?}", other),
    }
}

#[tokio::test]
async fn test_azul_server_error_leaves_outcome_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = azul(&server)
        .charge(&charge_request(dop(1_000), ChargeSource::Card(card())))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::ProviderUnavailable(_)));
    assert!(err.is_outcome_unknown());
}

#[tokio::test]
async fn test_azul_rejected_credentials_are_definitive() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = azul(&server)
        .refund(&ProviderRefund {
            reference: "tx-1".into(),
            external_id: "44021".into(),
            amount: dop(1_000),
            reason: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Config(_)));
    assert!(!err.is_outcome_unknown());
}

#[tokio::test]
async fn test_azul_tokenize_through_data_vault() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "TrxType": "CREATE", "SaveToDataVault": "1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "IsoCode": "00",
            "DataVaultToken": "DV-8C1F",
            "DataVaultBrand": "VISA",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tokenized = azul(&server).tokenize("payer-1", &card()).await.unwrap();
    assert_eq!(tokenized.token, "DV-8C1F");
    assert_eq!(tokenized.brand, CardBrand::Visa);
    assert_eq!(tokenized.last4, "1111");
    assert_eq!((tokenized.exp_month, tokenized.exp_year), (12, 2030));
}

#[tokio::test]
async fn test_azul_query_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "CustomOrderId": "tx-held" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Found": true,
            "IsoCode": "00",
            "TransactionType": "Hold",
            "AzulOrderId": "44030",
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "CustomOrderId": "tx-missing" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "Found": false })))
        .mount(&server)
        .await;

    let provider = azul(&server);

    let held = provider.query_status("tx-held").await.unwrap().unwrap();
    assert_eq!(held.status, TransactionStatus::Authorized);
    assert_eq!(held.external_id, "44030");

    assert!(provider.query_status("tx-missing").await.unwrap().is_none());
}

// ── Stripe ───────────────────────────────────────────────────────────

fn payment_method_body() -> serde_json::Value {
    json!({
        "id": "pm_1",
        "card": { "brand": "visa", "last4": "1111", "exp_month": 12, "exp_year": 2030 },
    })
}

#[tokio::test]
async fn test_stripe_card_charge_creates_method_then_intent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payment_methods"))
        .and(header("Authorization", "Bearer sk_test_123"))
        .and(body_string_contains("type=card"))
        .respond_with(ResponseTemplate::new(200).set_body_json(payment_method_body()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .and(body_string_contains("payment_method=pm_1"))
        .and(body_string_contains("amount=5000"))
        .and(body_string_contains("currency=usd"))
        .and(body_string_contains("capture_method=automatic"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_1",
            "amount": 5000,
            "currency": "usd",
            "status": "succeeded",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let receipt = stripe(&server)
        .charge(&charge_request(usd(5_000), ChargeSource::Card(card())))
        .await
        .unwrap();

    assert_eq!(receipt.external_id, "pi_1");
    assert_eq!(receipt.status, TransactionStatus::Captured);
    assert_eq!(receipt.amount, Some(usd(5_000)));
}

#[tokio::test]
async fn test_stripe_card_error_is_decline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .and(body_string_contains("customer=cus_1"))
        .and(body_string_contains("off_session=true"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": {
                "type": "card_error",
                "message": "Your card has insufficient funds.",
                "code": "card_declined",
                "decline_code": "insufficient_funds",
            }
        })))
        .mount(&server)
        .await;

    let mut request = charge_request(usd(5_000), ChargeSource::Token("cus_1:pm_1".into()));
    request.recurring = true;
    let result = stripe(&server).charge(&request).await;

    match result {
        Err(GatewayError::ProviderDeclined { code, message }) => {
            assert_eq!(code, "insufficient_funds");
            assert_eq!(message, "Your card has insufficient funds.");
        }
        other => panic!("expected decline, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stripe_authentication_required_is_decline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_2",
            "amount": 5000,
            "currency": "usd",
            "status": "requires_action",
        })))
        .mount(&server)
        .await;

    let result = stripe(&server)
        .charge(&charge_request(usd(5_000), ChargeSource::Token("pm_1".into())))
        .await;
    assert!(matches!(
        result,
        Err(GatewayError::ProviderDeclined { ref code, .. }) if code == "authentication_required"
    ));
}

#[tokio::test]
async fn test_stripe_tokenize_attaches_to_customer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/customers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "cus_1" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/payment_methods"))
        .respond_with(ResponseTemplate::new(200).set_body_json(payment_method_body()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/payment_methods/pm_1/attach"))
        .and(body_string_contains("customer=cus_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(payment_method_body()))
        .expect(1)
        .mount(&server)
        .await;

    let tokenized = stripe(&server).tokenize("payer-1", &card()).await.unwrap();
    assert_eq!(tokenized.token, "cus_1:pm_1");
    assert_eq!(tokenized.brand, CardBrand::Visa);
    assert_eq!(tokenized.last4, "1111");
}

#[tokio::test]
async fn test_stripe_query_status_by_reference() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payment_intents/search"))
        .and(query_param("query", "metadata['reference']:'tx-1'"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "id": "pi_1",
                "amount": 5000,
                "currency": "usd",
                "status": "requires_capture",
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/payment_intents/search"))
        .and(query_param("query", "metadata['reference']:'tx-2'"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&server)
        .await;

    let provider = stripe(&server);
    let found = provider.query_status("tx-1").await.unwrap().unwrap();
    assert_eq!(found.status, TransactionStatus::Authorized);
    assert_eq!(found.external_id, "pi_1");

    assert!(provider.query_status("tx-2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_stripe_pending_refund_is_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/refunds"))
        .and(body_string_contains("payment_intent=pi_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "re_1",
            "status": "pending",
            "amount": 2000,
            "currency": "usd",
        })))
        .mount(&server)
        .await;

    let err = stripe(&server)
        .refund(&ProviderRefund {
            reference: "tx-1".into(),
            external_id: "pi_1".into(),
            amount: usd(2_000),
            reason: Some("requested_by_customer".into()),
        })
        .await
        .unwrap_err();
    assert!(err.is_outcome_unknown());
}

// ── Central bank ─────────────────────────────────────────────────────

fn exchange(server: &MockServer) -> (ExchangeRateService, Arc<InMemoryExchangeRateRepository>) {
    let rates = Arc::new(InMemoryExchangeRateRepository::new());
    let source = HttpRateSource::new(&server.uri(), Duration::from_secs(2)).unwrap();
    let service = ExchangeRateService::new(
        ExchangeConfig::default(),
        rates.clone(),
        Arc::new(InMemoryConversionRepository::new()),
    )
    .with_source(Arc::new(source));
    (service, rates)
}

#[tokio::test]
async fn test_refresh_rates_activates_all_tracked() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rates"))
        .and(query_param("currencies", "USD,EUR"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "date": "2026-10-18",
            "rates": [
                { "currency": "USD", "buy": "58.95" },
                { "currency": "EUR", "buy": "64.10" },
                { "currency": "XAU", "buy": "150000" },
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (service, rates) = exchange(&server);
    let refreshed = service.refresh_rates_from_central_source().await.unwrap();

    assert_eq!(refreshed.len(), 2);
    assert_eq!(rates.latest(Currency::USD).await.unwrap().unwrap().buy_rate, dec!(58.95));
    assert_eq!(rates.latest(Currency::EUR).await.unwrap().unwrap().buy_rate, dec!(64.10));

    // Served from cache without another request
    assert_eq!(service.get_current_rate(Currency::USD).await.unwrap().buy_rate, dec!(58.95));
}

#[tokio::test]
async fn test_refresh_rates_partial_answer_changes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rates"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "date": "2026-10-18",
            "rates": [{ "currency": "USD", "buy": "58.95" }]
        })))
        .mount(&server)
        .await;

    let (service, rates) = exchange(&server);
    let result = service.refresh_rates_from_central_source().await;

    assert!(matches!(result, Err(GatewayError::RateUnavailable(Currency::EUR))));
    assert!(rates.latest(Currency::USD).await.unwrap().is_none());
}

#[tokio::test]
async fn test_source_failure_falls_back_to_stored_rate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rates"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let (service, rates) = exchange(&server);
    let yesterday = chrono::Utc::now().date_naive() - chrono::Days::new(1);
    rates
        .save(ExchangeRate::new(Currency::USD, dec!(58.70), "central_bank").with_date(yesterday))
        .await
        .unwrap();

    let rate = service.get_current_rate(Currency::USD).await.unwrap();
    assert_eq!(rate.buy_rate, dec!(58.70));
    assert_eq!(rate.rate_date, yesterday);

    // The fallback is cached, so the outage is not paid for again
    let again = service.get_current_rate(Currency::USD).await.unwrap();
    assert_eq!(again.rate_date, yesterday);

    let missing = service.get_current_rate(Currency::EUR).await;
    assert!(matches!(missing, Err(GatewayError::RateUnavailable(Currency::EUR))));
}
