//! Shared fixtures: a scriptable gateway and a fully wired orchestrator

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tollgate_features::InMemoryFlagStore;
use tollgate_payments::gateway::{
    ChargeSource, GatewayCapabilities, GatewayCategory, GatewayProvider, PaymentMethodKind,
    ProviderCharge, ProviderReceipt, ProviderRefund, TokenizedCard,
};
use tollgate_payments::memory::{
    InMemoryConversionRepository, InMemoryExchangeRateRepository, InMemoryIdempotencyStore,
    InMemoryPaymentMethodStore, InMemoryTransactionRepository,
};
use tollgate_payments::signature::{SignatureAlgorithm, WebhookSigner};
use tollgate_payments::*;

pub const STUB_SECRET: &str = "stub-webhook-secret";

/// How the stub answers money-moving calls
#[derive(Debug, Clone, PartialEq)]
pub enum StubBehavior {
    Approve,
    Authorize,
    Decline(&'static str),
    /// Transport failure; the provider never saw the charge
    Unavailable,
    /// Charge went through but the answer was lost
    LostResponse,
    /// Provider accepted the charge and is still processing
    Processing,
    /// Never answers
    Hang,
}

/// Scriptable in-process gateway
pub struct StubGateway {
    id: GatewayId,
    capabilities: GatewayCapabilities,
    behavior: Mutex<StubBehavior>,
    refund_behavior: Mutex<StubBehavior>,
    healthy: AtomicBool,
    delay: Mutex<Duration>,
    received: Mutex<HashMap<String, ProviderReceipt>>,
    signer: WebhookSigner,
    pub charges: AtomicUsize,
    pub refunds: AtomicUsize,
    pub tokenizations: AtomicUsize,
}

impl StubGateway {
    pub fn new(id: GatewayId) -> Self {
        Self {
            id,
            capabilities: GatewayCapabilities {
                supports_tokenization: true,
                currencies: vec![Currency::DOP, Currency::USD],
                payment_methods: vec![PaymentMethodKind::Card],
            },
            behavior: Mutex::new(StubBehavior::Approve),
            refund_behavior: Mutex::new(StubBehavior::Approve),
            healthy: AtomicBool::new(true),
            delay: Mutex::new(Duration::ZERO),
            received: Mutex::new(HashMap::new()),
            signer: WebhookSigner::new(STUB_SECRET, SignatureAlgorithm::HmacSha256),
            charges: AtomicUsize::new(0),
            refunds: AtomicUsize::new(0),
            tokenizations: AtomicUsize::new(0),
        }
    }

    pub fn without_tokenization(mut self) -> Self {
        self.capabilities.supports_tokenization = false;
        self
    }

    pub fn with_currencies(mut self, currencies: Vec<Currency>) -> Self {
        self.capabilities.currencies = currencies;
        self
    }

    pub fn set_behavior(&self, behavior: StubBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// How `refund` answers; only `Unavailable`, `LostResponse` and
    /// `Decline` differ from approving
    pub fn set_refund_behavior(&self, behavior: StubBehavior) {
        *self.refund_behavior.lock() = behavior;
    }

    pub fn refund_count(&self) -> usize {
        self.refunds.load(Ordering::SeqCst)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn charge_count(&self) -> usize {
        self.charges.load(Ordering::SeqCst)
    }

    /// Pretend the provider settled `reference` with `status`
    pub fn settle(&self, reference: &str, external_id: &str, status: TransactionStatus) {
        self.received
            .lock()
            .insert(reference.to_string(), ProviderReceipt::new(external_id, status));
    }

    /// Signed webhook body
    pub fn webhook(&self, event: serde_json::Value) -> (Vec<u8>, String) {
        let body = serde_json::to_vec(&event).unwrap();
        let signature = self.signer.sign(&body).unwrap();
        (body, signature)
    }
}

#[derive(Deserialize)]
struct StubEvent {
    event_id: String,
    external_id: Option<String>,
    reference: Option<String>,
    status: String,
    amount: Option<i64>,
    currency: Option<String>,
    /// Refund events: one refund of `amount`
    refund_id: Option<String>,
    /// Refund events: running refunded total
    refunded_total: Option<i64>,
}

#[async_trait]
impl GatewayProvider for StubGateway {
    fn id(&self) -> GatewayId {
        self.id
    }

    fn display_name(&self) -> &str {
        "Stub"
    }

    fn category(&self) -> GatewayCategory {
        GatewayCategory::Fintech
    }

    fn capabilities(&self) -> &GatewayCapabilities {
        &self.capabilities
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn validate_configuration(&self) -> Vec<String> {
        Vec::new()
    }

    async fn charge(&self, request: &ProviderCharge) -> GatewayResult<ProviderReceipt> {
        let n = self.charges.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let external_id = format!("{}-{}", self.id, n);
        let behavior = self.behavior.lock().clone();
        let status = match behavior {
            StubBehavior::Approve if request.capture => TransactionStatus::Captured,
            StubBehavior::Approve | StubBehavior::Authorize => TransactionStatus::Authorized,
            StubBehavior::Processing => TransactionStatus::Pending,
            StubBehavior::Decline(code) => return Err(GatewayError::declined(code, "Do not honor")),
            StubBehavior::Unavailable => {
                return Err(GatewayError::ProviderUnavailable("connection reset".into()));
            }
            StubBehavior::LostResponse => {
                self.settle(&request.reference, &external_id, TransactionStatus::Captured);
                return Err(GatewayError::ProviderUnavailable("connection reset".into()));
            }
            StubBehavior::Hang => std::future::pending().await,
        };

        if let ChargeSource::Token(token) = &request.source {
            assert!(token.starts_with("tok-"), "unexpected token {}", token);
        }

        let mut receipt = ProviderReceipt::new(&external_id, status).with_response("00", "Approved");
        receipt.amount = Some(request.amount);
        receipt.authorization_code = Some(format!("A{:05}", n));
        self.received.lock().insert(request.reference.clone(), receipt.clone());
        Ok(receipt)
    }

    async fn capture(&self, external_id: &str, amount: Money) -> GatewayResult<ProviderReceipt> {
        let mut receipt = ProviderReceipt::new(external_id, TransactionStatus::Captured);
        receipt.amount = Some(amount);
        Ok(receipt)
    }

    async fn refund(&self, request: &ProviderRefund) -> GatewayResult<ProviderReceipt> {
        let n = self.refunds.fetch_add(1, Ordering::SeqCst) + 1;
        let mut receipt = ProviderReceipt::new(format!("re-{}", n), TransactionStatus::Refunded);
        receipt.amount = Some(request.amount);

        let behavior = self.refund_behavior.lock().clone();
        match behavior {
            StubBehavior::Decline(code) => Err(GatewayError::declined(code, "Refund refused")),
            StubBehavior::Unavailable => Err(GatewayError::ProviderUnavailable("connection reset".into())),
            StubBehavior::LostResponse => {
                self.received.lock().insert(request.reference.clone(), receipt);
                Err(GatewayError::ProviderUnavailable("connection reset".into()))
            }
            _ => Ok(receipt),
        }
    }

    async fn tokenize(&self, _payer_id: &str, card: &CardDetails) -> GatewayResult<TokenizedCard> {
        let n = self.tokenizations.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TokenizedCard::from_card(format!("tok-{}", n), card))
    }

    async fn query_status(&self, reference: &str) -> GatewayResult<Option<ProviderReceipt>> {
        Ok(self.received.lock().get(reference).cloned())
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> GatewayResult<()> {
        self.signer.verify(payload, signature)
    }

    fn parse_webhook(&self, payload: &[u8]) -> GatewayResult<Option<WebhookEvent>> {
        let event: StubEvent = serde_json::from_slice(payload)?;
        let status = match event.status.as_str() {
            "captured" => TransactionStatus::Captured,
            "authorized" => TransactionStatus::Authorized,
            "failed" => TransactionStatus::Failed,
            "refunded" => TransactionStatus::Refunded,
            "partially_refunded" => TransactionStatus::PartiallyRefunded,
            "pending" => TransactionStatus::Pending,
            _ => return Ok(None),
        };
        let currency = event.currency.as_deref().and_then(Currency::from_code);
        let amount = match (event.amount, currency) {
            (Some(amount), Some(currency)) => Some(Money::new(amount, currency)),
            _ => None,
        };
        let refund = match (event.refund_id, amount, event.refunded_total, currency) {
            (Some(refund_id), Some(amount), _, _) => Some(RefundReport::Single { refund_id, amount }),
            (_, _, Some(total), Some(currency)) => Some(RefundReport::Cumulative {
                total: Money::new(total, currency),
                refund_ids: Vec::new(),
            }),
            _ => None,
        };

        Ok(Some(WebhookEvent {
            event_id: event.event_id,
            gateway: self.id,
            external_id: event.external_id,
            reference: event.reference,
            status,
            amount,
            refund,
            occurred_at: Utc::now(),
        }))
    }
}

pub fn card() -> CardDetails {
    CardDetails::new("4111 1111 1111 1111", 12, 2030, "123").with_holder("Ana Pérez")
}

pub fn other_card() -> CardDetails {
    CardDetails::new("5555555555554444", 6, 2031, "456")
}

pub fn dop(amount: i64) -> Money {
    Money::new(amount, Currency::DOP)
}

pub fn usd(amount: i64) -> Money {
    Money::new(amount, Currency::USD)
}

/// Orchestrator wired to stub gateways and in-memory stores
pub struct Harness {
    pub registry: Arc<GatewayRegistry>,
    pub flags: Arc<InMemoryFlagStore>,
    pub rates: Arc<InMemoryExchangeRateRepository>,
    pub conversions: Arc<InMemoryConversionRepository>,
    pub transactions: Arc<InMemoryTransactionRepository>,
    pub methods: Arc<InMemoryPaymentMethodStore>,
    pub idempotency: Arc<InMemoryIdempotencyStore>,
    pub orchestrator: Arc<ChargeOrchestrator>,
    pub webhooks: WebhookIngestor,
}

impl Harness {
    pub fn new(gateways: &[Arc<StubGateway>], default: Option<GatewayId>) -> Self {
        Self::with_config(gateways, default, OrchestratorConfig::default())
    }

    pub fn with_config(
        gateways: &[Arc<StubGateway>],
        default: Option<GatewayId>,
        config: OrchestratorConfig,
    ) -> Self {
        let registry = Arc::new(GatewayRegistry::new());
        for gateway in gateways {
            registry.register(gateway.clone());
        }

        let flags = Arc::new(InMemoryFlagStore::new());
        let availability = GatewayAvailabilityService::new(registry.clone()).with_store(flags.clone());
        let factory = GatewayFactory::new(registry.clone(), default);

        let rates = Arc::new(InMemoryExchangeRateRepository::new());
        let conversions = Arc::new(InMemoryConversionRepository::new());
        let exchange = ExchangeRateService::new(ExchangeConfig::default(), rates.clone(), conversions.clone());

        let transactions = Arc::new(InMemoryTransactionRepository::new());
        let methods = Arc::new(InMemoryPaymentMethodStore::new());
        let idempotency = Arc::new(InMemoryIdempotencyStore::new());
        let stores = PaymentStores {
            transactions: transactions.clone(),
            idempotency: idempotency.clone(),
            methods: methods.clone(),
        };

        let orchestrator = ChargeOrchestrator::new(
            config,
            Arc::new(factory),
            Arc::new(availability),
            Arc::new(exchange),
            stores,
        );
        let webhooks = WebhookIngestor::new(registry.clone(), transactions.clone());

        Self {
            registry,
            flags,
            rates,
            conversions,
            transactions,
            methods,
            idempotency,
            orchestrator: Arc::new(orchestrator),
            webhooks,
        }
    }

    /// Store a rate fetched `age` ago
    pub async fn seed_rate(&self, currency: Currency, rate: Decimal, age: chrono::Duration) -> ExchangeRate {
        let fetched_at = Utc::now() - age;
        self.rates
            .save(ExchangeRate::new(currency, rate, "central_bank").fetched_at(fetched_at))
            .await
            .unwrap()
    }

    /// Switch a gateway on or off for new payers
    pub async fn set_enabled(&self, id: GatewayId, enabled: bool) {
        self.flags.set(&gateway::new_payers_flag(id), enabled).await;
    }
}
