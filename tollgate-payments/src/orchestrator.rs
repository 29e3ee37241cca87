//! Charge, refund and tokenization use cases
//!
//! [`ChargeOrchestrator`] is the only component that touches every
//! collaborator: idempotency, currency conversion, gateway selection,
//! the provider call and the transaction record.

use crate::{
    error::{GatewayError, GatewayResult},
    exchange::{ConversionQuote, ExchangeRateService},
    gateway::{
        ChargeSource, GatewayAvailabilityService, GatewayCapabilities, GatewayFactory, GatewayId,
        GatewayProvider, PaymentMethodKind, ProviderCharge, ProviderReceipt, ProviderRefund,
    },
    idempotency::{
        IdempotencyKey, IdempotencyStore, IdempotentOperation, await_completion, run_idempotent,
    },
    memory::{InMemoryIdempotencyStore, InMemoryPaymentMethodStore, InMemoryTransactionRepository},
    money::{Currency, Money},
    payment_methods::{CardFingerprint, PaymentMethodStore, SavedPaymentMethod},
    transaction::{
        PaymentTransaction, RefundReport, StatusUpdate, TransactionRepository, TransactionStatus,
        UpdateSource,
    },
    types::{
        ChargeOutcome, ChargeRequest, ChargeResponse, ConversionSummary, PaymentInstrument,
        RefundOutcome, RefundRequest, RefundResponse, RemovalOutcome, TokenizeRequest,
    },
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tollgate_log::targets;
use uuid::Uuid;

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Currencies accepted from payers
    pub supported_currencies: Vec<Currency>,
    /// Bound on each provider call
    pub provider_timeout: Duration,
    /// How long a key deduplicates requests
    pub idempotency_ttl: chrono::Duration,
    /// How long a duplicate waits for the in-flight original. Zero
    /// rejects it immediately with `Conflict`.
    pub in_flight_wait: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            supported_currencies: vec![Currency::DOP, Currency::USD, Currency::EUR],
            provider_timeout: Duration::from_secs(30),
            idempotency_ttl: chrono::Duration::hours(24),
            in_flight_wait: Duration::ZERO,
        }
    }
}

/// Persistence collaborators
#[derive(Clone)]
pub struct PaymentStores {
    pub transactions: Arc<dyn TransactionRepository>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub methods: Arc<dyn PaymentMethodStore>,
}

impl PaymentStores {
    /// Process-local stores
    pub fn in_memory() -> Self {
        Self {
            transactions: Arc::new(InMemoryTransactionRepository::new()),
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            methods: Arc::new(InMemoryPaymentMethodStore::new()),
        }
    }
}

/// What the chosen gateway must support
#[derive(Debug, Clone, Copy)]
enum Requirement {
    Charge(Currency),
    Tokenization,
}

impl Requirement {
    /// The first capability the gateway lacks
    fn unmet(self, capabilities: &GatewayCapabilities) -> Option<String> {
        if !capabilities.supports_method(PaymentMethodKind::Card) {
            return Some("card payments".to_string());
        }
        match self {
            Self::Charge(currency) if !capabilities.supports_currency(currency) => {
                Some(format!("{} charges", currency))
            }
            Self::Tokenization if !capabilities.supports_tokenization => {
                Some("tokenization".to_string())
            }
            _ => None,
        }
    }
}

/// Gateway and instrument resolved for a charge
struct Selection {
    provider: Arc<dyn GatewayProvider>,
    source: ChargeSource,
    method_id: Option<Uuid>,
}

/// Payment use-case coordinator
pub struct ChargeOrchestrator {
    config: OrchestratorConfig,
    factory: Arc<GatewayFactory>,
    availability: Arc<GatewayAvailabilityService>,
    exchange: Arc<ExchangeRateService>,
    stores: PaymentStores,
}

impl ChargeOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        factory: Arc<GatewayFactory>,
        availability: Arc<GatewayAvailabilityService>,
        exchange: Arc<ExchangeRateService>,
        stores: PaymentStores,
    ) -> Self {
        Self {
            config,
            factory,
            availability,
            exchange,
            stores,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn factory(&self) -> &Arc<GatewayFactory> {
        &self.factory
    }

    pub fn availability(&self) -> &Arc<GatewayAvailabilityService> {
        &self.availability
    }

    pub fn exchange(&self) -> &Arc<ExchangeRateService> {
        &self.exchange
    }

    pub fn stores(&self) -> &PaymentStores {
        &self.stores
    }

    /// Charge a payer.
    ///
    /// A request repeating a completed `(idempotency_key, payer_id)` gets
    /// the stored response back without touching any provider. Declines
    /// and unknown outcomes are responses, not errors; errors mean no
    /// provider call was made or the provider refused the request shape.
    pub async fn charge(&self, request: ChargeRequest) -> GatewayResult<ChargeResponse> {
        request.validate(&self.config.supported_currencies)?;

        let key = IdempotencyKey::new(&request.idempotency_key, &request.payer_id);
        let result = run_idempotent(
            self.stores.idempotency.as_ref(),
            &key,
            IdempotentOperation::Charge,
            self.config.idempotency_ttl,
            || self.execute_charge(&request),
        )
        .await;

        self.replay_when_done(&key, result).await
    }

    async fn execute_charge(&self, request: &ChargeRequest) -> GatewayResult<ChargeResponse> {
        let settlement = self.exchange.settlement_currency();
        let transaction_id = Uuid::new_v4();

        let quote = if request.amount.currency != settlement {
            match self
                .exchange
                .convert_to_settlement(request.amount, Some(transaction_id))
                .await
            {
                Ok(quote) => Some(quote),
                Err(e) => {
                    let failed = new_transaction(request, transaction_id, request.amount);
                    return Err(self.record_failure(failed, e).await);
                }
            }
        } else {
            None
        };
        let charged = quote.as_ref().map_or(request.amount, |q| q.total);

        let mut transaction = new_transaction(request, transaction_id, charged);
        let selection = match self.select_for_charge(request, charged.currency).await {
            Ok(selection) => selection,
            Err(e) => return Err(self.record_failure(transaction, e).await),
        };
        let gateway = selection.provider.id();
        transaction.gateway = Some(gateway);
        transaction.payment_method_id = selection.method_id;
        self.stores.transactions.create(transaction).await?;

        let charge = ProviderCharge {
            reference: transaction_id.to_string(),
            amount: charged,
            source: selection.source,
            payer_id: request.payer_id.clone(),
            description: request.description.clone(),
            recurring: request.recurring,
            capture: request.capture,
        };
        let provider = selection.provider;
        let result = self
            .bounded(async {
                if charge.capture {
                    provider.charge(&charge).await
                } else {
                    provider.authorize(&charge).await
                }
            })
            .await;

        let transaction = match result {
            Ok(receipt) => self.apply_receipt(transaction_id, &receipt, UpdateSource::Provider).await?,
            Err(e) if e.is_outcome_unknown() => {
                self.flag_unknown(transaction_id, gateway, TransactionStatus::Pending, &e)
                    .await?
            }
            Err(GatewayError::ProviderDeclined { code, message }) => {
                tracing::info!(
                    transaction_id = %transaction_id,
                    gateway = %gateway,
                    code = %code,
                    "Charge declined"
                );
                let update = StatusUpdate::new(TransactionStatus::Failed, UpdateSource::Provider)
                    .with_response(Some(code), Some(message));
                self.stores.transactions.apply_update(transaction_id, &update).await?.0
            }
            Err(e) => {
                let update = StatusUpdate::new(TransactionStatus::Failed, UpdateSource::Provider)
                    .with_response(Some(e.code().to_string()), Some(e.to_string()));
                self.stores.transactions.apply_update(transaction_id, &update).await?;
                tracing::error!(
                    transaction_id = %transaction_id,
                    gateway = %gateway,
                    error = %e,
                    "Provider rejected charge"
                );
                return Err(e);
            }
        };

        if let Some(method_id) = selection.method_id
            && transaction.status.is_successful()
            && let Err(e) = self.stores.methods.record_usage(method_id, Utc::now()).await
        {
            tracing::warn!(method_id = %method_id, error = %e, "Failed to record method usage");
        }

        let response = charge_response(&transaction, gateway, quote.as_ref());
        tracing::info!(
            transaction_id = %transaction_id,
            payer_id = %request.payer_id,
            gateway = %gateway,
            status = %transaction.status,
            amount = %charged,
            "Charge processed"
        );
        Ok(response)
    }

    /// Capture an authorized transaction for its full amount
    pub async fn capture(&self, transaction_id: Uuid) -> GatewayResult<PaymentTransaction> {
        let transaction = self.transaction(transaction_id).await?;
        if transaction.status != TransactionStatus::Authorized {
            return Err(GatewayError::Validation(format!(
                "cannot capture a {} transaction",
                transaction.status
            )));
        }
        let (gateway, external_id) = provider_reference(&transaction)?;
        let provider = self.factory.get_provider(gateway)?;

        match self.bounded(provider.capture(&external_id, transaction.amount)).await {
            Ok(receipt) => self.apply_receipt(transaction_id, &receipt, UpdateSource::Provider).await,
            Err(e) => {
                if e.is_outcome_unknown() {
                    self.flag_unknown(transaction_id, gateway, TransactionStatus::Authorized, &e)
                        .await?;
                }
                Err(e)
            }
        }
    }

    /// Refund all or part of a captured transaction.
    ///
    /// When the provider outcome is unknown the response is
    /// `PendingVerification` and the key stays completed, so a retry with
    /// the same key replays it instead of refunding again. A transaction
    /// flagged for reconciliation refuses new refunds until it is resolved.
    pub async fn refund(&self, request: RefundRequest) -> GatewayResult<RefundResponse> {
        if request.payer_id.trim().is_empty() {
            return Err(GatewayError::Validation("payer id is required".into()));
        }
        if request.idempotency_key.trim().is_empty() {
            return Err(GatewayError::Validation("idempotency key is required".into()));
        }

        let key = IdempotencyKey::new(&request.idempotency_key, &request.payer_id);
        let result = run_idempotent(
            self.stores.idempotency.as_ref(),
            &key,
            IdempotentOperation::Refund,
            self.config.idempotency_ttl,
            || self.execute_refund(&request),
        )
        .await;

        self.replay_when_done(&key, result).await
    }

    async fn execute_refund(&self, request: &RefundRequest) -> GatewayResult<RefundResponse> {
        let transaction = self
            .stores
            .transactions
            .get(request.transaction_id)
            .await?
            .filter(|tx| tx.payer_id == request.payer_id)
            .ok_or_else(|| GatewayError::not_found("transaction", request.transaction_id))?;

        if transaction.needs_reconciliation {
            return Err(GatewayError::Conflict(format!(
                "transaction {} is awaiting reconciliation",
                transaction.id
            )));
        }

        let amount = request.amount.unwrap_or_else(|| transaction.refundable());
        // Dry run of the accounting before money moves
        transaction.clone().record_refund(amount)?;

        let (gateway, external_id) = provider_reference(&transaction)?;
        let provider = self.factory.get_provider(gateway)?;
        let refund = ProviderRefund {
            reference: transaction.id.to_string(),
            external_id,
            amount,
            reason: request.reason.clone(),
        };

        let receipt = match self.bounded(provider.refund(&refund)).await {
            Ok(receipt) => receipt,
            Err(e) if e.is_outcome_unknown() => {
                let current = self
                    .flag_unknown(transaction.id, gateway, transaction.status, &e)
                    .await?;
                return Ok(RefundResponse {
                    transaction_id: transaction.id,
                    outcome: RefundOutcome::PendingVerification,
                    refund_id: None,
                    refunded: amount,
                    total_refunded: current.refunded_amount,
                    status: current.status,
                    processed_at: Utc::now(),
                });
            }
            Err(e) => return Err(e),
        };

        let updated = match self
            .stores
            .transactions
            .record_refund(transaction.id, &receipt.external_id, amount)
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                tracing::warn!(
                    target: targets::RECONCILIATION,
                    transaction_id = %transaction.id,
                    refund_id = %receipt.external_id,
                    error = %e,
                    "Provider refunded but accounting failed"
                );
                self.stores
                    .transactions
                    .mark_reconciliation(transaction.id, "refund accounting failed")
                    .await?;
                self.transaction(transaction.id).await?
            }
        };

        tracing::info!(
            transaction_id = %transaction.id,
            gateway = %gateway,
            refunded = %amount,
            total_refunded = %updated.refunded_amount,
            "Refund processed"
        );

        Ok(RefundResponse {
            transaction_id: transaction.id,
            outcome: RefundOutcome::Completed,
            refund_id: Some(receipt.external_id),
            refunded: amount,
            total_refunded: updated.refunded_amount,
            status: updated.status,
            processed_at: Utc::now(),
        })
    }

    /// Save a card with a gateway chosen on the new-payer path.
    ///
    /// A card matching an active saved method is not tokenized again; the
    /// existing method is returned. The payer's first method becomes the
    /// default.
    pub async fn tokenize(&self, request: TokenizeRequest) -> GatewayResult<SavedPaymentMethod> {
        if request.payer_id.trim().is_empty() {
            return Err(GatewayError::Validation("payer id is required".into()));
        }
        let card = &request.card;
        card.validate(Utc::now())?;

        let fingerprint = CardFingerprint {
            last4: card.last4(),
            brand: card.brand(),
            exp_month: card.exp_month,
            exp_year: card.exp_year,
        };
        let methods = &self.stores.methods;
        if let Some(existing) = methods.find_similar(&request.payer_id, &fingerprint).await? {
            tracing::debug!(method_id = %existing.id, "Card already saved");
            if request.make_default && !existing.is_default {
                return methods.set_as_default(existing.id, &request.payer_id).await;
            }
            return Ok(existing);
        }

        let provider = self
            .select_new_payer_gateway(request.gateway, Requirement::Tokenization)
            .await?;
        let tokenized = self.bounded(provider.tokenize(&request.payer_id, card)).await?;

        let first = methods.get_default(&request.payer_id).await?.is_none();
        let mut method = SavedPaymentMethod::new(
            &request.payer_id,
            provider.id(),
            tokenized.token,
            tokenized.brand,
            tokenized.last4,
            tokenized.exp_month,
            tokenized.exp_year,
        );
        if request.make_default || first {
            method = method.as_default();
        }

        let method = methods.create(method).await?;
        tracing::info!(
            method_id = %method.id,
            payer_id = %method.payer_id,
            gateway = %method.gateway,
            is_default = method.is_default,
            "Payment method saved"
        );
        Ok(method)
    }

    /// Active saved methods, default first
    pub async fn list_saved_methods(&self, payer_id: &str) -> GatewayResult<Vec<SavedPaymentMethod>> {
        self.stores.methods.list_for_payer(payer_id).await
    }

    pub async fn set_default_method(&self, payer_id: &str, method_id: Uuid) -> GatewayResult<SavedPaymentMethod> {
        self.stores.methods.set_as_default(method_id, payer_id).await
    }

    /// Remove a saved method; kept as inactive while transactions reference it.
    ///
    /// Removing the default promotes the payer's most recently added active
    /// method.
    pub async fn remove_saved_method(&self, payer_id: &str, method_id: Uuid) -> GatewayResult<RemovalOutcome> {
        let method = self.saved_method(payer_id, method_id).await?;

        let references = self.stores.transactions.count_by_payment_method(method.id).await?;
        let (outcome, promoted) = if references > 0 {
            let promoted = self.stores.methods.deactivate(method.id).await?;
            tracing::info!(method_id = %method.id, references, "Payment method deactivated");
            (RemovalOutcome::Deactivated, promoted)
        } else {
            let promoted = self.stores.methods.delete(method.id).await?;
            tracing::info!(method_id = %method.id, "Payment method deleted");
            (RemovalOutcome::Deleted, promoted)
        };

        if let Some(promoted) = promoted {
            tracing::info!(payer_id = %payer_id, method_id = %promoted, "Default payment method promoted");
        }
        Ok(outcome)
    }

    /// Resolve a transaction by asking its provider.
    ///
    /// The answer goes through the same transition check as webhooks, and
    /// a reported refund through the refund accounting. A provider that
    /// never received the charge fails it; one still processing leaves it
    /// flagged.
    pub async fn reconcile(&self, transaction_id: Uuid) -> GatewayResult<PaymentTransaction> {
        let transaction = self.transaction(transaction_id).await?;
        let gateway = transaction.gateway.ok_or_else(|| {
            GatewayError::Validation(format!("transaction {} never reached a gateway", transaction_id))
        })?;
        let provider = self.factory.get_provider(gateway)?;

        let reference = transaction_id.to_string();
        let transactions = &self.stores.transactions;
        let (updated, outcome) = match self.bounded(provider.query_status(&reference)).await? {
            Some(receipt) if receipt.status == TransactionStatus::Pending => {
                tracing::info!(
                    target: targets::RECONCILIATION,
                    transaction_id = %transaction_id,
                    gateway = %gateway,
                    "Provider still processing"
                );
                return Ok(transaction);
            }
            Some(receipt) => match refund_report(&receipt) {
                Some(report) => {
                    transactions
                        .apply_refund(transaction_id, &report, UpdateSource::Reconciliation)
                        .await?
                }
                None => {
                    let update = receipt_update(&receipt, UpdateSource::Reconciliation);
                    transactions.apply_update(transaction_id, &update).await?
                }
            },
            None => {
                let update = StatusUpdate::new(TransactionStatus::Failed, UpdateSource::Reconciliation)
                    .with_response(
                        Some("not_received".to_string()),
                        Some("provider has no record of the charge".to_string()),
                    );
                transactions.apply_update(transaction_id, &update).await?
            }
        };

        tracing::info!(
            target: targets::RECONCILIATION,
            transaction_id = %transaction_id,
            gateway = %gateway,
            transition = ?outcome.transition,
            from = %outcome.previous,
            to = %outcome.current,
            still_flagged = updated.needs_reconciliation,
            "Transaction reconciled"
        );
        Ok(updated)
    }

    /// Reconcile every flagged transaction, returning those resolved
    pub async fn reconcile_pending(&self) -> GatewayResult<Vec<PaymentTransaction>> {
        let mut resolved = Vec::new();
        for transaction in self.pending_reconciliation().await? {
            match self.reconcile(transaction.id).await {
                Ok(updated) if !updated.needs_reconciliation => resolved.push(updated),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        target: targets::RECONCILIATION,
                        transaction_id = %transaction.id,
                        error = %e,
                        "Reconciliation failed"
                    );
                }
            }
        }
        Ok(resolved)
    }

    pub async fn pending_reconciliation(&self) -> GatewayResult<Vec<PaymentTransaction>> {
        self.stores.transactions.list_pending_reconciliation().await
    }

    pub async fn transaction(&self, id: Uuid) -> GatewayResult<PaymentTransaction> {
        self.stores
            .transactions
            .get(id)
            .await?
            .ok_or_else(|| GatewayError::not_found("transaction", id))
    }

    async fn select_for_charge(&self, request: &ChargeRequest, currency: Currency) -> GatewayResult<Selection> {
        match &request.instrument {
            // Bound to its gateway regardless of new-payer availability
            PaymentInstrument::SavedMethod(id) => {
                let method = self.saved_method(&request.payer_id, *id).await?;
                if !method.active {
                    return Err(GatewayError::Validation(format!(
                        "payment method {} is no longer active",
                        method.id
                    )));
                }
                let provider = self.factory.get_provider(method.gateway)?;
                Ok(Selection {
                    provider,
                    source: ChargeSource::Token(method.token),
                    method_id: Some(method.id),
                })
            }
            PaymentInstrument::Card(card) => {
                let provider = self
                    .select_new_payer_gateway(request.gateway, Requirement::Charge(currency))
                    .await?;
                Ok(Selection {
                    provider,
                    source: ChargeSource::Card(card.clone()),
                    method_id: None,
                })
            }
        }
    }

    /// Pick a gateway for a payer choosing one for the first time: the
    /// requested one if it qualifies, otherwise the default, otherwise the
    /// first enabled gateway that is available and capable.
    async fn select_new_payer_gateway(
        &self,
        requested: Option<GatewayId>,
        requirement: Requirement,
    ) -> GatewayResult<Arc<dyn GatewayProvider>> {
        if let Some(id) = requested {
            let provider = self.factory.get_provider(id)?;
            if !self.availability.is_enabled_for_new_users(id).await {
                return Err(GatewayError::GatewayDisabled(id));
            }
            if let Some(capability) = requirement.unmet(provider.capabilities()) {
                return Err(GatewayError::UnsupportedCapability {
                    gateway: id,
                    capability,
                });
            }
            if !self.factory.is_provider_available(id).await {
                return Err(GatewayError::NoGatewayAvailable(format!("gateway {} is not available", id)));
            }
            return Ok(provider);
        }

        let mut candidates = self.availability.get_enabled_gateways().await;
        if let Some(default) = self.factory.default_gateway()
            && let Some(pos) = candidates.iter().position(|id| *id == default)
        {
            let default = candidates.remove(pos);
            candidates.insert(0, default);
        }

        for id in candidates {
            let Ok(provider) = self.factory.get_provider(id) else {
                continue;
            };
            if let Some(capability) = requirement.unmet(provider.capabilities()) {
                tracing::debug!(gateway = %id, capability = %capability, "Skipping gateway");
                continue;
            }
            if self.factory.is_provider_available(id).await {
                return Ok(provider);
            }
            tracing::debug!(gateway = %id, "Skipping unavailable gateway");
        }

        Err(GatewayError::NoGatewayAvailable(match requirement {
            Requirement::Charge(currency) => format!("no enabled gateway can charge {}", currency),
            Requirement::Tokenization => "no enabled gateway can tokenize cards".to_string(),
        }))
    }

    async fn saved_method(&self, payer_id: &str, id: Uuid) -> GatewayResult<SavedPaymentMethod> {
        self.stores
            .methods
            .get(id)
            .await?
            .filter(|m| m.payer_id == payer_id)
            .ok_or_else(|| GatewayError::not_found("payment method", id))
    }

    async fn bounded<T>(&self, call: impl Future<Output = GatewayResult<T>>) -> GatewayResult<T> {
        tokio::time::timeout(self.config.provider_timeout, call).await?
    }

    async fn apply_receipt(
        &self,
        transaction_id: Uuid,
        receipt: &ProviderReceipt,
        source: UpdateSource,
    ) -> GatewayResult<PaymentTransaction> {
        let update = receipt_update(receipt, source);
        let (transaction, _) = self.stores.transactions.apply_update(transaction_id, &update).await?;

        if transaction.status == TransactionStatus::Pending {
            self.stores
                .transactions
                .mark_reconciliation(transaction_id, "provider still processing")
                .await?;
            return self.transaction(transaction_id).await;
        }
        Ok(transaction)
    }

    /// Outcome unknown: flag the transaction while it still has the status
    /// the call started from. A webhook that settled it in the meantime
    /// wins and nothing is flagged.
    async fn flag_unknown(
        &self,
        transaction_id: Uuid,
        gateway: GatewayId,
        expected: TransactionStatus,
        error: &GatewayError,
    ) -> GatewayResult<PaymentTransaction> {
        let flagged = self
            .stores
            .transactions
            .mark_reconciliation_while(transaction_id, expected, &error.to_string())
            .await?;
        if flagged {
            tracing::warn!(
                target: targets::RECONCILIATION,
                transaction_id = %transaction_id,
                gateway = %gateway,
                error = %error,
                "Provider outcome unknown"
            );
        } else {
            tracing::info!(
                target: targets::RECONCILIATION,
                transaction_id = %transaction_id,
                gateway = %gateway,
                error = %error,
                "Provider call failed after a webhook settled the transaction"
            );
        }
        self.transaction(transaction_id).await
    }

    async fn record_failure(&self, mut transaction: PaymentTransaction, error: GatewayError) -> GatewayError {
        let update = StatusUpdate::new(TransactionStatus::Failed, UpdateSource::Provider)
            .with_response(Some(error.code().to_string()), Some(error.to_string()));
        transaction.apply(&update);

        tracing::warn!(
            transaction_id = %transaction.id,
            payer_id = %transaction.payer_id,
            error = %error,
            "Charge failed before reaching a provider"
        );
        if let Err(e) = self.stores.transactions.create(transaction).await {
            tracing::error!(error = %e, "Failed to record failed charge");
        }
        error
    }

    /// On `Conflict`, wait for the original attempt and return its response.
    async fn replay_when_done<T: DeserializeOwned>(
        &self,
        key: &IdempotencyKey,
        result: GatewayResult<T>,
    ) -> GatewayResult<T> {
        match result {
            Err(GatewayError::Conflict(message)) if !self.config.in_flight_wait.is_zero() => {
                match await_completion(self.stores.idempotency.as_ref(), key, self.config.in_flight_wait).await? {
                    Some(response) => Ok(response),
                    None => Err(GatewayError::Conflict(message)),
                }
            }
            other => other,
        }
    }
}

fn new_transaction(request: &ChargeRequest, id: Uuid, charged: Money) -> PaymentTransaction {
    let mut transaction = PaymentTransaction::pending(&request.payer_id, charged, request.amount);
    transaction.id = id;
    transaction.recurring = request.recurring;
    transaction.subscription_id = request.subscription_id.clone();
    transaction
}

fn provider_reference(transaction: &PaymentTransaction) -> GatewayResult<(GatewayId, String)> {
    match (transaction.gateway, &transaction.external_id) {
        (Some(gateway), Some(external_id)) => Ok((gateway, external_id.clone())),
        _ => Err(GatewayError::Validation(format!(
            "transaction {} has no provider reference",
            transaction.id
        ))),
    }
}

fn receipt_update(receipt: &ProviderReceipt, source: UpdateSource) -> StatusUpdate {
    let mut update = StatusUpdate::new(receipt.status, source)
        .with_external_id(&receipt.external_id)
        .with_response(receipt.response_code.clone(), receipt.message.clone());
    update.authorization_code = receipt.authorization_code.clone();
    update.commission = receipt.commission;
    update.net_amount = receipt.net_amount;
    update
}

/// A refund reported by a status query, when it carries an amount
fn refund_report(receipt: &ProviderReceipt) -> Option<RefundReport> {
    if !receipt.status.is_refund() {
        return None;
    }
    receipt.amount.map(|amount| RefundReport::Single {
        refund_id: receipt.external_id.clone(),
        amount,
    })
}

fn outcome_for(status: TransactionStatus) -> ChargeOutcome {
    match status {
        TransactionStatus::Pending => ChargeOutcome::PendingVerification,
        TransactionStatus::Failed => ChargeOutcome::Declined,
        _ => ChargeOutcome::Approved,
    }
}

fn charge_response(
    transaction: &PaymentTransaction,
    gateway: GatewayId,
    quote: Option<&ConversionQuote>,
) -> ChargeResponse {
    ChargeResponse {
        transaction_id: transaction.id,
        status: transaction.status,
        outcome: outcome_for(transaction.status),
        gateway: transaction.gateway.unwrap_or(gateway),
        external_id: transaction.external_id.clone(),
        amount: transaction.amount,
        original_amount: transaction.original_amount,
        response_code: transaction.response_code.clone(),
        response_message: transaction.response_message.clone(),
        authorization_code: transaction.authorization_code.clone(),
        conversion: quote.map(|q| ConversionSummary {
            rate_id: q.rate.id,
            rate: q.rate.buy_rate,
            stale: q.stale,
            converted: q.converted,
            tax: q.tax,
            total: q.total,
        }),
        payment_method_id: transaction.payment_method_id,
        processed_at: transaction.processed_at.unwrap_or(transaction.updated_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_mapping() {
        assert_eq!(outcome_for(TransactionStatus::Captured), ChargeOutcome::Approved);
        assert_eq!(outcome_for(TransactionStatus::Authorized), ChargeOutcome::Approved);
        assert_eq!(outcome_for(TransactionStatus::Failed), ChargeOutcome::Declined);
        assert_eq!(
            outcome_for(TransactionStatus::Pending),
            ChargeOutcome::PendingVerification
        );
    }

    #[test]
    fn test_requirement_checks() {
        let caps = GatewayCapabilities {
            supports_tokenization: false,
            currencies: vec![Currency::DOP],
            payment_methods: vec![PaymentMethodKind::Card],
        };
        assert!(Requirement::Charge(Currency::DOP).unmet(&caps).is_none());
        assert!(Requirement::Charge(Currency::USD).unmet(&caps).is_some());
        assert_eq!(
            Requirement::Tokenization.unmet(&caps).as_deref(),
            Some("tokenization")
        );

        let wallet_only = GatewayCapabilities {
            payment_methods: vec![PaymentMethodKind::Wallet],
            ..caps
        };
        assert_eq!(
            Requirement::Charge(Currency::DOP).unmet(&wallet_only).as_deref(),
            Some("card payments")
        );
    }

    #[test]
    fn test_refund_report_needs_amount() {
        let mut receipt = ProviderReceipt::new("44022", TransactionStatus::Refunded);
        assert!(refund_report(&receipt).is_none());

        receipt.amount = Some(Money::new(2_000, Currency::DOP));
        assert_eq!(
            refund_report(&receipt),
            Some(RefundReport::Single {
                refund_id: "44022".into(),
                amount: Money::new(2_000, Currency::DOP),
            })
        );

        receipt.status = TransactionStatus::Captured;
        assert!(refund_report(&receipt).is_none());
    }

    #[test]
    fn test_provider_reference_required() {
        let tx = PaymentTransaction::pending(
            "payer-1",
            Money::new(100, Currency::DOP),
            Money::new(100, Currency::DOP),
        );
        assert!(matches!(provider_reference(&tx), Err(GatewayError::Validation(_))));
    }
}
