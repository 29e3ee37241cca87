//! In-memory persistence
//!
//! Process-local implementations of every repository, used in tests and
//! single-node deployments. Each multi-row effect runs under one lock.

use crate::{
    error::{GatewayError, GatewayResult},
    exchange::{ConversionRepository, CurrencyConversion, ExchangeRate, ExchangeRateRepository},
    gateway::GatewayId,
    idempotency::{BeginOutcome, IdempotencyKey, IdempotencyRecord, IdempotencyStore, IdempotentOperation},
    money::{Currency, Money},
    payment_methods::{CardFingerprint, PaymentMethodStore, SavedPaymentMethod},
    transaction::{
        PaymentTransaction, RefundReport, StatusUpdate, TransactionRepository, TransactionStatus, UpdateOutcome,
        UpdateSource,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use uuid::Uuid;

/// In-memory transaction repository
#[derive(Default)]
pub struct InMemoryTransactionRepository {
    transactions: RwLock<HashMap<Uuid, PaymentTransaction>>,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored transaction, oldest first
    pub fn all(&self) -> Vec<PaymentTransaction> {
        let mut all: Vec<_> = self.transactions.read().values().cloned().collect();
        all.sort_by_key(|tx| tx.created_at);
        all
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn create(&self, transaction: PaymentTransaction) -> GatewayResult<()> {
        let mut transactions = self.transactions.write();
        if transactions.contains_key(&transaction.id) {
            return Err(GatewayError::Storage(format!(
                "transaction {} already exists",
                transaction.id
            )));
        }
        transactions.insert(transaction.id, transaction);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> GatewayResult<Option<PaymentTransaction>> {
        Ok(self.transactions.read().get(&id).cloned())
    }

    async fn find_by_external_id(
        &self,
        gateway: GatewayId,
        external_id: &str,
    ) -> GatewayResult<Option<PaymentTransaction>> {
        Ok(self
            .transactions
            .read()
            .values()
            .find(|tx| {
                tx.gateway == Some(gateway)
                    && (tx.external_id.as_deref() == Some(external_id)
                        || tx.refund_ids.iter().any(|id| id == external_id))
            })
            .cloned())
    }

    async fn apply_update(
        &self,
        id: Uuid,
        update: &StatusUpdate,
    ) -> GatewayResult<(PaymentTransaction, UpdateOutcome)> {
        let mut transactions = self.transactions.write();
        let tx = transactions
            .get_mut(&id)
            .ok_or_else(|| GatewayError::not_found("transaction", id))?;
        let outcome = tx.apply(update);
        Ok((tx.clone(), outcome))
    }

    async fn mark_reconciliation(&self, id: Uuid, reason: &str) -> GatewayResult<()> {
        let mut transactions = self.transactions.write();
        let tx = transactions
            .get_mut(&id)
            .ok_or_else(|| GatewayError::not_found("transaction", id))?;
        flag(tx, reason);
        Ok(())
    }

    async fn mark_reconciliation_while(
        &self,
        id: Uuid,
        status: TransactionStatus,
        reason: &str,
    ) -> GatewayResult<bool> {
        let mut transactions = self.transactions.write();
        let tx = transactions
            .get_mut(&id)
            .ok_or_else(|| GatewayError::not_found("transaction", id))?;
        if tx.status != status {
            return Ok(false);
        }
        flag(tx, reason);
        Ok(true)
    }

    async fn record_refund(
        &self,
        id: Uuid,
        refund_id: &str,
        refunded: Money,
    ) -> GatewayResult<PaymentTransaction> {
        let mut transactions = self.transactions.write();
        let tx = transactions
            .get_mut(&id)
            .ok_or_else(|| GatewayError::not_found("transaction", id))?;
        tx.record_refund_once(refund_id, refunded)?;
        Ok(tx.clone())
    }

    async fn apply_refund(
        &self,
        id: Uuid,
        report: &RefundReport,
        source: UpdateSource,
    ) -> GatewayResult<(PaymentTransaction, UpdateOutcome)> {
        let mut transactions = self.transactions.write();
        let tx = transactions
            .get_mut(&id)
            .ok_or_else(|| GatewayError::not_found("transaction", id))?;
        let outcome = tx.apply_refund(report, source);
        Ok((tx.clone(), outcome))
    }

    async fn list_pending_reconciliation(&self) -> GatewayResult<Vec<PaymentTransaction>> {
        let mut pending: Vec<_> = self
            .transactions
            .read()
            .values()
            .filter(|tx| tx.needs_reconciliation)
            .cloned()
            .collect();
        pending.sort_by_key(|tx| tx.created_at);
        Ok(pending)
    }

    async fn count_by_payment_method(&self, method_id: Uuid) -> GatewayResult<usize> {
        Ok(self
            .transactions
            .read()
            .values()
            .filter(|tx| tx.payment_method_id == Some(method_id))
            .count())
    }
}

fn flag(tx: &mut PaymentTransaction, reason: &str) {
    tx.needs_reconciliation = true;
    if tx.response_message.is_none() {
        tx.response_message = Some(reason.to_string());
    }
    tx.updated_at = Utc::now();
}

/// In-memory idempotency store
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<IdempotencyKey, IdempotencyRecord>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn begin(
        &self,
        key: &IdempotencyKey,
        operation: IdempotentOperation,
        ttl: chrono::Duration,
    ) -> GatewayResult<BeginOutcome> {
        let mut records = self.records.lock();
        if let Some(existing) = records.get(key)
            && !existing.is_expired(Utc::now())
        {
            return Ok(if existing.is_processing {
                BeginOutcome::InFlight(existing.clone())
            } else {
                BeginOutcome::Completed(existing.clone())
            });
        }

        records.insert(
            key.clone(),
            IdempotencyRecord::processing(key.clone(), operation, ttl),
        );
        Ok(BeginOutcome::Started)
    }

    async fn complete(&self, key: &IdempotencyKey, response: serde_json::Value) -> GatewayResult<()> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(key)
            .ok_or_else(|| GatewayError::not_found("idempotency record", key))?;
        record.is_processing = false;
        record.response = Some(response);
        Ok(())
    }

    async fn release(&self, key: &IdempotencyKey) -> GatewayResult<()> {
        let mut records = self.records.lock();
        if records.get(key).is_some_and(|r| r.is_processing) {
            records.remove(key);
        }
        Ok(())
    }

    async fn get(&self, key: &IdempotencyKey) -> GatewayResult<Option<IdempotencyRecord>> {
        let now = Utc::now();
        Ok(self
            .records
            .lock()
            .get(key)
            .filter(|r| !r.is_expired(now))
            .cloned())
    }

    async fn purge_expired(&self) -> GatewayResult<usize> {
        let now = Utc::now();
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        Ok(before - records.len())
    }
}

/// In-memory saved method store
#[derive(Default)]
pub struct InMemoryPaymentMethodStore {
    methods: Mutex<HashMap<Uuid, SavedPaymentMethod>>,
}

impl InMemoryPaymentMethodStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn clear_default(methods: &mut HashMap<Uuid, SavedPaymentMethod>, payer_id: &str) {
    for method in methods.values_mut().filter(|m| m.payer_id == payer_id) {
        method.is_default = false;
    }
}

/// Make the payer's most recently added active method the default
fn promote_default(methods: &mut HashMap<Uuid, SavedPaymentMethod>, payer_id: &str) -> Option<Uuid> {
    let promoted = methods
        .values_mut()
        .filter(|m| m.payer_id == payer_id && m.active)
        .max_by_key(|m| m.created_at)?;
    promoted.is_default = true;
    Some(promoted.id)
}

#[async_trait]
impl PaymentMethodStore for InMemoryPaymentMethodStore {
    async fn create(&self, method: SavedPaymentMethod) -> GatewayResult<SavedPaymentMethod> {
        let mut methods = self.methods.lock();
        if method.is_default {
            clear_default(&mut methods, &method.payer_id);
        }
        methods.insert(method.id, method.clone());
        Ok(method)
    }

    async fn get(&self, id: Uuid) -> GatewayResult<Option<SavedPaymentMethod>> {
        Ok(self.methods.lock().get(&id).cloned())
    }

    async fn list_for_payer(&self, payer_id: &str) -> GatewayResult<Vec<SavedPaymentMethod>> {
        let mut list: Vec<_> = self
            .methods
            .lock()
            .values()
            .filter(|m| m.payer_id == payer_id && m.active)
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(list)
    }

    async fn get_default(&self, payer_id: &str) -> GatewayResult<Option<SavedPaymentMethod>> {
        Ok(self
            .methods
            .lock()
            .values()
            .find(|m| m.payer_id == payer_id && m.active && m.is_default)
            .cloned())
    }

    async fn set_as_default(&self, id: Uuid, payer_id: &str) -> GatewayResult<SavedPaymentMethod> {
        let mut methods = self.methods.lock();
        let eligible = methods
            .get(&id)
            .is_some_and(|m| m.payer_id == payer_id && m.active);
        if !eligible {
            return Err(GatewayError::not_found("payment method", id));
        }

        clear_default(&mut methods, payer_id);
        let method = methods
            .get_mut(&id)
            .ok_or_else(|| GatewayError::not_found("payment method", id))?;
        method.is_default = true;
        Ok(method.clone())
    }

    async fn find_similar(
        &self,
        payer_id: &str,
        fingerprint: &CardFingerprint,
    ) -> GatewayResult<Option<SavedPaymentMethod>> {
        Ok(self
            .methods
            .lock()
            .values()
            .find(|m| m.payer_id == payer_id && m.is_similar(fingerprint))
            .cloned())
    }

    async fn record_usage(&self, id: Uuid, used_at: DateTime<Utc>) -> GatewayResult<()> {
        let mut methods = self.methods.lock();
        let method = methods
            .get_mut(&id)
            .ok_or_else(|| GatewayError::not_found("payment method", id))?;
        method.usage_count += 1;
        method.last_used_at = Some(used_at);
        Ok(())
    }

    async fn deactivate(&self, id: Uuid) -> GatewayResult<Option<Uuid>> {
        let mut methods = self.methods.lock();
        let method = methods
            .get_mut(&id)
            .ok_or_else(|| GatewayError::not_found("payment method", id))?;
        let was_default = method.is_default && method.active;
        method.active = false;
        method.is_default = false;
        let payer_id = method.payer_id.clone();

        Ok(if was_default {
            promote_default(&mut methods, &payer_id)
        } else {
            None
        })
    }

    async fn delete(&self, id: Uuid) -> GatewayResult<Option<Uuid>> {
        let mut methods = self.methods.lock();
        let removed = methods
            .remove(&id)
            .ok_or_else(|| GatewayError::not_found("payment method", id))?;

        Ok(if removed.is_default && removed.active {
            promote_default(&mut methods, &removed.payer_id)
        } else {
            None
        })
    }
}

/// In-memory rate history
#[derive(Default)]
pub struct InMemoryExchangeRateRepository {
    rates: RwLock<Vec<ExchangeRate>>,
}

impl InMemoryExchangeRateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn insert_rate(rates: &mut Vec<ExchangeRate>, mut rate: ExchangeRate) -> ExchangeRate {
    for existing in rates
        .iter_mut()
        .filter(|r| r.active && r.currency == rate.currency && r.rate_date == rate.rate_date)
    {
        existing.active = false;
    }
    rate.active = true;
    rates.push(rate.clone());
    rate
}

#[async_trait]
impl ExchangeRateRepository for InMemoryExchangeRateRepository {
    async fn save(&self, rate: ExchangeRate) -> GatewayResult<ExchangeRate> {
        Ok(insert_rate(&mut self.rates.write(), rate))
    }

    async fn get_active(&self, currency: Currency, date: NaiveDate) -> GatewayResult<Option<ExchangeRate>> {
        Ok(self
            .rates
            .read()
            .iter()
            .find(|r| r.active && r.currency == currency && r.rate_date == date)
            .cloned())
    }

    async fn latest(&self, currency: Currency) -> GatewayResult<Option<ExchangeRate>> {
        Ok(self
            .rates
            .read()
            .iter()
            .filter(|r| r.active && r.currency == currency)
            .max_by_key(|r| (r.rate_date, r.fetched_at))
            .cloned())
    }

    async fn replace_active(&self, rates: Vec<ExchangeRate>) -> GatewayResult<()> {
        let mut stored = self.rates.write();
        for rate in rates {
            insert_rate(&mut stored, rate);
        }
        Ok(())
    }

    async fn history(&self, currency: Currency, date: NaiveDate) -> GatewayResult<Vec<ExchangeRate>> {
        Ok(self
            .rates
            .read()
            .iter()
            .filter(|r| r.currency == currency && r.rate_date == date)
            .cloned()
            .collect())
    }
}

/// In-memory conversion audit log
#[derive(Default)]
pub struct InMemoryConversionRepository {
    conversions: RwLock<HashMap<Uuid, CurrencyConversion>>,
}

impl InMemoryConversionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.conversions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversions.read().is_empty()
    }
}

#[async_trait]
impl ConversionRepository for InMemoryConversionRepository {
    async fn create(&self, conversion: CurrencyConversion) -> GatewayResult<()> {
        let mut conversions = self.conversions.write();
        if conversions
            .values()
            .any(|c| c.transaction_id == conversion.transaction_id)
        {
            return Err(GatewayError::Conflict(format!(
                "transaction {} already has a conversion",
                conversion.transaction_id
            )));
        }
        conversions.insert(conversion.id, conversion);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> GatewayResult<Option<CurrencyConversion>> {
        Ok(self.conversions.read().get(&id).cloned())
    }

    async fn find_by_transaction(&self, transaction_id: Uuid) -> GatewayResult<Option<CurrencyConversion>> {
        Ok(self
            .conversions
            .read()
            .values()
            .find(|c| c.transaction_id == transaction_id)
            .cloned())
    }

    async fn attach_fiscal_document(&self, id: Uuid, reference: &str) -> GatewayResult<CurrencyConversion> {
        let mut conversions = self.conversions.write();
        let conversion = conversions
            .get_mut(&id)
            .ok_or_else(|| GatewayError::not_found("currency conversion", id))?;
        if let Some(existing) = &conversion.fiscal_document {
            return Err(GatewayError::Conflict(format!(
                "conversion {} already has fiscal document {}",
                id, existing
            )));
        }
        conversion.fiscal_document = Some(reference.to_string());
        Ok(conversion.clone())
    }
}
