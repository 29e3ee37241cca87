//! Payment transactions and their status machine

use crate::{
    error::{GatewayError, GatewayResult},
    gateway::GatewayId,
    money::Money,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Authorized,
    Captured,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Authorized => "authorized",
            Self::Captured => "captured",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::PartiallyRefunded => "partially_refunded",
        }
    }

    /// No further transition leaves this status
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Failed | Self::Refunded)
    }

    /// Reached only through refund accounting
    pub fn is_refund(&self) -> bool {
        matches!(self, Self::Refunded | Self::PartiallyRefunded)
    }

    /// Money moved at least once
    pub fn is_successful(&self) -> bool {
        matches!(
            self,
            Self::Authorized | Self::Captured | Self::PartiallyRefunded | Self::Refunded
        )
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (*self, next),
            (Pending, Authorized | Captured | Failed)
                | (Authorized, Captured | Failed)
                | (Captured, PartiallyRefunded | Refunded)
                | (PartiallyRefunded, Refunded)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a reported status relates to the current one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Legal move; apply it
    Apply,
    /// Same status reported again
    Duplicate,
    /// Success and failure disagree; needs reconciliation
    Conflict,
    /// Regression or move out of a final status; ignore
    Ignore,
}

/// Classify a reported status against the current one.
pub fn check_transition(current: TransactionStatus, reported: TransactionStatus) -> Transition {
    use TransactionStatus::*;

    if current == reported {
        return Transition::Duplicate;
    }
    if current.can_transition_to(reported) {
        return Transition::Apply;
    }
    match (current, reported) {
        (Failed, Authorized | Captured) | (Authorized | Captured, Failed) => Transition::Conflict,
        _ => Transition::Ignore,
    }
}

/// Who reported a status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSource {
    /// Synchronous provider response
    Provider,
    Webhook,
    /// Provider status query
    Reconciliation,
}

/// Status report to apply to a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: TransactionStatus,
    pub source: UpdateSource,
    pub external_id: Option<String>,
    pub response_code: Option<String>,
    pub response_message: Option<String>,
    pub authorization_code: Option<String>,
    pub commission: Option<Money>,
    pub net_amount: Option<Money>,
}

impl StatusUpdate {
    pub fn new(status: TransactionStatus, source: UpdateSource) -> Self {
        Self {
            status,
            source,
            external_id: None,
            response_code: None,
            response_message: None,
            authorization_code: None,
            commission: None,
            net_amount: None,
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_response(mut self, code: Option<String>, message: Option<String>) -> Self {
        self.response_code = code;
        self.response_message = message;
        self
    }
}

/// Refund reported by a provider outside the synchronous refund call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RefundReport {
    /// One refund, identified by the provider's refund id
    Single { refund_id: String, amount: Money },
    /// Running total of everything refunded on the charge
    Cumulative {
        total: Money,
        /// Provider refund ids the total covers, when listed
        #[serde(default)]
        refund_ids: Vec<String>,
    },
}

/// What applying an update did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub transition: Transition,
    pub previous: TransactionStatus,
    pub current: TransactionStatus,
}

/// Durable record of one money-movement attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub payer_id: String,
    /// Provider transaction id
    pub external_id: Option<String>,
    /// Gateway used; `None` when the attempt failed before selection
    pub gateway: Option<GatewayId>,
    pub payment_method_id: Option<Uuid>,
    /// Amount charged, in settlement currency
    pub amount: Money,
    /// Amount as requested
    pub original_amount: Money,
    pub status: TransactionStatus,
    pub response_code: Option<String>,
    pub response_message: Option<String>,
    pub authorization_code: Option<String>,
    pub commission: Option<Money>,
    pub net_amount: Option<Money>,
    pub refunded_amount: Money,
    /// Provider refund ids already counted in `refunded_amount`
    #[serde(default)]
    pub refund_ids: Vec<String>,
    /// Outcome unknown or contradicted; needs a provider status query
    pub needs_reconciliation: bool,
    pub recurring: bool,
    pub subscription_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentTransaction {
    /// New pending attempt
    pub fn pending(payer_id: impl Into<String>, amount: Money, original_amount: Money) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            payer_id: payer_id.into(),
            external_id: None,
            gateway: None,
            payment_method_id: None,
            amount,
            original_amount,
            status: TransactionStatus::Pending,
            response_code: None,
            response_message: None,
            authorization_code: None,
            commission: None,
            net_amount: None,
            refunded_amount: Money::zero(amount.currency),
            refund_ids: Vec::new(),
            needs_reconciliation: false,
            recurring: false,
            subscription_id: None,
            created_at: now,
            processed_at: None,
            updated_at: now,
        }
    }

    /// Amount still refundable
    pub fn refundable(&self) -> Money {
        Money::new(
            (self.amount.amount - self.refunded_amount.amount).max(0),
            self.amount.currency,
        )
    }

    /// Apply a status report through the transition table.
    ///
    /// Refund statuses are never applied from a bare status: they follow
    /// the refunded total, which only [`apply_refund`](Self::apply_refund)
    /// and [`record_refund`](Self::record_refund) move.
    pub fn apply(&mut self, update: &StatusUpdate) -> UpdateOutcome {
        let previous = self.status;
        let mut transition = check_transition(previous, update.status);
        if transition == Transition::Apply && update.status.is_refund() {
            transition = Transition::Ignore;
        }
        let now = Utc::now();

        match transition {
            Transition::Apply => {
                self.status = update.status;
                if let Some(external_id) = &update.external_id {
                    self.external_id = Some(external_id.clone());
                }
                if update.response_code.is_some() {
                    self.response_code = update.response_code.clone();
                    self.response_message = update.response_message.clone();
                }
                if update.authorization_code.is_some() {
                    self.authorization_code = update.authorization_code.clone();
                }
                self.commission = update.commission.or(self.commission);
                self.net_amount = update.net_amount.or(self.net_amount);
                self.needs_reconciliation = false;
                self.processed_at.get_or_insert(now);
                self.updated_at = now;
            }
            Transition::Duplicate => {
                if update.source == UpdateSource::Reconciliation && self.needs_reconciliation {
                    self.needs_reconciliation = false;
                    self.updated_at = now;
                }
                if self.external_id.is_none() && update.external_id.is_some() {
                    self.external_id = update.external_id.clone();
                    self.updated_at = now;
                }
            }
            Transition::Conflict => {
                self.needs_reconciliation = true;
                self.updated_at = now;
            }
            Transition::Ignore => {}
        }

        UpdateOutcome {
            transition,
            previous,
            current: self.status,
        }
    }

    /// Account for a refund, moving to `Refunded` once everything is returned.
    pub fn record_refund(&mut self, refunded: Money) -> GatewayResult<()> {
        if refunded.currency != self.amount.currency {
            return Err(GatewayError::Validation(format!(
                "refund currency {} does not match transaction currency {}",
                refunded.currency, self.amount.currency
            )));
        }
        if !matches!(
            self.status,
            TransactionStatus::Captured | TransactionStatus::PartiallyRefunded
        ) {
            return Err(GatewayError::Validation(format!(
                "cannot refund a {} transaction",
                self.status
            )));
        }
        if !refunded.is_positive() || refunded.amount > self.refundable().amount {
            return Err(GatewayError::Validation(format!(
                "refund of {} exceeds refundable {}",
                refunded,
                self.refundable()
            )));
        }

        self.refunded_amount = Money::new(
            self.refunded_amount.amount + refunded.amount,
            self.amount.currency,
        );
        self.status = if self.refunded_amount.amount >= self.amount.amount {
            TransactionStatus::Refunded
        } else {
            TransactionStatus::PartiallyRefunded
        };
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Account for a provider refund carrying its refund id. A refund id
    /// already counted is a no-op.
    pub fn record_refund_once(&mut self, refund_id: &str, refunded: Money) -> GatewayResult<()> {
        if self.refund_ids.iter().any(|id| id == refund_id) {
            return Ok(());
        }
        self.record_refund(refunded)?;
        self.refund_ids.push(refund_id.to_string());
        Ok(())
    }

    /// Apply an asynchronously reported refund through the same accounting
    /// as synchronous refunds.
    ///
    /// A refund already counted is `Duplicate`; from reconciliation it also
    /// clears the flag. One the accounting cannot absorb (wrong status,
    /// wrong currency, more than is refundable) is `Conflict` and flags the
    /// transaction.
    pub fn apply_refund(&mut self, report: &RefundReport, source: UpdateSource) -> UpdateOutcome {
        let previous = self.status;

        let result = match report {
            RefundReport::Single { refund_id, amount } => {
                if self.refund_ids.contains(refund_id) {
                    return self.duplicate_refund(source);
                }
                self.record_refund_once(refund_id, *amount)
            }
            RefundReport::Cumulative { total, refund_ids } => {
                if total.currency == self.refunded_amount.currency
                    && total.amount <= self.refunded_amount.amount
                {
                    return self.duplicate_refund(source);
                }
                let delta = Money::new(total.amount - self.refunded_amount.amount, total.currency);
                let result = self.record_refund(delta);
                if result.is_ok() {
                    for id in refund_ids {
                        if !self.refund_ids.contains(id) {
                            self.refund_ids.push(id.clone());
                        }
                    }
                }
                result
            }
        };

        let transition = match result {
            Ok(()) => {
                self.needs_reconciliation = false;
                Transition::Apply
            }
            Err(_) => {
                self.needs_reconciliation = true;
                self.updated_at = Utc::now();
                Transition::Conflict
            }
        };
        UpdateOutcome {
            transition,
            previous,
            current: self.status,
        }
    }

    fn duplicate_refund(&mut self, source: UpdateSource) -> UpdateOutcome {
        if source == UpdateSource::Reconciliation && self.needs_reconciliation {
            self.needs_reconciliation = false;
            self.updated_at = Utc::now();
        }
        UpdateOutcome {
            transition: Transition::Duplicate,
            previous: self.status,
            current: self.status,
        }
    }
}

/// Transaction persistence.
///
/// `apply_update`, `apply_refund`, `record_refund` and
/// `mark_reconciliation_while` must read and write the row atomically;
/// they are the guard between the synchronous paths and concurrent
/// webhooks.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn create(&self, transaction: PaymentTransaction) -> GatewayResult<()>;

    async fn get(&self, id: Uuid) -> GatewayResult<Option<PaymentTransaction>>;

    /// Match on the provider transaction id or a recorded refund id
    async fn find_by_external_id(
        &self,
        gateway: GatewayId,
        external_id: &str,
    ) -> GatewayResult<Option<PaymentTransaction>>;

    /// Apply a status report atomically
    async fn apply_update(
        &self,
        id: Uuid,
        update: &StatusUpdate,
    ) -> GatewayResult<(PaymentTransaction, UpdateOutcome)>;

    /// Flag a transaction for a provider status query
    async fn mark_reconciliation(&self, id: Uuid, reason: &str) -> GatewayResult<()>;

    /// Flag a transaction only while it still has `status`, atomically.
    /// Returns whether the flag was set.
    async fn mark_reconciliation_while(
        &self,
        id: Uuid,
        status: TransactionStatus,
        reason: &str,
    ) -> GatewayResult<bool>;

    /// Add a provider refund atomically; a refund id already counted is a
    /// no-op.
    async fn record_refund(
        &self,
        id: Uuid,
        refund_id: &str,
        refunded: Money,
    ) -> GatewayResult<PaymentTransaction>;

    /// Apply an asynchronously reported refund atomically
    async fn apply_refund(
        &self,
        id: Uuid,
        report: &RefundReport,
        source: UpdateSource,
    ) -> GatewayResult<(PaymentTransaction, UpdateOutcome)>;

    async fn list_pending_reconciliation(&self) -> GatewayResult<Vec<PaymentTransaction>>;

    /// Transactions that reference a saved method
    async fn count_by_payment_method(&self, method_id: Uuid) -> GatewayResult<usize>;
}
