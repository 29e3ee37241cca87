//! Asynchronous provider notifications

use crate::{
    error::{GatewayError, GatewayResult},
    gateway::{GatewayId, GatewayRegistry},
    money::Money,
    transaction::{
        PaymentTransaction, RefundReport, StatusUpdate, Transition, TransactionRepository,
        TransactionStatus, UpdateOutcome, UpdateSource,
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tollgate_log::targets;
use uuid::Uuid;

/// Provider-agnostic transaction event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Provider event id
    pub event_id: String,
    pub gateway: GatewayId,
    /// Provider transaction id
    pub external_id: Option<String>,
    /// Internal transaction id, when the provider echoes it
    pub reference: Option<String>,
    pub status: TransactionStatus,
    pub amount: Option<Money>,
    /// Refunded money, for refund events
    #[serde(default)]
    pub refund: Option<RefundReport>,
    pub occurred_at: DateTime<Utc>,
}

/// What ingesting a notification did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Status changed
    Applied {
        transaction_id: Uuid,
        status: TransactionStatus,
    },
    /// Same status already recorded
    Duplicate { transaction_id: Uuid },
    /// Illegal transition; nothing changed
    Ignored { transaction_id: Uuid },
    /// Contradicts the recorded outcome; flagged for reconciliation
    Conflict { transaction_id: Uuid },
    /// No matching transaction
    UnknownTransaction,
    /// Event kind that does not concern transactions
    Unsupported,
}

/// Verifies, normalizes and applies provider notifications
pub struct WebhookIngestor {
    registry: Arc<GatewayRegistry>,
    transactions: Arc<dyn TransactionRepository>,
}

impl WebhookIngestor {
    pub fn new(registry: Arc<GatewayRegistry>, transactions: Arc<dyn TransactionRepository>) -> Self {
        Self {
            registry,
            transactions,
        }
    }

    /// Process one raw notification.
    ///
    /// Nothing in the payload is read before the signature verifies.
    /// Refund events go through the refund accounting, so the status
    /// follows the refunded total rather than the event kind.
    pub async fn ingest(
        &self,
        gateway: GatewayId,
        payload: &[u8],
        signature: &str,
    ) -> GatewayResult<WebhookOutcome> {
        let provider = self
            .registry
            .get(gateway)
            .ok_or(GatewayError::NotRegistered(gateway))?;

        if let Err(e) = provider.verify_webhook(payload, signature) {
            tracing::warn!(
                target: targets::SECURITY,
                gateway = %gateway,
                payload_len = payload.len(),
                error = %e,
                "Rejected webhook with invalid signature"
            );
            return Err(GatewayError::SignatureInvalid);
        }

        let Some(event) = provider.parse_webhook(payload)? else {
            tracing::debug!(gateway = %gateway, "Ignoring unsupported webhook event");
            return Ok(WebhookOutcome::Unsupported);
        };

        let Some(transaction) = self.find_transaction(&event).await? else {
            tracing::warn!(
                gateway = %gateway,
                event_id = %event.event_id,
                external_id = ?event.external_id,
                "Webhook for unknown transaction"
            );
            return Ok(WebhookOutcome::UnknownTransaction);
        };
        let transaction_id = transaction.id;

        if let Some(amount) = event.amount
            && amount != transaction.amount
            && matches!(
                event.status,
                TransactionStatus::Authorized | TransactionStatus::Captured
            )
        {
            tracing::warn!(
                target: targets::RECONCILIATION,
                transaction_id = %transaction_id,
                expected = %transaction.amount,
                reported = %amount,
                "Webhook amount does not match transaction"
            );
            self.transactions
                .mark_reconciliation(transaction_id, "webhook amount mismatch")
                .await?;
            return Ok(WebhookOutcome::Conflict { transaction_id });
        }

        let outcome = if event.status.is_refund() {
            let Some(report) = &event.refund else {
                tracing::warn!(
                    target: targets::RECONCILIATION,
                    transaction_id = %transaction_id,
                    event_id = %event.event_id,
                    "Refund webhook without a refunded amount"
                );
                self.transactions
                    .mark_reconciliation(transaction_id, "refund webhook without amount")
                    .await?;
                return Ok(WebhookOutcome::Conflict { transaction_id });
            };
            self.transactions
                .apply_refund(transaction_id, report, UpdateSource::Webhook)
                .await?
                .1
        } else {
            let mut update = StatusUpdate::new(event.status, UpdateSource::Webhook);
            update.external_id = event.external_id.clone();
            self.transactions.apply_update(transaction_id, &update).await?.1
        };

        Ok(classify(gateway, transaction_id, event.status, outcome))
    }

    async fn find_transaction(
        &self,
        event: &WebhookEvent,
    ) -> GatewayResult<Option<PaymentTransaction>> {
        if let Some(external_id) = &event.external_id
            && let Some(tx) = self
                .transactions
                .find_by_external_id(event.gateway, external_id)
                .await?
        {
            return Ok(Some(tx));
        }

        match event.reference.as_deref().map(Uuid::from_str) {
            Some(Ok(id)) => Ok(self
                .transactions
                .get(id)
                .await?
                .filter(|tx| tx.gateway == Some(event.gateway))),
            _ => Ok(None),
        }
    }
}

fn classify(
    gateway: GatewayId,
    transaction_id: Uuid,
    reported: TransactionStatus,
    outcome: UpdateOutcome,
) -> WebhookOutcome {
    match outcome.transition {
        Transition::Apply => {
            tracing::info!(
                transaction_id = %transaction_id,
                gateway = %gateway,
                from = %outcome.previous,
                to = %outcome.current,
                "Webhook applied"
            );
            WebhookOutcome::Applied {
                transaction_id,
                status: outcome.current,
            }
        }
        Transition::Duplicate => {
            tracing::debug!(transaction_id = %transaction_id, "Duplicate webhook");
            WebhookOutcome::Duplicate { transaction_id }
        }
        Transition::Ignore => {
            tracing::info!(
                transaction_id = %transaction_id,
                current = %outcome.previous,
                reported = %reported,
                "Ignoring illegal webhook transition"
            );
            WebhookOutcome::Ignored { transaction_id }
        }
        Transition::Conflict => {
            tracing::warn!(
                target: targets::RECONCILIATION,
                transaction_id = %transaction_id,
                current = %outcome.previous,
                reported = %reported,
                "Webhook contradicts recorded outcome"
            );
            WebhookOutcome::Conflict { transaction_id }
        }
    }
}
