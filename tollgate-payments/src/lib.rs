//! Multi-gateway payment orchestration core
//!
//! Accepts charge, refund and tokenization requests, picks one of several
//! external processors, guarantees at most one effect per idempotency key,
//! converts foreign amounts into the settlement currency with an audit
//! record, and applies provider webhooks.
//!
//! ## Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       ChargeOrchestrator                          │
//! │   charge() | refund() | tokenize() | capture() | reconcile()      │
//! └──────────────────────────────────────────────────────────────────┘
//!        │              │                 │                 │
//!        ▼              ▼                 ▼                 ▼
//! ┌────────────┐ ┌─────────────┐ ┌─────────────────┐ ┌──────────────┐
//! │Idempotency │ │ExchangeRate │ │ GatewayFactory  │ │ Transactions │
//! │   Store    │ │  Service    │ │ + Availability  │ │ + Methods    │
//! └────────────┘ └─────────────┘ └─────────────────┘ └──────────────┘
//!                                         │                 ▲
//!                         ┌───────────────┼──────────┐      │
//!                         ▼               ▼          │      │
//!                   ┌──────────┐   ┌──────────┐      │      │
//!                   │   Azul   │   │  Stripe  │      │      │
//!                   └──────────┘   └──────────┘      │      │
//!                                                    │      │
//!                                   ┌────────────────┴──────┴──┐
//!                                   │     WebhookIngestor       │
//!                                   └───────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tollgate_payments::{bootstrap, ChargeRequest, Money, Currency, PaymentsConfig};
//!
//! let config = PaymentsConfig::try_from(&settings)?;
//! let core = bootstrap::in_memory(&config)?;
//!
//! let response = core
//!     .orchestrator
//!     .charge(ChargeRequest::with_card("payer-1", Money::new(5000, Currency::USD), card, "order-1234"))
//!     .await?;
//!
//! // Provider callbacks
//! core.webhooks.ingest(GatewayId::Azul, &body, &signature).await?;
//! ```

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod exchange;
pub mod gateway;
pub mod idempotency;
pub mod memory;
pub mod money;
pub mod orchestrator;
pub mod payment_methods;
pub mod providers;
pub mod signature;
pub mod transaction;
pub mod types;
pub mod webhook;

pub use bootstrap::PaymentsCore;
pub use config::{FeatureConfig, PaymentsConfig};
pub use error::{GatewayError, GatewayResult};
pub use exchange::{
    ConversionQuote, ConversionRepository, CurrencyConversion, ExchangeConfig, ExchangeRate,
    ExchangeRateRepository, ExchangeRateService,
};
pub use gateway::{
    GatewayAvailabilityService, GatewayCapabilities, GatewayCategory, GatewayFactory, GatewayId,
    GatewayProvider, GatewayRegistry, PaymentMethodKind,
};
pub use idempotency::{IdempotencyKey, IdempotencyRecord, IdempotencyStore, IdempotentOperation};
pub use money::{Currency, Money};
pub use orchestrator::{ChargeOrchestrator, OrchestratorConfig, PaymentStores};
pub use payment_methods::{CardFingerprint, PaymentMethodStore, SavedPaymentMethod};
pub use transaction::{PaymentTransaction, RefundReport, TransactionRepository, TransactionStatus};
pub use types::*;
pub use webhook::{WebhookEvent, WebhookIngestor, WebhookOutcome};
