// Tollgate - multi-gateway payment orchestration
//
// This library bundles the payments core with the configuration, feature
// flag and logging crates it is deployed with.

// Re-export the payments core
pub use tollgate_payments::*;

// Re-export supporting crates
pub use tollgate_config;
pub use tollgate_features;
pub use tollgate_log;

/// Load settings, initialize logging and wire an in-memory core.
///
/// Settings come from `TOLLGATE_*` environment variables layered over
/// defaults. Logging is initialized at most once per process.
pub fn from_env() -> GatewayResult<PaymentsCore> {
    let _ = tollgate_log::try_init(&tollgate_log::LogConfig::from_env());

    let settings = tollgate_config::SettingsLoader::new()
        .load()
        .map_err(|e| GatewayError::Config(e.to_string()))?;
    let config = PaymentsConfig::try_from(&settings)?;
    bootstrap::in_memory(&config)
}

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        CardDetails, ChargeOrchestrator, ChargeOutcome, ChargeRequest, ChargeResponse, Currency,
        GatewayError, GatewayId, GatewayResult, Money, PaymentsConfig, PaymentsCore,
        RefundOutcome, RefundRequest, RefundResponse, RemovalOutcome, SavedPaymentMethod, TokenizeRequest,
        TransactionStatus, WebhookIngestor, WebhookOutcome, bootstrap,
    };
}
