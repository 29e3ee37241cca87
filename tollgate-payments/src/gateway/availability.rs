//! New-payer availability of gateways.
//!
//! Decides only whether a gateway may be offered to a payer choosing one
//! for the first time. Saved methods stay chargeable on their gateway
//! regardless of what this service answers.

use super::{GatewayId, GatewayRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tollgate_features::FlagStore;

/// Flag key gating a gateway for new payers
pub fn new_payers_flag(gateway: GatewayId) -> String {
    format!("gateway.{}.new-payers", gateway.as_str())
}

/// Remote flag lookup with a local fallback
pub struct GatewayAvailabilityService {
    registry: Arc<GatewayRegistry>,
    store: Option<Arc<dyn FlagStore>>,
    timeout: Duration,
    fallback: HashMap<GatewayId, bool>,
    fallback_default: bool,
}

impl GatewayAvailabilityService {
    pub fn new(registry: Arc<GatewayRegistry>) -> Self {
        Self {
            registry,
            store: None,
            timeout: Duration::from_millis(500),
            fallback: HashMap::new(),
            fallback_default: true,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn FlagStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Bound on a single flag lookup
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Answer for one gateway when the store cannot decide
    pub fn with_fallback(mut self, gateway: GatewayId, enabled: bool) -> Self {
        self.fallback.insert(gateway, enabled);
        self
    }

    /// Answer for gateways without an explicit fallback
    pub fn with_fallback_default(mut self, enabled: bool) -> Self {
        self.fallback_default = enabled;
        self
    }

    fn fallback_for(&self, gateway: GatewayId) -> bool {
        self.fallback
            .get(&gateway)
            .copied()
            .unwrap_or(self.fallback_default)
    }

    /// Whether the gateway may be offered to new payers.
    ///
    /// Never fails: store errors and timeouts degrade to the local fallback.
    pub async fn is_enabled_for_new_users(&self, gateway: GatewayId) -> bool {
        let Some(store) = &self.store else {
            return self.fallback_for(gateway);
        };

        let key = new_payers_flag(gateway);
        match tokio::time::timeout(self.timeout, store.is_enabled(&key)).await {
            Ok(Ok(Some(enabled))) => enabled,
            Ok(Ok(None)) => {
                let enabled = self.fallback_for(gateway);
                tracing::debug!(gateway = %gateway, flag = %key, enabled, "Flag not defined, using fallback");
                enabled
            }
            Ok(Err(e)) => {
                let enabled = self.fallback_for(gateway);
                tracing::warn!(gateway = %gateway, error = %e, enabled, "Flag store failed, using fallback");
                enabled
            }
            Err(_) => {
                let enabled = self.fallback_for(gateway);
                tracing::warn!(
                    gateway = %gateway,
                    timeout_ms = self.timeout.as_millis() as u64,
                    enabled,
                    "Flag store timed out, using fallback"
                );
                enabled
            }
        }
    }

    /// Registered gateways that are enabled for new payers, ordered by id
    pub async fn get_enabled_gateways(&self) -> Vec<GatewayId> {
        let ids = self.registry.ids();
        let flags =
            futures::future::join_all(ids.iter().map(|id| self.is_enabled_for_new_users(*id))).await;

        ids.into_iter()
            .zip(flags)
            .filter_map(|(id, enabled)| enabled.then_some(id))
            .collect()
    }
}
