//! Provider resolution and gateway reporting.

use super::{GatewayCategory, GatewayId, GatewayProvider, GatewayRegistry};
use crate::error::{GatewayError, GatewayResult};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Published pricing of a gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GatewayCost {
    /// Commission range as a fraction of the charged amount
    pub commission_min: Decimal,
    pub commission_max: Decimal,
    /// Fixed fee per transaction, in settlement currency
    pub fixed_fee: Decimal,
    /// Monthly account fee, in settlement currency
    pub monthly_fee: Decimal,
}

impl GatewayCost {
    pub fn for_gateway(id: GatewayId) -> Self {
        match id {
            GatewayId::Azul => Self {
                commission_min: Decimal::new(275, 4),
                commission_max: Decimal::new(350, 4),
                fixed_fee: Decimal::ZERO,
                monthly_fee: Decimal::new(1500, 0),
            },
            GatewayId::CardNet => Self {
                commission_min: Decimal::new(250, 4),
                commission_max: Decimal::new(350, 4),
                fixed_fee: Decimal::ZERO,
                monthly_fee: Decimal::new(1000, 0),
            },
            GatewayId::PixelPay => Self {
                commission_min: Decimal::new(350, 4),
                commission_max: Decimal::new(450, 4),
                fixed_fee: Decimal::new(15, 0),
                monthly_fee: Decimal::ZERO,
            },
            GatewayId::Stripe => Self {
                commission_min: Decimal::new(290, 4),
                commission_max: Decimal::new(440, 4),
                fixed_fee: Decimal::new(1800, 2),
                monthly_fee: Decimal::ZERO,
            },
        }
    }
}

/// Per-gateway report row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayStats {
    pub gateway: GatewayId,
    pub display_name: String,
    pub category: GatewayCategory,
    /// Configuration validates
    pub configured: bool,
    /// Configured and answering its health check
    pub active: bool,
    pub cost: GatewayCost,
}

/// Resolves providers by id or default and aggregates their status
pub struct GatewayFactory {
    registry: Arc<GatewayRegistry>,
    default_gateway: Option<GatewayId>,
    probe_timeout: Duration,
}

impl GatewayFactory {
    pub fn new(registry: Arc<GatewayRegistry>, default_gateway: Option<GatewayId>) -> Self {
        Self {
            registry,
            default_gateway,
            probe_timeout: Duration::from_secs(5),
        }
    }

    /// Bound on each health probe
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<GatewayRegistry> {
        &self.registry
    }

    pub fn default_gateway(&self) -> Option<GatewayId> {
        self.default_gateway
    }

    pub fn get_provider(&self, id: GatewayId) -> GatewayResult<Arc<dyn GatewayProvider>> {
        self.registry.get(id).ok_or(GatewayError::NotRegistered(id))
    }

    /// The configured default, if it is registered
    pub fn get_default_provider(&self) -> GatewayResult<Arc<dyn GatewayProvider>> {
        self.default_gateway
            .and_then(|id| self.registry.get(id))
            .ok_or(GatewayError::NoDefaultConfigured)
    }

    pub fn get_all_providers(&self) -> Vec<Arc<dyn GatewayProvider>> {
        self.registry.get_all()
    }

    /// Registered, healthy and correctly configured. Never fails.
    pub async fn is_provider_available(&self, id: GatewayId) -> bool {
        match self.registry.get(id) {
            Some(provider) => self.check(provider.as_ref()).await.1,
            None => false,
        }
    }

    /// Returns (configured, active)
    async fn check(&self, provider: &dyn GatewayProvider) -> (bool, bool) {
        let problems = provider.validate_configuration();
        if !problems.is_empty() {
            tracing::debug!(gateway = %provider.id(), ?problems, "Gateway misconfigured");
            return (false, false);
        }

        let healthy = tokio::time::timeout(self.probe_timeout, provider.health_check())
            .await
            .unwrap_or(false);
        if !healthy {
            tracing::debug!(gateway = %provider.id(), "Gateway health check failed");
        }
        (true, healthy)
    }

    /// Cost metadata merged with live status for every registered gateway
    pub async fn get_gateway_stats(&self) -> Vec<GatewayStats> {
        let providers = self.registry.get_all();
        let checks = futures::future::join_all(providers.iter().map(|p| self.check(p.as_ref()))).await;

        providers
            .iter()
            .zip(checks)
            .map(|(provider, (configured, active))| GatewayStats {
                gateway: provider.id(),
                display_name: provider.display_name().to_string(),
                category: provider.category(),
                configured,
                active,
                cost: GatewayCost::for_gateway(provider.id()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_ranges_are_ordered() {
        for id in GatewayId::ALL {
            let cost = GatewayCost::for_gateway(id);
            assert!(cost.commission_min <= cost.commission_max, "{}", id);
            assert!(cost.commission_max < Decimal::ONE);
        }
    }

    #[test]
    fn test_missing_default() {
        let factory = GatewayFactory::new(Arc::new(GatewayRegistry::new()), Some(GatewayId::Azul));
        assert!(matches!(
            factory.get_default_provider(),
            Err(GatewayError::NoDefaultConfigured)
        ));
        assert!(matches!(
            factory.get_provider(GatewayId::Stripe),
            Err(GatewayError::NotRegistered(GatewayId::Stripe))
        ));
    }
}
