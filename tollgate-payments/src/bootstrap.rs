//! Startup wiring from [`PaymentsConfig`]

use crate::{
    config::PaymentsConfig,
    error::GatewayResult,
    exchange::{ConversionRepository, ExchangeRateRepository, ExchangeRateService, HttpRateSource},
    gateway::{GatewayAvailabilityService, GatewayFactory, GatewayId, GatewayProvider, GatewayRegistry},
    memory::{InMemoryConversionRepository, InMemoryExchangeRateRepository},
    orchestrator::{ChargeOrchestrator, PaymentStores},
    providers::ProviderConfig,
    webhook::WebhookIngestor,
};
use std::sync::Arc;
use tollgate_features::HttpFlagStore;

/// Assembled payments core
pub struct PaymentsCore {
    pub registry: Arc<GatewayRegistry>,
    pub orchestrator: Arc<ChargeOrchestrator>,
    pub webhooks: Arc<WebhookIngestor>,
}

/// Adapter for one configured gateway; `None` when this build has none.
#[allow(unused_variables)]
fn build_provider(id: GatewayId, config: &ProviderConfig) -> GatewayResult<Option<Arc<dyn GatewayProvider>>> {
    let provider: Arc<dyn GatewayProvider> = match id {
        #[cfg(feature = "azul")]
        GatewayId::Azul => Arc::new(crate::providers::AzulProvider::new(config.clone())?),
        #[cfg(feature = "stripe")]
        GatewayId::Stripe => Arc::new(crate::providers::StripeProvider::new(config.clone())?),
        _ => return Ok(None),
    };
    Ok(Some(provider))
}

/// Register a provider for every enabled gateway with credentials.
pub fn build_registry(config: &PaymentsConfig) -> GatewayResult<GatewayRegistry> {
    let registry = GatewayRegistry::new();

    for (id, provider_config) in &config.providers {
        match build_provider(*id, provider_config)? {
            Some(provider) => {
                let problems = provider.validate_configuration();
                if !problems.is_empty() {
                    tracing::warn!(gateway = %id, ?problems, "Gateway registered with configuration problems");
                }
                registry.register(provider);
            }
            None => tracing::warn!(gateway = %id, "No adapter for configured gateway, skipping"),
        }
    }

    tracing::info!(gateways = ?registry.ids(), "Gateway registry built");
    Ok(registry)
}

/// Wire the core around an existing registry and stores.
pub fn assemble(
    config: &PaymentsConfig,
    registry: Arc<GatewayRegistry>,
    stores: PaymentStores,
    rates: Arc<dyn ExchangeRateRepository>,
    conversions: Arc<dyn ConversionRepository>,
) -> GatewayResult<PaymentsCore> {
    let factory = Arc::new(GatewayFactory::new(registry.clone(), config.default_gateway));

    let features = &config.features;
    let mut availability = GatewayAvailabilityService::new(registry.clone())
        .with_timeout(features.flag_timeout)
        .with_fallback_default(features.fallback_default);
    for (id, enabled) in &features.fallback {
        availability = availability.with_fallback(*id, *enabled);
    }
    if let Some(url) = &features.flag_store_url {
        availability = availability.with_store(Arc::new(HttpFlagStore::new(url, features.flag_timeout)?));
    }

    let mut exchange = ExchangeRateService::new(config.exchange.clone(), rates, conversions);
    if let Some(url) = &config.central_bank_url {
        exchange = exchange.with_source(Arc::new(HttpRateSource::new(url, config.exchange.source_timeout)?));
    }

    let orchestrator = ChargeOrchestrator::new(
        config.orchestrator.clone(),
        factory,
        Arc::new(availability),
        Arc::new(exchange),
        stores.clone(),
    );
    let webhooks = WebhookIngestor::new(registry.clone(), stores.transactions);

    Ok(PaymentsCore {
        registry,
        orchestrator: Arc::new(orchestrator),
        webhooks: Arc::new(webhooks),
    })
}

/// Build the registry from configuration and wire it with in-memory stores.
pub fn in_memory(config: &PaymentsConfig) -> GatewayResult<PaymentsCore> {
    let registry = Arc::new(build_registry(config)?);
    assemble(
        config,
        registry,
        PaymentStores::in_memory(),
        Arc::new(InMemoryExchangeRateRepository::new()),
        Arc::new(InMemoryConversionRepository::new()),
    )
}
