//! Service wiring
//!
//! Turns a validated [`ServerConfig`] into the running pieces: one egress
//! connector per provider, the registry, the usage sinks and the Router.

use crate::config::{ProviderSettings, ProviderType, ServerConfig};
use anyhow::Context;
use costroute_core::{Provider, UsageSink};
use costroute_egress::{
    EgressError, GeminiConfig, GeminiConnector, OpenAICompatConfig, OpenAICompatConnector,
};
use costroute_observability::{CircuitBreakerState, Metrics};
use costroute_routing::{CircuitState, ProviderRegistry, Router};
use costroute_usage::{FanoutSink, JsonlUsageLog, UsageStats};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Build the egress connector for one configured provider
pub fn build_connector(settings: &ProviderSettings) -> Result<Arc<dyn Provider>, EgressError> {
    if settings.api_key.is_empty() {
        warn!(provider = %settings.name(), "Provider has no API key configured");
    }

    let max_retries = settings.descriptor.max_retries;
    let connector: Arc<dyn Provider> = match settings.provider_type {
        ProviderType::GoogleGemini => {
            let config = GeminiConfig::new(&settings.api_key, &settings.model)
                .with_base_url(settings.effective_endpoint())
                .with_max_retries(max_retries);
            Arc::new(GeminiConnector::new(config)?)
        }
        ProviderType::OpenAI | ProviderType::Mistral | ProviderType::DeepSeek => {
            let mut config = OpenAICompatConfig::new(
                &settings.api_key,
                settings.effective_endpoint(),
                &settings.model,
            )
            .with_max_retries(max_retries);
            if let Some(prompt) = settings.effective_system_prompt() {
                config = config.with_system_prompt(prompt);
            }
            Arc::new(OpenAICompatConnector::new(config)?)
        }
    };

    info!(
        provider = %settings.name(),
        provider_type = ?settings.provider_type,
        endpoint = %settings.effective_endpoint(),
        model = %settings.model,
        "Configured provider connector"
    );
    Ok(connector)
}

/// Connectors for every configured provider, keyed by provider name
pub fn build_connectors(
    providers: &[ProviderSettings],
) -> anyhow::Result<HashMap<String, Arc<dyn Provider>>> {
    let mut connectors = HashMap::with_capacity(providers.len());
    for settings in providers {
        let connector = build_connector(settings)
            .with_context(|| format!("failed to create connector for '{}'", settings.name()))?;
        connectors.insert(settings.name().to_string(), connector);
    }
    Ok(connectors)
}

/// Everything the HTTP layer needs
#[derive(Clone)]
pub struct Services {
    pub router: Arc<Router>,
    pub stats: Arc<UsageStats>,
    pub metrics: Arc<Metrics>,
    pub usage_log: Option<Arc<JsonlUsageLog>>,
}

impl Services {
    /// Build services with real egress connectors
    pub async fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        let connectors = build_connectors(&config.providers)?;
        Self::with_connectors(config, connectors).await
    }

    /// Build services around the given connectors
    pub async fn with_connectors(
        config: &ServerConfig,
        connectors: HashMap<String, Arc<dyn Provider>>,
    ) -> anyhow::Result<Self> {
        let registry = ProviderRegistry::load(&config.descriptors())
            .context("invalid provider configuration")?;

        let metrics = Arc::new(Metrics::new().context("failed to register metrics")?);
        let stats = Arc::new(UsageStats::new());

        let usage_log = if config.usage_log.enabled {
            let log = JsonlUsageLog::open(&config.usage_log.path)
                .await
                .with_context(|| {
                    format!(
                        "failed to open usage log {}",
                        config.usage_log.path.display()
                    )
                })?;
            Some(Arc::new(log))
        } else {
            info!("Usage log disabled");
            None
        };

        let mut sink = FanoutSink::new()
            .with_sink(stats.clone())
            .with_sink(metrics.clone());
        if let Some(log) = &usage_log {
            sink = sink.with_sink(log.clone());
        }

        let router = Router::new(
            registry,
            connectors,
            config.circuit_breaker.to_circuit_breaker_config(),
            Arc::new(sink) as Arc<dyn UsageSink>,
        )?;

        let services = Self {
            router: Arc::new(router),
            stats,
            metrics,
            usage_log,
        };
        services.refresh_circuit_gauges();
        Ok(services)
    }

    /// Copy every breaker's state into the circuit breaker gauge
    pub fn refresh_circuit_gauges(&self) {
        for status in self.router.provider_statuses() {
            let state = match status.health.state {
                CircuitState::Closed => CircuitBreakerState::Closed,
                CircuitState::Open => CircuitBreakerState::Open,
                CircuitState::HalfOpen => CircuitBreakerState::HalfOpen,
            };
            self.metrics
                .update_circuit_breaker_state(&status.name, state);
        }
    }

    /// Flush the usage log, if one is open
    pub async fn shutdown(&self) {
        if let Some(log) = &self.usage_log
            && let Err(e) = log.shutdown().await
        {
            warn!(error = %e, "Usage log did not shut down cleanly");
        }
    }
}
