//! Cost-ordered router with circuit-breaker fallback
//!
//! The Router coordinates multiple providers using:
//! - ProviderRegistry for pricing and per-provider limits
//! - HealthTracker for ranking and circuit breaker gating
//! - Accountant for per-attempt usage records
//!
//! Candidates are tried one at a time, cheapest healthy provider first.
//! The first success wins and the remaining candidates are never called.

use crate::{
    accounting::{Accountant, AttemptOutcome},
    circuit_breaker::{Admission, CircuitBreakerConfig, HealthSnapshot},
    health::HealthTracker,
    registry::{ProviderProfile, ProviderRegistry},
};
use costroute_core::{
    AttemptFailure, Completion, Error, GenerationOutcome, GenerationRequest, Provider,
    ProviderError, Result, UsageRecord, UsageSink,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

/// Provider pricing plus current breaker state, for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub cost_per_1k_tokens: f64,
    pub health: HealthSnapshot,
}

/// Router that walks providers in cost order
pub struct Router {
    /// Static provider metadata
    registry: ProviderRegistry,

    /// Map of provider ID to provider instance
    providers: HashMap<String, Arc<dyn Provider>>,

    /// Circuit breakers for all providers
    health: Arc<HealthTracker>,

    /// Usage accounting
    accountant: Accountant,
}

impl Router {
    /// Create a new router.
    ///
    /// Fails with a configuration error if a registered provider has no
    /// connector.
    pub fn new(
        registry: ProviderRegistry,
        providers: HashMap<String, Arc<dyn Provider>>,
        circuit_breaker_config: CircuitBreakerConfig,
        usage_sink: Arc<dyn UsageSink>,
    ) -> Result<Self> {
        if let Some(missing) = registry.ids().find(|id| !providers.contains_key(*id)) {
            return Err(Error::Config(format!(
                "provider '{}' has no connector",
                missing
            )));
        }
        for id in providers.keys() {
            if registry.get(id).is_none() {
                tracing::warn!(provider = %id, "Connector has no registry entry, ignoring");
            }
        }

        let health = Arc::new(HealthTracker::new(&registry, circuit_breaker_config));

        Ok(Self {
            registry,
            providers,
            health,
            accountant: Accountant::new(usage_sink),
        })
    }

    /// Create a router with default circuit breaker configuration
    pub fn with_defaults(
        registry: ProviderRegistry,
        providers: HashMap<String, Arc<dyn Provider>>,
        usage_sink: Arc<dyn UsageSink>,
    ) -> Result<Self> {
        Self::new(
            registry,
            providers,
            CircuitBreakerConfig::default(),
            usage_sink,
        )
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Pricing and health for every provider, in registry order
    pub fn provider_statuses(&self) -> Vec<ProviderStatus> {
        self.registry
            .list()
            .iter()
            .filter_map(|profile| {
                self.health.snapshot(&profile.id).map(|health| ProviderStatus {
                    name: profile.id.clone(),
                    cost_per_1k_tokens: profile.cost_per_1k_tokens,
                    health,
                })
            })
            .collect()
    }

    /// Route a generation request.
    ///
    /// Per-attempt provider errors are absorbed here. The caller only sees
    /// invalid input, no provider available, or every attempted provider
    /// failed.
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutcome> {
        request.validate()?;

        let candidates = self.health.rank(self.registry.list());
        if candidates.is_empty() {
            tracing::warn!("No providers available, every circuit breaker is open");
            return Err(Error::AllProvidersUnavailable);
        }

        tracing::info!(
            order = ?candidates.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            "Provider selection order"
        );

        let request = Arc::new(request);
        let mut failures = Vec::new();

        for profile in &candidates {
            // State may have moved since ranking, e.g. a concurrent request
            // claimed the half-open trial
            let Some(admission) = self.health.admit(&profile.id) else {
                tracing::debug!(
                    provider = %profile.id,
                    "Circuit breaker refused attempt, skipping provider"
                );
                continue;
            };

            let Some(provider) = self.providers.get(&profile.id) else {
                // Resolve a claimed trial so its slot is not held forever
                self.health.record(&profile.id, admission, false);
                continue;
            };

            tracing::debug!(
                provider = %profile.id,
                cost_per_1k = profile.cost_per_1k_tokens,
                "Attempting provider"
            );

            match self.attempt(profile, provider, &request, admission).await {
                Ok((completion, record)) => {
                    tracing::info!(
                        provider = %profile.id,
                        tokens = record.total_tokens,
                        cost = record.cost,
                        latency_ms = record.latency_ms,
                        "Request succeeded"
                    );
                    return Ok(GenerationOutcome {
                        response_text: completion.text,
                        provider_used: profile.id.clone(),
                        cost: record.cost,
                        prompt_tokens: record.prompt_tokens,
                        completion_tokens: record.completion_tokens,
                        total_tokens: record.total_tokens,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        provider = %profile.id,
                        kind = %err.kind,
                        error = %err.message,
                        "Provider failed, trying next candidate"
                    );
                    failures.push(AttemptFailure {
                        provider: profile.id.clone(),
                        kind: err.kind,
                        message: err.message,
                    });
                }
            }
        }

        if failures.is_empty() {
            tracing::warn!("Every ranked provider was gated off before it could be attempted");
            return Err(Error::AllProvidersUnavailable);
        }

        tracing::error!(attempts = failures.len(), "All providers failed");
        Err(Error::AllProvidersFailed { failures })
    }

    /// Run one attempt on its own task.
    ///
    /// The task records the outcome in the breaker and the accountant itself,
    /// so a caller that gives up on `generate` still leaves the provider's
    /// bookkeeping intact once the call resolves.
    async fn attempt(
        &self,
        profile: &Arc<ProviderProfile>,
        provider: &Arc<dyn Provider>,
        request: &Arc<GenerationRequest>,
        admission: Admission,
    ) -> std::result::Result<(Completion, UsageRecord), ProviderError> {
        let task = tokio::spawn({
            let profile = Arc::clone(profile);
            let provider = Arc::clone(provider);
            let request = Arc::clone(request);
            let health = Arc::clone(&self.health);
            let accountant = self.accountant.clone();

            async move {
                let started = Instant::now();
                let result = call_with_deadline(provider.as_ref(), &profile, &request).await;
                let latency = started.elapsed();

                match result {
                    Ok(completion) => {
                        health.record(&profile.id, admission, true);
                        let record = accountant.record_usage(
                            &profile,
                            AttemptOutcome::Success {
                                prompt_tokens: completion.prompt_tokens,
                                completion_tokens: completion.completion_tokens,
                            },
                            latency,
                        );
                        Ok((completion, record))
                    }
                    Err(err) => {
                        health.record(&profile.id, admission, false);
                        accountant.record_usage(&profile, AttemptOutcome::Failure(err.kind), latency);
                        Err(err)
                    }
                }
            }
        });

        match task.await {
            Ok(result) => result,
            Err(join_err) => {
                // The task died before recording anything
                let err = ProviderError::other(format!("provider task aborted: {}", join_err));
                self.health.record(&profile.id, admission, false);
                self.accountant.record_usage(
                    profile,
                    AttemptOutcome::Failure(err.kind),
                    std::time::Duration::ZERO,
                );
                Err(err)
            }
        }
    }
}

/// Invoke the connector, bounded by the provider's attempt deadline
async fn call_with_deadline(
    provider: &dyn Provider,
    profile: &ProviderProfile,
    request: &GenerationRequest,
) -> std::result::Result<Completion, ProviderError> {
    let deadline = profile.attempt_deadline();

    match tokio::time::timeout(deadline, provider.complete(request, profile.timeout)).await {
        Ok(Ok(completion)) if completion.text.trim().is_empty() => Err(ProviderError::other(
            format!("empty response from {}", profile.id),
        )),
        Ok(result) => result,
        Err(_) => Err(ProviderError::timeout(deadline)),
    }
}
