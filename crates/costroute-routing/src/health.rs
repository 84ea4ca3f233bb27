//! Health Tracking
//!
//! Owns one circuit breaker per registered provider and derives the
//! per-request candidate ordering from their state. All mutation goes
//! through the breakers' transition functions.

use crate::circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerConfig, HealthSnapshot};
use crate::registry::{ProviderProfile, ProviderRegistry};
use std::collections::HashMap;
use std::sync::Arc;

/// Health tracker for all registered providers
#[derive(Debug)]
pub struct HealthTracker {
    /// Fixed at construction, one entry per provider
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl HealthTracker {
    /// Create a closed breaker for every provider in the registry
    pub fn new(registry: &ProviderRegistry, config: CircuitBreakerConfig) -> Self {
        let breakers = registry
            .ids()
            .map(|id| {
                tracing::debug!(provider = id, "Registered provider for health tracking");
                (id.to_string(), Arc::new(CircuitBreaker::new(config.clone())))
            })
            .collect();

        Self { breakers }
    }

    /// Create a health tracker with default breaker configuration
    pub fn with_defaults(registry: &ProviderRegistry) -> Self {
        Self::new(registry, CircuitBreakerConfig::default())
    }

    pub fn breaker(&self, provider_id: &str) -> Option<&Arc<CircuitBreaker>> {
        self.breakers.get(provider_id)
    }

    /// Gate check for a provider; unknown providers are never admitted
    pub fn admit(&self, provider_id: &str) -> Option<Admission> {
        self.breakers.get(provider_id).and_then(|cb| cb.admit())
    }

    /// Record the outcome of an attempt admitted with `admission`
    pub fn record(&self, provider_id: &str, admission: Admission, success: bool) {
        match self.breakers.get(provider_id) {
            Some(cb) => cb.record(admission, success),
            None => tracing::warn!(
                provider = provider_id,
                "Outcome recorded for unregistered provider"
            ),
        }
    }

    /// Order providers for selection.
    ///
    /// Cheapest first, with every provider that failed inside the trailing
    /// window moved behind all providers that did not. Providers whose
    /// breaker is open (or half-open with its trial in flight) are left out.
    /// The sort is stable so equal entries keep registry order.
    pub fn rank(&self, providers: &[Arc<ProviderProfile>]) -> Vec<Arc<ProviderProfile>> {
        let mut candidates: Vec<(bool, Arc<ProviderProfile>)> = providers
            .iter()
            .filter_map(|profile| {
                let cb = self.breakers.get(&profile.id)?;
                if !cb.is_available() {
                    tracing::debug!(
                        provider = %profile.id,
                        state = ?cb.state(),
                        "Excluding provider from ranking (circuit open)"
                    );
                    return None;
                }
                Some((cb.has_recent_failures(), Arc::clone(profile)))
            })
            .collect();

        candidates.sort_by(|(a_penalized, a), (b_penalized, b)| {
            a_penalized
                .cmp(b_penalized)
                .then_with(|| a.cost_per_1k_tokens.total_cmp(&b.cost_per_1k_tokens))
        });

        candidates.into_iter().map(|(_, profile)| profile).collect()
    }

    /// Diagnostic snapshot for one provider
    pub fn snapshot(&self, provider_id: &str) -> Option<HealthSnapshot> {
        self.breakers.get(provider_id).map(|cb| cb.snapshot())
    }

    /// Whether at least one provider would currently be ranked
    pub fn any_available(&self) -> bool {
        self.breakers.values().any(|cb| cb.is_available())
    }
}
