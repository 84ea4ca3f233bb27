//! Cost & Usage Accounting
//!
//! Prices completed attempts from the provider-reported token counts and
//! hands one usage record per attempt to the configured sink.

use crate::registry::ProviderProfile;
use chrono::Utc;
use costroute_core::{ProviderErrorKind, UsageRecord, UsageSink};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of a single attempt, as seen by the accountant
#[derive(Debug, Clone, Copy)]
pub enum AttemptOutcome {
    Success {
        prompt_tokens: u32,
        completion_tokens: u32,
    },
    Failure(ProviderErrorKind),
}

/// Cost = prompt_tokens/1000 × prompt rate + completion_tokens/1000 × completion rate.
///
/// With no per-direction overrides both rates equal `cost_per_1k_tokens` and
/// the tokens are summed first, so 1000 tokens cost exactly the rate.
pub fn compute_cost(provider: &ProviderProfile, prompt_tokens: u32, completion_tokens: u32) -> f64 {
    if provider.prompt_cost_per_1k_tokens == provider.completion_cost_per_1k_tokens {
        let total = f64::from(prompt_tokens) + f64::from(completion_tokens);
        return total / 1000.0 * provider.prompt_cost_per_1k_tokens;
    }

    f64::from(prompt_tokens) / 1000.0 * provider.prompt_cost_per_1k_tokens
        + f64::from(completion_tokens) / 1000.0 * provider.completion_cost_per_1k_tokens
}

/// Produces and emits usage records
#[derive(Clone)]
pub struct Accountant {
    sink: Arc<dyn UsageSink>,
}

impl std::fmt::Debug for Accountant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accountant").finish_non_exhaustive()
    }
}

impl Accountant {
    pub fn new(sink: Arc<dyn UsageSink>) -> Self {
        Self { sink }
    }

    /// Build the usage record for an attempt and emit it.
    ///
    /// Failed attempts are recorded with zero tokens and zero cost.
    pub fn record_usage(
        &self,
        provider: &ProviderProfile,
        outcome: AttemptOutcome,
        latency: Duration,
    ) -> UsageRecord {
        let (prompt_tokens, completion_tokens, error_kind) = match outcome {
            AttemptOutcome::Success {
                prompt_tokens,
                completion_tokens,
            } => (prompt_tokens, completion_tokens, None),
            AttemptOutcome::Failure(kind) => (0, 0, Some(kind)),
        };

        let record = UsageRecord {
            timestamp: Utc::now(),
            provider: provider.id.clone(),
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
            cost: compute_cost(provider, prompt_tokens, completion_tokens),
            success: error_kind.is_none(),
            latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            error_kind,
        };

        tracing::debug!(
            provider = %record.provider,
            success = record.success,
            total_tokens = record.total_tokens,
            cost = record.cost,
            latency_ms = record.latency_ms,
            "Usage recorded"
        );

        self.sink.emit(&record);
        record
    }
}
