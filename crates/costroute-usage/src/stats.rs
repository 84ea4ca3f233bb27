//! In-memory usage statistics
//!
//! Per-provider counters live in a `DashMap` so concurrent attempts on
//! different providers never contend. A bounded history of the most recent
//! records backs the "recent requests" view.

use costroute_core::{UsageRecord, UsageSink};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

/// Records kept in the history ring
pub const HISTORY_CAPACITY: usize = 100;

/// Records shown in a report
pub const RECENT_IN_REPORT: usize = 10;

#[derive(Debug, Default, Clone)]
struct ProviderTotals {
    requests: u64,
    successes: u64,
    failures: u64,
    prompt_tokens: u64,
    completion_tokens: u64,
    cost: f64,
    /// Summed over successful attempts only
    latency_ms: u64,
}

/// Aggregate counters for one provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderUsage {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_cost: f64,
    /// Mean latency of successful attempts, absent until one succeeds
    pub average_latency_ms: Option<f64>,
}

impl From<&ProviderTotals> for ProviderUsage {
    fn from(totals: &ProviderTotals) -> Self {
        let average_latency_ms = (totals.successes > 0)
            .then(|| totals.latency_ms as f64 / totals.successes as f64);

        Self {
            total_requests: totals.requests,
            successful_requests: totals.successes,
            failed_requests: totals.failures,
            total_prompt_tokens: totals.prompt_tokens,
            total_completion_tokens: totals.completion_tokens,
            total_cost: totals.cost,
            average_latency_ms,
        }
    }
}

/// Totals across every provider
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct OverallUsage {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
}

/// Point-in-time usage summary
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub overall: OverallUsage,
    pub providers: BTreeMap<String, ProviderUsage>,
    /// Oldest first
    pub recent_requests: Vec<UsageRecord>,
}

/// Usage sink that aggregates records in memory
#[derive(Debug, Default)]
pub struct UsageStats {
    providers: DashMap<String, ProviderTotals>,
    history: Mutex<VecDeque<UsageRecord>>,
}

impl UsageStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: &UsageRecord) {
        {
            let mut totals = self.providers.entry(record.provider.clone()).or_default();
            totals.requests += 1;
            if record.success {
                totals.successes += 1;
                totals.prompt_tokens += u64::from(record.prompt_tokens);
                totals.completion_tokens += u64::from(record.completion_tokens);
                totals.cost += record.cost;
                totals.latency_ms = totals.latency_ms.saturating_add(record.latency_ms);
            } else {
                totals.failures += 1;
            }
        }

        let mut history = self
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(record.clone());
    }

    /// Counters for a single provider
    pub fn provider(&self, provider: &str) -> Option<ProviderUsage> {
        self.providers.get(provider).map(|totals| ProviderUsage::from(&*totals))
    }

    pub fn report(&self) -> UsageReport {
        let providers: BTreeMap<String, ProviderUsage> = self
            .providers
            .iter()
            .map(|entry| (entry.key().clone(), ProviderUsage::from(entry.value())))
            .collect();

        let mut overall = OverallUsage::default();
        for usage in providers.values() {
            overall.total_requests += usage.total_requests;
            overall.successful_requests += usage.successful_requests;
            overall.failed_requests += usage.failed_requests;
            overall.total_tokens += usage.total_prompt_tokens + usage.total_completion_tokens;
            overall.total_cost += usage.total_cost;
        }

        let history = self
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let skip = history.len().saturating_sub(RECENT_IN_REPORT);

        UsageReport {
            overall,
            providers,
            recent_requests: history.iter().skip(skip).cloned().collect(),
        }
    }
}

impl UsageSink for UsageStats {
    fn emit(&self, record: &UsageRecord) {
        self.record(record);
    }
}
