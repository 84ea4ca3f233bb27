//! Metrics collection with Prometheus
//!
//! This module provides Prometheus metrics for CostRoute:
//! - Routed request outcomes
//! - Per-provider attempt counts, failures by kind and latency
//! - Token and cost totals
//! - Circuit breaker state

use costroute_core::{UsageRecord, UsageSink};
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;

/// Circuit breaker state as exported in the gauge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

/// Metrics collector for CostRoute
#[derive(Clone)]
pub struct Metrics {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Routed requests by final outcome
    pub requests_total: CounterVec,
    /// End-to-end routing duration
    pub request_duration_seconds: HistogramVec,

    /// Provider attempts by outcome (success / failure)
    pub attempts_total: CounterVec,
    /// Failed attempts by error kind
    pub attempt_failures_total: CounterVec,
    /// Provider attempt latency
    pub attempt_duration_seconds: HistogramVec,

    pub tokens_prompt: CounterVec,
    pub tokens_completion: CounterVec,
    /// Accumulated cost in the configured currency unit
    pub cost_total: CounterVec,

    /// Circuit breaker state (0=closed, 1=open, 2=half-open)
    pub circuit_breaker_state: GaugeVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("costroute_requests_total", "Total number of routed requests"),
            &["outcome"],
        )?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "costroute_request_duration_seconds",
                "Routed request duration in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["outcome"],
        )?;

        let attempts_total = CounterVec::new(
            Opts::new("costroute_attempts_total", "Total number of provider attempts"),
            &["provider", "outcome"],
        )?;

        let attempt_failures_total = CounterVec::new(
            Opts::new(
                "costroute_attempt_failures_total",
                "Failed provider attempts by error kind",
            ),
            &["provider", "error_kind"],
        )?;

        let attempt_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "costroute_attempt_duration_seconds",
                "Provider attempt duration in seconds",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["provider"],
        )?;

        let tokens_prompt = CounterVec::new(
            Opts::new("costroute_tokens_prompt_total", "Prompt tokens used"),
            &["provider"],
        )?;

        let tokens_completion = CounterVec::new(
            Opts::new("costroute_tokens_completion_total", "Completion tokens used"),
            &["provider"],
        )?;

        let cost_total = CounterVec::new(
            Opts::new("costroute_cost_total", "Accumulated request cost"),
            &["provider"],
        )?;

        let circuit_breaker_state = GaugeVec::new(
            Opts::new(
                "costroute_circuit_breaker_state",
                "Circuit breaker state (0=closed, 1=open, 2=half-open)",
            ),
            &["provider"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(attempts_total.clone()))?;
        registry.register(Box::new(attempt_failures_total.clone()))?;
        registry.register(Box::new(attempt_duration_seconds.clone()))?;
        registry.register(Box::new(tokens_prompt.clone()))?;
        registry.register(Box::new(tokens_completion.clone()))?;
        registry.register(Box::new(cost_total.clone()))?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            request_duration_seconds,
            attempts_total,
            attempt_failures_total,
            attempt_duration_seconds,
            tokens_prompt,
            tokens_completion,
            cost_total,
            circuit_breaker_state,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record the final outcome of a routed request
    pub fn record_request(&self, outcome: &str, duration_secs: f64) {
        self.requests_total.with_label_values(&[outcome]).inc();
        self.request_duration_seconds
            .with_label_values(&[outcome])
            .observe(duration_secs);
    }

    /// Record a single provider attempt
    pub fn record_attempt(&self, record: &UsageRecord) {
        let provider = record.provider.as_str();
        let outcome = if record.success { "success" } else { "failure" };

        self.attempts_total
            .with_label_values(&[provider, outcome])
            .inc();
        self.attempt_duration_seconds
            .with_label_values(&[provider])
            .observe(record.latency_ms as f64 / 1000.0);

        if let Some(kind) = record.error_kind {
            self.attempt_failures_total
                .with_label_values(&[provider, kind.as_str()])
                .inc();
        }

        if record.success {
            self.tokens_prompt
                .with_label_values(&[provider])
                .inc_by(f64::from(record.prompt_tokens));
            self.tokens_completion
                .with_label_values(&[provider])
                .inc_by(f64::from(record.completion_tokens));
            // Counters reject negative increments
            if record.cost > 0.0 {
                self.cost_total
                    .with_label_values(&[provider])
                    .inc_by(record.cost);
            }
        }
    }

    pub fn update_circuit_breaker_state(&self, provider: &str, state: CircuitBreakerState) {
        self.circuit_breaker_state
            .with_label_values(&[provider])
            .set(state as i64 as f64);
    }
}

impl UsageSink for Metrics {
    fn emit(&self, record: &UsageRecord) {
        self.record_attempt(record);
    }
}
