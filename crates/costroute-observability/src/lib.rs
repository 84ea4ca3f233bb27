//! CostRoute Observability
//!
//! This crate provides observability features:
//! - Metrics collection (Prometheus), fed as a usage sink
//! - Health endpoints

pub mod health;
pub mod metrics;

pub use health::{HealthState, ProviderReadiness, ReadinessChecker, health_router};
pub use metrics::{CircuitBreakerState, Metrics};
