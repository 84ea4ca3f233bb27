//! CostRoute Routing Engine
//!
//! This crate provides the routing logic for CostRoute:
//! - Provider registry (pricing, timeouts, retry budgets)
//! - Circuit breakers and health tracking
//! - Cost and usage accounting
//! - Router with cost-ordered failover

pub mod accounting;
pub mod circuit_breaker;
pub mod health;
pub mod provider_router;
pub mod registry;

// Re-export commonly used types
pub use accounting::{Accountant, AttemptOutcome, compute_cost};
pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState, HealthSnapshot,
};
pub use health::HealthTracker;
pub use provider_router::{ProviderStatus, Router};
pub use registry::{ProviderDescriptor, ProviderProfile, ProviderRegistry};
