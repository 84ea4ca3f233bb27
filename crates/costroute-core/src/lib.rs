//! CostRoute Core Types and Traits
//!
//! This crate provides the fundamental types and traits used throughout CostRoute:
//! - Generation request/outcome types
//! - Provider trait abstraction and per-attempt error classification
//! - Usage records and the usage sink trait
//! - The retry schedule shared by connectors and the router
//! - Core error types

pub mod error;
pub mod provider;
pub mod request;
pub mod retry;
pub mod usage;

pub use error::{AttemptFailure, Error, Result};
pub use provider::{Completion, Provider, ProviderError, ProviderErrorKind};
pub use request::{GenerationOutcome, GenerationRequest};
pub use usage::{UsageRecord, UsageSink};
