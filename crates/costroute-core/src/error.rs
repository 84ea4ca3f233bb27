//! Error types for CostRoute Core

use crate::provider::ProviderErrorKind;
use serde::Serialize;
use thiserror::Error;

/// A single failed attempt, kept for the aggregate failure report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptFailure {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed ({}): {}", self.provider, self.kind, self.message)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No providers available: every circuit breaker is open")]
    AllProvidersUnavailable,

    #[error("All providers failed: {}", format_failures(.failures))]
    AllProvidersFailed { failures: Vec<AttemptFailure> },
}

impl Error {
    /// Stable machine-readable kind, used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::InvalidRequest(_) => "invalid_request",
            Error::AllProvidersUnavailable => "all_providers_unavailable",
            Error::AllProvidersFailed { .. } => "all_providers_failed",
        }
    }
}

fn format_failures(failures: &[AttemptFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;
