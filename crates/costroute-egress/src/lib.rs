//! CostRoute Egress Connectors
//!
//! This crate provides connectors to downstream LLM providers:
//! - OpenAI-compatible chat completions (OpenAI, Mistral, DeepSeek)
//! - Google Gemini `generateContent`
//!
//! Connectors retry transient failures themselves and report a single
//! definitive [`ProviderError`] to the router.

pub mod client;
pub mod gemini;
pub mod openai;

pub use gemini::{GeminiConfig, GeminiConnector};
pub use openai::{OpenAICompatConfig, OpenAICompatConnector};

use costroute_core::{ProviderError, ProviderErrorKind};
use std::time::Duration;

/// Egress errors
#[derive(Debug, thiserror::Error)]
pub enum EgressError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Provider returned error {status_code}: {message}")]
    ProviderError { status_code: u16, message: String },

    #[error("Rate limit exceeded{}", retry_after_suffix(.retry_after_secs))]
    RateLimitExceeded { retry_after_secs: Option<u64> },

    #[error("Request timeout after {0}s")]
    Timeout(u64),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

pub type Result<T> = std::result::Result<T, EgressError>;

impl EgressError {
    /// Failure category reported to the router
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            EgressError::HttpError(err) if err.is_timeout() => ProviderErrorKind::Timeout,
            EgressError::HttpError(err) if err.is_connect() || err.is_request() => {
                ProviderErrorKind::TransientNetwork
            }
            EgressError::HttpError(err) => match err.status().map(|s| s.as_u16()) {
                Some(status) => status_kind(status),
                None => ProviderErrorKind::Other,
            },
            EgressError::ProviderError { status_code, .. } => status_kind(*status_code),
            EgressError::RateLimitExceeded { .. } => ProviderErrorKind::RateLimited,
            EgressError::Timeout(_) => ProviderErrorKind::Timeout,
            EgressError::ConfigError(_) | EgressError::ParseError(_) => ProviderErrorKind::Other,
        }
    }

    /// Whether another try against the same provider could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            EgressError::HttpError(err) => err.is_connect() || err.is_timeout() || err.is_request(),
            EgressError::ProviderError { status_code, .. } => {
                matches!(status_code, 429 | 500 | 502 | 503 | 504)
            }
            EgressError::RateLimitExceeded { .. } | EgressError::Timeout(_) => true,
            EgressError::ConfigError(_) | EgressError::ParseError(_) => false,
        }
    }

    /// Wait the provider asked for before the next try
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            EgressError::RateLimitExceeded {
                retry_after_secs: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

fn retry_after_suffix(retry_after_secs: &Option<u64>) -> String {
    retry_after_secs
        .map(|secs| format!(", retry after {}s", secs))
        .unwrap_or_default()
}

fn status_kind(status: u16) -> ProviderErrorKind {
    match status {
        401 | 403 => ProviderErrorKind::Authentication,
        429 => ProviderErrorKind::RateLimited,
        408 | 500..=599 => ProviderErrorKind::TransientNetwork,
        _ => ProviderErrorKind::Other,
    }
}

impl From<EgressError> for ProviderError {
    fn from(err: EgressError) -> Self {
        ProviderError::new(err.kind(), err.to_string())
    }
}
