//! Provider trait definitions

use crate::request::GenerationRequest;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Text and authoritative token counts returned by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Completion {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Classification of a failed provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Timeout,
    RateLimited,
    Authentication,
    TransientNetwork,
    Other,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::RateLimited => "rate_limited",
            ProviderErrorKind::Authentication => "authentication",
            ProviderErrorKind::TransientNetwork => "transient_network",
            ProviderErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Definitive failure of one logical provider attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ProviderErrorKind::Timeout,
            format!("no response after {:.1}s", after.as_secs_f64()),
        )
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Other, message)
    }
}

/// A downstream text-generation API.
///
/// Implementations may retry transient errors internally (bounded by the
/// provider's configured retry budget); the router treats whatever they
/// return as a single logical attempt.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Send the prompt, waiting at most `timeout` per wire request
    async fn complete(
        &self,
        request: &GenerationRequest,
        timeout: Duration,
    ) -> std::result::Result<Completion, ProviderError>;
}
