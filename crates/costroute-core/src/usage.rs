//! Usage records and sinks

use crate::provider::ProviderErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One provider attempt, successful or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cost: f64,
    pub success: bool,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ProviderErrorKind>,
}

/// Destination for usage records.
///
/// Emission is fire-and-forget: sinks own durability and must not block the
/// caller on I/O.
pub trait UsageSink: Send + Sync {
    fn emit(&self, record: &UsageRecord);
}
