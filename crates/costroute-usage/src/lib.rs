//! CostRoute Usage Sinks
//!
//! Destinations for the per-attempt usage records produced by the router:
//! - JSONL usage log written by a background task
//! - In-memory aggregate statistics
//! - Fan-out to several sinks at once

pub mod fanout;
pub mod jsonl_writer;
pub mod stats;

pub use fanout::FanoutSink;
pub use jsonl_writer::{JsonlUsageLog, UsageLogConfig};
pub use stats::{OverallUsage, ProviderUsage, UsageReport, UsageStats};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UsageLogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Usage log worker failed: {0}")]
    Worker(String),
}

pub type UsageLogResult<T> = Result<T, UsageLogError>;
