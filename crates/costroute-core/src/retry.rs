//! Retry schedule
//!
//! Shared by the egress connectors, which sleep between tries, and the
//! router, which must leave room for those sleeps in an attempt's deadline.

use std::time::Duration;

/// First backoff step, doubled on every further retry
pub const BASE_BACKOFF: Duration = Duration::from_millis(100);

/// Longest wait a provider's `Retry-After` can impose
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Exponential backoff before retry number `retry` (1-based)
pub fn backoff(retry: u32) -> Duration {
    let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
    BASE_BACKOFF.saturating_mul(factor)
}

/// Wait before retry number `retry`, honoring a capped `Retry-After`
pub fn retry_delay(retry: u32, retry_after: Option<Duration>) -> Duration {
    let requested = retry_after.map_or(Duration::ZERO, |d| d.min(MAX_RETRY_AFTER));
    backoff(retry).max(requested)
}

/// Longest total time spent sleeping across `max_retries` retries
pub fn max_total_delay(max_retries: u32) -> Duration {
    (1..=max_retries).fold(Duration::ZERO, |total, retry| {
        total.saturating_add(backoff(retry).max(MAX_RETRY_AFTER))
    })
}
