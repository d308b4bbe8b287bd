//! Response headers describing a counted decision.

use std::time::Duration;

use crate::decision::RateLimitInfo;

/// Header names, as written on responses.
pub mod names {
    /// Maximum requests allowed per window.
    pub const RATE_LIMIT_LIMIT: &str = "X-RateLimit-Limit";

    /// Remaining requests in current window.
    pub const RATE_LIMIT_REMAINING: &str = "X-RateLimit-Remaining";

    /// Seconds until the window resets.
    pub const RATE_LIMIT_RESET: &str = "X-RateLimit-Reset";

    /// Seconds until the client should retry. Only sent on a quota deny.
    pub const RETRY_AFTER: &str = "Retry-After";
}

/// Header values for one decision.
///
/// Only counted decisions carry headers. Pass-throughs and requests admitted or
/// rejected because of a failure have no [`RateLimitInfo`] and get none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// `X-RateLimit-Limit`
    pub limit: u64,
    /// `X-RateLimit-Remaining`
    pub remaining: u64,
    /// `X-RateLimit-Reset`, whole seconds rounded up
    pub reset: u64,
    /// `Retry-After`, at least one second
    pub retry_after: Option<u64>,
}

impl RateLimitHeaders {
    /// Name and value pairs, in a stable order.
    pub fn to_vec(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (names::RATE_LIMIT_LIMIT, self.limit.to_string()),
            (names::RATE_LIMIT_REMAINING, self.remaining.to_string()),
            (names::RATE_LIMIT_RESET, self.reset.to_string()),
        ];
        if let Some(retry_after) = self.retry_after {
            headers.push((names::RETRY_AFTER, retry_after.to_string()));
        }
        headers
    }
}

fn whole_seconds(duration: Duration) -> u64 {
    // A client that waits `Retry-After: 0` would retry inside the same window.
    duration.as_secs().max(1)
}

impl From<&RateLimitInfo> for RateLimitHeaders {
    fn from(info: &RateLimitInfo) -> Self {
        Self {
            limit: info.limit,
            remaining: info.remaining,
            reset: info.reset_seconds(),
            retry_after: info.retry_after.map(whole_seconds),
        }
    }
}
