//! Decision types for rate limiting results.
//!
//! The counter algorithm produces a [`Decision`]: admitted or denied, plus the state
//! of the window. The manager turns that, or a failure, into the [`Outcome`] a
//! framework adapter acts on.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::headers::RateLimitHeaders;

/// The result of a counter check.
#[derive(Debug, Clone)]
pub struct Decision {
    /// Whether the request is allowed.
    allowed: bool,
    /// Rate limit information.
    info: RateLimitInfo,
}

impl Decision {
    /// Create a new "allowed" decision.
    pub fn allowed(info: RateLimitInfo) -> Self {
        Self {
            allowed: true,
            info,
        }
    }

    /// Create a new "denied" decision.
    pub fn denied(info: RateLimitInfo) -> Self {
        Self {
            allowed: false,
            info,
        }
    }

    /// Check if the request is allowed.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Check if the request is denied.
    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// Get the rate limit info.
    pub fn info(&self) -> &RateLimitInfo {
        &self.info
    }

    /// Consume the decision and return the info.
    pub fn into_info(self) -> RateLimitInfo {
        self.info
    }
}

/// State of the window a decision was made in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Maximum requests allowed.
    pub limit: u64,
    /// Remaining requests in the current window.
    pub remaining: u64,
    /// Start of the current window.
    pub window_start: DateTime<Utc>,
    /// Time until the window closes.
    pub reset_after: Duration,
    /// How long to wait before retrying (only set when rate limited).
    pub retry_after: Option<Duration>,
}

impl RateLimitInfo {
    /// Create a new rate limit info.
    pub fn new(
        limit: u64,
        remaining: u64,
        window_start: DateTime<Utc>,
        reset_after: Duration,
    ) -> Self {
        Self {
            limit,
            remaining,
            window_start,
            reset_after,
            retry_after: None,
        }
    }

    /// Set the retry-after duration.
    pub fn with_retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    /// Seconds until reset, rounded up so that waiting that long always reaches the
    /// next window.
    pub fn reset_seconds(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    /// Convert to HTTP headers.
    ///
    /// Returns a vector of (header_name, header_value) pairs.
    pub fn to_headers(&self) -> Vec<(&'static str, String)> {
        RateLimitHeaders::from(self).to_vec()
    }
}

/// HTTP status attached to a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionStatus {
    /// 400, the body could not be parsed.
    BadRequest,
    /// 401, no usable identity in the body or token.
    Unauthorized,
    /// 429, quota exhausted or the store is unavailable under a fail-closed policy.
    TooManyRequests,
}

impl RejectionStatus {
    /// Numeric status code.
    pub fn as_u16(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::TooManyRequests => 429,
        }
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyCause {
    /// The window's quota is used up.
    QuotaExhausted,
    /// No identity could be derived and the policy fails closed.
    ExtractionFailed,
    /// The counter store failed and the policy fails closed.
    StoreUnavailable,
}

/// JSON body sent with a rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionBody {
    /// Policy's rejection code.
    pub code: String,
    /// Policy's rejection message.
    pub message: String,
}

/// A denied request, ready to be rendered by a framework adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Status to respond with.
    pub status: RejectionStatus,
    /// Body to respond with.
    pub body: RejectionBody,
    /// Why the request was denied.
    pub cause: DenyCause,
    /// Window state, when the counter was consulted.
    pub info: Option<RateLimitInfo>,
}

/// Final result of evaluating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No policy covers the route. Nothing was counted.
    PassThrough,
    /// A policy covers the route and the request may proceed. `None` when it was
    /// admitted because of a failure under a fail-open policy.
    Admit(Option<RateLimitInfo>),
    /// The request must be rejected.
    Deny(Rejection),
}

impl Outcome {
    /// Whether the request continues to the handler.
    pub fn is_allowed(&self) -> bool {
        !self.is_denied()
    }

    /// Whether the request is rejected.
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny(_))
    }

    /// The rejection, if denied.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Deny(rejection) => Some(rejection),
            _ => None,
        }
    }

    /// Window state, if the counter was consulted.
    pub fn info(&self) -> Option<&RateLimitInfo> {
        match self {
            Self::PassThrough => None,
            Self::Admit(info) => info.as_ref(),
            Self::Deny(rejection) => rejection.info.as_ref(),
        }
    }
}
