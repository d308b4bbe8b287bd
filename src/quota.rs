//! Quota configuration for rate limiting.
//!
//! A `Quota` defines how many requests are admitted within one fixed window. Windows
//! are aligned to the wall clock: a `Minute` window started at `12:03:41` ends at
//! `12:04:00`, not one minute later.
//!
//! # Examples
//!
//! ```ignore
//! use route_quota::{Quota, Window};
//!
//! // 100 requests per minute
//! let quota = Quota::per_minute(100);
//!
//! // Custom: 5 requests per hour
//! let quota = Quota::new(5, Window::Hour);
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Granularity of a fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    /// One wall-clock second.
    Second,
    /// One wall-clock minute.
    Minute,
    /// One wall-clock hour.
    Hour,
}

impl Window {
    /// Length of the window.
    pub fn duration(self) -> Duration {
        Duration::from_secs(self.seconds() as u64)
    }

    fn seconds(self) -> i64 {
        match self {
            Self::Second => 1,
            Self::Minute => 60,
            Self::Hour => 3600,
        }
    }

    fn label_format(self) -> &'static str {
        match self {
            Self::Second => "%Y-%m-%d %H:%M:%S",
            Self::Minute => "%Y-%m-%d %H:%M",
            Self::Hour => "%Y-%m-%d %H",
        }
    }

    /// Label of the window containing `now`.
    ///
    /// Every instant inside the same window yields the same label; the label changes
    /// exactly at the window boundary.
    pub fn bucket_label(self, now: DateTime<Utc>) -> String {
        now.format(self.label_format()).to_string()
    }

    /// Start of the window containing `now`.
    pub fn bucket_start(self, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.seconds();
        let start = now.timestamp().div_euclid(secs) * secs;
        DateTime::from_timestamp(start, 0).unwrap_or(now)
    }

    /// Time left until the window containing `now` closes.
    pub fn remaining_in_bucket(self, now: DateTime<Utc>) -> Duration {
        let end = self.bucket_start(now) + TimeDelta::seconds(self.seconds());
        (end - now).to_std().unwrap_or_default()
    }

    /// Lowercase name as used in configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Window {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "second" => Ok(Self::Second),
            "minute" => Ok(Self::Minute),
            "hour" => Ok(Self::Hour),
            _ => Err("interval must be one of second, minute, hour".to_string()),
        }
    }
}

/// Rate limiting quota configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    /// Maximum number of requests in the window.
    max_requests: u64,

    /// Window granularity.
    window: Window,
}

impl Quota {
    /// Create a new quota with the given maximum requests and window.
    ///
    /// # Panics
    ///
    /// Panics if `max_requests` is 0.
    pub fn new(max_requests: u64, window: Window) -> Self {
        assert!(max_requests > 0, "max_requests must be greater than 0");
        Self {
            max_requests,
            window,
        }
    }

    /// Create a quota allowing `n` requests per minute.
    pub fn per_minute(n: u64) -> Self {
        Self::new(n, Window::Minute)
    }

    /// Get the maximum requests allowed per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Get the window granularity.
    pub fn window(&self) -> Window {
        self.window
    }

    /// Remaining admits stored when a window's first request is admitted.
    pub fn initial_remaining(&self) -> u64 {
        self.max_requests - 1
    }
}
