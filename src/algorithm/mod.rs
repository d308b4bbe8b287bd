//! Rate limiting algorithm trait and implementation.
//!
//! This module defines the `Algorithm` trait the [`RateLimitManager`](crate::RateLimitManager)
//! drives, and the fixed-window counter every policy is enforced with.
//!
//! # Available Algorithms
//!
//! - **Fixed Window** (default): one counter per identity per wall-clock window

mod fixed_window;

pub use fixed_window::FixedWindow;

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::decision::Decision;
use crate::error::Result;
use crate::policy::Policy;
use crate::storage::Storage;

/// Rate limiting algorithm trait.
///
/// Implementations hold no per-request state. All serialization needed for
/// correctness happens inside the storage backend's atomic operation.
pub trait Algorithm: Send + Sync + 'static {
    /// Get the algorithm name (for logging and headers).
    fn name(&self) -> &'static str;

    /// Counter key for `identity` under `policy` in the window containing `now`.
    fn key(&self, policy: &Policy, identity: &str, now: DateTime<Utc>) -> String;

    /// Check if a request is allowed AND record it atomically.
    ///
    /// A denied request never changes the stored counter.
    fn check_and_record<S: Storage>(
        &self,
        storage: &S,
        policy: &Policy,
        identity: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Decision>> + Send;

    /// Check without recording (peek at current state).
    ///
    /// Useful for displaying rate limit info without consuming quota.
    fn check<S: Storage>(
        &self,
        storage: &S,
        policy: &Policy,
        identity: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Decision>> + Send;

    /// Reset the counter for `identity` in the window containing `now`.
    fn reset<S: Storage>(
        &self,
        storage: &S,
        policy: &Policy,
        identity: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send {
        let key = self.key(policy, identity, now);
        async move { storage.delete(&key).await }
    }
}
