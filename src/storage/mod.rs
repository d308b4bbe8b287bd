//! Counter store trait and implementations.
//!
//! This module defines the `Storage` trait every counter backend implements, along
//! with built-in implementations for in-memory and Redis storage.

mod entry;
#[cfg(feature = "memory")]
mod memory_gc;
#[cfg(feature = "redis")]
mod redis_cluster;

pub use entry::{CounterOutcome, CounterReply};

#[cfg(feature = "memory")]
pub use memory_gc::{GcConfig, GcInterval, MemoryStorage};

// RedisStorage with connection pooling
#[cfg(feature = "redis")]
pub use redis_cluster::{RedisConfig, RedisStorage};

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Counter store for fixed-window rate limiting.
///
/// Backends are shared by every in-flight request, across every service instance in
/// the distributed case, so the read-modify-write in [`Storage::acquire`] must be a
/// single atomic operation on the store side. Nothing in this crate takes an
/// in-process lock around it.
///
/// # Required Operations
///
/// - `acquire`: create-with-expiry or decrement-if-positive, atomically
/// - `peek`: read the remaining count without changing it
/// - `delete`: drop a counter
pub trait Storage: Send + Sync + 'static {
    /// Atomically take one admit from the counter at `key`.
    ///
    /// - absent: create it holding `initial` with the given `ttl`, report `Created`
    /// - positive: decrement by one, report `Decremented`
    /// - zero or less: leave it untouched, report `Exhausted`
    ///
    /// The expiry is only set on creation; later calls never extend it.
    fn acquire(
        &self,
        key: &str,
        initial: u64,
        ttl: Duration,
    ) -> impl Future<Output = Result<CounterReply>> + Send;

    /// Remaining count stored at `key`.
    ///
    /// Returns `None` if the key doesn't exist or has expired, which is distinct from
    /// a stored zero.
    fn peek(&self, key: &str) -> impl Future<Output = Result<Option<i64>>> + Send;

    /// Delete a counter.
    ///
    /// Returns success even if the key didn't exist.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

impl<S: Storage + ?Sized> Storage for std::sync::Arc<S> {
    async fn acquire(&self, key: &str, initial: u64, ttl: Duration) -> Result<CounterReply> {
        (**self).acquire(key, initial, ttl).await
    }

    async fn peek(&self, key: &str) -> Result<Option<i64>> {
        (**self).peek(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    async fn acquire(&self, key: &str, initial: u64, ttl: Duration) -> Result<CounterReply> {
        (**self).acquire(key, initial, ttl).await
    }

    async fn peek(&self, key: &str) -> Result<Option<i64>> {
        (**self).peek(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
