//! In-memory counter storage with automatic garbage collection.
//!
//! This storage backend uses `DashMap` for thread-safe concurrent access and
//! includes configurable garbage collection of expired counters. It is only
//! consistent within one process; use Redis to share counters between instances.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::{CounterOutcome, CounterReply, Storage, current_timestamp_ms};

/// Garbage collection interval configuration.
#[derive(Debug, Clone)]
pub enum GcInterval {
    /// Run GC every N requests.
    Requests(u64),
    /// Run GC at fixed time intervals.
    Duration(Duration),
    /// Disable automatic GC.
    Manual,
}

impl Default for GcInterval {
    fn default() -> Self {
        Self::Requests(10000)
    }
}

/// Garbage collection configuration.
#[derive(Debug, Clone, Default)]
pub struct GcConfig {
    /// When to trigger GC.
    pub interval: GcInterval,
}

impl GcConfig {
    /// Create config with request-based GC.
    pub fn on_requests(count: u64) -> Self {
        Self {
            interval: GcInterval::Requests(count),
        }
    }

    /// Create config with time-based GC.
    pub fn on_duration(interval: Duration) -> Self {
        Self {
            interval: GcInterval::Duration(interval),
        }
    }

    /// Create config with manual GC only.
    pub fn manual() -> Self {
        Self {
            interval: GcInterval::Manual,
        }
    }
}

/// Counter with expiration tracking.
#[derive(Debug, Clone, Copy)]
struct InternalEntry {
    remaining: i64,
    expires_at: u64,
}

impl InternalEntry {
    fn expires_in(&self, now: u64) -> Duration {
        Duration::from_millis(self.expires_at.saturating_sub(now))
    }
}

/// In-memory counter storage with garbage collection.
///
/// `acquire` runs under the map shard's write lock, so concurrent callers for the
/// same key are serialized and can never both create or both take the last admit.
///
/// # Example
///
/// ```ignore
/// use route_quota::storage::{MemoryStorage, GcConfig};
/// use std::time::Duration;
///
/// // Default GC (every 10000 requests)
/// let storage = MemoryStorage::new();
///
/// // Background GC every minute (requires a Tokio runtime)
/// let storage = MemoryStorage::with_gc(GcConfig::on_duration(Duration::from_secs(60)));
///
/// // Manual GC only
/// let storage = MemoryStorage::with_gc(GcConfig::manual());
/// storage.run_gc();
/// ```
pub struct MemoryStorage {
    data: Arc<DashMap<String, InternalEntry>>,
    gc_config: GcConfig,
    request_count: AtomicU64,
    gc_lock: Mutex<()>,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("entries", &self.data.len())
            .field("gc_config", &self.gc_config)
            .finish()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Create a new memory storage with default GC configuration.
    pub fn new() -> Self {
        Self::with_gc(GcConfig::default())
    }

    /// Create a new memory storage with custom GC configuration.
    pub fn with_gc(gc_config: GcConfig) -> Self {
        let storage = Self {
            data: Arc::new(DashMap::new()),
            gc_config: gc_config.clone(),
            request_count: AtomicU64::new(0),
            gc_lock: Mutex::new(()),
        };

        // Start background GC task if duration-based
        if let GcInterval::Duration(interval) = gc_config.interval {
            storage.start_gc_task(interval);
        }

        storage
    }

    /// Start background GC task. It stops once the storage is dropped.
    fn start_gc_task(&self, interval: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no Tokio runtime, background counter GC disabled");
            return;
        };
        let data: Weak<DashMap<String, InternalEntry>> = Arc::downgrade(&self.data);

        handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(data) = data.upgrade() else {
                    break;
                };
                run_gc_on_map(&data);
            }
        });
    }

    /// Manually trigger garbage collection.
    pub fn run_gc(&self) {
        run_gc_on_map(&self.data);
    }

    /// Get the number of counters currently stored, expired or not.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the storage is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if GC should run and run it if needed.
    fn maybe_run_gc(&self) {
        if let GcInterval::Requests(threshold) = self.gc_config.interval {
            let count = self.request_count.fetch_add(1, Ordering::Relaxed);
            if threshold > 0 && count % threshold == 0 && count > 0 {
                // Try to acquire GC lock (non-blocking)
                if let Some(_guard) = self.gc_lock.try_lock() {
                    run_gc_on_map(&self.data);
                }
            }
        }
    }
}

/// Drop every expired counter.
fn run_gc_on_map(data: &DashMap<String, InternalEntry>) {
    let now = current_timestamp_ms();
    let before = data.len();
    data.retain(|_, entry| entry.expires_at > now);
    debug!(removed = before.saturating_sub(data.len()), "counter GC finished");
}

impl Storage for MemoryStorage {
    async fn acquire(&self, key: &str, initial: u64, ttl: Duration) -> Result<CounterReply> {
        self.maybe_run_gc();

        let now = current_timestamp_ms();
        let fresh = InternalEntry {
            remaining: initial as i64,
            expires_at: now + ttl.as_millis() as u64,
        };

        let reply = match self.data.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.expires_at <= now {
                    // Expired but not collected yet: same as absent.
                    *entry = fresh;
                    CounterReply::new(CounterOutcome::Created, initial, Some(ttl))
                } else if entry.remaining > 0 {
                    entry.remaining -= 1;
                    CounterReply::new(
                        CounterOutcome::Decremented,
                        entry.remaining as u64,
                        Some(entry.expires_in(now)),
                    )
                } else {
                    CounterReply::new(CounterOutcome::Exhausted, 0, Some(entry.expires_in(now)))
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                CounterReply::new(CounterOutcome::Created, initial, Some(ttl))
            }
        };

        Ok(reply)
    }

    async fn peek(&self, key: &str) -> Result<Option<i64>> {
        let now = current_timestamp_ms();
        Ok(self
            .data
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.remaining))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_acquire_sequence() {
        let storage = MemoryStorage::new();

        let reply = storage.acquire("k", 2, MINUTE).await.unwrap();
        assert_eq!(reply.outcome, CounterOutcome::Created);
        assert_eq!(reply.remaining, 2);

        let reply = storage.acquire("k", 2, MINUTE).await.unwrap();
        assert_eq!(reply.outcome, CounterOutcome::Decremented);
        assert_eq!(reply.remaining, 1);

        let reply = storage.acquire("k", 2, MINUTE).await.unwrap();
        assert_eq!(reply.outcome, CounterOutcome::Decremented);
        assert_eq!(reply.remaining, 0);

        // A stored zero is a deny and is not modified.
        let reply = storage.acquire("k", 2, MINUTE).await.unwrap();
        assert_eq!(reply.outcome, CounterOutcome::Exhausted);
        assert_eq!(storage.peek("k").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_limit_of_one() {
        let storage = MemoryStorage::new();

        let reply = storage.acquire("k", 0, MINUTE).await.unwrap();
        assert!(reply.is_admitted());
        assert_eq!(reply.remaining, 0);

        let reply = storage.acquire("k", 0, MINUTE).await.unwrap();
        assert!(!reply.is_admitted());
    }

    #[tokio::test]
    async fn test_expiry_recreates_counter() {
        let storage = MemoryStorage::new();

        storage.acquire("k", 0, Duration::from_millis(10)).await.unwrap();
        assert!(!storage.acquire("k", 0, Duration::from_millis(10)).await.unwrap().is_admitted());

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(storage.peek("k").await.unwrap(), None);
        let reply = storage.acquire("k", 0, Duration::from_millis(10)).await.unwrap();
        assert_eq!(reply.outcome, CounterOutcome::Created);
    }

    #[tokio::test]
    async fn test_peek_distinguishes_absent_from_zero() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.peek("k").await.unwrap(), None);

        storage.acquire("k", 0, MINUTE).await.unwrap();
        assert_eq!(storage.peek("k").await.unwrap(), Some(0));

        storage.delete("k").await.unwrap();
        assert_eq!(storage.peek("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_manual_gc_drops_expired() {
        let storage = MemoryStorage::with_gc(GcConfig::manual());

        storage.acquire("short", 5, Duration::from_millis(5)).await.unwrap();
        storage.acquire("long", 5, MINUTE).await.unwrap();
        assert_eq!(storage.len(), 2);

        tokio::time::sleep(Duration::from_millis(15)).await;
        storage.run_gc();

        assert_eq!(storage.len(), 1);
        assert_eq!(storage.peek("long").await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_concurrent_acquire_never_overshoots() {
        let storage = Arc::new(MemoryStorage::new());
        let limit = 10u64;

        let mut handles = Vec::new();
        for _ in 0..50 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                storage.acquire("shared", limit - 1, MINUTE).await.unwrap().is_admitted()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, limit);
    }

    #[test]
    fn test_gc_config() {
        let config = GcConfig::on_requests(1000);
        assert!(matches!(config.interval, GcInterval::Requests(1000)));
        assert!(matches!(GcConfig::manual().interval, GcInterval::Manual));
    }
}
