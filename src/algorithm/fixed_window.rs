//! Fixed Window rate limiting algorithm.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::algorithm::Algorithm;
use crate::decision::{Decision, RateLimitInfo};
use crate::error::Result;
use crate::policy::Policy;
use crate::storage::Storage;

/// Fixed Window rate limiting algorithm.
///
/// Each identity gets one counter per wall-clock window. The counter is keyed by the
/// window's label (`2024-03-09 14:05` for a minute window), so a new window starts a
/// new key and the previous one simply expires in the store.
///
/// The counter holds the *remaining* admits: the first request of a window stores
/// `limit - 1`, every later admit decrements it, and a stored zero denies without
/// touching the store.
///
/// # Trade-offs
///
/// A client can spend a full quota at the end of one window and another at the start
/// of the next.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedWindow;

impl FixedWindow {
    /// Create a new Fixed Window algorithm instance.
    pub fn new() -> Self {
        Self
    }

    fn info(
        &self,
        policy: &Policy,
        remaining: u64,
        now: DateTime<Utc>,
        reset_after: Duration,
    ) -> RateLimitInfo {
        let window = policy.quota().window();
        RateLimitInfo::new(
            policy.quota().max_requests(),
            remaining,
            window.bucket_start(now),
            reset_after,
        )
    }
}

impl Algorithm for FixedWindow {
    fn name(&self) -> &'static str {
        "fixed_window"
    }

    fn key(&self, policy: &Policy, identity: &str, now: DateTime<Utc>) -> String {
        let label = policy.quota().window().bucket_label(now);
        format!("{}:{}:{}", label, policy.id(), identity)
    }

    async fn check_and_record<S: Storage>(
        &self,
        storage: &S,
        policy: &Policy,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        let quota = policy.quota();
        let window = quota.window();
        let key = self.key(policy, identity, now);

        let reply = storage
            .acquire(&key, quota.initial_remaining(), window.duration())
            .await?;

        // The label rolls over on the wall clock; the stored expiry may run past it.
        let bucket_left = window.remaining_in_bucket(now);
        let reset_after = reply
            .expires_in
            .map_or(bucket_left, |expires_in| expires_in.min(bucket_left));
        let info = self.info(policy, reply.remaining, now, reset_after);

        if reply.is_admitted() {
            Ok(Decision::allowed(info))
        } else {
            Ok(Decision::denied(info.with_retry_after(reset_after)))
        }
    }

    async fn check<S: Storage>(
        &self,
        storage: &S,
        policy: &Policy,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        let key = self.key(policy, identity, now);
        let reset_after = policy.quota().window().remaining_in_bucket(now);

        match storage.peek(&key).await? {
            // Nothing recorded in this window yet.
            None => Ok(Decision::allowed(self.info(
                policy,
                policy.quota().max_requests(),
                now,
                reset_after,
            ))),
            Some(remaining) if remaining > 0 => Ok(Decision::allowed(self.info(
                policy,
                remaining as u64,
                now,
                reset_after,
            ))),
            Some(_) => Ok(Decision::denied(
                self.info(policy, 0, now, reset_after)
                    .with_retry_after(reset_after),
            )),
        }
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::policy::PolicyDefinition;
    use crate::storage::MemoryStorage;
    use chrono::TimeZone;

    fn policy(limit: i64, window: &str) -> Policy {
        Policy::from_definition(0, PolicyDefinition::new("POST", "/login", limit, window, "ip"))
            .unwrap()
    }

    fn at(m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 12, m, s).unwrap()
    }

    #[test]
    fn test_key_layout() {
        let algorithm = FixedWindow::new();
        let key = algorithm.key(&policy(3, "minute"), "10.0.0.1", at(5, 42));
        assert_eq!(key, "2024-03-09 12:05:0:10.0.0.1");
    }

    #[tokio::test]
    async fn test_fixed_window_basic() {
        let algorithm = FixedWindow::new();
        let storage = MemoryStorage::new();
        let policy = policy(5, "minute");
        let now = at(0, 10);

        for i in 1..=5 {
            let decision = algorithm
                .check_and_record(&storage, &policy, "user:1", now)
                .await
                .unwrap();
            assert!(decision.is_allowed(), "Request {} should be allowed", i);
            assert_eq!(decision.info().remaining, 5 - i);
        }

        let decision = algorithm
            .check_and_record(&storage, &policy, "user:1", now)
            .await
            .unwrap();
        assert!(decision.is_denied());
        assert_eq!(decision.info().remaining, 0);
        assert_eq!(decision.info().retry_after, Some(Duration::from_secs(50)));
    }

    #[tokio::test]
    async fn test_fixed_window_boundary_resets() {
        let algorithm = FixedWindow::new();
        let storage = MemoryStorage::new();
        let policy = policy(1, "minute");

        let first = algorithm.check_and_record(&storage, &policy, "u", at(3, 59)).await.unwrap();
        assert!(first.is_allowed());
        let second = algorithm.check_and_record(&storage, &policy, "u", at(3, 59)).await.unwrap();
        assert!(second.is_denied());

        let next_window = algorithm
            .check_and_record(&storage, &policy, "u", at(4, 0))
            .await
            .unwrap();
        assert!(next_window.is_allowed());
        assert_eq!(next_window.info().window_start, at(4, 0));
    }

    #[tokio::test]
    async fn test_check_does_not_record() {
        let algorithm = FixedWindow::new();
        let storage = MemoryStorage::new();
        let policy = policy(2, "hour");
        let now = at(30, 0);

        let peek = algorithm.check(&storage, &policy, "u", now).await.unwrap();
        assert!(peek.is_allowed());
        assert_eq!(peek.info().remaining, 2);

        algorithm.check_and_record(&storage, &policy, "u", now).await.unwrap();
        algorithm.check_and_record(&storage, &policy, "u", now).await.unwrap();

        let peek = algorithm.check(&storage, &policy, "u", now).await.unwrap();
        assert!(peek.is_denied());
        let peek_again = algorithm.check(&storage, &policy, "u", now).await.unwrap();
        assert!(peek_again.is_denied());
    }

    #[tokio::test]
    async fn test_reset() {
        let algorithm = FixedWindow::new();
        let storage = MemoryStorage::new();
        let policy = policy(1, "second");
        let now = at(0, 1);

        algorithm.check_and_record(&storage, &policy, "u", now).await.unwrap();
        assert!(algorithm.check_and_record(&storage, &policy, "u", now).await.unwrap().is_denied());

        algorithm.reset(&storage, &policy, "u", now).await.unwrap();
        let after_reset = algorithm
            .check_and_record(&storage, &policy, "u", now)
            .await
            .unwrap();
        assert!(after_reset.is_allowed());
    }
}
