//! Integration tests for request admission.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use route_quota::key::Claims;
use route_quota::storage::{CounterReply, Storage};
use route_quota::{
    DenyCause, FnVerifier, MemoryStorage, Outcome, PolicyDefinition, RateLimitManager,
    RateLimitManagerBuilder, RejectionStatus, Result, SimpleRequest, StorageError,
};
use serde_json::json;

fn at(m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, m, s).unwrap()
}

fn login_policy() -> PolicyDefinition {
    PolicyDefinition::new("POST", "/login", 3, "minute", "ip")
        .with_rejection("TOO_MANY_ATTEMPTS", "Try again in a minute")
}

fn login_from(ip: &str) -> SimpleRequest {
    SimpleRequest::new("POST", "/login").with_client_ip(ip.parse().unwrap())
}

fn manager(definitions: Vec<PolicyDefinition>) -> RateLimitManager<MemoryStorage> {
    RateLimitManagerBuilder::new()
        .policies(definitions)
        .build(MemoryStorage::new())
        .unwrap()
}

/// Storage whose every call fails.
struct FailingStorage;

impl Storage for FailingStorage {
    async fn acquire(&self, _key: &str, _initial: u64, _ttl: Duration) -> Result<CounterReply> {
        Err(StorageError::operation_failed("connection refused").into())
    }

    async fn peek(&self, _key: &str) -> Result<Option<i64>> {
        Err(StorageError::operation_failed("connection refused").into())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Err(StorageError::operation_failed("connection refused").into())
    }
}

/// Storage that never answers in time.
struct StalledStorage;

impl Storage for StalledStorage {
    async fn acquire(&self, _key: &str, _initial: u64, _ttl: Duration) -> Result<CounterReply> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(StorageError::operation_failed("unreachable").into())
    }

    async fn peek(&self, _key: &str) -> Result<Option<i64>> {
        Ok(None)
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// In-memory storage that counts every call.
#[derive(Default)]
struct CountingStorage {
    inner: MemoryStorage,
    calls: AtomicUsize,
}

impl CountingStorage {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Storage for CountingStorage {
    async fn acquire(&self, key: &str, initial: u64, ttl: Duration) -> Result<CounterReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.acquire(key, initial, ttl).await
    }

    async fn peek(&self, key: &str) -> Result<Option<i64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.peek(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn test_login_limit_by_ip() {
    let manager = manager(vec![login_policy()]);
    let now = at(0, 5);

    for i in 1..=3 {
        let outcome = manager.evaluate_at(&login_from("198.51.100.4"), now).await;
        assert!(outcome.is_allowed(), "Request {} should be allowed", i);
        assert_eq!(outcome.info().unwrap().remaining, 3 - i);
    }

    let outcome = manager.evaluate_at(&login_from("198.51.100.4"), now).await;
    let rejection = outcome.rejection().expect("4th request should be denied");
    assert_eq!(rejection.status, RejectionStatus::TooManyRequests);
    assert_eq!(rejection.cause, DenyCause::QuotaExhausted);
    assert_eq!(rejection.body.code, "TOO_MANY_ATTEMPTS");
    assert_eq!(rejection.body.message, "Try again in a minute");

    // Another address has its own counter.
    let other = manager.evaluate_at(&login_from("198.51.100.5"), now).await;
    assert!(other.is_allowed());
}

#[tokio::test]
async fn test_window_boundary_resets_counter() {
    let manager = manager(vec![login_policy()]);
    let request = login_from("198.51.100.4");

    for _ in 0..3 {
        assert!(manager.evaluate_at(&request, at(0, 59)).await.is_allowed());
    }
    assert!(manager.evaluate_at(&request, at(0, 59)).await.is_denied());

    let next = manager.evaluate_at(&request, at(1, 0)).await;
    assert!(next.is_allowed());
    assert_eq!(next.info().unwrap().remaining, 2);
}

#[tokio::test]
async fn test_policies_do_not_share_counters() {
    let manager = manager(vec![
        PolicyDefinition::new("POST", "/login", 1, "hour", "ip"),
        PolicyDefinition::new("POST", "/signup", 1, "hour", "ip"),
    ]);
    let now = at(10, 0);
    let ip = "192.0.2.1".parse().unwrap();

    let login = SimpleRequest::new("POST", "/login").with_client_ip(ip);
    let signup = SimpleRequest::new("POST", "/signup").with_client_ip(ip);

    assert!(manager.evaluate_at(&login, now).await.is_allowed());
    assert!(manager.evaluate_at(&signup, now).await.is_allowed());
    assert!(manager.evaluate_at(&login, now).await.is_denied());
}

#[tokio::test]
async fn test_unmatched_route_never_touches_store() {
    let storage = Arc::new(CountingStorage::default());
    let manager = RateLimitManagerBuilder::new()
        .policies(vec![login_policy()])
        .build(storage.clone())
        .unwrap();

    let outcome = manager.evaluate(&SimpleRequest::new("GET", "/health")).await;
    assert_eq!(outcome, Outcome::PassThrough);
    let outcome = manager.evaluate(&SimpleRequest::new("GET", "/login")).await;
    assert_eq!(outcome, Outcome::PassThrough);
    assert_eq!(storage.calls(), 0);

    manager.evaluate(&login_from("192.0.2.1")).await;
    assert_eq!(storage.calls(), 1);
}

#[tokio::test]
async fn test_store_failure_fail_open() {
    let manager = RateLimitManagerBuilder::new()
        .policies(vec![login_policy().allow_on_failure(true)])
        .build(FailingStorage)
        .unwrap();

    let outcome = manager.evaluate(&login_from("192.0.2.1")).await;
    assert_eq!(outcome, Outcome::Admit(None));
}

#[tokio::test]
async fn test_store_failure_fail_closed() {
    let manager = RateLimitManagerBuilder::new()
        .policies(vec![login_policy()])
        .build(FailingStorage)
        .unwrap();

    let outcome = manager.evaluate(&login_from("192.0.2.1")).await;
    let rejection = outcome.rejection().unwrap();
    assert_eq!(rejection.cause, DenyCause::StoreUnavailable);
    assert_eq!(rejection.status, RejectionStatus::TooManyRequests);
    assert_eq!(rejection.body.code, "TOO_MANY_ATTEMPTS");
    assert!(rejection.info.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_slow_store_counts_as_failure() {
    let closed = RateLimitManagerBuilder::new()
        .policies(vec![login_policy()])
        .store_timeout(Duration::from_millis(50))
        .build(StalledStorage)
        .unwrap();
    let outcome = closed.evaluate(&login_from("192.0.2.1")).await;
    assert_eq!(outcome.rejection().unwrap().cause, DenyCause::StoreUnavailable);

    let open = RateLimitManagerBuilder::new()
        .policies(vec![login_policy().allow_on_failure(true)])
        .store_timeout(Duration::from_millis(50))
        .build(StalledStorage)
        .unwrap();
    assert_eq!(open.evaluate(&login_from("192.0.2.1")).await, Outcome::Admit(None));
}

#[tokio::test]
async fn test_body_identity() {
    let manager = manager(vec![
        PolicyDefinition::new("POST", "/login", 1, "minute", "body")
            .with_field("user")
            .with_rejection("LOCKED", "Too many attempts for this user"),
    ]);
    let now = at(20, 0);
    let body = |raw: &str| SimpleRequest::new("POST", "/login").with_body(raw.to_string());

    assert!(manager.evaluate_at(&body(r#"{"user":"alice"}"#), now).await.is_allowed());
    assert!(manager.evaluate_at(&body(r#"{"user":"bob"}"#), now).await.is_allowed());

    let repeat = manager.evaluate_at(&body(r#"{"user":"alice"}"#), now).await;
    assert_eq!(repeat.rejection().unwrap().cause, DenyCause::QuotaExhausted);

    let missing = manager.evaluate_at(&body("{}"), now).await;
    let rejection = missing.rejection().unwrap();
    assert_eq!(rejection.status, RejectionStatus::Unauthorized);
    assert_eq!(rejection.cause, DenyCause::ExtractionFailed);
    assert_eq!(rejection.body.code, "LOCKED");

    let malformed = manager.evaluate_at(&body("user=alice"), now).await;
    assert_eq!(malformed.rejection().unwrap().status, RejectionStatus::BadRequest);
}

#[tokio::test]
async fn test_extraction_failure_fail_open_skips_store() {
    let storage = Arc::new(CountingStorage::default());
    let manager = RateLimitManagerBuilder::new()
        .policies(vec![
            PolicyDefinition::new("POST", "/login", 1, "minute", "body")
                .with_field("user")
                .allow_on_failure(true),
        ])
        .build(storage.clone())
        .unwrap();

    let request = SimpleRequest::new("POST", "/login").with_body("{}");
    assert_eq!(manager.evaluate(&request).await, Outcome::Admit(None));
    assert_eq!(storage.calls(), 0);
}

#[tokio::test]
async fn test_header_identity_defaults_to_empty_key() {
    let manager = manager(vec![
        PolicyDefinition::new("GET", "/search", 1, "minute", "header").with_field("x-api-key"),
    ]);
    let now = at(30, 0);

    // Requests without the header share the empty identity.
    let anonymous = SimpleRequest::new("GET", "/search");
    assert!(manager.evaluate_at(&anonymous, now).await.is_allowed());
    assert!(manager.evaluate_at(&anonymous, now).await.is_denied());

    let keyed = SimpleRequest::new("GET", "/search").with_header("X-Api-Key", "k-1");
    assert!(manager.evaluate_at(&keyed, now).await.is_allowed());
}

#[tokio::test]
async fn test_claim_identity() {
    let verifier = FnVerifier::new(|token: &str| match token {
        "token-alice" => {
            let mut claims = Claims::new();
            claims.insert("sub".into(), json!("alice"));
            Ok(claims)
        }
        _ => Err("invalid signature".to_string()),
    });
    let manager = RateLimitManagerBuilder::new()
        .policies(vec![
            PolicyDefinition::new("GET", "/me", 1, "minute", "jwt").with_field("sub"),
        ])
        .verifier(verifier)
        .build(MemoryStorage::new())
        .unwrap();
    let now = at(40, 0);

    let alice = SimpleRequest::new("GET", "/me").with_header("Authorization", "Bearer token-alice");
    assert!(manager.evaluate_at(&alice, now).await.is_allowed());
    assert!(manager.evaluate_at(&alice, now).await.is_denied());

    let forged = SimpleRequest::new("GET", "/me").with_header("Authorization", "Bearer forged");
    let rejection = manager.evaluate_at(&forged, now).await;
    assert_eq!(rejection.rejection().unwrap().status, RejectionStatus::Unauthorized);

    let anonymous = SimpleRequest::new("GET", "/me");
    assert_eq!(
        manager.evaluate_at(&anonymous, now).await.rejection().unwrap().cause,
        DenyCause::ExtractionFailed
    );
}

#[cfg(feature = "jwt")]
#[tokio::test]
async fn test_jwt_identity() {
    use jsonwebtoken::{EncodingKey, Header};
    use route_quota::JwtVerifier;

    let manager = RateLimitManagerBuilder::new()
        .policies(vec![
            PolicyDefinition::new("GET", "/me", 2, "minute", "jwt").with_field("sub"),
        ])
        .verifier(JwtVerifier::new("s3cret"))
        .build(MemoryStorage::new())
        .unwrap();

    let token = jsonwebtoken::encode(
        &Header::default(),
        &json!({ "sub": "carol" }),
        &EncodingKey::from_secret(b"s3cret"),
    )
    .unwrap();
    let request =
        SimpleRequest::new("GET", "/me").with_header("authorization", format!("Bearer {token}"));
    let now = at(50, 0);

    let outcome = manager.evaluate_at(&request, now).await;
    assert!(outcome.is_allowed());
    assert_eq!(outcome.info().unwrap().remaining, 1);
}

#[tokio::test]
async fn test_concurrent_requests_never_exceed_limit() {
    let limit = 10;
    let manager = Arc::new(manager(vec![
        PolicyDefinition::new("POST", "/login", limit, "hour", "ip"),
    ]));
    let now = at(45, 0);

    let mut handles = Vec::new();
    for _ in 0..64 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.evaluate_at(&login_from("203.0.113.9"), now).await.is_allowed()
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
