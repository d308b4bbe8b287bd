//! Login throttling driven by a YAML policy document.
//!
//! Run with `RUST_LOG=route_quota=debug cargo run --example login_limit` to see
//! each decision logged.

use route_quota::prelude::*;
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"
store_timeout_ms: 50
policies:
  - method: POST
    path: /login
    limit: 3
    interval: minute
    type: ip
    not_allow_code: TOO_MANY_ATTEMPTS
    not_allow_msg: Too many login attempts, try again in a minute
  - method: GET
    path: /search
    limit: 5
    interval: second
    type: query
    key_field: user
    allow_on_failure: true
"#;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = RateLimiterConfig::from_yaml(CONFIG)?;
    let manager = RateLimitManagerBuilder::new()
        .registry(config.registry()?)
        .store_timeout(config.store_timeout())
        .build(MemoryStorage::new())?;

    let mut policies: Vec<_> = manager.registry().iter().collect();
    policies.sort_by_key(|policy| policy.id());
    for policy in policies {
        println!(
            "policy #{}: {} {} allows {} per {} by {}",
            policy.id(),
            policy.method(),
            policy.path(),
            policy.quota().max_requests(),
            policy.quota().window(),
            policy.source().name()
        );
    }

    println!("=== POST /login from one address ===");
    let login = SimpleRequest::new("POST", "/login").with_client_ip("203.0.113.7".parse().unwrap());
    for attempt in 1..=5 {
        report(attempt, manager.evaluate(&login).await);
    }

    println!("\n=== POST /login from another address ===");
    let other =
        SimpleRequest::new("POST", "/login").with_client_ip("198.51.100.2".parse().unwrap());
    report(1, manager.evaluate(&other).await);

    println!("\n=== GET /search per user ===");
    for user in ["alice", "alice", "bob"] {
        let search =
            SimpleRequest::new("GET", "/search").with_query(&format!("user={user}&q=rust"));
        print!("{user}: ");
        report(1, manager.evaluate(&search).await);
    }

    println!("\n=== GET /health has no policy ===");
    report(1, manager.evaluate(&SimpleRequest::new("GET", "/health")).await);

    Ok(())
}

fn report(attempt: u32, outcome: Outcome) {
    match outcome {
        Outcome::PassThrough => println!("#{attempt} passed through"),
        Outcome::Admit(Some(info)) => println!(
            "#{attempt} admitted, {}/{} left, resets in {}s",
            info.remaining,
            info.limit,
            info.reset_seconds()
        ),
        Outcome::Admit(None) => println!("#{attempt} admitted without accounting"),
        Outcome::Deny(rejection) => println!(
            "#{attempt} rejected with {}: {} ({})",
            rejection.status.as_u16(),
            rejection.body.code,
            rejection.body.message
        ),
    }
}
