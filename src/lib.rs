//! Per-route HTTP admission control with fixed-window quotas.
//!
//! `route_quota` decides, for each inbound request, whether it may proceed:
//!
//! - **Route Policies**: a limit, a window and an identity source per `METHOD /route`
//! - **Fixed Windows**: wall-clock aligned second, minute or hour buckets
//! - **Identity Sources**: client IP, header, query parameter, JSON body field or
//!   verified token claim
//! - **Shared Counters**: Redis for consistency across instances, in-memory for one
//! - **Failure Policy**: per-route fail-open or fail-closed on store and extraction
//!   failures
//! - **Framework Integration**: Axum and Actix-web middleware
//!
//! # Quick Start
//!
//! ```ignore
//! use route_quota::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> route_quota::Result<()> {
//!     let manager = RateLimitManagerBuilder::new()
//!         .policies(vec![
//!             PolicyDefinition::new("POST", "/login", 3, "minute", "ip")
//!                 .with_rejection("TOO_MANY_ATTEMPTS", "Try again in a minute"),
//!         ])
//!         .build(MemoryStorage::new())?;
//!
//!     let request = SimpleRequest::new("POST", "/login")
//!         .with_client_ip("203.0.113.7".parse().unwrap());
//!
//!     match manager.evaluate(&request).await {
//!         Outcome::PassThrough | Outcome::Admit(_) => println!("proceed"),
//!         Outcome::Deny(rejection) => {
//!             println!("{}: {}", rejection.body.code, rejection.body.message)
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - `memory` (default): In-memory storage with garbage collection
//! - `jwt` (default): HMAC JWT verification for claim-sourced policies
//! - `redis`: Redis storage backend
//! - `axum`: Axum middleware integration
//! - `actix`: Actix-web middleware integration

pub mod algorithm;
pub mod config;
pub mod decision;
pub mod error;
pub mod headers;
pub mod key;
pub mod manager;
pub mod policy;
pub mod quota;
pub mod registry;
pub mod storage;

#[cfg(any(feature = "axum", feature = "actix"))]
pub mod middleware;

// Re-export main types
pub use algorithm::{Algorithm, FixedWindow};
pub use config::RateLimiterConfig;
pub use decision::{
    Decision, DenyCause, Outcome, RateLimitInfo, Rejection, RejectionBody, RejectionStatus,
};
pub use error::{
    ConfigError, ConnectionError, ExtractionError, RateLimitError, Result, StorageError,
};
pub use key::{FnVerifier, KeySource, NoTokenVerifier, RequestInfo, SimpleRequest, TokenVerifier};
pub use manager::{RateLimitManager, RateLimitManagerBuilder};
pub use policy::{Method, Policy, PolicyDefinition};
pub use quota::{Quota, Window};
pub use registry::{PolicyRegistry, routing_signature};
pub use storage::{CounterOutcome, CounterReply, Storage};

pub use headers::RateLimitHeaders;

#[cfg(feature = "jwt")]
pub use key::JwtVerifier;

// Re-export storage types
#[cfg(feature = "memory")]
pub use storage::{GcConfig, GcInterval, MemoryStorage};

#[cfg(feature = "redis")]
pub use storage::{RedisConfig, RedisStorage};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::decision::{Outcome, RateLimitInfo, Rejection};
    pub use crate::error::{RateLimitError, Result};
    pub use crate::key::{RequestInfo, SimpleRequest, TokenVerifier};
    pub use crate::manager::{RateLimitManager, RateLimitManagerBuilder};
    pub use crate::policy::PolicyDefinition;
    pub use crate::registry::PolicyRegistry;
    pub use crate::storage::Storage;
    pub use crate::RateLimiterConfig;

    #[cfg(feature = "jwt")]
    pub use crate::key::JwtVerifier;

    #[cfg(feature = "memory")]
    pub use crate::storage::{GcConfig, GcInterval, MemoryStorage};
}
