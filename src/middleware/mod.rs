//! Framework middleware for rate limiting.
//!
//! Both adapters snapshot the request into a [`SimpleRequest`](crate::key::SimpleRequest),
//! ask the shared [`RateLimitManager`](crate::RateLimitManager) for an
//! [`Outcome`](crate::Outcome) and map it back onto the framework:
//!
//! - `PassThrough`: call the handler untouched
//! - `Admit`: call the handler, with the body replayed if it was buffered, and add
//!   rate limit headers when the counter was consulted
//! - `Deny`: answer with the policy's `{"code", "message"}` JSON body
//!
//! The body is only buffered for routes whose policy reads an identity from it.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use axum::{Router, routing::post};
//! use route_quota::middleware::RateLimitLayer;
//! use route_quota::{MemoryStorage, PolicyDefinition, RateLimitManagerBuilder};
//!
//! let manager = RateLimitManagerBuilder::new()
//!     .policies(vec![PolicyDefinition::new("POST", "/login", 3, "minute", "ip")])
//!     .build(MemoryStorage::new())?;
//!
//! let app = Router::new()
//!     .route("/login", post(handler))
//!     .layer(RateLimitLayer::new(Arc::new(manager)));
//! ```

#[cfg(feature = "axum")]
mod layer;

#[cfg(feature = "actix")]
pub mod actix;

#[cfg(feature = "axum")]
pub use layer::{RateLimitLayer, RateLimitService};

use crate::decision::Rejection;

/// Body size limit applied when a policy needs the request body.
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Serialize a rejection's `{"code", "message"}` body.
pub(crate) fn rejection_json(rejection: &Rejection) -> Vec<u8> {
    serde_json::to_vec(&rejection.body).unwrap_or_default()
}
