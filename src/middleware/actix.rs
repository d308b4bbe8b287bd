//! Actix-web middleware for rate limiting.
//!
//! Provides middleware for integrating rate limiting into Actix-web applications.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use actix_web::{web, App, HttpServer};
//! use route_quota::middleware::actix::RateLimiter;
//! use route_quota::{MemoryStorage, RateLimitManagerBuilder, RateLimiterConfig};
//!
//! #[actix_web::main]
//! async fn main() -> std::io::Result<()> {
//!     let config = RateLimiterConfig::from_file("limits.yaml").unwrap();
//!     let manager = Arc::new(
//!         RateLimitManagerBuilder::new()
//!             .registry(config.registry().unwrap())
//!             .build(MemoryStorage::new())
//!             .unwrap(),
//!     );
//!
//!     HttpServer::new(move || {
//!         App::new()
//!             .wrap(RateLimiter::new(manager.clone()))
//!             .route("/login", web::post().to(handler))
//!     })
//!     .bind("127.0.0.1:8080")?
//!     .run()
//!     .await
//! }
//! ```

use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use actix_service::{Service, Transform};
use actix_web::{
    Error, HttpResponse,
    body::EitherBody,
    dev::{ServiceRequest, ServiceResponse, forward_ready},
    http::{StatusCode, header},
    web::Bytes,
};
use tracing::warn;

use crate::algorithm::{Algorithm, FixedWindow};
use crate::decision::{DenyCause, Outcome, RateLimitInfo, Rejection, RejectionStatus};
use crate::key::{HasRoute, NoTokenVerifier, SimpleRequest, TokenVerifier, resolve_client_ip};
use crate::manager::RateLimitManager;
use crate::middleware::rejection_json;
use crate::storage::Storage;

/// Rate limiter middleware for Actix-web.
///
/// The route template is the resource pattern the request matches (`/users/{id}`).
/// The client address is the peer address unless a trusted proxy header is
/// configured. Bodies of body-sourced policies go through actix's `Bytes` extractor,
/// so its `PayloadConfig` limit applies.
pub struct RateLimiter<S, A = FixedWindow, V = NoTokenVerifier> {
    manager: Arc<RateLimitManager<S, A, V>>,
    client_ip_header: Option<Rc<str>>,
}

impl<S, A, V> RateLimiter<S, A, V> {
    /// Create a new rate limiter middleware over a shared manager.
    pub fn new(manager: Arc<RateLimitManager<S, A, V>>) -> Self {
        Self {
            manager,
            client_ip_header: None,
        }
    }

    /// Read the client address from this header (e.g. `x-forwarded-for`) before
    /// falling back to the peer address. Only use behind a proxy that sets it.
    pub fn with_client_ip_header(mut self, name: impl AsRef<str>) -> Self {
        self.client_ip_header = Some(Rc::from(name.as_ref().to_ascii_lowercase()));
        self
    }
}

impl<S, A, V> Clone for RateLimiter<S, A, V> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            client_ip_header: self.client_ip_header.clone(),
        }
    }
}

impl<S, A, V, Svc, B> Transform<Svc, ServiceRequest> for RateLimiter<S, A, V>
where
    S: Storage,
    A: Algorithm,
    V: TokenVerifier,
    Svc: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    Svc::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimiterMiddleware<S, A, V, Svc>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: Svc) -> Self::Future {
        ready(Ok(RateLimiterMiddleware {
            service: Rc::new(service),
            limiter: self.clone(),
        }))
    }
}

/// The actual middleware service.
pub struct RateLimiterMiddleware<S, A, V, Svc> {
    service: Rc<Svc>,
    limiter: RateLimiter<S, A, V>,
}

/// Snapshot the parts of an actix request the manager reads.
fn snapshot(req: &ServiceRequest, client_ip_header: Option<&str>) -> SimpleRequest {
    let route = req.match_pattern().unwrap_or_else(|| req.path().to_string());

    let mut request = SimpleRequest::new(req.method().as_str(), route);
    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }
    request = request.with_query(req.query_string());

    let forwarded = client_ip_header
        .and_then(|name| req.headers().get(name))
        .and_then(|value| value.to_str().ok());
    if let Some(ip) = resolve_client_ip(forwarded, req.peer_addr().map(|addr| addr.ip())) {
        request = request.with_client_ip(ip);
    }

    request
}

/// Put already-read bytes back so the handler can extract the body again.
fn replay_payload(req: &mut ServiceRequest, bytes: Bytes) {
    let (_, mut payload) = actix_http::h1::Payload::create(true);
    payload.unread_data(bytes);
    req.set_payload(payload.into());
}

impl<S, A, V, Svc, B> Service<ServiceRequest> for RateLimiterMiddleware<S, A, V, Svc>
where
    S: Storage,
    A: Algorithm,
    V: TokenVerifier,
    Svc: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    Svc::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let limiter = self.limiter.clone();

        Box::pin(async move {
            let mut request = snapshot(&req, limiter.client_ip_header.as_deref());

            let body_policy = limiter
                .manager
                .policy_for(req.method().as_str(), request.route())
                .filter(|policy| policy.source().needs_body());

            if let Some(policy) = body_policy {
                let bytes = match req.extract::<Bytes>().await {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        warn!(
                            policy_id = policy.id(),
                            error = %error,
                            "could not buffer request body for rate limiting"
                        );
                        let rejection = policy.reject(
                            RejectionStatus::BadRequest,
                            DenyCause::ExtractionFailed,
                            None,
                        );
                        let response = rejection_response(&rejection);
                        return Ok(req.into_response(response).map_into_right_body());
                    }
                };
                request = request.with_body(bytes.to_vec());
                replay_payload(&mut req, bytes);
            }

            match limiter.manager.evaluate(&request).await {
                Outcome::PassThrough => Ok(service.call(req).await?.map_into_left_body()),
                Outcome::Admit(info) => {
                    let mut response = service.call(req).await?;
                    if let Some(info) = info {
                        add_rate_limit_headers(response.headers_mut(), &info);
                    }
                    Ok(response.map_into_left_body())
                }
                Outcome::Deny(rejection) => {
                    let response = rejection_response(&rejection);
                    Ok(req.into_response(response).map_into_right_body())
                }
            }
        })
    }
}

fn add_rate_limit_headers(headers: &mut header::HeaderMap, info: &RateLimitInfo) {
    for (name, value) in info.to_headers() {
        let name = header::HeaderName::from_bytes(name.as_bytes());
        if let (Ok(name), Ok(value)) = (name, header::HeaderValue::from_str(&value)) {
            headers.insert(name, value);
        }
    }
}

fn status_code(status: RejectionStatus) -> StatusCode {
    match status {
        RejectionStatus::BadRequest => StatusCode::BAD_REQUEST,
        RejectionStatus::Unauthorized => StatusCode::UNAUTHORIZED,
        RejectionStatus::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
    }
}

/// Render a rejection as a JSON response.
fn rejection_response(rejection: &Rejection) -> HttpResponse {
    let mut response = HttpResponse::build(status_code(rejection.status))
        .insert_header((header::CONTENT_TYPE, "application/json"))
        .body(rejection_json(rejection));

    if let Some(info) = &rejection.info {
        add_rate_limit_headers(response.headers_mut(), info);
    }
    response
}
