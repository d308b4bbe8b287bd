//! Tower layer for rate limiting in Axum.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath},
    http::{HeaderName, HeaderValue, Request, Response, StatusCode, header, request::Parts},
};
use tower::{Layer, Service};
use tracing::warn;

use crate::algorithm::{Algorithm, FixedWindow};
use crate::decision::{DenyCause, Outcome, RateLimitInfo, Rejection, RejectionStatus};
use crate::key::{HasRoute, NoTokenVerifier, SimpleRequest, TokenVerifier, resolve_client_ip};
use crate::manager::RateLimitManager;
use crate::middleware::{DEFAULT_BODY_LIMIT, rejection_json};
use crate::storage::Storage;

/// Tower layer for rate limiting.
///
/// The route template comes from axum's [`MatchedPath`], so add the layer to the
/// router (`Router::layer` or `Router::route_layer`) rather than around it. The
/// client address comes from [`ConnectInfo<SocketAddr>`] unless a trusted proxy
/// header is configured.
pub struct RateLimitLayer<S, A = FixedWindow, V = NoTokenVerifier> {
    manager: Arc<RateLimitManager<S, A, V>>,
    client_ip_header: Option<Arc<str>>,
    body_limit: usize,
}

impl<S, A, V> RateLimitLayer<S, A, V> {
    /// Create a new rate limit layer over a shared manager.
    pub fn new(manager: Arc<RateLimitManager<S, A, V>>) -> Self {
        Self {
            manager,
            client_ip_header: None,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    /// Read the client address from this header (e.g. `x-forwarded-for`) before
    /// falling back to the peer address. Only use behind a proxy that sets it.
    pub fn with_client_ip_header(mut self, name: impl AsRef<str>) -> Self {
        self.client_ip_header = Some(Arc::from(name.as_ref().to_ascii_lowercase()));
        self
    }

    /// Largest body buffered for body-sourced policies.
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }
}

impl<S, A, V> Clone for RateLimitLayer<S, A, V> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            client_ip_header: self.client_ip_header.clone(),
            body_limit: self.body_limit,
        }
    }
}

impl<S, A, V, Inner> Layer<Inner> for RateLimitLayer<S, A, V> {
    type Service = RateLimitService<S, A, V, Inner>;

    fn layer(&self, inner: Inner) -> Self::Service {
        RateLimitService {
            inner,
            layer: self.clone(),
        }
    }
}

/// The rate limiting service.
pub struct RateLimitService<S, A, V, Inner> {
    inner: Inner,
    layer: RateLimitLayer<S, A, V>,
}

impl<S, A, V, Inner> Clone for RateLimitService<S, A, V, Inner>
where
    Inner: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            layer: self.layer.clone(),
        }
    }
}

/// Snapshot the parts of an axum request the manager reads.
fn snapshot(parts: &Parts, client_ip_header: Option<&str>) -> SimpleRequest {
    let route = parts
        .extensions
        .get::<MatchedPath>()
        .map(MatchedPath::as_str)
        .unwrap_or_else(|| parts.uri.path());

    let mut request = SimpleRequest::new(parts.method.as_str(), route);
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }
    if let Some(query) = parts.uri.query() {
        request = request.with_query(query);
    }

    let peer: Option<IpAddr> = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let forwarded = client_ip_header
        .and_then(|name| parts.headers.get(name))
        .and_then(|value| value.to_str().ok());
    if let Some(ip) = resolve_client_ip(forwarded, peer) {
        request = request.with_client_ip(ip);
    }

    request
}

impl<S, A, V, Inner> Service<Request<Body>> for RateLimitService<S, A, V, Inner>
where
    S: Storage,
    A: Algorithm,
    V: TokenVerifier,
    Inner: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    Inner::Future: Send,
{
    type Response = Response<Body>;
    type Error = Inner::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        // The clone may not be ready; keep the instance poll_ready was called on.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let layer = self.layer.clone();

        Box::pin(async move {
            let (parts, body) = request.into_parts();
            let mut snapshot = snapshot(&parts, layer.client_ip_header.as_deref());

            let body_policy = layer
                .manager
                .policy_for(parts.method.as_str(), snapshot.route())
                .filter(|policy| policy.source().needs_body());

            let body = match body_policy {
                Some(policy) => match axum::body::to_bytes(body, layer.body_limit).await {
                    Ok(bytes) => {
                        snapshot = snapshot.with_body(bytes.to_vec());
                        Body::from(bytes)
                    }
                    Err(error) => {
                        // The body is partly consumed, so there is nothing left to forward.
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
                        return Ok(rejection_response(&rejection));
                    }
                },
                None => body,
            };

            match layer.manager.evaluate(&snapshot).await {
                Outcome::PassThrough => inner.call(Request::from_parts(parts, body)).await,
                Outcome::Admit(info) => {
                    let response = inner.call(Request::from_parts(parts, body)).await?;
                    Ok(match info {
                        Some(info) => add_rate_limit_headers(response, &info),
                        None => response,
                    })
                }
                Outcome::Deny(rejection) => Ok(rejection_response(&rejection)),
            }
        })
    }
}

/// Add rate limit headers to a response.
fn add_rate_limit_headers(mut response: Response<Body>, info: &RateLimitInfo) -> Response<Body> {
    let headers = response.headers_mut();
    for (name, value) in info.to_headers() {
        // Header names are mixed-case; `from_bytes` normalizes them.
        let name = HeaderName::from_bytes(name.as_bytes());
        if let (Ok(name), Ok(value)) = (name, value.parse::<HeaderValue>()) {
            headers.insert(name, value);
        }
    }
    response
}

fn status_code(status: RejectionStatus) -> StatusCode {
    match status {
        RejectionStatus::BadRequest => StatusCode::BAD_REQUEST,
        RejectionStatus::Unauthorized => StatusCode::UNAUTHORIZED,
        RejectionStatus::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
    }
}

/// Render a rejection as a JSON response.
fn rejection_response(rejection: &Rejection) -> Response<Body> {
    let mut response = Response::new(Body::from(rejection_json(rejection)));
    *response.status_mut() = status_code(rejection.status);
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    match &rejection.info {
        Some(info) => add_rate_limit_headers(response, info),
        None => response,
    }
}
