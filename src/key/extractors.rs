//! Request abstraction used for identity extraction.
//!
//! The manager never sees framework types. Anything implementing the small `Has*`
//! traits below (and therefore [`RequestInfo`]) can be evaluated; [`SimpleRequest`]
//! is an owned implementation the bundled middleware builds from each request.

use std::collections::HashMap;
use std::net::IpAddr;

// ============================================================================
// Request Info Traits
// ============================================================================

/// Trait for requests that have an IP address.
pub trait HasIpAddr {
    /// Get the client IP address, after any trusted-proxy resolution.
    fn client_ip(&self) -> Option<IpAddr>;
}

/// Trait for requests that were matched against a route template.
pub trait HasRoute {
    /// The matched route template (e.g. `/users/{id}`), not the concrete path.
    fn route(&self) -> &str;
}

/// Trait for requests that have a method.
pub trait HasMethod {
    /// Get the request method (GET, POST, etc).
    fn method(&self) -> &str;
}

/// Trait for requests that have headers.
pub trait HasHeaders {
    /// Get a header value by name. Lookups are case-insensitive.
    fn header(&self, name: &str) -> Option<&str>;

    /// The credential handed to the token verifier: the `Authorization` header with
    /// an optional `Bearer ` prefix removed.
    fn credential(&self) -> Option<&str> {
        let value = self.header("authorization")?.trim();
        let token = match value.split_once(' ') {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
            _ if value.eq_ignore_ascii_case("bearer") => "",
            _ => value,
        };
        (!token.is_empty()).then_some(token)
    }
}

/// Trait for requests that have query parameters.
pub trait HasQuery {
    /// Get the first value of a query parameter.
    fn query_param(&self, name: &str) -> Option<&str>;
}

/// Trait for requests that may carry a buffered body.
pub trait HasBody {
    /// The raw body, if it was buffered.
    fn body(&self) -> Option<&[u8]>;
}

/// Everything the manager needs from a request.
pub trait RequestInfo: HasMethod + HasRoute + HasHeaders + HasQuery + HasBody + HasIpAddr + Sync {}

impl<T> RequestInfo for T where
    T: HasMethod + HasRoute + HasHeaders + HasQuery + HasBody + HasIpAddr + Sync
{
}

// ============================================================================
// Owned request snapshot
// ============================================================================

/// An owned, framework-neutral request snapshot.
///
/// Header names are stored lower-cased. For repeated headers and query parameters
/// the first value wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimpleRequest {
    method: String,
    route: String,
    headers: HashMap<String, String>,
    query: HashMap<String, String>,
    body: Option<Vec<u8>>,
    client_ip: Option<IpAddr>,
}

impl SimpleRequest {
    /// Create a request for a method and matched route template.
    pub fn new(method: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            route: route.into(),
            ..Default::default()
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.as_ref().to_ascii_lowercase())
            .or_insert_with(|| value.into());
        self
    }

    /// Add every parameter of a raw query string (`a=1&b=two`), percent-decoded.
    pub fn with_query(mut self, raw: &str) -> Self {
        for (name, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            self.query
                .entry(name.into_owned())
                .or_insert_with(|| value.into_owned());
        }
        self
    }

    /// Attach a buffered body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the resolved client address.
    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }
}

impl HasMethod for SimpleRequest {
    fn method(&self) -> &str {
        &self.method
    }
}

impl HasRoute for SimpleRequest {
    fn route(&self) -> &str {
        &self.route
    }
}

impl HasHeaders for SimpleRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

impl HasQuery for SimpleRequest {
    fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

impl HasBody for SimpleRequest {
    fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }
}

impl HasIpAddr for SimpleRequest {
    fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }
}

/// Resolve the client address from a trusted proxy header, falling back to the peer.
///
/// For list-valued headers such as `X-Forwarded-For` the first (client-most) entry is
/// used.
pub fn resolve_client_ip(header_value: Option<&str>, peer: Option<IpAddr>) -> Option<IpAddr> {
    header_value
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .or(peer)
}
