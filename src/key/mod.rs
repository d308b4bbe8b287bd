//! Identity extraction for rate limiting.
//!
//! The identity key determines which requests share a quota. Each policy names one
//! [`KeySource`]; the manager dispatches on it to read the key from the request:
//!
//! - `ip`: the resolved client address
//! - `header` / `query`: a named header or query parameter (empty when absent)
//! - `body`: a string field of a JSON object body
//! - `jwt`: a string claim of a verified token
//!
//! # Example
//!
//! ```ignore
//! use route_quota::key::{KeySource, NoTokenVerifier, SimpleRequest};
//!
//! let request = SimpleRequest::new("GET", "/search").with_query("user=42");
//! let source = KeySource::Query("user".into());
//! assert_eq!(source.extract(&request, &NoTokenVerifier).await?, "42");
//! ```

mod extractors;
mod token;

pub use extractors::*;
pub use token::{Claims, FnVerifier, NoTokenVerifier, TokenVerifier};

#[cfg(feature = "jwt")]
pub use token::JwtVerifier;

use serde_json::Value;

use crate::error::ExtractionError;

/// Key used when the framework could not resolve a client address.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Where a policy reads its identity key from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeySource {
    /// The client address.
    Ip,
    /// A request header.
    Header(String),
    /// A query parameter.
    Query(String),
    /// A string field of a JSON object body.
    Body(String),
    /// A string claim of a verified token.
    Claim(String),
}

impl KeySource {
    /// Parse a configured source type and field.
    ///
    /// The field is ignored for `ip`.
    pub fn parse(source: &str, field: &str) -> Result<Self, String> {
        let field = field.to_string();
        match source {
            "ip" => Ok(Self::Ip),
            "header" => Ok(Self::Header(field)),
            "query" => Ok(Self::Query(field)),
            "body" => Ok(Self::Body(field)),
            "jwt" => Ok(Self::Claim(field)),
            _ => Err("type must be one of ip, header, query, body, jwt".to_string()),
        }
    }

    /// Get the source name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Header(_) => "header",
            Self::Query(_) => "query",
            Self::Body(_) => "body",
            Self::Claim(_) => "jwt",
        }
    }

    /// Whether extraction reads the request body. Middleware only buffers the body
    /// for these sources.
    pub fn needs_body(&self) -> bool {
        matches!(self, Self::Body(_))
    }

    /// Extract the identity key from a request.
    ///
    /// Only body and claim sources can fail; a missing header or query parameter
    /// yields an empty key.
    pub async fn extract<R, V>(&self, request: &R, verifier: &V) -> Result<String, ExtractionError>
    where
        R: RequestInfo,
        V: TokenVerifier,
    {
        match self {
            Self::Ip => Ok(request
                .client_ip()
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())),
            Self::Header(name) => Ok(request.header(name).unwrap_or_default().to_string()),
            Self::Query(name) => Ok(request.query_param(name).unwrap_or_default().to_string()),
            Self::Body(field) => {
                let object: serde_json::Map<String, Value> =
                    serde_json::from_slice(request.body().unwrap_or_default())
                        .map_err(|e| ExtractionError::MalformedBody(e.to_string()))?;
                string_field(&object, field)
                    .ok_or_else(|| ExtractionError::MissingBodyField(field.clone()))
            }
            Self::Claim(claim) => {
                let credential = request
                    .credential()
                    .ok_or(ExtractionError::MissingCredential)?;
                let claims = verifier.verify(credential).await?;
                string_field(&claims, claim)
                    .ok_or_else(|| ExtractionError::MissingClaim(claim.clone()))
            }
        }
    }
}

fn string_field(object: &serde_json::Map<String, Value>, field: &str) -> Option<String> {
    object.get(field).and_then(Value::as_str).map(str::to_owned)
}
