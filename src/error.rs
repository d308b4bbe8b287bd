//! Error types for rate limiting operations.
//!
//! Only policy configuration errors ever escape to callers, and only at startup.
//! Storage and extraction errors are folded into an allow/deny outcome by the
//! [`RateLimitManager`](crate::RateLimitManager) according to each policy's
//! `allow_on_failure` flag.

use std::time::Duration;
use thiserror::Error;

use crate::decision::RejectionStatus;

/// Result type for rate limiting operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Main error type for rate limiting operations.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Key extraction error.
    #[error("Key extraction failed: {0}")]
    KeyExtraction(#[from] ExtractionError),

    /// Connection error (e.g., Redis connection failed or timed out).
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}

/// Storage-related errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Generic storage operation failed.
    #[error("{0}")]
    OperationFailed(String),

    /// The store answered with something the counter protocol does not allow.
    #[error("Unexpected reply from store: {0}")]
    UnexpectedReply(String),

    /// Connection pool exhausted.
    #[error("Connection pool exhausted")]
    PoolExhausted,
}

impl StorageError {
    /// Create a new operation failed error.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        Self::OperationFailed(message.into())
    }
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A policy definition failed validation.
    #[error("invalid policy #{index} ({route}): {message}")]
    InvalidPolicy {
        /// Position of the definition in the configured list.
        index: usize,
        /// `METHOD path` of the offending definition.
        route: String,
        /// Human-readable reason.
        message: String,
    },

    /// The configuration document could not be read or parsed.
    #[error("failed to load configuration: {0}")]
    Load(String),
}

/// Connection-related errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Failed to connect.
    #[error("Failed to connect: {0}")]
    ConnectionFailed(String),

    /// A store call did not finish within the configured deadline.
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),
}

/// Reasons an identity key could not be derived from a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    /// The request body is not a JSON object.
    #[error("request body is not a JSON object: {0}")]
    MalformedBody(String),

    /// The body field is absent or not a string.
    #[error("body field `{0}` is missing or not a string")]
    MissingBodyField(String),

    /// The request carries no credential.
    #[error("request carries no credential")]
    MissingCredential,

    /// The token verifier refused the credential.
    #[error("token rejected: {0}")]
    TokenRejected(String),

    /// The claim is absent or not a string.
    #[error("claim `{0}` is missing or not a string")]
    MissingClaim(String),
}

impl ExtractionError {
    /// Status used when a fail-closed policy rejects on this error.
    pub fn status(&self) -> RejectionStatus {
        match self {
            Self::MalformedBody(_) => RejectionStatus::BadRequest,
            _ => RejectionStatus::Unauthorized,
        }
    }
}
