//! Route policies.
//!
//! A [`PolicyDefinition`] is the raw, deserialized form of one configured route limit.
//! It is compiled into an immutable [`Policy`] at startup; a definition that fails
//! [`PolicyDefinition::validate`] never becomes a policy.
//!
//! # Example
//!
//! ```ignore
//! use route_quota::policy::{Policy, PolicyDefinition};
//!
//! let definition = PolicyDefinition::new("POST", "/login", 3, "minute", "ip");
//! let policy = Policy::from_definition(0, definition)?;
//! assert_eq!(policy.quota().max_requests(), 3);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::decision::{DenyCause, RateLimitInfo, Rejection, RejectionBody, RejectionStatus};
use crate::error::{ConfigError, Result};
use crate::key::KeySource;
use crate::quota::{Quota, Window};

/// HTTP methods a policy may be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `DELETE`
    Delete,
}

impl Method {
    /// Upper-case method name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            _ => Err("method must be one of GET, POST, PUT, DELETE".to_string()),
        }
    }
}

/// Raw policy definition, as found in configuration.
///
/// Field names on the wire follow the configuration format (`interval`, `type`,
/// `key_field`, `not_allow_msg`, `not_allow_code`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDefinition {
    /// HTTP method.
    pub method: String,
    /// Route template, e.g. `/users/{id}`.
    pub path: String,
    /// Maximum admitted requests per window.
    pub limit: i64,
    /// `second`, `minute` or `hour`.
    #[serde(rename = "interval")]
    pub window: String,
    /// `ip`, `header`, `query`, `body` or `jwt`.
    #[serde(rename = "type")]
    pub source: String,
    /// Header, query parameter, body field or claim to read.
    #[serde(rename = "key_field", default)]
    pub field: String,
    /// Admit when the store or extraction fails.
    #[serde(default)]
    pub allow_on_failure: bool,
    /// Message returned on rejection.
    #[serde(rename = "not_allow_msg", default)]
    pub rejection_message: String,
    /// Code returned on rejection.
    #[serde(rename = "not_allow_code", default)]
    pub rejection_code: String,
}

impl PolicyDefinition {
    /// Create a definition with an empty field, fail-closed behavior and no rejection text.
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        limit: i64,
        window: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            limit,
            window: window.into(),
            source: source.into(),
            field: String::new(),
            allow_on_failure: false,
            rejection_message: String::new(),
            rejection_code: String::new(),
        }
    }

    /// Set the field the identity is read from.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    /// Admit requests when the store or extraction fails.
    pub fn allow_on_failure(mut self, allow: bool) -> Self {
        self.allow_on_failure = allow;
        self
    }

    /// Set the rejection code and message.
    pub fn with_rejection(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.rejection_code = code.into();
        self.rejection_message = message.into();
        self
    }

    /// `METHOD path`, used in logs and errors.
    pub fn route(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    /// Check the definition, returning a human-readable reason on failure.
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.compile().map(|_| ())
    }

    fn compile(&self) -> std::result::Result<(Method, Quota, KeySource), String> {
        let method = self.method.parse::<Method>()?;
        if self.limit < 1 {
            return Err("limit must be greater than 0".to_string());
        }
        let window = self.window.parse::<Window>()?;
        let source = KeySource::parse(&self.source, &self.field)?;
        Ok((method, Quota::new(self.limit as u64, window), source))
    }
}

/// A validated, immutable route policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    id: usize,
    method: Method,
    path: String,
    quota: Quota,
    source: KeySource,
    allow_on_failure: bool,
    rejection: RejectionBody,
}

impl Policy {
    /// Compile a definition. `id` is the definition's position in the configured list
    /// and becomes part of every counter key for this policy.
    pub fn from_definition(id: usize, definition: PolicyDefinition) -> Result<Self> {
        let (method, quota, source) =
            definition
                .compile()
                .map_err(|message| ConfigError::InvalidPolicy {
                    index: id,
                    route: definition.route(),
                    message,
                })?;

        Ok(Self {
            id,
            method,
            path: definition.path,
            quota,
            source,
            allow_on_failure: definition.allow_on_failure,
            rejection: RejectionBody {
                code: definition.rejection_code,
                message: definition.rejection_message,
            },
        })
    }

    /// Position of the definition this policy was compiled from.
    pub fn id(&self) -> usize {
        self.id
    }

    /// HTTP method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Route template.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Limit and window.
    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    /// Where the identity key comes from.
    pub fn source(&self) -> &KeySource {
        &self.source
    }

    /// Whether failures admit the request.
    pub fn allows_on_failure(&self) -> bool {
        self.allow_on_failure
    }

    /// Configured rejection code and message.
    pub fn rejection_body(&self) -> &RejectionBody {
        &self.rejection
    }

    /// Build the rejection returned to the caller.
    pub fn reject(
        &self,
        status: RejectionStatus,
        cause: DenyCause,
        info: Option<RateLimitInfo>,
    ) -> Rejection {
        Rejection {
            status,
            body: self.rejection.clone(),
            cause,
            info,
        }
    }
}
