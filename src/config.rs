//! Configuration loading.
//!
//! A service usually describes its limits in one YAML document:
//!
//! ```yaml
//! redis_url: redis://cache:6379
//! key_prefix: "api:rl:"
//! jwt_secret: change-me
//! store_timeout_ms: 50
//! policies:
//!   - method: POST
//!     path: /login
//!     limit: 3
//!     interval: minute
//!     type: ip
//!     not_allow_code: TOO_MANY_ATTEMPTS
//!     not_allow_msg: Try again in a minute
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::policy::PolicyDefinition;
use crate::registry::PolicyRegistry;

/// Rate limiter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Counter store URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Counter store connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub redis_pool_size: usize,

    /// Prefix for every counter key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Shared secret for verifying bearer tokens. Claim-sourced policies reject every
    /// request when unset.
    #[serde(default, alias = "jwt_sign_in_key")]
    pub jwt_secret: Option<String>,

    /// Deadline for one counter store call, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Route policies, in order. A policy's position is its id.
    #[serde(default, alias = "leaky_buckets")]
    pub policies: Vec<PolicyDefinition>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            redis_pool_size: default_redis_pool_size(),
            key_prefix: default_key_prefix(),
            jwt_secret: None,
            store_timeout_ms: default_store_timeout_ms(),
            policies: Vec::new(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_key_prefix() -> String {
    "rl:".to_string()
}

fn default_store_timeout_ms() -> u64 {
    100
}

impl RateLimiterConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML document.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: RateLimiterConfig =
            serde_yaml::from_str(contents).map_err(|e| ConfigError::Load(e.to_string()))?;
        Ok(config)
    }

    /// Validate and compile the policies.
    pub fn registry(&self) -> Result<PolicyRegistry> {
        PolicyRegistry::from_definitions(self.policies.iter().cloned())
    }

    /// Store call deadline.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Verifier for the configured secret, if any.
    #[cfg(feature = "jwt")]
    pub fn jwt_verifier(&self) -> Option<crate::key::JwtVerifier> {
        self.jwt_secret.as_deref().map(crate::key::JwtVerifier::new)
    }

    /// Redis backend settings.
    #[cfg(feature = "redis")]
    pub fn redis_config(&self) -> crate::storage::RedisConfig {
        crate::storage::RedisConfig::new(&self.redis_url)
            .with_prefix(&self.key_prefix)
            .with_pool_size(self.redis_pool_size)
    }
}
