//! Redis storage backend for distributed rate limiting.
//!
//! Uses connection pooling for high performance. The create-or-decrement step runs
//! as one Lua script sent with `EVAL`, so every instance sharing the Redis server
//! sees a single consistent counter per key.

use std::time::Duration;

use deadpool_redis::{
    Config, Connection, Pool, PoolConfig, Runtime,
    redis::{AsyncCommands, cmd},
};
use tracing::debug;

use crate::error::{ConnectionError, Result, StorageError};
use crate::storage::{CounterOutcome, CounterReply, Storage};

/// Create with expiry when absent, decrement when positive, otherwise leave alone.
///
/// KEYS[1] counter key, ARGV[1] initial remaining, ARGV[2] expiry in milliseconds.
/// Replies `{status, remaining, pttl}` where status is 0 created, 1 decremented,
/// 2 exhausted.
const ACQUIRE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
    return {0, tonumber(ARGV[1]), tonumber(ARGV[2])}
end

local remaining = tonumber(current)
if remaining == nil then
    return redis.error_reply('counter value is not an integer')
end

local pttl = redis.call('PTTL', KEYS[1])
if remaining > 0 then
    return {1, redis.call('DECR', KEYS[1]), pttl}
end
return {2, remaining, pttl}
"#;

/// Redis storage configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Connection pool size
    pub pool_size: usize,
    /// Key prefix for rate limit keys
    pub key_prefix: String,
    /// Connection timeout
    pub connection_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            key_prefix: "rl:".to_string(),
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// Create a new Redis configuration.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the pool size.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the timeout for checking out and opening connections.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }
}

/// Redis storage backend for distributed rate limiting.
///
/// # Example
///
/// ```ignore
/// use route_quota::storage::{RedisStorage, RedisConfig};
///
/// let config = RedisConfig::new("redis://localhost:6379")
///     .with_prefix("myapp:rl:")
///     .with_pool_size(20);
///
/// let storage = RedisStorage::new(config).await?;
/// ```
pub struct RedisStorage {
    pool: Pool,
    key_prefix: String,
}

impl std::fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorage")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisStorage {
    /// Create a new Redis storage from configuration.
    ///
    /// Fails if the server does not answer a `PING`.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let mut pool_config = PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = Some(config.connection_timeout);
        pool_config.timeouts.create = Some(config.connection_timeout);

        let mut cfg = Config::from_url(&config.url);
        cfg.pool = Some(pool_config);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        // Test connection
        let mut conn = pool
            .get()
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;
        let _: () = cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        debug!(url = %config.url, pool_size = config.pool_size, "connected to redis");

        Ok(Self {
            pool,
            key_prefix: config.key_prefix,
        })
    }

    /// Create a new Redis storage from a URL.
    pub async fn from_url(url: impl Into<String>) -> Result<Self> {
        Self::new(RedisConfig::new(url)).await
    }

    /// Get the full key with prefix.
    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Get a connection from the pool.
    async fn get_conn(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|_| StorageError::PoolExhausted.into())
    }
}

/// Turn the script's `{status, remaining, pttl}` triple into a reply.
fn parse_acquire_reply((status, remaining, pttl): (i64, i64, i64)) -> Result<CounterReply> {
    let outcome = match status {
        0 => CounterOutcome::Created,
        1 => CounterOutcome::Decremented,
        2 => CounterOutcome::Exhausted,
        other => {
            return Err(StorageError::UnexpectedReply(format!("acquire status {other}")).into());
        }
    };
    // PTTL answers -1 for a key without expiry.
    let expires_in = u64::try_from(pttl).ok().map(Duration::from_millis);

    Ok(CounterReply::new(outcome, remaining.max(0) as u64, expires_in))
}

impl Storage for RedisStorage {
    async fn acquire(&self, key: &str, initial: u64, ttl: Duration) -> Result<CounterReply> {
        let mut conn = self.get_conn().await?;
        let full_key = self.full_key(key);
        // PX rejects a zero expiry.
        let ttl_ms = (ttl.as_millis() as u64).max(1);

        let reply: (i64, i64, i64) = cmd("EVAL")
            .arg(ACQUIRE_SCRIPT)
            .arg(1)
            .arg(&full_key)
            .arg(initial)
            .arg(ttl_ms)
            .query_async(&mut *conn)
            .await
            .map_err(|e| StorageError::operation_failed(e.to_string()))?;

        parse_acquire_reply(reply)
    }

    async fn peek(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.get_conn().await?;
        let full_key = self.full_key(key);

        conn.get::<_, Option<i64>>(&full_key)
            .await
            .map_err(|e| StorageError::operation_failed(e.to_string()).into())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let full_key = self.full_key(key);

        conn.del::<_, ()>(&full_key)
            .await
            .map_err(|e| StorageError::operation_failed(e.to_string()))?;

        Ok(())
    }
}
