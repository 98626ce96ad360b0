//! Pooled Redis database handle

use deadpool_redis::{Config as DeadpoolConfig, Pool, Runtime};
use datakit_common::{DataKitError, Result};

use crate::codec::{Codec, Compressor, JsonSerializer, NoopCompressor, Serializer};
use crate::collection::RedisCollection;
use crate::ttl::TimeToLive;

/// Connection settings for a `RedisDatabase`
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Server URL, e.g. "redis://localhost:6379"
    pub url: String,
    /// Logical database name, first segment of every key
    pub database_name: String,
    /// Redis database index, selected at connect time and part of every key
    pub database_index: u32,
    /// Connection pool size
    pub pool_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            database_name: "datakit".to_string(),
            database_index: 0,
            pool_size: 16,
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>, database_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database_name: database_name.into(),
            ..Default::default()
        }
    }

    pub fn database_index(mut self, index: u32) -> Self {
        self.database_index = index;
        self
    }

    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }
}

// Appends the database index as the URL path unless the caller already
// selected one.
fn connection_url(config: &RedisConfig) -> String {
    let (scheme, rest) = config
        .url
        .split_once("://")
        .unwrap_or(("redis", config.url.as_str()));
    if rest.contains('/') {
        config.url.clone()
    } else {
        format!("{}://{}/{}", scheme, rest, config.database_index)
    }
}

/// Handle to one logical Redis database
///
/// Owns a connection pool; `collection` hands out lightweight
/// `RedisCollection` views sharing it. Cheap to clone.
#[derive(Clone)]
pub struct RedisDatabase {
    config: RedisConfig,
    pool: Pool,
}

impl RedisDatabase {
    /// Build the pool and verify connectivity with a ping
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        let url = connection_url(&config);
        tracing::debug!(
            url = %url,
            database = %config.database_name,
            pool_size = config.pool_size,
            "connecting Redis pool"
        );

        let pool = DeadpoolConfig::from_url(&url)
            .builder()
            .map_err(|e| DataKitError::Connection(format!("Failed to create Redis pool: {}", e)))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| DataKitError::Connection(format!("Failed to build Redis pool: {}", e)))?;

        let database = Self { config, pool };
        database.ping().await?;
        tracing::info!(database = %database.config.database_name, "Redis pool ready");
        Ok(database)
    }

    /// Collection view with JSON encoding and no expiry
    pub fn collection(&self, name: &str) -> RedisCollection<JsonSerializer, NoopCompressor> {
        self.collection_with(name, Codec::json(), TimeToLive::None)
    }

    /// Collection view with JSON encoding and the given expiry policy
    pub fn collection_with_ttl(
        &self,
        name: &str,
        ttl: TimeToLive,
    ) -> RedisCollection<JsonSerializer, NoopCompressor> {
        self.collection_with(name, Codec::json(), ttl)
    }

    /// Collection view with a custom codec and expiry policy
    pub fn collection_with<S: Serializer, C: Compressor>(
        &self,
        name: &str,
        codec: Codec<S, C>,
        ttl: TimeToLive,
    ) -> RedisCollection<S, C> {
        RedisCollection::new(
            &self.config.database_name,
            self.config.database_index,
            name,
            self.pool.clone(),
            codec,
            ttl,
        )
    }

    /// Check connection health
    pub async fn ping(&self) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| DataKitError::Connection(format!("Ping failed: {}", e)))?;
        Ok(pong == "PONG")
    }

    /// Logical database name
    pub fn database_name(&self) -> &str {
        &self.config.database_name
    }
}
