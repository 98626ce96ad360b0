//! Keyed collection view over a Redis database
//!
//! Entries live under `{database}({index}).{collection}[{id}]`. Uniqueness
//! depends on caller-supplied ids being unique within the collection.

use std::time::Duration;

use datakit_common::{DataKitError, Result};
use deadpool_redis::{Connection, Pool};
use redis::{AsyncCommands, ExistenceCheck, SetExpiry, SetOptions};

use crate::codec::{Codec, Compressor, JsonSerializer, NoopCompressor, Serializer};
use crate::ttl::TimeToLive;
use crate::value::StoreValue;

fn collection_prefix(database: &str, index: u32, collection: &str) -> String {
    format!("{}({}).{}", database, index, collection)
}

fn entry_key(prefix: &str, id: &str) -> String {
    format!("{}[{}]", prefix, id)
}

fn warn_err<'a>(key: &'a str, op: &'a str) -> impl FnOnce(redis::RedisError) -> DataKitError + 'a {
    move |e| {
        tracing::warn!(key = %key, op = op, error = %e, "redis operation failed");
        DataKitError::from(e)
    }
}

/// Per-id cache operations for one collection
///
/// Shares the pool of the `RedisDatabase` that created it; cheap to clone.
/// Writes use three existence preconditions: `create` (only if absent),
/// `replace` (only if present), `create_or_update` (unconditional). Key
/// absence is reported as `Ok(None)` / `Ok(false)`; I/O and coding failures
/// propagate as errors.
#[derive(Clone)]
pub struct RedisCollection<S = JsonSerializer, C = NoopCompressor> {
    prefix: String,
    name: String,
    pool: Pool,
    codec: Codec<S, C>,
    ttl: TimeToLive,
}

impl<S: Serializer, C: Compressor> RedisCollection<S, C> {
    pub(crate) fn new(
        database: &str,
        index: u32,
        name: &str,
        pool: Pool,
        codec: Codec<S, C>,
        ttl: TimeToLive,
    ) -> Self {
        Self {
            prefix: collection_prefix(database, index, name),
            name: name.to_string(),
            pool,
            codec,
            ttl,
        }
    }

    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Expiry policy applied by this view
    pub fn ttl(&self) -> TimeToLive {
        self.ttl
    }

    fn key(&self, id: &str) -> String {
        entry_key(&self.prefix, id)
    }

    async fn conn(&self) -> Result<Connection> {
        Ok(self.pool.get().await?)
    }

    // SET options for this view's expiry policy, plus an optional
    // existence precondition.
    fn write_options(&self, check: Option<ExistenceCheck>) -> SetOptions {
        let mut options = SetOptions::default();
        if let Some(check) = check {
            options = options.conditional_set(check);
        }
        if let Some(expiry) = self.ttl.expiry() {
            options = options.with_expiration(SetExpiry::PX(expiry.as_millis() as u64));
        }
        options
    }

    /// Read one entry; `Ok(None)` when absent
    ///
    /// A hit under a sliding TTL refreshes the entry's expiry.
    pub async fn get<T: StoreValue>(&self, id: &str) -> Result<Option<T>> {
        let key = self.key(id);
        let mut conn = self.conn().await?;

        let payload: Option<Vec<u8>> = conn.get(&key).await.map_err(warn_err(&key, "GET"))?;
        let Some(payload) = payload else {
            return Ok(None);
        };

        if let TimeToLive::Sliding(window) = self.ttl {
            let _: bool = conn
                .pexpire(&key, window.as_millis() as i64)
                .await
                .map_err(warn_err(&key, "PEXPIRE"))?;
        }

        T::from_payload(&self.codec, &payload).map(Some)
    }

    /// Write only if the id does not exist yet
    ///
    /// Returns `Ok(false)` without overwriting when the key is present.
    pub async fn create<T: StoreValue>(&self, id: &str, value: &T) -> Result<bool> {
        let payload = value.to_payload(&self.codec)?;
        let key = self.key(id);
        let mut conn = self.conn().await?;

        let reply: Option<String> = conn
            .set_options(&key, payload, self.write_options(Some(ExistenceCheck::NX)))
            .await
            .map_err(warn_err(&key, "SET NX"))?;
        let created = reply.is_some();
        tracing::debug!(key = %key, created, "create");
        Ok(created)
    }

    /// Write only if the id already exists
    ///
    /// Returns `Ok(false)` without creating when the key is absent.
    pub async fn replace<T: StoreValue>(&self, id: &str, value: &T) -> Result<bool> {
        let payload = value.to_payload(&self.codec)?;
        let key = self.key(id);
        let mut conn = self.conn().await?;

        let reply: Option<String> = conn
            .set_options(&key, payload, self.write_options(Some(ExistenceCheck::XX)))
            .await
            .map_err(warn_err(&key, "SET XX"))?;
        let replaced = reply.is_some();
        tracing::debug!(key = %key, replaced, "replace");
        Ok(replaced)
    }

    /// Unconditional write
    pub async fn create_or_update<T: StoreValue>(&self, id: &str, value: &T) -> Result<()> {
        let payload = value.to_payload(&self.codec)?;
        let key = self.key(id);
        let mut conn = self.conn().await?;

        let _: Option<String> = conn
            .set_options(&key, payload, self.write_options(None))
            .await
            .map_err(warn_err(&key, "SET"))?;
        tracing::debug!(key = %key, "create_or_update");
        Ok(())
    }

    /// Delete one entry; `Ok(false)` when it was not present
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let key = self.key(id);
        let mut conn = self.conn().await?;

        let removed: u64 = conn.del(&key).await.map_err(warn_err(&key, "DEL"))?;
        tracing::debug!(key = %key, removed = removed > 0, "remove");
        Ok(removed > 0)
    }

    /// Atomically add `delta`, returning the new value
    ///
    /// The entry must hold an integer in its text form (the default for
    /// integer `StoreValue`s); a missing entry starts from zero.
    pub async fn increment(&self, id: &str, delta: i64) -> Result<i64> {
        let key = self.key(id);
        let mut conn = self.conn().await?;

        let value: i64 = conn
            .incr(&key, delta)
            .await
            .map_err(warn_err(&key, "INCRBY"))?;
        self.touch_expiry(&mut conn, &key).await?;
        Ok(value)
    }

    /// Atomically subtract `delta`, returning the new value
    pub async fn decrement(&self, id: &str, delta: i64) -> Result<i64> {
        let key = self.key(id);
        let mut conn = self.conn().await?;

        let value: i64 = conn
            .decr(&key, delta)
            .await
            .map_err(warn_err(&key, "DECRBY"))?;
        self.touch_expiry(&mut conn, &key).await?;
        Ok(value)
    }

    // INCR/DECR write through SET-less paths, so the view's expiry has to
    // be applied separately.
    async fn touch_expiry(&self, conn: &mut Connection, key: &str) -> Result<()> {
        if let Some(expiry) = self.ttl.expiry() {
            let _: bool = conn
                .pexpire(key, expiry.as_millis() as i64)
                .await
                .map_err(warn_err(key, "PEXPIRE"))?;
        }
        Ok(())
    }

    /// Override the expiry of one entry
    ///
    /// `TimeToLive::None` makes the entry persistent. Returns `Ok(false)`
    /// when the key is absent.
    pub async fn expire(&self, id: &str, ttl: TimeToLive) -> Result<bool> {
        let key = self.key(id);
        let mut conn = self.conn().await?;

        let applied: bool = match ttl.expiry() {
            Some(expiry) => conn
                .pexpire(&key, expiry.as_millis() as i64)
                .await
                .map_err(warn_err(&key, "PEXPIRE"))?,
            None => conn.persist(&key).await.map_err(warn_err(&key, "PERSIST"))?,
        };
        tracing::debug!(key = %key, applied, "expire");
        Ok(applied)
    }

    /// Remaining lifetime; `Ok(None)` when absent or persistent
    pub async fn time_to_live(&self, id: &str) -> Result<Option<Duration>> {
        let key = self.key(id);
        let mut conn = self.conn().await?;

        let pttl: i64 = conn.pttl(&key).await.map_err(warn_err(&key, "PTTL"))?;
        // -2 = absent, -1 = no expiry.
        Ok((pttl >= 0).then(|| Duration::from_millis(pttl as u64)))
    }

    /// Seconds since the entry was last touched; `Ok(None)` when absent
    pub async fn idle_time(&self, id: &str) -> Result<Option<Duration>> {
        let key = self.key(id);
        let mut conn = self.conn().await?;

        let idle: Option<i64> = redis::cmd("OBJECT")
            .arg("IDLETIME")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(warn_err(&key, "OBJECT IDLETIME"))?;
        Ok(idle.and_then(|secs| (secs >= 0).then(|| Duration::from_secs(secs as u64))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_prefix_format() {
        assert_eq!(collection_prefix("app", 2, "users"), "app(2).users");
        assert_eq!(collection_prefix("billing", 0, "invoices"), "billing(0).invoices");
    }

    #[test]
    fn test_entry_key_format() {
        let prefix = collection_prefix("app", 2, "users");
        assert_eq!(entry_key(&prefix, "42"), "app(2).users[42]");
        assert_eq!(entry_key(&prefix, "a:b"), "app(2).users[a:b]");
    }
}
