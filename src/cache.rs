//! # Cache store
//!
//! Typed facade over the remote key/value tier.
//!
//! The repository and rate limiter speak to this trait, never to a Redis
//! connection directly. Every call is a network round-trip that may fail
//! with a transient [`StoreError`]; admission paths turn that into a
//! rejection, broadcast paths log and let the next tick retry. No
//! operation is cross-key transactional.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store call failed: {0}")]
    Backend(#[from] redis::RedisError),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn hash_put_all(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()>;
    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>>;
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;
    /// Atomic integer add on a hash field; returns the new value.
    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64>;

    /// Returns true if the member was newly added.
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool>;
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()>;
    async fn set_members(&self, key: &str) -> StoreResult<HashSet<String>>;
    async fn set_contains(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn list_push_front(&self, key: &str, value: &str) -> StoreResult<()>;
    async fn list_trim(&self, key: &str, start: i64, stop: i64) -> StoreResult<()>;
    async fn list_range(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>>;

    async fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;
    /// Atomic set-if-absent with TTL; returns true when the key was set.
    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;
    /// Atomic get-and-delete.
    async fn take(&self, key: &str) -> StoreResult<Option<String>>;
    async fn key_exists(&self, key: &str) -> StoreResult<bool>;
    async fn key_expire(&self, key: &str, ttl: Duration) -> StoreResult<()>;
}

/// Production implementation over a multiplexed Redis connection.
///
/// The connection manager reconnects on its own; per-call response
/// timeouts bound how long an admission path can stall on a dead peer.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, redis::RedisError> {
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(1)
            .set_connection_timeout(Duration::from_millis(100))
            .set_response_timeout(Duration::from_secs(2));

        let client = Client::open(redis_url)?;
        let conn = client.get_connection_manager_with_config(config).await?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn hash_put_all(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset_multiple(key, fields).await?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(fields)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.hincr(key, field, delta).await?;
        Ok(value)
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let added: i64 = conn.sadd(key, member).await?;
        Ok(added == 1)
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.srem(key, member).await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<HashSet<String>> {
        let mut conn = self.conn.clone();
        let members: HashSet<String> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn set_contains(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let found: bool = conn.sismember(key, member).await?;
        Ok(found)
    }

    async fn list_push_front(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.lpush(key, value).await?;
        Ok(())
    }

    async fn list_trim(&self, key: &str, start: i64, stop: i64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.ltrim(key, start as isize, stop as isize).await?;
        Ok(())
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn.lrange(key, start as isize, stop as isize).await?;
        Ok(values)
    }

    async fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        // SET NX EX replies OK when set, nil when the key already exists.
        let set: bool = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(set)
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get_del(key).await?;
        Ok(value)
    }

    async fn key_exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn key_expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: bool = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }
}
