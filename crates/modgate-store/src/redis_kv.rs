//! Redis-backed KV cache
//!
//! Uses a multiplexed connection manager; multi-bit operations go through
//! Lua scripts so the bit array is updated atomically.

use std::time::Duration;

use async_trait::async_trait;
use modgate_core::{Error, Result};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script, Value};

use crate::kv::{CacheKv, ScriptReply};

/// Redis implementation of [`CacheKv`].
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
}

impl RedisKv {
    /// Connect to a Redis instance.
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::kv(format!("redis connection error: {e}")))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::kv(format!("redis connection manager error: {e}")))?;

        Ok(Self { conn })
    }

    async fn set_value<V: redis::ToRedisArgs + Send + Sync>(
        &self,
        key: &str,
        value: V,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                .await ,
            None => conn.set::<_, _, ()>(key, value).await,
        }
        .map_err(|e| Error::kv(e.to_string()))
    }

    async fn get_value<V: redis::FromRedisValue>(&self, key: &str) -> Result<Option<V>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| Error::kv(e.to_string()))
    }
}

#[async_trait]
impl CacheKv for RedisKv {
    async fn set_string(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.set_value(key, value, ttl).await
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.get_value(key).await
    }

    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.set_value(key, value, ttl).await
    }

    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.get_value(key).await
    }

    async fn set_i64(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<()> {
        self.set_value(key, value, ttl).await
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        self.get_value(key).await
    }

    async fn set_u64(&self, key: &str, value: u64, ttl: Option<Duration>) -> Result<()> {
        self.set_value(key, value, ttl).await
    }

    async fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        self.get_value(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        conn.exists(key).await.map_err(|e| Error::kv(e.to_string()))
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        conn.del(keys).await.map_err(|e| Error::kv(e.to_string()))
    }

    async fn expire(&self, key: &str, seconds: i64) -> Result<bool> {
        let mut conn = self.conn.clone();
        conn.expire(key, seconds)
            .await
            .map_err(|e| Error::kv(e.to_string()))
    }

    async fn script_run(
        &self,
        script: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply> {
        let mut conn = self.conn.clone();
        let script = Script::new(script);
        let mut call = script.prepare_invoke();
        for key in keys {
            call.key(key);
        }
        for arg in args {
            call.arg(arg);
        }

        let value: Value = call
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::kv(e.to_string()))?;

        match value {
            Value::Nil => Ok(ScriptReply::Nil),
            Value::Int(i) => Ok(ScriptReply::Int(i)),
            Value::Okay => Ok(ScriptReply::Status("OK".to_string())),
            Value::SimpleString(s) => Ok(ScriptReply::Status(s)),
            other => Err(Error::kv(format!("unexpected script reply: {other:?}"))),
        }
    }
}
