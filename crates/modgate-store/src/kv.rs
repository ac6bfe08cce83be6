//! KV cache abstraction (Redis-compatible)

use std::time::Duration;

use async_trait::async_trait;
use modgate_core::Result;

/// Reply from an atomic script execution.
///
/// `Nil` collapses to "absent": a bit-check against a key that was never
/// written reports no membership rather than an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptReply {
    Nil,
    Int(i64),
    Status(String),
}

impl ScriptReply {
    /// Interpret the reply as a boolean check result (`1` means true).
    pub fn as_check(&self) -> bool {
        matches!(self, Self::Int(1))
    }
}

/// Typed KV operations over the shared cache store.
///
/// Backs both the L1 result cache and the Bloom bit arrays; the latter go
/// through `script_run` so multi-bit operations stay atomic.
#[async_trait]
pub trait CacheKv: Send + Sync {
    async fn set_string(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;
    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set_i64(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<()>;
    async fn get_i64(&self, key: &str) -> Result<Option<i64>>;

    async fn set_u64(&self, key: &str, value: u64, ttl: Option<Duration>) -> Result<()>;
    async fn get_u64(&self, key: &str) -> Result<Option<u64>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete keys; returns how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// Set a TTL on an existing key; returns false when the key is absent.
    async fn expire(&self, key: &str, seconds: i64) -> Result<bool>;

    /// Run an atomic script against one or more keys.
    async fn script_run(
        &self,
        script: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_reply_check() {
        assert!(ScriptReply::Int(1).as_check());
        assert!(!ScriptReply::Int(0).as_check());
        assert!(!ScriptReply::Nil.as_check());
        assert!(!ScriptReply::Status("OK".to_string()).as_check());
    }
}
