//! Bit set providers backing the Bloom filter

use std::sync::Arc;

use async_trait::async_trait;
use modgate_core::{Error, Result};
use modgate_store::CacheKv;
use parking_lot::Mutex;

/// Lua script that sets every offset in ARGV on the bit array at KEYS[1].
const SET_SCRIPT: &str = r#"
for _, offset in ipairs(ARGV) do
    redis.call("SETBIT", KEYS[1], offset, 1)
end
return "OK"
"#;

/// Lua script that returns 1 iff every offset in ARGV is set on KEYS[1].
const CHECK_SCRIPT: &str = r#"
for _, offset in ipairs(ARGV) do
    if tonumber(redis.call("GETBIT", KEYS[1], offset)) == 0 then
        return 0
    end
end
return 1
"#;

/// A fixed-width bit array supporting atomic multi-bit set and check.
#[async_trait]
pub trait BitSet: Send + Sync {
    /// Set all given bit offsets atomically.
    async fn set(&self, offsets: &[u64]) -> Result<()>;

    /// Check whether all given bit offsets are set.
    async fn check(&self, offsets: &[u64]) -> Result<bool>;

    /// Drop the whole bit array.
    async fn clear(&self) -> Result<()>;

    /// Set a TTL on the bit array; returns false when it does not exist.
    async fn expire(&self, seconds: i64) -> Result<bool>;
}

/// Bit set stored under one key in the shared KV store.
///
/// Multi-bit operations run as a single Lua script so concurrent adders
/// and checkers are serialized by the KV engine.
pub struct KvBitSet {
    store: Arc<dyn CacheKv>,
    key: String,
    bits: u64,
}

impl KvBitSet {
    pub fn new(store: Arc<dyn CacheKv>, key: impl Into<String>, bits: u64) -> Self {
        Self {
            store,
            key: key.into(),
            bits,
        }
    }

    fn offset_args(&self, offsets: &[u64]) -> Result<Vec<String>> {
        let mut args = Vec::with_capacity(offsets.len());
        for &offset in offsets {
            if offset >= self.bits {
                return Err(Error::OffsetOutOfRange {
                    offset,
                    bits: self.bits,
                });
            }
            args.push(offset.to_string());
        }
        Ok(args)
    }
}

#[async_trait]
impl BitSet for KvBitSet {
    async fn set(&self, offsets: &[u64]) -> Result<()> {
        let args = self.offset_args(offsets)?;
        let keys = [self.key.clone()];
        self.store.script_run(SET_SCRIPT, &keys, &args).await?;
        Ok(())
    }

    async fn check(&self, offsets: &[u64]) -> Result<bool> {
        let args = self.offset_args(offsets)?;
        let keys = [self.key.clone()];
        let reply = self.store.script_run(CHECK_SCRIPT, &keys, &args).await?;
        Ok(reply.as_check())
    }

    async fn clear(&self) -> Result<()> {
        self.store.del(&[self.key.clone()]).await?;
        Ok(())
    }

    async fn expire(&self, seconds: i64) -> Result<bool> {
        self.store.expire(&self.key, seconds).await
    }
}

/// Process-local bit set used in tests and memory-only deployments.
pub struct MemoryBitSet {
    words: Mutex<Vec<u64>>,
    bits: u64,
}

impl MemoryBitSet {
    pub fn new(bits: u64) -> Self {
        let words = bits.div_ceil(64) as usize;
        Self {
            words: Mutex::new(vec![0; words]),
            bits,
        }
    }

    fn guard(&self, offsets: &[u64]) -> Result<()> {
        for &offset in offsets {
            if offset >= self.bits {
                return Err(Error::OffsetOutOfRange {
                    offset,
                    bits: self.bits,
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BitSet for MemoryBitSet {
    async fn set(&self, offsets: &[u64]) -> Result<()> {
        self.guard(offsets)?;
        let mut words = self.words.lock();
        for &offset in offsets {
            words[(offset / 64) as usize] |= 1u64 << (offset % 64);
        }
        Ok(())
    }

    async fn check(&self, offsets: &[u64]) -> Result<bool> {
        self.guard(offsets)?;
        let words = self.words.lock();
        Ok(offsets
            .iter()
            .all(|&offset| words[(offset / 64) as usize] & (1u64 << (offset % 64)) != 0))
    }

    async fn clear(&self) -> Result<()> {
        let mut words = self.words.lock();
        words.iter_mut().for_each(|w| *w = 0);
        Ok(())
    }

    async fn expire(&self, _seconds: i64) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_bitset_set_and_check() {
        let set = MemoryBitSet::new(128);
        assert!(!set.check(&[3, 70]).await.unwrap());

        set.set(&[3, 70]).await.unwrap();
        assert!(set.check(&[3, 70]).await.unwrap());
        assert!(set.check(&[3]).await.unwrap());
        assert!(!set.check(&[3, 71]).await.unwrap());

        set.clear().await.unwrap();
        assert!(!set.check(&[3]).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_bitset_rejects_out_of_range() {
        let set = MemoryBitSet::new(64);
        let err = set.set(&[64]).await.unwrap_err();
        assert!(matches!(err, Error::OffsetOutOfRange { offset: 64, bits: 64 }));
    }
}
