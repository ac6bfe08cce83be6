//! Bloom filter over a shared bit set
//!
//! Membership of an item hashes it with murmur3-64 and derives `k` bit
//! offsets as `hash(data ‖ i) mod m` for i in [0, k). Items are only ever
//! added; the filter never raises a false negative for an item previously
//! added on the same (m, k, hash) tuple.

use std::sync::Arc;

use modgate_core::fingerprint::bloom_hash;
use modgate_core::Result;

use crate::bitset::BitSet;

/// A Bloom filter with fixed parameters over a [`BitSet`].
#[derive(Clone)]
pub struct Bloom {
    bit_set: Arc<dyn BitSet>,
    bits: u64,
    hash_functions: u32,
}

impl Bloom {
    /// Create a filter over the given bit set.
    ///
    /// `bits` must match the bit set's width; `hash_functions` is the k of
    /// the filter and fixes the false-positive rate together with m.
    pub fn new(bit_set: Arc<dyn BitSet>, bits: u64, hash_functions: u32) -> Self {
        Self {
            bit_set,
            bits,
            hash_functions,
        }
    }

    fn locations(&self, data: &[u8]) -> Vec<u64> {
        let mut buf = Vec::with_capacity(data.len() + 1);
        buf.extend_from_slice(data);
        buf.push(0);
        let counter = data.len();

        (0..self.hash_functions)
            .map(|i| {
                buf[counter] = i as u8;
                bloom_hash(&buf) % self.bits
            })
            .collect()
    }

    /// Add an item to the filter.
    pub async fn add(&self, data: &[u8]) -> Result<()> {
        let locations = self.locations(data);
        self.bit_set.set(&locations).await
    }

    /// Check whether an item may be in the filter.
    pub async fn exists(&self, data: &[u8]) -> Result<bool> {
        let locations = self.locations(data);
        self.bit_set.check(&locations).await
    }

    /// Drop the whole filter.
    pub async fn clear(&self) -> Result<()> {
        self.bit_set.clear().await
    }

    /// Set a TTL on the filter's backing key.
    pub async fn expire(&self, seconds: i64) -> Result<bool> {
        self.bit_set.expire(seconds).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitset::MemoryBitSet;

    fn small_bloom() -> Bloom {
        Bloom::new(Arc::new(MemoryBitSet::new(1 << 16)), 1 << 16, 5)
    }

    #[tokio::test]
    async fn test_no_false_negatives() {
        let bloom = small_bloom();
        let items: Vec<String> = (0..200).map(|i| format!("item-{i}")).collect();
        for item in &items {
            bloom.add(item.as_bytes()).await.unwrap();
        }
        for item in &items {
            assert!(
                bloom.exists(item.as_bytes()).await.unwrap(),
                "false negative for {item}"
            );
        }
    }

    #[tokio::test]
    async fn test_absent_items_mostly_miss() {
        let bloom = small_bloom();
        for i in 0..50 {
            bloom.add(format!("present-{i}").as_bytes()).await.unwrap();
        }

        let mut hits = 0;
        for i in 0..200 {
            if bloom
                .exists(format!("absent-{i}").as_bytes())
                .await
                .unwrap()
            {
                hits += 1;
            }
        }
        // 50 items in a 64K-bit filter with k = 5: false positives should
        // be rare. Allow a generous margin so the test never flakes.
        assert!(hits < 20, "implausibly high false positive count: {hits}");
    }

    #[tokio::test]
    async fn test_empty_filter_has_no_members() {
        let bloom = small_bloom();
        assert!(!bloom.exists(b"anything").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_resets_membership() {
        let bloom = small_bloom();
        bloom.add(b"word").await.unwrap();
        assert!(bloom.exists(b"word").await.unwrap());

        bloom.clear().await.unwrap();
        assert!(!bloom.exists(b"word").await.unwrap());
    }
}
