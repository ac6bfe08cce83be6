//! Repository traits over the durable store
//!
//! Upserts are idempotent on the primary key, and concurrent upserts of
//! the same key converge to last-writer-wins on the mutable fields.
//! Transport failures map to `Error::Repo`.

use async_trait::async_trait;
use modgate_core::Result;

use crate::entry::{ImageCacheEntry, TextCacheEntry};

/// Repository for cached text moderation results, keyed by content hash.
#[async_trait]
pub trait TextCacheRepo: Send + Sync {
    /// Insert or replace the entry for its content hash.
    async fn upsert(&self, entry: TextCacheEntry) -> Result<()>;

    /// Look up an entry; `None` when absent.
    async fn get(&self, content_hash: &str) -> Result<Option<TextCacheEntry>>;

    /// Delete the entry for a content hash. Deleting a missing key is ok.
    async fn delete(&self, content_hash: &str) -> Result<()>;

    /// Reap expired entries; returns the number removed.
    async fn delete_expired(&self) -> Result<u64>;

    /// Page through entries, optionally filtered by category string.
    async fn list(
        &self,
        category: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TextCacheEntry>>;

    /// Every entry, used for filter rebuilds.
    async fn list_all(&self) -> Result<Vec<TextCacheEntry>>;

    /// Count entries, optionally filtered by category string.
    async fn count(&self, category: Option<&str>) -> Result<i64>;
}

/// Repository for cached image moderation results, keyed by file hash.
#[async_trait]
pub trait ImageCacheRepo: Send + Sync {
    /// Insert or replace the entry for its file hash.
    async fn upsert(&self, entry: ImageCacheEntry) -> Result<()>;

    /// Look up an entry; `None` when absent.
    async fn get(&self, file_hash: &str) -> Result<Option<ImageCacheEntry>>;

    /// Find up to 5 non-safe entries whose perceptual hash is within
    /// `max_distance` bits of the target, ordered by ascending Hamming
    /// distance.
    async fn find_similar_by_phash(
        &self,
        phash: u64,
        max_distance: u32,
    ) -> Result<Vec<ImageCacheEntry>>;

    /// Delete the entry for a file hash. Deleting a missing key is ok.
    async fn delete(&self, file_hash: &str) -> Result<()>;

    /// Reap expired entries; returns the number removed.
    async fn delete_expired(&self) -> Result<u64>;

    /// Page through entries, optionally filtered by category string.
    async fn list(
        &self,
        category: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ImageCacheEntry>>;

    /// Every entry, used for filter rebuilds.
    async fn list_all(&self) -> Result<Vec<ImageCacheEntry>>;

    /// Count entries, optionally filtered by category string.
    async fn count(&self, category: Option<&str>) -> Result<i64>;
}
