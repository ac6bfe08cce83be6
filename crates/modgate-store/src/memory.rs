//! In-memory store backends
//!
//! Used in tests and in single-process deployments without Redis or a
//! database. Semantics match the production backends: idempotent upserts,
//! last-writer-wins on the mutable fields, TTL-honoring reads.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use modgate_core::{Error, Result};
use parking_lot::{Mutex, RwLock};

use crate::entry::{ImageCacheEntry, TextCacheEntry};
use crate::kv::{CacheKv, ScriptReply};
use crate::repo::{ImageCacheRepo, TextCacheRepo};

/// How many similar entries a pHash lookup returns at most.
const SIMILAR_LIMIT: usize = 5;

struct KvSlot {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// In-memory implementation of [`CacheKv`].
#[derive(Default)]
pub struct MemoryKv {
    slots: Mutex<HashMap<String, KvSlot>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self, key: &str) -> Option<Vec<u8>> {
        let mut slots = self.slots.lock();
        match slots.get(key) {
            Some(slot) => {
                if matches!(slot.expires_at, Some(at) if at <= Instant::now()) {
                    slots.remove(key);
                    None
                } else {
                    Some(slot.value.clone())
                }
            }
            None => None,
        }
    }

    fn write(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let slot = KvSlot {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        self.slots.lock().insert(key.to_string(), slot);
    }
}

#[async_trait]
impl CacheKv for MemoryKv {
    async fn set_string(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.write(key, value.as_bytes().to_vec(), ttl);
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.read(key) {
            Some(bytes) => Ok(Some(
                String::from_utf8(bytes).map_err(|e| Error::kv(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.write(key, value.to_vec(), ttl);
        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.read(key))
    }

    async fn set_i64(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<()> {
        self.set_string(key, &value.to_string(), ttl).await
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        parse_numeric(self.get_string(key).await?)
    }

    async fn set_u64(&self, key: &str, value: u64, ttl: Option<Duration>) -> Result<()> {
        self.set_string(key, &value.to_string(), ttl).await
    }

    async fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        parse_numeric(self.get_string(key).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read(key).is_some())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        let mut slots = self.slots.lock();
        let mut removed = 0;
        for key in keys {
            if slots.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn expire(&self, key: &str, seconds: i64) -> Result<bool> {
        let mut slots = self.slots.lock();
        match slots.get_mut(key) {
            Some(slot) => {
                slot.expires_at = Some(Instant::now() + Duration::from_secs(seconds.max(0) as u64));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn script_run(
        &self,
        _script: &str,
        _keys: &[String],
        _args: &[String],
    ) -> Result<ScriptReply> {
        // Bit-set operations use the in-memory bit set instead of scripts.
        Err(Error::kv("scripts are not supported by the in-memory kv"))
    }
}

fn parse_numeric<T: std::str::FromStr>(value: Option<String>) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(s) => s
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::kv(format!("not a number: {e}"))),
        None => Ok(None),
    }
}

/// In-memory implementation of [`TextCacheRepo`].
#[derive(Default)]
pub struct MemoryTextCacheRepo {
    entries: RwLock<HashMap<String, TextCacheEntry>>,
}

impl MemoryTextCacheRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TextCacheRepo for MemoryTextCacheRepo {
    async fn upsert(&self, mut entry: TextCacheEntry) -> Result<()> {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&entry.content_hash) {
            entry.created_at = existing.created_at;
        }
        entry.updated_at = Utc::now();
        entries.insert(entry.content_hash.clone(), entry);
        Ok(())
    }

    async fn get(&self, content_hash: &str) -> Result<Option<TextCacheEntry>> {
        let entries = self.entries.read();
        match entries.get(content_hash) {
            Some(entry) if !entry.is_expired(Utc::now()) => Ok(Some(entry.clone())),
            _ => Ok(None),
        }
    }

    async fn delete(&self, content_hash: &str) -> Result<()> {
        self.entries.write().remove(content_hash);
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok((before - entries.len()) as u64)
    }

    async fn list(
        &self,
        category: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TextCacheEntry>> {
        let entries = self.entries.read();
        let mut rows: Vec<_> = entries
            .values()
            .filter(|e| category.map_or(true, |c| e.category == c))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<TextCacheEntry>> {
        Ok(self.entries.read().values().cloned().collect())
    }

    async fn count(&self, category: Option<&str>) -> Result<i64> {
        let entries = self.entries.read();
        Ok(entries
            .values()
            .filter(|e| category.map_or(true, |c| e.category == c))
            .count() as i64)
    }
}

/// In-memory implementation of [`ImageCacheRepo`].
#[derive(Default)]
pub struct MemoryImageCacheRepo {
    entries: RwLock<HashMap<String, ImageCacheEntry>>,
}

impl MemoryImageCacheRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImageCacheRepo for MemoryImageCacheRepo {
    async fn upsert(&self, mut entry: ImageCacheEntry) -> Result<()> {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&entry.file_hash) {
            entry.created_at = existing.created_at;
        }
        entry.updated_at = Utc::now();
        entries.insert(entry.file_hash.clone(), entry);
        Ok(())
    }

    async fn get(&self, file_hash: &str) -> Result<Option<ImageCacheEntry>> {
        let entries = self.entries.read();
        match entries.get(file_hash) {
            Some(entry) if !entry.is_expired(Utc::now()) => Ok(Some(entry.clone())),
            _ => Ok(None),
        }
    }

    async fn find_similar_by_phash(
        &self,
        phash: u64,
        max_distance: u32,
    ) -> Result<Vec<ImageCacheEntry>> {
        let entries = self.entries.read();
        let mut hits: Vec<(u32, ImageCacheEntry)> = entries
            .values()
            .filter(|e| e.category != "safe")
            .filter_map(|e| {
                let distance = (e.phash ^ phash).count_ones();
                (distance <= max_distance).then(|| (distance, e.clone()))
            })
            .collect();
        hits.sort_by_key(|(distance, _)| *distance);
        Ok(hits
            .into_iter()
            .take(SIMILAR_LIMIT)
            .map(|(_, e)| e)
            .collect())
    }

    async fn delete(&self, file_hash: &str) -> Result<()> {
        self.entries.write().remove(file_hash);
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok((before - entries.len()) as u64)
    }

    async fn list(
        &self,
        category: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ImageCacheEntry>> {
        let entries = self.entries.read();
        let mut rows: Vec<_> = entries
            .values()
            .filter(|e| category.map_or(true, |c| e.category == c))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<ImageCacheEntry>> {
        Ok(self.entries.read().values().cloned().collect())
    }

    async fn count(&self, category: Option<&str>) -> Result<i64> {
        let entries = self.entries.read();
        Ok(entries
            .values()
            .filter(|e| category.map_or(true, |c| e.category == c))
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_kv_roundtrip_and_ttl() {
        let kv = MemoryKv::new();
        kv.set_string("a", "hello", None).await.unwrap();
        assert_eq!(kv.get_string("a").await.unwrap().as_deref(), Some("hello"));

        kv.set_u64("n", 42, None).await.unwrap();
        assert_eq!(kv.get_u64("n").await.unwrap(), Some(42));

        kv.set_string("short", "gone", Some(Duration::from_millis(0)))
            .await
            .unwrap();
        assert_eq!(kv.get_string("short").await.unwrap(), None);

        assert!(kv.exists("a").await.unwrap());
        assert_eq!(kv.del(&["a".to_string(), "missing".to_string()]).await.unwrap(), 1);
        assert!(!kv.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_text_repo_upsert_is_idempotent_and_lww() {
        let repo = MemoryTextCacheRepo::new();
        let mut entry = TextCacheEntry::new("h1", "bad phrase", "unsafe", 0.9);
        repo.upsert(entry.clone()).await.unwrap();

        entry.category = "controversial".to_string();
        entry.nsfw_score = 0.6;
        repo.upsert(entry).await.unwrap();

        let stored = repo.get("h1").await.unwrap().unwrap();
        assert_eq!(stored.category, "controversial");
        assert_eq!(stored.nsfw_score, 0.6);
        assert_eq!(repo.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_text_repo_expiry_hides_and_reaps() {
        let repo = MemoryTextCacheRepo::new();
        let mut entry = TextCacheEntry::new("h1", "text", "safe", 0.0);
        entry.expires_at = Some(Utc::now() - ChronoDuration::seconds(5));
        repo.upsert(entry).await.unwrap();

        assert!(repo.get("h1").await.unwrap().is_none());
        assert_eq!(repo.delete_expired().await.unwrap(), 1);
        assert_eq!(repo.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_text_repo_list_filters_by_category() {
        let repo = MemoryTextCacheRepo::new();
        repo.upsert(TextCacheEntry::new("h1", "a", "unsafe", 0.9))
            .await
            .unwrap();
        repo.upsert(TextCacheEntry::new("h2", "b", "safe", 0.0))
            .await
            .unwrap();

        let unsafe_rows = repo.list(Some("unsafe"), 10, 0).await.unwrap();
        assert_eq!(unsafe_rows.len(), 1);
        assert_eq!(unsafe_rows[0].content_hash, "h1");
        assert_eq!(repo.count(Some("safe")).await.unwrap(), 1);
        assert_eq!(repo.list(None, 10, 0).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_find_similar_orders_filters_and_limits() {
        let repo = MemoryImageCacheRepo::new();
        let base: u64 = 0xFF00_FF00_FF00_FF00;

        // Distance 0, 2, and 3 from base, plus a safe near-duplicate and a
        // far-away unsafe entry.
        repo.upsert(ImageCacheEntry::new("exact", base, "unsafe", 0.95))
            .await
            .unwrap();
        repo.upsert(ImageCacheEntry::new("close", base ^ 0b11, "unsafe", 0.9))
            .await
            .unwrap();
        repo.upsert(ImageCacheEntry::new("closer", base ^ 0b111, "unsafe", 0.8))
            .await
            .unwrap();
        repo.upsert(ImageCacheEntry::new("safe", base ^ 0b1, "safe", 0.1))
            .await
            .unwrap();
        repo.upsert(ImageCacheEntry::new("far", !base, "unsafe", 0.99))
            .await
            .unwrap();

        let hits = repo.find_similar_by_phash(base, 10).await.unwrap();
        let hashes: Vec<_> = hits.iter().map(|e| e.file_hash.as_str()).collect();
        assert_eq!(hashes, vec!["exact", "close", "closer"]);
    }

    #[tokio::test]
    async fn test_find_similar_caps_at_five() {
        let repo = MemoryImageCacheRepo::new();
        for i in 0..8u64 {
            repo.upsert(ImageCacheEntry::new(
                format!("f{i}"),
                1u64 << i,
                "unsafe",
                0.9,
            ))
            .await
            .unwrap();
        }
        let hits = repo.find_similar_by_phash(0, 10).await.unwrap();
        assert_eq!(hits.len(), 5);
    }
}
