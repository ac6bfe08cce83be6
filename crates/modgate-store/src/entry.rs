//! Cache entry models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cached text moderation result, keyed by the SHA-256 of the
/// normalized content.
///
/// `category` is `"safe" | "controversial" | "unsafe"` for entries written
/// by the pipeline; admin-added phrases may carry a free-form tag instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCacheEntry {
    pub content_hash: String,
    pub normalized_content: String,
    /// Opaque JSON blob with the full detection detail
    pub detect_result: serde_json::Value,
    pub category: String,
    pub nsfw_score: f64,
    pub model_version: String,
    pub added_by: String,
    /// Entries without an expiry are permanent (bad-phrase rows)
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TextCacheEntry {
    /// Create an entry with timestamps set to now.
    pub fn new(
        content_hash: impl Into<String>,
        normalized_content: impl Into<String>,
        category: impl Into<String>,
        nsfw_score: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            content_hash: content_hash.into(),
            normalized_content: normalized_content.into(),
            detect_result: serde_json::Value::Object(Default::default()),
            category: category.into(),
            nsfw_score,
            model_version: String::new(),
            added_by: "auto".to_string(),
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the entry has passed its expiry, if any.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// A cached image moderation result, keyed by the SHA-256 of the raw
/// image bytes, with the perceptual hash indexed for similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageCacheEntry {
    pub file_hash: String,
    /// 64-bit DCT perceptual hash
    pub phash: u64,
    pub detect_result: serde_json::Value,
    pub category: String,
    pub nsfw_score: f64,
    pub model_version: String,
    pub source_url: String,
    pub added_by: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageCacheEntry {
    /// Create an entry with timestamps set to now.
    pub fn new(
        file_hash: impl Into<String>,
        phash: u64,
        category: impl Into<String>,
        nsfw_score: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            file_hash: file_hash.into(),
            phash,
            detect_result: serde_json::Value::Object(Default::default()),
            category: category.into(),
            nsfw_score,
            model_version: String::new(),
            source_url: String::new(),
            added_by: "auto".to_string(),
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the entry has passed its expiry, if any.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let mut entry = TextCacheEntry::new("hash", "text", "safe", 0.0);
        assert!(!entry.is_expired(now), "no expiry means permanent");

        entry.expires_at = Some(now - Duration::seconds(1));
        assert!(entry.is_expired(now));

        entry.expires_at = Some(now + Duration::seconds(60));
        assert!(!entry.is_expired(now));
    }
}
