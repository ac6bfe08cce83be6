//! Feedback loop: teach the cheap layers about classifier positives
//!
//! When the AI classifier flags content the pattern matcher missed, the
//! flagged phrase is written into the durable bad-phrase set and the text
//! Bloom filter, so the next identical input short-circuits on the cache
//! and near-identical inputs hit the prefilter. The matcher itself only
//! learns the phrase on the next filter rebuild.

use async_trait::async_trait;
use modgate_core::fingerprint::sha256_hex;
use modgate_core::{normalize, tokenize, Result};
use modgate_filters::Bloom;
use modgate_store::{TextCacheEntry, TextCacheRepo};
use std::sync::Arc;
use tracing::debug;

/// Hook invoked from a detached task when the classifier flags content.
///
/// Implementations must tolerate repository unavailability by returning
/// the error; the caller drops it after logging, and the next classifier
/// hit re-enqueues the same phrase.
#[async_trait]
pub trait FeedbackHandler: Send + Sync {
    /// Record a newly flagged phrase with its classifier categories and
    /// optional numeric severity.
    async fn on_flagged(&self, phrase: &str, categories: &[String], score: Option<f64>)
        -> Result<()>;
}

/// Default feedback handler: durable bad-phrase upsert plus Bloom insert.
pub struct LearningFeedback {
    repo: Arc<dyn TextCacheRepo>,
    bloom: Bloom,
    model_version: String,
}

impl LearningFeedback {
    pub fn new(repo: Arc<dyn TextCacheRepo>, bloom: Bloom, model_version: impl Into<String>) -> Self {
        Self {
            repo,
            bloom,
            model_version: model_version.into(),
        }
    }
}

#[async_trait]
impl FeedbackHandler for LearningFeedback {
    async fn on_flagged(
        &self,
        phrase: &str,
        categories: &[String],
        score: Option<f64>,
    ) -> Result<()> {
        let normalized = normalize(phrase);
        if normalized.is_empty() {
            return Ok(());
        }

        let content_hash = sha256_hex(&normalized);
        debug!(content_hash = %content_hash, "learning flagged phrase");

        // Permanent unsafe entry; duplicate feedback is a no-op upsert.
        let mut entry = TextCacheEntry::new(
            content_hash,
            normalized.clone(),
            "unsafe",
            score.unwrap_or(1.0),
        );
        entry.model_version = self.model_version.clone();
        entry.detect_result = serde_json::json!({ "categories": categories });
        self.repo.upsert(entry).await?;

        self.bloom.add(sha256_hex(&normalized).as_bytes()).await?;
        let tokens = tokenize(&normalized);
        if tokens.len() > 1 {
            for token in tokens {
                self.bloom
                    .add(sha256_hex(&normalize(token)).as_bytes())
                    .await?;
            }
        }
        Ok(())
    }
}
