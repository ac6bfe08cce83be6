//! Text moderation pipeline
//!
//! Layered fast path / slow path:
//! 1. L1 cache (KV) and L2 cache (durable repo) by content hash
//! 2. Bloom prefilter over known-bad fingerprints
//! 3. Aho-Corasick pattern match on a prefilter hit
//! 4. AI classifier fallback when patterns cannot auto-reject
//! 5. Writeback to both cache levels and feedback into the cheap layers
//!
//! Infrastructure failures degrade the pipeline instead of failing it: a
//! Bloom or cache outage is treated as "possibly match", a classifier
//! outage yields the pattern-only result, and writeback errors are logged
//! and swallowed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use modgate_classifiers::{SafetyLabel, TextClassifier};
use modgate_core::fingerprint::{fast_hash, sha256_hex};
use modgate_core::{normalize, tokenize, BadPhrase, Category, Error, Result};
use modgate_filters::{Bloom, PhraseMatch, PhraseMatcher};
use modgate_store::{CacheKv, TextCacheEntry, TextCacheRepo};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::TextPipelineConfig;
use crate::feedback::FeedbackHandler;

/// Detached feedback tasks get their own deadline so they never pile up.
const FEEDBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of text moderation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextResult {
    pub is_clean: bool,
    pub matches: Vec<PhraseMatch>,
    pub max_nsfw_score: f64,
    pub categories: Vec<String>,
    pub should_reject: bool,
    pub should_review: bool,
    /// Whether the AI classifier was consulted
    pub nsfw_checked: bool,
    /// Whether the AI classifier flagged the content
    pub detected_by_nsfw: bool,
    /// Whether the result came from a cache level
    pub cache_hit: bool,
    /// Full inputs flagged by the classifier, for the feedback loop
    pub detected_phrases: Vec<String>,
}

impl TextResult {
    fn clean() -> Self {
        Self {
            is_clean: true,
            ..Default::default()
        }
    }

    /// Cache category implied by the verdict flags.
    pub fn category(&self) -> Category {
        if self.should_reject {
            Category::Unsafe
        } else if self.should_review {
            Category::Controversial
        } else {
            Category::Safe
        }
    }
}

/// JSON envelope stored in the L1 cache.
#[derive(Debug, Serialize, Deserialize)]
struct TextEnvelope {
    category: String,
    nsfw_score: f64,
    is_clean: bool,
    should_reject: bool,
    should_review: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    categories: Vec<String>,
}

impl TextEnvelope {
    fn to_result(&self) -> TextResult {
        TextResult {
            is_clean: self.is_clean,
            max_nsfw_score: self.nsfw_score,
            categories: self.categories.clone(),
            should_reject: self.should_reject,
            should_review: self.should_review,
            cache_hit: true,
            ..Default::default()
        }
    }

    fn from_entry(entry: &TextCacheEntry) -> Self {
        let category = Category::parse(&entry.category);
        Self {
            category: entry.category.clone(),
            nsfw_score: entry.nsfw_score,
            is_clean: category == Some(Category::Safe),
            should_reject: category == Some(Category::Unsafe),
            should_review: category == Some(Category::Controversial),
            categories: Vec::new(),
        }
    }
}

/// The text moderation pipeline.
pub struct TextPipeline {
    kv: Arc<dyn CacheKv>,
    bloom: Bloom,
    matcher: Arc<PhraseMatcher>,
    classifier: Option<Arc<dyn TextClassifier>>,
    repo: Option<Arc<dyn TextCacheRepo>>,
    feedback: RwLock<Option<Arc<dyn FeedbackHandler>>>,
    config: TextPipelineConfig,
}

impl TextPipeline {
    /// Create a new pipeline. `classifier` and `repo` may be absent; the
    /// pipeline then runs pattern-only without a durable cache level.
    pub fn new(
        kv: Arc<dyn CacheKv>,
        bloom: Bloom,
        matcher: Arc<PhraseMatcher>,
        classifier: Option<Arc<dyn TextClassifier>>,
        repo: Option<Arc<dyn TextCacheRepo>>,
        config: TextPipelineConfig,
    ) -> Self {
        Self {
            kv,
            bloom,
            matcher,
            classifier,
            repo,
            feedback: RwLock::new(None),
            config,
        }
    }

    /// Install the feedback hook invoked when the classifier flags
    /// content the pattern matcher missed.
    pub fn set_feedback_handler(&self, handler: Arc<dyn FeedbackHandler>) {
        *self.feedback.write() = Some(handler);
    }

    /// Handle to the bad-word Bloom filter.
    pub fn bloom(&self) -> &Bloom {
        &self.bloom
    }

    /// Moderate a text.
    pub async fn moderate(&self, text: &str) -> Result<TextResult> {
        if text.is_empty() {
            return Ok(TextResult::clean());
        }

        let normalized = normalize(text);
        let content_hash = sha256_hex(&normalized);

        // L1 cache
        if let Some(envelope) = self.read_l1(&content_hash).await {
            debug!(content_hash = %content_hash, "text l1 cache hit");
            return Ok(envelope.to_result());
        }

        // L2 cache, written through to L1
        if let Some(repo) = &self.repo {
            match repo.get(&content_hash).await {
                Ok(Some(entry)) => {
                    debug!(content_hash = %content_hash, "text l2 cache hit");
                    let envelope = TextEnvelope::from_entry(&entry);
                    self.write_l1(&content_hash, &envelope).await;
                    return Ok(envelope.to_result());
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "text cache repo read failed, treating as miss"),
            }
        }

        let mut result = TextResult::clean();

        // Bloom prefilter: whole-text fingerprint first, then per-token
        // hashes. A KV failure downgrades to "possibly match" so an
        // outage can never hide known-bad content.
        let mut possible_match = match self.bloom.exists(&fast_hash(&normalized)).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(error = %e, "bloom check failed, assuming possible match");
                true
            }
        };

        if !possible_match {
            for token in tokenize(&normalized) {
                let token_key = sha256_hex(&normalize(token));
                match self.bloom.exists(token_key.as_bytes()).await {
                    Ok(true) => {
                        possible_match = true;
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(error = %e, "bloom token check failed, assuming possible match");
                        possible_match = true;
                        break;
                    }
                }
            }
        }

        // Pattern match on a prefilter hit
        if possible_match {
            let matches = self.matcher.search(&normalized);
            if !matches.is_empty() {
                result.is_clean = false;
                for m in &matches {
                    if m.nsfw_score > result.max_nsfw_score {
                        result.max_nsfw_score = m.nsfw_score;
                    }
                    push_category(&mut result.categories, &m.category);
                }
                result.matches = matches;
            }
        }

        // Classifier fallback, only when patterns cannot already reject
        let need_model = result.max_nsfw_score < self.config.reject_threshold;
        if need_model {
            if let Some(classifier) = &self.classifier {
                match classifier.predict(text).await {
                    Ok(detection) => {
                        result.nsfw_checked = true;
                        if detection.is_nsfw {
                            result.is_clean = false;
                            result.detected_by_nsfw = true;
                            for category in &detection.categories {
                                push_category(&mut result.categories, category);
                            }
                            match detection.safety_label {
                                SafetyLabel::Unsafe => result.should_reject = true,
                                SafetyLabel::Controversial => result.should_review = true,
                                SafetyLabel::Safe => {}
                            }
                            result.detected_phrases.push(text.to_string());
                            self.enqueue_feedback(text, detection.categories, detection.score);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "text classifier unavailable, using pattern result")
                    }
                }
            }
        }

        // Severity override from pattern scores; reject dominates review
        if result.max_nsfw_score >= self.config.reject_threshold {
            result.should_reject = true;
        } else if result.max_nsfw_score >= self.config.review_threshold {
            result.should_review = true;
        }

        self.write_back(&content_hash, &normalized, &result).await;

        Ok(result)
    }

    /// Moderate a text with a deadline; elapsing it cancels the call.
    pub async fn moderate_with_timeout(
        &self,
        text: &str,
        timeout: Duration,
    ) -> Result<TextResult> {
        match tokio::time::timeout(timeout, self.moderate(text)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Cancelled),
        }
    }

    /// Add a single bad phrase to the Bloom filter (full phrase plus its
    /// tokens when multi-word). The pattern matcher learns the phrase on
    /// the next rebuild.
    pub async fn add_word(&self, phrase: &BadPhrase) -> Result<()> {
        let normalized = normalize(&phrase.word);
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

    /// Rebuild the pattern automaton and the Bloom filter from scratch.
    /// The bit array is dropped and re-populated, which is the only point
    /// where admin removals become visible to the prefilter; in-flight
    /// searches finish on the old automaton.
    pub async fn rebuild(&self, words: Vec<BadPhrase>) -> Result<()> {
        let patterns = words
            .iter()
            .map(|w| modgate_filters::PatternInfo {
                word: w.word.clone(),
                category: w.category.clone(),
                nsfw_score: w.nsfw_score,
            })
            .collect();
        self.matcher.rebuild(patterns)?;

        self.bloom.clear().await?;
        for word in &words {
            self.add_word(word).await?;
        }
        Ok(())
    }

    /// Drop a content hash from the L1 cache.
    pub async fn invalidate_cache(&self, content_hash: &str) -> Result<()> {
        self.kv.del(&[self.cache_key(content_hash)]).await?;
        Ok(())
    }

    fn cache_key(&self, content_hash: &str) -> String {
        format!("{}{}", self.config.cache_key_prefix, content_hash)
    }

    async fn read_l1(&self, content_hash: &str) -> Option<TextEnvelope> {
        match self.kv.get_bytes(&self.cache_key(content_hash)).await {
            Ok(Some(raw)) => match serde_json::from_slice(&raw) {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    warn!(error = %e, "corrupt text cache envelope, ignoring");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "text l1 cache read failed, treating as miss");
                None
            }
        }
    }

    async fn write_l1(&self, content_hash: &str, envelope: &TextEnvelope) {
        let raw = match serde_json::to_vec(envelope) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "failed to encode text cache envelope");
                return;
            }
        };
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        if let Err(e) = self
            .kv
            .set_bytes(&self.cache_key(content_hash), &raw, Some(ttl))
            .await
        {
            warn!(error = %e, "text l1 cache write failed");
        }
    }

    /// Writeback never fails the moderation call.
    async fn write_back(&self, content_hash: &str, normalized: &str, result: &TextResult) {
        let category = result.category();

        if let Some(repo) = &self.repo {
            let mut entry = TextCacheEntry::new(
                content_hash,
                normalized,
                category.as_str(),
                result.max_nsfw_score,
            );
            entry.model_version = crate::TEXT_MODEL_VERSION.to_string();
            entry.detect_result = serde_json::to_value(result).unwrap_or_default();
            // Safe verdicts expire with the cache; learned bad content is
            // permanent until an admin removes it.
            if category == Category::Safe {
                entry.expires_at = Some(
                    Utc::now() + chrono::Duration::seconds(self.config.cache_ttl_secs as i64),
                );
            }
            if let Err(e) = repo.upsert(entry).await {
                warn!(error = %e, "text cache repo write failed");
            }
        }

        let envelope = TextEnvelope {
            category: category.as_str().to_string(),
            nsfw_score: result.max_nsfw_score,
            is_clean: result.is_clean,
            should_reject: result.should_reject,
            should_review: result.should_review,
            categories: result.categories.clone(),
        };
        self.write_l1(content_hash, &envelope).await;
    }

    /// Snapshot the feedback hook under a read lock, then hand the flagged
    /// phrase to a detached task with its own deadline. The moderation
    /// call never waits on feedback.
    fn enqueue_feedback(&self, text: &str, categories: Vec<String>, score: Option<f64>) {
        let handler = self.feedback.read().clone();
        let Some(handler) = handler else {
            return;
        };

        let phrase = text.to_string();
        tokio::spawn(async move {
            match tokio::time::timeout(
                FEEDBACK_TIMEOUT,
                handler.on_flagged(&phrase, &categories, score),
            )
            .await
            {
                Err(_) => warn!("feedback timed out, dropping flagged phrase"),
                Ok(Err(e)) => warn!(error = %e, "feedback dropped"),
                Ok(Ok(())) => {}
            }
        });
    }
}

/// Deduplicating, order-preserving category union.
fn push_category(categories: &mut Vec<String>, category: &str) {
    if !categories.iter().any(|c| c == category) {
        categories.push(category.to_string());
    }
}
