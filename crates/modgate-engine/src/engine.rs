//! Moderation dispatcher
//!
//! Owns the pipelines, the Bloom filters, and the pattern automaton, and
//! synthesizes per-modality outcomes into one verdict. Also carries the
//! admin surface: bad-word CRUD and filter rebuilds.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use modgate_classifiers::{ImageClassifier, TextClassifier};
use modgate_core::fingerprint::sha256_hex;
use modgate_core::{normalize, BadPhrase, ModerationAction, Result};
use modgate_filters::{Bloom, KvBitSet, PhraseMatcher};
use modgate_store::{CacheKv, ImageCacheRepo, TextCacheEntry, TextCacheRepo};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::feedback::LearningFeedback;
use crate::image::{ImageJob, ImagePipeline, ImageResult};
use crate::metrics::EngineMetrics;
use crate::text::{TextPipeline, TextResult};
use crate::video::{FrameSource, VideoPipeline, VideoResult};

/// Dependencies handed to the engine at construction.
///
/// The bit sets default to KV-backed sets under the configured Bloom keys;
/// tests and memory-only deployments pass their own.
pub struct EngineDeps {
    pub kv: Arc<dyn CacheKv>,
    pub text_repo: Arc<dyn TextCacheRepo>,
    pub image_repo: Arc<dyn ImageCacheRepo>,
    pub text_classifier: Option<Arc<dyn TextClassifier>>,
    pub image_classifier: Option<Arc<dyn ImageClassifier>>,
    pub text_bit_set: Option<Arc<dyn modgate_filters::BitSet>>,
    pub image_bit_set: Option<Arc<dyn modgate_filters::BitSet>>,
    pub frame_source: Arc<dyn FrameSource>,
}

/// The final verdict over all modalities of one request.
#[derive(Debug, Clone, Serialize)]
pub struct ModerationVerdict {
    pub request_id: String,
    pub action: ModerationAction,
    pub is_clean: bool,
    pub categories: Vec<String>,
    pub scores: HashMap<String, f64>,
    pub processed_at: DateTime<Utc>,
    pub text: Option<TextResult>,
    pub image: Option<ImageResult>,
    pub video: Option<VideoResult>,
}

impl ModerationVerdict {
    fn clean(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            action: ModerationAction::AutoApprove,
            is_clean: true,
            categories: Vec::new(),
            scores: HashMap::new(),
            processed_at: Utc::now(),
            text: None,
            image: None,
            video: None,
        }
    }
}

/// The moderation engine.
pub struct ModerationEngine {
    text: Arc<TextPipeline>,
    image: ImagePipeline,
    video: VideoPipeline,
    matcher: Arc<PhraseMatcher>,
    text_repo: Arc<dyn TextCacheRepo>,
    image_repo: Arc<dyn ImageCacheRepo>,
    metrics: EngineMetrics,
}

impl ModerationEngine {
    /// Wire the pipelines, filters, and the feedback loop.
    pub fn new(deps: EngineDeps, config: EngineConfig) -> Result<Self> {
        let text_bits = deps.text_bit_set.unwrap_or_else(|| {
            Arc::new(KvBitSet::new(
                deps.kv.clone(),
                config.text.bloom_key.clone(),
                config.text.bloom_bits,
            ))
        });
        let image_bits = deps.image_bit_set.unwrap_or_else(|| {
            Arc::new(KvBitSet::new(
                deps.kv.clone(),
                config.image.bloom_key.clone(),
                config.image.bloom_bits,
            ))
        });

        let text_bloom = Bloom::new(text_bits, config.text.bloom_bits, config.text.bloom_hashes);
        let image_bloom = Bloom::new(
            image_bits,
            config.image.bloom_bits,
            config.image.bloom_hashes,
        );

        let matcher = Arc::new(PhraseMatcher::new());

        let text = Arc::new(TextPipeline::new(
            deps.kv.clone(),
            text_bloom.clone(),
            matcher.clone(),
            deps.text_classifier,
            Some(deps.text_repo.clone()),
            config.text.clone(),
        ));
        text.set_feedback_handler(Arc::new(LearningFeedback::new(
            deps.text_repo.clone(),
            text_bloom,
            crate::TEXT_MODEL_VERSION,
        )));

        let image = ImagePipeline::new(
            deps.kv,
            image_bloom,
            deps.image_repo.clone(),
            deps.image_classifier,
            config.image.clone(),
        )?;

        let video = VideoPipeline::new(image.clone(), deps.frame_source, config.video);

        Ok(Self {
            text,
            image,
            video,
            matcher,
            text_repo: deps.text_repo,
            image_repo: deps.image_repo,
            metrics: EngineMetrics::new(),
        })
    }

    /// Handle to the text pipeline.
    pub fn text_pipeline(&self) -> &TextPipeline {
        &self.text
    }

    /// Handle to the image pipeline.
    pub fn image_pipeline(&self) -> &ImagePipeline {
        &self.image
    }

    /// Current engine metrics.
    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Moderate a mixed-content request: text once, then images
    /// sequentially (stopping early only on a reject), then videos.
    /// Audio is hardcoded clean.
    pub async fn moderate(
        &self,
        request_id: &str,
        content: &str,
        image_urls: &[String],
        _audio_urls: &[String],
        video_urls: &[String],
    ) -> Result<ModerationVerdict> {
        debug!(
            request_id,
            content_len = content.len(),
            images = image_urls.len(),
            videos = video_urls.len(),
            "moderating request"
        );

        let mut verdict = ModerationVerdict::clean(request_id);

        if !content.is_empty() {
            let text_result = self.text.moderate(content).await?;
            if !text_result.is_clean {
                verdict.is_clean = false;
                for category in &text_result.categories {
                    push_unique(&mut verdict.categories, category);
                }
            }
            verdict.text = Some(text_result);
        }

        for url in image_urls {
            let image_result = match self.image.moderate_image_url("", url, None).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(url = %url, error = %e, "image moderation failed, skipping");
                    continue;
                }
            };
            if !image_result.is_clean {
                verdict.is_clean = false;
                let mut tags: Vec<&String> = image_result.categories.keys().collect();
                tags.sort();
                for tag in tags {
                    push_unique(&mut verdict.categories, tag);
                }
            }
            let reject = image_result.should_reject;
            verdict.image = Some(image_result);
            if reject {
                break;
            }
        }

        for url in video_urls {
            let video_result = match self.video.moderate_video_url(url).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(url = %url, error = %e, "video moderation failed, skipping");
                    continue;
                }
            };
            if !video_result.is_clean {
                verdict.is_clean = false;
            }
            let reject = video_result.should_reject;
            verdict.video = Some(video_result);
            if reject {
                break;
            }
        }

        self.synthesize(&mut verdict);
        self.record(&verdict);
        Ok(verdict)
    }

    /// Moderate text only.
    pub async fn moderate_text(&self, request_id: &str, content: &str) -> Result<ModerationVerdict> {
        let text_result = self.text.moderate(content).await?;

        let mut verdict = ModerationVerdict::clean(request_id);
        verdict.is_clean = text_result.is_clean;
        verdict.categories = text_result.categories.clone();
        verdict.text = Some(text_result);

        self.synthesize(&mut verdict);
        self.record(&verdict);
        Ok(verdict)
    }

    /// Moderate a single image URL. Download and decode failures surface
    /// as image-unavailable errors.
    pub async fn moderate_image(
        &self,
        request_id: &str,
        owner_id: &str,
        image_url: &str,
        file_hash: Option<&str>,
    ) -> Result<ModerationVerdict> {
        let image_result = self
            .image
            .moderate_image_url(owner_id, image_url, file_hash)
            .await?;

        let mut verdict = ModerationVerdict::clean(request_id);
        verdict.is_clean = image_result.is_clean;
        if !image_result.is_clean {
            let mut tags: Vec<&String> = image_result.categories.keys().collect();
            tags.sort();
            for tag in tags {
                push_unique(&mut verdict.categories, tag);
            }
        }
        verdict.image = Some(image_result);

        self.synthesize(&mut verdict);
        self.record(&verdict);
        Ok(verdict)
    }

    /// Moderate a batch of image URLs on the worker pool; slots failing
    /// with data errors come back as `None`.
    pub async fn moderate_images(&self, jobs: Vec<ImageJob>) -> Vec<Option<ImageResult>> {
        self.image.moderate_image_urls(jobs).await
    }

    /// Moderate a single video URL.
    pub async fn moderate_video(&self, request_id: &str, video_url: &str) -> Result<ModerationVerdict> {
        let video_result = self.video.moderate_video_url(video_url).await?;

        let mut verdict = ModerationVerdict::clean(request_id);
        verdict.is_clean = video_result.is_clean;
        verdict.video = Some(video_result);

        self.synthesize(&mut verdict);
        self.record(&verdict);
        Ok(verdict)
    }

    /// Audio moderation is not implemented; audio is always clean.
    pub async fn moderate_audio(&self, request_id: &str, _audio_url: &str) -> Result<ModerationVerdict> {
        Ok(ModerationVerdict::clean(request_id))
    }

    /// Add a bad word: Bloom insert plus a permanent cache entry carrying
    /// the admin-provided category tag. The pattern matcher picks the
    /// word up on the next rebuild.
    pub async fn add_bad_word(
        &self,
        word: &str,
        category: &str,
        nsfw_score: f64,
        added_by: Option<&str>,
        model_version: Option<&str>,
    ) -> Result<()> {
        let phrase = BadPhrase::new(word, category, nsfw_score);
        self.text.add_word(&phrase).await?;

        let normalized = normalize(word);
        let mut entry = TextCacheEntry::new(
            sha256_hex(&normalized),
            normalized,
            category,
            phrase.nsfw_score,
        );
        entry.model_version = model_version.unwrap_or(crate::TEXT_MODEL_VERSION).to_string();
        entry.added_by = added_by.unwrap_or("manual").to_string();
        self.text_repo.upsert(entry).await?;

        info!(word, category, "added bad word");
        Ok(())
    }

    /// Remove a bad word's cache entry. The Bloom filter keeps its bits
    /// until the next full rebuild.
    pub async fn remove_bad_word(&self, word: &str) -> Result<()> {
        let content_hash = sha256_hex(&normalize(word));
        self.text_repo.delete(&content_hash).await?;
        self.text.invalidate_cache(&content_hash).await?;
        info!(word, "removed bad word");
        Ok(())
    }

    /// Page through stored bad words; returns the page and the total.
    pub async fn list_bad_words(
        &self,
        category: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<TextCacheEntry>, i64)> {
        let rows = self.text_repo.list(category, limit, offset).await?;
        let total = self.text_repo.count(category).await?;
        Ok((rows, total))
    }

    /// Rebuild the pattern automaton and text Bloom from every non-safe
    /// cache entry; returns the number of phrases loaded.
    pub async fn rebuild_filters(&self) -> Result<usize> {
        info!("rebuilding text moderation filters");
        let rows = self.text_repo.list_all().await?;

        let words: Vec<BadPhrase> = rows
            .into_iter()
            .filter(|row| row.category != "safe")
            .map(|row| BadPhrase::new(row.normalized_content, row.category, row.nsfw_score))
            .collect();

        let count = words.len();
        self.text.rebuild(words).await?;
        info!(count, "rebuilt text moderation filters");
        Ok(count)
    }

    /// Rebuild the image Bloom from every unsafe pHash; returns the count.
    pub async fn rebuild_image_filters(&self) -> Result<usize> {
        info!("rebuilding image bloom filter");
        self.image.bloom().clear().await?;
        let rows = self.image_repo.list_all().await?;

        let mut count = 0;
        for row in rows {
            if row.category == "safe" {
                continue;
            }
            if let Err(e) = self.image.add_phash(row.phash).await {
                warn!(file_hash = %row.file_hash, error = %e, "failed to re-add phash");
                continue;
            }
            count += 1;
        }
        info!(count, "rebuilt image bloom filter");
        Ok(count)
    }

    /// Reap expired rows from both repositories; returns (text, image)
    /// counts.
    pub async fn delete_expired(&self) -> Result<(u64, u64)> {
        let text = self.text_repo.delete_expired().await?;
        let image = self.image_repo.delete_expired().await?;
        if text + image > 0 {
            info!(text, image, "reaped expired cache entries");
        }
        Ok((text, image))
    }

    /// Number of patterns in the current automaton.
    pub fn pattern_count(&self) -> usize {
        self.matcher.pattern_count()
    }

    fn synthesize(&self, verdict: &mut ModerationVerdict) {
        let should_reject = verdict.text.as_ref().is_some_and(|t| t.should_reject)
            || verdict.image.as_ref().is_some_and(|i| i.should_reject)
            || verdict.video.as_ref().is_some_and(|v| v.should_reject);
        let should_review = verdict.text.as_ref().is_some_and(|t| t.should_review)
            || verdict.image.as_ref().is_some_and(|i| i.should_review)
            || verdict.video.as_ref().is_some_and(|v| v.should_review);

        verdict.action = ModerationAction::from_flags(should_reject, should_review);
        if should_reject || should_review {
            verdict.is_clean = false;
        }

        if let Some(text) = &verdict.text {
            if text.max_nsfw_score > 0.0 {
                verdict.scores.insert("text_nsfw".to_string(), text.max_nsfw_score);
            }
        }
        if let Some(image) = &verdict.image {
            for (tag, score) in &image.categories {
                verdict.scores.insert(tag.clone(), *score);
            }
        }
        if let Some(video) = &verdict.video {
            if video.max_nsfw_score > 0.0 {
                verdict
                    .scores
                    .insert("video_nsfw".to_string(), video.max_nsfw_score);
            }
            if video.max_violence_score > 0.0 {
                verdict
                    .scores
                    .insert("video_violence".to_string(), video.max_violence_score);
            }
        }
    }

    fn record(&self, verdict: &ModerationVerdict) {
        self.metrics.record_request();
        match verdict.action {
            ModerationAction::AutoReject => self.metrics.record_reject(),
            ModerationAction::PendingReview => self.metrics.record_review(),
            ModerationAction::AutoApprove => {}
        }
        let cache_hit = verdict.text.as_ref().is_some_and(|t| t.cache_hit)
            || verdict.image.as_ref().is_some_and(|i| i.cache_hit);
        if cache_hit {
            self.metrics.record_cache_hit();
        }
        if verdict.text.as_ref().is_some_and(|t| t.nsfw_checked) {
            self.metrics.record_classifier_call();
        }
    }
}

fn push_unique(categories: &mut Vec<String>, category: &str) {
    if !categories.iter().any(|c| c == category) {
        categories.push(category.to_string());
    }
}
