//! Integration tests for the moderation engine
//!
//! Exercise the full dispatcher against in-memory stores and stub
//! classifiers: cache short-circuits, the learning loop, near-duplicate
//! image rejection, and verdict synthesis.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, ImageBuffer, Rgb};
use modgate_classifiers::{
    Detection, ImageClassifier, SafetyLabel, TextClassifier, TextDetection, UrlDetection,
};
use modgate_core::fingerprint::{sha256_hex, sha256_hex_bytes};
use modgate_core::{normalize, Error, ModerationAction, Result};
use modgate_engine::{EngineConfig, EngineDeps, ImageJob, ModerationEngine, NoFrameSource};
use modgate_filters::{hamming_distance, phash_from_bytes, MemoryBitSet};
use modgate_store::{
    ImageCacheEntry, ImageCacheRepo, MemoryImageCacheRepo, MemoryKv, MemoryTextCacheRepo,
    TextCacheRepo,
};

const TEST_BLOOM_BITS: u64 = 1 << 16;

struct StubTextClassifier {
    response: TextDetection,
    calls: AtomicUsize,
}

impl StubTextClassifier {
    fn new(response: TextDetection) -> Arc<Self> {
        Arc::new(Self {
            response,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextClassifier for StubTextClassifier {
    async fn predict(&self, _text: &str) -> Result<TextDetection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }

    async fn predict_batch(&self, texts: &[String]) -> Result<Vec<TextDetection>> {
        Ok(texts.iter().map(|_| self.response.clone()).collect())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

struct FailingTextClassifier;

#[async_trait]
impl TextClassifier for FailingTextClassifier {
    async fn predict(&self, _text: &str) -> Result<TextDetection> {
        Err(Error::classifier("connection refused"))
    }

    async fn predict_batch(&self, _texts: &[String]) -> Result<Vec<TextDetection>> {
        Err(Error::classifier("connection refused"))
    }

    async fn health_check(&self) -> Result<()> {
        Err(Error::classifier("connection refused"))
    }
}

struct StubImageClassifier {
    detection: Detection,
    calls: AtomicUsize,
}

impl StubImageClassifier {
    fn new(detection: Detection) -> Arc<Self> {
        Arc::new(Self {
            detection,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageClassifier for StubImageClassifier {
    async fn predict(&self, _image: &[u8]) -> Result<Detection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.detection.clone())
    }

    async fn predict_from_url(&self, _url: &str) -> Result<Detection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.detection.clone())
    }

    async fn predict_batch_from_urls(&self, urls: &[String]) -> Result<Vec<UrlDetection>> {
        Ok(urls
            .iter()
            .map(|url| UrlDetection {
                url: url.clone(),
                result: Some(self.detection.clone()),
                error: None,
            })
            .collect())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

struct Harness {
    engine: ModerationEngine,
    text_repo: Arc<MemoryTextCacheRepo>,
    image_repo: Arc<MemoryImageCacheRepo>,
    text_classifier: Arc<StubTextClassifier>,
    image_classifier: Arc<StubImageClassifier>,
}

fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.text.bloom_bits = TEST_BLOOM_BITS;
    config.image.bloom_bits = TEST_BLOOM_BITS;
    config
}

fn harness(text_response: TextDetection, image_detection: Detection) -> Harness {
    let text_repo = Arc::new(MemoryTextCacheRepo::new());
    let image_repo = Arc::new(MemoryImageCacheRepo::new());
    let text_classifier = StubTextClassifier::new(text_response);
    let image_classifier = StubImageClassifier::new(image_detection);

    let deps = EngineDeps {
        kv: Arc::new(MemoryKv::new()),
        text_repo: text_repo.clone(),
        image_repo: image_repo.clone(),
        text_classifier: Some(text_classifier.clone()),
        image_classifier: Some(image_classifier.clone()),
        text_bit_set: Some(Arc::new(MemoryBitSet::new(TEST_BLOOM_BITS))),
        image_bit_set: Some(Arc::new(MemoryBitSet::new(TEST_BLOOM_BITS))),
        frame_source: Arc::new(NoFrameSource),
    };
    let engine = ModerationEngine::new(deps, test_config()).unwrap();

    Harness {
        engine,
        text_repo,
        image_repo,
        text_classifier,
        image_classifier,
    }
}

fn png_bytes(seed: u8) -> Vec<u8> {
    let buf = ImageBuffer::from_fn(64, 64, |x, y| {
        let v = ((x * 4) as u8).wrapping_add((y * 3) as u8).wrapping_add(seed);
        Rgb([v, v.wrapping_mul(2), 255 - v])
    });
    let img = DynamicImage::ImageRgb8(buf);
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

#[tokio::test]
async fn test_clean_text_auto_approves() {
    let h = harness(TextDetection::safe(), Detection::clean());

    let verdict = h
        .engine
        .moderate("req-1", "Hello, how are you?", &[], &[], &[])
        .await
        .unwrap();

    assert_eq!(verdict.action, ModerationAction::AutoApprove);
    assert!(verdict.is_clean);
    assert!(verdict.categories.is_empty());
    assert!(verdict.scores.is_empty());
}

#[tokio::test]
async fn test_empty_text_is_clean_without_classifier() {
    let h = harness(TextDetection::safe(), Detection::clean());

    let verdict = h.engine.moderate_text("req-1", "").await.unwrap();
    assert_eq!(verdict.action, ModerationAction::AutoApprove);
    assert_eq!(h.text_classifier.calls(), 0);
}

#[tokio::test]
async fn test_leet_variant_rejected_by_patterns_without_classifier() {
    let h = harness(TextDetection::safe(), Detection::clean());

    h.engine
        .add_bad_word("badword", "profanity", 0.9, None, None)
        .await
        .unwrap();
    h.engine.rebuild_filters().await.unwrap();
    assert_eq!(h.engine.pattern_count(), 1);

    let verdict = h
        .engine
        .moderate_text("req-2", "this contains b4dw0rd")
        .await
        .unwrap();

    assert_eq!(verdict.action, ModerationAction::AutoReject);
    assert_eq!(verdict.categories, vec!["profanity"]);
    let text = verdict.text.unwrap();
    assert!(text.should_reject);
    assert!(!text.nsfw_checked);
    assert_eq!(
        h.text_classifier.calls(),
        0,
        "pattern severity above the reject threshold must skip the model"
    );
}

#[tokio::test]
async fn test_classifier_unsafe_rejects_then_caches() {
    let h = harness(
        TextDetection {
            is_nsfw: true,
            safety_label: SafetyLabel::Unsafe,
            categories: vec!["Violent".to_string()],
            score: None,
        },
        Detection::clean(),
    );

    let verdict = h
        .engine
        .moderate("req-3", "kill them all", &[], &[], &[])
        .await
        .unwrap();
    assert_eq!(verdict.action, ModerationAction::AutoReject);
    assert_eq!(verdict.categories, vec!["Violent"]);
    assert_eq!(h.text_classifier.calls(), 1);

    // The identical input must come back from cache without a second
    // classifier round trip.
    let again = h
        .engine
        .moderate("req-4", "kill them all", &[], &[], &[])
        .await
        .unwrap();
    assert_eq!(again.action, ModerationAction::AutoReject);
    assert!(again.text.unwrap().cache_hit);
    assert_eq!(h.text_classifier.calls(), 1);
}

#[tokio::test]
async fn test_classifier_controversial_goes_to_review() {
    let h = harness(
        TextDetection {
            is_nsfw: true,
            safety_label: SafetyLabel::Controversial,
            categories: vec!["Politically Sensitive Topics".to_string()],
            score: None,
        },
        Detection::clean(),
    );

    let verdict = h
        .engine
        .moderate_text("req-5", "some borderline take")
        .await
        .unwrap();
    assert_eq!(verdict.action, ModerationAction::PendingReview);
    assert_eq!(verdict.categories, vec!["Politically Sensitive Topics"]);
}

#[tokio::test]
async fn test_normalized_equivalents_share_the_cache() {
    let h = harness(
        TextDetection {
            is_nsfw: true,
            safety_label: SafetyLabel::Unsafe,
            categories: vec!["Violent".to_string()],
            score: None,
        },
        Detection::clean(),
    );

    let first = h.engine.moderate_text("req-6", "Kill Them All").await.unwrap();
    // Same normalized form, different surface form.
    let second = h.engine.moderate_text("req-7", "k1ll them 4ll").await.unwrap();

    assert_eq!(first.action, second.action);
    assert!(second.text.unwrap().cache_hit);
    assert_eq!(h.text_classifier.calls(), 1);
}

#[tokio::test]
async fn test_classifier_outage_degrades_to_pattern_result() {
    let text_repo = Arc::new(MemoryTextCacheRepo::new());
    let image_repo = Arc::new(MemoryImageCacheRepo::new());
    let deps = EngineDeps {
        kv: Arc::new(MemoryKv::new()),
        text_repo: text_repo.clone(),
        image_repo,
        text_classifier: Some(Arc::new(FailingTextClassifier)),
        image_classifier: None,
        text_bit_set: Some(Arc::new(MemoryBitSet::new(TEST_BLOOM_BITS))),
        image_bit_set: Some(Arc::new(MemoryBitSet::new(TEST_BLOOM_BITS))),
        frame_source: Arc::new(NoFrameSource),
    };
    let engine = ModerationEngine::new(deps, test_config()).unwrap();

    engine
        .add_bad_word("slur", "profanity", 0.6, None, None)
        .await
        .unwrap();
    engine.rebuild_filters().await.unwrap();

    let verdict = engine
        .moderate_text("req-8", "contains slur here")
        .await
        .unwrap();

    // The outage never surfaces; the pattern score lands in the review
    // band and the result records that the model was not consulted.
    assert_eq!(verdict.action, ModerationAction::PendingReview);
    let text = verdict.text.unwrap();
    assert!(!text.nsfw_checked);
    assert!(text.should_review);
}

#[tokio::test]
async fn test_feedback_learns_flagged_phrase() {
    let h = harness(
        TextDetection {
            is_nsfw: true,
            safety_label: SafetyLabel::Unsafe,
            categories: vec!["Violent".to_string()],
            score: None,
        },
        Detection::clean(),
    );

    h.engine
        .moderate_text("req-9", "some new awful phrase")
        .await
        .unwrap();

    // Feedback runs detached; give it a beat to land.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let hash = sha256_hex(&normalize("some new awful phrase"));
    let entry = h.text_repo.get(&hash).await.unwrap().unwrap();
    assert_eq!(entry.category, "unsafe");
    assert_eq!(entry.expires_at, None);
    assert_eq!(entry.nsfw_score, 1.0);

    // The phrase and its tokens are now in the Bloom filter.
    let bloom = h.engine.text_pipeline().bloom();
    assert!(bloom.exists(hash.as_bytes()).await.unwrap());
    let token_key = sha256_hex("awful");
    assert!(bloom.exists(token_key.as_bytes()).await.unwrap());
}

#[tokio::test]
async fn test_removed_word_gone_after_rebuild() {
    let h = harness(TextDetection::safe(), Detection::clean());

    h.engine
        .add_bad_word("transient", "profanity", 0.9, None, None)
        .await
        .unwrap();
    h.engine.rebuild_filters().await.unwrap();
    assert_eq!(h.engine.pattern_count(), 1);

    h.engine.remove_bad_word("transient").await.unwrap();
    h.engine.rebuild_filters().await.unwrap();
    assert_eq!(h.engine.pattern_count(), 0);

    let verdict = h
        .engine
        .moderate_text("req-10", "mentions transient word")
        .await
        .unwrap();
    assert_eq!(verdict.action, ModerationAction::AutoApprove);
}

#[tokio::test]
async fn test_list_bad_words_pages_by_category() {
    let h = harness(TextDetection::safe(), Detection::clean());

    h.engine
        .add_bad_word("alpha", "profanity", 0.9, Some("admin"), None)
        .await
        .unwrap();
    h.engine
        .add_bad_word("beta", "spam", 0.7, Some("admin"), None)
        .await
        .unwrap();

    let (rows, total) = h
        .engine
        .list_bad_words(Some("profanity"), 10, 0)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(rows[0].normalized_content, "alpha");
    assert_eq!(rows[0].added_by, "admin");

    let (_, all) = h.engine.list_bad_words(None, 10, 0).await.unwrap();
    assert_eq!(all, 2);
}

#[tokio::test]
async fn test_known_file_hash_skips_download() {
    let h = harness(TextDetection::safe(), Detection::clean());

    let file_hash = "f".repeat(64);
    h.image_repo
        .upsert(ImageCacheEntry::new(file_hash.clone(), 99, "unsafe", 0.97))
        .await
        .unwrap();

    // The URL is unroutable; a cache hit must come back before any fetch.
    let verdict = h
        .engine
        .moderate_image("req-11", "owner-1", "x://nowhere/image.png", Some(&file_hash))
        .await
        .unwrap();

    assert_eq!(verdict.action, ModerationAction::AutoReject);
    let image = verdict.image.unwrap();
    assert!(image.cache_hit);
    assert!(image.should_reject);
    assert_eq!(h.image_classifier.calls(), 0);
}

#[tokio::test]
async fn test_near_duplicate_phash_rejects_without_classifier() {
    let h = harness(TextDetection::safe(), Detection::clean());

    let bytes = png_bytes(7);
    let phash = phash_from_bytes(&bytes).unwrap();

    // Two known-unsafe hashes 3 bits apart; the upload is 2 bits from one.
    let known_near = phash ^ 0b11;
    let known_far = known_near ^ 0b10101;
    assert_eq!(hamming_distance(known_near, known_far), 3);
    assert_eq!(hamming_distance(phash, known_near), 2);

    h.image_repo
        .upsert(ImageCacheEntry::new("aaaa", known_near, "unsafe", 0.91))
        .await
        .unwrap();
    h.image_repo
        .upsert(ImageCacheEntry::new("bbbb", known_far, "unsafe", 0.88))
        .await
        .unwrap();

    // The pHash was sighted before, so the Bloom prefilter lets the
    // similarity lookup run.
    h.engine.image_pipeline().add_phash(phash).await.unwrap();

    let result = h
        .engine
        .image_pipeline()
        .moderate_image_bytes("owner-1", &bytes, "http://img/source.png", None)
        .await
        .unwrap();

    assert!(result.should_reject);
    assert!(result.cache_hit);
    assert_eq!(result.nsfw_score, 0.91, "closest entry wins");
    assert_eq!(h.image_classifier.calls(), 0);

    // The verdict is re-keyed under the upload's own file hash.
    let new_hash = sha256_hex_bytes(&bytes);
    let entry = h.image_repo.get(&new_hash).await.unwrap().unwrap();
    assert_eq!(entry.category, "unsafe");
    assert_eq!(entry.phash, phash);
}

#[tokio::test]
async fn test_identical_bytes_cache_hit_after_first_classification() {
    let h = harness(
        TextDetection::safe(),
        Detection {
            is_nsfw: true,
            nsfw_score: 0.95,
            normal_score: 0.05,
            label: "nsfw".to_string(),
            confidence: 0.95,
        },
    );

    let bytes = png_bytes(3);
    let first = h
        .engine
        .image_pipeline()
        .moderate_image_bytes("o", &bytes, "http://img/a.png", None)
        .await
        .unwrap();
    assert!(first.should_reject);
    assert!(!first.cache_hit);
    assert_eq!(h.image_classifier.calls(), 1);

    let second = h
        .engine
        .image_pipeline()
        .moderate_image_bytes("o", &bytes, "http://img/b.png", None)
        .await
        .unwrap();
    assert!(second.should_reject);
    assert!(second.cache_hit);
    assert_eq!(h.image_classifier.calls(), 1, "byte-identical re-upload must not re-classify");
}

#[tokio::test]
async fn test_safe_image_written_back_with_expiry() {
    let h = harness(TextDetection::safe(), Detection::clean());

    let bytes = png_bytes(5);
    let result = h
        .engine
        .image_pipeline()
        .moderate_image_bytes("o", &bytes, "http://img/safe.png", None)
        .await
        .unwrap();
    assert!(result.is_clean);

    let entry = h
        .image_repo
        .get(&sha256_hex_bytes(&bytes))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.category, "safe");
    assert!(entry.expires_at.is_some(), "safe verdicts expire");
}

#[tokio::test]
async fn test_batch_preserves_order_and_tolerates_failures() {
    let h = harness(TextDetection::safe(), Detection::clean());

    let unsafe_hash = "a".repeat(64);
    let safe_hash = "b".repeat(64);
    h.image_repo
        .upsert(ImageCacheEntry::new(unsafe_hash.clone(), 1, "unsafe", 0.9))
        .await
        .unwrap();
    h.image_repo
        .upsert(ImageCacheEntry::new(safe_hash.clone(), 2, "safe", 0.05))
        .await
        .unwrap();

    let jobs = vec![
        ImageJob {
            url: "x://cached/one.png".to_string(),
            file_hash: Some(unsafe_hash),
        },
        ImageJob {
            url: "not a url at all".to_string(),
            file_hash: None,
        },
        ImageJob {
            url: "x://cached/two.png".to_string(),
            file_hash: Some(safe_hash),
        },
    ];

    let results = h.engine.moderate_images(jobs).await;
    assert_eq!(results.len(), 3);
    assert!(results[0].as_ref().unwrap().should_reject);
    assert!(results[1].is_none(), "failed slot must be empty, not an error");
    assert!(results[2].as_ref().unwrap().is_clean);
}

#[tokio::test]
async fn test_reject_dominates_review_across_modalities() {
    let h = harness(
        TextDetection {
            is_nsfw: true,
            safety_label: SafetyLabel::Controversial,
            categories: vec!["Borderline".to_string()],
            score: None,
        },
        Detection::clean(),
    );

    let unsafe_hash = "c".repeat(64);
    h.image_repo
        .upsert(ImageCacheEntry::new(unsafe_hash.clone(), 3, "unsafe", 0.96))
        .await
        .unwrap();

    // Text says review; the cached image says reject. Reject wins.
    let text_verdict = h
        .engine
        .moderate_text("req-12", "borderline text")
        .await
        .unwrap();
    assert_eq!(text_verdict.action, ModerationAction::PendingReview);

    let image_verdict = h
        .engine
        .moderate_image("req-13", "o", "x://cached/c.png", Some(&unsafe_hash))
        .await
        .unwrap();
    assert_eq!(image_verdict.action, ModerationAction::AutoReject);
}

#[tokio::test]
async fn test_audio_is_hardcoded_clean() {
    let h = harness(TextDetection::safe(), Detection::clean());
    let verdict = h
        .engine
        .moderate_audio("req-14", "http://audio/clip.mp3")
        .await
        .unwrap();
    assert_eq!(verdict.action, ModerationAction::AutoApprove);
    assert!(verdict.is_clean);
}

#[tokio::test]
async fn test_video_without_frame_source_is_clean() {
    let h = harness(TextDetection::safe(), Detection::clean());
    let verdict = h
        .engine
        .moderate_video("req-15", "http://video/v.mp4")
        .await
        .unwrap();
    assert_eq!(verdict.action, ModerationAction::AutoApprove);
    assert!(verdict.video.unwrap().frame_results.is_empty());
}

#[tokio::test]
async fn test_delete_expired_reaps_both_repos() {
    let h = harness(TextDetection::safe(), Detection::clean());

    let mut text_entry =
        modgate_store::TextCacheEntry::new("t1", "old text", "safe", 0.0);
    text_entry.expires_at = Some(chrono::Utc::now() - chrono::Duration::hours(1));
    h.text_repo.upsert(text_entry).await.unwrap();

    let mut image_entry = ImageCacheEntry::new("i1", 9, "safe", 0.0);
    image_entry.expires_at = Some(chrono::Utc::now() - chrono::Duration::hours(1));
    h.image_repo.upsert(image_entry).await.unwrap();

    let (text_reaped, image_reaped) = h.engine.delete_expired().await.unwrap();
    assert_eq!(text_reaped, 1);
    assert_eq!(image_reaped, 1);
}

#[tokio::test]
async fn test_metrics_track_requests_and_rejects() {
    let h = harness(
        TextDetection {
            is_nsfw: true,
            safety_label: SafetyLabel::Unsafe,
            categories: vec![],
            score: None,
        },
        Detection::clean(),
    );

    h.engine.moderate_text("m-1", "something awful").await.unwrap();
    h.engine.moderate_text("m-2", "something awful").await.unwrap();

    let snapshot = h.engine.metrics().snapshot();
    assert_eq!(snapshot.requests, 2);
    assert_eq!(snapshot.rejects, 2);
    assert_eq!(snapshot.cache_hits, 1);
    assert_eq!(snapshot.classifier_calls, 1);
}
