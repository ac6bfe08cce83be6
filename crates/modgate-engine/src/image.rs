//! Image moderation pipeline
//!
//! Layered like the text pipeline, with a byte-exact cache and a
//! perceptual near-duplicate index in front of the classifier:
//! 1. L1/L2 cache by SHA-256 file hash (no download on a hit)
//! 2. One HTTP fetch, then a re-check with the freshly computed hash
//! 3. Bloom prefilter on the pHash, confirmed by a Hamming-bounded
//!    similarity lookup against known-unsafe images
//! 4. NSFW classifier on the raw bytes as last resort
//! 5. Writeback under the file hash; unsafe pHashes enter the Bloom

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use modgate_classifiers::ImageClassifier;
use modgate_core::fingerprint::sha256_hex_bytes;
use modgate_core::{Category, Error, Result};
use modgate_filters::{phash_from_bytes, phash_to_bytes, Bloom};
use modgate_store::{CacheKv, ImageCacheEntry, ImageCacheRepo};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::ImagePipelineConfig;

/// Result of image moderation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageResult {
    pub is_clean: bool,
    /// Category tag to confidence score
    pub categories: HashMap<String, f64>,
    pub should_reject: bool,
    pub should_review: bool,
    /// 64-bit perceptual hash of the image
    pub phash: u64,
    pub nsfw_score: f64,
    /// Whether the verdict came from a cache level or the similarity index
    pub cache_hit: bool,
}

impl ImageResult {
    fn clean(phash: u64) -> Self {
        Self {
            is_clean: true,
            phash,
            ..Default::default()
        }
    }
}

/// One unit of batch work.
#[derive(Debug, Clone)]
pub struct ImageJob {
    pub url: String,
    pub file_hash: Option<String>,
}

/// JSON envelope stored in the L1 cache.
#[derive(Debug, Serialize, Deserialize)]
struct ImageEnvelope {
    category: String,
    nsfw_score: f64,
    is_clean: bool,
    should_reject: bool,
    should_review: bool,
    phash: u64,
}

impl ImageEnvelope {
    fn to_result(&self) -> ImageResult {
        let mut categories = HashMap::new();
        if self.nsfw_score > 0.0 {
            categories.insert("nsfw".to_string(), self.nsfw_score);
        }
        ImageResult {
            is_clean: self.is_clean,
            categories,
            should_reject: self.should_reject,
            should_review: self.should_review,
            phash: self.phash,
            nsfw_score: self.nsfw_score,
            cache_hit: true,
        }
    }

    fn from_entry(entry: &ImageCacheEntry) -> Self {
        let is_safe = Category::parse(&entry.category) == Some(Category::Safe);
        Self {
            category: entry.category.clone(),
            nsfw_score: entry.nsfw_score,
            is_clean: is_safe,
            should_reject: !is_safe,
            should_review: false,
            phash: entry.phash,
        }
    }
}

/// The image moderation pipeline.
#[derive(Clone)]
pub struct ImagePipeline {
    kv: Arc<dyn CacheKv>,
    bloom: Bloom,
    repo: Arc<dyn ImageCacheRepo>,
    classifier: Option<Arc<dyn ImageClassifier>>,
    http: reqwest::Client,
    config: ImagePipelineConfig,
}

impl ImagePipeline {
    pub fn new(
        kv: Arc<dyn CacheKv>,
        bloom: Bloom,
        repo: Arc<dyn ImageCacheRepo>,
        classifier: Option<Arc<dyn ImageClassifier>>,
        config: ImagePipelineConfig,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            kv,
            bloom,
            repo,
            classifier,
            http,
            config,
        })
    }

    /// Handle to the bad-image Bloom filter.
    pub fn bloom(&self) -> &Bloom {
        &self.bloom
    }

    /// Moderate an image by URL.
    ///
    /// When the caller already knows the file hash, cached verdicts are
    /// served without any download.
    pub async fn moderate_image_url(
        &self,
        owner_id: &str,
        url: &str,
        file_hash: Option<&str>,
    ) -> Result<ImageResult> {
        debug!(owner_id, url, "moderating image url");

        if let Some(hash) = file_hash {
            if let Some(result) = self.check_caches(hash).await {
                return Ok(result);
            }
        }

        let bytes = self.fetch(url).await?;
        self.moderate_image_bytes(owner_id, &bytes, url, file_hash)
            .await
    }

    /// Moderate raw image bytes.
    pub async fn moderate_image_bytes(
        &self,
        _owner_id: &str,
        bytes: &[u8],
        source_url: &str,
        file_hash: Option<&str>,
    ) -> Result<ImageResult> {
        let computed;
        let file_hash = match file_hash {
            Some(hash) => hash,
            None => {
                computed = sha256_hex_bytes(bytes);
                // The caller-supplied hash was absent, so this is the
                // first time the caches can be consulted for these bytes.
                if let Some(result) = self.check_caches(&computed).await {
                    return Ok(result);
                }
                &computed
            }
        };

        let phash = phash_from_bytes(bytes)?;

        if let Some(result) = self.check_similar(file_hash, phash, source_url).await {
            return Ok(result);
        }

        let Some(classifier) = &self.classifier else {
            debug!("image classifier not configured, skipping detection");
            return Ok(ImageResult::clean(phash));
        };

        let detection = match classifier.predict(bytes).await {
            Ok(detection) => detection,
            Err(e) => {
                // Degrade to clean without writeback; the next submission
                // retries the classifier.
                warn!(error = %e, "image classifier unavailable, returning clean");
                return Ok(ImageResult::clean(phash));
            }
        };

        let mut result = ImageResult::clean(phash);
        result.nsfw_score = detection.nsfw_score;
        result
            .categories
            .insert("nsfw".to_string(), detection.nsfw_score);

        if detection.is_nsfw || detection.nsfw_score >= self.config.nsfw_threshold {
            result.is_clean = false;
            result.should_reject = true;
        }

        self.write_back(file_hash, &result, source_url).await;

        Ok(result)
    }

    /// Moderate a batch of URLs on a fixed-size worker pool.
    ///
    /// Results come back in input order; a failed job yields `None` in
    /// its slot. The job channel is bounded by the worker count, so a
    /// caller pushing faster than the pool drains blocks on the send.
    /// Dropping the returned future aborts the workers.
    pub async fn moderate_image_urls(&self, jobs: Vec<ImageJob>) -> Vec<Option<ImageResult>> {
        let total = jobs.len();
        if total == 0 {
            return Vec::new();
        }

        let workers = self.config.batch_workers.clamp(1, total);
        let (tx, rx) = mpsc::channel::<(usize, ImageJob)>(workers);
        let rx = Arc::new(Mutex::new(rx));

        let mut pool = JoinSet::new();
        for _ in 0..workers {
            let pipeline = self.clone();
            let rx = Arc::clone(&rx);
            pool.spawn(async move {
                let mut done: Vec<(usize, Option<ImageResult>)> = Vec::new();
                loop {
                    let job = rx.lock().await.recv().await;
                    let Some((index, job)) = job else {
                        break;
                    };
                    match pipeline
                        .moderate_image_url("", &job.url, job.file_hash.as_deref())
                        .await
                    {
                        Ok(result) => done.push((index, Some(result))),
                        Err(e) => {
                            warn!(url = %job.url, error = %e, "image batch job failed");
                            done.push((index, None));
                        }
                    }
                }
                done
            });
        }

        for (index, job) in jobs.into_iter().enumerate() {
            if tx.send((index, job)).await.is_err() {
                break;
            }
        }
        drop(tx);

        let mut out: Vec<Option<ImageResult>> = vec![None; total];
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(done) => {
                    for (index, result) in done {
                        out[index] = result;
                    }
                }
                Err(e) => warn!(error = %e, "image batch worker failed"),
            }
        }
        out
    }

    /// Add a pHash to the Bloom filter, used by filter rebuilds.
    pub async fn add_phash(&self, phash: u64) -> Result<()> {
        self.bloom.add(&phash_to_bytes(phash)).await
    }

    /// L1 then L2 lookup by file hash; L2 hits write through to L1.
    async fn check_caches(&self, file_hash: &str) -> Option<ImageResult> {
        match self.kv.get_bytes(&self.cache_key(file_hash)).await {
            Ok(Some(raw)) => match serde_json::from_slice::<ImageEnvelope>(&raw) {
                Ok(envelope) => {
                    debug!(file_hash, "image l1 cache hit");
                    return Some(envelope.to_result());
                }
                Err(e) => warn!(error = %e, "corrupt image cache envelope, ignoring"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "image l1 cache read failed, treating as miss"),
        }

        match self.repo.get(file_hash).await {
            Ok(Some(entry)) => {
                debug!(file_hash, "image l2 cache hit");
                let envelope = ImageEnvelope::from_entry(&entry);
                self.write_l1(file_hash, &envelope).await;
                Some(envelope.to_result())
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "image cache repo read failed, treating as miss");
                None
            }
        }
    }

    /// Bloom-guarded near-duplicate lookup. A hit rejects without calling
    /// the classifier and is written back under the new file hash so the
    /// next identical upload short-circuits on L1.
    async fn check_similar(
        &self,
        file_hash: &str,
        phash: u64,
        source_url: &str,
    ) -> Option<ImageResult> {
        let possible = match self.bloom.exists(&phash_to_bytes(phash)).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(error = %e, "image bloom check failed, assuming possible match");
                true
            }
        };
        if !possible {
            return None;
        }

        let similar = match self
            .repo
            .find_similar_by_phash(phash, self.config.max_phash_distance)
            .await
        {
            Ok(similar) => similar,
            Err(e) => {
                warn!(error = %e, "phash similarity lookup failed, treating as miss");
                return None;
            }
        };
        let matched = similar.first()?;

        debug!(
            file_hash,
            matched_hash = %matched.file_hash,
            "near-duplicate of known-unsafe image"
        );

        let mut result = ImageResult {
            is_clean: false,
            should_reject: true,
            phash,
            nsfw_score: matched.nsfw_score,
            cache_hit: true,
            ..Default::default()
        };
        result
            .categories
            .insert("nsfw".to_string(), matched.nsfw_score);

        let mut entry = ImageCacheEntry::new(
            file_hash,
            phash,
            matched.category.clone(),
            matched.nsfw_score,
        );
        entry.model_version = matched.model_version.clone();
        entry.source_url = source_url.to_string();
        entry.detect_result = serde_json::to_value(&result).unwrap_or_default();
        if let Err(e) = self.repo.upsert(entry).await {
            warn!(error = %e, "image cache repo write failed");
        }

        let envelope = ImageEnvelope {
            category: matched.category.clone(),
            nsfw_score: matched.nsfw_score,
            is_clean: false,
            should_reject: true,
            should_review: false,
            phash,
        };
        self.write_l1(file_hash, &envelope).await;

        if let Err(e) = self.bloom.add(&phash_to_bytes(phash)).await {
            warn!(error = %e, "failed to add phash to bloom");
        }

        Some(result)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::image_unavailable(format!("failed to fetch {url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::image_unavailable(format!(
                "unexpected status {status} fetching {url}"
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::image_unavailable(format!("failed to read {url}: {e}")))?;
        Ok(bytes.to_vec())
    }

    fn cache_key(&self, file_hash: &str) -> String {
        format!("{}{}", self.config.cache_key_prefix, file_hash)
    }

    async fn write_l1(&self, file_hash: &str, envelope: &ImageEnvelope) {
        let raw = match serde_json::to_vec(envelope) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "failed to encode image cache envelope");
                return;
            }
        };
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        if let Err(e) = self
            .kv
            .set_bytes(&self.cache_key(file_hash), &raw, Some(ttl))
            .await
        {
            warn!(error = %e, "image l1 cache write failed");
        }
    }

    /// Writeback never fails the moderation call.
    async fn write_back(&self, file_hash: &str, result: &ImageResult, source_url: &str) {
        let category = if result.should_reject { "unsafe" } else { "safe" };

        let mut entry = ImageCacheEntry::new(file_hash, result.phash, category, result.nsfw_score);
        entry.model_version = crate::IMAGE_MODEL_VERSION.to_string();
        entry.source_url = source_url.to_string();
        entry.detect_result = serde_json::to_value(result).unwrap_or_default();
        if !result.should_reject {
            entry.expires_at =
                Some(Utc::now() + chrono::Duration::seconds(self.config.cache_ttl_secs as i64));
        }
        if let Err(e) = self.repo.upsert(entry).await {
            warn!(error = %e, "image cache repo write failed");
        }

        let envelope = ImageEnvelope {
            category: category.to_string(),
            nsfw_score: result.nsfw_score,
            is_clean: result.is_clean,
            should_reject: result.should_reject,
            should_review: result.should_review,
            phash: result.phash,
        };
        self.write_l1(file_hash, &envelope).await;

        if result.should_reject {
            if let Err(e) = self.bloom.add(&phash_to_bytes(result.phash)).await {
                warn!(error = %e, "failed to add phash to bloom");
            }
        }
    }
}
