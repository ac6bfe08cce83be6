//! Engine configuration

use serde::{Deserialize, Serialize};

/// Configuration for the whole moderation engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub text: TextPipelineConfig,

    #[serde(default)]
    pub image: ImagePipelineConfig,

    #[serde(default)]
    pub video: VideoPipelineConfig,
}

/// Configuration for the text moderation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextPipelineConfig {
    /// KV key of the bad-word Bloom bit array
    #[serde(default = "default_text_bloom_key")]
    pub bloom_key: String,

    /// Bloom filter size in bits
    #[serde(default = "default_text_bloom_bits")]
    pub bloom_bits: u64,

    /// Number of Bloom hash functions
    #[serde(default = "default_text_bloom_hashes")]
    pub bloom_hashes: u32,

    /// Severity at or above which content is auto-rejected
    #[serde(default = "default_reject_threshold")]
    pub reject_threshold: f64,

    /// Severity at or above which content goes to manual review
    #[serde(default = "default_review_threshold")]
    pub review_threshold: f64,

    /// L1 cache key prefix
    #[serde(default = "default_text_cache_prefix")]
    pub cache_key_prefix: String,

    /// L1 cache TTL in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for TextPipelineConfig {
    fn default() -> Self {
        Self {
            bloom_key: default_text_bloom_key(),
            bloom_bits: default_text_bloom_bits(),
            bloom_hashes: default_text_bloom_hashes(),
            reject_threshold: default_reject_threshold(),
            review_threshold: default_review_threshold(),
            cache_key_prefix: default_text_cache_prefix(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Configuration for the image moderation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePipelineConfig {
    /// KV key of the bad-image Bloom bit array
    #[serde(default = "default_image_bloom_key")]
    pub bloom_key: String,

    /// Bloom filter size in bits
    #[serde(default = "default_image_bloom_bits")]
    pub bloom_bits: u64,

    /// Number of Bloom hash functions
    #[serde(default = "default_image_bloom_hashes")]
    pub bloom_hashes: u32,

    /// NSFW score at or above which an image is rejected
    #[serde(default = "default_nsfw_threshold")]
    pub nsfw_threshold: f64,

    /// Maximum Hamming distance for a near-duplicate pHash hit
    #[serde(default = "default_max_phash_distance")]
    pub max_phash_distance: u32,

    /// Image download timeout in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// L1 cache key prefix
    #[serde(default = "default_image_cache_prefix")]
    pub cache_key_prefix: String,

    /// L1 cache TTL in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Fixed worker pool size for batch moderation
    #[serde(default = "default_batch_workers")]
    pub batch_workers: usize,
}

impl Default for ImagePipelineConfig {
    fn default() -> Self {
        Self {
            bloom_key: default_image_bloom_key(),
            bloom_bits: default_image_bloom_bits(),
            bloom_hashes: default_image_bloom_hashes(),
            nsfw_threshold: default_nsfw_threshold(),
            max_phash_distance: default_max_phash_distance(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            cache_key_prefix: default_image_cache_prefix(),
            cache_ttl_secs: default_cache_ttl_secs(),
            batch_workers: default_batch_workers(),
        }
    }
}

/// Configuration for the video frame reducer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoPipelineConfig {
    /// Sample one frame per this many seconds
    #[serde(default = "default_frame_interval_secs")]
    pub frame_interval_secs: u32,

    /// Check at most this many frames
    #[serde(default = "default_max_frames")]
    pub max_frames: usize,
}

impl Default for VideoPipelineConfig {
    fn default() -> Self {
        Self {
            frame_interval_secs: default_frame_interval_secs(),
            max_frames: default_max_frames(),
        }
    }
}

fn default_text_bloom_key() -> String {
    "moderation:bloom:badwords".to_string()
}

fn default_text_bloom_bits() -> u64 {
    // 8 million bits = 1MB
    8 * 1024 * 1024
}

fn default_text_bloom_hashes() -> u32 {
    5
}

fn default_reject_threshold() -> f64 {
    0.85
}

fn default_review_threshold() -> f64 {
    0.5
}

fn default_text_cache_prefix() -> String {
    "moderation:text:".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_image_bloom_key() -> String {
    "moderation:image:bloom".to_string()
}

fn default_image_bloom_bits() -> u64 {
    1 << 20
}

fn default_image_bloom_hashes() -> u32 {
    7
}

fn default_nsfw_threshold() -> f64 {
    0.7
}

fn default_max_phash_distance() -> u32 {
    10
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_image_cache_prefix() -> String {
    "moderation:image:".to_string()
}

fn default_batch_workers() -> usize {
    4
}

fn default_frame_interval_secs() -> u32 {
    5
}

fn default_max_frames() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.text.bloom_bits, 8_388_608);
        assert_eq!(config.text.bloom_hashes, 5);
        assert_eq!(config.text.reject_threshold, 0.85);
        assert_eq!(config.text.review_threshold, 0.5);
        assert_eq!(config.image.bloom_bits, 1_048_576);
        assert_eq!(config.image.bloom_hashes, 7);
        assert_eq!(config.image.nsfw_threshold, 0.7);
        assert_eq!(config.image.max_phash_distance, 10);
        assert_eq!(config.image.batch_workers, 4);
        assert_eq!(config.video.frame_interval_secs, 5);
        assert_eq!(config.video.max_frames, 10);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let value = serde_json::json!({ "text": { "reject_threshold": 0.9 } });
        let config: EngineConfig = serde_json::from_value(value).unwrap();
        assert_eq!(config.text.reject_threshold, 0.9);
        assert_eq!(config.text.review_threshold, 0.5);
        assert_eq!(config.image.nsfw_threshold, 0.7);
    }
}
