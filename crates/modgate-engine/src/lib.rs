//! modgate Engine
//!
//! The moderation dispatcher: a multi-tier pipeline combining a Bloom
//! prefilter, an Aho-Corasick phrase matcher, a perceptual-hash
//! near-duplicate index, a two-level cache, and an external AI classifier
//! as last resort. Confirmed positives feed back into the cheap layers so
//! future identical or near-identical inputs skip the classifier.

pub mod config;
pub mod engine;
pub mod feedback;
pub mod image;
pub mod metrics;
pub mod text;
pub mod video;

pub use config::{EngineConfig, ImagePipelineConfig, TextPipelineConfig, VideoPipelineConfig};
pub use engine::{EngineDeps, ModerationEngine, ModerationVerdict};
pub use feedback::{FeedbackHandler, LearningFeedback};
pub use image::{ImageJob, ImagePipeline, ImageResult};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use text::{TextPipeline, TextResult};
pub use video::{FrameSource, NoFrameSource, VideoPipeline, VideoResult};

/// Default text safety model identifier recorded in cache entries.
pub const TEXT_MODEL_VERSION: &str = "Qwen/Qwen3Guard-Gen-0.6B";

/// Default image detection model identifier recorded in cache entries.
pub const IMAGE_MODEL_VERSION: &str = "Falconsai/nsfw_image_detection";
