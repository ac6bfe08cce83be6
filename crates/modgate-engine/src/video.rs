//! Video moderation as a reducer over sampled frames
//!
//! Frame extraction is an external collaborator behind [`FrameSource`];
//! the pipeline feeds each sampled frame through image moderation and
//! aggregates the maxima. Audio is out of scope.

use std::sync::Arc;

use async_trait::async_trait;
use modgate_core::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::VideoPipelineConfig;
use crate::image::{ImagePipeline, ImageResult};

/// Supplies sampled frame URLs for a video.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Sample at most `max_frames` frame URLs, one per `interval_secs`.
    async fn sample_frames(
        &self,
        video_url: &str,
        interval_secs: u32,
        max_frames: usize,
    ) -> Result<Vec<String>>;
}

/// Frame source for deployments without a video decoder; every video
/// reduces to zero frames and comes back clean.
pub struct NoFrameSource;

#[async_trait]
impl FrameSource for NoFrameSource {
    async fn sample_frames(
        &self,
        _video_url: &str,
        _interval_secs: u32,
        _max_frames: usize,
    ) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Result of video moderation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoResult {
    pub is_clean: bool,
    pub frame_results: Vec<ImageResult>,
    pub max_nsfw_score: f64,
    pub max_violence_score: f64,
    pub should_reject: bool,
    pub should_review: bool,
}

impl VideoResult {
    fn clean() -> Self {
        Self {
            is_clean: true,
            ..Default::default()
        }
    }
}

/// The video moderation reducer.
pub struct VideoPipeline {
    image: ImagePipeline,
    frames: Arc<dyn FrameSource>,
    config: VideoPipelineConfig,
}

impl VideoPipeline {
    pub fn new(
        image: ImagePipeline,
        frames: Arc<dyn FrameSource>,
        config: VideoPipelineConfig,
    ) -> Self {
        Self {
            image,
            frames,
            config,
        }
    }

    /// Moderate a video by URL.
    pub async fn moderate_video_url(&self, url: &str) -> Result<VideoResult> {
        let mut frames = match self
            .frames
            .sample_frames(url, self.config.frame_interval_secs, self.config.max_frames)
            .await
        {
            Ok(frames) => frames,
            Err(e) => {
                warn!(url, error = %e, "frame sampling failed, passing video through");
                return Ok(VideoResult::clean());
            }
        };
        frames.truncate(self.config.max_frames);

        let mut result = VideoResult::clean();
        for frame_url in frames {
            let frame = match self.image.moderate_image_url("", &frame_url, None).await {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(frame_url = %frame_url, error = %e, "frame moderation failed, skipping");
                    continue;
                }
            };

            if !frame.is_clean {
                result.is_clean = false;
            }
            if frame.nsfw_score > result.max_nsfw_score {
                result.max_nsfw_score = frame.nsfw_score;
            }
            if let Some(&violence) = frame.categories.get("violence") {
                if violence > result.max_violence_score {
                    result.max_violence_score = violence;
                }
            }
            result.should_review |= frame.should_review;
            let reject = frame.should_reject;
            result.frame_results.push(frame);
            if reject {
                result.should_reject = true;
                break;
            }
        }

        Ok(result)
    }
}
