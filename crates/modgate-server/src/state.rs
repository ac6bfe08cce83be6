//! Application state wiring

use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;
use modgate_classifiers::{
    ClassifierConfig, HttpImageClassifier, HttpTextClassifier, ImageClassifier, TextClassifier,
};
use modgate_engine::{EngineDeps, ModerationEngine, NoFrameSource};
use modgate_filters::MemoryBitSet;
use modgate_store::{CacheKv, MemoryImageCacheRepo, MemoryKv, MemoryTextCacheRepo, RedisKv};
use tracing::{info, warn};

use crate::config::ServerConfig;

/// Shared application state behind the routes.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ModerationEngine>,
    pub metrics_handle: PrometheusHandle,
}

impl AppState {
    /// Build the engine from configuration: Redis-backed KV and Bloom bit
    /// arrays when a Redis URL is configured, in-memory otherwise. The
    /// durable repositories run in-memory here; a SQL deployment plugs
    /// its own implementations into [`EngineDeps`].
    pub async fn new(
        config: &ServerConfig,
        metrics_handle: PrometheusHandle,
    ) -> anyhow::Result<Self> {
        let (kv, use_kv_bitsets): (Arc<dyn CacheKv>, bool) = match &config.redis_url {
            Some(url) => {
                info!(url, "connecting to redis");
                (Arc::new(RedisKv::connect(url).await?), true)
            }
            None => {
                info!("no redis configured, using in-memory cache");
                (Arc::new(MemoryKv::new()), false)
            }
        };

        let image_classifier: Option<Arc<dyn ImageClassifier>> =
            match &config.image_classifier_url {
                Some(url) => {
                    info!(url, "image classifier configured");
                    Some(Arc::new(HttpImageClassifier::new(ClassifierConfig::new(
                        url,
                    ))?))
                }
                None => {
                    warn!("image classifier not configured, image detection disabled");
                    None
                }
            };

        let text_classifier: Option<Arc<dyn TextClassifier>> = match &config.text_classifier_url {
            Some(url) => {
                info!(url, "text classifier configured");
                Some(Arc::new(HttpTextClassifier::new(ClassifierConfig::new(
                    url,
                ))?))
            }
            None => {
                warn!("text classifier not configured, text detection is pattern-only");
                None
            }
        };

        let deps = EngineDeps {
            kv,
            text_repo: Arc::new(MemoryTextCacheRepo::new()),
            image_repo: Arc::new(MemoryImageCacheRepo::new()),
            text_classifier,
            image_classifier,
            text_bit_set: (!use_kv_bitsets)
                .then(|| -> Arc<dyn modgate_filters::BitSet> {
                    Arc::new(MemoryBitSet::new(config.engine.text.bloom_bits))
                }),
            image_bit_set: (!use_kv_bitsets)
                .then(|| -> Arc<dyn modgate_filters::BitSet> {
                    Arc::new(MemoryBitSet::new(config.engine.image.bloom_bits))
                }),
            frame_source: Arc::new(NoFrameSource),
        };

        let engine = Arc::new(ModerationEngine::new(deps, config.engine.clone())?);

        // Load whatever bad-phrase set the store already has.
        match engine.rebuild_filters().await {
            Ok(count) => info!(count, "loaded bad-phrase filters"),
            Err(e) => warn!(error = %e, "initial filter rebuild failed"),
        }

        Self::spawn_expiry_sweep(engine.clone(), config.expire_sweep_secs);

        Ok(Self {
            engine,
            metrics_handle,
        })
    }

    /// Background reaper for expired cache rows.
    fn spawn_expiry_sweep(engine: Arc<ModerationEngine>, interval_secs: u64) {
        if interval_secs == 0 {
            return;
        }
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = engine.delete_expired().await {
                    warn!(error = %e, "expired-entry sweep failed");
                }
            }
        });
    }
}
