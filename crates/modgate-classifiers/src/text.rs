//! Text safety classifier client

use async_trait::async_trait;
use modgate_core::{Error, Result};
use serde::Deserialize;

use crate::types::{ClassifierConfig, SafetyLabel, TextDetection};

/// Opaque scorer for text content.
#[async_trait]
pub trait TextClassifier: Send + Sync {
    /// Grade a single text.
    async fn predict(&self, text: &str) -> Result<TextDetection>;

    /// Grade a batch of texts in one round trip.
    async fn predict_batch(&self, texts: &[String]) -> Result<Vec<TextDetection>>;

    /// Probe service health.
    async fn health_check(&self) -> Result<()>;
}

/// HTTP client for the text safety service (Qwen3Guard deployment).
pub struct HttpTextClassifier {
    config: ClassifierConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    is_nsfw: bool,
    safety_label: String,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    score: Option<f64>,
}

impl From<ApiResponse> for TextDetection {
    fn from(resp: ApiResponse) -> Self {
        Self {
            is_nsfw: resp.is_nsfw,
            safety_label: SafetyLabel::parse(&resp.safety_label),
            categories: resp.categories,
            score: resp.score,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    predictions: Vec<ApiResponse>,
}

impl HttpTextClassifier {
    /// Create a new client against the configured base URL.
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::classifier(format!("failed to build http client: {e}")))?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn decode<T: for<'de> Deserialize<'de>>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::classifier(format!(
                "text classifier returned status {status}: {body}"
            )));
        }
        resp.json::<T>()
            .await
            .map_err(|e| Error::classifier(format!("failed to parse response: {e}")))
    }
}

#[async_trait]
impl TextClassifier for HttpTextClassifier {
    async fn predict(&self, text: &str) -> Result<TextDetection> {
        let resp = self
            .client
            .post(self.endpoint("/predict"))
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| Error::classifier(format!("text classifier unreachable: {e}")))?;

        let api: ApiResponse = Self::decode(resp).await?;
        Ok(api.into())
    }

    async fn predict_batch(&self, texts: &[String]) -> Result<Vec<TextDetection>> {
        let resp = self
            .client
            .post(self.endpoint("/predict/batch"))
            .json(&serde_json::json!({ "texts": texts }))
            .send()
            .await
            .map_err(|e| Error::classifier(format!("text classifier unreachable: {e}")))?;

        let batch: BatchResponse = Self::decode(resp).await?;
        Ok(batch.predictions.into_iter().map(Into::into).collect())
    }

    async fn health_check(&self) -> Result<()> {
        let resp = self
            .client
            .get(self.endpoint("/health"))
            .send()
            .await
            .map_err(|e| {
                Error::classifier(format!(
                    "text classifier not reachable at {}: {e}",
                    self.config.base_url
                ))
            })?;

        if !resp.status().is_success() {
            return Err(Error::classifier(format!(
                "text classifier returned status {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
