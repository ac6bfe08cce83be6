//! NSFW image classifier client

use async_trait::async_trait;
use modgate_core::{Error, Result};
use serde::Deserialize;

use crate::types::{ClassifierConfig, Detection, UrlDetection};

/// Opaque scorer for image content.
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    /// Score raw image bytes.
    async fn predict(&self, image: &[u8]) -> Result<Detection>;

    /// Score an image the service fetches itself.
    async fn predict_from_url(&self, url: &str) -> Result<Detection>;

    /// Score a batch of public URLs; slots fail independently.
    async fn predict_batch_from_urls(&self, urls: &[String]) -> Result<Vec<UrlDetection>>;

    /// Probe service health.
    async fn health_check(&self) -> Result<()>;
}

/// HTTP client for the NSFW image detection service
/// (Falconsai/nsfw_image_detection deployment).
pub struct HttpImageClassifier {
    config: ClassifierConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    is_nsfw: bool,
    nsfw_score: f64,
    normal_score: f64,
    label: String,
    confidence: f64,
}

impl From<ApiResponse> for Detection {
    fn from(resp: ApiResponse) -> Self {
        Self {
            is_nsfw: resp.is_nsfw,
            nsfw_score: resp.nsfw_score,
            normal_score: resp.normal_score,
            label: resp.label,
            confidence: resp.confidence,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    predictions: Vec<BatchPrediction>,
}

#[derive(Debug, Deserialize)]
struct BatchPrediction {
    url: String,
    #[serde(default)]
    is_nsfw: bool,
    #[serde(default)]
    nsfw_score: f64,
    #[serde(default)]
    normal_score: f64,
    #[serde(default)]
    label: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    error: Option<String>,
}

impl HttpImageClassifier {
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
                "image classifier returned status {status}: {body}"
            )));
        }
        resp.json::<T>()
            .await
            .map_err(|e| Error::classifier(format!("failed to parse response: {e}")))
    }
}

#[async_trait]
impl ImageClassifier for HttpImageClassifier {
    async fn predict(&self, image: &[u8]) -> Result<Detection> {
        let part = reqwest::multipart::Part::bytes(image.to_vec()).file_name("image.jpg");
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(self.endpoint("/predict"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::classifier(format!("image classifier unreachable: {e}")))?;

        let api: ApiResponse = Self::decode(resp).await?;
        Ok(api.into())
    }

    async fn predict_from_url(&self, url: &str) -> Result<Detection> {
        let resp = self
            .client
            .post(self.endpoint("/predict/url"))
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .map_err(|e| Error::classifier(format!("image classifier unreachable: {e}")))?;

        let api: ApiResponse = Self::decode(resp).await?;
        Ok(api.into())
    }

    async fn predict_batch_from_urls(&self, urls: &[String]) -> Result<Vec<UrlDetection>> {
        let resp = self
            .client
            .post(self.endpoint("/predict/batch/url"))
            .json(&serde_json::json!({ "urls": urls }))
            .send()
            .await
            .map_err(|e| Error::classifier(format!("image classifier unreachable: {e}")))?;

        let batch: BatchResponse = Self::decode(resp).await?;
        Ok(batch
            .predictions
            .into_iter()
            .map(|p| {
                if let Some(error) = p.error {
                    UrlDetection {
                        url: p.url,
                        result: None,
                        error: Some(error),
                    }
                } else {
                    UrlDetection {
                        url: p.url.clone(),
                        result: Some(Detection {
                            is_nsfw: p.is_nsfw,
                            nsfw_score: p.nsfw_score,
                            normal_score: p.normal_score,
                            label: p.label,
                            confidence: p.confidence,
                        }),
                        error: None,
                    }
                }
            })
            .collect())
    }

    async fn health_check(&self) -> Result<()> {
        let resp = self
            .client
            .get(self.endpoint("/health"))
            .send()
            .await
            .map_err(|e| {
                Error::classifier(format!(
                    "image classifier not reachable at {}: {e}",
                    self.config.base_url
                ))
            })?;

        if !resp.status().is_success() {
            return Err(Error::classifier(format!(
                "image classifier returned status {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_cleanly() {
        let classifier =
            HttpImageClassifier::new(ClassifierConfig::new("http://localhost:8080/")).unwrap();
        assert_eq!(
            classifier.endpoint("/predict"),
            "http://localhost:8080/predict"
        );
    }

    #[test]
    fn test_api_response_decodes() {
        let json = r#"{
            "is_nsfw": true,
            "nsfw_score": 0.92,
            "normal_score": 0.08,
            "label": "nsfw",
            "confidence": 0.92
        }"#;
        let api: ApiResponse = serde_json::from_str(json).unwrap();
        let detection: Detection = api.into();
        assert!(detection.is_nsfw);
        assert_eq!(detection.nsfw_score, 0.92);
    }

    #[test]
    fn test_batch_response_tolerates_error_slots() {
        let json = r#"{
            "predictions": [
                {"url": "http://a", "is_nsfw": false, "nsfw_score": 0.1,
                 "normal_score": 0.9, "label": "normal", "confidence": 0.9},
                {"url": "http://b", "error": "fetch failed"}
            ]
        }"#;
        let batch: BatchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(batch.predictions.len(), 2);
        assert!(batch.predictions[1].error.is_some());
    }
}
