//! Classifier request/response types

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration shared by the classifier clients.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Base URL of the classifier service, e.g. "http://localhost:8080"
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl ClassifierConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Result of NSFW image detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub is_nsfw: bool,
    /// 0.0 to 1.0
    pub nsfw_score: f64,
    pub normal_score: f64,
    pub label: String,
    pub confidence: f64,
}

impl Detection {
    /// A clean detection with zero scores.
    pub fn clean() -> Self {
        Self {
            is_nsfw: false,
            nsfw_score: 0.0,
            normal_score: 1.0,
            label: "normal".to_string(),
            confidence: 0.0,
        }
    }
}

/// One slot of a batch URL prediction; either a result or an error string.
#[derive(Debug, Clone)]
pub struct UrlDetection {
    pub url: String,
    pub result: Option<Detection>,
    pub error: Option<String>,
}

/// Coarse safety grade assigned by the text classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyLabel {
    Safe,
    Controversial,
    Unsafe,
}

impl SafetyLabel {
    /// Case-insensitive parse; unknown labels grade as safe.
    pub fn parse(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "unsafe" => Self::Unsafe,
            "controversial" => Self::Controversial,
            _ => Self::Safe,
        }
    }
}

/// Result of text safety classification.
#[derive(Debug, Clone, PartialEq)]
pub struct TextDetection {
    pub is_nsfw: bool,
    pub safety_label: SafetyLabel,
    /// Category tags, e.g. "Violent" or "Politically Sensitive Topics"
    pub categories: Vec<String>,
    /// Numeric severity, when the model reports one
    pub score: Option<f64>,
}

impl TextDetection {
    /// A clean detection.
    pub fn safe() -> Self {
        Self {
            is_nsfw: false,
            safety_label: SafetyLabel::Safe,
            categories: Vec::new(),
            score: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safety_label_parse() {
        assert_eq!(SafetyLabel::parse("Unsafe"), SafetyLabel::Unsafe);
        assert_eq!(SafetyLabel::parse("unsafe"), SafetyLabel::Unsafe);
        assert_eq!(SafetyLabel::parse("CONTROVERSIAL"), SafetyLabel::Controversial);
        assert_eq!(SafetyLabel::parse("Safe"), SafetyLabel::Safe);
        assert_eq!(SafetyLabel::parse("something else"), SafetyLabel::Safe);
    }

    #[test]
    fn test_clean_detection() {
        let d = Detection::clean();
        assert!(!d.is_nsfw);
        assert_eq!(d.nsfw_score, 0.0);
    }
}
