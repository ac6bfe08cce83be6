//! Server configuration

use std::path::Path;

use modgate_engine::EngineConfig;
use serde::{Deserialize, Serialize};

/// Server configuration, loaded from YAML with CLI overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Redis connection URL; without it the server runs on in-memory
    /// storage (single-process deployments and development)
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Base URL of the NSFW image classifier service
    #[serde(default)]
    pub image_classifier_url: Option<String>,

    /// Base URL of the text safety classifier service
    #[serde(default)]
    pub text_classifier_url: Option<String>,

    /// Seconds between expired-entry sweeps
    #[serde(default = "default_sweep_secs")]
    pub expire_sweep_secs: u64,

    /// Engine configuration
    #[serde(default)]
    pub engine: EngineConfig,
}

impl ServerConfig {
    /// Load configuration from file and CLI overrides
    pub fn load(config_path: &str, cli: &crate::Cli) -> anyhow::Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let content = std::fs::read_to_string(config_path)?;
            serde_yaml::from_str(&content)?
        } else {
            Self::default()
        };

        if let Some(listen) = &cli.listen {
            config.listen = listen.clone();
        }
        if let Some(port) = cli.port {
            config.port = port;
        }
        if let Some(redis) = &cli.redis {
            config.redis_url = Some(redis.clone());
        }

        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            redis_url: None,
            image_classifier_url: None,
            text_classifier_url: None,
            expire_sweep_secs: default_sweep_secs(),
            engine: EngineConfig::default(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_sweep_secs() -> u64 {
    60 * 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_roundtrip_with_defaults() {
        let yaml = "port: 9000\nredis_url: redis://localhost:6379\n";
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.listen, "0.0.0.0");
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(config.engine.text.reject_threshold, 0.85);
    }
}
