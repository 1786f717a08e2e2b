use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use llhls_muxer::{MuxerConfig, MuxerError, StreamConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub muxer: MuxerConfig,
    /// Per-source ingest settings, keyed by source id.
    pub streams: HashMap<String, StreamConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8083,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            } else {
                tracing::warn!("Config file {} not found, using defaults", path);
            }
        }

        // LLHLS_SERVER__HTTP_PORT, LLHLS_MUXER__MAX_SEGMENTS, ...
        builder = builder.add_source(
            Environment::with_prefix("LLHLS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Reject settings the muxer or an ingest task cannot run with.
    pub fn validate(&self) -> Result<(), MuxerError> {
        self.muxer.validate()?;
        for (source, stream) in &self.streams {
            stream.validate().map_err(|e| {
                MuxerError::InvalidConfig(format!("streams.{source}: {e}"))
            })?;
        }
        Ok(())
    }

    /// Ingest settings for `source_id`, falling back to defaults.
    #[must_use]
    pub fn stream(&self, source_id: &str) -> StreamConfig {
        self.streams.get(source_id).cloned().unwrap_or_default()
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }
}
