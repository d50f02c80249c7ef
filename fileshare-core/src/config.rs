use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::logging::LogFormat;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub progress: ProgressConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
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
            http_port: 8080,
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

/// Upload progress notification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Idle time after which a notification channel is reaped
    pub keep_alive_ms: u64,
    /// How often the registry sweeps for idle channels
    pub termination_interval_ms: u64,
    /// How often an upload's byte count is sampled
    pub sampling_interval_ms: u64,
    /// Outbound queue size per notification channel
    pub channel_capacity: usize,
    /// Time a freshly opened channel has to send its handshake
    pub handshake_timeout_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            keep_alive_ms: 10_000,
            termination_interval_ms: 5_000,
            sampling_interval_ms: 50,
            channel_capacity: 64,
            handshake_timeout_ms: 10_000,
        }
    }
}

impl ProgressConfig {
    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    #[must_use]
    pub const fn termination_interval(&self) -> Duration {
        Duration::from_millis(self.termination_interval_ms)
    }

    #[must_use]
    pub const fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }

    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory uploaded files are written to
    pub upload_dir: String,
    /// Largest accepted upload body
    pub max_upload_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: "uploaded-files".to_string(),
            max_upload_bytes: 1024 * 1024 * 1024,
        }
    }
}

/// Credentials accepted by the static identity provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// credential -> subject id
    pub tokens: HashMap<String, String>,
    /// Accept uploads without a credential header
    pub allow_anonymous: bool,
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
            }
        }

        // FILESHARE_PROGRESS__KEEP_ALIVE_MS etc.; field names contain '_'
        builder = builder.add_source(
            Environment::with_prefix("FILESHARE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Check for misconfigurations, reporting every problem at once
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be non-zero".to_string());
        }

        if let Err(e) = self.logging.format.parse::<LogFormat>() {
            errors.push(format!("logging.format: {e}"));
        }

        let progress = &self.progress;
        for (name, value) in [
            ("progress.keep_alive_ms", progress.keep_alive_ms),
            ("progress.termination_interval_ms", progress.termination_interval_ms),
            ("progress.sampling_interval_ms", progress.sampling_interval_ms),
            ("progress.handshake_timeout_ms", progress.handshake_timeout_ms),
        ] {
            if value == 0 {
                errors.push(format!("{name} must be greater than zero"));
            }
        }
        if progress.channel_capacity == 0 {
            errors.push("progress.channel_capacity must be greater than zero".to_string());
        }
        if progress.sampling_interval_ms >= progress.keep_alive_ms {
            errors.push(
                "progress.sampling_interval_ms must be smaller than progress.keep_alive_ms"
                    .to_string(),
            );
        }

        if self.storage.upload_dir.trim().is_empty() {
            errors.push("storage.upload_dir must not be empty".to_string());
        }
        if self.storage.max_upload_bytes == 0 {
            errors.push("storage.max_upload_bytes must be greater than zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
