use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::timing::{CompileLimits, SchedulerSettings};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: ron::error::SpannedError,
    },
    #[error("failed to write config file {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] ron::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Chunked upload sub-protocol settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub start_marker: String,
    pub end_marker: String,
    /// Acknowledge every received chunk, not only the final one.
    pub ack_chunks: bool,
    /// Cap on the encoded payload, in bytes.
    pub max_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            start_marker: "START".into(),
            end_marker: "END".into(),
            ack_chunks: true,
            max_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address handed out by the pairing side; the server binds it once.
    pub listen: String,
    /// Shared secret. Clients authenticate with its SHA3-256 hex digest.
    pub secret: String,
    pub instructions_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub drain_poll_interval_ms: u64,
    /// Toggles one blinking light clause may expand to.
    pub max_blink_toggles: u64,
    pub upload: UploadConfig,
    /// Program and arguments run when a client requests host shutdown.
    pub shutdown_command: Option<Vec<String>>,
    pub audio_enabled: bool,
    /// sysfs GPIO root; `None` only logs pin changes.
    pub gpio_root: Option<PathBuf>,
    /// Filter used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let instructions_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Desktop")
            .join("Instructions");

        Self {
            listen: "0.0.0.0:7001".into(),
            secret: "15Punkte".into(),
            instructions_dir,
            poll_interval_ms: 10,
            drain_poll_interval_ms: 100,
            max_blink_toggles: CompileLimits::default().max_blink_toggles,
            upload: UploadConfig::default(),
            shutdown_command: None,
            audio_enabled: true,
            gpio_root: Some(PathBuf::from("/sys/class/gpio")),
            log_level: "info".into(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ServerConfig = ron::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.is_empty() {
            return Err(ConfigError::Invalid("secret must not be empty".into()));
        }
        if self.upload.start_marker.trim().is_empty() || self.upload.end_marker.is_empty() {
            return Err(ConfigError::Invalid("upload markers must not be empty".into()));
        }
        if self.poll_interval_ms == 0 || self.drain_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll intervals must be positive".into()));
        }
        if let Some(command) = &self.shutdown_command {
            if command.is_empty() {
                return Err(ConfigError::Invalid("shutdown_command must name a program".into()));
            }
        }
        Ok(())
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            drain_poll_interval: Duration::from_millis(self.drain_poll_interval_ms),
        }
    }

    pub fn compile_limits(&self) -> CompileLimits {
        CompileLimits {
            max_blink_toggles: self.max_blink_toggles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ecospark.ron");
        let config = ServerConfig {
            listen: "127.0.0.1:9000".into(),
            gpio_root: None,
            shutdown_command: Some(vec!["sudo".into(), "poweroff".into()]),
            ..ServerConfig::default()
        };

        config.save(&path).unwrap();

        assert_eq!(ServerConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.ron");
        fs::write(&path, r#"(listen: "127.0.0.1:4000", upload: (ack_chunks: false))"#).unwrap();

        let config = ServerConfig::load(&path).unwrap();

        assert_eq!(config.listen, "127.0.0.1:4000");
        assert!(!config.upload.ack_chunks);
        assert_eq!(config.upload.end_marker, "END");
        assert_eq!(config.poll_interval_ms, 10);
        assert_eq!(config.max_blink_toggles, 10_000);
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let config = ServerConfig {
            poll_interval_ms: 0,
            ..ServerConfig::default()
        };

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ron");
        fs::write(&path, "(listen: ").unwrap();

        let err = ServerConfig::load(&path).unwrap_err();

        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.ron"));
    }

    #[test]
    fn chunk_acks_are_on_by_default() {
        assert!(UploadConfig::default().ack_chunks);
    }

    #[test]
    fn compile_limits_follow_config() {
        let config = ServerConfig {
            max_blink_toggles: 7,
            ..ServerConfig::default()
        };

        assert_eq!(config.compile_limits().max_blink_toggles, 7);
    }

    #[test]
    fn scheduler_settings_follow_config() {
        let settings = ServerConfig::default().scheduler_settings();

        assert_eq!(settings.poll_interval, Duration::from_millis(10));
        assert_eq!(settings.drain_poll_interval, Duration::from_millis(100));
    }
}
