/// Host configuration
///
/// Describes the watched world directory and the cadence of the host loop.
/// Can be built in code with `HostConfig::builder` or loaded from JSON.

use crate::error::{HostError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default directory poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;

/// Default interval between `tick` events in milliseconds
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

/// Default script file extension
pub const DEFAULT_EXTENSION: &str = "lua";

/// Configuration for a world module host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// Watched directory containing world modules
    pub root: PathBuf,

    /// Milliseconds between directory scans
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Milliseconds between `tick` events emitted on the host
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Per-invocation script budget; `None` means scripts are never interrupted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_timeout_ms: Option<u64>,

    /// Only files with this extension are evaluated; `None` accepts any file
    #[serde(default = "default_extension")]
    pub extension: Option<String>,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_extension() -> Option<String> {
    Some(DEFAULT_EXTENSION.to_string())
}

impl HostConfig {
    /// Create a configuration for `root` with default intervals
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Self::builder(root).build()
    }

    /// Create a builder for custom configuration
    ///
    /// # Examples
    /// ```ignore
    /// let config = HostConfig::builder("./world")
    ///     .poll_interval(Duration::from_secs(1))
    ///     .eval_timeout(Duration::from_millis(250))
    ///     .build()?;
    /// ```
    pub fn builder(root: impl Into<PathBuf>) -> HostConfigBuilder {
        HostConfigBuilder::new(root)
    }

    /// Parse a JSON configuration document and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let config: HostConfig = serde_json::from_str(json)?;
        config.validate()?;
        info!("Loaded host configuration for {}", config.root.display());
        Ok(config)
    }

    /// Read and parse a JSON configuration file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        debug!("Reading host configuration from {}", path.display());
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Validate configuration values
    ///
    /// # Errors
    /// Returns `HostError::ValidationError` for an empty root, a zero interval
    /// or timeout, or an empty extension.
    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            warn!("Validation failed: empty root");
            return Err(HostError::ValidationError {
                field: "root".to_string(),
                reason: "World directory cannot be empty".to_string(),
            });
        }

        for (field, value) in [
            ("poll_interval_ms", self.poll_interval_ms),
            ("tick_interval_ms", self.tick_interval_ms),
        ] {
            if value == 0 {
                warn!("Validation failed: {} is zero", field);
                return Err(HostError::ValidationError {
                    field: field.to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        }

        if self.eval_timeout_ms == Some(0) {
            return Err(HostError::ValidationError {
                field: "eval_timeout_ms".to_string(),
                reason: "must be positive when set".to_string(),
            });
        }

        if let Some(ext) = &self.extension {
            if ext.trim().is_empty() {
                return Err(HostError::ValidationError {
                    field: "extension".to_string(),
                    reason: "cannot be empty, omit it to accept any file".to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn eval_timeout(&self) -> Option<Duration> {
        self.eval_timeout_ms.map(Duration::from_millis)
    }
}

/// Builder for HostConfig
#[derive(Debug)]
pub struct HostConfigBuilder {
    root: PathBuf,
    poll_interval_ms: u64,
    tick_interval_ms: u64,
    eval_timeout_ms: Option<u64>,
    extension: Option<String>,
}

impl HostConfigBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            eval_timeout_ms: None,
            extension: default_extension(),
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn eval_timeout(mut self, timeout: Duration) -> Self {
        self.eval_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    /// Accept every eligible file regardless of extension
    pub fn any_extension(mut self) -> Self {
        self.extension = None;
        self
    }

    pub fn build(self) -> Result<HostConfig> {
        let config = HostConfig {
            root: self.root,
            poll_interval_ms: self.poll_interval_ms,
            tick_interval_ms: self.tick_interval_ms,
            eval_timeout_ms: self.eval_timeout_ms,
            extension: self.extension,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::new("/srv/world").unwrap();

        assert_eq!(config.poll_interval(), Duration::from_millis(5000));
        assert_eq!(config.tick_interval(), Duration::from_millis(1000));
        assert_eq!(config.eval_timeout(), None);
        assert_eq!(config.extension.as_deref(), Some("lua"));
    }

    #[test]
    fn test_validate_empty_root() {
        let result = HostConfig::new("");
        assert!(matches!(result, Err(HostError::ValidationError { .. })));
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        let result = HostConfig::builder("/srv/world")
            .poll_interval(Duration::ZERO)
            .build();

        match result {
            Err(HostError::ValidationError { field, .. }) => assert_eq!(field, "poll_interval_ms"),
            other => panic!("Expected ValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_builder_pattern() {
        let config = HostConfig::builder("/srv/world")
            .poll_interval(Duration::from_millis(250))
            .tick_interval(Duration::from_millis(100))
            .eval_timeout(Duration::from_millis(50))
            .any_extension()
            .build()
            .unwrap();

        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.tick_interval_ms, 100);
        assert_eq!(config.eval_timeout(), Some(Duration::from_millis(50)));
        assert!(config.extension.is_none());
    }

    #[test]
    fn test_json_defaults_applied() {
        let config = HostConfig::from_json(r#"{ "root": "/srv/world" }"#).unwrap();

        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.extension.as_deref(), Some("lua"));
    }

    #[test]
    fn test_json_explicit_null_extension() {
        let config =
            HostConfig::from_json(r#"{ "root": "/srv/world", "extension": null }"#).unwrap();
        assert!(config.extension.is_none());
    }

    #[test]
    fn test_json_rejects_invalid_values() {
        let result = HostConfig::from_json(r#"{ "root": "/srv/world", "tick_interval_ms": 0 }"#);
        assert!(result.is_err());
    }
}
