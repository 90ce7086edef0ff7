use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RadioConfig {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub downloads: DownloadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Catalog JSON file
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,
}

fn default_catalog_path() -> PathBuf {
    crate::paths::catalog_path()
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Where downloaded media is stored
    #[serde(default = "default_media_dir")]
    pub directory: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Capacity of the progress channel between fetch tasks and the owner
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,
    /// Remember completed downloads across restarts
    #[serde(default = "default_true")]
    pub library_enabled: bool,
}

fn default_media_dir() -> PathBuf {
    crate::paths::media_dir()
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_progress_buffer() -> usize {
    crate::download::DEFAULT_PROGRESS_BUFFER
}

const fn default_true() -> bool {
    true
}

impl DownloadConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            directory: default_media_dir(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            progress_buffer: default_progress_buffer(),
            library_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to ~/.config/simradio/simradio.log
    #[serde(default)]
    pub enabled: bool,
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: default_log_level(),
        }
    }
}

impl RadioConfig {
    /// Get the configuration directory path (~/.config/simradio/)
    #[must_use]
    pub fn config_dir() -> PathBuf {
        crate::paths::config_dir()
    }

    /// Get the config file path (~/.config/simradio/config.toml)
    #[must_use]
    pub fn config_path() -> PathBuf {
        crate::paths::config_path()
    }

    /// Load config from the default location or create the template on first run
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigNotFound`] after writing the template, or an
    /// error if the file cannot be read, parsed or fails validation.
    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_at(&Self::config_path())
    }

    /// Load config from `config_path` or create the template there
    ///
    /// # Errors
    ///
    /// Same as [`Self::load_or_create`].
    pub fn load_or_create_at(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            if let Some(parent) = config_path.parent() {
                fs::create_dir_all(parent)?;
            }

            fs::write(config_path, CONFIG_TEMPLATE)?;

            return Err(CoreError::ConfigNotFound {
                path: config_path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(config_path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate config from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or a value is out of range.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges serde cannot express
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigInvalid`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.downloads.progress_buffer == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "downloads.progress_buffer must be greater than 0".to_string(),
            });
        }
        if self.downloads.timeout_secs == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "downloads.timeout_secs must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

const CONFIG_TEMPLATE: &str = r##"# SimRadio Configuration
# ~/.config/simradio/config.toml

[catalog]
# Catalog of series and stations (JSON)
# path = "~/.config/simradio/catalog.json"

[downloads]
# Where downloaded media is stored
# directory = "~/.config/simradio/media"
timeout_secs = 30
max_retries = 3
# Pending progress reports before older ones are dropped
progress_buffer = 64
# Remember completed downloads across restarts
library_enabled = true

[logging]
# Also write logs to ~/.config/simradio/simradio.log
enabled = false
# Used when RUST_LOG is not set: "error", "warn", "info", "debug", "trace"
level = "info"
"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_parses_with_defaults() {
        let config = RadioConfig::from_toml_str(CONFIG_TEMPLATE).unwrap();

        assert_eq!(config.catalog.path, crate::paths::catalog_path());
        assert_eq!(config.downloads.directory, crate::paths::media_dir());
        assert_eq!(config.downloads.timeout(), Duration::from_secs(30));
        assert_eq!(config.downloads.max_retries, 3);
        assert_eq!(config.downloads.progress_buffer, 64);
        assert!(config.downloads.library_enabled);
        assert!(!config.logging.enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = RadioConfig::from_toml_str("").unwrap();
        assert_eq!(config.downloads.progress_buffer, 64);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_overrides() {
        let config = RadioConfig::from_toml_str(
            r#"
            [catalog]
            path = "/srv/radio/catalog.json"

            [downloads]
            directory = "/srv/radio/media"
            timeout_secs = 5
            library_enabled = false

            [logging]
            enabled = true
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.catalog.path, PathBuf::from("/srv/radio/catalog.json"));
        assert_eq!(config.downloads.directory, PathBuf::from("/srv/radio/media"));
        assert_eq!(config.downloads.timeout_secs, 5);
        assert!(!config.downloads.library_enabled);
        assert!(config.logging.enabled);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validation() {
        let err = RadioConfig::from_toml_str("[downloads]\nprogress_buffer = 0").unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid { message } if message.contains("progress_buffer")));

        let err = RadioConfig::from_toml_str("[downloads]\ntimeout_secs = 0").unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid { message } if message.contains("timeout_secs")));
    }

    #[test]
    fn test_malformed_toml() {
        let err = RadioConfig::from_toml_str("[downloads\n").unwrap_err();
        assert!(matches!(err, CoreError::ConfigParseError(_)));
    }

    #[test]
    fn test_load_or_create_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simradio").join("config.toml");

        let err = RadioConfig::load_or_create_at(&path).unwrap_err();
        assert!(matches!(err, CoreError::ConfigNotFound { path: ref p } if *p == path));
        assert!(path.exists());

        let config = RadioConfig::load_or_create_at(&path).unwrap();
        assert_eq!(config.downloads.max_retries, 3);
    }
}
