//! Path constants for configuration, catalog and downloaded media.

use std::path::PathBuf;

/// The name of the configuration directory under ~/.config/
pub const CONFIG_DIR_NAME: &str = "simradio";

/// The name of the main configuration file
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// The name of the default catalog file
pub const CATALOG_FILE_NAME: &str = "catalog.json";

/// The name of the download library database file
pub const LIBRARY_DB_FILE_NAME: &str = "library.db";

/// The name of the log file
pub const LOG_FILE_NAME: &str = "simradio.log";

/// The name of the downloaded media directory
pub const MEDIA_DIR_NAME: &str = "media";

/// Get the configuration directory path (~/.config/simradio/)
#[must_use]
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join(CONFIG_DIR_NAME)
}

/// Get the config file path (~/.config/simradio/config.toml)
#[must_use]
pub fn config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

/// Get the default catalog path (~/.config/simradio/catalog.json)
#[must_use]
pub fn catalog_path() -> PathBuf {
    config_dir().join(CATALOG_FILE_NAME)
}

/// Get the download library database path (~/.config/simradio/library.db)
#[must_use]
pub fn library_db_path() -> PathBuf {
    config_dir().join(LIBRARY_DB_FILE_NAME)
}

/// Get the log file path (~/.config/simradio/simradio.log)
#[must_use]
pub fn log_path() -> PathBuf {
    config_dir().join(LOG_FILE_NAME)
}

/// Get the default media directory (~/.config/simradio/media/)
#[must_use]
pub fn media_dir() -> PathBuf {
    config_dir().join(MEDIA_DIR_NAME)
}
