pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod fetcher;
pub mod library;
pub mod observer;
pub mod paths;
pub mod playback;
pub mod radio;

pub use catalog::{Catalog, Series, Station, StationId};
pub use config::{CatalogConfig, DownloadConfig, LoggingConfig, RadioConfig};
pub use download::{
    DownloadCoordinator, DownloadEvent, DownloadObserver, DownloadState, DownloadUpdate,
    FailureReason, SessionId, StartOutcome, UpdateKind, DEFAULT_PROGRESS_BUFFER,
};

/// Re-export toml error type for config parsing error handling
pub use toml::de::Error as TomlParseError;
pub use error::{CoreError, Result};
pub use fetcher::{MediaFetcher, ProgressReporter};
pub use library::{DownloadLibrary, DownloadRecord};
pub use observer::{ObserverId, ObserverRegistry};
pub use paths::{
    catalog_path, config_dir, config_path, library_db_path, log_path, media_dir,
    CATALOG_FILE_NAME, CONFIG_DIR_NAME, CONFIG_FILE_NAME, LIBRARY_DB_FILE_NAME, LOG_FILE_NAME,
    MEDIA_DIR_NAME,
};
pub use playback::{
    PlaybackCommand, PlaybackEvent, PlaybackObserver, PlaybackState, PlaybackStateMachine,
    PlaybackStatus,
};
pub use radio::{Radio, RadioEvent, RadioHandle, RadioSnapshot};

/// Re-export so fetcher implementations and binaries share one token type
pub use tokio_util::sync::CancellationToken;
