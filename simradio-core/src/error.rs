use crate::catalog::StationId;
use crate::download::FailureReason;
use crate::playback::{PlaybackCommand, PlaybackStatus};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    // Configuration errors
    #[error("Config file not found at {path}. A template has been created - please edit it and restart.")]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid config: {message}")]
    ConfigInvalid { message: String },

    #[error("Failed to parse config file: {0}")]
    ConfigParseError(#[from] toml::de::Error),

    // Catalog errors
    #[error("Failed to parse catalog: {0}")]
    CatalogParseError(#[from] serde_json::Error),

    #[error("Station {id} appears more than once in the catalog")]
    DuplicateStation { id: StationId },

    #[error("Station not found: {id}")]
    StationNotFound { id: StationId },

    // Playback errors
    #[error("Cannot {command} while {state}")]
    InvalidTransition {
        command: PlaybackCommand,
        state: PlaybackStatus,
    },

    // Download errors
    #[error("Download of {id} failed: {reason}")]
    DownloadFailed { id: StationId, reason: FailureReason },

    #[error("Radio service is no longer running")]
    ServiceStopped,

    // Library errors
    #[error("Library database error: {0}")]
    LibraryError(#[from] tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    // IO errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
