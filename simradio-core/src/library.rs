use crate::catalog::StationId;
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use std::path::{Path, PathBuf};
use tokio_rusqlite::Connection;
use tracing::{debug, info};

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS downloads (
    station_id TEXT PRIMARY KEY,
    location TEXT,
    completed_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_downloads_completed_at ON downloads(completed_at);
";

/// A completed download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRecord {
    pub station_id: StationId,
    pub location: Option<PathBuf>,
    pub completed_at: DateTime<Utc>,
}

impl DownloadRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            station_id: StationId::new(row.get::<_, String>(0)?),
            location: row.get::<_, Option<String>>(1)?.map(PathBuf::from),
            completed_at: DateTime::from_timestamp(row.get::<_, i64>(2)?, 0)
                .unwrap_or_else(Utc::now),
        })
    }
}

/// SQLite-backed record of completed downloads, so they survive restarts
pub struct DownloadLibrary {
    conn: Connection,
}

impl DownloadLibrary {
    /// Open the library at the default location
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or opened.
    pub async fn new() -> Result<Self> {
        Self::open(&crate::paths::library_db_path()).await
    }

    /// Open a library at a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn open(path: &Path) -> Result<Self> {
        info!("Opening download library at {:?}", path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).await?;
        conn.call(|conn| {
            conn.execute_batch(SCHEMA_SQL)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            Ok(())
        })
        .await?;

        info!("Download library initialized");
        Ok(Self { conn })
    }

    /// Open a throwaway in-memory library
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        conn.call(|conn| {
            conn.execute_batch(SCHEMA_SQL)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Record a completed download, replacing any earlier record
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be stored.
    pub async fn record(&self, station_id: &StationId, location: Option<&Path>) -> Result<()> {
        debug!("Recording completed download of {}", station_id);
        let id = station_id.as_str().to_string();
        let location = location.map(|p| p.to_string_lossy().into_owned());
        let now = Utc::now().timestamp();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r"
                    INSERT INTO downloads (station_id, location, completed_at)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(station_id) DO UPDATE SET
                        location = excluded.location,
                        completed_at = excluded.completed_at
                ",
                    rusqlite::params![id, location, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    /// Look up the record of one station
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, station_id: &StationId) -> Result<Option<DownloadRecord>> {
        let id = station_id.as_str().to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT station_id, location, completed_at FROM downloads WHERE station_id = ?1",
                )?;
                let record = stmt
                    .query_row(rusqlite::params![id], DownloadRecord::from_row)
                    .optional()?;
                Ok(record)
            })
            .await
            .map_err(Into::into)
    }

    /// All records, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn all(&self) -> Result<Vec<DownloadRecord>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT station_id, location, completed_at FROM downloads ORDER BY completed_at, station_id",
                )?;
                let records = stmt
                    .query_map([], DownloadRecord::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(records)
            })
            .await
            .map_err(Into::into)
    }

    /// Forget a station's download. Returns `true` if a record was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn remove(&self, station_id: &StationId) -> Result<bool> {
        let id = station_id.as_str().to_string();

        self.conn
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM downloads WHERE station_id = ?1",
                    rusqlite::params![id],
                )?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Into::into)
    }

    /// Checkpoint WAL for clean shutdown
    ///
    /// # Errors
    ///
    /// Returns an error if the WAL checkpoint fails.
    pub async fn checkpoint(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE)")?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }
}

impl std::fmt::Debug for DownloadLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadLibrary").finish_non_exhaustive()
    }
}
