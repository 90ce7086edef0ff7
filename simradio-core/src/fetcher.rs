//! Seam between the download coordinator and whatever moves the bytes.

use crate::catalog::{Station, StationId};
use crate::download::{DownloadUpdate, FailureReason, SessionId, UpdateKind};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Trait for media fetchers.
///
/// A fetcher runs on its own task, one call per download session. It should:
///
/// - Report progress through the [`ProgressReporter`] as bytes arrive
/// - Return promptly with [`FailureReason::Cancelled`] once `cancel` fires
/// - Leave no partial file behind on failure
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Get the fetcher name
    fn name(&self) -> &'static str;

    /// Download the media of `station`, returning where it was stored.
    async fn fetch(
        &self,
        station: &Station,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<PathBuf, FailureReason>;
}

/// Sends progress for one session back to the coordinator.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    station: StationId,
    session: SessionId,
    updates: mpsc::Sender<DownloadUpdate>,
}

impl ProgressReporter {
    #[must_use]
    pub const fn new(
        station: StationId,
        session: SessionId,
        updates: mpsc::Sender<DownloadUpdate>,
    ) -> Self {
        Self {
            station,
            session,
            updates,
        }
    }

    #[must_use]
    pub const fn station(&self) -> &StationId {
        &self.station
    }

    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }

    /// Report a progress fraction in `[0, 1]`.
    ///
    /// Never waits: when the coordinator is behind the report is dropped,
    /// and the next one supersedes it.
    pub fn report(&self, fraction: f64) {
        let update = DownloadUpdate {
            station: self.station.clone(),
            session: self.session,
            kind: UpdateKind::Progress(fraction),
        };
        match self.updates.try_send(update) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(_)) => {
                trace!("Progress channel full, dropping report for {}", self.station);
            }
        }
    }

    /// Report `received` out of `total` bytes. Ignored when the total is unknown.
    pub fn report_bytes(&self, received: u64, total: Option<u64>) {
        if let Some(total) = total.filter(|t| *t > 0) {
            self.report(fraction(received, total));
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn fraction(received: u64, total: u64) -> f64 {
    (received as f64 / total as f64).min(1.0)
}
