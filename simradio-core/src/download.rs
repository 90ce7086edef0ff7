//! Per-station media downloads.
//!
//! The [`DownloadCoordinator`] is the only writer of download state. Fetch
//! tasks never touch it directly: they send [`DownloadUpdate`]s over a
//! bounded channel, and the owner applies them in batches, keeping only the
//! latest progress per session.

use crate::catalog::{Catalog, Station, StationId};
use crate::error::{CoreError, Result};
use crate::fetcher::{MediaFetcher, ProgressReporter};
use crate::observer::{ObserverId, ObserverRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Default capacity of the update channel between fetch tasks and the owner
pub const DEFAULT_PROGRESS_BUFFER: usize = 64;

/// Identifies one download attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a download session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Network,
    Storage,
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Network => "network error",
            Self::Storage => "storage error",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Download state of one station's media.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DownloadState {
    #[default]
    NotStarted,
    InProgress {
        session: SessionId,
        /// Fraction in `[0, 1]`, non-decreasing within the session
        progress: f64,
    },
    Complete {
        location: Option<PathBuf>,
    },
    Failed {
        reason: FailureReason,
    },
}

impl DownloadState {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Failed { .. })
    }

    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        matches!(self, Self::InProgress { .. })
    }

    /// Progress fraction, `1.0` once complete
    #[must_use]
    pub const fn progress(&self) -> Option<f64> {
        match self {
            Self::InProgress { progress, .. } => Some(*progress),
            Self::Complete { .. } => Some(1.0),
            Self::NotStarted | Self::Failed { .. } => None,
        }
    }
}

/// Events emitted by the download coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    /// A new session was opened
    Started { station: StationId, session: SessionId },
    /// Progress advanced
    Progress {
        station: StationId,
        session: SessionId,
        progress: f64,
    },
    /// The session finished successfully
    Completed {
        station: StationId,
        session: SessionId,
        location: Option<PathBuf>,
    },
    /// The session failed
    Failed {
        station: StationId,
        session: SessionId,
        reason: FailureReason,
    },
}

impl DownloadEvent {
    #[must_use]
    pub const fn station(&self) -> &StationId {
        match self {
            Self::Started { station, .. }
            | Self::Progress { station, .. }
            | Self::Completed { station, .. }
            | Self::Failed { station, .. } => station,
        }
    }

    #[must_use]
    pub const fn session(&self) -> SessionId {
        match self {
            Self::Started { session, .. }
            | Self::Progress { session, .. }
            | Self::Completed { session, .. }
            | Self::Failed { session, .. } => *session,
        }
    }
}

/// What a fetch task (or an external download manager) reports.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateKind {
    Progress(f64),
    Completed(Option<PathBuf>),
    Failed(FailureReason),
}

/// A report about one session
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadUpdate {
    pub station: StationId,
    pub session: SessionId,
    pub kind: UpdateKind,
}

/// Result of [`DownloadCoordinator::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new session was opened
    Started(SessionId),
    /// A session was already in progress and is reused
    Joined(SessionId),
    /// The media is already downloaded
    AlreadyComplete,
}

impl StartOutcome {
    #[must_use]
    pub const fn session(self) -> Option<SessionId> {
        match self {
            Self::Started(session) | Self::Joined(session) => Some(session),
            Self::AlreadyComplete => None,
        }
    }
}

/// Subscriber to download events.
pub trait DownloadObserver: Send + Sync {
    fn on_download_event(&self, event: &DownloadEvent);
}

struct Tracked {
    state: DownloadState,
    cancel: Option<CancellationToken>,
}

/// Owner of per-station [`DownloadState`].
pub struct DownloadCoordinator {
    catalog: Arc<Catalog>,
    fetcher: Option<Arc<dyn MediaFetcher>>,
    downloads: HashMap<StationId, Tracked>,
    next_session: u64,
    updates_tx: mpsc::Sender<DownloadUpdate>,
    updates_rx: mpsc::Receiver<DownloadUpdate>,
    observers: Arc<ObserverRegistry<dyn DownloadObserver>>,
    cancel_token: CancellationToken,
}

impl DownloadCoordinator {
    /// Create a coordinator without a fetcher.
    ///
    /// Sessions opened without a fetcher are driven by updates sent to
    /// [`Self::updates`] or passed to [`Self::apply`].
    #[must_use]
    pub fn new(catalog: Arc<Catalog>) -> Self {
        let (updates_tx, updates_rx) = mpsc::channel(DEFAULT_PROGRESS_BUFFER);
        Self {
            catalog,
            fetcher: None,
            downloads: HashMap::new(),
            next_session: 1,
            updates_tx,
            updates_rx,
            observers: Arc::new(ObserverRegistry::new()),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Spawn a fetch task with `fetcher` for each new session.
    ///
    /// Sessions are then started with `tokio::spawn`, so [`Self::start`]
    /// must be called from within a tokio runtime.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn MediaFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    #[must_use]
    pub fn with_observers(mut self, observers: Arc<ObserverRegistry<dyn DownloadObserver>>) -> Self {
        self.observers = observers;
        self
    }

    /// Set the update channel capacity. Call before starting any session.
    #[must_use]
    pub fn with_progress_buffer(mut self, capacity: usize) -> Self {
        let (updates_tx, updates_rx) = mpsc::channel(capacity.max(1));
        self.updates_tx = updates_tx;
        self.updates_rx = updates_rx;
        self
    }

    /// Tie fetch tasks to `parent`: cancelling it cancels every session.
    #[must_use]
    pub fn with_cancel_token(mut self, parent: &CancellationToken) -> Self {
        self.cancel_token = parent.child_token();
        self
    }

    #[must_use]
    pub const fn observers(&self) -> &Arc<ObserverRegistry<dyn DownloadObserver>> {
        &self.observers
    }

    pub fn add_observer(&self, observer: Weak<dyn DownloadObserver>) -> ObserverId {
        self.observers.register(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers.unregister(id)
    }

    /// Sender for external download managers to report through the same
    /// serialized path as fetch tasks
    #[must_use]
    pub fn updates(&self) -> mpsc::Sender<DownloadUpdate> {
        self.updates_tx.clone()
    }

    /// Current state of `id`
    #[must_use]
    pub fn state(&self, id: &StationId) -> DownloadState {
        self.downloads
            .get(id)
            .map_or(DownloadState::NotStarted, |t| t.state.clone())
    }

    /// All stations with a known download state
    pub fn states(&self) -> impl Iterator<Item = (&StationId, &DownloadState)> {
        self.downloads.iter().map(|(id, t)| (id, &t.state))
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.downloads
            .values()
            .filter(|t| t.state.is_in_progress())
            .count()
    }

    /// Start downloading `id`. Idempotent while a session is in progress.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StationNotFound`] if `id` is not in the catalog.
    pub fn start(&mut self, id: &StationId) -> Result<StartOutcome> {
        let station = self
            .catalog
            .station(id)
            .cloned()
            .ok_or_else(|| CoreError::StationNotFound { id: id.clone() })?;

        if let Some(tracked) = self.downloads.get(id) {
            match &tracked.state {
                DownloadState::InProgress { session, .. } => {
                    debug!("Download of {} already in progress (session {})", id, session);
                    return Ok(StartOutcome::Joined(*session));
                }
                DownloadState::Complete { .. } => {
                    debug!("Download of {} already complete", id);
                    return Ok(StartOutcome::AlreadyComplete);
                }
                DownloadState::NotStarted | DownloadState::Failed { .. } => {}
            }
        }

        let session = SessionId(self.next_session);
        self.next_session += 1;
        let cancel = self.cancel_token.child_token();

        self.downloads.insert(
            id.clone(),
            Tracked {
                state: DownloadState::InProgress {
                    session,
                    progress: 0.0,
                },
                cancel: Some(cancel.clone()),
            },
        );

        info!("Starting download of {} (session {})", id, session);
        self.emit(DownloadEvent::Started {
            station: id.clone(),
            session,
        });
        self.spawn_fetch(station, session, cancel);

        Ok(StartOutcome::Started(session))
    }

    fn spawn_fetch(&self, station: Arc<Station>, session: SessionId, cancel: CancellationToken) {
        let Some(fetcher) = self.fetcher.clone() else {
            debug!("No fetcher attached, {} waits for external updates", station.id);
            return;
        };
        let updates = self.updates_tx.clone();

        tokio::spawn(async move {
            let reporter = ProgressReporter::new(station.id.clone(), session, updates.clone());
            debug!("Fetching {} with {}", station.id, fetcher.name());

            // The fetcher watches `cancel` itself and cleans up before returning
            let kind = match fetcher.fetch(&station, reporter, cancel).await {
                Ok(location) => UpdateKind::Completed(Some(location)),
                Err(reason) => UpdateKind::Failed(reason),
            };

            // Terminal updates must not be dropped, so wait for room
            let _ = updates
                .send(DownloadUpdate {
                    station: station.id.clone(),
                    session,
                    kind,
                })
                .await;
        });
    }

    /// Cancel the in-progress session of `id`, failing it with
    /// [`FailureReason::Cancelled`]. Later updates from it are dropped.
    pub fn cancel(&mut self, id: &StationId) -> Option<DownloadEvent> {
        let tracked = self.downloads.get_mut(id)?;
        let DownloadState::InProgress { session, .. } = tracked.state else {
            debug!("No download of {} to cancel", id);
            return None;
        };

        if let Some(token) = tracked.cancel.take() {
            token.cancel();
        }
        tracked.state = DownloadState::Failed {
            reason: FailureReason::Cancelled,
        };

        info!("Cancelled download of {} (session {})", id, session);
        Some(self.emit(DownloadEvent::Failed {
            station: id.clone(),
            session,
            reason: FailureReason::Cancelled,
        }))
    }

    /// Cancel every in-progress session
    pub fn cancel_all(&mut self) -> Vec<DownloadEvent> {
        let active: Vec<StationId> = self
            .downloads
            .iter()
            .filter(|(_, t)| t.state.is_in_progress())
            .map(|(id, _)| id.clone())
            .collect();

        active.iter().filter_map(|id| self.cancel(id)).collect()
    }

    /// Apply a single update. Stale updates (unknown station, or a session
    /// that is no longer the in-progress one) are dropped.
    pub fn apply(&mut self, update: DownloadUpdate) -> Option<DownloadEvent> {
        let Some(tracked) = self.downloads.get_mut(&update.station) else {
            trace!("Dropping update for untracked {}", update.station);
            return None;
        };

        let current = match tracked.state {
            DownloadState::InProgress { session, progress } if session == update.session => {
                progress
            }
            _ => {
                trace!(
                    "Dropping stale update for {} (session {})",
                    update.station,
                    update.session
                );
                return None;
            }
        };

        let DownloadUpdate {
            station,
            session,
            kind,
        } = update;

        let event = match kind {
            UpdateKind::Progress(value) => {
                if !value.is_finite() {
                    trace!("Dropping non-finite progress for {}", station);
                    return None;
                }
                let value = value.clamp(0.0, 1.0);
                if value <= current {
                    return None;
                }
                tracked.state = DownloadState::InProgress {
                    session,
                    progress: value,
                };
                DownloadEvent::Progress {
                    station,
                    session,
                    progress: value,
                }
            }
            UpdateKind::Completed(location) => {
                tracked.cancel = None;
                tracked.state = DownloadState::Complete {
                    location: location.clone(),
                };
                info!("Download of {} complete (session {})", station, session);
                DownloadEvent::Completed {
                    station,
                    session,
                    location,
                }
            }
            UpdateKind::Failed(reason) => {
                tracked.cancel = None;
                tracked.state = DownloadState::Failed { reason };
                warn!(
                    "{}",
                    CoreError::DownloadFailed {
                        id: station.clone(),
                        reason
                    }
                );
                DownloadEvent::Failed {
                    station,
                    session,
                    reason,
                }
            }
        };

        Some(self.emit(event))
    }

    /// Wait for the next update from a fetch task or external sender
    pub async fn recv(&mut self) -> Option<DownloadUpdate> {
        self.updates_rx.recv().await
    }

    /// Apply `first` together with everything already queued, coalesced.
    pub fn process(&mut self, first: DownloadUpdate) -> Vec<DownloadEvent> {
        self.coalesce(Some(first))
    }

    /// Apply everything already queued, coalesced. Never waits.
    pub fn pump(&mut self) -> Vec<DownloadEvent> {
        self.coalesce(None)
    }

    fn coalesce(&mut self, first: Option<DownloadUpdate>) -> Vec<DownloadEvent> {
        let mut queued: Vec<DownloadUpdate> = first.into_iter().collect();
        while let Ok(update) = self.updates_rx.try_recv() {
            queued.push(update);
        }

        let mut progress: Vec<DownloadUpdate> = Vec::new();
        let mut events = Vec::new();

        for update in queued {
            match update.kind {
                UpdateKind::Progress(value) => {
                    if !value.is_finite() {
                        continue;
                    }
                    let latest = progress
                        .iter_mut()
                        .find(|p| p.station == update.station && p.session == update.session);
                    match latest {
                        Some(DownloadUpdate {
                            kind: UpdateKind::Progress(current),
                            ..
                        }) => {
                            if value > *current {
                                *current = value;
                            }
                        }
                        _ => progress.push(update),
                    }
                }
                UpdateKind::Completed(_) | UpdateKind::Failed(_) => {
                    // A terminal update supersedes pending progress of its session
                    progress.retain(|p| !(p.station == update.station && p.session == update.session));
                    events.extend(self.apply(update));
                }
            }
        }

        for update in progress {
            events.extend(self.apply(update));
        }

        events
    }

    /// Mark previously downloaded media as complete without emitting events.
    ///
    /// Stations missing from the catalog and in-progress sessions are skipped.
    /// Returns the number of stations restored.
    pub fn restore_completed(
        &mut self,
        completed: impl IntoIterator<Item = (StationId, Option<PathBuf>)>,
    ) -> usize {
        let mut restored = 0;
        for (id, location) in completed {
            if !self.catalog.contains(&id) {
                debug!("Skipping restored download of unknown station {}", id);
                continue;
            }
            if self.state(&id).is_in_progress() {
                continue;
            }
            self.downloads.insert(
                id,
                Tracked {
                    state: DownloadState::Complete { location },
                    cancel: None,
                },
            );
            restored += 1;
        }
        restored
    }

    /// Swap the catalog, cancelling sessions of stations that left it
    pub fn set_catalog(&mut self, catalog: Arc<Catalog>) -> Vec<DownloadEvent> {
        self.catalog = catalog;

        let orphaned: Vec<StationId> = self
            .downloads
            .iter()
            .filter(|(id, t)| t.state.is_in_progress() && !self.catalog.contains(id))
            .map(|(id, _)| id.clone())
            .collect();

        orphaned.iter().filter_map(|id| self.cancel(id)).collect()
    }

    fn emit(&self, event: DownloadEvent) -> DownloadEvent {
        self.observers.notify_all(|o| o.on_download_event(&event));
        event
    }
}

impl Drop for DownloadCoordinator {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadCoordinator")
            .field("tracked", &self.downloads.len())
            .field("active", &self.active_count())
            .field("fetcher", &self.fetcher.as_ref().map(|f| f.name()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Series;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    fn catalog(ids: &[&str]) -> Arc<Catalog> {
        let series = Series {
            id: "series".to_string(),
            title: "Series".to_string(),
            artwork: None,
            stations: ids
                .iter()
                .map(|id| Arc::new(Station::new(*id, id.to_uppercase())))
                .collect(),
        };
        Arc::new(Catalog::from_series(vec![series]).unwrap())
    }

    fn id(id: &str) -> StationId {
        StationId::from(id)
    }

    fn update(station: &str, session: SessionId, kind: UpdateKind) -> DownloadUpdate {
        DownloadUpdate {
            station: id(station),
            session,
            kind,
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<DownloadEvent>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<DownloadEvent> {
            self.events.lock().unwrap().clone()
        }

        fn progress_of(&self, station: &str) -> Vec<f64> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    DownloadEvent::Progress { station: s, progress, .. } if s == id(station) => {
                        Some(progress)
                    }
                    _ => None,
                })
                .collect()
        }
    }

    impl DownloadObserver for Recorder {
        fn on_download_event(&self, event: &DownloadEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn observe(coordinator: &DownloadCoordinator) -> Arc<Recorder> {
        let recorder = Arc::new(Recorder::default());
        let weak: Weak<Recorder> = Arc::downgrade(&recorder);
        coordinator.add_observer(weak);
        recorder
    }

    fn started(outcome: StartOutcome) -> SessionId {
        match outcome {
            StartOutcome::Started(session) => session,
            other => panic!("expected a new session, got {other:?}"),
        }
    }

    #[test]
    fn test_start_unknown_station() {
        let mut coordinator = DownloadCoordinator::new(catalog(&["a"]));
        let err = coordinator.start(&id("missing")).unwrap_err();

        assert!(matches!(err, CoreError::StationNotFound { .. }));
        assert_eq!(coordinator.state(&id("missing")), DownloadState::NotStarted);
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut coordinator = DownloadCoordinator::new(catalog(&["a"]));
        let recorder = observe(&coordinator);

        let session = started(coordinator.start(&id("a")).unwrap());
        assert_eq!(coordinator.start(&id("a")).unwrap(), StartOutcome::Joined(session));
        assert_eq!(coordinator.active_count(), 1);

        coordinator.apply(update("a", session, UpdateKind::Progress(0.5)));
        coordinator.apply(update("a", session, UpdateKind::Completed(None)));

        let events = recorder.events();
        let starts = events
            .iter()
            .filter(|e| matches!(e, DownloadEvent::Started { .. }))
            .count();
        assert_eq!(starts, 1);
        assert_eq!(recorder.progress_of("a"), vec![0.5]);
        assert_eq!(
            coordinator.start(&id("a")).unwrap(),
            StartOutcome::AlreadyComplete
        );
    }

    #[test]
    fn test_progress_is_monotonic_and_clamped() {
        let mut coordinator = DownloadCoordinator::new(catalog(&["a"]));
        let recorder = observe(&coordinator);
        let session = started(coordinator.start(&id("a")).unwrap());

        for value in [0.2, 0.1, 0.2, f64::NAN, 0.6, f64::INFINITY, 1.7, 0.9] {
            coordinator.apply(update("a", session, UpdateKind::Progress(value)));
        }

        assert_eq!(recorder.progress_of("a"), vec![0.2, 0.6, 1.0]);
        assert_eq!(
            coordinator.state(&id("a")),
            DownloadState::InProgress {
                session,
                progress: 1.0
            }
        );
    }

    #[test]
    fn test_completion_is_terminal() {
        let mut coordinator = DownloadCoordinator::new(catalog(&["a"]));
        let recorder = observe(&coordinator);
        let session = started(coordinator.start(&id("a")).unwrap());

        let location = PathBuf::from("/media/a.m4a");
        let event = coordinator.apply(update("a", session, UpdateKind::Completed(Some(location.clone()))));
        assert!(matches!(event, Some(DownloadEvent::Completed { .. })));

        // Nothing after a terminal state is applied
        assert!(coordinator
            .apply(update("a", session, UpdateKind::Completed(None)))
            .is_none());
        assert!(coordinator
            .apply(update("a", session, UpdateKind::Failed(FailureReason::Network)))
            .is_none());
        assert!(coordinator
            .apply(update("a", session, UpdateKind::Progress(0.5)))
            .is_none());

        assert_eq!(
            coordinator.state(&id("a")),
            DownloadState::Complete {
                location: Some(location)
            }
        );
        let completions = recorder
            .events()
            .iter()
            .filter(|e| matches!(e, DownloadEvent::Completed { .. }))
            .count();
        assert_eq!(completions, 1);
    }

    #[test]
    fn test_failure_and_retry() {
        let mut coordinator = DownloadCoordinator::new(catalog(&["a"]));
        let first = started(coordinator.start(&id("a")).unwrap());

        let event = coordinator.apply(update("a", first, UpdateKind::Failed(FailureReason::Storage)));
        assert_eq!(
            event,
            Some(DownloadEvent::Failed {
                station: id("a"),
                session: first,
                reason: FailureReason::Storage
            })
        );
        assert_eq!(
            coordinator.state(&id("a")),
            DownloadState::Failed {
                reason: FailureReason::Storage
            }
        );

        let second = started(coordinator.start(&id("a")).unwrap());
        assert_ne!(first, second);

        // Late updates from the failed session are stale
        assert!(coordinator
            .apply(update("a", first, UpdateKind::Progress(0.9)))
            .is_none());
        assert!(coordinator
            .apply(update("a", second, UpdateKind::Progress(0.1)))
            .is_some());
    }

    #[test]
    fn test_cancel_drops_late_updates() {
        let mut coordinator = DownloadCoordinator::new(catalog(&["a"]));
        let recorder = observe(&coordinator);
        let session = started(coordinator.start(&id("a")).unwrap());

        let event = coordinator.cancel(&id("a"));
        assert!(matches!(
            event,
            Some(DownloadEvent::Failed {
                reason: FailureReason::Cancelled,
                ..
            })
        ));
        assert!(coordinator.cancel(&id("a")).is_none());

        assert!(coordinator
            .apply(update("a", session, UpdateKind::Progress(0.5)))
            .is_none());
        assert!(coordinator
            .apply(update("a", session, UpdateKind::Completed(None)))
            .is_none());

        assert_eq!(recorder.events().len(), 2);
        assert_eq!(
            coordinator.state(&id("a")),
            DownloadState::Failed {
                reason: FailureReason::Cancelled
            }
        );
    }

    #[test]
    fn test_downloads_are_independent() {
        let mut coordinator = DownloadCoordinator::new(catalog(&["a", "b"]));
        let a = started(coordinator.start(&id("a")).unwrap());
        let b = started(coordinator.start(&id("b")).unwrap());
        assert_ne!(a, b);

        coordinator.apply(update("a", a, UpdateKind::Progress(0.7)));
        coordinator.apply(update("b", b, UpdateKind::Failed(FailureReason::Network)));
        coordinator.cancel(&id("b"));

        // Session ids are not interchangeable between stations
        assert!(coordinator
            .apply(update("a", b, UpdateKind::Progress(0.9)))
            .is_none());

        assert_eq!(coordinator.state(&id("a")).progress(), Some(0.7));
        assert_eq!(
            coordinator.state(&id("b")),
            DownloadState::Failed {
                reason: FailureReason::Network
            }
        );
    }

    #[test]
    fn test_pump_coalesces_progress() {
        let mut coordinator = DownloadCoordinator::new(catalog(&["a", "b"]));
        let recorder = observe(&coordinator);
        let a = started(coordinator.start(&id("a")).unwrap());
        let b = started(coordinator.start(&id("b")).unwrap());

        let updates = coordinator.updates();
        for value in [0.1, 0.3, 0.2, 0.5] {
            updates
                .try_send(update("a", a, UpdateKind::Progress(value)))
                .unwrap();
        }
        updates
            .try_send(update("b", b, UpdateKind::Progress(0.4)))
            .unwrap();
        updates
            .try_send(update("b", b, UpdateKind::Completed(None)))
            .unwrap();

        let events = coordinator.pump();

        assert_eq!(recorder.progress_of("a"), vec![0.5]);
        // Completion supersedes the queued progress of the same session
        assert!(recorder.progress_of("b").is_empty());
        assert_eq!(events.len(), 2);
        assert!(coordinator.pump().is_empty());
    }

    #[test]
    fn test_restore_completed() {
        let mut coordinator = DownloadCoordinator::new(catalog(&["a", "b"]));
        let recorder = observe(&coordinator);
        let session = started(coordinator.start(&id("b")).unwrap());

        let restored = coordinator.restore_completed(vec![
            (id("a"), Some(PathBuf::from("/media/a.m4a"))),
            (id("b"), None),
            (id("gone"), None),
        ]);

        assert_eq!(restored, 1);
        assert_eq!(
            coordinator.state(&id("a")),
            DownloadState::Complete {
                location: Some(PathBuf::from("/media/a.m4a"))
            }
        );
        assert_eq!(
            coordinator.state(&id("b")),
            DownloadState::InProgress {
                session,
                progress: 0.0
            }
        );
        assert_eq!(coordinator.start(&id("a")).unwrap(), StartOutcome::AlreadyComplete);
        // Only the start of "b" was observed
        assert_eq!(recorder.events().len(), 1);
    }

    #[test]
    fn test_set_catalog_cancels_orphans() {
        let mut coordinator = DownloadCoordinator::new(catalog(&["a", "b"]));
        coordinator.start(&id("a")).unwrap();
        coordinator.start(&id("b")).unwrap();

        let events = coordinator.set_catalog(catalog(&["a"]));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].station(), &id("b"));
        assert!(coordinator.state(&id("a")).is_in_progress());
        assert!(coordinator.start(&id("b")).is_err());
    }

    struct ScriptedFetcher {
        steps: Vec<f64>,
        result: std::result::Result<PathBuf, FailureReason>,
    }

    #[async_trait]
    impl MediaFetcher for ScriptedFetcher {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch(
            &self,
            _station: &Station,
            progress: ProgressReporter,
            _cancel: CancellationToken,
        ) -> std::result::Result<PathBuf, FailureReason> {
            for step in &self.steps {
                progress.report(*step);
                tokio::task::yield_now().await;
            }
            self.result.clone()
        }
    }

    struct StalledFetcher;

    #[async_trait]
    impl MediaFetcher for StalledFetcher {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn fetch(
            &self,
            _station: &Station,
            progress: ProgressReporter,
            cancel: CancellationToken,
        ) -> std::result::Result<PathBuf, FailureReason> {
            progress.report(0.1);
            cancel.cancelled().await;
            Err(FailureReason::Cancelled)
        }
    }

    async fn run_until_terminal(coordinator: &mut DownloadCoordinator, station: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !coordinator.state(&id(station)).is_terminal() {
                let update = coordinator.recv().await.unwrap();
                coordinator.process(update);
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_fetcher_drives_session_to_completion() {
        let fetcher = Arc::new(ScriptedFetcher {
            steps: vec![0.25, 0.5, 0.75, 1.0],
            result: Ok(PathBuf::from("/media/a.m4a")),
        });
        let mut coordinator = DownloadCoordinator::new(catalog(&["a"])).with_fetcher(fetcher);
        let recorder = observe(&coordinator);

        coordinator.start(&id("a")).unwrap();
        run_until_terminal(&mut coordinator, "a").await;

        let progress = recorder.progress_of("a");
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(
            coordinator.state(&id("a")),
            DownloadState::Complete {
                location: Some(PathBuf::from("/media/a.m4a"))
            }
        );
        assert!(matches!(
            recorder.events().last(),
            Some(DownloadEvent::Completed { location: Some(path), .. }) if path == Path::new("/media/a.m4a")
        ));
    }

    #[tokio::test]
    async fn test_fetcher_failure_reason_is_reported() {
        let fetcher = Arc::new(ScriptedFetcher {
            steps: vec![0.5],
            result: Err(FailureReason::Network),
        });
        let mut coordinator = DownloadCoordinator::new(catalog(&["a"])).with_fetcher(fetcher);

        coordinator.start(&id("a")).unwrap();
        run_until_terminal(&mut coordinator, "a").await;

        assert_eq!(
            coordinator.state(&id("a")),
            DownloadState::Failed {
                reason: FailureReason::Network
            }
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_fetch_task() {
        let mut coordinator =
            DownloadCoordinator::new(catalog(&["a"])).with_fetcher(Arc::new(StalledFetcher));
        let recorder = observe(&coordinator);

        coordinator.start(&id("a")).unwrap();
        coordinator.cancel(&id("a"));

        // The task's own cancellation report arrives late and is stale
        let late = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let update = coordinator.recv().await.unwrap();
                if matches!(update.kind, UpdateKind::Failed(_)) {
                    return update;
                }
            }
        })
        .await
        .unwrap();

        assert!(coordinator.apply(late).is_none());
        let failures = recorder
            .events()
            .iter()
            .filter(|e| matches!(e, DownloadEvent::Failed { .. }))
            .count();
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn test_parent_token_cancels_sessions() {
        let parent = CancellationToken::new();
        let mut coordinator = DownloadCoordinator::new(catalog(&["a"]))
            .with_fetcher(Arc::new(StalledFetcher))
            .with_cancel_token(&parent);

        let session = started(coordinator.start(&id("a")).unwrap());
        parent.cancel();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let update = coordinator.recv().await.unwrap();
                if update.kind == UpdateKind::Failed(FailureReason::Cancelled) {
                    assert_eq!(update.session, session);
                    coordinator.process(update);
                    break;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(
            coordinator.state(&id("a")),
            DownloadState::Failed {
                reason: FailureReason::Cancelled
            }
        );
    }
}
