//! The radio owner task.
//!
//! [`Radio`] owns the playback state machine and the download coordinator and
//! is their only writer. Everything else talks to it through a cloneable
//! [`RadioHandle`]: commands go in over a channel, events come out over a
//! broadcast channel and through the synchronous observer registries.

use crate::catalog::{Catalog, StationId};
use crate::download::{
    DownloadCoordinator, DownloadEvent, DownloadObserver, DownloadState, StartOutcome,
};
use crate::error::{CoreError, Result};
use crate::fetcher::MediaFetcher;
use crate::library::DownloadLibrary;
use crate::observer::{ObserverId, ObserverRegistry};
use crate::playback::{PlaybackEvent, PlaybackObserver, PlaybackState, PlaybackStateMachine};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;

/// Events published by the radio
#[derive(Debug, Clone)]
pub enum RadioEvent {
    Playback(PlaybackEvent),
    Download(DownloadEvent),
    /// A command was rejected
    Error { message: String },
}

/// Read-only view of the radio state
#[derive(Debug, Clone)]
pub struct RadioSnapshot {
    pub catalog: Arc<Catalog>,
    pub playback: PlaybackState,
    pub downloads: HashMap<StationId, DownloadState>,
}

impl RadioSnapshot {
    /// Download state of `id`, [`DownloadState::NotStarted`] if unknown
    #[must_use]
    pub fn download(&self, id: &StationId) -> DownloadState {
        self.downloads.get(id).cloned().unwrap_or_default()
    }
}

enum Command {
    Play {
        id: StationId,
        reply: oneshot::Sender<Result<Option<PlaybackEvent>>>,
    },
    Toggle {
        id: StationId,
        reply: oneshot::Sender<Result<Option<PlaybackEvent>>>,
    },
    Pause {
        reply: oneshot::Sender<Option<PlaybackEvent>>,
    },
    Resume {
        reply: oneshot::Sender<Option<PlaybackEvent>>,
    },
    Stop {
        reply: oneshot::Sender<Option<PlaybackEvent>>,
    },
    StartDownload {
        id: StationId,
        reply: oneshot::Sender<Result<StartOutcome>>,
    },
    CancelDownload {
        id: StationId,
        reply: oneshot::Sender<Result<Option<DownloadEvent>>>,
    },
    Snapshot {
        reply: oneshot::Sender<RadioSnapshot>,
    },
    ReplaceCatalog {
        catalog: Arc<Catalog>,
        reply: oneshot::Sender<()>,
    },
}

/// Owner of playback and download state
pub struct Radio {
    playback: PlaybackStateMachine,
    downloads: DownloadCoordinator,
    library: Option<Arc<DownloadLibrary>>,
    recorder: Option<mpsc::UnboundedSender<(StationId, PathBuf)>>,
    commands: mpsc::Receiver<Command>,
    event_tx: broadcast::Sender<RadioEvent>,
    cancel_token: CancellationToken,
}

impl Radio {
    /// Create the owner and a handle to it. Nothing runs until [`Self::start`].
    #[must_use]
    pub fn new(catalog: Arc<Catalog>, cancel_token: CancellationToken) -> (Self, RadioHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
        let playback_observers: Arc<ObserverRegistry<dyn PlaybackObserver>> =
            Arc::new(ObserverRegistry::new());
        let download_observers: Arc<ObserverRegistry<dyn DownloadObserver>> =
            Arc::new(ObserverRegistry::new());

        let radio = Self {
            playback: PlaybackStateMachine::with_observers(
                Arc::clone(&catalog),
                Arc::clone(&playback_observers),
            ),
            downloads: DownloadCoordinator::new(catalog)
                .with_observers(Arc::clone(&download_observers))
                .with_cancel_token(&cancel_token),
            library: None,
            recorder: None,
            commands,
            event_tx: event_tx.clone(),
            cancel_token,
        };

        let handle = RadioHandle {
            commands: command_tx,
            event_tx,
            playback_observers,
            download_observers,
        };

        (radio, handle)
    }

    /// Download media with `fetcher`
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn MediaFetcher>) -> Self {
        self.downloads = self.downloads.with_fetcher(fetcher);
        self
    }

    /// Restore completed downloads from `library` and record new ones in it
    #[must_use]
    pub fn with_library(mut self, library: Arc<DownloadLibrary>) -> Self {
        self.library = Some(library);
        self
    }

    #[must_use]
    pub fn with_progress_buffer(mut self, capacity: usize) -> Self {
        self.downloads = self.downloads.with_progress_buffer(capacity);
        self
    }

    /// Spawn the owner loop
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!("Radio started");
        self.restore_library().await;
        let recording = self.library.clone().map(|library| {
            let (tx, rx) = mpsc::unbounded_channel();
            self.recorder = Some(tx);
            tokio::spawn(record_completed(library, rx))
        });

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!("Radio shutting down");
                    break;
                }
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle(command),
                        None => {
                            debug!("All radio handles dropped");
                            break;
                        }
                    }
                }
                Some(update) = self.downloads.recv() => {
                    let events = self.downloads.process(update);
                    self.publish_downloads(events);
                }
            }
        }

        let events = self.downloads.cancel_all();
        self.publish_downloads(events);

        // Closing the queue lets the recorder finish pending writes and exit
        self.recorder = None;
        if let Some(recording) = recording {
            if let Err(e) = recording.await {
                warn!("Download recorder failed: {}", e);
            }
        }
        if let Some(library) = &self.library {
            if let Err(e) = library.checkpoint().await {
                warn!("Failed to checkpoint download library: {}", e);
            }
        }
        info!("Radio stopped");
    }

    async fn restore_library(&mut self) {
        let Some(library) = &self.library else {
            return;
        };
        match library.all().await {
            Ok(records) => {
                let restored = self
                    .downloads
                    .restore_completed(records.into_iter().map(|r| (r.station_id, r.location)));
                info!("Restored {} completed downloads", restored);
            }
            Err(e) => warn!("Failed to read download library: {}", e),
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Play { id, reply } => {
                let result = self.playback.play(&id);
                self.publish_playback_result(&result);
                let _ = reply.send(result);
            }
            Command::Toggle { id, reply } => {
                let result = self.playback.toggle(&id);
                self.publish_playback_result(&result);
                let _ = reply.send(result);
            }
            Command::Pause { reply } => {
                let event = self.playback.pause();
                self.publish_playback(event.as_ref());
                let _ = reply.send(event);
            }
            Command::Resume { reply } => {
                let event = self.playback.resume();
                self.publish_playback(event.as_ref());
                let _ = reply.send(event);
            }
            Command::Stop { reply } => {
                let event = self.playback.stop();
                self.publish_playback(event.as_ref());
                let _ = reply.send(event);
            }
            Command::StartDownload { id, reply } => {
                let result = self.downloads.start(&id);
                match &result {
                    Ok(StartOutcome::Started(session)) => {
                        self.publish(RadioEvent::Download(DownloadEvent::Started {
                            station: id,
                            session: *session,
                        }));
                    }
                    Ok(StartOutcome::Joined(_) | StartOutcome::AlreadyComplete) => {}
                    Err(e) => self.publish_error(e),
                }
                let _ = reply.send(result);
            }
            Command::CancelDownload { id, reply } => {
                if !self.playback.catalog().contains(&id) {
                    let error = CoreError::StationNotFound { id };
                    self.publish_error(&error);
                    let _ = reply.send(Err(error));
                    return;
                }
                let event = self.downloads.cancel(&id);
                self.publish_downloads(event.iter().cloned());
                let _ = reply.send(Ok(event));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::ReplaceCatalog { catalog, reply } => {
                info!("Replacing catalog ({} stations)", catalog.len());
                let stopped = self.playback.replace_catalog(Arc::clone(&catalog));
                self.publish_playback(stopped.as_ref());
                let cancelled = self.downloads.set_catalog(catalog);
                self.publish_downloads(cancelled);
                let _ = reply.send(());
            }
        }
    }

    fn snapshot(&self) -> RadioSnapshot {
        RadioSnapshot {
            catalog: Arc::clone(self.playback.catalog()),
            playback: self.playback.state().clone(),
            downloads: self
                .downloads
                .states()
                .map(|(id, state)| (id.clone(), state.clone()))
                .collect(),
        }
    }

    fn publish(&self, event: RadioEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn publish_error(&self, error: &CoreError) {
        warn!("Rejected command: {}", error);
        self.publish(RadioEvent::Error {
            message: error.to_string(),
        });
    }

    fn publish_playback(&self, event: Option<&PlaybackEvent>) {
        if let Some(event) = event {
            self.publish(RadioEvent::Playback(event.clone()));
        }
    }

    fn publish_playback_result(&self, result: &Result<Option<PlaybackEvent>>) {
        match result {
            Ok(event) => self.publish_playback(event.as_ref()),
            Err(e) => self.publish_error(e),
        }
    }

    fn publish_downloads(&self, events: impl IntoIterator<Item = DownloadEvent>) {
        for event in events {
            if let DownloadEvent::Completed {
                station,
                location: Some(location),
                ..
            } = &event
            {
                if let Some(recorder) = &self.recorder {
                    let _ = recorder.send((station.clone(), location.clone()));
                }
            }
            self.publish(RadioEvent::Download(event));
        }
    }
}

/// Write completed downloads to the library in arrival order, off the owner loop
async fn record_completed(
    library: Arc<DownloadLibrary>,
    mut completed: mpsc::UnboundedReceiver<(StationId, PathBuf)>,
) {
    while let Some((station, location)) = completed.recv().await {
        if let Err(e) = library.record(&station, Some(location.as_path())).await {
            warn!("Failed to record download of {}: {}", station, e);
        }
    }
    debug!("Download recorder stopped");
}

impl std::fmt::Debug for Radio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Radio")
            .field("playback", &self.playback)
            .field("downloads", &self.downloads)
            .field("library", &self.library.is_some())
            .finish_non_exhaustive()
    }
}

/// Cloneable handle to a running [`Radio`]
#[derive(Clone)]
pub struct RadioHandle {
    commands: mpsc::Sender<Command>,
    event_tx: broadcast::Sender<RadioEvent>,
    playback_observers: Arc<ObserverRegistry<dyn PlaybackObserver>>,
    download_observers: Arc<ObserverRegistry<dyn DownloadObserver>>,
}

impl RadioHandle {
    async fn request<R>(&self, command: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| CoreError::ServiceStopped)?;
        response.await.map_err(|_| CoreError::ServiceStopped)
    }

    /// Play `id`, switching directly from any current station
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StationNotFound`] for an unknown station, or
    /// [`CoreError::ServiceStopped`] if the radio is no longer running.
    pub async fn play(&self, id: &StationId) -> Result<Option<PlaybackEvent>> {
        let id = id.clone();
        self.request(|reply| Command::Play { id, reply }).await?
    }

    /// Pause `id` if it is playing, otherwise play it
    ///
    /// # Errors
    ///
    /// Same as [`Self::play`].
    pub async fn toggle(&self, id: &StationId) -> Result<Option<PlaybackEvent>> {
        let id = id.clone();
        self.request(|reply| Command::Toggle { id, reply }).await?
    }

    /// # Errors
    ///
    /// Returns [`CoreError::ServiceStopped`] if the radio is no longer running.
    pub async fn pause(&self) -> Result<Option<PlaybackEvent>> {
        self.request(|reply| Command::Pause { reply }).await
    }

    /// # Errors
    ///
    /// Returns [`CoreError::ServiceStopped`] if the radio is no longer running.
    pub async fn resume(&self) -> Result<Option<PlaybackEvent>> {
        self.request(|reply| Command::Resume { reply }).await
    }

    /// # Errors
    ///
    /// Returns [`CoreError::ServiceStopped`] if the radio is no longer running.
    pub async fn stop(&self) -> Result<Option<PlaybackEvent>> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Start (or join) the download of `id`
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StationNotFound`] for an unknown station, or
    /// [`CoreError::ServiceStopped`] if the radio is no longer running.
    pub async fn start_download(&self, id: &StationId) -> Result<StartOutcome> {
        let id = id.clone();
        self.request(|reply| Command::StartDownload { id, reply })
            .await?
    }

    /// # Errors
    ///
    /// Returns [`CoreError::StationNotFound`] if `id` is not in the catalog,
    /// or [`CoreError::ServiceStopped`] if the radio is no longer running.
    pub async fn cancel_download(&self, id: &StationId) -> Result<Option<DownloadEvent>> {
        let id = id.clone();
        self.request(|reply| Command::CancelDownload { id, reply })
            .await?
    }

    /// # Errors
    ///
    /// Returns [`CoreError::ServiceStopped`] if the radio is no longer running.
    pub async fn snapshot(&self) -> Result<RadioSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Swap the catalog. Playback and downloads of removed stations stop.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ServiceStopped`] if the radio is no longer running.
    pub async fn replace_catalog(&self, catalog: Arc<Catalog>) -> Result<()> {
        self.request(|reply| Command::ReplaceCatalog { catalog, reply })
            .await
    }

    /// Subscribe to radio events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RadioEvent> {
        self.event_tx.subscribe()
    }

    /// Observe playback events synchronously on the owner task
    pub fn add_playback_observer(&self, observer: Weak<dyn PlaybackObserver>) -> ObserverId {
        self.playback_observers.register(observer)
    }

    pub fn remove_playback_observer(&self, id: ObserverId) -> bool {
        self.playback_observers.unregister(id)
    }

    /// Observe download events synchronously on the owner task
    pub fn add_download_observer(&self, observer: Weak<dyn DownloadObserver>) -> ObserverId {
        self.download_observers.register(observer)
    }

    pub fn remove_download_observer(&self, id: ObserverId) -> bool {
        self.download_observers.unregister(id)
    }

    /// Whether the owner loop is still accepting commands
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

impl std::fmt::Debug for RadioHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadioHandle")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
