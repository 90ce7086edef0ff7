//! Station playback state and its transition rules.

use crate::catalog::{Catalog, Station, StationId};
use crate::error::{CoreError, Result};
use crate::observer::{ObserverId, ObserverRegistry};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Current playback state. Exactly one variant holds at any time, and the
/// station of `Paused`/`Playing` is always a member of the current catalog.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Paused(Arc<Station>),
    Playing(Arc<Station>),
}

impl PlaybackState {
    /// The station being played or paused
    #[must_use]
    pub const fn station(&self) -> Option<&Arc<Station>> {
        match self {
            Self::Idle => None,
            Self::Paused(station) | Self::Playing(station) => Some(station),
        }
    }

    #[must_use]
    pub fn station_id(&self) -> Option<&StationId> {
        self.station().map(|s| &s.id)
    }

    #[must_use]
    pub const fn status(&self) -> PlaybackStatus {
        match self {
            Self::Idle => PlaybackStatus::Idle,
            Self::Paused(_) => PlaybackStatus::Paused,
            Self::Playing(_) => PlaybackStatus::Playing,
        }
    }

    #[must_use]
    pub const fn is_playing(&self) -> bool {
        matches!(self, Self::Playing(_))
    }

    /// Check if `id` is the station currently playing
    #[must_use]
    pub fn is_playing_station(&self, id: &StationId) -> bool {
        matches!(self, Self::Playing(station) if station.id == *id)
    }
}

/// Variant of [`PlaybackState`] without its station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackStatus {
    Idle,
    Paused,
    Playing,
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Paused => "paused",
            Self::Playing => "playing",
        })
    }
}

/// Commands accepted by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackCommand {
    Play,
    Pause,
    Resume,
    Stop,
}

impl fmt::Display for PlaybackCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
        })
    }
}

/// One notification per state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// A station started (or resumed) playing
    Started {
        station: Arc<Station>,
        /// Station that was implicitly stopped to start this one
        previous: Option<Arc<Station>>,
        /// True when the same station left `Paused`
        resumed: bool,
    },
    /// The playing station was paused
    Paused { station: Arc<Station> },
    /// Playback stopped, state is now idle
    Stopped { station: Arc<Station> },
}

impl PlaybackEvent {
    /// The station the event is about
    #[must_use]
    pub const fn station(&self) -> &Arc<Station> {
        match self {
            Self::Started { station, .. } | Self::Paused { station } | Self::Stopped { station } => {
                station
            }
        }
    }
}

/// Subscriber to playback transitions.
///
/// Called synchronously on the thread that performed the transition;
/// UI consumers should hand the event over to their own thread.
pub trait PlaybackObserver: Send + Sync {
    fn on_playback_event(&self, event: &PlaybackEvent);
}

/// Owner of [`PlaybackState`]. All mutation goes through `&mut self`, so
/// there is exactly one writer.
pub struct PlaybackStateMachine {
    catalog: Arc<Catalog>,
    state: PlaybackState,
    observers: Arc<ObserverRegistry<dyn PlaybackObserver>>,
}

impl PlaybackStateMachine {
    #[must_use]
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self::with_observers(catalog, Arc::new(ObserverRegistry::new()))
    }

    /// Create a state machine that notifies an existing registry
    #[must_use]
    pub fn with_observers(
        catalog: Arc<Catalog>,
        observers: Arc<ObserverRegistry<dyn PlaybackObserver>>,
    ) -> Self {
        Self {
            catalog,
            state: PlaybackState::Idle,
            observers,
        }
    }

    #[must_use]
    pub const fn state(&self) -> &PlaybackState {
        &self.state
    }

    #[must_use]
    pub const fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    #[must_use]
    pub const fn observers(&self) -> &Arc<ObserverRegistry<dyn PlaybackObserver>> {
        &self.observers
    }

    pub fn add_observer(&self, observer: Weak<dyn PlaybackObserver>) -> ObserverId {
        self.observers.register(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers.unregister(id)
    }

    /// Play `id`, implicitly stopping any other station.
    ///
    /// Returns the emitted event, or `None` if `id` is already playing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StationNotFound`] if `id` is not in the catalog;
    /// the state is left unchanged.
    pub fn play(&mut self, id: &StationId) -> Result<Option<PlaybackEvent>> {
        let station = self
            .catalog
            .station(id)
            .cloned()
            .ok_or_else(|| CoreError::StationNotFound { id: id.clone() })?;

        let event = match &self.state {
            PlaybackState::Playing(current) if current.id == station.id => {
                debug!("Station {} is already playing", station.id);
                return Ok(None);
            }
            PlaybackState::Paused(current) if current.id == station.id => PlaybackEvent::Started {
                station: Arc::clone(&station),
                previous: None,
                resumed: true,
            },
            PlaybackState::Paused(current) | PlaybackState::Playing(current) => {
                PlaybackEvent::Started {
                    station: Arc::clone(&station),
                    previous: Some(Arc::clone(current)),
                    resumed: false,
                }
            }
            PlaybackState::Idle => PlaybackEvent::Started {
                station: Arc::clone(&station),
                previous: None,
                resumed: false,
            },
        };

        Ok(Some(self.transition(PlaybackState::Playing(station), event)))
    }

    /// Pause the playing station. No-op unless playing.
    pub fn pause(&mut self) -> Option<PlaybackEvent> {
        match &self.state {
            PlaybackState::Playing(station) => {
                let station = Arc::clone(station);
                let event = PlaybackEvent::Paused {
                    station: Arc::clone(&station),
                };
                Some(self.transition(PlaybackState::Paused(station), event))
            }
            PlaybackState::Idle | PlaybackState::Paused(_) => {
                self.ignore(PlaybackCommand::Pause);
                None
            }
        }
    }

    /// Resume the paused station. No-op unless paused.
    pub fn resume(&mut self) -> Option<PlaybackEvent> {
        match &self.state {
            PlaybackState::Paused(station) => {
                let station = Arc::clone(station);
                let event = PlaybackEvent::Started {
                    station: Arc::clone(&station),
                    previous: None,
                    resumed: true,
                };
                Some(self.transition(PlaybackState::Playing(station), event))
            }
            PlaybackState::Idle | PlaybackState::Playing(_) => {
                self.ignore(PlaybackCommand::Resume);
                None
            }
        }
    }

    /// Stop playback. No-op when already idle.
    pub fn stop(&mut self) -> Option<PlaybackEvent> {
        match &self.state {
            PlaybackState::Paused(station) | PlaybackState::Playing(station) => {
                let event = PlaybackEvent::Stopped {
                    station: Arc::clone(station),
                };
                Some(self.transition(PlaybackState::Idle, event))
            }
            PlaybackState::Idle => {
                debug!("Already stopped");
                None
            }
        }
    }

    /// Pause `id` if it is playing, otherwise play it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StationNotFound`] if `id` is not in the catalog.
    pub fn toggle(&mut self, id: &StationId) -> Result<Option<PlaybackEvent>> {
        if self.state.is_playing_station(id) {
            Ok(self.pause())
        } else {
            self.play(id)
        }
    }

    /// Swap the catalog. Stops playback if the current station is gone.
    pub fn replace_catalog(&mut self, catalog: Arc<Catalog>) -> Option<PlaybackEvent> {
        self.catalog = catalog;

        let orphaned = self
            .state
            .station_id()
            .is_some_and(|id| !self.catalog.contains(id));

        if orphaned {
            debug!("Current station left the catalog, stopping");
            self.stop()
        } else {
            None
        }
    }

    fn ignore(&self, command: PlaybackCommand) {
        let error = CoreError::InvalidTransition {
            command,
            state: self.state.status(),
        };
        debug!("Ignoring command: {error}");
    }

    fn transition(&mut self, next: PlaybackState, event: PlaybackEvent) -> PlaybackEvent {
        debug!(
            "Playback {} -> {} ({})",
            self.state.status(),
            next.status(),
            event.station().id
        );
        self.state = next;
        self.observers.notify_all(|o| o.on_playback_event(&event));
        event
    }
}

impl fmt::Debug for PlaybackStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackStateMachine")
            .field("state", &self.state)
            .field("stations", &self.catalog.len())
            .field("observers", &self.observers)
            .finish()
    }
}
