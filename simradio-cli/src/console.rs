//! Console rendering of radio state and events.

use simradio_core::{
    DownloadEvent, DownloadObserver, DownloadState, PlaybackEvent, PlaybackObserver,
    PlaybackState, RadioSnapshot, StationId,
};
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Mutex, PoisonError};

/// Progress is printed in steps of this many percent
const PROGRESS_STEP: u8 = 25;

/// Prints playback and download events as they happen
#[derive(Debug, Default)]
pub struct ConsoleObserver {
    last_step: Mutex<HashMap<StationId, u8>>,
}

impl ConsoleObserver {
    /// Whether `progress` crossed into a new step for `station`
    fn crossed_step(&self, station: &StationId, progress: f64) -> bool {
        let step = percent(progress) / PROGRESS_STEP;
        let mut last = self.last_step.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = last.insert(station.clone(), step);
        previous.map_or(step > 0, |p| step > p)
    }
}

impl PlaybackObserver for ConsoleObserver {
    fn on_playback_event(&self, event: &PlaybackEvent) {
        println!("{}", describe_playback_event(event));
    }
}

impl DownloadObserver for ConsoleObserver {
    fn on_download_event(&self, event: &DownloadEvent) {
        match event {
            DownloadEvent::Progress {
                station, progress, ..
            } => {
                if self.crossed_step(station, *progress) {
                    println!("{station}: {}%", percent(*progress));
                }
            }
            DownloadEvent::Started { station, .. } => {
                self.last_step
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(station);
                println!("{station}: download started");
            }
            DownloadEvent::Completed {
                station, location, ..
            } => match location {
                Some(path) => println!("{station}: downloaded to {}", path.display()),
                None => println!("{station}: downloaded"),
            },
            DownloadEvent::Failed {
                station, reason, ..
            } => println!("{station}: download failed ({reason})"),
        }
    }
}

#[must_use]
pub fn describe_playback_event(event: &PlaybackEvent) -> String {
    match event {
        PlaybackEvent::Started {
            station,
            resumed: true,
            ..
        } => format!("Resumed {}", station.title),
        PlaybackEvent::Started {
            station,
            previous: Some(previous),
            ..
        } => format!("Switched from {} to {}", previous.title, station.title),
        PlaybackEvent::Started { station, .. } => format!("Playing {}", station.title),
        PlaybackEvent::Paused { station } => format!("Paused {}", station.title),
        PlaybackEvent::Stopped { station } => format!("Stopped {}", station.title),
    }
}

#[must_use]
pub fn describe_download(state: &DownloadState) -> String {
    match state {
        DownloadState::NotStarted => String::new(),
        DownloadState::InProgress { progress, .. } => format!("downloading {}%", percent(*progress)),
        DownloadState::Complete { .. } => "downloaded".to_string(),
        DownloadState::Failed { reason } => format!("download {reason}"),
    }
}

#[must_use]
pub fn describe_playback(state: &PlaybackState) -> String {
    match state {
        PlaybackState::Idle => "Idle".to_string(),
        PlaybackState::Paused(station) => format!("Paused: {} ({})", station.title, station.id),
        PlaybackState::Playing(station) => format!("Playing: {} ({})", station.title, station.id),
    }
}

/// Catalog listing with playback and download markers
#[must_use]
pub fn render_catalog(snapshot: &RadioSnapshot) -> String {
    let mut output = String::new();
    for series in snapshot.catalog.series() {
        let _ = writeln!(output, "{}", series.title);
        for station in &series.stations {
            let marker = match &snapshot.playback {
                PlaybackState::Playing(s) if s.id == station.id => '>',
                PlaybackState::Paused(s) if s.id == station.id => '=',
                _ => ' ',
            };
            let _ = write!(output, " {marker} {:<16} {}", station.id.as_str(), station.title);
            if !station.genre.is_empty() {
                let _ = write!(output, " - {}", station.genre);
            }
            let download = describe_download(&snapshot.download(&station.id));
            if !download.is_empty() {
                let _ = write!(output, " [{download}]");
            }
            output.push('\n');
        }
    }
    output
}

/// Playback state and unfinished downloads
#[must_use]
pub fn render_state(snapshot: &RadioSnapshot) -> String {
    let mut output = describe_playback(&snapshot.playback);
    let mut active: Vec<_> = snapshot
        .downloads
        .iter()
        .filter(|(_, state)| state.is_in_progress())
        .collect();
    active.sort_by(|a, b| a.0.cmp(b.0));
    for (id, state) in active {
        let _ = write!(output, "\n  {id}: {}", describe_download(state));
    }
    output
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn percent(progress: f64) -> u8 {
    (progress.clamp(0.0, 1.0) * 100.0).round() as u8
}
