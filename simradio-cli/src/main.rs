mod command;
mod console;

use crate::command::{Command, HELP};
use crate::console::{describe_playback, render_catalog, render_state, ConsoleObserver};
use simradio_core::{
    Catalog, CoreError, DownloadLibrary, LoggingConfig, Radio, RadioConfig, RadioEvent,
    RadioHandle, StartOutcome, StationId,
};
use simradio_http::HttpMediaFetcher;
use std::fs::File;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long shutdown waits for the radio to cancel downloads and close the library
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() {
    // Logging settings come from the config, so read it before anything logs
    let config = RadioConfig::load_or_create();
    let logging = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    init_tracing(&logging);

    let config = match config {
        Ok(config) => config,
        Err(CoreError::ConfigNotFound { path }) => {
            println!(
                "Created a config template at {}. Edit it and restart.",
                path.display()
            );
            std::process::exit(0);
        }
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let catalog = match Catalog::load(&config.catalog.path) {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            error!(
                "Failed to load catalog from {}: {e}",
                config.catalog.path.display()
            );
            std::process::exit(1);
        }
    };

    let fetcher = match HttpMediaFetcher::from_config(&config.downloads) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    let library = if config.downloads.library_enabled {
        runtime.block_on(async {
            match DownloadLibrary::new().await {
                Ok(library) => Some(Arc::new(library)),
                Err(e) => {
                    warn!("Download library unavailable, downloads won't be remembered: {e}");
                    None
                }
            }
        })
    } else {
        None
    };

    // Create shared cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // Set up Ctrl+C handler to trigger graceful shutdown
    let ctrlc_token = cancel_token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C, shutting down gracefully...");
        ctrlc_token.cancel();
    }) {
        error!("Failed to set Ctrl+C handler: {}", e);
    }

    let (radio, handle) = Radio::new(catalog, cancel_token.clone());
    let mut radio = radio
        .with_fetcher(fetcher)
        .with_progress_buffer(config.downloads.progress_buffer);
    if let Some(library) = library {
        radio = radio.with_library(library);
    }

    runtime.block_on(async move {
        let radio_task = radio.start();
        tokio::spawn(log_radio_events(handle.clone()));

        let console = Arc::new(ConsoleObserver::default());
        let playback: Weak<ConsoleObserver> = Arc::downgrade(&console);
        let downloads: Weak<ConsoleObserver> = Arc::downgrade(&console);
        let playback_id = handle.add_playback_observer(playback);
        let download_id = handle.add_download_observer(downloads);

        println!("SimRadio ready. Type 'help' for commands.");
        read_commands(&handle, &cancel_token).await;

        handle.remove_playback_observer(playback_id);
        handle.remove_download_observer(download_id);
        cancel_token.cancel();

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, radio_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Radio task failed: {e}"),
            Err(_) => warn!("Radio did not shut down within {:?}", SHUTDOWN_TIMEOUT),
        }
    });

    // A pending stdin read would otherwise keep the runtime alive
    runtime.shutdown_timeout(Duration::from_millis(100));
    info!("Goodbye");
}

/// Read and run commands from stdin until quit, end of input or cancellation
async fn read_commands(handle: &RadioHandle, cancel_token: &CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            () = cancel_token.cancelled() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read input: {e}");
                break;
            }
        };

        match Command::parse(&line) {
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => {
                if let Err(e) = run_command(handle, command).await {
                    println!("{e}");
                    if matches!(e, CoreError::ServiceStopped) {
                        break;
                    }
                }
            }
            Ok(None) => {}
            Err(e) => println!("{e}"),
        }
    }
}

async fn run_command(handle: &RadioHandle, command: Command) -> Result<(), CoreError> {
    match command {
        Command::List => print!("{}", render_catalog(&handle.snapshot().await?)),
        Command::State => println!("{}", render_state(&handle.snapshot().await?)),
        Command::Play(id) => {
            if handle.play(&id).await?.is_none() {
                println!("Already playing {id}");
            }
        }
        Command::Toggle(id) => {
            handle.toggle(&id).await?;
        }
        Command::Pause => {
            if handle.pause().await?.is_none() {
                println!("Nothing is playing");
            }
        }
        Command::Resume => {
            if handle.resume().await?.is_none() {
                let snapshot = handle.snapshot().await?;
                println!("Nothing to resume ({})", describe_playback(&snapshot.playback));
            }
        }
        Command::Stop => {
            if handle.stop().await?.is_none() {
                println!("Already stopped");
            }
        }
        Command::Download(id) => report_start(&id, handle.start_download(&id).await?),
        Command::Cancel(id) => {
            if handle.cancel_download(&id).await?.is_none() {
                println!("{id} is not downloading");
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}

fn report_start(id: &StationId, outcome: StartOutcome) {
    match outcome {
        StartOutcome::Started(_) => {}
        StartOutcome::Joined(_) => println!("{id} is already downloading"),
        StartOutcome::AlreadyComplete => println!("{id} is already downloaded"),
    }
}

/// Log radio events for diagnostics
async fn log_radio_events(handle: RadioHandle) {
    let mut rx = handle.subscribe();
    drop(handle);

    loop {
        match rx.recv().await {
            Ok(RadioEvent::Error { message }) => warn!("Radio error: {}", message),
            Ok(event) => debug!("Radio event: {:?}", event),
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!("Radio event log lagged by {} events", n);
            }
        }
    }
}

/// Log to stderr, and to the log file when `[logging] enabled` is set.
///
/// `RUST_LOG` overrides the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(&logging.level));

    let file_layer = logging.enabled.then(open_log_file).flatten().map(|file| {
        tracing_subscriber::fmt::layer()
            .with_writer(Arc::new(file))
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
}

/// Filter for a configured level, falling back to `info` when it doesn't parse
fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|e| {
        eprintln!("Invalid log level {level:?} ({e}), using info");
        EnvFilter::new("info")
    })
}

/// Truncate and open the log file, creating its directory
fn open_log_file() -> Option<File> {
    let log_path = simradio_core::paths::log_path();
    let opened = log_path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|()| File::create(&log_path));

    match opened {
        Ok(file) => Some(file),
        Err(e) => {
            // Tracing is not up yet
            eprintln!("Failed to create log file at {}: {e}", log_path.display());
            None
        }
    }
}
