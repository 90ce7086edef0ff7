use async_trait::async_trait;
use futures::StreamExt;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use simradio_core::{
    CancellationToken, DownloadConfig, FailureReason, MediaFetcher, ProgressReporter, Station,
};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

/// Default timeout for connecting, for response headers and for each body read (30 seconds)
const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Default number of retry attempts
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Extension used when the media URL has none
const FALLBACK_EXTENSION: &str = "media";
const PARTIAL_SUFFIX: &str = "part";

#[derive(Debug, Error)]
pub enum FetcherError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Downloads station media over HTTP into a directory.
///
/// Bodies are streamed to `<directory>/<station-id>.<ext>.part` and renamed
/// into place once complete, so a finished file is never partial.
pub struct HttpMediaFetcher {
    client: ClientWithMiddleware,
    directory: PathBuf,
    idle_timeout: Duration,
}

impl HttpMediaFetcher {
    /// Create a fetcher with a 30-second timeout and 3 retries.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, FetcherError> {
        Self::with_options(
            directory,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            DEFAULT_MAX_RETRIES,
        )
    }

    /// Create a fetcher from the `[downloads]` config section.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn from_config(config: &DownloadConfig) -> Result<Self, FetcherError> {
        Self::with_options(&config.directory, config.timeout(), config.max_retries)
    }

    /// Create a fetcher with custom timeout and retry settings.
    ///
    /// `timeout` bounds connecting, waiting for response headers and each
    /// wait for more body data, not the whole transfer.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_options(
        directory: impl Into<PathBuf>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, FetcherError> {
        let base_client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!("SimRadio/", env!("CARGO_PKG_VERSION")))
            .build()?;

        // Transient failures (5xx, 408, 429, connection errors) are retried
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let client = ClientBuilder::new(base_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            directory: directory.into(),
            idle_timeout: timeout,
        })
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Final location of a station's media
    #[must_use]
    pub fn destination(&self, station: &Station) -> PathBuf {
        let extension = station
            .media_url
            .as_ref()
            .and_then(url_extension)
            .unwrap_or_else(|| FALLBACK_EXTENSION.to_string());
        self.directory
            .join(format!("{}.{}", station.id, extension))
    }

    async fn transfer(
        &self,
        url: &Url,
        partial: &Path,
        progress: &ProgressReporter,
    ) -> Result<(), FailureReason> {
        let request = self.client.get(url.clone()).send();
        let response = match tokio::time::timeout(self.idle_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("Request for {} failed: {}", url, e);
                return Err(FailureReason::Network);
            }
            Err(_) => {
                warn!("No response from {} within {:?}", url, self.idle_timeout);
                return Err(FailureReason::Network);
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!("{} returned status: {}", url, status);
            return Err(FailureReason::Network);
        }

        let total = response.content_length();
        debug!("Receiving {} ({:?} bytes)", url, total);

        if let Some(parent) = partial.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(storage)?;
        }
        let mut file = tokio::fs::File::create(partial).await.map_err(storage)?;

        let mut body = response.bytes_stream();
        let mut received: u64 = 0;
        loop {
            let chunk = match tokio::time::timeout(self.idle_timeout, body.next()).await {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(e))) => {
                    warn!("Reading body of {} failed: {}", url, e);
                    return Err(FailureReason::Network);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("No data from {} for {:?}", url, self.idle_timeout);
                    return Err(FailureReason::Network);
                }
            };

            file.write_all(&chunk).await.map_err(storage)?;
            received += chunk.len() as u64;
            progress.report_bytes(received, total);
        }

        file.flush().await.map_err(storage)?;
        if total.is_none() {
            progress.report(1.0);
        }
        Ok(())
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(
        &self,
        station: &Station,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<PathBuf, FailureReason> {
        let Some(url) = station.media_url.as_ref() else {
            warn!("Station {} has no media URL", station.id);
            return Err(FailureReason::Network);
        };

        let destination = self.destination(station);
        let partial = partial_path(&destination);
        info!("Downloading {} from {} to {:?}", station.id, url, destination);

        let result = tokio::select! {
            () = cancel.cancelled() => Err(FailureReason::Cancelled),
            result = self.transfer(url, &partial, &progress) => result,
        };

        let result = match result {
            Ok(()) => tokio::fs::rename(&partial, &destination)
                .await
                .map_err(storage),
            Err(reason) => Err(reason),
        };

        match result {
            Ok(()) => {
                info!("Downloaded {} to {:?}", station.id, destination);
                Ok(destination)
            }
            Err(reason) => {
                remove_partial(&partial).await;
                Err(reason)
            }
        }
    }
}

fn storage(e: io::Error) -> FailureReason {
    warn!("Storage error: {}", e);
    FailureReason::Storage
}

fn url_extension(url: &Url) -> Option<String> {
    Path::new(url.path())
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(char::is_alphanumeric))
        .map(str::to_ascii_lowercase)
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

async fn remove_partial(partial: &Path) {
    match tokio::fs::remove_file(partial).await {
        Ok(()) => debug!("Removed partial download {:?}", partial),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial download {:?}: {}", partial, e),
    }
}
