//! Rate-limited streaming downloader.
//!
//! Fetches a resolved URL to a local path in 8 KiB chunks under a
//! bytes/second cap, trying three strategies in order: a plain GET with
//! automatic redirects, a GET following redirects by hand (capped hops,
//! missing Location is a hard failure), and a permissive GET that accepts
//! any 2xx/3xx and writes whatever arrives. A failed strategy deletes its
//! partial file before the next one runs; a failed download leaves nothing
//! at the destination.

mod throttle;

pub use throttle::throttle_delay;

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Write granularity; also the pacing quantum for the throttle.
const CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Overall per-attempt timeout, body included.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Bodies at or below this size are error pages, not media.
    pub min_viable_bytes: u64,
    /// Hop cap for the manual-redirect strategy.
    pub max_redirect_hops: usize,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(180),
            connect_timeout: Duration::from_secs(15),
            min_viable_bytes: 1024,
            max_redirect_hops: 5,
        }
    }
}

/// One strategy's failure. Collected into [`DownloadError`] when every
/// strategy is exhausted.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
    #[error("redirect without a Location header")]
    MissingLocation,
    #[error("invalid redirect target: {0}")]
    InvalidRedirect(String),
    #[error("gave up after {0} redirect hops")]
    TooManyRedirects(usize),
    #[error("body too small ({got} bytes, need more than {min})")]
    TooSmall { got: u64, min: u64 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal download failure. By the time this is returned, no partial file
/// remains at the destination path.
#[derive(Debug, Error)]
#[error("all download strategies failed for {url}: {}", attempts.join("; "))]
pub struct DownloadError {
    pub url: String,
    pub attempts: Vec<String>,
}

pub struct RateLimitedDownloader {
    /// Follows redirects on its own.
    auto_client: Client,
    /// Never follows redirects; used by the manual and permissive strategies.
    manual_client: Client,
    config: DownloaderConfig,
}

impl RateLimitedDownloader {
    pub fn new(config: DownloaderConfig) -> anyhow::Result<Self> {
        let auto_client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        let manual_client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            auto_client,
            manual_client,
            config,
        })
    }

    pub fn with_defaults() -> anyhow::Result<Self> {
        Self::new(DownloaderConfig::default())
    }

    /// Reported Content-Length of `url`, if the host answers a HEAD with
    /// one. Used to size cache reservations; None is not an error.
    pub async fn content_length(&self, url: &str) -> Option<u64> {
        match self.auto_client.head(url).send().await {
            Ok(response) if response.status().is_success() => response.content_length(),
            Ok(_) => None,
            Err(err) => {
                debug!("Content-length probe of {} failed: {}", url, err);
                None
            }
        }
    }

    /// Download `url` to `destination`, throttled to `max_bytes_per_sec`
    /// (zero disables throttling). Returns bytes written on success.
    pub async fn download(
        &self,
        url: &str,
        destination: &Path,
        max_bytes_per_sec: u64,
    ) -> Result<u64, DownloadError> {
        let mut attempts: Vec<String> = Vec::new();

        if let Some(parent) = destination.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                attempts.push(format!("setup: {}", err));
                return Err(DownloadError {
                    url: url.to_string(),
                    attempts,
                });
            }
        }

        for (name, strategy) in [
            ("direct", Strategy::Direct),
            ("manual-redirect", Strategy::ManualRedirect),
            ("permissive", Strategy::Permissive),
        ] {
            let result = match strategy {
                Strategy::Direct => self.direct_get(url, destination, max_bytes_per_sec).await,
                Strategy::ManualRedirect => {
                    self.manual_redirect_get(url, destination, max_bytes_per_sec)
                        .await
                }
                Strategy::Permissive => {
                    self.permissive_get(url, destination, max_bytes_per_sec).await
                }
            };

            match result {
                Ok(bytes_written) => {
                    info!(
                        "Downloaded {} bytes from {} via {} strategy",
                        bytes_written, url, name
                    );
                    self.advisory_format_check(destination);
                    return Ok(bytes_written);
                }
                Err(err) => {
                    debug!("Download strategy {} failed for {}: {}", name, url, err);
                    attempts.push(format!("{}: {}", name, err));
                    remove_partial(destination);
                }
            }
        }

        // Belt and braces: nothing may remain at the destination.
        remove_partial(destination);
        Err(DownloadError {
            url: url.to_string(),
            attempts,
        })
    }

    async fn direct_get(
        &self,
        url: &str,
        destination: &Path,
        max_bytes_per_sec: u64,
    ) -> Result<u64, StrategyError> {
        let response = self.auto_client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(StrategyError::Status(response.status()));
        }
        self.stream_to_file(response, destination, max_bytes_per_sec)
            .await
    }

    async fn manual_redirect_get(
        &self,
        url: &str,
        destination: &Path,
        max_bytes_per_sec: u64,
    ) -> Result<u64, StrategyError> {
        let mut current = url.to_string();
        for _hop in 0..=self.config.max_redirect_hops {
            let response = self.manual_client.get(&current).send().await?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or(StrategyError::MissingLocation)?;
                current = reqwest::Url::parse(&current)
                    .and_then(|base| base.join(location))
                    .map_err(|e| StrategyError::InvalidRedirect(e.to_string()))?
                    .to_string();
                debug!("Following redirect to {}", current);
                continue;
            }

            if !status.is_success() {
                return Err(StrategyError::Status(status));
            }
            return self
                .stream_to_file(response, destination, max_bytes_per_sec)
                .await;
        }
        Err(StrategyError::TooManyRedirects(
            self.config.max_redirect_hops,
        ))
    }

    /// Last resort for servers with nonstandard responses: any 2xx or 3xx
    /// counts, and whatever bytes arrive get written.
    async fn permissive_get(
        &self,
        url: &str,
        destination: &Path,
        max_bytes_per_sec: u64,
    ) -> Result<u64, StrategyError> {
        let response = self.manual_client.get(url).send().await?;
        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            return Err(StrategyError::Status(status));
        }
        self.stream_to_file(response, destination, max_bytes_per_sec)
            .await
    }

    /// Stream the body to disk in fixed chunks, sleeping as the pacing math
    /// dictates. Never buffers the full body.
    async fn stream_to_file(
        &self,
        response: reqwest::Response,
        destination: &Path,
        max_bytes_per_sec: u64,
    ) -> Result<u64, StrategyError> {
        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            // Advisory only: plenty of hosts mislabel media.
            if !content_type.starts_with("audio/")
                && !content_type.contains("octet-stream")
            {
                warn!(
                    "Content-type '{}' does not look like audio; downloading anyway",
                    content_type
                );
            }
        }

        let mut file = tokio::fs::File::create(destination).await?;
        let mut stream = response.bytes_stream();
        let started = Instant::now();
        let mut bytes_written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for piece in chunk.chunks(CHUNK_SIZE) {
                file.write_all(piece).await?;
                bytes_written += piece.len() as u64;
                if let Some(delay) =
                    throttle_delay(bytes_written, started.elapsed(), max_bytes_per_sec)
                {
                    tokio::time::sleep(delay).await;
                }
            }
        }
        file.flush().await?;
        drop(file);

        if bytes_written <= self.config.min_viable_bytes {
            return Err(StrategyError::TooSmall {
                got: bytes_written,
                min: self.config.min_viable_bytes,
            });
        }
        Ok(bytes_written)
    }

    /// Sniff the finished file and warn when it does not look like audio.
    /// Never fails the download.
    fn advisory_format_check(&self, destination: &Path) {
        match infer::get_from_path(destination) {
            Ok(Some(kind)) => {
                if kind.matcher_type() != infer::MatcherType::Audio {
                    warn!(
                        "Downloaded file {:?} sniffs as '{}', not audio",
                        destination,
                        kind.mime_type()
                    );
                }
            }
            Ok(None) => {
                warn!("Downloaded file {:?} has no recognizable format", destination);
            }
            Err(err) => {
                debug!("Format sniff of {:?} failed: {}", destination, err);
            }
        }
    }
}

enum Strategy {
    Direct,
    ManualRedirect,
    Permissive,
}

fn remove_partial(destination: &Path) {
    if destination.exists() {
        if let Err(err) = std::fs::remove_file(destination) {
            warn!("Failed to remove partial file {:?}: {}", destination, err);
        }
    }
}
