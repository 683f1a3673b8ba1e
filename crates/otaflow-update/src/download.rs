//! Byte range downloads with progress and size enforcement
//!
//! [`RangeDownloader`] fetches `[offset, offset + size)` of a remote or local
//! source into a destination file. Sizes are exact: a bounded range that ends
//! early fails with [`DownloadError::ShortRead`]. The unbounded mode
//! ([`ByteRange::tail`]) copies everything after the offset.
//!
//! HTTP sources are asked for the range with a `Range` header. Servers that
//! ignore it answer `200` and the offset is skipped while streaming.
//!
//! # Example
//!
//! ```no_run
//! use otaflow_core::types::NetworkConfig;
//! use otaflow_update::download::{ByteRange, RangeDownloader};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let downloader = RangeDownloader::new(&NetworkConfig::default())?;
//!     let outcome = downloader
//!         .download(
//!             "https://ota.example.com/update/foo.zip",
//!             ByteRange::bounded(1000, 50),
//!             Path::new("/data/ota_package/payload_metadata.bin"),
//!         )
//!         .await?;
//!     println!("wrote {} bytes", outcome.bytes_written);
//!     Ok(())
//! }
//! ```

use futures_util::StreamExt;
use otaflow_core::types::NetworkConfig;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};
use url::Url;

use crate::error::DownloadError;

/// Accept header sent with every request
const ACCEPT_VALUE: &str = "application/json, text/plain, */*";

/// Longest error body excerpt kept in [`DownloadError::HttpStatus`]
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Sentinel size meaning "everything after the offset"
pub const UNBOUNDED_SIZE: i64 = -1;

/// Part of a source to download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    /// `None` streams to the end of the source
    pub size: Option<u64>,
}

impl ByteRange {
    /// The whole source
    pub fn whole() -> Self {
        Self {
            offset: 0,
            size: None,
        }
    }

    /// Everything from `offset` on
    pub fn tail(offset: u64) -> Self {
        Self { offset, size: None }
    }

    /// Exactly `size` bytes starting at `offset`
    pub fn bounded(offset: u64, size: u64) -> Self {
        Self {
            offset,
            size: Some(size),
        }
    }

    /// Build from the signed convention where `-1` means unbounded
    pub fn new(offset: u64, size: i64) -> Result<Self, DownloadError> {
        match size {
            UNBOUNDED_SIZE => Ok(Self::tail(offset)),
            s if s >= 0 => Ok(Self::bounded(offset, s as u64)),
            s => Err(DownloadError::InvalidRange { offset, size: s }),
        }
    }

    /// `Range` header value, if one is needed
    fn header_value(&self) -> Option<String> {
        match self.size {
            Some(size) if size > 0 => Some(format!(
                "bytes={}-{}",
                self.offset,
                self.offset + size - 1
            )),
            _ if self.offset > 0 => Some(format!("bytes={}-", self.offset)),
            _ => None,
        }
    }
}

/// Download progress information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes expected, when known
    pub total_bytes: Option<u64>,

    /// Bytes written so far
    pub downloaded_bytes: u64,
}

impl DownloadProgress {
    pub fn new(total_bytes: Option<u64>) -> Self {
        Self {
            total_bytes,
            downloaded_bytes: 0,
        }
    }

    pub fn update(&mut self, downloaded_bytes: u64) {
        self.downloaded_bytes = downloaded_bytes;
    }

    /// `floor(downloaded * 100 / total)`, or `None` when the total is unknown
    pub fn percent(&self) -> Option<u8> {
        let total = self.total_bytes?;
        if total == 0 {
            return Some(100);
        }
        let pct = self.downloaded_bytes.saturating_mul(100) / total;
        Some(pct.min(100) as u8)
    }

    pub fn is_complete(&self) -> bool {
        self.total_bytes
            .is_some_and(|total| self.downloaded_bytes >= total)
    }
}

/// Result of a successful download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    pub bytes_written: u64,
}

/// Range downloader over HTTP(S) and `file://` sources
#[derive(Debug, Clone)]
pub struct RangeDownloader {
    client: reqwest::Client,
    connect_timeout: Duration,
    read_timeout: Duration,
    chunk_size: usize,
    progress_interval: Duration,
    log_interval: Duration,
    max_size: Option<u64>,
}

impl RangeDownloader {
    /// Create a downloader using the network section of the runtime config
    pub fn new(network: &NetworkConfig) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .user_agent(&network.user_agent)
            .connect_timeout(network.connect_timeout())
            .build()?;

        Ok(Self {
            client,
            connect_timeout: network.connect_timeout(),
            read_timeout: network.read_timeout(),
            chunk_size: network.download_chunk_size.max(1),
            progress_interval: network.progress_interval(),
            log_interval: network.log_interval(),
            max_size: None,
        })
    }

    /// Reject content larger than `limit` bytes
    pub fn with_max_size(mut self, limit: u64) -> Self {
        self.max_size = Some(limit);
        self
    }

    pub fn max_size(&self) -> Option<u64> {
        self.max_size
    }

    /// Download `range` of `url` into `destination`
    pub async fn download(
        &self,
        url: &str,
        range: ByteRange,
        destination: &Path,
    ) -> Result<DownloadOutcome, DownloadError> {
        self.download_with_progress(url, range, destination, |_| {})
            .await
    }

    /// Download `range` of `url` into `destination`, reporting progress
    ///
    /// `on_progress` is called at most once per progress interval, plus once
    /// when the transfer completes. The destination is created or truncated;
    /// after a failure it may hold a partial copy.
    pub async fn download_with_progress<F>(
        &self,
        url: &str,
        range: ByteRange,
        destination: &Path,
        on_progress: F,
    ) -> Result<DownloadOutcome, DownloadError>
    where
        F: FnMut(&DownloadProgress) + Send,
    {
        if let (Some(size), Some(limit)) = (range.size, self.max_size) {
            if size > limit {
                return Err(DownloadError::ContentTooLarge { size, limit });
            }
        }

        let parsed = Url::parse(url).map_err(|_| DownloadError::UnsupportedUrl {
            url: url.to_string(),
        })?;

        debug!(
            "Downloading {} (offset {}, size {:?}) to {}",
            url,
            range.offset,
            range.size,
            destination.display()
        );

        match parsed.scheme() {
            "http" | "https" => {
                self.download_http(url, range, destination, on_progress)
                    .await
            }
            "file" => {
                let source = parsed
                    .to_file_path()
                    .map_err(|_| DownloadError::UnsupportedUrl {
                        url: url.to_string(),
                    })?;
                self.download_file(&source, range, destination, on_progress)
                    .await
            }
            _ => Err(DownloadError::UnsupportedUrl {
                url: url.to_string(),
            }),
        }
    }

    async fn download_http<F>(
        &self,
        url: &str,
        range: ByteRange,
        destination: &Path,
        on_progress: F,
    ) -> Result<DownloadOutcome, DownloadError>
    where
        F: FnMut(&DownloadProgress) + Send,
    {
        let mut request = self.client.get(url).header(ACCEPT, ACCEPT_VALUE);
        if let Some(value) = range.header_value() {
            request = request.header(RANGE, value);
        }

        let response = tokio::time::timeout(self.connect_timeout + self.read_timeout, request.send())
            .await
            .map_err(|_| self.timeout_error())??;

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            let available = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.rsplit('/').next())
                .and_then(|v| v.parse::<u64>().ok());
            match available {
                // The range starts exactly at the end of the resource
                Some(len) if len >= range.offset => {
                    let total = range.size.or(Some(0));
                    let transfer =
                        Transfer::create(self, range, 0, total, destination, on_progress).await?;
                    return transfer.finish().await;
                }
                available => {
                    return Err(DownloadError::OffsetUnsatisfiable {
                        offset: range.offset,
                        available: available.unwrap_or(0),
                    });
                }
            }
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(DownloadError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        // 206 starts at the offset, anything else starts at byte 0
        let skip = if status == StatusCode::PARTIAL_CONTENT {
            0
        } else {
            range.offset
        };

        let declared = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let declared_payload = declared.map(|len| len.saturating_sub(skip));

        if range.size.is_none() {
            if let (Some(len), Some(limit)) = (declared_payload, self.max_size) {
                if len > limit {
                    return Err(DownloadError::ContentTooLarge { size: len, limit });
                }
            }
        }

        let total = range.size.or(declared_payload);
        let mut transfer = Transfer::create(self, range, skip, total, destination, on_progress).await?;

        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::time::timeout(self.read_timeout, stream.next())
                .await
                .map_err(|_| self.timeout_error())?;
            let Some(chunk) = next else {
                break;
            };
            let chunk: bytes::Bytes = chunk?;
            if transfer.accept(&chunk).await? {
                break;
            }
        }

        transfer.finish().await
    }

    async fn download_file<F>(
        &self,
        source: &Path,
        range: ByteRange,
        destination: &Path,
        on_progress: F,
    ) -> Result<DownloadOutcome, DownloadError>
    where
        F: FnMut(&DownloadProgress) + Send,
    {
        let mut file = File::open(source).await?;
        let len = file.metadata().await?.len();
        if len < range.offset {
            return Err(DownloadError::OffsetUnsatisfiable {
                offset: range.offset,
                available: len,
            });
        }

        let remaining = len - range.offset;
        if range.size.is_none() {
            if let Some(limit) = self.max_size {
                if remaining > limit {
                    return Err(DownloadError::ContentTooLarge {
                        size: remaining,
                        limit,
                    });
                }
            }
        }

        file.seek(std::io::SeekFrom::Start(range.offset)).await?;

        let total = range.size.or(Some(remaining));
        let mut transfer = Transfer::create(self, range, 0, total, destination, on_progress).await?;

        let mut buffer = vec![0u8; self.chunk_size];
        loop {
            let read = file.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            if transfer.accept(&buffer[..read]).await? {
                break;
            }
        }

        transfer.finish().await
    }

    fn timeout_error(&self) -> DownloadError {
        DownloadError::Timeout {
            secs: self.read_timeout.as_secs(),
        }
    }
}

/// Destination side of one download
struct Transfer<F> {
    file: File,
    path: PathBuf,
    range: ByteRange,
    skip_remaining: u64,
    max_size: Option<u64>,
    progress: DownloadProgress,
    on_progress: F,
    progress_interval: Duration,
    last_progress: Instant,
    log_interval: Duration,
    last_log: Instant,
}

impl<F> Transfer<F>
where
    F: FnMut(&DownloadProgress) + Send,
{
    async fn create(
        downloader: &RangeDownloader,
        range: ByteRange,
        skip: u64,
        total: Option<u64>,
        destination: &Path,
        on_progress: F,
    ) -> Result<Self, DownloadError> {
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let file = File::create(destination).await?;
        let now = Instant::now();

        Ok(Self {
            file,
            path: destination.to_path_buf(),
            range,
            skip_remaining: skip,
            max_size: downloader.max_size,
            progress: DownloadProgress::new(total),
            on_progress,
            progress_interval: downloader.progress_interval,
            last_progress: now,
            log_interval: downloader.log_interval,
            last_log: now,
        })
    }

    /// Consume one chunk of source bytes. Returns true once the range is complete.
    async fn accept(&mut self, mut chunk: &[u8]) -> Result<bool, DownloadError> {
        if self.skip_remaining > 0 {
            let skipped = (chunk.len() as u64).min(self.skip_remaining);
            self.skip_remaining -= skipped;
            chunk = &chunk[skipped as usize..];
            if chunk.is_empty() {
                return Ok(false);
            }
        }

        let written = self.progress.downloaded_bytes;
        let take = match self.range.size {
            Some(size) => (chunk.len() as u64).min(size - written) as usize,
            None => chunk.len(),
        };

        let new_total = written + take as u64;
        if let Some(limit) = self.max_size {
            if new_total > limit {
                return Err(DownloadError::ContentTooLarge {
                    size: new_total,
                    limit,
                });
            }
        }

        self.file.write_all(&chunk[..take]).await?;
        self.progress.update(new_total);
        self.report(false);

        Ok(self.range.size.is_some_and(|size| new_total >= size))
    }

    fn report(&mut self, force: bool) {
        let now = Instant::now();
        if force || now.duration_since(self.last_progress) >= self.progress_interval {
            (self.on_progress)(&self.progress);
            self.last_progress = now;
        }
        if now.duration_since(self.last_log) >= self.log_interval {
            match self.progress.percent() {
                Some(pct) => info!(
                    "Downloaded {} ({}%)",
                    human_readable_size(self.progress.downloaded_bytes),
                    pct
                ),
                None => info!(
                    "Downloaded {}",
                    human_readable_size(self.progress.downloaded_bytes)
                ),
            }
            self.last_log = now;
        }
    }

    async fn finish(mut self) -> Result<DownloadOutcome, DownloadError> {
        if self.skip_remaining > 0 {
            return Err(DownloadError::OffsetUnsatisfiable {
                offset: self.range.offset,
                available: self.range.offset - self.skip_remaining,
            });
        }

        let written = self.progress.downloaded_bytes;
        if let Some(expected) = self.range.size {
            if written < expected {
                return Err(DownloadError::ShortRead {
                    expected,
                    actual: written,
                });
            }
        }

        self.file.flush().await?;
        self.file.sync_all().await?;
        self.report(true);

        debug!(
            "Download complete: {} ({})",
            self.path.display(),
            human_readable_size(written)
        );

        Ok(DownloadOutcome {
            path: self.path,
            bytes_written: written,
        })
    }
}

/// Convert bytes to human-readable size
pub fn human_readable_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}
