use futures_util::StreamExt;
use reqwest::Url;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use vidscan_common::config::DownloadConfig;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("URL is empty or invalid")]
    InvalidUrl,
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("remote video exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("failed to write downloaded video: {0}")]
    Io(#[from] std::io::Error),
}

pub fn build_client(config: &DownloadConfig) -> Result<reqwest::Client, DownloadError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(DownloadError::Client)
}

/// Accept only absolute http(s) URLs.
pub fn parse_video_url(raw: &str) -> Result<Url, DownloadError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DownloadError::InvalidUrl);
    }
    let url = Url::parse(trimmed).map_err(|_| DownloadError::InvalidUrl)?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(DownloadError::InvalidUrl),
    }
}

/// Extension of the last path segment of `url`, if it has one.
pub fn url_file_name(url: &Url) -> Option<&str> {
    url.path_segments()?.last().filter(|s| s.contains('.'))
}

/// Stream `url` into `dest`, giving up once more than `max_bytes` arrive.
/// A partially written file is removed on failure.
pub async fn fetch_to_file(
    client: &reqwest::Client,
    url: &Url,
    dest: &Path,
    max_bytes: u64,
) -> Result<u64, DownloadError> {
    let result = stream_to_file(client, url, dest, max_bytes).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(dest).await;
    }
    result
}

async fn stream_to_file(
    client: &reqwest::Client,
    url: &Url,
    dest: &Path,
    max_bytes: u64,
) -> Result<u64, DownloadError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(DownloadError::HttpConnect)?;

    if !response.status().is_success() {
        return Err(DownloadError::HttpStatus(response.status().as_u16()));
    }
    if response.content_length().is_some_and(|len| len > max_bytes) {
        return Err(DownloadError::TooLarge { limit: max_bytes });
    }

    info!(url = %url, status = %response.status(), "downloading remote video");

    let mut file = tokio::fs::File::create(dest).await?;
    let mut written: u64 = 0;
    let mut byte_stream = response.bytes_stream();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(DownloadError::HttpStream)?;
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(DownloadError::TooLarge { limit: max_bytes });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    debug!(bytes = written, path = %dest.display(), "download complete");
    Ok(written)
}
