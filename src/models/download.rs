use crate::config::schema::DownloadConfig;
use crate::error::{LlamaCppError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Transfers a model file from a URL to a local path
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    /// Download `url` into `dest`, returning the number of bytes written.
    ///
    /// `dest` must only appear once the transfer is complete. A failed
    /// transfer may leave partial data next to it.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64>;

    /// Get fetcher name for logging/debugging
    fn fetcher_name(&self) -> &str;
}

/// HTTP(S) downloader with progress tracking
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    show_progress: bool,
}

impl HttpFetcher {
    /// Create new downloader from config
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| LlamaCppError::Fetch(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            show_progress: config.show_progress,
        })
    }

    fn progress_bar(&self, total_size: Option<u64>) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        match total_size {
            Some(total) => {
                let pb = ProgressBar::new(total);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("#>-"),
                );
                pb.set_message(format!("Downloading {}", format_bytes(total)));
                pb
            }
            None => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner} Downloading {bytes} ({elapsed})")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                pb.enable_steady_tick(Duration::from_millis(120));
                pb
            }
        }
    }
}

#[async_trait]
impl ModelFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        tracing::info!("Downloading {url} to {}", dest.display());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LlamaCppError::Fetch(format!("Request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlamaCppError::Fetch(format!("{url} returned HTTP {status}")));
        }

        let total_size = response.content_length();
        let progress = self.progress_bar(total_size);

        let part_path = part_path(dest);
        let mut file = tokio::fs::File::create(&part_path).await?;
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                progress.abandon();
                LlamaCppError::Fetch(format!("Transfer interrupted after {downloaded} bytes: {e}"))
            })?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            progress.set_position(downloaded);
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(expected) = total_size {
            if downloaded != expected {
                progress.abandon();
                return Err(LlamaCppError::Fetch(format!(
                    "Transfer ended after {downloaded} of {expected} bytes"
                )));
            }
        }

        tokio::fs::rename(&part_path, dest).await?;
        progress.finish_and_clear();

        tracing::info!("Downloaded {} to {}", format_bytes(downloaded), dest.display());
        Ok(downloaded)
    }

    fn fetcher_name(&self) -> &str {
        "http"
    }
}

/// Sibling path a transfer writes to before it is complete
#[must_use]
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

/// Destination filename for a model URL: its final path segment, percent-decoded
pub fn filename_from_url(url: &str) -> Result<String> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| LlamaCppError::InvalidInput(format!("Invalid URL '{url}': {e}")))?;

    let segment = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .ok_or_else(|| LlamaCppError::InvalidInput(format!("URL '{url}' has no filename")))?;

    let filename = urlencoding::decode(segment)
        .map_err(|e| LlamaCppError::InvalidInput(format!("URL '{url}' has an invalid filename: {e}")))?
        .into_owned();

    if filename == "." || filename == ".." || filename.contains(['/', '\\']) {
        return Err(LlamaCppError::InvalidInput(format!(
            "URL '{url}' has an unusable filename: {filename}"
        )));
    }

    if !filename.to_ascii_lowercase().ends_with(".gguf") {
        return Err(LlamaCppError::InvalidInput(format!(
            "URL must point to a .gguf file, got: {filename}"
        )));
    }

    Ok(filename)
}

/// Format bytes as human-readable string
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
