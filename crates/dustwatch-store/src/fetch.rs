//! Fetching remote weights into the cache directory
//!
//! Downloads are streamed to `<name>.part` and renamed into place only after
//! the body is complete and at least the minimum size, so an interrupted
//! download never shows up as a usable cache file.

use async_trait::async_trait;
use dustwatch_core::{DustwatchError, DustwatchResult, ModelsConfig};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

const PROGRESS_STEP: u64 = 10 * 1024 * 1024;

/// Makes remote weights available on disk
#[async_trait]
pub trait WeightsFetcher: Send + Sync {
    /// Download `url` for model `name` and return the path it was stored at
    async fn fetch(&self, name: &str, url: &str) -> DustwatchResult<PathBuf>;
}

/// HTTP fetcher writing into the cache directory
pub struct HttpFetcher {
    client: reqwest::Client,
    cache_dir: PathBuf,
    attempts: u32,
    retry_delay: Duration,
    min_size: u64,
}

impl HttpFetcher {
    /// Create a new fetcher
    pub fn new(
        cache_dir: PathBuf,
        attempts: u32,
        retry_delay: Duration,
        timeout: Duration,
        min_size: u64,
    ) -> DustwatchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("dustwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DustwatchError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            cache_dir,
            attempts: attempts.max(1),
            retry_delay,
            min_size,
        })
    }

    /// Create a fetcher from the `[models]` configuration section
    pub fn from_config(config: &ModelsConfig) -> DustwatchResult<Self> {
        Self::new(
            config.cache_dir.clone(),
            config.fetch_attempts,
            Duration::from_secs(config.fetch_retry_delay_secs),
            Duration::from_secs(config.fetch_timeout_secs),
            config.min_cache_file_size,
        )
    }

    async fn download_once(&self, url: &str, part: &Path, dest: &Path) -> Result<u64, String> {
        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }

        let mut file = tokio::fs::File::create(part)
            .await
            .map_err(|e| format!("cannot create {}: {}", part.display(), e))?;
        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;
        let mut next_report = PROGRESS_STEP;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| e.to_string())?;
            file.write_all(&chunk).await.map_err(|e| e.to_string())?;
            downloaded += chunk.len() as u64;

            if downloaded >= next_report {
                info!(url = url, downloaded_mb = downloaded / (1024 * 1024), "Downloading weights");
                next_report += PROGRESS_STEP;
            }
        }

        file.sync_all().await.map_err(|e| e.to_string())?;
        drop(file);

        if downloaded < self.min_size {
            return Err(format!(
                "download too small: {} bytes (minimum {})",
                downloaded, self.min_size
            ));
        }

        tokio::fs::rename(part, dest)
            .await
            .map_err(|e| format!("cannot move download into place: {}", e))?;
        Ok(downloaded)
    }
}

#[async_trait]
impl WeightsFetcher for HttpFetcher {
    async fn fetch(&self, name: &str, url: &str) -> DustwatchResult<PathBuf> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;

        let dest = self.cache_dir.join(name);
        let part = self.cache_dir.join(format!("{}.part", name));
        let mut last_error = String::new();

        for attempt in 1..=self.attempts {
            info!(model = name, url = url, attempt = attempt, "Fetching model weights");

            match self.download_once(url, &part, &dest).await {
                Ok(size) => {
                    info!(
                        model = name,
                        path = %dest.display(),
                        size_mb = size / (1024 * 1024),
                        "Model weights downloaded"
                    );
                    return Ok(dest);
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(&part).await;
                    warn!(model = name, attempt = attempt, error = %e, "Weights download failed");
                    last_error = e;
                }
            }

            if attempt < self.attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(DustwatchError::FetchFailed {
            url: url.to_string(),
            reason: format!("{} (after {} attempts)", last_error, self.attempts),
        })
    }
}
