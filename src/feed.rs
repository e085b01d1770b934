//! Block-list feed acquisition.

use crate::config::FeedConfig;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Feed acquisition failure.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to download feed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed server {url} returned HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("feed file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> FeedError + '_ {
    move |source| FeedError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Download the feed and save it to `config.path`. Returns the bytes written.
pub async fn download(config: &FeedConfig) -> Result<usize, FeedError> {
    info!(url = %config.url, "Downloading threat feed");

    let client = Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms))
        .user_agent(concat!("threat-correlator/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let response = client.get(&config.url).send().await?;
    if !response.status().is_success() {
        return Err(FeedError::Status {
            url: config.url.clone(),
            status: response.status(),
        });
    }
    let body = response.text().await?;

    if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_error(parent))?;
    }
    tokio::fs::write(&config.path, body.as_bytes())
        .await
        .map_err(io_error(&config.path))?;

    info!(path = %config.path.display(), bytes = body.len(), "Threat feed saved");
    Ok(body.len())
}

/// Read a feed file into lines for [`RangeIndex::build`](crate::network::RangeIndex::build).
pub async fn load(path: &Path) -> Result<Vec<String>, FeedError> {
    let content = tokio::fs::read_to_string(path).await.map_err(io_error(path))?;
    let lines = split_lines(&content);
    debug!(path = %path.display(), lines = lines.len(), "Threat feed read");
    Ok(lines)
}

/// Split feed text into lines. Filtering happens in the index.
pub fn split_lines(content: &str) -> Vec<String> {
    content.lines().map(str::to_string).collect()
}
