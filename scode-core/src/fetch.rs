//! Asset fetching seam.
//!
//! The runtime fetches the atlas document and encoded audio files through
//! this trait so tests can substitute an in-memory implementation.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SoundError;

#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Fetch the raw bytes at `location` (a URL or filesystem path).
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, SoundError>;
}

/// HTTP fetcher for `http(s)://` load paths.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, SoundError> {
        let resp = self
            .client
            .get(location)
            .send()
            .await
            .map_err(|e| SoundError::fetch(location, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SoundError::fetch(location, format!("status {status}")));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SoundError::fetch(location, e))?;
        Ok(bytes.to_vec())
    }
}

/// Filesystem fetcher for local load paths.
pub struct FsFetcher;

#[async_trait]
impl AssetFetcher for FsFetcher {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, SoundError> {
        tokio::fs::read(location)
            .await
            .map_err(|e| SoundError::fetch(location, e))
    }
}

/// Pick a fetcher for a load path: HTTP for URLs, the filesystem otherwise.
pub fn fetcher_for(load_path: &str) -> Arc<dyn AssetFetcher> {
    if load_path.starts_with("http://") || load_path.starts_with("https://") {
        Arc::new(HttpFetcher::new())
    } else {
        Arc::new(FsFetcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_fs_fetcher_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"payload").unwrap();
        let bytes = FsFetcher
            .fetch(file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(bytes, b"payload");
    }

    #[tokio::test]
    async fn test_fs_fetcher_missing_file_errors() {
        let err = FsFetcher.fetch("/nonexistent/sound.webm").await;
        assert!(matches!(err, Err(SoundError::Fetch { .. })));
    }
}
