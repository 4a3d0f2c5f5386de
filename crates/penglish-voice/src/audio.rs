//! Recording retrieval and the per-turn audio file.
//!
//! `TurnAudio` owns exactly one temporary file. The file is deleted when the
//! value is dropped, so every exit path of a turn releases it.

use crate::error::ProviderError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

/// Retrieves recorded caller audio from a provider-supplied reference.
#[async_trait]
pub trait RecordingFetcher: Send + Sync {
    async fn fetch(&self, recording_url: &str) -> Result<Vec<u8>, ProviderError>;
}

/// Downloads recordings over HTTP. The telephony provider requires the
/// application JWT as a bearer token for its recording URLs.
#[derive(Debug, Clone)]
pub struct HttpRecordingFetcher {
    bearer_token: Option<String>,
    client: reqwest::Client,
}

impl HttpRecordingFetcher {
    pub fn new(bearer_token: Option<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            bearer_token,
            client,
        })
    }
}

#[async_trait]
impl RecordingFetcher for HttpRecordingFetcher {
    async fn fetch(&self, recording_url: &str) -> Result<Vec<u8>, ProviderError> {
        let mut req = self.client.get(recording_url);
        if let Some(ref token) = self.bearer_token {
            req = req.bearer_auth(token);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                service: "recording",
                status,
                body,
            });
        }
        Ok(res.bytes().await?.to_vec())
    }
}

/// Audio of one turn on local disk. Deleted on drop.
#[derive(Debug)]
pub struct TurnAudio {
    file: NamedTempFile,
    len: usize,
}

impl TurnAudio {
    /// Write `bytes` into a fresh temp file inside `dir` (or the OS temp dir).
    pub async fn persist(bytes: &[u8], dir: Option<&Path>) -> std::io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("turn-").suffix(".mp3");
        let file = match dir {
            Some(d) => builder.tempfile_in(d)?,
            None => builder.tempfile()?,
        };
        tokio::fs::write(file.path(), bytes).await?;
        Ok(Self {
            file,
            len: bytes.len(),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn file_name(&self) -> String {
        self.file
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Owned copy of the path, for logging after release.
    pub fn path_buf(&self) -> PathBuf {
        self.file.path().to_path_buf()
    }
}
