//! Call archive: a durable, write-once record of each finished call.
//!
//! Two backends: one JSON file per call (`JsonFileArchive`) and a sled tree
//! keyed by call id (`SledArchive`). Both refuse a second write for the same call.

use crate::error::ArchiveError;
use crate::locale::LanguageTag;
use crate::session::{CallDirection, CallSession, Turn};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::io::Write;

const DEFAULT_ARCHIVE_PATH: &str = "./data/call_archive";

/// Archived form of a finished call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedCall {
    pub call_id: String,
    pub counterpart_address: String,
    pub direction: CallDirection,
    pub language_tag: LanguageTag,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub end_status: String,
    pub turns: Vec<Turn>,
}

impl ArchivedCall {
    pub fn from_session(session: CallSession, end_status: &str) -> Self {
        Self {
            call_id: session.call_id().to_string(),
            counterpart_address: session.counterpart_address().to_string(),
            direction: session.direction(),
            language_tag: session.language().clone(),
            started_at: session.started_at(),
            ended_at: Utc::now(),
            end_status: end_status.to_string(),
            turns: session.into_turns(),
        }
    }
}

#[async_trait]
pub trait CallArchive: Send + Sync {
    /// Write the record. Fails with `AlreadyArchived` if one exists.
    async fn store(&self, call: &ArchivedCall) -> Result<(), ArchiveError>;
}

// -----------------------------------------------------------------------------
// JSON files
// -----------------------------------------------------------------------------

/// One pretty-printed JSON file per call: `call_<encoded id>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileArchive {
    dir: PathBuf,
}

impl JsonFileArchive {
    pub fn open(dir: Option<impl AsRef<Path>>) -> Result<Self, ArchiveError> {
        let dir = dir
            .map(|d| d.as_ref().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ARCHIVE_PATH));
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, call_id: &str) -> PathBuf {
        self.dir.join(format!("call_{}.json", sanitize(call_id)))
    }

    /// Read a record back (audits, tests).
    pub async fn load(&self, call_id: &str) -> Result<Option<ArchivedCall>, ArchiveError> {
        match tokio::fs::read(self.path_for(call_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Filesystem-safe, one-to-one encoding of a call id: `[A-Za-z0-9-]` is kept,
/// every other byte (including `_`) becomes `_XX` hex.
fn sanitize(call_id: &str) -> String {
    let mut out = String::with_capacity(call_id.len());
    for b in call_id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("_{:02X}", b));
        }
    }
    out
}

/// Write `bytes` to a temp file in `dir`, then move it to `path` unless
/// something is already there. A crash leaves no partial record behind.
fn write_once(dir: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".call-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl CallArchive for JsonFileArchive {
    async fn store(&self, call: &ArchivedCall) -> Result<(), ArchiveError> {
        let bytes = serde_json::to_vec_pretty(call)?;
        let dir = self.dir.clone();
        let path = self.path_for(&call.call_id);
        let written = tokio::task::spawn_blocking(move || write_once(&dir, &path, &bytes))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        match written {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(ArchiveError::AlreadyArchived(call.call_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

// -----------------------------------------------------------------------------
// Sled
// -----------------------------------------------------------------------------

/// Sled-backed archive; key = call id, value = JSON record.
pub struct SledArchive {
    db: sled::Db,
}

impl SledArchive {
    pub fn open(path: Option<impl AsRef<Path>>) -> Result<Self, ArchiveError> {
        let p = path
            .map(|x| x.as_ref().to_path_buf())
            .unwrap_or_else(|| Path::new(DEFAULT_ARCHIVE_PATH).to_path_buf());
        let db = sled::open(p)?;
        Ok(Self { db })
    }

    pub fn load(&self, call_id: &str) -> Result<Option<ArchivedCall>, ArchiveError> {
        match self.db.get(call_id.as_bytes())? {
            Some(v) => Ok(Some(serde_json::from_slice(&v)?)),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

#[async_trait]
impl CallArchive for SledArchive {
    async fn store(&self, call: &ArchivedCall) -> Result<(), ArchiveError> {
        let bytes = serde_json::to_vec(call)?;
        // Insert only if absent.
        let swapped = self
            .db
            .compare_and_swap(call.call_id.as_bytes(), None as Option<&[u8]>, Some(bytes))?;
        if swapped.is_err() {
            return Err(ArchiveError::AlreadyArchived(call.call_id.clone()));
        }
        self.db.flush_async().await?;
        Ok(())
    }
}
