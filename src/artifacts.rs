//! # Artifact Store
//!
//! Keeps an uploaded custom template and the field specs inferred for it
//! between the analyze call and the later generate call.
//!
//! ## Implementations
//!
//! - [`FileArtifactStore`]: `custom_<id>.docx` and `meta_<id>.json` in one
//!   directory, written through a temp file and renamed into place.
//! - [`MemoryArtifactStore`]: `DashMap`-backed, used by tests and for
//!   deployments without a writable disk.
//!
//! Artifacts are swept once they are older than the configured TTL.

use crate::template::FieldSpecs;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("invalid artifact id: {0}")]
    InvalidId(String),

    #[error("artifact storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact metadata is corrupt: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Identifier shared by a custom template and its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Only canonical UUIDs are accepted, so ids never escape the store directory.
    pub fn parse(raw: &str) -> Result<Self, ArtifactError> {
        Uuid::parse_str(raw.trim())
            .map(Self)
            .map_err(|_| ArtifactError::InvalidId(raw.to_string()))
    }
}

impl FromStr for ArtifactId {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put_template(&self, id: ArtifactId, bytes: &[u8]) -> Result<(), ArtifactError>;

    async fn template(&self, id: ArtifactId) -> Result<Option<Vec<u8>>, ArtifactError>;

    async fn put_field_specs(&self, id: ArtifactId, specs: &FieldSpecs) -> Result<(), ArtifactError>;

    async fn field_specs(&self, id: ArtifactId) -> Result<Option<FieldSpecs>, ArtifactError>;

    /// Remove both parts. Removing a missing artifact is not an error.
    async fn remove(&self, id: ArtifactId) -> Result<(), ArtifactError>;

    /// Remove artifacts older than `age`, returning how many files or entries went.
    async fn purge_older_than(&self, age: Duration) -> Result<usize, ArtifactError>;
}

const TEMPLATE_PREFIX: &str = "custom_";
const TEMPLATE_SUFFIX: &str = ".docx";
const META_PREFIX: &str = "meta_";
const META_SUFFIX: &str = ".json";
/// In-flight writes; left behind only if the process dies mid-write.
const TMP_PREFIX: &str = ".tmp-";

pub struct FileArtifactStore {
    dir: PathBuf,
}

impl FileArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn template_path(&self, id: ArtifactId) -> PathBuf {
        self.dir.join(format!("{TEMPLATE_PREFIX}{id}{TEMPLATE_SUFFIX}"))
    }

    fn meta_path(&self, id: ArtifactId) -> PathBuf {
        self.dir.join(format!("{META_PREFIX}{id}{META_SUFFIX}"))
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = self.dir.join(format!("{TMP_PREFIX}{}", Uuid::new_v4()));
        let written = match tokio::fs::write(&tmp, bytes).await {
            Ok(()) => tokio::fs::rename(&tmp, path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, ArtifactError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_optional(path: &Path) -> Result<(), ArtifactError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a file name belongs to this store, including stale temp files.
    fn is_artifact(name: &str) -> bool {
        let id_part = name
            .strip_prefix(TEMPLATE_PREFIX)
            .and_then(|rest| rest.strip_suffix(TEMPLATE_SUFFIX))
            .or_else(|| {
                name.strip_prefix(META_PREFIX)
                    .and_then(|rest| rest.strip_suffix(META_SUFFIX))
            })
            .or_else(|| name.strip_prefix(TMP_PREFIX));
        id_part.map(|id| Uuid::parse_str(id).is_ok()).unwrap_or(false)
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn put_template(&self, id: ArtifactId, bytes: &[u8]) -> Result<(), ArtifactError> {
        self.write_atomic(&self.template_path(id), bytes).await?;
        debug!(%id, bytes = bytes.len(), "Stored custom template");
        Ok(())
    }

    async fn template(&self, id: ArtifactId) -> Result<Option<Vec<u8>>, ArtifactError> {
        Self::read_optional(&self.template_path(id)).await
    }

    async fn put_field_specs(&self, id: ArtifactId, specs: &FieldSpecs) -> Result<(), ArtifactError> {
        let json = serde_json::to_vec_pretty(specs)?;
        self.write_atomic(&self.meta_path(id), &json).await?;
        debug!(%id, fields = specs.len(), "Stored field specs");
        Ok(())
    }

    async fn field_specs(&self, id: ArtifactId) -> Result<Option<FieldSpecs>, ArtifactError> {
        match Self::read_optional(&self.meta_path(id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, id: ArtifactId) -> Result<(), ArtifactError> {
        Self::remove_optional(&self.template_path(id)).await?;
        Self::remove_optional(&self.meta_path(id)).await
    }

    async fn purge_older_than(&self, age: Duration) -> Result<usize, ArtifactError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if !Self::is_artifact(&name.to_string_lossy()) {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            if now.duration_since(modified).unwrap_or_default() >= age {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to remove expired artifact {:?}: {}", entry.path(), e),
                }
            }
        }
        Ok(removed)
    }
}

struct MemoryEntry {
    template: Option<Vec<u8>>,
    specs: Option<FieldSpecs>,
    created: Instant,
}

impl MemoryEntry {
    fn new() -> Self {
        Self {
            template: None,
            specs: None,
            created: Instant::now(),
        }
    }
}

#[derive(Default)]
pub struct MemoryArtifactStore {
    entries: DashMap<ArtifactId, MemoryEntry>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put_template(&self, id: ArtifactId, bytes: &[u8]) -> Result<(), ArtifactError> {
        self.entries.entry(id).or_insert_with(MemoryEntry::new).template = Some(bytes.to_vec());
        Ok(())
    }

    async fn template(&self, id: ArtifactId) -> Result<Option<Vec<u8>>, ArtifactError> {
        Ok(self.entries.get(&id).and_then(|entry| entry.template.clone()))
    }

    async fn put_field_specs(&self, id: ArtifactId, specs: &FieldSpecs) -> Result<(), ArtifactError> {
        self.entries.entry(id).or_insert_with(MemoryEntry::new).specs = Some(specs.clone());
        Ok(())
    }

    async fn field_specs(&self, id: ArtifactId) -> Result<Option<FieldSpecs>, ArtifactError> {
        Ok(self.entries.get(&id).and_then(|entry| entry.specs.clone()))
    }

    async fn remove(&self, id: ArtifactId) -> Result<(), ArtifactError> {
        self.entries.remove(&id);
        Ok(())
    }

    async fn purge_older_than(&self, age: Duration) -> Result<usize, ArtifactError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.created.elapsed() < age);
        Ok(before - self.entries.len())
    }
}
