//! Write-once blob storage for evidence bytes
//!
//! Two backends:
//! - [`FsBlobStore`]: files under a root directory
//! - [`MemoryBlobStore`]: a map in memory, for tests and embedding
//!
//! Objects are immutable. A put to an existing path fails with
//! `EvidencePathConflict` and leaves the existing object untouched.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::infra::{BlobStore, LedgerError, Result};

/// Reject keys that could escape the store root
fn validate_key(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(LedgerError::validation("storage path is empty"));
    }
    let escapes = Path::new(path)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(LedgerError::validation(format!(
            "storage path must be relative without '..': {}",
            path
        )));
    }
    Ok(())
}

/// Filesystem blob store rooted at a directory.
///
/// Bytes are first written and synced to a temporary file next to the
/// destination, then hard-linked into place. The link fails if the
/// destination exists, so two writers can never both claim a path and a
/// reader never observes a partially written object.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        validate_key(path)?;
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let target = self.resolve(path)?;
        let parent = target
            .parent()
            .ok_or_else(|| LedgerError::Storage(format!("no parent directory for {}", path)))?;
        tokio::fs::create_dir_all(parent).await?;

        if tokio::fs::try_exists(&target).await? {
            return Err(LedgerError::EvidencePathConflict(path.to_string()));
        }

        let staging = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging)
            .await?;
        let written = async {
            file.write_all(bytes).await?;
            file.sync_all().await
        }
        .await;
        drop(file);

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }

        let linked = tokio::fs::hard_link(&staging, &target).await;
        let _ = tokio::fs::remove_file(&staging).await;

        match linked {
            Ok(()) => {
                debug!(path, "Stored evidence object");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(LedgerError::EvidencePathConflict(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let target = self.resolve(path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let target = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&target).await?)
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// In-memory blob store.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Content type recorded for an object
    pub fn content_type(&self, path: &str) -> Option<String> {
        self.objects
            .read()
            .ok()?
            .get(path)
            .map(|o| o.content_type.clone())
    }
}

fn poisoned() -> LedgerError {
    LedgerError::Storage("blob store lock poisoned".to_string())
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        validate_key(path)?;
        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        if objects.contains_key(path) {
            return Err(LedgerError::EvidencePathConflict(path.to_string()));
        }
        objects.insert(
            path.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        Ok(objects.get(path).map(|o| o.bytes.clone()))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        Ok(objects.contains_key(path))
    }
}
