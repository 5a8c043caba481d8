//! Archive storage for uploaded build contexts
//! Uses Apache Arrow object_store crate

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{ObjectStore, local::LocalFileSystem, path::Path as StoragePath};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Archive not found: {0}")]
    NotFound(String),

    #[error("Archive is empty")]
    Empty,

    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Read side of archive storage, consumed by job execution
#[async_trait]
pub trait ArchiveReader: Send + Sync {
    async fn read(&self, archive_id: &str) -> Result<Bytes>;
}

/// Metadata returned after upload
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    pub archive_id: String,
    pub etag: Option<String>,
    pub size: usize,
}

/// Archive store wrapping object_store
#[derive(Clone)]
pub struct ArchiveStore {
    store: Arc<dyn ObjectStore>,
}

impl ArchiveStore {
    /// Create new archive store with any object_store backend
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Archives on the local filesystem under `root`
    pub fn local(root: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        let store = LocalFileSystem::new_with_prefix(root.as_ref())?;
        Ok(Self::new(Arc::new(store)))
    }

    /// Create in-memory storage for testing/development
    pub fn in_memory() -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()))
    }

    /// Store an archive under a fresh id
    pub async fn upload(&self, data: Bytes) -> Result<UploadMetadata> {
        if data.is_empty() {
            return Err(StorageError::Empty);
        }

        let archive_id = Uuid::now_v7().to_string();
        let path = archive_path(&archive_id);
        let size = data.len();

        let put_result = self.store.put(&path, data.into()).await?;

        tracing::info!(archive_id, size, "Archive uploaded");

        Ok(UploadMetadata {
            archive_id,
            etag: put_result.e_tag,
            size,
        })
    }

    /// Check if an archive exists
    pub async fn exists(&self, archive_id: &str) -> Result<bool> {
        match self.store.head(&archive_path(archive_id)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ArchiveReader for ArchiveStore {
    async fn read(&self, archive_id: &str) -> Result<Bytes> {
        let result = match self.store.get(&archive_path(archive_id)).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(StorageError::NotFound(archive_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let bytes = result.bytes().await?;

        tracing::debug!(archive_id, size = bytes.len(), "Archive read");

        Ok(bytes)
    }
}

fn archive_path(archive_id: &str) -> StoragePath {
    StoragePath::from(format!("archives/{archive_id}"))
}
