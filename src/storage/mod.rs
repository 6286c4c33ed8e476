//! Object storage for downloaded artifacts
//! Uses Apache Arrow object_store crate

use object_store::{ObjectStore, PutPayload, path::Path as StoragePath};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{StorageConfig, StorageProvider};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to read artifact {path}: {source}")]
    ReadArtifact {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage root unavailable: {0}")]
    Root(#[source] std::io::Error),

    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Metadata returned after upload
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    pub key: String,
    pub etag: Option<String>,
    pub size: usize,
}

/// Storage client wrapping object_store
#[derive(Clone)]
pub struct StorageClient {
    store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageClient")
            .field("store", &self.store.to_string())
            .finish()
    }
}

impl StorageClient {
    /// Create new storage client with any object_store backend
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Create in-memory storage for testing/development
    pub fn in_memory() -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()))
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.provider {
            StorageProvider::Memory => Ok(Self::in_memory()),
            StorageProvider::Local => {
                std::fs::create_dir_all(&config.root).map_err(StorageError::Root)?;
                let store = object_store::local::LocalFileSystem::new_with_prefix(&config.root)?;
                Ok(Self::new(Arc::new(store)))
            }
        }
    }

    /// Upload bytes to storage
    pub async fn upload(&self, key: &str, data: Vec<u8>) -> Result<UploadMetadata> {
        let path = StoragePath::from(key);
        let size = data.len();

        let put_result = self.store.put(&path, PutPayload::from(data)).await?;

        tracing::info!(key, size, "Uploaded to storage");

        Ok(UploadMetadata {
            key: key.to_string(),
            etag: put_result.e_tag,
            size,
        })
    }

    /// Upload a file from the worker's scratch directory
    pub async fn upload_file(&self, key: &str, local: &Path) -> Result<UploadMetadata> {
        let data = tokio::fs::read(local)
            .await
            .map_err(|source| StorageError::ReadArtifact {
                path: local.display().to_string(),
                source,
            })?;
        self.upload(key, data).await
    }

    /// Download from storage
    pub async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let path = StoragePath::from(key);

        let result = self.store.get(&path).await?;
        let bytes = result.bytes().await?;

        tracing::debug!(key, size = bytes.len(), "Downloaded from storage");

        Ok(bytes.to_vec())
    }

    /// Check if key exists
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = StoragePath::from(key);

        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Size of a stored object in bytes
    pub async fn size(&self, key: &str) -> Result<u64> {
        let meta = self.store.head(&StoragePath::from(key)).await?;
        Ok(meta.size)
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        match self.store.delete(&StoragePath::from(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_download_exists() {
        let storage = StorageClient::in_memory();

        assert!(!storage.exists("media/a.mp4").await.unwrap());
        let meta = storage.upload("media/a.mp4", b"video".to_vec()).await.unwrap();
        assert_eq!(meta.size, 5);

        assert!(storage.exists("media/a.mp4").await.unwrap());
        assert_eq!(storage.size("media/a.mp4").await.unwrap(), 5);
        assert_eq!(storage.download("media/a.mp4").await.unwrap(), b"video");

        storage.delete("media/a.mp4").await.unwrap();
        storage.delete("media/a.mp4").await.unwrap();
        assert!(!storage.exists("media/a.mp4").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_provider_writes_under_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("media");
        let config = StorageConfig {
            provider: StorageProvider::Local,
            root: root.clone(),
        };
        let storage = StorageClient::from_config(&config).unwrap();

        let artifact = temp_dir.path().join("clip.mp4");
        std::fs::write(&artifact, b"bytes").unwrap();
        storage.upload_file("task/clip.mp4", &artifact).await.unwrap();

        assert!(root.join("task").join("clip.mp4").exists());
    }

    #[tokio::test]
    async fn test_upload_missing_file() {
        let storage = StorageClient::in_memory();
        let result = storage
            .upload_file("x", Path::new("/nonexistent/vidbox/file"))
            .await;
        assert!(matches!(result, Err(StorageError::ReadArtifact { .. })));
    }
}
