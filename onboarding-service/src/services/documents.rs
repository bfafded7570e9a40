//! Document intake gateway: accepts identity images and returns opaque
//! storage references. Content validation happens elsewhere; this only
//! stores bytes.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("document storage I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported document kind: {0}")]
    UnsupportedKind(String),
}

/// Allowed upload kinds match the references Initiate later requires.
fn is_known_kind(kind: &str) -> bool {
    crate::models::REQUIRED_DOCUMENT_KINDS.contains(&kind)
}

#[async_trait]
pub trait DocumentStorage: Send + Sync {
    /// Store an uploaded document, returning an opaque reference.
    async fn store(&self, kind: &str, data: Vec<u8>) -> Result<String, StorageError>;
}

/// Filesystem-backed document storage. References are `kind/uuid` keys under
/// the configured root.
pub struct LocalDocumentStorage {
    base_path: PathBuf,
}

impl LocalDocumentStorage {
    pub async fn new(base_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_path = base_path.into();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).await?;
        }
        Ok(Self { base_path })
    }
}

#[async_trait]
impl DocumentStorage for LocalDocumentStorage {
    async fn store(&self, kind: &str, data: Vec<u8>) -> Result<String, StorageError> {
        if !is_known_kind(kind) {
            return Err(StorageError::UnsupportedKind(kind.to_string()));
        }

        let key = format!("{}/{}", kind, Uuid::new_v4());
        let path = self.base_path.join(&key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;

        tracing::info!(kind = %kind, reference = %key, "Document stored");
        Ok(key)
    }
}

/// Mock storage returning deterministic references without touching disk.
#[derive(Default)]
pub struct MockDocumentStorage;

#[async_trait]
impl DocumentStorage for MockDocumentStorage {
    async fn store(&self, kind: &str, _data: Vec<u8>) -> Result<String, StorageError> {
        if !is_known_kind(kind) {
            return Err(StorageError::UnsupportedKind(kind.to_string()));
        }
        Ok(format!("mock/{}/{}", kind, Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDocumentStorage::new(dir.path()).await.unwrap();

        let reference = storage
            .store("pan_image", b"fake image bytes".to_vec())
            .await
            .unwrap();
        assert!(reference.starts_with("pan_image/"));

        let stored = fs::read(dir.path().join(&reference)).await.unwrap();
        assert_eq!(stored, b"fake image bytes");
    }

    #[tokio::test]
    async fn test_unknown_kind_is_rejected() {
        let storage = MockDocumentStorage;
        let err = storage
            .store("selfie", b"bytes".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedKind(_)));
    }
}
