use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ClusterError, Result};

use super::{BlobKey, BlobStore};

/// A thin typed wrapper over `cacache` for installation blobs.
#[derive(Clone, Debug)]
pub struct CacacheBlobStore {
    root: PathBuf,
}

impl CacacheBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn map_read_error(key: &BlobKey, err: cacache::Error) -> ClusterError {
    match err {
        cacache::Error::EntryNotFound(_, _) => {
            ClusterError::NotFound(format!("blob not found: {key}"))
        }
        cacache::Error::IntegrityError(err) => {
            ClusterError::Blob(format!("blob failed integrity check: {key} ({err})"))
        }
        cacache::Error::SizeMismatch(wanted, actual) => ClusterError::Blob(format!(
            "blob size mismatch: key={key}, wanted={wanted}, actual={actual}"
        )),
        cacache::Error::IoError(_, msg) => {
            ClusterError::Blob(format!("cacache read I/O error: {msg}"))
        }
        cacache::Error::SerdeError(_, msg) => {
            ClusterError::Blob(format!("cacache read serde error: {msg}"))
        }
    }
}

#[async_trait]
impl BlobStore for CacacheBlobStore {
    async fn exists(&self, key: &BlobKey) -> Result<bool> {
        let meta = cacache::metadata(&self.root, key.as_str())
            .await
            .map_err(|e| ClusterError::Blob(format!("cacache metadata failed: {e}")))?;
        Ok(meta.is_some())
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>> {
        match cacache::read(&self.root, key.as_str()).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(cacache::Error::EntryNotFound(_, _)) => Ok(None),
            Err(err) => Err(map_read_error(key, err)),
        }
    }

    async fn put(&self, key: &BlobKey, bytes: &[u8]) -> Result<()> {
        let integrity = cacache::write(&self.root, key.as_str(), bytes)
            .await
            .map_err(|e| ClusterError::Blob(format!("cacache write failed: {e}")))?;
        debug!(key = %key, %integrity, len = bytes.len(), "blob written");
        Ok(())
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        if !self.exists(key).await? {
            return Ok(());
        }
        let r_opts = cacache::index::RemoveOpts::new().remove_fully(true);
        r_opts
            .remove(&self.root, key.as_str())
            .await
            .map_err(|e| ClusterError::Blob(format!("cacache remove failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = CacacheBlobStore::new(dir.path());
        let key = BlobKey::graph("/subscriptions/sub/clusters/a");

        assert!(!store.exists(&key).await?);
        assert_eq!(store.get(&key).await?, None);

        store.put(&key, b"sealed graph").await?;
        assert!(store.exists(&key).await?);
        assert_eq!(store.get(&key).await?.as_deref(), Some(&b"sealed graph"[..]));

        store.delete(&key).await?;
        assert!(!store.exists(&key).await?);
        assert_eq!(store.get(&key).await?, None);
        Ok(())
    }

    #[test]
    fn keys_are_scoped_per_cluster() {
        assert_eq!(
            BlobKey::graph("/subscriptions/sub/clusters/a").as_str(),
            "subscriptions/sub/clusters/a/kubeforge/graph"
        );
        assert_ne!(
            BlobKey::bootstrap_ignition("/a"),
            BlobKey::bootstrap_ignition("/b")
        );
    }
}
