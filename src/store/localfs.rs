//! Local-filesystem blob store.
//!
//! Blobs are plain files named by a freshly generated UUID under the blob
//! root. The location handed back to the metadata layer is that file name;
//! the root prefix stays private to the store, so locations remain opaque
//! to everything above it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use log::debug;
use tokio::fs;
use uuid::Uuid;

use super::BlobStore;

pub const SCHEME: &str = "file";

pub struct LocalFsBlobStore {
    root: PathBuf,
}

impl LocalFsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, location: &str) -> Result<PathBuf> {
        // Locations are single path components; anything else never came
        // from this store.
        if location.is_empty() || location.contains(['/', '\\']) || location == "." || location == ".." {
            bail!("invalid blob location '{}'", location);
        }
        Ok(self.root.join(location))
    }
}

#[async_trait]
impl BlobStore for LocalFsBlobStore {
    async fn upload(&self, path: &Path) -> Result<String> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create blob root {:?}", self.root))?;

        let location = Uuid::new_v4().to_string();
        let dest = self.blob_path(&location)?;
        fs::copy(path, &dest)
            .await
            .with_context(|| format!("Failed to store {:?} in the blob store", path))?;
        debug!("Stored {:?} as blob {}", path, location);
        Ok(location)
    }

    async fn download(&self, location: &str, dest: &Path) -> Result<()> {
        let blob = self.blob_path(location)?;
        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        fs::copy(&blob, dest)
            .await
            .with_context(|| format!("Failed to fetch blob {}", location))?;
        debug!("Fetched blob {} into {:?}", location, dest);
        Ok(())
    }

    async fn delete(&self, location: &str) -> Result<()> {
        let blob = self.blob_path(location)?;
        fs::remove_file(&blob)
            .await
            .with_context(|| format!("Failed to delete blob {}", location))?;
        debug!("Deleted blob {}", location);
        Ok(())
    }

    async fn exists(&self, location: &str) -> Result<bool> {
        Ok(fs::try_exists(self.blob_path(location)?).await?)
    }

    async fn list_locations(&self) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                return Err(anyhow::Error::from(e)
                    .context(format!("Failed to list blob root {:?}", self.root)));
            }
        };

        let mut locations = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file()
                && let Some(name) = entry.file_name().to_str()
            {
                locations.push(name.to_string());
            }
        }
        locations.sort();
        Ok(locations)
    }

    fn scheme(&self) -> &str {
        SCHEME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_source(dir: &tempfile::TempDir, content: &[u8]) -> PathBuf {
        let path = dir.path().join("artifact.bin");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_upload_download_round_trip() {
        let work = tempdir().unwrap();
        let store = LocalFsBlobStore::new(work.path().join("blobs"));
        let source = write_source(&work, b"some artifact bytes");

        let location = store.upload(&source).await.unwrap();
        assert!(store.exists(&location).await.unwrap());

        let dest = work.path().join("out/artifact.bin");
        store.download(&location, &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"some artifact bytes");
    }

    #[tokio::test]
    async fn test_uploads_get_distinct_locations() {
        let work = tempdir().unwrap();
        let store = LocalFsBlobStore::new(work.path().join("blobs"));
        let source = write_source(&work, b"same content");

        let first = store.upload(&source).await.unwrap();
        let second = store.upload(&source).await.unwrap();
        // Identical bytes must still be independently owned
        assert_ne!(first, second);
        assert_eq!(store.list_locations().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_removes_blob() {
        let work = tempdir().unwrap();
        let store = LocalFsBlobStore::new(work.path().join("blobs"));
        let source = write_source(&work, b"bytes");

        let location = store.upload(&source).await.unwrap();
        store.delete(&location).await.unwrap();
        assert!(!store.exists(&location).await.unwrap());
        assert!(store.delete(&location).await.is_err());
    }

    #[tokio::test]
    async fn test_download_missing_location_fails() {
        let work = tempdir().unwrap();
        let store = LocalFsBlobStore::new(work.path().join("blobs"));

        let dest = work.path().join("out.bin");
        let result = store.download("no-such-blob", &dest).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_list_locations_empty_root() {
        let work = tempdir().unwrap();
        let store = LocalFsBlobStore::new(work.path().join("blobs"));
        assert!(store.list_locations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_traversal_locations() {
        let work = tempdir().unwrap();
        let store = LocalFsBlobStore::new(work.path().join("blobs"));
        assert!(store.exists("../escape").await.is_err());
        assert!(store.delete("a/b").await.is_err());
    }

    #[test]
    fn test_scheme() {
        let store = LocalFsBlobStore::new("/tmp/blobs");
        assert_eq!(store.scheme(), "file");
    }
}
