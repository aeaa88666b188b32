use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;
use tokio::fs;

use super::{validate_key, validate_location, BlobStore};
use crate::error::StorageError;

/// Blob store backed by a directory tree: `{root}/{location}/{key}`.
///
/// Writes land in a hidden temp file inside the location directory and are
/// renamed into place, so readers never observe a partially written object.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn location_dir(&self, location: &str) -> Result<PathBuf, StorageError> {
        validate_location(location)?;
        Ok(self.root.join(location))
    }

    fn object_path(&self, location: &str, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.location_dir(location)?.join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn ensure_location(&self, location: &str) -> Result<(), StorageError> {
        let dir = self.location_dir(location)?;
        // create_dir_all succeeds when another caller created it first
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::CreateLocation {
                location: location.to_string(),
                source: e,
            })
    }

    async fn put(
        &self,
        location: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError> {
        let path = self.object_path(location, key)?;
        let dir = self.location_dir(location)?;
        let write_err = |e| StorageError::WriteObject {
            location: location.to_string(),
            key: key.to_string(),
            source: e,
        };

        if !fs::try_exists(&dir).await.map_err(write_err)? {
            return Err(write_err(std::io::Error::new(
                ErrorKind::NotFound,
                format!("location '{}' does not exist", location),
            )));
        }

        // Fixed-length name so the temp file fits wherever the key does
        let temp_path = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        if let Err(e) = fs::write(&temp_path, bytes).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(write_err(e));
        }
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(write_err(e));
        }

        debug!(
            "Stored {}/{} ({} bytes, {})",
            location,
            key,
            bytes.len(),
            content_type
        );
        Ok(())
    }

    async fn get(&self, location: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.object_path(location, key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::ReadObject {
                location: location.to_string(),
                key: key.to_string(),
                source: e,
            }),
        }
    }

    async fn delete(&self, location: &str, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(location, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::DeleteObject {
                location: location.to_string(),
                key: key.to_string(),
                source: e,
            }),
        }
    }

    async fn exists(&self, location: &str, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(location, key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::ReadObject {
                location: location.to_string(),
                key: key.to_string(),
                source: e,
            }),
        }
    }

    async fn list(&self, location: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.location_dir(location)?;
        let list_err = |e| StorageError::ListLocation {
            location: location.to_string(),
            source: e,
        };

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(list_err(e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
            let file_type = entry.file_type().await.map_err(list_err)?;
            if !file_type.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                // in-flight temp files are hidden
                if validate_key(name).is_ok() {
                    keys.push(name.to_string());
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn locations(&self) -> Result<Vec<String>, StorageError> {
        let list_err = |e| StorageError::ListLocation {
            location: self.root.display().to_string(),
            source: e,
        };

        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(list_err(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
            if !entry.file_type().await.map_err(list_err)?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_location(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }
}
