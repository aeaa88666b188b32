use std::sync::Arc;

use log::{debug, info};

use super::{content_type_for, BlobStore};
use crate::error::StorageError;

/// Result of a [`StorageRelocator::relocate`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relocation {
    Moved,
    /// The source object was not there, usually because an earlier delivery
    /// already moved it.
    NotFound,
}

/// Stage-facing view of the blob store: location-aware upload, download and
/// move with destination auto-creation.
#[derive(Clone)]
pub struct StorageRelocator {
    store: Arc<dyn BlobStore>,
}

impl StorageRelocator {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    pub async fn ensure_location(&self, location: &str) -> Result<(), StorageError> {
        self.store.ensure_location(location).await
    }

    /// Moves `key` from `source` to `destination` (copy, then delete).
    ///
    /// A second call for the same key returns [`Relocation::NotFound`].
    pub async fn relocate(
        &self,
        source: &str,
        destination: &str,
        key: &str,
    ) -> Result<Relocation, StorageError> {
        self.store.ensure_location(destination).await?;

        let Some(bytes) = self.store.get(source, key).await? else {
            debug!("{}/{} not found, nothing to relocate", source, key);
            return Ok(Relocation::NotFound);
        };

        self.store
            .put(destination, key, &bytes, content_type_for(key))
            .await?;

        if !self.store.delete(source, key).await? {
            // A concurrent delivery removed it between our read and delete.
            debug!("{}/{} already removed from source", source, key);
        }

        info!("Relocated {} from {} to {}", key, source, destination);
        Ok(Relocation::Moved)
    }

    pub async fn upload(&self, location: &str, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.store.ensure_location(location).await?;
        self.store
            .put(location, key, bytes, content_type_for(key))
            .await
    }

    pub async fn download(&self, location: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.store.get(location, key).await
    }

    pub async fn delete(&self, location: &str, key: &str) -> Result<bool, StorageError> {
        self.store.delete(location, key).await
    }

    pub async fn exists(&self, location: &str, key: &str) -> Result<bool, StorageError> {
        self.store.exists(location, key).await
    }

    pub async fn list(&self, location: &str) -> Result<Vec<String>, StorageError> {
        self.store.list(location).await
    }
}
