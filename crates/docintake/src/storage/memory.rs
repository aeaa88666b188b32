use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{validate_key, validate_location, BlobStore};
use crate::error::StorageError;

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

#[derive(Default)]
struct Inner {
    locations: BTreeMap<String, BTreeMap<String, StoredObject>>,
    #[cfg(test)]
    failing_puts: std::collections::HashSet<(String, String)>,
}

/// In-process blob store. Cloning shares the same contents.
///
/// Also records content types, and in unit tests can be told to fail
/// specific writes.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `put` of `location/key` fail with `Unavailable`.
    #[cfg(test)]
    pub(crate) fn fail_put(&self, location: &str, key: &str) {
        if let Ok(mut inner) = self.inner.write() {
            inner
                .failing_puts
                .insert((location.to_string(), key.to_string()));
        }
    }

    pub fn content_type(&self, location: &str, key: &str) -> Option<String> {
        let inner = self.inner.read().ok()?;
        inner
            .locations
            .get(location)?
            .get(key)
            .map(|o| o.content_type.clone())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, StorageError> {
        self.inner
            .read()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, StorageError> {
        self.inner
            .write()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn ensure_location(&self, location: &str) -> Result<(), StorageError> {
        validate_location(location)?;
        self.write()?
            .locations
            .entry(location.to_string())
            .or_default();
        Ok(())
    }

    async fn put(
        &self,
        location: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError> {
        validate_location(location)?;
        validate_key(key)?;
        let mut inner = self.write()?;

        #[cfg(test)]
        if inner
            .failing_puts
            .contains(&(location.to_string(), key.to_string()))
        {
            return Err(StorageError::Unavailable(format!(
                "write of {}/{} rejected",
                location, key
            )));
        }

        let objects = inner.locations.get_mut(location).ok_or_else(|| {
            StorageError::WriteObject {
                location: location.to_string(),
                key: key.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("location '{}' does not exist", location),
                ),
            }
        })?;

        objects.insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, location: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_location(location)?;
        validate_key(key)?;
        Ok(self
            .read()?
            .locations
            .get(location)
            .and_then(|objects| objects.get(key))
            .map(|o| o.bytes.clone()))
    }

    async fn delete(&self, location: &str, key: &str) -> Result<bool, StorageError> {
        validate_location(location)?;
        validate_key(key)?;
        Ok(self
            .write()?
            .locations
            .get_mut(location)
            .and_then(|objects| objects.remove(key))
            .is_some())
    }

    async fn exists(&self, location: &str, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(location, key).await?.is_some())
    }

    async fn list(&self, location: &str) -> Result<Vec<String>, StorageError> {
        validate_location(location)?;
        Ok(self
            .read()?
            .locations
            .get(location)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn locations(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.read()?.locations.keys().cloned().collect())
    }
}
