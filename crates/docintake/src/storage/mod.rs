pub mod filesystem;
pub mod memory;
pub mod relocator;

pub use filesystem::FsBlobStore;
pub use memory::MemoryBlobStore;
pub use relocator::{Relocation, StorageRelocator};

use async_trait::async_trait;

use crate::error::StorageError;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";
pub const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

/// Object storage organised as named locations holding keyed blobs.
///
/// `put` requires the location to exist; callers go through
/// [`StorageRelocator`], which creates locations on demand.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Creates the location if absent. Creating an existing location is a no-op.
    async fn ensure_location(&self, location: &str) -> Result<(), StorageError>;

    /// Stores `bytes` under `key`, replacing any existing object.
    async fn put(
        &self,
        location: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Returns the object bytes, or `None` if the object does not exist.
    async fn get(&self, location: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Deletes the object. Returns `false` if it did not exist.
    async fn delete(&self, location: &str, key: &str) -> Result<bool, StorageError>;

    async fn exists(&self, location: &str, key: &str) -> Result<bool, StorageError>;

    /// Keys in the location, sorted. A missing location lists as empty.
    async fn list(&self, location: &str) -> Result<Vec<String>, StorageError>;

    /// Names of all existing locations, sorted.
    async fn locations(&self) -> Result<Vec<String>, StorageError>;
}

/// Location names: lowercase ASCII letters, digits and `-`, 3 to 63 chars,
/// no leading/trailing or doubled `-`.
pub fn validate_location(name: &str) -> Result<(), StorageError> {
    let valid = (3..=63).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--");

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidLocation(name.to_string()))
    }
}

/// Longest key in bytes; one path component on common filesystems.
pub const MAX_KEY_LEN: usize = 255;

/// Keys are flat file names: no separators, no leading dot, no NUL, at most
/// [`MAX_KEY_LEN`] bytes.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && !key.starts_with('.')
        && !key.contains(['/', '\\', '\0']);

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// PDFs are stored as `application/pdf`, everything else as opaque binary.
pub fn content_type_for(key: &str) -> &'static str {
    match mime_guess::from_path(key).first() {
        Some(mime) if mime == mime_guess::mime::APPLICATION_PDF => PDF_CONTENT_TYPE,
        _ => BINARY_CONTENT_TYPE,
    }
}
