// functions/src/store/mod.rs

use bytes::Bytes;

pub mod azure;
pub mod memory;

pub use self::azure::BlobStore;
pub use self::memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },
    #[error("invalid object location: bucket={bucket:?} key={key:?}")]
    InvalidLocation { bucket: String, key: String },
    #[error("azure: {0}")]
    Azure(#[from] azure_core::Error),
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether a redelivery of the same message could succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, StoreError::InvalidLocation { .. })
    }
}

/// Object bytes together with the content type recorded in its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
}

pub trait ObjectStore {
    /// Read an object and its content type.
    fn download(
        &self,
        bucket: &str,
        key: &str,
    ) -> impl std::future::Future<Output = Result<StoredObject, StoreError>> + Send;

    /// Write an object, replacing whatever is stored under the key.
    fn upload(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}

pub(crate) fn check_location(bucket: &str, key: &str) -> Result<(), StoreError> {
    if bucket.is_empty() || key.is_empty() {
        return Err(StoreError::InvalidLocation {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        });
    }
    Ok(())
}
