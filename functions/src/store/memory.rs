// functions/src/store/memory.rs

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::RwLock;

use super::{check_location, ObjectStore, StoreError, StoredObject};

/// Store kept in process memory. Clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<HashMap<(String, String), StoredObject>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>, content_type: &str) {
        self.objects.write().await.insert(
            (bucket.to_owned(), key.to_owned()),
            StoredObject {
                data: data.into(),
                content_type: content_type.to_owned(),
            },
        );
    }

    pub async fn get(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_owned(), key.to_owned()))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

impl ObjectStore for MemoryStore {
    #[tracing::instrument(skip(self), name = "MemoryStore::download")]
    async fn download(&self, bucket: &str, key: &str) -> Result<StoredObject, StoreError> {
        check_location(bucket, key)?;

        self.get(bucket, key).await.ok_or_else(|| StoreError::NotFound {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        })
    }

    #[tracing::instrument(skip(self, data), name = "MemoryStore::upload", fields(size = data.len()))]
    async fn upload(&self, bucket: &str, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError> {
        check_location(bucket, key)?;

        self.insert(bucket, key, data, content_type).await;
        Ok(())
    }
}
