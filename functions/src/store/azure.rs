// functions/src/store/azure.rs

use azure_core::error::ErrorKind;
use azure_core::StatusCode;
use azure_storage::StorageCredentials;
use azure_storage_blobs::prelude::BlobServiceClient;
use bytes::Bytes;
use futures::StreamExt;

use super::{check_location, ObjectStore, StoreError, StoredObject};
use crate::config::StoreCredentials;

// stream blobs 8KB at a time
const CHUNK_SIZE: u64 = 0x2000;

/// Azure Blob Storage, where a bucket is a container and a key is a blob name.
#[derive(Clone)]
pub struct BlobStore {
    service_client: BlobServiceClient,
}

impl BlobStore {
    pub fn new(credentials: &StoreCredentials) -> Self {
        let storage_credentials =
            StorageCredentials::access_key(credentials.account.clone(), credentials.access_key.clone());
        let service_client = BlobServiceClient::new(credentials.account.clone(), storage_credentials);

        tracing::debug!(account = %credentials.account, "blob store client created");

        Self { service_client }
    }
}

fn map_error(bucket: &str, key: &str, err: azure_core::Error) -> StoreError {
    match err.kind() {
        ErrorKind::HttpResponse { status, .. } if *status == StatusCode::NotFound => StoreError::NotFound {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        },
        ErrorKind::HttpResponse { status, .. } if is_transient(*status) => {
            StoreError::Unavailable(err.to_string())
        }
        ErrorKind::Io => StoreError::Unavailable(err.to_string()),
        _ => StoreError::Azure(err),
    }
}

fn is_transient(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::RequestTimeout
            | StatusCode::TooManyRequests
            | StatusCode::InternalServerError
            | StatusCode::BadGateway
            | StatusCode::ServiceUnavailable
            | StatusCode::GatewayTimeout
    )
}

impl ObjectStore for BlobStore {
    #[tracing::instrument(skip(self), name = "BlobStore::download")]
    async fn download(&self, bucket: &str, key: &str) -> Result<StoredObject, StoreError> {
        check_location(bucket, key)?;

        let blob_client = self.service_client.container_client(bucket).blob_client(key);

        let mut data: Vec<u8> = Vec::new();
        let mut content_type = None;

        let mut stream = blob_client.get().chunk_size(CHUNK_SIZE).into_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| map_error(bucket, key, err))?;

            // every range response carries the same properties
            if content_type.is_none() {
                content_type = Some(chunk.blob.properties.content_type.clone());
            }

            let bytes = chunk.data.collect().await.map_err(|err| map_error(bucket, key, err))?;
            data.extend_from_slice(&bytes);
        }

        tracing::debug!(size = data.len(), "blob downloaded");

        Ok(StoredObject {
            data: Bytes::from(data),
            content_type: content_type.unwrap_or_default(),
        })
    }

    #[tracing::instrument(skip(self, data), name = "BlobStore::upload", fields(size = data.len()))]
    async fn upload(&self, bucket: &str, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError> {
        check_location(bucket, key)?;

        let blob_client = self.service_client.container_client(bucket).blob_client(key);

        blob_client
            .put_block_blob(data)
            .content_type(content_type.to_owned())
            .await
            .map_err(|err| map_error(bucket, key, err))?;

        Ok(())
    }
}
