// functions/src/pipeline.rs

use bytes::Bytes;

use crate::notification::{Notification, ParseError};
use crate::store::{ObjectStore, StoreError};
use crate::transform::{self, TransformError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("parse: {0}")]
    Parse(#[from] ParseError),
    #[error("download: {0}")]
    Download(#[source] StoreError),
    #[error("transform: {0}")]
    Transform(#[from] TransformError),
    #[error("upload: {0}")]
    Upload(#[source] StoreError),
}

impl PipelineError {
    pub fn step(&self) -> &'static str {
        match self {
            PipelineError::Parse(_) => "parse",
            PipelineError::Download(_) => "download",
            PipelineError::Transform(_) => "transform",
            PipelineError::Upload(_) => "upload",
        }
    }

    /// Whether redelivering the message can never succeed. Such messages are
    /// still nacked; this only informs the logs.
    pub fn is_permanent(&self) -> bool {
        match self {
            PipelineError::Parse(_) => true,
            PipelineError::Download(err) | PipelineError::Upload(err) => err.is_permanent(),
            PipelineError::Transform(TransformError::Join(_)) => false,
            PipelineError::Transform(_) => true,
        }
    }
}

/// Result of a successful run, for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedObject {
    pub source_bucket: String,
    pub key: String,
    pub content_type: String,
    pub original_size: usize,
    pub resized_size: usize,
}

/// Parse, download, resize, upload. The destination key is the source key.
pub struct Pipeline<S> {
    store: S,
    destination_bucket: String,
}

impl<S: ObjectStore + Sync> Pipeline<S> {
    pub fn new(store: S, destination_bucket: impl Into<String>) -> Self {
        Self {
            store,
            destination_bucket: destination_bucket.into(),
        }
    }

    pub fn destination_bucket(&self) -> &str {
        &self.destination_bucket
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[tracing::instrument(skip_all)]
    pub async fn process(&self, payload: &[u8]) -> Result<ProcessedObject, PipelineError> {
        let Notification { bucket, name } = Notification::parse(payload)?;

        tracing::debug!(bucket = %bucket, name = %name, "processing notification");

        let object = self
            .store
            .download(&bucket, &name)
            .await
            .map_err(PipelineError::Download)?;

        let original_size = object.data.len();
        let resized = transform::resize_blocking(object.data, object.content_type.clone()).await?;
        let resized_size = resized.len();

        self.store
            .upload(&self.destination_bucket, &name, Bytes::from(resized), &object.content_type)
            .await
            .map_err(PipelineError::Upload)?;

        Ok(ProcessedObject {
            source_bucket: bucket,
            key: name,
            content_type: object.content_type,
            original_size,
            resized_size,
        })
    }
}
