//! The [`ObjectStore`] trait and its `object_store`-backed implementation.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use object_store::{ObjectStore as DynObjectStore, PutPayload, path::Path};
use std::sync::Arc;
use thiserror::Error;

use crate::buckets::Bucket;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("backend error: {0}")]
    Backend(#[from] object_store::Error),
}

/// The two metadata fields every `put` must record alongside the raw bytes, mirroring the
/// wire header's own `payloadContentType`/`payloadDataStart` fields so the optical bridge
/// and retrievers never need to re-decode a header just to serve a byte range.
#[derive(Debug, Clone)]
pub struct ItemMetadata {
    pub content_type: Option<String>,
    pub payload_data_start: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: Bucket, key: &str, bytes: Bytes, metadata: ItemMetadata) -> Result<(), ObjectStoreError>;
    async fn get(&self, bucket: Bucket, key: &str) -> Result<Bytes, ObjectStoreError>;
    async fn get_metadata(&self, bucket: Bucket, key: &str) -> Result<ItemMetadata, ObjectStoreError>;
    async fn delete(&self, bucket: Bucket, key: &str) -> Result<(), ObjectStoreError>;
    async fn exists(&self, bucket: Bucket, key: &str) -> Result<bool, ObjectStoreError>;
    async fn list_by_prefix(&self, bucket: Bucket, prefix: &str) -> Result<Vec<String>, ObjectStoreError>;
}

/// One `object_store` backend per bucket (typically two buckets on the same S3-compatible
/// endpoint, distinguished by bucket name or key namespace).
pub struct PutObjectStore {
    raw: Arc<dyn DynObjectStore>,
    backup: Arc<dyn DynObjectStore>,
}

impl PutObjectStore {
    pub fn new(raw: Arc<dyn DynObjectStore>, backup: Arc<dyn DynObjectStore>) -> Self {
        Self { raw, backup }
    }

    fn backend(&self, bucket: Bucket) -> &Arc<dyn DynObjectStore> {
        match bucket {
            Bucket::Raw => &self.raw,
            Bucket::Backup => &self.backup,
        }
    }

    fn metadata_key(key: &str) -> String {
        format!("{key}.meta.json")
    }
}

#[async_trait]
impl ObjectStore for PutObjectStore {
    async fn put(&self, bucket: Bucket, key: &str, bytes: Bytes, metadata: ItemMetadata) -> Result<(), ObjectStoreError> {
        let backend = self.backend(bucket);
        let path = Path::from(key);
        backend.put(&path, PutPayload::from_bytes(bytes)).await?;

        let meta_json = serde_json::json!({
            "contentType": metadata.content_type,
            "payloadDataStart": metadata.payload_data_start,
        });
        let meta_path = Path::from(Self::metadata_key(key));
        backend
            .put(&meta_path, PutPayload::from_bytes(Bytes::from(meta_json.to_string())))
            .await?;
        Ok(())
    }

    async fn get(&self, bucket: Bucket, key: &str) -> Result<Bytes, ObjectStoreError> {
        let backend = self.backend(bucket);
        let result = backend.get(&Path::from(key)).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => ObjectStoreError::NotFound(key.to_string()),
            other => ObjectStoreError::Backend(other),
        })?;
        Ok(result.bytes().await?)
    }

    async fn get_metadata(&self, bucket: Bucket, key: &str) -> Result<ItemMetadata, ObjectStoreError> {
        let backend = self.backend(bucket);
        let result = backend
            .get(&Path::from(Self::metadata_key(key)))
            .await
            .map_err(|e| match e {
                object_store::Error::NotFound { .. } => ObjectStoreError::NotFound(key.to_string()),
                other => ObjectStoreError::Backend(other),
            })?;
        let bytes = result.bytes().await?;
        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|_| ObjectStoreError::NotFound(key.to_string()))?;
        Ok(ItemMetadata {
            content_type: value.get("contentType").and_then(|v| v.as_str()).map(String::from),
            payload_data_start: value.get("payloadDataStart").and_then(|v| v.as_u64()).unwrap_or(0),
        })
    }

    async fn delete(&self, bucket: Bucket, key: &str) -> Result<(), ObjectStoreError> {
        let backend = self.backend(bucket);
        // Idempotent on key: a missing object is not an error for delete.
        match backend.delete(&Path::from(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
            Err(other) => return Err(ObjectStoreError::Backend(other)),
        }
        let _ = backend.delete(&Path::from(Self::metadata_key(key))).await;
        Ok(())
    }

    async fn exists(&self, bucket: Bucket, key: &str) -> Result<bool, ObjectStoreError> {
        let backend = self.backend(bucket);
        match backend.head(&Path::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(other) => Err(ObjectStoreError::Backend(other)),
        }
    }

    async fn list_by_prefix(&self, bucket: Bucket, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        use futures::StreamExt;
        let backend = self.backend(bucket);
        let mut stream: BoxStream<'_, object_store::Result<object_store::ObjectMeta>> =
            backend.list(Some(&Path::from(prefix)));
        let mut keys = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta?;
            let key = meta.location.to_string();
            if !key.ends_with(".meta.json") {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}
