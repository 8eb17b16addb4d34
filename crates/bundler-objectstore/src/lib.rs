//! Content-addressed byte storage adapter (C2).
//!
//! Wraps the `object_store` crate so a single [`ObjectStore`] trait works against local disk
//! in tests and an S3-compatible warm tier (MinIO or equivalent) in production.

pub mod buckets;
pub mod store;

pub use buckets::{Bucket, RAW_DATA_ITEM_PREFIX};
pub use store::{ItemMetadata, ObjectStore, ObjectStoreError, PutObjectStore};
