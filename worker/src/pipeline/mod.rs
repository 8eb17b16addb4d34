//! One module per job label, dispatched from [`crate::run`]'s per-label poll loop.

pub mod cleanup_fs;
pub mod finalize_upload;
pub mod optical_post;
pub mod plan_bundle;
pub mod post_bundle;
pub mod prepare_bundle;
pub mod put_offsets;
pub mod unbundle_nested;
pub mod verify_bundle;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] bundler_store::StoreError),
    #[error(transparent)]
    Objects(#[from] bundler_objectstore::ObjectStoreError),
    #[error(transparent)]
    Queue(#[from] bundler_queue::QueueError),
    #[error(transparent)]
    Wire(#[from] bundler_types::wire::WireError),
    #[error("gateway request failed: {0}")]
    Gateway(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed job payload: {0}")]
    BadPayload(String),
}

/// Extracts a required string field from a job's JSON payload.
pub fn payload_str<'a>(payload: &'a serde_json::Value, field: &str) -> Result<&'a str, PipelineError> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| PipelineError::BadPayload(format!("missing field `{field}`")))
}
