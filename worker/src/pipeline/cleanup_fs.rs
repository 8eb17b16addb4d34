//! `cleanup-fs`: a repeatable cron job that reclaims local-disk and object-store copies of
//! items old enough that only the chain copy still matters. Permanent items are never
//! deleted from the chain itself — only their off-chain copies here.

use std::sync::Arc;

use bundler_objectstore::buckets::{Bucket, raw_data_item_key};
use bundler_objectstore::store::{ObjectStore, ObjectStoreError};
use bundler_store::MetadataStore;
use bundler_types::timestamp::UnixTimestamp;

use crate::config::Config;
use crate::pipeline::PipelineError;

const CURSOR_NAME: &str = "cleanup-fs";

pub async fn run(
    store: &Arc<dyn MetadataStore>,
    objects: &Arc<dyn ObjectStore>,
    config: &Config,
) -> Result<usize, PipelineError> {
    let now = UnixTimestamp::now().as_secs();
    let cursor = load_cursor(store).await?;

    let filesystem_cutoff = now.saturating_sub(config.filesystem_cleanup_days * 24 * 60 * 60);
    let minio_cutoff = now.saturating_sub(config.minio_cleanup_days * 24 * 60 * 60);
    let oldest_cutoff = filesystem_cutoff.max(minio_cutoff);

    let items = store.list_items_uploaded_before(oldest_cutoff, cursor, config.cleanup_batch_size).await?;
    let mut swept = 0;
    for item in &items {
        let key = raw_data_item_key(&item.id);
        if item.uploaded_at.as_secs() < filesystem_cutoff {
            delete_missing_ok(objects.delete(Bucket::Backup, &key).await)?;
        }
        if item.uploaded_at.as_secs() < minio_cutoff {
            delete_missing_ok(objects.delete(Bucket::Raw, &key).await)?;
        }
        swept += 1;
    }

    if let Some(last) = items.last() {
        store.put_cleanup_cursor(CURSOR_NAME, &format!("{}:{}", last.uploaded_at.as_secs(), last.id)).await?;
    } else {
        store.put_cleanup_cursor(CURSOR_NAME, "").await?;
    }
    Ok(swept)
}

fn delete_missing_ok(result: Result<(), ObjectStoreError>) -> Result<(), PipelineError> {
    match result {
        Ok(()) | Err(ObjectStoreError::NotFound(_)) => Ok(()),
        Err(other) => Err(other.into()),
    }
}

async fn load_cursor(store: &Arc<dyn MetadataStore>) -> Result<Option<(u64, String)>, PipelineError> {
    let Some(raw) = store.get_cleanup_cursor(CURSOR_NAME).await? else {
        return Ok(None);
    };
    let Some((secs, id)) = raw.split_once(':') else {
        return Ok(None);
    };
    let Ok(secs) = secs.parse::<u64>() else {
        return Ok(None);
    };
    Ok(Some((secs, id.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bundler_objectstore::store::{ItemMetadata, PutObjectStore};
    use bundler_store::memory::InMemoryStore;
    use bundler_types::item::{DataItem, ItemState};
    use bundler_types::timestamp::UnixTimestamp;
    use bytes::Bytes;
    use object_store::local::LocalFileSystem;

    fn test_config(tmp: &std::path::Path) -> Config {
        Config {
            database_url: None,
            redis_url: None,
            local_mode: true,
            local_data_dir: tmp.to_string_lossy().to_string(),
            gateway_url: "http://localhost:1984".into(),
            receipt_signing_key_hex: "00".repeat(32),
            max_bundle_byte_count: bundler_types::bundle::DEFAULT_MAX_BUNDLE_BYTE_COUNT,
            max_items_per_bundle: bundler_types::bundle::DEFAULT_MAX_ITEMS_PER_BUNDLE,
            overdue_threshold_secs: 900,
            confirmation_depth: 18,
            verify_timeout_secs: 6 * 60 * 60,
            filesystem_cleanup_days: 7,
            minio_cleanup_days: 90,
            plan_bundle_cron: "0 * * * * *".into(),
            cleanup_cron: "0 0 2 * * *".into(),
            cleanup_batch_size: 500,
            payments: Default::default(),
        }
    }

    fn sample_item(id: &str, uploaded_at_secs: u64) -> DataItem {
        DataItem {
            id: id.to_string(),
            owner_address: "0xowner".into(),
            signature_type: 1,
            byte_count: 10,
            payload_content_type: None,
            payload_data_start: 0,
            uploaded_at: UnixTimestamp::from_secs(uploaded_at_secs),
            deadline_height: 10_100,
            assessed_price: 0,
            failed_bundles: Vec::new(),
            premium_feature_type: None,
            tags: Vec::new(),
            signature: vec![0u8; 8],
            state: ItemState::New,
        }
    }

    fn object_store_pair(tmp: &std::path::Path) -> Arc<dyn ObjectStore> {
        std::fs::create_dir_all(tmp.join("raw")).unwrap();
        std::fs::create_dir_all(tmp.join("backup")).unwrap();
        let raw = Arc::new(LocalFileSystem::new_with_prefix(tmp.join("raw")).unwrap());
        let backup = Arc::new(LocalFileSystem::new_with_prefix(tmp.join("backup")).unwrap());
        Arc::new(PutObjectStore::new(raw, backup))
    }

    #[tokio::test]
    async fn sweeps_items_past_the_minio_cutoff_and_persists_cursor() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryStore::new());
        let objects = object_store_pair(tmp.path());

        // uploaded far enough in the past to clear both cutoffs relative to `now` (real time).
        let ancient = UnixTimestamp::now().as_secs().saturating_sub(200 * 24 * 60 * 60);
        store.insert_new_item(sample_item("old-1", ancient)).await.unwrap();
        objects
            .put(
                Bucket::Raw,
                &raw_data_item_key("old-1"),
                Bytes::from_static(b"0123456789"),
                ItemMetadata { content_type: None, payload_data_start: 0 },
            )
            .await
            .unwrap();

        let swept = run(&store, &objects, &config).await.unwrap();
        assert_eq!(swept, 1);
        assert!(!objects.exists(Bucket::Raw, &raw_data_item_key("old-1")).await.unwrap());

        let cursor = store.get_cleanup_cursor("cleanup-fs").await.unwrap();
        assert_eq!(cursor, Some(format!("{ancient}:old-1")));
    }

    #[tokio::test]
    async fn deleting_an_already_missing_object_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryStore::new());
        let objects = object_store_pair(tmp.path());

        let ancient = UnixTimestamp::now().as_secs().saturating_sub(200 * 24 * 60 * 60);
        store.insert_new_item(sample_item("never-stored", ancient)).await.unwrap();

        let swept = run(&store, &objects, &config).await.unwrap();
        assert_eq!(swept, 1);
    }

    #[tokio::test]
    async fn recent_items_are_left_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryStore::new());
        let objects = object_store_pair(tmp.path());
        store.insert_new_item(sample_item("fresh", UnixTimestamp::now().as_secs())).await.unwrap();

        let swept = run(&store, &objects, &config).await.unwrap();
        assert_eq!(swept, 0);
    }
}
