//! `finalize-upload(uploadId)`: concatenates a multi-part upload's parts, decodes and
//! verifies the resulting item, and admits it the same way the admission service would.

use std::sync::Arc;

use bundler_objectstore::buckets::{Bucket, raw_data_item_key};
use bundler_objectstore::store::{ItemMetadata, ObjectStore};
use bundler_store::MetadataStore;
use bundler_types::item::{DataItem, ItemState};
use bundler_types::timestamp::UnixTimestamp;
use bundler_types::wire::{compute_item_id, decode_header, verify_signature};
use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::pipeline::{PipelineError, payload_str};

fn multipart_prefix(upload_id: &str) -> String {
    format!("multipart/{upload_id}/")
}

pub async fn run(
    payload: &serde_json::Value,
    store: &Arc<dyn MetadataStore>,
    objects: &Arc<dyn ObjectStore>,
) -> Result<(), PipelineError> {
    let upload_id = payload_str(payload, "uploadId")?.to_string();
    let prefix = multipart_prefix(&upload_id);
    let mut part_keys = objects.list_by_prefix(Bucket::Raw, &prefix).await?;
    part_keys.sort();
    if part_keys.is_empty() {
        return Err(PipelineError::BadPayload(format!("upload {upload_id} has no parts")));
    }

    let mut joined = Vec::new();
    for key in &part_keys {
        joined.extend_from_slice(&objects.get(Bucket::Raw, key).await?);
    }

    let header = decode_header(&joined)?;
    verify_signature(&header, &joined[header.payload_data_start as usize..])?;
    let item_id = compute_item_id(&header);

    let item = DataItem {
        id: item_id.clone(),
        owner_address: hex::encode(Sha256::digest(&header.owner_pubkey)),
        signature_type: header.signature_type,
        byte_count: joined.len() as u64,
        payload_content_type: None,
        payload_data_start: header.payload_data_start,
        uploaded_at: UnixTimestamp::now(),
        deadline_height: 0,
        assessed_price: 0,
        failed_bundles: Vec::new(),
        premium_feature_type: None,
        tags: header.tags.clone(),
        signature: header.signature.clone(),
        state: ItemState::New,
    };

    objects
        .put(
            Bucket::Raw,
            &raw_data_item_key(&item_id),
            Bytes::from(joined),
            ItemMetadata { content_type: None, payload_data_start: header.payload_data_start },
        )
        .await?;
    store.insert_new_item(item).await?;

    for key in &part_keys {
        objects.delete(Bucket::Raw, key).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bundler_objectstore::store::PutObjectStore;
    use bundler_store::memory::InMemoryStore;
    use bundler_types::wire::{DeepHashInput, deep_hash};
    use ed25519_dalek::{Signer, SigningKey};
    use object_store::local::LocalFileSystem;

    fn signed_item_bytes(payload: &[u8]) -> Vec<u8> {
        let mut csprng = rand_core::OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let deep_input = DeepHashInput {
            signature_type: 4,
            owner_pubkey: signing_key.verifying_key().as_bytes().to_vec(),
            target: None,
            anchor: None,
            tags: vec![],
        };
        let digest = deep_hash(&deep_input, payload);
        let signature = signing_key.sign(&digest);

        let mut buf = Vec::new();
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&signature.to_bytes());
        buf.extend_from_slice(signing_key.verifying_key().as_bytes());
        buf.push(0);
        buf.extend_from_slice(&[0u8; 32]);
        buf.push(0);
        buf.extend_from_slice(&[0u8; 32]);
        buf.extend_from_slice(&0u128.to_le_bytes());
        buf.extend_from_slice(&0u128.to_le_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    fn object_store_pair(tmp: &std::path::Path) -> Arc<dyn ObjectStore> {
        std::fs::create_dir_all(tmp.join("raw")).unwrap();
        std::fs::create_dir_all(tmp.join("backup")).unwrap();
        let raw = Arc::new(LocalFileSystem::new_with_prefix(tmp.join("raw")).unwrap());
        let backup = Arc::new(LocalFileSystem::new_with_prefix(tmp.join("backup")).unwrap());
        Arc::new(PutObjectStore::new(raw, backup))
    }

    #[tokio::test]
    async fn joins_parts_in_key_order_and_admits_the_decoded_item() {
        let tmp = tempfile::tempdir().unwrap();
        let objects = object_store_pair(tmp.path());
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryStore::new());

        let whole = signed_item_bytes(b"hello permanent storage");
        let (first_half, second_half) = whole.split_at(whole.len() / 2);
        let prefix = multipart_prefix("upload-1");
        for (i, part) in [first_half, second_half].into_iter().enumerate() {
            objects
                .put(
                    Bucket::Raw,
                    &format!("{prefix}{i:04}"),
                    Bytes::copy_from_slice(part),
                    ItemMetadata { content_type: None, payload_data_start: 0 },
                )
                .await
                .unwrap();
        }

        run(&serde_json::json!({ "uploadId": "upload-1" }), &store, &objects).await.unwrap();

        let header = decode_header(&whole).unwrap();
        let item_id = compute_item_id(&header);
        let stored = store.get_item(&item_id).await.unwrap().unwrap();
        assert_eq!(stored.byte_count, whole.len() as u64);
        assert!(objects.list_by_prefix(Bucket::Raw, &prefix).await.unwrap().is_empty());
        assert!(objects.exists(Bucket::Raw, &raw_data_item_key(&item_id)).await.unwrap());
    }

    #[tokio::test]
    async fn rejects_an_upload_id_with_no_parts() {
        let tmp = tempfile::tempdir().unwrap();
        let objects = object_store_pair(tmp.path());
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryStore::new());

        let err = run(&serde_json::json!({ "uploadId": "no-such-upload" }), &store, &objects).await;
        assert!(matches!(err, Err(PipelineError::BadPayload(_))));
    }
}
