//! `unbundle-nested(itemId)`: for a data item whose tags declare it's itself a bundle
//! (`Bundle-Format`/`Bundle-Version`), parses its payload's index and writes an
//! [`ItemOffset`] per nested member, anchored to the *root* bundle but scoped under the
//! parent item's own payload.

use std::sync::Arc;

use bundler_objectstore::buckets::{Bucket, raw_data_item_key};
use bundler_objectstore::store::ObjectStore;
use bundler_store::MetadataStore;
use bundler_types::bundle::ItemOffset;
use bundler_types::wire::{compute_item_id, nested_index_entries, parse_nested_bundle_headers};

use crate::pipeline::{PipelineError, payload_str};

pub async fn run(
    payload: &serde_json::Value,
    store: &Arc<dyn MetadataStore>,
    objects: &Arc<dyn ObjectStore>,
) -> Result<(), PipelineError> {
    let item_id = payload_str(payload, "itemId")?.to_string();
    let item = store
        .get_item(&item_id)
        .await?
        .ok_or_else(|| PipelineError::BadPayload(format!("unknown item {item_id}")))?;
    let parent_offset = store
        .get_offset(&item_id)
        .await?
        .ok_or_else(|| PipelineError::BadPayload(format!("item {item_id} has no root offset yet")))?;

    let raw = objects.get(Bucket::Raw, &raw_data_item_key(&item_id)).await?;
    let nested_payload = &raw[item.payload_data_start as usize..];
    let headers = parse_nested_bundle_headers(nested_payload)?;
    let entries = nested_index_entries(nested_payload)?;

    let mut rows = Vec::with_capacity(headers.len());
    for (header, (entry_offset, entry_len)) in headers.iter().zip(entries) {
        let nested_id = compute_item_id(header);
        rows.push(ItemOffset {
            item_id: nested_id,
            root_bundle_id: parent_offset.root_bundle_id.clone(),
            start_offset_in_root: parent_offset.start_offset_in_root + item.payload_data_start + entry_offset as u64,
            raw_content_length: entry_len as u64,
            payload_data_start: header.payload_data_start,
            payload_content_type: None,
            parent_item_id: Some(item_id.clone()),
            start_offset_in_parent_payload: Some(entry_offset as u64),
        });
    }

    store.write_offsets(rows).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bundler_objectstore::store::{ItemMetadata, PutObjectStore};
    use bundler_store::memory::InMemoryStore;
    use bundler_types::item::{DataItem, ItemState};
    use bundler_types::timestamp::UnixTimestamp;
    use bundler_types::util::Base64Bytes;
    use bundler_types::wire::{decode_header, encode_bundle};
    use bytes::Bytes;
    use object_store::local::LocalFileSystem;

    /// A minimal signature-type-4 (ed25519, 64-byte sig / 32-byte pubkey) header with no
    /// target/anchor/tags, followed by `body`, matching `decode_header`'s expected layout.
    fn minimal_item_header_bytes(body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend(std::iter::repeat(0xABu8).take(64));
        buf.extend(std::iter::repeat(0xCDu8).take(32));
        buf.push(0);
        buf.extend_from_slice(&[0u8; 32]);
        buf.push(0);
        buf.extend_from_slice(&[0u8; 32]);
        buf.extend_from_slice(&0u128.to_le_bytes());
        buf.extend_from_slice(&0u128.to_le_bytes());
        buf.extend_from_slice(body);
        buf
    }

    /// Packs items through the real [`encode_bundle`] with real `compute_item_id`-derived ids
    /// (64-character base64, not a fixed-width stub), so the fixture actually exercises the
    /// index layout production code produces.
    fn nested_bundle_payload(bodies: &[&[u8]]) -> Vec<u8> {
        let items: Vec<(String, Base64Bytes<'static>)> = bodies
            .iter()
            .map(|b| {
                let bytes = minimal_item_header_bytes(b);
                let header = decode_header(&bytes).unwrap();
                let id = compute_item_id(&header);
                (id, Base64Bytes(bytes.into()))
            })
            .collect();
        encode_bundle(&items)
    }

    #[tokio::test]
    async fn writes_one_offset_per_nested_member_at_correct_byte_ranges() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("raw")).unwrap();
        std::fs::create_dir_all(tmp.path().join("backup")).unwrap();
        let raw = Arc::new(LocalFileSystem::new_with_prefix(tmp.path().join("raw")).unwrap());
        let backup = Arc::new(LocalFileSystem::new_with_prefix(tmp.path().join("backup")).unwrap());
        let objects: Arc<dyn ObjectStore> = Arc::new(PutObjectStore::new(raw, backup));
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryStore::new());

        let nested_payload = nested_bundle_payload(&[b"first-body", b"second-body-longer"]);
        let parent_payload_data_start = 16u64;
        let mut raw_bytes = vec![0u8; parent_payload_data_start as usize];
        raw_bytes.extend_from_slice(&nested_payload);

        let parent = DataItem {
            id: "parent-1".into(),
            owner_address: "0xowner".into(),
            signature_type: 4,
            byte_count: raw_bytes.len() as u64,
            payload_content_type: None,
            payload_data_start: parent_payload_data_start,
            uploaded_at: UnixTimestamp::from_secs(100),
            deadline_height: 10_100,
            assessed_price: 0,
            failed_bundles: Vec::new(),
            premium_feature_type: None,
            tags: Vec::new(),
            signature: vec![0u8; 8],
            state: ItemState::New,
        };
        store.insert_new_item(parent.clone()).await.unwrap();
        objects
            .put(
                Bucket::Raw,
                &raw_data_item_key("parent-1"),
                Bytes::from(raw_bytes),
                ItemMetadata { content_type: None, payload_data_start: parent_payload_data_start },
            )
            .await
            .unwrap();
        store
            .write_offsets(vec![ItemOffset {
                item_id: "parent-1".into(),
                root_bundle_id: "root-bundle-1".into(),
                start_offset_in_root: 1000,
                raw_content_length: parent.byte_count,
                payload_data_start: parent_payload_data_start,
                payload_content_type: None,
                parent_item_id: None,
                start_offset_in_parent_payload: None,
            }])
            .await
            .unwrap();

        run(&serde_json::json!({ "itemId": "parent-1" }), &store, &objects).await.unwrap();

        let headers = parse_nested_bundle_headers(&nested_payload).unwrap();
        assert_eq!(headers.len(), 2);
        let entries = nested_index_entries(&nested_payload).unwrap();
        assert_eq!(entries.len(), 2);

        let first_id = compute_item_id(&headers[0]);
        let second_id = compute_item_id(&headers[1]);
        let first_offset = store.get_offset(&first_id).await.unwrap().unwrap();
        let second_offset = store.get_offset(&second_id).await.unwrap().unwrap();

        assert_eq!(first_offset.parent_item_id.as_deref(), Some("parent-1"));
        assert_eq!(first_offset.start_offset_in_parent_payload, Some(entries[0].0 as u64));
        assert_eq!(first_offset.raw_content_length, entries[0].1 as u64);
        assert_eq!(
            first_offset.start_offset_in_root,
            1000 + parent_payload_data_start + entries[0].0 as u64
        );

        assert_eq!(second_offset.start_offset_in_parent_payload, Some(entries[1].0 as u64));
        assert_eq!(second_offset.raw_content_length, entries[1].1 as u64);
    }
}
