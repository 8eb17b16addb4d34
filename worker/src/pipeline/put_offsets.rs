//! `put-offsets(bundleTxId)`: materializes each member item's [`ItemOffset`] once its root
//! bundle is confirmed `permanent`. The root bundle's own index isn't re-read from object
//! storage — `encode_bundle`'s layout (an 8-byte count, then one `(8-byte length, id bytes)`
//! entry per item, then bodies in the same order) is derived arithmetically from the plan's
//! already-persisted item ids and byte counts.

use std::sync::Arc;

use bundler_store::MetadataStore;
use bundler_types::bundle::ItemOffset;

use crate::pipeline::{PipelineError, payload_str};

pub async fn run(payload: &serde_json::Value, store: &Arc<dyn MetadataStore>) -> Result<(), PipelineError> {
    let bundle_tx_id = payload_str(payload, "bundleTxId")?.to_string();
    let bundle = store
        .get_posted_bundle(&bundle_tx_id)
        .await?
        .ok_or_else(|| PipelineError::BadPayload(format!("unknown bundle {bundle_tx_id}")))?;
    if !bundle.is_permanent() {
        return Err(PipelineError::BadPayload(format!("bundle {bundle_tx_id} is not yet permanent")));
    }
    let plan = store
        .get_bundle_plan(&bundle.plan_id)
        .await?
        .ok_or_else(|| PipelineError::BadPayload(format!("unknown plan {}", bundle.plan_id)))?;

    let mut items = Vec::with_capacity(plan.item_ids.len());
    for item_id in &plan.item_ids {
        let item = store
            .get_item(item_id)
            .await?
            .ok_or_else(|| PipelineError::BadPayload(format!("unknown item {item_id}")))?;
        items.push(item);
    }

    let index_section_len: u64 = items.iter().map(|item| 8 + item.id.as_bytes().len() as u64).sum();
    let mut offset = 8 + index_section_len;
    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        rows.push(ItemOffset {
            item_id: item.id.clone(),
            root_bundle_id: bundle_tx_id.clone(),
            start_offset_in_root: offset,
            raw_content_length: item.byte_count,
            payload_data_start: item.payload_data_start,
            payload_content_type: item.payload_content_type.clone(),
            parent_item_id: None,
            start_offset_in_parent_payload: None,
        });
        offset += item.byte_count;
    }

    store.write_offsets(rows).await?;
    Ok(())
}
