//! `plan-bundle`: greedy bin-packing of unbundled items into `BundlePlan`s, grouped by
//! `premiumFeatureType`.

use crate::config::Config;
use crate::pipeline::PipelineError;
use bundler_queue::{Label, QueueBroker};
use bundler_store::MetadataStore;
use bundler_types::bundle::BundlePlan;
use bundler_types::item::DataItem;
use bundler_types::timestamp::UnixTimestamp;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A single greedy-packing pass: lists every unbundled item, partitions by feature class,
/// and emits a plan for each class's full or overdue batch. Underweight, non-overdue
/// batches are left unbundled for the next tick.
pub async fn run(
    store: &Arc<dyn MetadataStore>,
    queue: &Arc<dyn QueueBroker>,
    config: &Config,
) -> Result<usize, PipelineError> {
    let items = store.list_unbundled_items(None, 100_000, None).await?;
    let mut by_class: BTreeMap<Option<String>, Vec<DataItem>> = BTreeMap::new();
    for item in items {
        by_class.entry(item.premium_feature_type.clone()).or_default().push(item);
    }

    let now = UnixTimestamp::now().as_secs();
    let mut plans_created = 0;

    for (feature_class, class_items) in by_class {
        for batch in pack_batches(class_items, config.max_bundle_byte_count, config.max_items_per_bundle) {
            let oldest_uploaded_at = batch.first().map(|i| i.uploaded_at.as_secs()).unwrap_or(now);
            let is_full = batch_is_full(&batch, config.max_bundle_byte_count, config.max_items_per_bundle);
            let is_overdue = now.saturating_sub(oldest_uploaded_at) > config.overdue_threshold_secs;
            if !is_full && !is_overdue {
                continue;
            }

            let plan_id = format!("plan-{}", ulid_like(&batch));
            let pairs: Vec<(String, u64)> = batch.iter().map(|i| (i.id.clone(), i.byte_count)).collect();
            let plan = BundlePlan::new(
                plan_id.clone(),
                &pairs,
                UnixTimestamp::from_secs(now),
                feature_class.clone(),
                is_overdue && !is_full,
                config.max_bundle_byte_count,
                config.max_items_per_bundle,
            )
            .map_err(|e| PipelineError::BadPayload(e.to_string()))?;

            store.create_bundle_plan(plan).await?;
            queue
                .enqueue(Label::PrepareBundle, serde_json::json!({ "planId": plan_id }), None)
                .await?;
            plans_created += 1;
        }
    }
    Ok(plans_created)
}

/// Splits a class's items (already oldest-first) into maximal batches under the byte/count
/// budgets. The final batch may be underweight; the caller decides whether it's overdue
/// enough to flush anyway.
fn pack_batches(items: Vec<DataItem>, max_bytes: u64, max_items: usize) -> Vec<Vec<DataItem>> {
    let mut batches = Vec::new();
    let mut current: Vec<DataItem> = Vec::new();
    let mut current_bytes = 0u64;

    for item in items {
        if !current.is_empty()
            && (current_bytes + item.byte_count > max_bytes || current.len() >= max_items)
        {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += item.byte_count;
        current.push(item);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

fn batch_is_full(batch: &[DataItem], max_bytes: u64, max_items: usize) -> bool {
    let total: u64 = batch.iter().map(|i| i.byte_count).sum();
    total >= max_bytes || batch.len() >= max_items
}

/// Plan id derived from the batch's own member ids, so it's reproducible if `plan-bundle`
/// is ever re-run against the same candidate set before a plan is durably created.
fn ulid_like(batch: &[DataItem]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    for item in batch {
        hasher.update(item.id.as_bytes());
    }
    hex::encode(hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bundler_queue::inmemory::InMemoryQueue;
    use bundler_store::memory::InMemoryStore;
    use bundler_types::item::ItemState;

    fn sample_item(id: &str, byte_count: u64, uploaded_at_secs: u64) -> DataItem {
        DataItem {
            id: id.to_string(),
            owner_address: "0xowner".into(),
            signature_type: 1,
            byte_count,
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

    #[test]
    fn pack_batches_splits_on_byte_budget_and_item_count() {
        let items = vec![sample_item("a", 60, 1), sample_item("b", 60, 2), sample_item("c", 10, 3)];
        let batches = pack_batches(items, 100, 10);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].iter().map(|i| i.id.clone()).collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(batches[1].iter().map(|i| i.id.clone()).collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn pack_batches_splits_once_item_count_budget_is_reached() {
        let items = vec![sample_item("a", 1, 1), sample_item("b", 1, 2), sample_item("c", 1, 3)];
        let batches = pack_batches(items, 1_000_000, 2);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);
    }

    #[test]
    fn batch_is_full_reports_true_at_either_budget() {
        let by_bytes = vec![sample_item("a", 100, 1)];
        assert!(batch_is_full(&by_bytes, 100, 10));
        assert!(!batch_is_full(&by_bytes, 101, 10));

        let by_count = vec![sample_item("a", 1, 1), sample_item("b", 1, 2)];
        assert!(batch_is_full(&by_count, 1_000_000, 2));
        assert!(!batch_is_full(&by_count, 1_000_000, 3));
    }

    #[test]
    fn ulid_like_is_deterministic_for_the_same_member_ids() {
        let batch = vec![sample_item("a", 1, 1), sample_item("b", 1, 2)];
        assert_eq!(ulid_like(&batch), ulid_like(&batch));
        let other = vec![sample_item("c", 1, 1)];
        assert_ne!(ulid_like(&batch), ulid_like(&other));
    }

    #[tokio::test]
    async fn flushes_an_overdue_underweight_batch_as_a_partial_plan() {
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryStore::new());
        let queue: Arc<dyn QueueBroker> = Arc::new(InMemoryQueue::new());
        let config = Config {
            database_url: None,
            redis_url: None,
            local_mode: true,
            local_data_dir: "/tmp".into(),
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
        };
        let overdue = UnixTimestamp::now().as_secs().saturating_sub(3600);
        store.insert_new_item(sample_item("a", 10, overdue)).await.unwrap();

        let created = run(&store, &queue, &config).await.unwrap();
        assert_eq!(created, 1);
        assert_eq!(queue.reserve(Label::PrepareBundle, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn leaves_a_fresh_underweight_batch_unbundled() {
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryStore::new());
        let queue: Arc<dyn QueueBroker> = Arc::new(InMemoryQueue::new());
        let config = Config {
            database_url: None,
            redis_url: None,
            local_mode: true,
            local_data_dir: "/tmp".into(),
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
        };
        store.insert_new_item(sample_item("a", 10, UnixTimestamp::now().as_secs())).await.unwrap();

        let created = run(&store, &queue, &config).await.unwrap();
        assert_eq!(created, 0);
        assert_eq!(queue.reserve(Label::PrepareBundle, 10).await.unwrap().len(), 0);
    }
}
