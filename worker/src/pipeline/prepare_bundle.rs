//! `prepare-bundle(planId)`: streams member item bytes from the object store, concatenates
//! them into the wire bundle format, and spools the result to local disk ahead of posting.
//!
//! Errors here are not distinguished as transient/persistent inline; the dispatcher in
//! [`crate::run`] retries the job up to `Label::PrepareBundle`'s attempt budget and only
//! then walks the plan's members through [`bundler_store::MetadataStore::record_item_bundle_failure`].

use std::path::PathBuf;
use std::sync::Arc;

use bundler_objectstore::buckets::{Bucket, raw_data_item_key};
use bundler_objectstore::store::ObjectStore;
use bundler_payments::PaymentEngine;
use bundler_payments::pricing::PriceSource;
use bundler_queue::{Label, QueueBroker};
use bundler_store::MetadataStore;
use bundler_types::util::Base64Bytes;
use bundler_types::wire::encode_bundle;

use crate::config::Config;
use crate::pipeline::{PipelineError, payload_str};

/// Local path a prepared bundle's bytes are spooled to before `post-bundle` uploads them.
pub fn spool_path(config: &Config, plan_id: &str) -> PathBuf {
    PathBuf::from(&config.local_data_dir).join("bundles").join(format!("{plan_id}.bundle"))
}

pub async fn run<S: PriceSource>(
    payload: &serde_json::Value,
    store: &Arc<dyn MetadataStore>,
    objects: &Arc<dyn ObjectStore>,
    queue: &Arc<dyn QueueBroker>,
    payments: &Arc<PaymentEngine<S>>,
    config: &Config,
) -> Result<(), PipelineError> {
    let plan_id = payload_str(payload, "planId")?.to_string();
    let plan = store
        .get_bundle_plan(&plan_id)
        .await?
        .ok_or_else(|| PipelineError::BadPayload(format!("unknown plan {plan_id}")))?;

    let mut items = Vec::with_capacity(plan.item_ids.len());
    for item_id in &plan.item_ids {
        let raw = objects.get(Bucket::Raw, &raw_data_item_key(item_id)).await?;
        let actual_byte_count = raw.len() as u64;

        if let Some(payment) = store.get_payment_for_item(item_id).await? {
            if let Err(err) = payments.finalize_payment(&payment.payment_id, actual_byte_count).await {
                tracing::warn!(item_id, payment_id = payment.payment_id, error = %err, "payment finalization failed");
            }
        }

        items.push((item_id.clone(), Base64Bytes(raw.to_vec().into())));
    }

    let bundle_bytes = encode_bundle(&items);
    let byte_count = bundle_bytes.len() as u64;

    let path = spool_path(config, &plan_id);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, &bundle_bytes).await?;

    store.mark_prepared(&plan_id, byte_count).await?;
    queue.enqueue(Label::PostBundle, serde_json::json!({ "planId": plan_id }), None).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bundler_objectstore::store::{ItemMetadata, PutObjectStore};
    use bundler_payments::pricing::{PriceSource, PricingError, PricingOracle};
    use bundler_queue::inmemory::InMemoryQueue;
    use bundler_store::memory::InMemoryStore;
    use bundler_types::bundle::BundlePlan;
    use bundler_types::item::{DataItem, ItemState};
    use bundler_types::timestamp::UnixTimestamp;
    use bytes::Bytes;
    use object_store::local::LocalFileSystem;

    /// Never actually quoted in these tests; `finalize_payment` only touches the store.
    struct NeverQuotedPriceSource;

    #[async_trait::async_trait]
    impl PriceSource for NeverQuotedPriceSource {
        async fn chain_unit_price_per_byte(&self) -> Result<u128, PricingError> {
            Err(PricingError::ChainGateway("not configured in this test".into()))
        }
        async fn chain_unit_to_usd_micros(&self) -> Result<u128, PricingError> {
            Err(PricingError::FxGateway("not configured in this test".into()))
        }
    }

    fn test_payments(store: Arc<dyn MetadataStore>) -> Arc<PaymentEngine<NeverQuotedPriceSource>> {
        let pricing = PricingOracle::new(NeverQuotedPriceSource);
        Arc::new(PaymentEngine::new(Default::default(), pricing, store))
    }

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

    fn sample_item(id: &str, byte_count: u64) -> DataItem {
        DataItem {
            id: id.to_string(),
            owner_address: "0xowner".into(),
            signature_type: 1,
            byte_count,
            payload_content_type: None,
            payload_data_start: 0,
            uploaded_at: UnixTimestamp::from_secs(100),
            deadline_height: 10_100,
            assessed_price: 0,
            failed_bundles: Vec::new(),
            premium_feature_type: None,
            tags: Vec::new(),
            signature: vec![0u8; 8],
            state: ItemState::New,
        }
    }

    #[tokio::test]
    async fn spools_the_encoded_bundle_and_enqueues_post_bundle() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryStore::new());
        let queue: Arc<dyn QueueBroker> = Arc::new(InMemoryQueue::new());
        std::fs::create_dir_all(tmp.path().join("raw")).unwrap();
        std::fs::create_dir_all(tmp.path().join("backup")).unwrap();
        let raw = Arc::new(LocalFileSystem::new_with_prefix(tmp.path().join("raw")).unwrap());
        let backup = Arc::new(LocalFileSystem::new_with_prefix(tmp.path().join("backup")).unwrap());
        let objects: Arc<dyn ObjectStore> = Arc::new(PutObjectStore::new(raw, backup));

        let item = sample_item("item-1", 5);
        store.insert_new_item(item.clone()).await.unwrap();
        objects
            .put(Bucket::Raw, &raw_data_item_key("item-1"), Bytes::from_static(b"hello"), ItemMetadata {
                content_type: None,
                payload_data_start: 0,
            })
            .await
            .unwrap();

        let plan = BundlePlan::new(
            "plan1".into(),
            &[("item-1".into(), 5)],
            UnixTimestamp::from_secs(200),
            None,
            false,
            config.max_bundle_byte_count,
            config.max_items_per_bundle,
        )
        .unwrap();
        store.create_bundle_plan(plan).await.unwrap();
        let payments = test_payments(store.clone());

        run(&serde_json::json!({ "planId": "plan1" }), &store, &objects, &queue, &payments, &config).await.unwrap();

        let spooled = tokio::fs::read(spool_path(&config, "plan1")).await.unwrap();
        assert_eq!(spooled, encode_bundle(&[("item-1".to_string(), Base64Bytes(b"hello".to_vec().into()))]));
        assert_eq!(store.get_item("item-1").await.unwrap().unwrap().state, ItemState::Prepared);
        assert_eq!(queue.reserve(Label::PostBundle, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn finalizes_the_linked_payment_against_the_item_actual_byte_count() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryStore::new());
        let queue: Arc<dyn QueueBroker> = Arc::new(InMemoryQueue::new());
        std::fs::create_dir_all(tmp.path().join("raw")).unwrap();
        std::fs::create_dir_all(tmp.path().join("backup")).unwrap();
        let raw = Arc::new(LocalFileSystem::new_with_prefix(tmp.path().join("raw")).unwrap());
        let backup = Arc::new(LocalFileSystem::new_with_prefix(tmp.path().join("backup")).unwrap());
        let objects: Arc<dyn ObjectStore> = Arc::new(PutObjectStore::new(raw, backup));

        let item = sample_item("item-1", 5);
        store.insert_new_item(item.clone()).await.unwrap();
        objects
            .put(Bucket::Raw, &raw_data_item_key("item-1"), Bytes::from_static(b"hello"), ItemMetadata {
                content_type: None,
                payload_data_start: 0,
            })
            .await
            .unwrap();

        let payment = bundler_types::payment::Payment {
            payment_id: "pay-1".into(),
            tx_hash: "0xabc".into(),
            network: "eip155:8453".into(),
            token_address: "0xusdc".into(),
            payer_address: "0xpayer".into(),
            recipient_address: "0xrecipient".into(),
            stable_amount: 1,
            chain_unit_amount: 1_000_000,
            mode: bundler_types::payment::PaymentMode::Payg,
            declared_byte_count: 5,
            actual_byte_count: None,
            status: bundler_types::payment::PaymentStatus::PendingValidation,
            linked_item_id: None,
            created_at: UnixTimestamp::from_secs(100),
            finalized_at: None,
            refund_amount: None,
        };
        store.insert_payment(payment).await.unwrap();
        store.link_payment_to_item("pay-1", "item-1").await.unwrap();

        let plan = BundlePlan::new(
            "plan1".into(),
            &[("item-1".into(), 5)],
            UnixTimestamp::from_secs(200),
            None,
            false,
            config.max_bundle_byte_count,
            config.max_items_per_bundle,
        )
        .unwrap();
        store.create_bundle_plan(plan).await.unwrap();
        let payments = test_payments(store.clone());

        run(&serde_json::json!({ "planId": "plan1" }), &store, &objects, &queue, &payments, &config).await.unwrap();

        let finalized = store.get_payment("pay-1").await.unwrap().unwrap();
        assert_eq!(finalized.status, bundler_types::payment::PaymentStatus::Confirmed);
        assert_eq!(finalized.actual_byte_count, Some(5));
    }
}
