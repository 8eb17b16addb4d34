//! `optical-post(itemId)`: forwards an admitted item's header to the configured downstream
//! indexer sinks (C10), re-signed with the bundler's own wallet so a sink can verify the
//! item passed through this bundler rather than trusting the raw client-submitted header.

use std::sync::Arc;

use bundler_optical::sink::{Sink, fan_out};
use bundler_store::MetadataStore;
use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::pipeline::{PipelineError, payload_str};

pub async fn run(
    payload: &serde_json::Value,
    store: &Arc<dyn MetadataStore>,
    http: &reqwest::Client,
    wallet: &SigningKey,
    sinks: &Arc<Vec<Sink>>,
    config: &Config,
) -> Result<(), PipelineError> {
    let item_id = payload_str(payload, "itemId")?.to_string();
    let item = store
        .get_item(&item_id)
        .await?
        .ok_or_else(|| PipelineError::BadPayload(format!("unknown item {item_id}")))?;

    let resigned_signature = resign_item_id(wallet, &item_id);

    fan_out(
        http,
        sinks,
        config.local_mode,
        &item_id,
        &item.owner_address,
        item.signature_type,
        &item.tags,
        &resigned_signature,
    )
    .await
    .map_err(|e| PipelineError::Gateway(e.to_string()))?;
    Ok(())
}

/// Signs the item id's digest with the service wallet, the same custody-attestation shape
/// `post-bundle` uses for a whole bundle's transaction id, scoped here to a single item.
fn resign_item_id(wallet: &SigningKey, item_id: &str) -> Vec<u8> {
    let digest = Sha256::digest(item_id.as_bytes());
    wallet.sign(&digest).to_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bundler_optical::sink::SinkRole;
    use bundler_store::memory::InMemoryStore;
    use bundler_types::item::{DataItem, ItemState};
    use bundler_types::timestamp::UnixTimestamp;
    use std::time::Duration;

    fn sample_item(id: &str) -> DataItem {
        DataItem {
            id: id.to_string(),
            owner_address: "0xowner".into(),
            signature_type: 1,
            byte_count: 10,
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

    #[test]
    fn resign_item_id_is_deterministic_for_the_same_wallet() {
        let wallet = SigningKey::from_bytes(&[7u8; 32]);
        assert_eq!(resign_item_id(&wallet, "item-1"), resign_item_id(&wallet, "item-1"));
        assert_ne!(resign_item_id(&wallet, "item-1"), resign_item_id(&wallet, "item-2"));
    }

    #[tokio::test]
    async fn fails_when_no_primary_sink_is_reachable() {
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryStore::new());
        store.insert_new_item(sample_item("item-1")).await.unwrap();
        let wallet = SigningKey::from_bytes(&[7u8; 32]);
        let sinks = Arc::new(vec![Sink::new(
            "primary",
            "http://127.0.0.1:1",
            SinkRole::Primary,
            Duration::from_secs(30),
        )]);
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

        let result =
            run(&serde_json::json!({ "itemId": "item-1" }), &store, &reqwest::Client::new(), &wallet, &sinks, &config)
                .await;
        assert!(result.is_err());
    }
}
