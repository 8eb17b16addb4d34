//! `verify-bundle(bundleTxId)`: polls the chain gateway until the posted bundle has cleared
//! volatility (18 confirmations), or gives up after `verifyTimeoutSecs` and rewinds the plan.

use std::sync::Arc;

use bundler_queue::{Label, QueueBroker};
use bundler_store::MetadataStore;
use bundler_types::timestamp::UnixTimestamp;
use serde::Deserialize;

use crate::config::Config;
use crate::pipeline::{PipelineError, payload_str};

/// How often an unconfirmed bundle is re-checked.
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

#[derive(Deserialize)]
struct TxStatusResponse {
    #[serde(rename = "block_height")]
    block_height: u64,
    #[serde(rename = "number_of_confirmations")]
    number_of_confirmations: u64,
}

pub async fn run(
    payload: &serde_json::Value,
    store: &Arc<dyn MetadataStore>,
    queue: &Arc<dyn QueueBroker>,
    http: &reqwest::Client,
    config: &Config,
) -> Result<(), PipelineError> {
    let bundle_tx_id = payload_str(payload, "bundleTxId")?.to_string();
    let first_polled_at = payload
        .get("firstPolledAt")
        .and_then(|v| v.as_u64())
        .unwrap_or_else(|| UnixTimestamp::now().as_secs());

    let response = http
        .get(format!("{}/tx/{}/status", config.gateway_url, bundle_tx_id))
        .send()
        .await
        .map_err(|e| PipelineError::Gateway(e.to_string()))?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return handle_unconfirmed(&bundle_tx_id, first_polled_at, store, queue, config).await;
    }
    if !response.status().is_success() {
        return Err(PipelineError::Gateway(format!("status lookup failed with {}", response.status())));
    }

    let status: TxStatusResponse =
        response.json().await.map_err(|e| PipelineError::Gateway(e.to_string()))?;
    if status.number_of_confirmations < config.confirmation_depth {
        return handle_unconfirmed(&bundle_tx_id, first_polled_at, store, queue, config).await;
    }

    store.mark_permanent(&bundle_tx_id, status.block_height).await?;
    queue
        .enqueue(Label::PutOffsets, serde_json::json!({ "bundleTxId": bundle_tx_id }), None)
        .await?;
    Ok(())
}

async fn handle_unconfirmed(
    bundle_tx_id: &str,
    first_polled_at: u64,
    store: &Arc<dyn MetadataStore>,
    queue: &Arc<dyn QueueBroker>,
    config: &Config,
) -> Result<(), PipelineError> {
    let elapsed = UnixTimestamp::now().as_secs().saturating_sub(first_polled_at);
    if elapsed < config.verify_timeout_secs {
        queue
            .enqueue(
                Label::VerifyBundle,
                serde_json::json!({ "bundleTxId": bundle_tx_id, "firstPolledAt": first_polled_at }),
                Some(POLL_INTERVAL),
            )
            .await?;
        return Ok(());
    }

    let bundle = store
        .get_posted_bundle(bundle_tx_id)
        .await?
        .ok_or_else(|| PipelineError::BadPayload(format!("unknown bundle {bundle_tx_id}")))?;
    let plan = store
        .get_bundle_plan(&bundle.plan_id)
        .await?
        .ok_or_else(|| PipelineError::BadPayload(format!("unknown plan {}", bundle.plan_id)))?;

    store.rewind_plan_to_planned(&bundle.plan_id).await?;
    for item_id in &plan.item_ids {
        store.record_item_bundle_failure(item_id, &bundle.plan_id).await?;
    }
    Ok(())
}
