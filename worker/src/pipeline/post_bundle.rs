//! `post-bundle(planId)`: wraps a prepared bundle in a chain transaction signed with the
//! service wallet and uploads it through the chain gateway's chunk endpoint.

use std::sync::Arc;

use base64::Engine;
use bundler_queue::{Label, QueueBroker};
use bundler_store::MetadataStore;
use ed25519_dalek::{Signature, Signer, SigningKey};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::pipeline::{PipelineError, payload_str, prepare_bundle};

/// Delay before `verify-bundle` starts polling for confirmation, giving the gateway time to
/// accept and gossip the transaction.
pub const VERIFY_DELAY: std::time::Duration = std::time::Duration::from_secs(30);

pub async fn run(
    payload: &serde_json::Value,
    store: &Arc<dyn MetadataStore>,
    queue: &Arc<dyn QueueBroker>,
    http: &reqwest::Client,
    wallet: &SigningKey,
    config: &Config,
) -> Result<(), PipelineError> {
    let plan_id = payload_str(payload, "planId")?.to_string();
    let bundle_path = prepare_bundle::spool_path(config, &plan_id);
    let bundle_bytes = tokio::fs::read(&bundle_path).await?;

    let bundle_tx_id = sign_transaction_id(wallet, &bundle_bytes);

    let response = http
        .post(format!("{}/chunk", config.gateway_url))
        .header("x-bundle-tx-id", &bundle_tx_id)
        .body(bundle_bytes)
        .send()
        .await
        .map_err(|e| PipelineError::Gateway(e.to_string()))?;
    if !response.status().is_success() {
        return Err(PipelineError::Gateway(format!("chunk upload rejected with status {}", response.status())));
    }

    store.mark_posted(&plan_id, &bundle_tx_id).await?;
    queue
        .enqueue(Label::VerifyBundle, serde_json::json!({ "bundleTxId": bundle_tx_id }), Some(VERIFY_DELAY))
        .await?;
    Ok(())
}

/// Derives the posted transaction's id by signing the bundle payload's digest with the
/// service wallet, then hashing signature + payload digest the same way a data item's own id
/// is derived from its signature bytes.
fn sign_transaction_id(wallet: &SigningKey, bundle_bytes: &[u8]) -> String {
    let payload_digest = Sha256::digest(bundle_bytes);
    let signature: Signature = wallet.sign(&payload_digest);
    let id_digest = Sha256::digest(signature.to_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(id_digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_is_deterministic_for_the_same_wallet_and_bytes() {
        let wallet = SigningKey::from_bytes(&[7u8; 32]);
        let id1 = sign_transaction_id(&wallet, b"bundle-bytes");
        let id2 = sign_transaction_id(&wallet, b"bundle-bytes");
        assert_eq!(id1, id2);
    }

    #[test]
    fn transaction_id_differs_across_wallets() {
        let wallet_a = SigningKey::from_bytes(&[7u8; 32]);
        let wallet_b = SigningKey::from_bytes(&[9u8; 32]);
        assert_ne!(sign_transaction_id(&wallet_a, b"bundle-bytes"), sign_transaction_id(&wallet_b, b"bundle-bytes"));
    }
}
