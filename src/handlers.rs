//! HTTP endpoints implemented by the admission service (C7): item upload, status/offset
//! lookups, and x402 price quotes.

use crate::receipt::{self, PaymentResponse, UnsignedReceipt};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bundler_objectstore::{Bucket, ItemMetadata};
use bundler_payments::pricing::PriceSource;
use bundler_queue::Label;
use bundler_store::StoreError;
use bundler_types::item::{DataItem, ItemState};
use bundler_types::timestamp::UnixTimestamp;
use bundler_types::wire;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;
use tracing::instrument;

pub fn routes<S>() -> Router<AppState<S>>
where
    S: PriceSource + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(get_health))
        .route("/v1/info", get(get_info))
        .route("/v1/tx", post(post_tx))
        .route("/v1/tx/{id}/status", get(get_tx_status))
        .route("/v1/tx/{id}/offsets", get(get_tx_offsets))
        .route("/v1/price/x402/data-item/{token}/{byte_count}", get(get_price_data_item))
        .route("/v1/price/x402/data/{token}/{byte_count}", get(get_price_data))
        .route("/v1/x402/price/{sig_type}/{address}", get(get_price_legacy))
}

#[instrument(skip_all)]
pub async fn get_health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[instrument(skip_all)]
pub async fn get_info<S: PriceSource>(State(state): State<AppState<S>>) -> impl IntoResponse {
    let addresses: std::collections::BTreeMap<&str, String> = state.payments.enabled_network_pay_tos().collect();
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "addresses": addresses,
        "gateway": state.config.gateway_url,
        "gateways": [state.config.gateway_url.clone()],
        "freeUploadLimitBytes": state.config.free_upload_limit_bytes,
    }))
}

/// Error kinds surfaced by the admission path (SPEC_FULL.md §7): each maps to exactly one
/// HTTP status, mirroring how the teacher's `FacilitatorLocalError` maps onto responses.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("item exceeds the maximum single-item size")]
    TooLarge,
    #[error("item failed signature verification")]
    InvalidItem,
    #[error("owner is blocklisted")]
    Blocklisted,
    #[error("item matches a known spam pattern")]
    SpamPattern,
    #[error("no durable sink is available")]
    StorageUnavailable,
    #[error("item already received")]
    Duplicate,
    #[error(transparent)]
    Wire(#[from] wire::WireError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] bundler_queue::QueueError),
    #[error(transparent)]
    Objects(#[from] bundler_objectstore::ObjectStoreError),
    #[error(transparent)]
    Payment(#[from] bundler_payments::PaymentEngineError),
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdmissionError::TooLarge => StatusCode::BAD_REQUEST,
            AdmissionError::InvalidItem => StatusCode::BAD_REQUEST,
            AdmissionError::Blocklisted => StatusCode::FORBIDDEN,
            AdmissionError::SpamPattern => StatusCode::FORBIDDEN,
            AdmissionError::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AdmissionError::Duplicate => StatusCode::ACCEPTED,
            AdmissionError::Wire(_) => StatusCode::BAD_REQUEST,
            AdmissionError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AdmissionError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AdmissionError::Objects(_) => StatusCode::SERVICE_UNAVAILABLE,
            AdmissionError::Payment(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// `POST /v1/tx`: accepts a single wire-format data item in the request body, optionally
/// payment-gated via the `X-PAYMENT` header. Implements the twelve-step admission algorithm.
#[instrument(skip_all)]
pub async fn post_tx<S: PriceSource>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    match admit_item(&state, &headers, body).await {
        Ok(response) => response,
        Err(AdmissionError::Duplicate) => (StatusCode::ACCEPTED, Json(json!({ "status": "already received" }))).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn admit_item<S: PriceSource>(
    state: &AppState<S>,
    headers: &HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, AdmissionError> {
    // 1. Content-Length check: `body` is already fully buffered by axum's extractor, so the
    // length is known; reject oversized items before doing any further work.
    if body.len() as u64 > state.config.max_single_item_bytes {
        return Err(AdmissionError::TooLarge);
    }

    // 4. Header decode.
    let header = wire::decode_header(&body)?;
    let item_id = wire::compute_item_id(&header);
    let owner_address = derive_owner_address(&header.owner_pubkey);

    // 2. At-most-once admission.
    if state.in_flight.insert(item_id.clone(), Instant::now()).is_some() {
        return Err(AdmissionError::Duplicate);
    }
    let result = admit_item_inner(state, headers, &body, &header, &item_id, &owner_address).await;
    state.in_flight.remove(&item_id);
    result
}

async fn admit_item_inner<S: PriceSource>(
    state: &AppState<S>,
    headers: &HeaderMap,
    body: &axum::body::Bytes,
    header: &wire::HeaderFields,
    item_id: &str,
    owner_address: &str,
) -> Result<Response, AdmissionError> {
    let byte_count = body.len() as u64;
    let network = "eip155:8453";

    // 5. Payment gate.
    let payment_id = if byte_count <= state.config.free_upload_limit_bytes || state.config.is_allow_listed(owner_address) {
        None
    } else {
        let (_quote, requirements) = state.payments.quote(byte_count, network, item_id).await?;
        match headers.get("X-PAYMENT").and_then(|v| v.to_str().ok()) {
            None => return Ok(payment_required_response(&requirements)),
            Some(x_payment) => match state.payments.verify_and_settle(x_payment, &requirements, byte_count).await {
                Ok(id) => Some(id),
                Err(_) => return Ok(payment_required_response(&requirements)),
            },
        }
    };

    // 3. Streaming split: at least one durable sink (object store) must succeed.
    let key = bundler_objectstore::buckets::raw_data_item_key(item_id);
    state
        .objects
        .put(
            Bucket::Raw,
            &key,
            body.clone(),
            ItemMetadata {
                content_type: header.tags.iter().find(|t| t.name == "Content-Type").map(|t| t.value.clone()),
                payload_data_start: header.payload_data_start,
            },
        )
        .await
        .map_err(|_| AdmissionError::StorageUnavailable)?;

    // 6. Signature verification.
    let payload = &body[header.payload_data_start as usize..];
    if wire::verify_signature(header, payload).is_err() {
        let _ = state.objects.delete(Bucket::Raw, &key).await;
        return Err(AdmissionError::InvalidItem);
    }

    // 7. Size policies (byte-count ceiling already checked above).
    if state.config.is_block_listed(owner_address) {
        return Err(AdmissionError::Blocklisted);
    }
    if state.config.matches_spam_heuristic(byte_count, header.tags.len()) {
        return Err(AdmissionError::SpamPattern);
    }

    // 8. Side channels.
    if state.config.optical_bridge_enabled && !state.config.skips_optical(owner_address) {
        state
            .queue
            .enqueue(
                Label::OpticalPost,
                json!({ "itemId": item_id, "ownerAddress": owner_address, "signatureType": header.signature_type }),
                None,
            )
            .await?;
    }
    if header.tags.iter().any(|t| t.name == "Bundle-Format" && t.value == "binary") {
        state.queue.enqueue(Label::UnbundleNested, json!({ "itemId": item_id }), None).await?;
    }

    // 9. Receipt.
    let deadline_height = current_height_estimate() + state.config.deadline_height_increment;
    let unsigned = UnsignedReceipt::new(item_id.to_string(), 0, deadline_height);
    let signed = receipt::sign(&state.receipt_key, unsigned);

    // 10. Persist + enqueue.
    let item = DataItem {
        id: item_id.to_string(),
        owner_address: owner_address.to_string(),
        signature_type: header.signature_type,
        byte_count,
        payload_content_type: header.tags.iter().find(|t| t.name == "Content-Type").map(|t| t.value.clone()),
        payload_data_start: header.payload_data_start,
        uploaded_at: UnixTimestamp::now(),
        deadline_height,
        assessed_price: 0,
        failed_bundles: Vec::new(),
        premium_feature_type: None,
        tags: header.tags.clone(),
        signature: header.signature.clone(),
        state: ItemState::New,
    };
    state.store.insert_new_item(item).await?;
    state.queue.enqueue(Label::NewItem, json!({ "itemId": item_id }), None).await?;

    // 11. Link payment.
    if let Some(payment_id) = &payment_id {
        state.payments.link_payment(payment_id, item_id).await?;
    }

    // 12. Respond 200 with the signed receipt and the X-Payment-Response header.
    let mut response = Json(signed).into_response();
    if let Some(payment_id) = payment_id {
        let payment_response = PaymentResponse {
            payment_id,
            tx_hash: String::new(),
            network: network.to_string(),
            mode: "payg".to_string(),
        };
        if let Ok(value) = payment_response.encode_base64().parse() {
            response.headers_mut().insert("X-Payment-Response", value);
        }
    }
    Ok(response)
}

fn payment_required_response(requirements: &bundler_payments::PaymentRequirements) -> Response {
    let mut response = (
        StatusCode::PAYMENT_REQUIRED,
        Json(json!({
            "x402Version": 1,
            "accepts": [requirements],
        })),
    )
        .into_response();
    response.headers_mut().insert("X-Payment-Required", "x402-1".parse().unwrap());
    response
}

/// Derives a wallet-style address from the owner's public key the way Arweave derives a
/// wallet address from an RSA public key modulus: base64url (no padding) of its SHA-256
/// digest.
fn derive_owner_address(owner_pubkey: &[u8]) -> String {
    use base64::Engine;
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(owner_pubkey);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

/// Placeholder for the chain gateway's current block height until the gateway HTTP client
/// lands; returns 0 so `deadlineHeight` still reflects `deadlineHeightIncrement` above it.
fn current_height_estimate() -> u64 {
    0
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemStatusResponse {
    status: String,
    bundle_id: Option<String>,
    reason: Option<String>,
}

#[instrument(skip(state))]
pub async fn get_tx_status<S: PriceSource>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AdmissionError> {
    match state.store.get_item_status(&id).await? {
        Some(status) => Ok(Json(ItemStatusResponse {
            status: format!("{:?}", status.state).to_lowercase(),
            bundle_id: status.bundle_id,
            reason: status.failed_reason,
        })
        .into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

#[instrument(skip(state))]
pub async fn get_tx_offsets<S: PriceSource>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AdmissionError> {
    match state.store.get_offset(&id).await? {
        Some(offset) => Ok(Json(json!({
            "itemId": offset.item_id,
            "rootBundleId": offset.root_bundle_id,
            "startOffsetInRoot": offset.start_offset_in_root,
            "rawContentLength": offset.raw_content_length,
            "payloadDataStart": offset.payload_data_start,
            "payloadContentType": offset.payload_content_type,
            "parentItemId": offset.parent_item_id,
            "startOffsetInParentPayload": offset.start_offset_in_parent_payload,
        }))
        .into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

#[derive(Debug, Deserialize)]
pub struct PriceQuery {
    #[serde(default)]
    pub network: Option<String>,
}

#[instrument(skip(state))]
pub async fn get_price_data_item<S: PriceSource>(
    State(state): State<AppState<S>>,
    Path((_token, byte_count)): Path<(String, u64)>,
    Query(query): Query<PriceQuery>,
) -> Result<impl IntoResponse, AdmissionError> {
    let network = query.network.as_deref().unwrap_or("eip155:8453");
    let (quote, requirements) = state.payments.quote(byte_count, network, "data-item").await?;
    Ok(Json(json!({
        "x402Version": 1,
        "payment": requirements,
        "byteCount": quote.byte_count,
        "winstonCost": quote.chain_unit_price.to_string(),
        "usdcAmount": quote.stable_amount.to_string(),
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPriceQuery {
    #[serde(default)]
    pub network: Option<String>,
    /// Number of user tags the caller intends to attach; folded into the wrapped-item
    /// byte-count estimate alongside the bundler's own system tags.
    #[serde(default)]
    pub tags: Option<u32>,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// The bundler's own tags attached to every item it wraps raw data in
/// (`Bundle-Format`/`Bundle-Version`, `Content-Type`, plus app/version bookkeeping tags);
/// folded into the wrapped-item size estimate below.
const WRAPPER_SYSTEM_TAG_COUNT: u32 = 7;

/// Estimates the wire size of an item wrapping `byte_count` raw bytes under a signature-type-1
/// (RSA-PSS 4096, the chain-native scheme) header, folding in the fixed signature/pubkey
/// lengths from [`bundler_types::sigtypes::REGISTRY`], the `decode_tags` wire layout's
/// per-tag `(u32 name_len, name, u32 value_len, value)` overhead, and an assumed 24-byte
/// name / 48-byte value for every system and user tag (actual tags aren't known until upload,
/// so this is an estimate, not a binding calculation).
fn estimate_wrapped_byte_count(byte_count: u64, user_tags: u32, content_type: Option<&str>) -> u64 {
    const ASSUMED_TAG_NAME_LEN: u64 = 24;
    const ASSUMED_TAG_VALUE_LEN: u64 = 48;

    let row = bundler_types::sigtypes::lookup(1).expect("signature type 1 is always registered");
    let header_fixed = 2 + row.signature_len as u64 + row.pubkey_len as u64 + (1 + 32) + (1 + 32) + 16 + 16;

    let tag_count = WRAPPER_SYSTEM_TAG_COUNT as u64 + user_tags as u64;
    let tag_bytes = tag_count * (4 + ASSUMED_TAG_NAME_LEN + 4 + ASSUMED_TAG_VALUE_LEN);
    let content_type_overhead = content_type.map(|c| c.len() as u64).unwrap_or(0);

    header_fixed + tag_bytes + content_type_overhead + byte_count
}

/// `GET /v1/price/x402/data/{token}/{byteCount}`: quotes raw data the bundler will wrap into
/// a signed item on the caller's behalf, so the estimate folds in the wrapper header and
/// system tags on top of the caller's raw byte count.
#[instrument(skip(state))]
pub async fn get_price_data<S: PriceSource>(
    State(state): State<AppState<S>>,
    Path((_token, byte_count)): Path<(String, u64)>,
    Query(query): Query<DataPriceQuery>,
) -> Result<impl IntoResponse, AdmissionError> {
    let network = query.network.as_deref().unwrap_or("eip155:8453");
    let wrapped_byte_count =
        estimate_wrapped_byte_count(byte_count, query.tags.unwrap_or(0), query.content_type.as_deref());
    let (quote, requirements) = state.payments.quote(wrapped_byte_count, network, "data").await?;
    Ok(Json(json!({
        "x402Version": 1,
        "payment": requirements,
        "byteCount": quote.byte_count,
        "winstonCost": quote.chain_unit_price.to_string(),
        "usdcAmount": quote.stable_amount.to_string(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct LegacyPriceQuery {
    pub bytes: u64,
}

/// `GET /v1/x402/price/{sigType}/{address}?bytes=N`: the pre-x402-versioning quote shape,
/// kept for callers that haven't moved to the per-network `data`/`data-item` endpoints —
/// same quote math, but one `accepts` entry per enabled network instead of a single one
/// picked by a `network` query parameter.
#[instrument(skip(state))]
pub async fn get_price_legacy<S: PriceSource>(
    State(state): State<AppState<S>>,
    Path((sig_type, _address)): Path<(u16, String)>,
    Query(query): Query<LegacyPriceQuery>,
) -> Result<impl IntoResponse, AdmissionError> {
    if bundler_types::sigtypes::lookup(sig_type).is_none() {
        return Ok(StatusCode::BAD_REQUEST.into_response());
    }

    let mut accepts = Vec::new();
    let mut last_quote = None;
    for network in state.payments.enabled_networks() {
        let (quote, requirements) = state.payments.quote(query.bytes, network, "legacy").await?;
        accepts.push(requirements);
        last_quote = Some(quote);
    }

    let Some(quote) = last_quote else {
        return Ok(StatusCode::SERVICE_UNAVAILABLE.into_response());
    };
    Ok(Json(json!({
        "x402Version": 1,
        "accepts": accepts,
        "byteCount": quote.byte_count,
        "winstonCost": quote.chain_unit_price.to_string(),
        "usdcAmount": quote.stable_amount.to_string(),
    }))
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_wrapped_byte_count_grows_with_raw_bytes_and_tags() {
        let base = estimate_wrapped_byte_count(1000, 0, None);
        assert!(base > 1000);

        let with_user_tags = estimate_wrapped_byte_count(1000, 5, None);
        assert!(with_user_tags > base);

        let with_content_type = estimate_wrapped_byte_count(1000, 0, Some("application/json"));
        assert!(with_content_type > base);
    }

    #[test]
    fn estimate_wrapped_byte_count_is_deterministic() {
        assert_eq!(estimate_wrapped_byte_count(4096, 3, Some("text/plain")), estimate_wrapped_byte_count(4096, 3, Some("text/plain")));
    }
}
