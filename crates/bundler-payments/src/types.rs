//! Wire types for the HTTP-402 handshake: the `PaymentRequirements` the admission service
//! quotes, and the `X-PAYMENT` envelope a client presents back.

use crate::chain::types::{ChecksummedAddress, decimal_u256};
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// `{scheme: "exact", network, maxAmountRequired, resource, payTo, asset,
/// maxTimeoutSeconds: 3600, extra: {name, version}}` — what the admission service returns
/// in a `402 Payment Required` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    #[serde(with = "decimal_u256")]
    pub max_amount_required: U256,
    pub resource: String,
    pub pay_to: ChecksummedAddress,
    pub asset: ChecksummedAddress,
    pub max_timeout_seconds: u64,
    pub extra: PaymentRequirementsExtra,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequirementsExtra {
    pub name: String,
    pub version: String,
}

impl PaymentRequirements {
    pub const SCHEME_EXACT: &'static str = "exact";
    pub const DEFAULT_MAX_TIMEOUT_SECONDS: u64 = 3600;
}

/// The ERC-3009 `transferWithAuthorization` parameters a client signs off-chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAuthorization {
    pub from: ChecksummedAddress,
    pub to: ChecksummedAddress,
    #[serde(with = "decimal_u256")]
    pub value: U256,
    pub valid_after: u64,
    pub valid_before: u64,
    pub nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactPayload {
    pub signature: String,
    pub authorization: TransferAuthorization,
}

/// The decoded `X-PAYMENT` envelope, base64-encoded JSON on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: u8,
    pub scheme: String,
    pub network: String,
    pub payload: ExactPayload,
}

impl PaymentPayload {
    pub const SUPPORTED_VERSION: u8 = 1;

    pub fn decode_base64(input: &str) -> Result<Self, PaymentDecodeError> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(input)
            .map_err(|_| PaymentDecodeError::InvalidBase64)?;
        serde_json::from_slice(&bytes).map_err(|e| PaymentDecodeError::InvalidJson(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentDecodeError {
    #[error("X-PAYMENT header is not valid base64")]
    InvalidBase64,
    #[error("X-PAYMENT envelope is not valid JSON: {0}")]
    InvalidJson(String),
}

/// The body posted to a facilitator's `/verify` and `/settle` endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorRequest<'a> {
    pub x402_version: u8,
    pub payment_payload: &'a PaymentPayload,
    pub payment_requirements: &'a PaymentRequirements,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default)]
    pub invalid_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettleResponse {
    #[serde(default)]
    pub success: bool,
    /// Some facilitators return `transaction`, others `transactionHash`; both are accepted
    /// by [`SettleResponse::transaction_hash`].
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default, rename = "transactionHash")]
    pub transaction_hash_alt: Option<String>,
}

impl SettleResponse {
    pub fn transaction_hash(&self) -> Option<&str> {
        self.transaction
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.transaction_hash_alt.as_deref().filter(|s| !s.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settle_response_accepts_either_field_name() {
        let a: SettleResponse = serde_json::from_str(r#"{"success":true,"transaction":"0xabc"}"#).unwrap();
        assert_eq!(a.transaction_hash(), Some("0xabc"));
        let b: SettleResponse = serde_json::from_str(r#"{"success":true,"transactionHash":"0xdef"}"#).unwrap();
        assert_eq!(b.transaction_hash(), Some("0xdef"));
        let c: SettleResponse = serde_json::from_str(r#"{"success":false}"#).unwrap();
        assert_eq!(c.transaction_hash(), None);
    }

    #[test]
    fn decode_base64_round_trips_a_payload() {
        let payload = PaymentPayload {
            x402_version: 1,
            scheme: "exact".into(),
            network: "eip155:8453".into(),
            payload: ExactPayload {
                signature: "0xsig".into(),
                authorization: TransferAuthorization {
                    from: "0x0000000000000000000000000000000000000001".parse().unwrap(),
                    to: "0x0000000000000000000000000000000000000002".parse().unwrap(),
                    value: U256::from(1000u64),
                    valid_after: 0,
                    valid_before: 1_000_000,
                    nonce: "0x01".into(),
                },
            },
        };
        let json = serde_json::to_vec(&payload).unwrap();
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&json);
        let decoded = PaymentPayload::decode_base64(&encoded).unwrap();
        assert_eq!(decoded.network, "eip155:8453");
    }
}
