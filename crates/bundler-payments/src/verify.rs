//! Local preconditions for an x402 `exact` payment and the two signature-verification paths:
//! EOA recovery and ERC-1271 smart-wallet `isValidSignature`.

use crate::chain::types::Eip155ChainReference;
use crate::types::{PaymentPayload, PaymentRequirements};
use alloy_primitives::{Address, Signature, U256};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_sol_types::{SolStruct, eip712_domain, sol};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Grace window applied to `validBefore` so a payment that would expire mid-settlement is
/// rejected up front rather than failing at the facilitator.
const EXPIRY_GRACE_SECONDS: u64 = 6;

sol! {
    /// `TransferWithAuthorization` as signed by the payer, matching ERC-3009's EIP-712
    /// typed-data layout used by `exact`-scheme stable-coins.
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

sol! {
    #[sol(rpc)]
    interface IERC1271 {
        function isValidSignature(bytes32 hash, bytes calldata signature) external view returns (bytes4 magicValue);
    }
}

/// Magic value an ERC-1271 contract wallet returns for a signature it accepts.
const ERC1271_MAGIC_VALUE: [u8; 4] = [0x16, 0x26, 0xba, 0x7e];

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("unsupported x402 version {0}")]
    UnsupportedVersion(u8),
    #[error("payment scheme {0} does not match requirements scheme {1}")]
    SchemeMismatch(String, String),
    #[error("payment network {0} does not match requirements network {1}")]
    NetworkMismatch(String, String),
    #[error("payment value is less than the required amount")]
    AmountInsufficient,
    #[error("authorization recipient does not match payTo")]
    RecipientMismatch,
    #[error("authorization has already expired or expires too soon to settle")]
    Expired,
    #[error("authorization is not valid yet")]
    NotYetValid,
    #[error("invalid chain reference: {0}")]
    InvalidChain(#[from] crate::chain::types::Eip155ChainReferenceFormatError),
    #[error("malformed nonce: {0}")]
    MalformedNonce(String),
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
    #[error("signature does not match the authorized sender")]
    SignatureInvalid,
    #[error("contract-wallet verification RPC call failed: {0}")]
    Rpc(String),
}

/// Runs the cheap, entirely local checks (version/scheme/network/amount/recipient/time
/// window) that don't require a signature or RPC call. Call before [`verify_signature`].
pub fn check_preconditions(
    payload: &PaymentPayload,
    requirements: &PaymentRequirements,
) -> Result<(), VerificationError> {
    if payload.x402_version != PaymentPayload::SUPPORTED_VERSION {
        return Err(VerificationError::UnsupportedVersion(payload.x402_version));
    }
    if payload.scheme != requirements.scheme {
        return Err(VerificationError::SchemeMismatch(
            payload.scheme.clone(),
            requirements.scheme.clone(),
        ));
    }
    if payload.network != requirements.network {
        return Err(VerificationError::NetworkMismatch(
            payload.network.clone(),
            requirements.network.clone(),
        ));
    }
    let authorization = &payload.payload.authorization;
    if authorization.value < requirements.max_amount_required {
        return Err(VerificationError::AmountInsufficient);
    }
    if authorization.to != requirements.pay_to {
        return Err(VerificationError::RecipientMismatch);
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    if authorization.valid_before < now + EXPIRY_GRACE_SECONDS {
        return Err(VerificationError::Expired);
    }
    if authorization.valid_after > now {
        return Err(VerificationError::NotYetValid);
    }
    Ok(())
}

/// Computes the EIP-712 signing hash for the authorization's `TransferWithAuthorization`
/// struct under the token's domain.
fn signing_hash(
    payload: &PaymentPayload,
    requirements: &PaymentRequirements,
) -> Result<[u8; 32], VerificationError> {
    let authorization = &payload.payload.authorization;
    let chain = Eip155ChainReference::from_str(&requirements.network)?;
    let nonce = parse_nonce(&authorization.nonce)?;
    let transfer = TransferWithAuthorization {
        from: authorization.from.into(),
        to: authorization.to.into(),
        value: authorization.value,
        validAfter: U256::from(authorization.valid_after),
        validBefore: U256::from(authorization.valid_before),
        nonce: nonce.into(),
    };
    let domain = eip712_domain! {
        name: requirements.extra.name.clone(),
        version: requirements.extra.version.clone(),
        chain_id: chain.inner(),
        verifying_contract: requirements.asset.into(),
    };
    Ok(*transfer.eip712_signing_hash(&domain))
}

fn parse_nonce(s: &str) -> Result<[u8; 32], VerificationError> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    let bytes =
        hex::decode(stripped).map_err(|e| VerificationError::MalformedNonce(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| VerificationError::MalformedNonce(s.to_string()))
}

fn parse_signature(s: &str) -> Result<Vec<u8>, VerificationError> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(stripped).map_err(|e| VerificationError::MalformedSignature(e.to_string()))
}

/// Verifies the authorization's signature, trying the EOA recovery path first and falling
/// back to an ERC-1271 `isValidSignature` RPC call against the `from` address when the
/// recovered signer doesn't match (i.e. `from` is a smart-contract wallet).
pub async fn verify_signature(
    payload: &PaymentPayload,
    requirements: &PaymentRequirements,
    rpc_url: &str,
) -> Result<(), VerificationError> {
    let hash = signing_hash(payload, requirements)?;
    let raw_signature = parse_signature(&payload.payload.signature)?;
    let from: Address = payload.payload.authorization.from.into();

    if let Some(signature) = decode_eoa_signature(&raw_signature) {
        if let Ok(recovered) = signature.recover_address_from_prehash(&hash.into()) {
            if recovered == from {
                return Ok(());
            }
        }
    }

    verify_erc1271(from, hash, &raw_signature, rpc_url).await
}

fn decode_eoa_signature(bytes: &[u8]) -> Option<Signature> {
    match bytes.len() {
        65 => Signature::from_raw(bytes).ok(),
        64 => Some(Signature::from_erc2098(bytes)),
        _ => None,
    }
}

async fn verify_erc1271(
    from: Address,
    hash: [u8; 32],
    raw_signature: &[u8],
    rpc_url: &str,
) -> Result<(), VerificationError> {
    let url = rpc_url.parse().map_err(|e| VerificationError::Rpc(format!("{e}")))?;
    let provider = ProviderBuilder::new().connect_http(url);
    let contract = IERC1271::new(from, &provider);
    let result = contract
        .isValidSignature(hash.into(), raw_signature.to_vec().into())
        .call()
        .await
        .map_err(|e| VerificationError::Rpc(e.to_string()))?;
    if result.0 == ERC1271_MAGIC_VALUE {
        Ok(())
    } else {
        Err(VerificationError::SignatureInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExactPayload, PaymentRequirementsExtra, TransferAuthorization};

    fn requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact".into(),
            network: "eip155:8453".into(),
            max_amount_required: U256::from(1_000_000u64),
            resource: "ar://abc".into(),
            pay_to: "0x0000000000000000000000000000000000000002".parse().unwrap(),
            asset: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".parse().unwrap(),
            max_timeout_seconds: 3600,
            extra: PaymentRequirementsExtra {
                name: "USD Coin".into(),
                version: "2".into(),
            },
        }
    }

    fn payload_with(value: U256, valid_before: u64) -> PaymentPayload {
        PaymentPayload {
            x402_version: 1,
            scheme: "exact".into(),
            network: "eip155:8453".into(),
            payload: ExactPayload {
                signature: "0x00".into(),
                authorization: TransferAuthorization {
                    from: "0x0000000000000000000000000000000000000001".parse().unwrap(),
                    to: "0x0000000000000000000000000000000000000002".parse().unwrap(),
                    value,
                    valid_after: 0,
                    valid_before,
                    nonce: "0x01".into(),
                },
            },
        }
    }

    #[test]
    fn rejects_insufficient_amount() {
        let req = requirements();
        let payload = payload_with(U256::from(1u64), 9_999_999_999);
        assert!(matches!(
            check_preconditions(&payload, &req),
            Err(VerificationError::AmountInsufficient)
        ));
    }

    #[test]
    fn rejects_expired_authorization() {
        let req = requirements();
        let payload = payload_with(U256::from(1_000_000u64), 1);
        assert!(matches!(
            check_preconditions(&payload, &req),
            Err(VerificationError::Expired)
        ));
    }

    #[test]
    fn accepts_a_well_formed_authorization() {
        let req = requirements();
        let payload = payload_with(U256::from(1_000_000u64), 9_999_999_999);
        assert!(check_preconditions(&payload, &req).is_ok());
    }

    #[test]
    fn signing_hash_is_stable_for_identical_inputs() {
        let req = requirements();
        let payload = payload_with(U256::from(1_000_000u64), 9_999_999_999);
        let a = signing_hash(&payload, &req).unwrap();
        let b = signing_hash(&payload, &req).unwrap();
        assert_eq!(a, b);
    }
}
