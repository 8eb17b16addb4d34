//! The signed receipt handed back to a client on successful admission (step 9 of the
//! admission algorithm), and the `X-Payment-Response` header accompanying it.

use bundler_types::timestamp::UnixTimestamp;
use ed25519_dalek::{Signature, Signer, SigningKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedReceipt {
    pub id: String,
    pub timestamp: UnixTimestamp,
    pub chain_unit_price: u128,
    pub version: &'static str,
    pub deadline_height: u64,
    pub data_caches: Vec<String>,
    pub fast_finality_indexes: Vec<String>,
}

impl UnsignedReceipt {
    const VERSION: &'static str = "1.0.0";

    pub fn new(id: String, chain_unit_price: u128, deadline_height: u64) -> Self {
        Self {
            id,
            timestamp: UnixTimestamp::now(),
            chain_unit_price,
            version: Self::VERSION,
            deadline_height,
            data_caches: Vec::new(),
            fast_finality_indexes: Vec::new(),
        }
    }

    fn signing_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("receipt fields always serialize")
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedReceipt {
    #[serde(flatten)]
    pub unsigned: UnsignedReceipt,
    pub signature: String,
    pub public_key: String,
}

/// Signs `receipt` with the service's Ed25519 wallet, matching signature-type code 4 in the
/// wire format's registry so a receipt can itself be verified the same way a submitted item
/// is.
pub fn sign(key: &SigningKey, receipt: UnsignedReceipt) -> SignedReceipt {
    let digest = receipt.signing_bytes();
    let signature: Signature = key.sign(&digest);
    SignedReceipt {
        unsigned: receipt,
        signature: hex::encode(signature.to_bytes()),
        public_key: hex::encode(key.verifying_key().to_bytes()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub payment_id: String,
    pub tx_hash: String,
    pub network: String,
    pub mode: String,
}

impl PaymentResponse {
    pub fn encode_base64(&self) -> String {
        use base64::Engine;
        let json = serde_json::to_vec(self).expect("payment response fields always serialize");
        base64::engine::general_purpose::STANDARD.encode(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Verifier;

    #[test]
    fn signature_verifies_against_the_embedded_public_key() {
        let mut csprng = rand_core::OsRng;
        let key = SigningKey::generate(&mut csprng);
        let receipt = UnsignedReceipt::new("item-1".into(), 1000, 200);
        let signed = sign(&key, receipt);

        let verifying_key = key.verifying_key();
        let sig_bytes = hex::decode(&signed.signature).unwrap();
        let signature = Signature::from_slice(&sig_bytes).unwrap();
        assert!(verifying_key.verify_strict(&signed.unsigned.signing_bytes(), &signature).is_ok());
    }
}
