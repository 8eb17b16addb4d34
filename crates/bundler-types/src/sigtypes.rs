//! Static signature-type registry keyed by the 2-byte wire code.
//!
//! The bundle header format identifies the signing scheme by a 2-byte code rather than
//! a dynamically dispatched object. Each entry fixes the signature length and public-key
//! length for the scheme (needed to know where the header ends without parsing the
//! signature itself) and supplies a verification function over a pre-computed digest.

use ed25519_dalek::{Signature as EdSignature, Verifier, VerifyingKey};
use k256::ecdsa::signature::Verifier as K256Verifier;
use k256::ecdsa::{Signature as K256Signature, VerifyingKey as K256VerifyingKey};
use rsa::pss::VerifyingKey as RsaPssVerifyingKey;
use rsa::sha2::Sha256;
use rsa::signature::Verifier as RsaVerifier;
use rsa::{BigUint, RsaPublicKey};
use thiserror::Error;

/// A single row of the signature-type table.
#[derive(Debug, Clone, Copy)]
pub struct SignatureType {
    /// The 2-byte wire code identifying this scheme.
    pub code: u16,
    /// Human-readable name, used in logs and error messages.
    pub name: &'static str,
    /// Length in bytes of the signature field in the item header.
    pub signature_len: usize,
    /// Length in bytes of the owner public key field in the item header.
    pub pubkey_len: usize,
    /// Verifies `signature` over `digest` against `pubkey`. `digest` is the deep-hash
    /// of the item's signed fields, not the raw payload.
    pub verify: fn(pubkey: &[u8], digest: &[u8], signature: &[u8]) -> Result<(), VerifyError>,
}

/// Error returned when a signature fails to validate against its claimed scheme.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("public key has unexpected length for this signature type")]
    BadPublicKey,
    #[error("signature has unexpected length for this signature type")]
    BadSignature,
    #[error("signature does not validate against the digest")]
    Invalid,
}

fn verify_rsa_pss_4096(pubkey: &[u8], digest: &[u8], signature: &[u8]) -> Result<(), VerifyError> {
    let n = BigUint::from_bytes_be(pubkey);
    let e = BigUint::from_bytes_be(&[0x01, 0x00, 0x01]);
    let public_key = RsaPublicKey::new(n, e).map_err(|_| VerifyError::BadPublicKey)?;
    let verifying_key = RsaPssVerifyingKey::<Sha256>::new(public_key);
    let signature = rsa::pss::Signature::try_from(signature).map_err(|_| VerifyError::BadSignature)?;
    verifying_key
        .verify(digest, &signature)
        .map_err(|_| VerifyError::Invalid)
}

fn verify_secp256k1(pubkey: &[u8], digest: &[u8], signature: &[u8]) -> Result<(), VerifyError> {
    let verifying_key =
        K256VerifyingKey::from_sec1_bytes(pubkey).map_err(|_| VerifyError::BadPublicKey)?;
    let signature = K256Signature::try_from(signature).map_err(|_| VerifyError::BadSignature)?;
    verifying_key
        .verify(digest, &signature)
        .map_err(|_| VerifyError::Invalid)
}

fn verify_ed25519(pubkey: &[u8], digest: &[u8], signature: &[u8]) -> Result<(), VerifyError> {
    let pubkey: [u8; 32] = pubkey.try_into().map_err(|_| VerifyError::BadPublicKey)?;
    let verifying_key = VerifyingKey::from_bytes(&pubkey).map_err(|_| VerifyError::BadPublicKey)?;
    let signature: [u8; 64] = signature.try_into().map_err(|_| VerifyError::BadSignature)?;
    let signature = EdSignature::from_bytes(&signature);
    verifying_key
        .verify(digest, &signature)
        .map_err(|_| VerifyError::Invalid)
}

/// Built-in signature types, indexed by wire code.
pub const REGISTRY: &[SignatureType] = &[
    SignatureType {
        code: 1,
        name: "rsa-pss-4096",
        signature_len: 512,
        pubkey_len: 512,
        verify: verify_rsa_pss_4096,
    },
    SignatureType {
        code: 3,
        name: "ecdsa-secp256k1",
        signature_len: 65,
        pubkey_len: 65,
        verify: verify_secp256k1,
    },
    SignatureType {
        code: 4,
        name: "ed25519",
        signature_len: 64,
        pubkey_len: 32,
        verify: verify_ed25519,
    },
];

/// Looks up a signature type by its wire code. Returns `None` for codes not present in
/// [`REGISTRY`]; callers surface this as `UnknownSignatureType`.
pub fn lookup(code: u16) -> Option<&'static SignatureType> {
    REGISTRY.iter().find(|row| row.code == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_resolve() {
        assert_eq!(lookup(1).unwrap().name, "rsa-pss-4096");
        assert_eq!(lookup(3).unwrap().name, "ecdsa-secp256k1");
        assert_eq!(lookup(4).unwrap().name, "ed25519");
    }

    #[test]
    fn unknown_code_is_none() {
        assert!(lookup(9999).is_none());
    }

    #[test]
    fn ed25519_roundtrip() {
        use ed25519_dalek::{Signer, SigningKey};
        let mut csprng = rand_core::OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let digest = b"deep-hash-digest-stand-in-32byte";
        let signature = signing_key.sign(digest);
        let row = lookup(4).unwrap();
        (row.verify)(
            signing_key.verifying_key().as_bytes(),
            digest,
            &signature.to_bytes(),
        )
        .unwrap();
    }
}
