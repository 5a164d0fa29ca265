//! Detached-signature verification for dispatcher-origin functions.
//!
//! A signed checksum value is `digest###base64(signature)`: the hex SHA-256
//! digest of the artifact, the delimiter, and an ed25519 signature over the
//! digest's bytes. Verification recomputes the digest from the received
//! payload, checks it against the signed entry, then verifies the signature
//! with the dispatcher's known public key.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use super::checksum::Checksum;
use super::TransferError;
use crate::constants::SIGNATURE_DELIMITER;

/// Verifies signed checksum entries against a known public key.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    key: VerifyingKey,
}

impl SignatureVerifier {
    pub fn new(key: VerifyingKey) -> Self {
        Self { key }
    }

    /// Build from a base64-encoded 32-byte ed25519 public key, as carried
    /// in configuration.
    pub fn from_base64(key_b64: &str) -> Result<Self, TransferError> {
        let bytes = BASE64
            .decode(key_b64)
            .map_err(|e| TransferError::SignatureInvalid(format!("bad public key encoding: {e}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TransferError::SignatureInvalid("public key must be 32 bytes".into()))?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| TransferError::SignatureInvalid(format!("bad public key: {e}")))?;
        Ok(Self { key })
    }

    /// Verify a `digest###base64sig` entry against the received payload.
    ///
    /// Both halves must hold: the digest must match the payload bytes, and
    /// the signature must verify over the digest. Either failure is fatal
    /// for the artifact.
    pub fn verify_signed_checksum(&self, value: &str, payload: &[u8]) -> Result<(), TransferError> {
        let (digest, signature_b64) = split_signed_value(value)?;

        let actual = Checksum::sha256(payload);
        if actual.digest != digest {
            return Err(TransferError::ChecksumMismatch {
                expected: digest.to_string(),
                actual: actual.digest,
            });
        }

        let signature_bytes = BASE64
            .decode(signature_b64)
            .map_err(|e| TransferError::SignatureInvalid(format!("bad signature encoding: {e}")))?;
        let signature = Signature::from_slice(&signature_bytes)
            .map_err(|e| TransferError::SignatureInvalid(format!("bad signature length: {e}")))?;

        self.key
            .verify(digest.as_bytes(), &signature)
            .map_err(|e| TransferError::SignatureInvalid(e.to_string()))
    }
}

/// Produce a `digest###base64sig` value for an artifact. Dispatcher side.
pub fn sign_payload(signing_key: &SigningKey, payload: &[u8]) -> String {
    let digest = Checksum::sha256(payload).digest;
    let signature = signing_key.sign(digest.as_bytes());
    format!(
        "{digest}{SIGNATURE_DELIMITER}{}",
        BASE64.encode(signature.to_bytes())
    )
}

fn split_signed_value(value: &str) -> Result<(&str, &str), TransferError> {
    value
        .split_once(SIGNATURE_DELIMITER)
        .filter(|(digest, sig)| !digest.is_empty() && !sig.is_empty())
        .ok_or_else(|| {
            TransferError::SignatureInvalid(format!(
                "signed checksum value is not 'digest{SIGNATURE_DELIMITER}signature'"
            ))
        })
}
