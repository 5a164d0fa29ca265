//! SHA-256 content addressing for transferred payloads.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::TransferError;

/// Checksum algorithm tag. `SignedSha256` entries carry
/// `digest###base64(signature)` instead of a bare digest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumAlgo {
    Sha256,
    SignedSha256,
}

impl fmt::Display for ChecksumAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::SignedSha256 => write!(f, "signed_sha256"),
        }
    }
}

/// Algorithm tag plus hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub algo: ChecksumAlgo,
    pub digest: String,
}

impl Checksum {
    /// Compute the SHA-256 checksum of a payload.
    pub fn sha256(payload: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(payload);
        Self {
            algo: ChecksumAlgo::Sha256,
            digest: format!("{:x}", hasher.finalize()),
        }
    }

    /// Recompute over `payload` and compare against this checksum.
    pub fn verify(&self, payload: &[u8]) -> Result<(), TransferError> {
        let actual = Self::sha256(payload);
        if actual.digest == self.digest {
            Ok(())
        } else {
            Err(TransferError::ChecksumMismatch {
                expected: self.digest.clone(),
                actual: actual.digest,
            })
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algo, self.digest)
    }
}
