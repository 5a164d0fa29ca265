//! Executable artifact descriptors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::transfer::checksum::ChecksumAlgo;

/// Descriptor of an executable function artifact.
///
/// Immutable once registered; processors cache function bytes by checksum.
/// A `SignedSha256` checksum entry carries `digest###base64(signature)` and
/// must verify against the dispatcher's public key before the function may
/// run on a processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub code: String,
    pub sourcing: FunctionSourcing,
    /// Algorithm -> digest (or digest + signature for signed algorithms).
    pub checksums: BTreeMap<ChecksumAlgo, String>,
}

impl FunctionDescriptor {
    /// The plain content-address digest, preferring the signed entry's
    /// digest half when only a signed checksum is present.
    pub fn content_digest(&self) -> Option<&str> {
        if let Some(digest) = self.checksums.get(&ChecksumAlgo::Sha256) {
            return Some(digest.as_str());
        }
        self.checksums
            .get(&ChecksumAlgo::SignedSha256)
            .map(|v| v.split(crate::constants::SIGNATURE_DELIMITER).next().unwrap_or(v))
    }

    pub fn is_signed(&self) -> bool {
        self.checksums.contains_key(&ChecksumAlgo::SignedSha256)
    }
}

/// Where a function's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionSourcing {
    /// Distributed by the dispatcher; signature-verified on the processor.
    Dispatcher,
    /// Pre-installed on the processor host.
    Processor,
    /// Fetched from a git repository by the processor.
    Git,
}
