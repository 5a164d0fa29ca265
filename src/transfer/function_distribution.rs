//! Distribution of executable function artifacts.
//!
//! The dispatcher keeps a repository of function descriptors and bytes;
//! processors report which digests they already hold in each keep-alive,
//! receive descriptors for the rest as sync deltas, download the bytes and
//! install them into a checksum-keyed cache. A dispatcher-origin function
//! whose descriptor carries a signed checksum is never executed until the
//! signature verifies.

use dashmap::DashMap;
use tracing::{debug, instrument, warn};

use super::checksum::{Checksum, ChecksumAlgo};
use super::signature::SignatureVerifier;
use super::TransferError;
use crate::models::{FunctionDescriptor, FunctionSourcing};

/// Dispatcher-side registry of distributable functions.
#[derive(Debug, Default)]
pub struct FunctionRepository {
    functions: DashMap<String, (FunctionDescriptor, Vec<u8>)>,
}

impl FunctionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: FunctionDescriptor, bytes: Vec<u8>) {
        self.functions
            .insert(descriptor.code.clone(), (descriptor, bytes));
    }

    pub fn descriptor(&self, code: &str) -> Option<FunctionDescriptor> {
        self.functions.get(code).map(|entry| entry.0.clone())
    }

    pub fn bytes(&self, code: &str) -> Result<Vec<u8>, TransferError> {
        self.functions
            .get(code)
            .map(|entry| entry.1.clone())
            .ok_or_else(|| TransferError::FunctionNotFound(code.to_string()))
    }

    /// Descriptors the processor is missing, given the digests it reported.
    pub fn sync_deltas(&self, held_digests: &[String]) -> Vec<FunctionDescriptor> {
        self.functions
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .0
                    .content_digest()
                    .is_none_or(|digest| !held_digests.iter().any(|d| d == digest))
            })
            .map(|entry| entry.value().0.clone())
            .collect()
    }
}

/// Processor-side cache of verified function artifacts, keyed by digest.
#[derive(Debug, Default)]
pub struct ProcessorFunctionCache {
    verified: DashMap<String, Vec<u8>>,
}

impl ProcessorFunctionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify and install downloaded function bytes.
    ///
    /// Dispatcher-origin functions must pass signature verification when a
    /// signed checksum is present; if the descriptor carries only a plain
    /// checksum but the processor is configured to require signatures, the
    /// install is refused. Plain-checksum functions verify content only.
    #[instrument(skip(self, bytes, verifier), fields(code = %descriptor.code))]
    pub fn install(
        &self,
        descriptor: &FunctionDescriptor,
        bytes: Vec<u8>,
        verifier: Option<&SignatureVerifier>,
    ) -> Result<(), TransferError> {
        if descriptor.sourcing == FunctionSourcing::Dispatcher {
            match (descriptor.checksums.get(&ChecksumAlgo::SignedSha256), verifier) {
                (Some(signed_value), Some(verifier)) => {
                    verifier.verify_signed_checksum(signed_value, &bytes)?;
                }
                (Some(_), None) | (None, Some(_)) => {
                    warn!("refusing unsigned install of dispatcher-origin function");
                    return Err(TransferError::SignatureMissing(descriptor.code.clone()));
                }
                (None, None) => {}
            }
        }

        let digest = descriptor
            .content_digest()
            .ok_or_else(|| TransferError::FunctionNotFound(descriptor.code.clone()))?;
        let checksum = Checksum {
            algo: ChecksumAlgo::Sha256,
            digest: digest.to_string(),
        };
        checksum.verify(&bytes)?;

        debug!(digest, "function artifact verified and cached");
        self.verified.insert(digest.to_string(), bytes);
        Ok(())
    }

    /// Cached bytes for a digest; present only if verification succeeded.
    pub fn get(&self, digest: &str) -> Option<Vec<u8>> {
        self.verified.get(digest).map(|b| b.clone())
    }

    pub fn held_digests(&self) -> Vec<String> {
        self.verified.iter().map(|e| e.key().clone()).collect()
    }

    pub fn is_executable(&self, digest: &str) -> bool {
        self.verified.contains_key(digest)
    }
}
