//! # Transfer Services
//!
//! Content-addressed movement of variable payloads and executable function
//! artifacts between dispatcher and processor. The sender computes a
//! checksum, the receiver recomputes it on receipt and rejects mismatches;
//! dispatcher-origin functions additionally carry a detached signature that
//! must verify before the function may execute.

pub mod checksum;
pub mod function_distribution;
pub mod signature;
pub mod variable_transfer;

pub use checksum::{Checksum, ChecksumAlgo};
pub use function_distribution::{FunctionRepository, ProcessorFunctionCache};
pub use signature::SignatureVerifier;
pub use variable_transfer::{PayloadChannel, VariablePayload, VariableTransferService};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Declared length {declared} does not match received {received} bytes")]
    LengthMismatch { declared: u64, received: u64 },

    #[error("Function '{0}' requires a signature but none was supplied")]
    SignatureMissing(String),

    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("Transfer failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Variable #{0} has no payload available")]
    PayloadUnavailable(i64),

    #[error("Function '{0}' is not registered")]
    FunctionNotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),
}
