//! Checksum-verified movement of variable payloads.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::checksum::Checksum;
use super::TransferError;
use crate::models::{VariableId, VariableRegistry};

/// One payload in flight: bytes plus declared length and checksum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariablePayload {
    pub variable_id: VariableId,
    pub name: String,
    pub bytes: Vec<u8>,
    pub declared_length: u64,
    pub checksum: Checksum,
}

impl VariablePayload {
    pub fn package(variable_id: VariableId, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let checksum = Checksum::sha256(&bytes);
        Self {
            variable_id,
            name: name.into(),
            declared_length: bytes.len() as u64,
            checksum,
            bytes,
        }
    }

    /// Receiver-side validation: declared length, then checksum.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.bytes.len() as u64 != self.declared_length {
            return Err(TransferError::LengthMismatch {
                declared: self.declared_length,
                received: self.bytes.len() as u64,
            });
        }
        self.checksum.verify(&self.bytes)
    }
}

/// Transport seam: how payloads actually move between the two sides.
#[async_trait]
pub trait PayloadChannel: Send + Sync {
    async fn fetch(&self, variable_id: VariableId) -> Result<VariablePayload, TransferError>;
}

/// Moves task input/output payloads, verifying content addresses on both
/// ends and retrying a bounded number of times before the owning task is
/// failed by the caller.
pub struct VariableTransferService {
    registry: Arc<VariableRegistry>,
    max_retries: u32,
}

impl VariableTransferService {
    pub fn new(registry: Arc<VariableRegistry>, max_retries: u32) -> Self {
        Self {
            registry,
            max_retries,
        }
    }

    /// Dispatcher side: package a stored variable for download.
    pub fn package(&self, variable_id: VariableId) -> Result<VariablePayload, TransferError> {
        let variable = self
            .registry
            .get(variable_id)
            .ok_or(TransferError::PayloadUnavailable(variable_id))?;
        let bytes = self
            .registry
            .payload(variable_id)
            .ok_or(TransferError::PayloadUnavailable(variable_id))?;
        Ok(VariablePayload::package(variable_id, variable.name, bytes))
    }

    /// Dispatcher side: accept an uploaded task output, verify it, store it
    /// and mark the variable inited.
    #[instrument(skip(self, payload), fields(variable_id = payload.variable_id))]
    pub fn accept_upload(&self, payload: VariablePayload) -> Result<(), TransferError> {
        payload.validate()?;
        let mut variable = self
            .registry
            .get(payload.variable_id)
            .ok_or(TransferError::PayloadUnavailable(payload.variable_id))?;
        variable.inited = true;
        variable.nullified = false;
        variable.checksum = Some(payload.checksum.clone());
        self.registry
            .insert_with_payload(variable, payload.bytes);
        debug!("stored uploaded variable payload");
        Ok(())
    }

    /// Processor side: fetch a payload over the channel, re-validating on
    /// receipt; each mismatch or transport failure consumes one retry.
    #[instrument(skip(self, channel))]
    pub async fn fetch_with_retries(
        &self,
        channel: &dyn PayloadChannel,
        variable_id: VariableId,
    ) -> Result<VariablePayload, TransferError> {
        let mut last_error = String::new();
        for attempt in 1..=self.max_retries {
            match channel.fetch(variable_id).await {
                Ok(payload) => match payload.validate() {
                    Ok(()) => return Ok(payload),
                    Err(e) => {
                        warn!(attempt, error = %e, "payload failed validation, retrying");
                        last_error = e.to_string();
                    }
                },
                Err(e) => {
                    warn!(attempt, error = %e, "payload fetch failed, retrying");
                    last_error = e.to_string();
                }
            }
        }
        Err(TransferError::RetriesExhausted {
            attempts: self.max_retries,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskContextId, Variable, VariableScope, VariableSourcing};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn registry_with_variable(id: VariableId) -> Arc<VariableRegistry> {
        let registry = Arc::new(VariableRegistry::new());
        registry.insert_with_payload(
            Variable {
                id,
                name: "items".into(),
                scope: VariableScope::Local {
                    exec_context_id: 1,
                    task_context_id: TaskContextId::root(),
                },
                sourcing: VariableSourcing::Dispatcher,
                inited: true,
                nullified: false,
                checksum: None,
            },
            b"[\"x\",\"y\"]".to_vec(),
        );
        registry
    }

    struct FlakyChannel {
        payload: VariablePayload,
        failures: AtomicU32,
    }

    #[async_trait]
    impl PayloadChannel for FlakyChannel {
        async fn fetch(&self, _variable_id: VariableId) -> Result<VariablePayload, TransferError> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
                let mut corrupted = self.payload.clone();
                corrupted.bytes[0] ^= 0xff;
                return Ok(corrupted);
            }
            Ok(self.payload.clone())
        }
    }

    #[test]
    fn test_package_and_validate() {
        let service = VariableTransferService::new(registry_with_variable(5), 3);
        let payload = service.package(5).unwrap();
        assert!(payload.validate().is_ok());

        let mut tampered = payload.clone();
        tampered.bytes[0] ^= 1;
        assert!(tampered.validate().is_err());
    }

    #[test]
    fn test_accept_upload_rejects_tampered() {
        let registry = registry_with_variable(5);
        let service = VariableTransferService::new(Arc::clone(&registry), 3);
        let mut payload = service.package(5).unwrap();
        payload.bytes.push(0);
        payload.declared_length += 1;
        assert!(matches!(
            service.accept_upload(payload),
            Err(TransferError::ChecksumMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_retries_then_succeeds() {
        let registry = registry_with_variable(5);
        let service = VariableTransferService::new(Arc::clone(&registry), 3);
        let channel = FlakyChannel {
            payload: service.package(5).unwrap(),
            failures: AtomicU32::new(2),
        };
        let payload = service.fetch_with_retries(&channel, 5).await.unwrap();
        assert!(payload.validate().is_ok());
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let registry = registry_with_variable(5);
        let service = VariableTransferService::new(Arc::clone(&registry), 2);
        let channel = FlakyChannel {
            payload: service.package(5).unwrap(),
            failures: AtomicU32::new(10),
        };
        let err = service.fetch_with_retries(&channel, 5).await.unwrap_err();
        assert!(matches!(err, TransferError::RetriesExhausted { attempts: 2, .. }));
    }
}
