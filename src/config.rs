//! # Configuration
//!
//! YAML-driven configuration with environment overrides. All tunables come
//! from an explicit config file plus `CONDUCTOR_`-prefixed environment
//! variables; components receive their config section by value at
//! construction time, never through globals.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;

/// Top-level configuration for both dispatcher and processor roles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    pub dispatcher: DispatcherConfig,
    pub processor: ProcessorConfig,
    pub store: StoreConfig,
    pub transfer: TransferConfig,
}

/// Dispatcher-side tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Seconds without a heartbeat before a processor is considered gone.
    pub processor_timeout_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            processor_timeout_secs: 90,
        }
    }
}

/// Processor-side tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Interval between keep-alive exchanges, per dispatcher endpoint.
    pub keep_alive_interval_secs: u64,
    /// Dispatcher endpoints this processor reports to.
    pub dispatcher_urls: Vec<String>,
    /// Number of logical execution slots (cores) this processor offers.
    pub cores: usize,
}

impl ProcessorConfig {
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs)
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval_secs: 10,
            dispatcher_urls: Vec::new(),
            cores: 2,
        }
    }
}

/// Storage contract tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Re-read/re-apply attempts after a versioned-replace conflict.
    pub conflict_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            conflict_retries: constants::STORE_CONFLICT_RETRIES,
        }
    }
}

/// Payload/function transfer tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Checksum-mismatch retries before the owning task is failed.
    pub max_retries: u32,
    /// Base64-encoded ed25519 public key for dispatcher-origin functions.
    pub function_public_key: Option<String>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            function_public_key: None,
        }
    }
}

impl ConductorConfig {
    /// Load configuration from an optional YAML file plus environment
    /// overrides (`CONDUCTOR_DISPATCHER__PROCESSOR_TIMEOUT_SECS=120` style).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path.to_path_buf()).format(config::FileFormat::Yaml),
            );
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("CONDUCTOR").separator("__"))
            .build()
            .map_err(|e| ConfigurationError::Load(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| ConfigurationError::Deserialize(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid configuration: {0}")]
    Deserialize(String),
}
