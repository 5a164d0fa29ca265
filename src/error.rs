//! Crate-level error type.
//!
//! Each subsystem defines its own `thiserror` enum close to the code that
//! raises it; `ConductorError` is the top-level wrapper used at the service
//! boundaries where errors from several subsystems converge.

use thiserror::Error;

use crate::graph::store::StoreError;
use crate::graph::GraphError;
use crate::production::ProductionError;
use crate::protocol::ParamsVersionError;
use crate::state_machine::StateError;
use crate::transfer::TransferError;

#[derive(Error, Debug)]
pub enum ConductorError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Production(#[from] ProductionError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    ParamsVersion(#[from] ParamsVersionError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Exec context #{0} not found")]
    ExecContextNotFound(i64),

    #[error("Task #{0} not found")]
    TaskNotFound(i64),
}

pub type Result<T> = std::result::Result<T, ConductorError>;
