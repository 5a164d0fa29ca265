//! # Task Production
//!
//! Expansion of `Process` templates into concrete tasks and graph edges:
//! static production of declared sub-processes, and dynamic fan-out where a
//! permute process clones its sub-graph once per computed variant
//! combination and splices every branch tail into the pre-recorded
//! descendant set with a single edge-set insertion.

pub mod engine;
pub mod inline_variants;
pub mod internal_functions;

pub use engine::TaskProductionEngine;
pub use inline_variants::{all_inline_variants, cartesian_combinations, parse_variants};
pub use internal_functions::{InternalFunction, InternalFunctionContext, InternalFunctionRegistry};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProductionError {
    #[error("Process '{0}' not found in source code")]
    ProcessNotFound(String),

    #[error("Meta '{key}' must be defined for process '{process}'")]
    MetaNotFound { process: String, key: String },

    #[error("Variable '{name}' not found in local or global scope, task context {task_context_id}")]
    VariableNotFound {
        name: String,
        task_context_id: String,
    },

    #[error("Inline group '{0}' not found or empty")]
    InlineNotFound(String),

    #[error("Process '{0}' has no sub-processes to expand")]
    NoSubProcesses(String),

    #[error("Variant spec '{spec}' is malformed: {reason}")]
    BrokenVariantSpec { spec: String, reason: String },

    #[error("Too many variants for spec '{spec}': {count} exceeds the cap")]
    TooManyVariants { spec: String, count: usize },

    #[error("Permutation produced no variant combinations")]
    NoVariants,

    #[error("Variable '{0}' has no payload to permute over")]
    VariablePayloadMissing(String),
}
