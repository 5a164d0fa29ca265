//! # System Constants
//!
//! Internal function codes, protocol constants, and operational boundaries
//! shared between the dispatcher and processor sides of the engine.

/// Codes for dispatcher-internal functions, dispatched through the closed
/// registry in [`crate::production::internal_functions`].
pub mod internal_functions {
    /// Permutes inline variable variants into N sibling sub-graphs.
    pub const PERMUTE_INLINES: &str = "mh.permute-inlines";
    /// Aggregates the outputs of sibling branches into a single variable.
    pub const AGGREGATE: &str = "mh.aggregate";
}

/// Meta keys recognized on `Process` definitions.
pub mod metas {
    /// Comma-separated variable names an internal function operates on.
    pub const VARIABLES: &str = "variables";
    /// Marks a process as permuting inline variants.
    pub const PERMUTE_INLINE: &str = "permute-inline";
    /// Selects which inline group supplies the variant map.
    pub const INLINE_KEY: &str = "inline-key";
    /// Name of the variable a permutation branch writes its combination to.
    pub const OUTPUT_VARIABLE: &str = "output-variable";
    /// Capability code a worker core must declare to run this process.
    pub const REQUIRED_CAPABILITY: &str = "required-capability";
}

/// Delimiter between digest and base64 signature in a signed checksum value.
pub const SIGNATURE_DELIMITER: &str = "###";

/// Separator between components of a hierarchical task-context id.
pub const CONTEXT_SEPARATOR: char = '.';

/// Task-context id of the root of every execution graph.
pub const ROOT_CONTEXT_ID: &str = "#1";

/// Upper bound on variants a single inline key may expand to.
pub const MAX_VARIANTS_PER_KEY: usize = 100;

/// How many times a conflicted store replace is retried with a fresh read.
pub const STORE_CONFLICT_RETRIES: u32 = 3;

/// Current version tag of the task-params wire document.
pub const TASK_PARAMS_VERSION: u32 = 2;
