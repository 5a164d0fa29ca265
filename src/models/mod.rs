//! # Data Model
//!
//! Pipeline templates, running instances, tasks, variables, and function
//! descriptors. These are plain serde documents; all behavior that mutates
//! them lives in the graph engine and dispatcher services.

pub mod exec_context;
pub mod function;
pub mod source_code;
pub mod task;
pub mod task_context;
pub mod variable;

pub use exec_context::{ExecContext, ExecContextId};
pub use function::{FunctionDescriptor, FunctionSourcing};
pub use source_code::{Meta, Process, ProcessLogic, SkipPolicy, SourceCode, VariableDecl};
pub use task::{Task, TaskId, TaskParams, TaskRegistry};
pub use task_context::TaskContextId;
pub use variable::{Variable, VariableId, VariableRegistry, VariableScope, VariableSourcing};

use std::sync::atomic::{AtomicI64, Ordering};

/// Monotonic id source for tasks and variables minted by one dispatcher
/// process. Ascending ids double as the oldest-first fairness order used
/// by task assignment.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicI64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
        }
    }

    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }

    pub fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_ascending() {
        let gen = IdGenerator::new();
        let a = gen.next_id();
        let b = gen.next_id();
        assert!(b > a);
    }
}
