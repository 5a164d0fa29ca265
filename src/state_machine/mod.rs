//! # State Machine
//!
//! Task and exec-context lifecycle states with closed transition tables.
//! Illegal transitions are programming errors surfaced as [`StateError`],
//! never silently retried.

pub mod states;
pub mod transitions;

pub use states::{ExecContextState, TaskExecState};
pub use transitions::{check_context_transition, check_task_transition, StateError};
