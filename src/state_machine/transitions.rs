//! Closed transition tables for task and exec-context states.

use thiserror::Error;

use super::states::{ExecContextState, TaskExecState};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Illegal task state transition {from} -> {to} for task #{task_id}")]
    IllegalTransition {
        task_id: i64,
        from: TaskExecState,
        to: TaskExecState,
    },

    #[error("Illegal exec context transition {from} -> {to} for context #{exec_context_id}")]
    IllegalContextTransition {
        exec_context_id: i64,
        from: ExecContextState,
        to: ExecContextState,
    },

    #[error("Task #{0} is not tracked in the state table")]
    UnknownTask(i64),
}

/// Validate a task state transition.
///
/// The permitted moves are `None -> InProgress -> {Ok | Error | Broken}`,
/// plus `Error -> None` (retry reset, bounded by the retry policy) and
/// `Error -> Broken` (retries exhausted). `None -> Broken` is allowed for
/// tasks whose production fails before they ever start.
pub fn check_task_transition(
    task_id: i64,
    from: TaskExecState,
    to: TaskExecState,
) -> Result<(), StateError> {
    use TaskExecState::*;
    let legal = matches!(
        (from, to),
        (None, InProgress)
            | (None, Broken)
            | (InProgress, Ok)
            | (InProgress, Error)
            | (InProgress, Broken)
            | (Error, None)
            | (Error, Broken)
    );
    if legal {
        return std::result::Result::Ok(());
    }
    Err(StateError::IllegalTransition { task_id, from, to })
}

/// Validate an exec-context lifecycle transition.
pub fn check_context_transition(
    exec_context_id: i64,
    from: ExecContextState,
    to: ExecContextState,
) -> Result<(), StateError> {
    use ExecContextState::*;
    let legal = matches!(
        (from, to),
        (None, Producing)
            | (Producing, Produced)
            | (Producing, Error)
            | (Produced, Started)
            | (Started, Stopped)
            | (Stopped, Started)
            | (Started, Finished)
            | (Started, Error)
            | (Stopped, Finished)
            | (Stopped, Error)
    );
    if legal {
        return Ok(());
    }
    Err(StateError::IllegalContextTransition {
        exec_context_id,
        from,
        to,
    })
}
