//! Per-context table of task execution states and retry counts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::TaskId;
use crate::state_machine::{check_task_transition, StateError, TaskExecState};

use super::execution_graph::ExecutionGraph;

/// Execution state and retry bookkeeping for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStateRow {
    pub state: TaskExecState,
    pub tries_made: u32,
    pub tries_after_error: u32,
    /// Human-readable failure message attached to the task.
    #[serde(default)]
    pub error: Option<String>,
}

impl TaskStateRow {
    pub fn retries_remaining(&self) -> bool {
        self.tries_made < self.tries_after_error
    }
}

/// Where one run stands as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Some task is running, retryable, or still ready to be offered.
    InProgress,
    /// Every task completed successfully.
    FinishedOk,
    /// No further progress is possible and at least one branch is broken.
    FinishedWithErrors,
}

/// Task id -> execution state, persisted as one document per exec context
/// and mutated read-modify-write-replace under the task-state lock.
///
/// Readiness is always evaluated against this committed snapshot while the
/// lock is held, which rules out stale-read races between concurrent
/// completion reports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskStateTable {
    rows: BTreeMap<TaskId, TaskStateRow>,
}

impl TaskStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly produced task in state `None`.
    pub fn register(&mut self, task_id: TaskId, tries_after_error: u32) {
        self.rows.insert(
            task_id,
            TaskStateRow {
                state: TaskExecState::None,
                tries_made: 0,
                tries_after_error,
                error: None,
            },
        );
    }

    pub fn get(&self, task_id: TaskId) -> Option<&TaskStateRow> {
        self.rows.get(&task_id)
    }

    pub fn state(&self, task_id: TaskId) -> Result<TaskExecState, StateError> {
        self.rows
            .get(&task_id)
            .map(|r| r.state)
            .ok_or(StateError::UnknownTask(task_id))
    }

    /// Apply a state transition. An illegal transition is a programming
    /// error and is surfaced as [`StateError`], never retried.
    pub fn set_state(&mut self, task_id: TaskId, new_state: TaskExecState) -> Result<(), StateError> {
        let row = self
            .rows
            .get_mut(&task_id)
            .ok_or(StateError::UnknownTask(task_id))?;
        check_task_transition(task_id, row.state, new_state)?;
        row.state = new_state;
        Ok(())
    }

    pub fn set_error(&mut self, task_id: TaskId, message: impl Into<String>) -> Result<(), StateError> {
        let row = self
            .rows
            .get_mut(&task_id)
            .ok_or(StateError::UnknownTask(task_id))?;
        row.error = Some(message.into());
        Ok(())
    }

    pub fn increment_tries(&mut self, task_id: TaskId) -> Result<u32, StateError> {
        let row = self
            .rows
            .get_mut(&task_id)
            .ok_or(StateError::UnknownTask(task_id))?;
        row.tries_made += 1;
        Ok(row.tries_made)
    }

    pub fn remove(&mut self, task_id: TaskId) {
        self.rows.remove(&task_id);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// A task is ready when it is in state `None` and every direct
    /// ancestor's state is a terminal success.
    pub fn is_ready(&self, graph: &ExecutionGraph, task_id: TaskId) -> Result<bool, StateError> {
        let row = self.rows.get(&task_id).ok_or(StateError::UnknownTask(task_id))?;
        if row.state != TaskExecState::None {
            return Ok(false);
        }
        let ancestors = graph
            .find_direct_ancestors(task_id)
            .map_err(|_| StateError::UnknownTask(task_id))?;
        for ancestor in ancestors {
            match self.rows.get(&ancestor.task_id) {
                Some(r) if r.state.satisfies_dependencies() => {}
                Some(_) => return Ok(false),
                // vertex without a row violates the graph/table invariant
                None => return Err(StateError::UnknownTask(ancestor.task_id)),
            }
        }
        Ok(true)
    }

    /// Ready task ids in ascending order (oldest-first fairness).
    pub fn ready_task_ids(&self, graph: &ExecutionGraph) -> Vec<TaskId> {
        self.rows
            .keys()
            .copied()
            .filter(|&id| self.is_ready(graph, id).unwrap_or(false))
            .collect()
    }

    pub fn all_terminal(&self) -> bool {
        self.rows.values().all(|r| r.state.is_terminal())
    }

    /// Derive whole-run status against the graph snapshot.
    pub fn run_status(&self, graph: &ExecutionGraph) -> RunStatus {
        let any_live = self.rows.values().any(|r| {
            r.state == TaskExecState::InProgress
                || (r.state == TaskExecState::Error && r.retries_remaining())
        });
        if any_live || !self.ready_task_ids(graph).is_empty() {
            return RunStatus::InProgress;
        }
        if self.rows.values().all(|r| r.state == TaskExecState::Ok) {
            RunStatus::FinishedOk
        } else {
            RunStatus::FinishedWithErrors
        }
    }
}
