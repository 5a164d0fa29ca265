//! Concrete units of work and their dispatcher-side registry.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::exec_context::ExecContextId;
use super::task_context::TaskContextId;
use super::variable::{VariableId, VariableSourcing};

pub type TaskId = i64;

/// A concrete unit of work produced from a [`Process`](crate::models::Process).
///
/// Execution state lives in the task-state table, not here; after creation
/// the only permitted mutation of a task is through that table. Completed
/// tasks are never physically removed while their exec context exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub exec_context_id: ExecContextId,
    pub process_code: String,
    pub task_context_id: TaskContextId,
    pub params: TaskParams,
}

/// The in-memory shape of a task's parameters document.
///
/// On the wire this is carried as a versioned serialized blob; see
/// [`crate::protocol::params_version`] for the decode/upgrade chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskParams {
    pub function_code: String,
    #[serde(default)]
    pub inputs: Vec<VariableRef>,
    #[serde(default)]
    pub outputs: Vec<VariableRef>,
    pub tries_after_error: u32,
    /// Whether the worker must start from a clean working directory.
    #[serde(default)]
    pub clean_work_dir: bool,
}

/// Reference to a variable as carried inside task params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRef {
    pub id: VariableId,
    pub name: String,
    pub sourcing: VariableSourcing,
}

/// Dispatcher-side registry of produced tasks, keyed by task id.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: DashMap<TaskId, Task>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task: Task) {
        self.tasks.insert(task.id, task);
    }

    pub fn get(&self, task_id: TaskId) -> Option<Task> {
        self.tasks.get(&task_id).map(|t| t.clone())
    }

    pub fn remove(&self, task_id: TaskId) -> Option<Task> {
        self.tasks.remove(&task_id).map(|(_, t)| t)
    }

    /// Remove every task belonging to a deleted exec context.
    pub fn remove_context(&self, exec_context_id: ExecContextId) {
        self.tasks
            .retain(|_, task| task.exec_context_id != exec_context_id);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
