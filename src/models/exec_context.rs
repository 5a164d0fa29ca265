//! Running pipeline instances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::state_machine::ExecContextState;

pub type ExecContextId = i64;

/// One running instance of a [`SourceCode`](crate::models::SourceCode).
///
/// The graph and task-state sub-documents are owned by the store and
/// addressed by `graph_id`/`task_state_id`; they are mutated throughout the
/// run under the mutation guard, while this record itself only changes
/// lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecContext {
    pub id: ExecContextId,
    pub source_code_id: i64,
    pub state: ExecContextState,
    /// Store document id of the serialized execution graph.
    pub graph_id: i64,
    /// Store document id of the serialized task-state table.
    pub task_state_id: i64,
    /// Read-mostly snapshot of variable init/nullified flags by name.
    #[serde(default)]
    pub variable_state: HashMap<String, VariableFlags>,
    pub created_at: DateTime<Utc>,
}

impl ExecContext {
    pub fn new(id: ExecContextId, source_code_id: i64, graph_id: i64, task_state_id: i64) -> Self {
        Self {
            id,
            source_code_id,
            state: ExecContextState::None,
            graph_id,
            task_state_id,
            variable_state: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Whether the named variable is usable as a condition: inited and not
    /// nullified.
    pub fn variable_holds(&self, name: &str) -> bool {
        self.variable_state
            .get(name)
            .is_some_and(|f| f.inited && !f.nullified)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VariableFlags {
    pub inited: bool,
    pub nullified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_holds() {
        let mut ctx = ExecContext::new(1, 1, 10, 11);
        assert!(!ctx.variable_holds("x"));
        ctx.variable_state.insert(
            "x".into(),
            VariableFlags {
                inited: true,
                nullified: false,
            },
        );
        assert!(ctx.variable_holds("x"));
        ctx.variable_state.insert(
            "y".into(),
            VariableFlags {
                inited: true,
                nullified: true,
            },
        );
        assert!(!ctx.variable_holds("y"));
    }
}
