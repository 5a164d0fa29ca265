//! # Task Completion
//!
//! Applies worker results to the state table, bounds retries, and
//! finalizes the exec context once no further progress is possible.
//!
//! Results are only applied while the owning context is in a state that
//! accepts them. A stopped context leaves them unacknowledged so the
//! processor reports them again after the context resumes; a terminal
//! context never resumes, so its late results are acknowledged and
//! dropped. A result for a task that is not in progress is a duplicate
//! and is acknowledged without effect.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::graph::{RunStatus, TaskStateTable};
use crate::models::exec_context::VariableFlags;
use crate::models::TaskId;
use crate::production::TaskProductionEngine;
use crate::protocol::TaskResultReport;
use crate::state_machine::{ExecContextState, StateError, TaskExecState};

use super::assignment::AssignmentLedger;
use super::context::ExecContextService;

/// Record one failure: the task moves to `Error`, then either back to
/// `None` while retries remain or on to `Broken`. Returns the final state.
pub(crate) fn record_failure(
    table: &mut TaskStateTable,
    task_id: TaskId,
    message: &str,
) -> std::result::Result<TaskExecState, StateError> {
    table.set_error(task_id, message)?;
    table.set_state(task_id, TaskExecState::Error)?;
    let retries_remaining = table
        .get(task_id)
        .ok_or(StateError::UnknownTask(task_id))?
        .retries_remaining();
    if retries_remaining {
        table.set_state(task_id, TaskExecState::None)?;
        Ok(TaskExecState::None)
    } else {
        table.set_state(task_id, TaskExecState::Broken)?;
        Ok(TaskExecState::Broken)
    }
}

pub struct TaskCompletionHandler {
    engine: Arc<TaskProductionEngine>,
    contexts: Arc<ExecContextService>,
    ledger: Arc<AssignmentLedger>,
}

impl TaskCompletionHandler {
    pub fn new(
        engine: Arc<TaskProductionEngine>,
        contexts: Arc<ExecContextService>,
        ledger: Arc<AssignmentLedger>,
    ) -> Self {
        Self {
            engine,
            contexts,
            ledger,
        }
    }

    /// Apply one completion report. Returns whether the result was
    /// accepted; an unaccepted result stays in the processor's resend
    /// queue.
    #[instrument(skip(self, report), fields(task_id = report.task_id, ok = report.ok))]
    pub async fn process_result(&self, report: &TaskResultReport) -> Result<bool> {
        let Some(task) = self.engine.tasks().get(report.task_id) else {
            warn!(task_id = report.task_id, "result for unknown task, dropped");
            return Ok(true);
        };
        let Ok((context, _)) = self.contexts.get(task.exec_context_id) else {
            warn!(
                task_id = report.task_id,
                exec_context_id = task.exec_context_id,
                "result for deleted exec context, dropped"
            );
            return Ok(true);
        };
        if !context.state.accepts_results() {
            if context.state.is_terminal() {
                debug!(
                    exec_context_id = context.id,
                    state = %context.state,
                    "result for settled context, dropped"
                );
                return Ok(true);
            }
            debug!(
                exec_context_id = context.id,
                state = %context.state,
                "context not accepting results, report ignored"
            );
            return Ok(false);
        }

        let final_state = self
            .engine
            .access()
            .with_graph_and_state(context.graph_id, context.task_state_id, |_, table| {
                if table.state(task.id)? != TaskExecState::InProgress {
                    return Ok(None);
                }
                if report.ok {
                    table.set_state(task.id, TaskExecState::Ok)?;
                    Ok(Some(TaskExecState::Ok))
                } else {
                    let message = report.error.as_deref().unwrap_or("task failed");
                    Ok(Some(record_failure(table, task.id, message)?))
                }
            })
            .await?;

        let Some(final_state) = final_state else {
            debug!(task_id = task.id, "duplicate result, already settled");
            return Ok(true);
        };
        self.ledger.clear_task(task.id);

        if final_state == TaskExecState::Ok {
            for output in &task.params.outputs {
                if let Some(mut variable) = self.engine.variables().get(output.id) {
                    variable.inited = true;
                    self.engine.variables().insert(variable);
                }
                self.contexts.set_variable_flags(
                    context.id,
                    &output.name,
                    VariableFlags {
                        inited: true,
                        nullified: false,
                    },
                )?;
            }
        }

        finalize_if_done(
            &self.engine,
            &self.contexts,
            context.id,
            context.graph_id,
            context.task_state_id,
        )
        .await?;
        Ok(true)
    }
}

/// Close the context out once the state table shows no further progress is
/// possible, and release its mutation locks. Shared with the assignment
/// service, which settles internal-function tasks itself.
pub(crate) async fn finalize_if_done(
    engine: &TaskProductionEngine,
    contexts: &ExecContextService,
    exec_context_id: i64,
    graph_id: i64,
    task_state_id: i64,
) -> Result<()> {
    let (graph, table) = engine.access().snapshot(graph_id, task_state_id).await?;
    let target = match table.run_status(&graph) {
        RunStatus::InProgress => return Ok(()),
        RunStatus::FinishedOk => ExecContextState::Finished,
        RunStatus::FinishedWithErrors => ExecContextState::Error,
    };
    if let Err(error) = contexts.transition(exec_context_id, target) {
        // two results finishing concurrently both see the graph as done;
        // whoever transitions second finds the context already settled
        if contexts.state(exec_context_id).is_ok_and(|s| s.is_terminal()) {
            return Ok(());
        }
        return Err(error);
    }
    engine.access().evict_context(graph_id, task_state_id);
    info!(exec_context_id, state = %target, "exec context finalized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_failure_resets_while_retries_remain() {
        let mut table = TaskStateTable::new();
        table.register(1, 3);
        table.set_state(1, TaskExecState::InProgress).unwrap();
        table.increment_tries(1).unwrap();
        let state = record_failure(&mut table, 1, "boom").unwrap();
        assert_eq!(state, TaskExecState::None);
        assert_eq!(table.get(1).unwrap().error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_record_failure_breaks_after_last_try() {
        let mut table = TaskStateTable::new();
        table.register(1, 2);
        for _ in 0..2 {
            table.set_state(1, TaskExecState::InProgress).unwrap();
            table.increment_tries(1).unwrap();
            record_failure(&mut table, 1, "boom").unwrap();
        }
        assert_eq!(table.get(1).unwrap().state, TaskExecState::Broken);
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent_once_context_settled() {
        use crate::graph::{GuardedGraphAccess, InMemoryGraphStore};
        use crate::models::{
            IdGenerator, Process, ProcessLogic, SkipPolicy, SourceCode, TaskRegistry,
            VariableRegistry,
        };
        use std::collections::HashMap;

        let ids = Arc::new(IdGenerator::new());
        let engine = TaskProductionEngine::new(
            Arc::clone(&ids),
            Arc::new(TaskRegistry::new()),
            Arc::new(VariableRegistry::new()),
            Arc::new(GuardedGraphAccess::new(
                Arc::new(InMemoryGraphStore::new()),
                3,
            )),
        );
        let contexts = ExecContextService::new(ids);
        let source_code = Arc::new(SourceCode {
            id: 1,
            uid: "settle-1.0".into(),
            processes: vec![Process {
                code: "only".into(),
                name: "only".into(),
                function_code: "fn.only".into(),
                logic: ProcessLogic::Sequential,
                inputs: vec![],
                outputs: vec![],
                tries_after_error: 1,
                condition: None,
                skip_policy: SkipPolicy::Execute,
                metas: vec![],
                sub_processes: vec![],
            }],
            inline: HashMap::new(),
        });
        let context = contexts.create(Arc::clone(&source_code)).unwrap();
        contexts
            .transition(context.id, ExecContextState::Producing)
            .unwrap();
        engine.produce_context(&source_code, &context).await.unwrap();
        contexts
            .transition(context.id, ExecContextState::Produced)
            .unwrap();
        contexts
            .transition(context.id, ExecContextState::Started)
            .unwrap();

        engine
            .access()
            .with_graph_and_state(context.graph_id, context.task_state_id, |graph, table| {
                let task_id = table.ready_task_ids(graph)[0];
                table.increment_tries(task_id)?;
                table.set_state(task_id, TaskExecState::InProgress)?;
                table.set_state(task_id, TaskExecState::Ok)?;
                Ok(())
            })
            .await
            .unwrap();

        finalize_if_done(
            &engine,
            &contexts,
            context.id,
            context.graph_id,
            context.task_state_id,
        )
        .await
        .unwrap();
        assert_eq!(
            contexts.state(context.id).unwrap(),
            ExecContextState::Finished
        );

        // the losing side of two concurrent completions sees the same
        // all-terminal snapshot and finalizes again
        finalize_if_done(
            &engine,
            &contexts,
            context.id,
            context.graph_id,
            context.task_state_id,
        )
        .await
        .unwrap();
        assert_eq!(
            contexts.state(context.id).unwrap(),
            ExecContextState::Finished
        );
    }
}
