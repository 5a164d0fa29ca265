//! # Task Assignment
//!
//! Hands ready tasks to polling processors.
//!
//! ## Key Features
//!
//! - Oldest-first fairness: started contexts are scanned in ascending id
//!   order and ready tasks within a context in ascending task id order.
//! - Idempotent re-poll: a processor that polls again while it already
//!   holds an in-progress task gets the same task back instead of a second
//!   one, so a lost response never leaks work.
//! - Capability matching: a process carrying a `required-capability` meta
//!   is only offered to processors declaring that capability.
//! - Internal functions never leave the dispatcher: when a ready task's
//!   function code is internal it is executed in-process on the spot and
//!   the scan continues with whatever its completion made ready.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, instrument, warn};

use crate::constants::metas;
use crate::error::Result;
use crate::models::{Task, TaskId};
use crate::production::{
    InternalFunctionContext, InternalFunctionRegistry, ProductionError, TaskProductionEngine,
};
use crate::protocol::{encode_task_params, AssignedTask};
use crate::state_machine::TaskExecState;

use super::completion::{finalize_if_done, record_failure};
use super::context::ExecContextService;

/// The (processor, core) slot one task is assigned to. The core id is the
/// dispatcher-minted id from core registration, stable across heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignedSlot {
    pub processor_id: i64,
    pub core_id: i64,
}

/// Which in-progress task each worker core holds, in both directions. A
/// core holds at most one task; sibling cores of the same processor each
/// hold their own.
#[derive(Debug, Default)]
pub struct AssignmentLedger {
    by_core: DashMap<i64, TaskId>,
    by_task: DashMap<TaskId, AssignedSlot>,
}

impl AssignmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, slot: AssignedSlot, task_id: TaskId) {
        self.by_core.insert(slot.core_id, task_id);
        self.by_task.insert(task_id, slot);
    }

    pub fn current_for_core(&self, core_id: i64) -> Option<TaskId> {
        self.by_core.get(&core_id).map(|t| *t)
    }

    /// Every task currently held by one processor's cores.
    pub fn tasks_for(&self, processor_id: i64) -> Vec<TaskId> {
        self.by_task
            .iter()
            .filter(|e| e.value().processor_id == processor_id)
            .map(|e| *e.key())
            .collect()
    }

    pub fn clear_task(&self, task_id: TaskId) -> Option<AssignedSlot> {
        let (_, slot) = self.by_task.remove(&task_id)?;
        self.by_core.remove_if(&slot.core_id, |_, &t| t == task_id);
        Some(slot)
    }

    pub fn clear_core(&self, core_id: i64) -> Option<TaskId> {
        let (_, task_id) = self.by_core.remove(&core_id)?;
        self.by_task.remove_if(&task_id, |_, s| s.core_id == core_id);
        Some(task_id)
    }

    /// Clear every slot of one processor, returning the tasks it held.
    pub fn clear_processor(&self, processor_id: i64) -> Vec<TaskId> {
        let tasks = self.tasks_for(processor_id);
        for &task_id in &tasks {
            self.clear_task(task_id);
        }
        tasks
    }

    pub fn len(&self) -> usize {
        self.by_task.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_task.is_empty()
    }
}

enum Pick {
    External(Task),
    Internal(Task),
}

pub struct TaskAssignmentService {
    engine: Arc<TaskProductionEngine>,
    contexts: Arc<ExecContextService>,
    internal: Arc<InternalFunctionRegistry>,
    ledger: Arc<AssignmentLedger>,
}

impl TaskAssignmentService {
    pub fn new(
        engine: Arc<TaskProductionEngine>,
        contexts: Arc<ExecContextService>,
        internal: Arc<InternalFunctionRegistry>,
        ledger: Arc<AssignmentLedger>,
    ) -> Self {
        Self {
            engine,
            contexts,
            internal,
            ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<AssignmentLedger> {
        &self.ledger
    }

    /// Find work for one polling worker core.
    #[instrument(skip(self, capabilities))]
    pub async fn find_task(
        &self,
        slot: AssignedSlot,
        capabilities: &[String],
    ) -> Result<Option<AssignedTask>> {
        // a core that re-polls while it already holds a task gets that
        // same task back; its sibling cores scan for fresh work
        if let Some(task_id) = self.ledger.current_for_core(slot.core_id) {
            if let Some(task) = self.engine.tasks().get(task_id) {
                debug!(core_id = slot.core_id, task_id, "re-offering held task");
                return Ok(Some(self.assigned(&task)?));
            }
            self.ledger.clear_core(slot.core_id);
        }

        for exec_context_id in self.contexts.started_ids() {
            let (context, source_code) = self.contexts.get(exec_context_id)?;
            loop {
                let pick = self
                    .engine
                    .access()
                    .with_graph_and_state(context.graph_id, context.task_state_id, |graph, table| {
                        for task_id in table.ready_task_ids(graph) {
                            let Some(task) = self.engine.tasks().get(task_id) else {
                                continue;
                            };
                            if self.internal.is_internal(&task.params.function_code) {
                                table.increment_tries(task_id)?;
                                table.set_state(task_id, TaskExecState::InProgress)?;
                                return Ok(Some(Pick::Internal(task)));
                            }
                            let process = source_code
                                .find_process(&task.process_code)
                                .ok_or_else(|| {
                                    ProductionError::ProcessNotFound(task.process_code.clone())
                                })?;
                            if let Some(required) = process.meta_value(metas::REQUIRED_CAPABILITY) {
                                if !capabilities.iter().any(|c| c == required) {
                                    continue;
                                }
                            }
                            table.increment_tries(task_id)?;
                            table.set_state(task_id, TaskExecState::InProgress)?;
                            return Ok(Some(Pick::External(task)));
                        }
                        Ok(None)
                    })
                    .await?;

                match pick {
                    Some(Pick::External(task)) => {
                        self.ledger.record(slot, task.id);
                        info!(
                            processor_id = slot.processor_id,
                            core_id = slot.core_id,
                            task_id = task.id,
                            "task assigned"
                        );
                        return Ok(Some(self.assigned(&task)?));
                    }
                    Some(Pick::Internal(task)) => {
                        self.run_internal(&context, &source_code, &task).await?;
                    }
                    None => break,
                }
            }
        }
        Ok(None)
    }

    fn assigned(&self, task: &Task) -> Result<AssignedTask> {
        Ok(AssignedTask {
            task_id: task.id,
            exec_context_id: task.exec_context_id,
            params: encode_task_params(&task.params)?,
        })
    }

    /// Execute an internal-function task in-process. The task is already
    /// `InProgress`; it ends `Ok` or `Broken` here, outside the document
    /// locks, since internal functions take those locks themselves.
    async fn run_internal(
        &self,
        context: &crate::models::ExecContext,
        source_code: &Arc<crate::models::SourceCode>,
        task: &Task,
    ) -> Result<()> {
        let outcome = match self.internal.get(&task.params.function_code) {
            Some(function) => {
                function
                    .execute(InternalFunctionContext {
                        source_code,
                        exec_context: context,
                        task,
                        engine: &self.engine,
                    })
                    .await
            }
            None => Err(ProductionError::ProcessNotFound(
                task.params.function_code.clone(),
            )
            .into()),
        };

        self.engine
            .access()
            .with_graph_and_state(context.graph_id, context.task_state_id, |_, table| {
                match &outcome {
                    Ok(()) => {
                        table.set_state(task.id, TaskExecState::Ok)?;
                    }
                    Err(error) => {
                        warn!(task_id = task.id, %error, "internal function failed");
                        // internal failures are structural, never retried
                        table.set_error(task.id, error.to_string())?;
                        table.set_state(task.id, TaskExecState::Broken)?;
                    }
                }
                Ok(())
            })
            .await?;
        finalize_if_done(
            &self.engine,
            &self.contexts,
            context.id,
            context.graph_id,
            context.task_state_id,
        )
        .await
    }

    /// Release whatever a lost processor's cores held back into rotation.
    pub async fn release_processor(&self, processor_id: i64) -> Result<()> {
        for task_id in self.ledger.clear_processor(processor_id) {
            let Some(task) = self.engine.tasks().get(task_id) else {
                continue;
            };
            let Ok((context, _)) = self.contexts.get(task.exec_context_id) else {
                continue;
            };
            self.engine
                .access()
                .with_graph_and_state(context.graph_id, context.task_state_id, |_, table| {
                    if table.state(task_id)? == TaskExecState::InProgress {
                        record_failure(table, task_id, "processor lost")?;
                    }
                    Ok(())
                })
                .await?;
            finalize_if_done(
                &self.engine,
                &self.contexts,
                context.id,
                context.graph_id,
                context.task_state_id,
            )
            .await?;
            info!(processor_id, task_id, "held task released after processor loss");
        }
        Ok(())
    }
}
