//! Dispatcher facade wiring the sub-services together.

use std::sync::Arc;

use chrono::Utc;
use tracing::{instrument, warn};

use crate::config::ConductorConfig;
use crate::error::Result;
use crate::graph::{GraphStore, GuardedGraphAccess};
use crate::models::{ExecContext, ExecContextId, IdGenerator, SourceCode, TaskRegistry, VariableRegistry};
use crate::production::{InternalFunctionRegistry, TaskProductionEngine};
use crate::protocol::{
    DispatcherCommand, DispatcherResponse, KeepAliveRequest, KeepAliveResponse, ProcessorRequest,
};
use crate::state_machine::ExecContextState;
use crate::transfer::{FunctionRepository, VariableTransferService};

use super::assignment::{AssignedSlot, AssignmentLedger, TaskAssignmentService};
use super::completion::TaskCompletionHandler;
use super::context::ExecContextService;
use super::keep_alive::KeepAliveService;

/// One dispatcher instance: registries, production engine, and the
/// processor-facing services, sharing a single id space and store.
pub struct Dispatcher {
    engine: Arc<TaskProductionEngine>,
    contexts: Arc<ExecContextService>,
    keep_alive: Arc<KeepAliveService>,
    assignment: Arc<TaskAssignmentService>,
    completion: Arc<TaskCompletionHandler>,
    transfer: Arc<VariableTransferService>,
    functions: Arc<FunctionRepository>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn GraphStore>, config: &ConductorConfig) -> Self {
        let ids = Arc::new(IdGenerator::new());
        let access = Arc::new(GuardedGraphAccess::new(
            store,
            config.store.conflict_retries,
        ));
        let variables = Arc::new(VariableRegistry::new());
        let transfer = Arc::new(VariableTransferService::new(
            Arc::clone(&variables),
            config.transfer.max_retries,
        ));
        let engine = Arc::new(TaskProductionEngine::new(
            Arc::clone(&ids),
            Arc::new(TaskRegistry::new()),
            variables,
            access,
        ));
        let contexts = Arc::new(ExecContextService::new(Arc::clone(&ids)));
        let keep_alive = Arc::new(KeepAliveService::new(
            Arc::clone(&ids),
            config.dispatcher.processor_timeout_secs,
        ));
        let ledger = Arc::new(AssignmentLedger::new());
        let assignment = Arc::new(TaskAssignmentService::new(
            Arc::clone(&engine),
            Arc::clone(&contexts),
            Arc::new(InternalFunctionRegistry::standard()),
            Arc::clone(&ledger),
        ));
        let completion = Arc::new(TaskCompletionHandler::new(
            Arc::clone(&engine),
            Arc::clone(&contexts),
            ledger,
        ));
        Self {
            engine,
            contexts,
            keep_alive,
            assignment,
            completion,
            transfer,
            functions: Arc::new(FunctionRepository::new()),
        }
    }

    pub fn engine(&self) -> &Arc<TaskProductionEngine> {
        &self.engine
    }

    pub fn contexts(&self) -> &Arc<ExecContextService> {
        &self.contexts
    }

    pub fn keep_alive(&self) -> &Arc<KeepAliveService> {
        &self.keep_alive
    }

    pub fn assignment(&self) -> &Arc<TaskAssignmentService> {
        &self.assignment
    }

    pub fn transfer(&self) -> &Arc<VariableTransferService> {
        &self.transfer
    }

    pub fn functions(&self) -> &Arc<FunctionRepository> {
        &self.functions
    }

    /// Instantiate a source code and run it through production to
    /// `Started`, ready to hand out tasks.
    #[instrument(skip(self, source_code), fields(source_code = %source_code.uid))]
    pub async fn start_source_code(&self, source_code: Arc<SourceCode>) -> Result<ExecContext> {
        let context = self.contexts.create(Arc::clone(&source_code))?;
        self.contexts
            .transition(context.id, ExecContextState::Producing)?;
        if let Err(error) = self.engine.produce_context(&source_code, &context).await {
            self.contexts
                .transition(context.id, ExecContextState::Error)?;
            return Err(error);
        }
        self.contexts
            .transition(context.id, ExecContextState::Produced)?;
        self.contexts
            .transition(context.id, ExecContextState::Started)?;
        Ok(self.contexts.get(context.id)?.0)
    }

    /// Keep-alive channel. Function sync deltas and admin commands ride
    /// along with the liveness exchange.
    pub fn heartbeat(&self, request: KeepAliveRequest) -> KeepAliveResponse {
        let function_deltas = self.functions.sync_deltas(&request.held_function_digests);
        if let Some(processor_id) = request.processor.processor_id {
            for expected in self.assignment.ledger().tasks_for(processor_id) {
                let reported = request.cores.iter().any(|c| c.current_task == Some(expected));
                if !reported {
                    // not released here: a task handed out between the
                    // processor composing this heartbeat and it arriving
                    // would be reported missing too
                    warn!(
                        processor_id,
                        task_id = expected,
                        "heartbeat does not report the task assigned to this processor"
                    );
                }
            }
        }
        let mut response = self.keep_alive.process(request);
        response.function_deltas = function_deltas;
        if self.contexts.started_ids().is_empty() {
            response.commands.push(DispatcherCommand::GoIdle);
        }
        response
    }

    /// Task channel: apply reported results, then try to fill the ask.
    pub async fn exchange(&self, request: ProcessorRequest) -> Result<DispatcherResponse> {
        if !self
            .keep_alive
            .validate_session(request.processor_id, &request.session_id)
        {
            return Ok(DispatcherResponse {
                unknown_session: true,
                ..Default::default()
            });
        }

        let mut accepted_results = Vec::new();
        for result in &request.results {
            if self.completion.process_result(result).await? {
                accepted_results.push(result.task_id);
            }
        }

        let assigned_task = match &request.task_request {
            Some(ask) => {
                let record = self.keep_alive.record(request.processor_id);
                let core_id = record
                    .as_ref()
                    .and_then(|r| r.cores.get(&ask.core_code).copied());
                match core_id {
                    Some(core_id) => {
                        let mut capabilities = ask.capabilities.clone();
                        if let Some(record) = record {
                            capabilities.extend(record.capabilities);
                        }
                        let slot = AssignedSlot {
                            processor_id: request.processor_id,
                            core_id,
                        };
                        self.assignment.find_task(slot, &capabilities).await?
                    }
                    None => {
                        // the core has to be registered over keep-alive
                        // before it may ask for work
                        warn!(
                            processor_id = request.processor_id,
                            core_code = %ask.core_code,
                            "task ask from a core with no assigned id"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        Ok(DispatcherResponse {
            accepted_results,
            assigned_task,
            unknown_session: false,
        })
    }

    /// Delete a run outright: its context entry, its tasks and variables,
    /// and both persisted documents. Legal in any lifecycle state; results
    /// for a deleted run are acknowledged and dropped.
    #[instrument(skip(self))]
    pub async fn delete_exec_context(&self, exec_context_id: ExecContextId) -> Result<()> {
        let (context, _) = self.contexts.get(exec_context_id)?;
        self.contexts.remove(exec_context_id);
        self.engine.tasks().remove_context(exec_context_id);
        self.engine.variables().remove_context(exec_context_id);
        self.engine
            .access()
            .evict_context(context.graph_id, context.task_state_id);
        let store = self.engine.access().store();
        store.delete(context.graph_id).await?;
        store.delete(context.task_state_id).await?;
        Ok(())
    }

    /// Periodic housekeeping: drop silent processors and put whatever they
    /// held back into rotation.
    pub async fn evict_stale_processors(&self) -> Result<Vec<i64>> {
        let evicted = self.keep_alive.evict_stale(Utc::now());
        for &processor_id in &evicted {
            self.assignment.release_processor(processor_id).await?;
        }
        Ok(evicted)
    }
}
