//! Dispatcher-internal functions.
//!
//! Functions whose code starts with `mh.` never leave the dispatcher: when
//! a task carrying one becomes ready the dispatcher executes it in-process
//! instead of offering it to a worker. The set of internal functions is
//! closed; dispatch goes through a lookup table built at startup, so an
//! unknown `mh.` code fails fast instead of silently matching nothing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::constants::{internal_functions, metas};
use crate::error::Result;
use crate::models::{ExecContext, SourceCode, Task};

use super::engine::TaskProductionEngine;
use super::ProductionError;

/// Everything an internal function may touch while executing.
pub struct InternalFunctionContext<'a> {
    pub source_code: &'a SourceCode,
    pub exec_context: &'a ExecContext,
    pub task: &'a Task,
    pub engine: &'a TaskProductionEngine,
}

#[async_trait]
pub trait InternalFunction: Send + Sync {
    fn code(&self) -> &'static str;

    /// Run the function for one ready task. An error here breaks the task.
    async fn execute(&self, ctx: InternalFunctionContext<'_>) -> Result<()>;
}

/// Closed lookup table of internal functions, built once at startup.
pub struct InternalFunctionRegistry {
    functions: HashMap<&'static str, Arc<dyn InternalFunction>>,
}

impl InternalFunctionRegistry {
    /// The standard set shipped with the dispatcher.
    pub fn standard() -> Self {
        let mut registry = Self {
            functions: HashMap::new(),
        };
        registry.register(Arc::new(PermuteInlinesFunction));
        registry.register(Arc::new(AggregateFunction));
        registry
    }

    fn register(&mut self, function: Arc<dyn InternalFunction>) {
        self.functions.insert(function.code(), function);
    }

    pub fn get(&self, code: &str) -> Option<Arc<dyn InternalFunction>> {
        self.functions.get(code).cloned()
    }

    pub fn is_internal(&self, code: &str) -> bool {
        self.functions.contains_key(code)
    }
}

/// `mh.permute-inlines`: fan the permute process's sub-graph out once per
/// variant combination.
pub struct PermuteInlinesFunction;

#[async_trait]
impl InternalFunction for PermuteInlinesFunction {
    fn code(&self) -> &'static str {
        internal_functions::PERMUTE_INLINES
    }

    #[instrument(skip_all, fields(task_id = ctx.task.id))]
    async fn execute(&self, ctx: InternalFunctionContext<'_>) -> Result<()> {
        ctx.engine
            .permute_expand(ctx.source_code, ctx.exec_context, ctx.task.id)
            .await?;
        Ok(())
    }
}

/// `mh.aggregate`: collect the inited values of the named variables across
/// every branch beneath the task's context into one JSON array, written to
/// the task's declared output variable.
pub struct AggregateFunction;

#[async_trait]
impl InternalFunction for AggregateFunction {
    fn code(&self) -> &'static str {
        internal_functions::AGGREGATE
    }

    #[instrument(skip_all, fields(task_id = ctx.task.id))]
    async fn execute(&self, ctx: InternalFunctionContext<'_>) -> Result<()> {
        let process = ctx
            .source_code
            .find_process(&ctx.task.process_code)
            .ok_or_else(|| ProductionError::ProcessNotFound(ctx.task.process_code.clone()))?;
        let names = process.meta_value(metas::VARIABLES).ok_or_else(|| {
            ProductionError::MetaNotFound {
                process: process.code.clone(),
                key: metas::VARIABLES.to_string(),
            }
        })?;

        let registry = ctx.engine.variables();
        let mut items: Vec<serde_json::Value> = Vec::new();
        for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            for variable in
                registry.find_all_under(name, ctx.exec_context.id, &ctx.task.task_context_id)
            {
                if !variable.inited || variable.nullified {
                    continue;
                }
                let payload = registry
                    .payload(variable.id)
                    .ok_or_else(|| ProductionError::VariablePayloadMissing(name.to_string()))?;
                let item = serde_json::from_slice(&payload).unwrap_or_else(|_| {
                    serde_json::Value::String(String::from_utf8_lossy(&payload).into_owned())
                });
                items.push(item);
            }
        }

        let output = ctx.task.params.outputs.first().ok_or_else(|| {
            ProductionError::MetaNotFound {
                process: process.code.clone(),
                key: metas::OUTPUT_VARIABLE.to_string(),
            }
        })?;
        let mut variable =
            registry
                .get(output.id)
                .ok_or_else(|| ProductionError::VariableNotFound {
                    name: output.name.clone(),
                    task_context_id: ctx.task.task_context_id.to_string(),
                })?;
        variable.inited = true;
        registry.insert_with_payload(variable, serde_json::Value::Array(items).to_string().into_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::store::InMemoryGraphStore;
    use crate::graph::GuardedGraphAccess;
    use crate::models::{
        IdGenerator, Meta, Process, ProcessLogic, SkipPolicy, TaskContextId, TaskRegistry,
        Variable, VariableDecl, VariableRegistry, VariableScope, VariableSourcing,
    };
    use std::collections::HashMap;

    fn engine() -> TaskProductionEngine {
        TaskProductionEngine::new(
            Arc::new(IdGenerator::new()),
            Arc::new(TaskRegistry::new()),
            Arc::new(VariableRegistry::new()),
            Arc::new(GuardedGraphAccess::new(Arc::new(InMemoryGraphStore::new()), 3)),
        )
    }

    fn process(code: &str) -> Process {
        Process {
            code: code.to_string(),
            name: code.to_string(),
            function_code: format!("fn.{code}"),
            logic: ProcessLogic::Sequential,
            inputs: vec![],
            outputs: vec![],
            tries_after_error: 1,
            condition: None,
            skip_policy: SkipPolicy::Execute,
            metas: vec![],
            sub_processes: vec![],
        }
    }

    #[test]
    fn test_registry_is_closed() {
        let registry = InternalFunctionRegistry::standard();
        assert!(registry.is_internal(internal_functions::PERMUTE_INLINES));
        assert!(registry.is_internal(internal_functions::AGGREGATE));
        assert!(!registry.is_internal("mh.unknown"));
        assert!(registry.get("mh.unknown").is_none());
    }

    #[tokio::test]
    async fn test_permute_function_expands_branches() {
        let engine = engine();
        let ctx = crate::models::ExecContext::new(1, 1, 10, 11);

        let mut permute = process("permute");
        permute.function_code = internal_functions::PERMUTE_INLINES.to_string();
        permute.metas = vec![
            Meta::new(metas::PERMUTE_INLINE, "true"),
            Meta::new(metas::INLINE_KEY, "grid"),
        ];
        permute.sub_processes = vec![process("worker")];
        let mut group = HashMap::new();
        group.insert("rate".to_string(), "[0.1, 0.2]".to_string());
        let mut inline = HashMap::new();
        inline.insert("grid".to_string(), group);
        let sc = crate::models::SourceCode {
            id: 1,
            uid: "grid-1.0".into(),
            processes: vec![permute, process("finish")],
            inline,
        };

        engine.produce_context(&sc, &ctx).await.unwrap();
        let (graph, _) = engine.access().snapshot(10, 11).await.unwrap();
        let task_id = graph.roots().first().unwrap().task_id;
        let task = engine.tasks().get(task_id).unwrap();

        let function = InternalFunctionRegistry::standard()
            .get(internal_functions::PERMUTE_INLINES)
            .unwrap();
        function
            .execute(InternalFunctionContext {
                source_code: &sc,
                exec_context: &ctx,
                task: &task,
                engine: &engine,
            })
            .await
            .unwrap();

        let (graph, _) = engine.access().snapshot(10, 11).await.unwrap();
        assert_eq!(graph.vertex_count(), 4);
    }

    #[tokio::test]
    async fn test_aggregate_collects_branch_outputs() {
        let engine = engine();
        let ctx = crate::models::ExecContext::new(1, 1, 10, 11);
        let root = TaskContextId::root();

        for (id, branch, value) in [(101, 1, "0.93"), (102, 2, "0.87")] {
            engine.variables().insert_with_payload(
                Variable {
                    id,
                    name: "score".into(),
                    scope: VariableScope::Local {
                        exec_context_id: 1,
                        task_context_id: root.child(branch),
                    },
                    sourcing: VariableSourcing::Dispatcher,
                    inited: true,
                    nullified: false,
                    checksum: None,
                },
                value.as_bytes().to_vec(),
            );
        }

        let mut aggregate = process("aggregate");
        aggregate.function_code = internal_functions::AGGREGATE.to_string();
        aggregate.metas = vec![Meta::new(metas::VARIABLES, "score")];
        aggregate.outputs = vec![VariableDecl {
            name: "scores".into(),
            global: false,
        }];
        let sc = crate::models::SourceCode {
            id: 1,
            uid: "agg-1.0".into(),
            processes: vec![aggregate],
            inline: HashMap::new(),
        };

        engine.produce_context(&sc, &ctx).await.unwrap();
        let (graph, _) = engine.access().snapshot(10, 11).await.unwrap();
        let task = engine
            .tasks()
            .get(graph.roots().first().unwrap().task_id)
            .unwrap();

        AggregateFunction
            .execute(InternalFunctionContext {
                source_code: &sc,
                exec_context: &ctx,
                task: &task,
                engine: &engine,
            })
            .await
            .unwrap();

        let output = engine.variables().get(task.params.outputs[0].id).unwrap();
        assert!(output.inited);
        let payload = engine.variables().payload(output.id).unwrap();
        let body: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(body.as_array().unwrap().len(), 2);
        assert_eq!(body[0], 0.93);
    }
}
