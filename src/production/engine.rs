//! # Task Production Engine
//!
//! Turns `SourceCode` templates into concrete tasks, edges and variables.
//!
//! ## Architecture
//!
//! Production happens in two phases. Static production runs once when an
//! exec context starts: every top-level process becomes a task in the root
//! task context, chained in declaration order, with declared sub-processes
//! expanded according to their `ProcessLogic`. Dynamic production runs when
//! a permute task is executed: the variant combinations are computed, the
//! permute process's sub-graph is produced once per combination under a
//! fresh child task context, and every branch tail is spliced into the
//! descendant set that was recorded before any branch existed.
//!
//! Both phases mutate the graph and state-table documents through
//! [`GuardedGraphAccess`], so concurrent completion reports and fan-outs
//! on the same context serialize.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::constants::metas;
use crate::error::{ConductorError, Result};
use crate::graph::store::StoreError;
use crate::graph::{
    ExecutionGraph, GraphError, GuardedGraphAccess, TaskStateTable, TaskVertex,
};
use crate::models::task::VariableRef;
use crate::models::{
    ExecContext, IdGenerator, Process, ProcessLogic, SkipPolicy, SourceCode, Task,
    TaskContextId, TaskId, TaskParams, TaskRegistry, Variable, VariableId, VariableRegistry,
    VariableScope, VariableSourcing,
};

use super::inline_variants::{cartesian_combinations, parse_variants};
use super::ProductionError;

/// Entry and exit task ids of one produced process subtree.
struct ProcessSpan {
    entries: Vec<TaskId>,
    exits: Vec<TaskId>,
    task_count: usize,
}

/// Registry inserts made by one production pass, so a failed pass can be
/// unwound without touching anything it did not create.
#[derive(Default)]
struct ProductionTally {
    tasks: Vec<TaskId>,
    variables: Vec<VariableId>,
}

pub struct TaskProductionEngine {
    ids: Arc<IdGenerator>,
    tasks: Arc<TaskRegistry>,
    variables: Arc<VariableRegistry>,
    access: Arc<GuardedGraphAccess>,
}

impl TaskProductionEngine {
    pub fn new(
        ids: Arc<IdGenerator>,
        tasks: Arc<TaskRegistry>,
        variables: Arc<VariableRegistry>,
        access: Arc<GuardedGraphAccess>,
    ) -> Self {
        Self {
            ids,
            tasks,
            variables,
            access,
        }
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    pub fn variables(&self) -> &Arc<VariableRegistry> {
        &self.variables
    }

    pub fn access(&self) -> &Arc<GuardedGraphAccess> {
        &self.access
    }

    /// Static production: create the graph and state-table documents for a
    /// fresh exec context and fill them from the template. Returns the
    /// number of tasks produced.
    #[instrument(skip(self, source_code, exec_context), fields(exec_context_id = exec_context.id, source_code = %source_code.uid))]
    pub async fn produce_context(
        &self,
        source_code: &SourceCode,
        exec_context: &ExecContext,
    ) -> Result<usize> {
        source_code.validate().map_err(ConductorError::Configuration)?;

        let empty_graph = serde_json::to_value(ExecutionGraph::new()).map_err(StoreError::from)?;
        let empty_table = serde_json::to_value(TaskStateTable::new()).map_err(StoreError::from)?;
        self.access.store().create(exec_context.graph_id, empty_graph).await?;
        self.access.store().create(exec_context.task_state_id, empty_table).await?;

        let mut tally = ProductionTally::default();
        let produced = self
            .access
            .with_graph_and_state(
                exec_context.graph_id,
                exec_context.task_state_id,
                |graph, table| {
                    let mut tails: Vec<TaskId> = Vec::new();
                    let mut count = 0usize;
                    for process in &source_code.processes {
                        let span = match self.produce_process(
                            process,
                            exec_context,
                            &TaskContextId::root(),
                            graph,
                            table,
                            &mut tally,
                        )? {
                            Some(span) => span,
                            None => continue,
                        };
                        for &from in &tails {
                            for &to in &span.entries {
                                graph.add_edge(from, to)?;
                            }
                        }
                        count += span.task_count;
                        tails = span.exits;
                    }
                    Ok(count)
                },
            )
            .await;
        let produced = match produced {
            Ok(produced) => produced,
            Err(error) => {
                self.unwind(&tally);
                return Err(error);
            }
        };

        info!(
            exec_context_id = exec_context.id,
            tasks = produced,
            "exec context produced"
        );
        Ok(produced)
    }

    /// Produce one process and its statically declared sub-processes.
    ///
    /// Internal-function processes produce only their own task; their
    /// sub-processes are the template dynamic production clones per variant
    /// combination once the task runs.
    fn produce_process(
        &self,
        process: &Process,
        exec_context: &ExecContext,
        task_context: &TaskContextId,
        graph: &mut ExecutionGraph,
        table: &mut TaskStateTable,
        tally: &mut ProductionTally,
    ) -> Result<Option<ProcessSpan>> {
        if process.skip_policy == SkipPolicy::Skip {
            if let Some(condition) = &process.condition {
                if !exec_context.variable_holds(condition) {
                    debug!(
                        process = %process.code,
                        condition = %condition,
                        "condition does not hold, process skipped"
                    );
                    return Ok(None);
                }
            }
        }

        let task = self.create_task(process, exec_context, task_context, tally)?;
        let parent = task.id;
        graph.add_vertex(TaskVertex::new(parent, task_context.clone()));
        table.register(parent, process.tries_after_error);

        let mut span = ProcessSpan {
            entries: vec![parent],
            exits: vec![parent],
            task_count: 1,
        };
        if process.is_internal_function() {
            return Ok(Some(span));
        }

        match process.logic {
            ProcessLogic::Sequential => {
                for sub in &process.sub_processes {
                    let sub_span = match self
                        .produce_process(sub, exec_context, task_context, graph, table, tally)?
                    {
                        Some(sub_span) => sub_span,
                        None => continue,
                    };
                    for &from in &span.exits {
                        for &to in &sub_span.entries {
                            graph.add_edge(from, to)?;
                        }
                    }
                    span.exits = sub_span.exits;
                    span.task_count += sub_span.task_count;
                }
            }
            ProcessLogic::Parallel => {
                let mut exits = Vec::new();
                for sub in &process.sub_processes {
                    let sub_span = match self
                        .produce_process(sub, exec_context, task_context, graph, table, tally)?
                    {
                        Some(sub_span) => sub_span,
                        None => continue,
                    };
                    for &to in &sub_span.entries {
                        graph.add_edge(parent, to)?;
                    }
                    exits.extend(sub_span.exits);
                    span.task_count += sub_span.task_count;
                }
                if !exits.is_empty() {
                    span.exits = exits;
                }
            }
        }
        Ok(Some(span))
    }

    /// Mint a task for one process in one task context, resolving input
    /// variables against what is visible from that context and registering
    /// fresh, not-yet-inited output variables.
    fn create_task(
        &self,
        process: &Process,
        exec_context: &ExecContext,
        task_context: &TaskContextId,
        tally: &mut ProductionTally,
    ) -> Result<Task> {
        let mut inputs = Vec::new();
        for decl in &process.inputs {
            let variable = self
                .variables
                .find_visible(&decl.name, exec_context.id, task_context)
                .ok_or_else(|| ProductionError::VariableNotFound {
                    name: decl.name.clone(),
                    task_context_id: task_context.to_string(),
                })?;
            inputs.push(VariableRef {
                id: variable.id,
                name: variable.name.clone(),
                sourcing: variable.sourcing.clone(),
            });
        }

        let mut outputs = Vec::new();
        for decl in &process.outputs {
            let scope = if decl.global {
                VariableScope::Global
            } else {
                VariableScope::Local {
                    exec_context_id: exec_context.id,
                    task_context_id: task_context.clone(),
                }
            };
            let variable = Variable {
                id: self.ids.next_id(),
                name: decl.name.clone(),
                scope,
                sourcing: VariableSourcing::Dispatcher,
                inited: false,
                nullified: false,
                checksum: None,
            };
            outputs.push(VariableRef {
                id: variable.id,
                name: variable.name.clone(),
                sourcing: variable.sourcing.clone(),
            });
            tally.variables.push(variable.id);
            self.variables.insert(variable);
        }

        let task = Task {
            id: self.ids.next_id(),
            exec_context_id: exec_context.id,
            process_code: process.code.clone(),
            task_context_id: task_context.clone(),
            params: TaskParams {
                function_code: process.function_code.clone(),
                inputs,
                outputs,
                tries_after_error: process.tries_after_error,
                clean_work_dir: false,
            },
        };
        tally.tasks.push(task.id);
        self.tasks.insert(task.clone());
        Ok(task)
    }

    /// Remove everything a failed production pass inserted.
    fn unwind(&self, tally: &ProductionTally) {
        for &id in &tally.tasks {
            self.tasks.remove(id);
        }
        for &id in &tally.variables {
            self.variables.remove(id);
        }
    }

    /// Dynamic fan-out for a running permute task.
    ///
    /// The descendant set is captured before any branch exists; after every
    /// branch is produced, all branch tails are connected to that set with
    /// one edge-set insertion, so no descendant can become ready with only
    /// part of the fan-out in place. A permute task with no descendants is
    /// a broken graph: there would be nothing to join the branches back
    /// into.
    #[instrument(skip(self, source_code, exec_context), fields(exec_context_id = exec_context.id))]
    pub async fn permute_expand(
        &self,
        source_code: &SourceCode,
        exec_context: &ExecContext,
        permute_task_id: TaskId,
    ) -> Result<usize> {
        let task = self
            .tasks
            .get(permute_task_id)
            .ok_or(ConductorError::TaskNotFound(permute_task_id))?;
        let process = source_code
            .find_process(&task.process_code)
            .ok_or_else(|| ProductionError::ProcessNotFound(task.process_code.clone()))?;
        if process.sub_processes.is_empty() {
            return Err(ProductionError::NoSubProcesses(process.code.clone()).into());
        }

        let combinations = self.variant_combinations(source_code, exec_context, process, &task)?;
        if combinations.is_empty() {
            return Err(ProductionError::NoVariants.into());
        }

        let mut tally = ProductionTally::default();
        let branches = self
            .access
            .with_graph_and_state(
                exec_context.graph_id,
                exec_context.task_state_id,
                |graph, table| {
                    let descendants: BTreeSet<TaskVertex> =
                        graph.find_descendants(permute_task_id)?;
                    if descendants.is_empty() {
                        return Err(GraphError::BrokenGraph {
                            task_id: permute_task_id,
                        }
                        .into());
                    }

                    let mut tails: Vec<TaskId> = Vec::new();
                    for (i, combination) in combinations.iter().enumerate() {
                        let branch_context = task.task_context_id.child(i + 1);
                        if let Some(output_name) = process.meta_value(metas::OUTPUT_VARIABLE) {
                            self.store_combination_variable(
                                output_name,
                                combination,
                                exec_context,
                                &branch_context,
                                &mut tally,
                            );
                        }
                        let mut branch_tails = vec![permute_task_id];
                        for sub in &process.sub_processes {
                            let sub_span = match self.produce_process(
                                sub,
                                exec_context,
                                &branch_context,
                                graph,
                                table,
                                &mut tally,
                            )? {
                                Some(sub_span) => sub_span,
                                None => continue,
                            };
                            match process.logic {
                                ProcessLogic::Sequential => {
                                    for &from in &branch_tails {
                                        for &to in &sub_span.entries {
                                            graph.add_edge(from, to)?;
                                        }
                                    }
                                    branch_tails = sub_span.exits;
                                }
                                ProcessLogic::Parallel => {
                                    for &to in &sub_span.entries {
                                        graph.add_edge(permute_task_id, to)?;
                                    }
                                    branch_tails.extend(sub_span.exits);
                                }
                            }
                        }
                        branch_tails.retain(|&id| id != permute_task_id);
                        tails.extend(branch_tails);
                    }

                    graph.add_edges(&tails, &descendants)?;
                    Ok(combinations.len())
                },
            )
            .await;
        let branches = match branches {
            Ok(branches) => branches,
            Err(error) => {
                self.unwind(&tally);
                return Err(error);
            }
        };

        info!(
            task_id = permute_task_id,
            branches, "permutation fan-out produced"
        );
        Ok(branches)
    }

    /// Register the per-branch combination variable, inited, with the
    /// combination serialized as a JSON object for its payload.
    fn store_combination_variable(
        &self,
        name: &str,
        combination: &BTreeMap<String, String>,
        exec_context: &ExecContext,
        branch_context: &TaskContextId,
        tally: &mut ProductionTally,
    ) {
        let body: serde_json::Value = combination
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        let variable = Variable {
            id: self.ids.next_id(),
            name: name.to_string(),
            scope: VariableScope::Local {
                exec_context_id: exec_context.id,
                task_context_id: branch_context.clone(),
            },
            sourcing: VariableSourcing::Dispatcher,
            inited: true,
            nullified: false,
            checksum: None,
        };
        tally.variables.push(variable.id);
        self.variables
            .insert_with_payload(variable, body.to_string().into_bytes());
    }

    /// Compute the variant combinations a permute process expands to, from
    /// its inline group and from any variables named in its `variables`
    /// meta. Variable payloads may hold a JSON array of values or a variant
    /// spec string.
    fn variant_combinations(
        &self,
        source_code: &SourceCode,
        exec_context: &ExecContext,
        process: &Process,
        task: &Task,
    ) -> Result<Vec<BTreeMap<String, String>>> {
        let mut lists: BTreeMap<String, Vec<String>> = BTreeMap::new();

        if process.meta_is_true(metas::PERMUTE_INLINE) {
            let key = process.meta_value(metas::INLINE_KEY).ok_or_else(|| {
                ProductionError::MetaNotFound {
                    process: process.code.clone(),
                    key: metas::INLINE_KEY.to_string(),
                }
            })?;
            let group = source_code
                .inline
                .get(key)
                .filter(|group| !group.is_empty())
                .ok_or_else(|| ProductionError::InlineNotFound(key.to_string()))?;
            for (name, spec) in group {
                let variants = parse_variants(spec)?;
                if !variants.is_empty() {
                    lists.insert(name.clone(), variants);
                }
            }
        }

        if let Some(names) = process.meta_value(metas::VARIABLES) {
            for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                let variable = self
                    .variables
                    .find_visible(name, exec_context.id, &task.task_context_id)
                    .ok_or_else(|| ProductionError::VariableNotFound {
                        name: name.to_string(),
                        task_context_id: task.task_context_id.to_string(),
                    })?;
                let payload = self
                    .variables
                    .payload(variable.id)
                    .ok_or_else(|| ProductionError::VariablePayloadMissing(name.to_string()))?;
                let text = String::from_utf8_lossy(&payload);
                let variants: Vec<String> = match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(serde_json::Value::Array(items)) => items
                        .into_iter()
                        .map(|item| match item {
                            serde_json::Value::String(s) => s,
                            other => other.to_string(),
                        })
                        .collect(),
                    _ => parse_variants(text.trim())?,
                };
                if !variants.is_empty() {
                    lists.insert(name.to_string(), variants);
                }
            }
        }

        Ok(cartesian_combinations(&lists))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::internal_functions;
    use crate::graph::store::InMemoryGraphStore;
    use crate::models::{Meta, VariableDecl};
    use std::collections::HashMap;

    fn engine() -> TaskProductionEngine {
        let store = Arc::new(InMemoryGraphStore::new());
        TaskProductionEngine::new(
            Arc::new(IdGenerator::new()),
            Arc::new(TaskRegistry::new()),
            Arc::new(VariableRegistry::new()),
            Arc::new(GuardedGraphAccess::new(store, 3)),
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

    fn source_code(processes: Vec<Process>) -> SourceCode {
        SourceCode {
            id: 1,
            uid: "test-pipeline-1.0".into(),
            processes,
            inline: HashMap::new(),
        }
    }

    fn context() -> ExecContext {
        ExecContext::new(1, 1, 10, 11)
    }

    #[tokio::test]
    async fn test_static_production_chains_top_level_processes() {
        let engine = engine();
        let ctx = context();
        let sc = source_code(vec![process("a"), process("b"), process("c")]);

        let produced = engine.produce_context(&sc, &ctx).await.unwrap();
        assert_eq!(produced, 3);

        let (graph, table) = engine.access().snapshot(10, 11).await.unwrap();
        assert_eq!(graph.vertex_count(), 3);
        assert_eq!(table.len(), 3);
        // only the first task is ready
        assert_eq!(table.ready_task_ids(&graph).len(), 1);
        for vertex in graph.vertices() {
            assert_eq!(vertex.task_context_id, TaskContextId::root());
        }
    }

    #[tokio::test]
    async fn test_sub_processes_expand_statically() {
        let engine = engine();
        let ctx = context();
        let mut parent = process("parent");
        parent.logic = ProcessLogic::Parallel;
        parent.sub_processes = vec![process("left"), process("right")];
        let sc = source_code(vec![parent, process("join")]);

        let produced = engine.produce_context(&sc, &ctx).await.unwrap();
        assert_eq!(produced, 4);

        let (graph, _) = engine.access().snapshot(10, 11).await.unwrap();
        let parent_task_id = graph.roots().first().unwrap().task_id;
        assert_eq!(graph.direct_successors(parent_task_id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_skip_policy_splices_over_missing_condition() {
        let engine = engine();
        let ctx = context();
        let mut conditional = process("maybe");
        conditional.skip_policy = SkipPolicy::Skip;
        conditional.condition = Some("flag".into());
        let sc = source_code(vec![process("a"), conditional, process("c")]);

        let produced = engine.produce_context(&sc, &ctx).await.unwrap();
        // "maybe" is dropped, "a" feeds straight into "c"
        assert_eq!(produced, 2);

        let (graph, table) = engine.access().snapshot(10, 11).await.unwrap();
        let first = graph.roots().first().unwrap().task_id;
        assert_eq!(graph.direct_successors(first).unwrap().len(), 1);
        assert_eq!(table.ready_task_ids(&graph), vec![first]);
    }

    #[tokio::test]
    async fn test_output_variables_are_registered_not_inited() {
        let engine = engine();
        let ctx = context();
        let mut producer = process("producer");
        producer.outputs = vec![VariableDecl {
            name: "dataset".into(),
            global: false,
        }];
        let mut consumer = process("consumer");
        consumer.inputs = vec![VariableDecl {
            name: "dataset".into(),
            global: false,
        }];
        let sc = source_code(vec![producer, consumer]);

        engine.produce_context(&sc, &ctx).await.unwrap();
        let variable = engine
            .variables()
            .find_visible("dataset", 1, &TaskContextId::root())
            .unwrap();
        assert!(!variable.inited);
    }

    #[tokio::test]
    async fn test_failed_production_unwinds_registry_inserts() {
        let engine = engine();
        let ctx = context();
        let mut producer = process("producer");
        producer.outputs = vec![VariableDecl {
            name: "dataset".into(),
            global: false,
        }];
        let mut consumer = process("consumer");
        consumer.inputs = vec![VariableDecl {
            name: "absent".into(),
            global: false,
        }];
        let sc = source_code(vec![producer, consumer]);

        engine.produce_context(&sc, &ctx).await.unwrap_err();
        // the producer's task and output variable are gone again
        assert!(engine.tasks().is_empty());
        assert!(engine
            .variables()
            .find_visible("dataset", 1, &TaskContextId::root())
            .is_none());
    }

    #[tokio::test]
    async fn test_missing_input_variable_fails_production() {
        let engine = engine();
        let ctx = context();
        let mut consumer = process("consumer");
        consumer.inputs = vec![VariableDecl {
            name: "absent".into(),
            global: false,
        }];
        let sc = source_code(vec![consumer]);

        let err = engine.produce_context(&sc, &ctx).await.unwrap_err();
        assert!(matches!(
            err,
            ConductorError::Production(ProductionError::VariableNotFound { .. })
        ));
    }

    fn permute_source_code() -> SourceCode {
        let mut permute = process("permute");
        permute.function_code = internal_functions::PERMUTE_INLINES.to_string();
        permute.metas = vec![
            Meta::new(metas::PERMUTE_INLINE, "true"),
            Meta::new(metas::INLINE_KEY, "hyper-params"),
            Meta::new(metas::OUTPUT_VARIABLE, "combination"),
        ];
        permute.sub_processes = vec![process("worker")];

        let mut inline_group = HashMap::new();
        inline_group.insert("seed".to_string(), "[7, 11]".to_string());
        let mut inline = HashMap::new();
        inline.insert("hyper-params".to_string(), inline_group);

        let mut sc = source_code(vec![permute, process("finish")]);
        sc.inline = inline;
        sc
    }

    #[tokio::test]
    async fn test_permute_expands_branches_and_splices_once() {
        let engine = engine();
        let ctx = context();
        let sc = permute_source_code();

        engine.produce_context(&sc, &ctx).await.unwrap();
        let (graph, _) = engine.access().snapshot(10, 11).await.unwrap();
        let permute_id = graph.roots().first().unwrap().task_id;
        // statically only permute and finish exist
        assert_eq!(graph.vertex_count(), 2);

        let branches = engine.permute_expand(&sc, &ctx, permute_id).await.unwrap();
        assert_eq!(branches, 2);

        let (graph, table) = engine.access().snapshot(10, 11).await.unwrap();
        assert_eq!(graph.vertex_count(), 4);

        let branch_contexts: Vec<String> = graph
            .vertices()
            .filter(|v| v.task_id != permute_id)
            .filter(|v| v.task_context_id != TaskContextId::root())
            .map(|v| v.task_context_id.to_string())
            .collect();
        assert_eq!(branch_contexts, vec!["#1.1", "#1.2"]);

        // the single descendant now has both branch tails as ancestors
        let finish_id = graph
            .vertices()
            .filter(|v| v.task_context_id == TaskContextId::root())
            .map(|v| v.task_id)
            .max()
            .unwrap();
        let ancestors = graph.find_direct_ancestors(finish_id).unwrap();
        assert_eq!(ancestors.len(), 3);

        // branch workers became ready only through the permute task
        let workers: Vec<TaskId> = graph
            .vertices()
            .filter(|v| v.task_context_id != TaskContextId::root())
            .map(|v| v.task_id)
            .collect();
        for worker in &workers {
            assert_eq!(
                graph.find_direct_ancestors(*worker).unwrap().len(),
                1,
                "branch entry hangs off the permute task only"
            );
        }
        assert_eq!(table.len(), 4);
    }

    #[tokio::test]
    async fn test_permute_records_combination_variables_per_branch() {
        let engine = engine();
        let ctx = context();
        let sc = permute_source_code();

        engine.produce_context(&sc, &ctx).await.unwrap();
        let (graph, _) = engine.access().snapshot(10, 11).await.unwrap();
        let permute_id = graph.roots().first().unwrap().task_id;
        engine.permute_expand(&sc, &ctx, permute_id).await.unwrap();

        let branch_one = TaskContextId::root().child(1);
        let combo = engine
            .variables()
            .find_visible("combination", 1, &branch_one)
            .unwrap();
        assert!(combo.inited);
        let payload = engine.variables().payload(combo.id).unwrap();
        let body: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(body["seed"], "7");
    }

    #[tokio::test]
    async fn test_permute_without_descendants_is_broken_graph() {
        let engine = engine();
        let ctx = context();
        let mut sc = permute_source_code();
        // drop the finish process so the permute task has no descendants
        sc.processes.truncate(1);

        engine.produce_context(&sc, &ctx).await.unwrap();
        let (graph, _) = engine.access().snapshot(10, 11).await.unwrap();
        let permute_id = graph.roots().first().unwrap().task_id;

        let err = engine.permute_expand(&sc, &ctx, permute_id).await.unwrap_err();
        assert!(matches!(
            err,
            ConductorError::Graph(GraphError::BrokenGraph { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_fan_out_unwinds_branch_inserts() {
        let engine = engine();
        let ctx = context();
        let mut sc = permute_source_code();
        sc.processes[0].sub_processes[0].inputs = vec![VariableDecl {
            name: "absent".into(),
            global: false,
        }];

        engine.produce_context(&sc, &ctx).await.unwrap();
        let (graph, _) = engine.access().snapshot(10, 11).await.unwrap();
        let permute_id = graph.roots().first().unwrap().task_id;
        let tasks_before = engine.tasks().len();

        engine.permute_expand(&sc, &ctx, permute_id).await.unwrap_err();
        // the half-built branch leaves no task or combination variable behind
        assert_eq!(engine.tasks().len(), tasks_before);
        assert!(engine
            .variables()
            .find_visible("combination", 1, &TaskContextId::root().child(1))
            .is_none());
    }

    #[tokio::test]
    async fn test_permute_from_variable_payload() {
        let engine = engine();
        let ctx = context();
        let mut sc = permute_source_code();
        sc.inline.clear();
        sc.processes[0].metas = vec![
            Meta::new(metas::VARIABLES, "candidates"),
            Meta::new(metas::OUTPUT_VARIABLE, "combination"),
        ];

        engine.variables().insert_with_payload(
            Variable {
                id: 9_000,
                name: "candidates".into(),
                scope: VariableScope::Local {
                    exec_context_id: 1,
                    task_context_id: TaskContextId::root(),
                },
                sourcing: VariableSourcing::Dispatcher,
                inited: true,
                nullified: false,
                checksum: None,
            },
            br#"["x", "y", "z"]"#.to_vec(),
        );

        engine.produce_context(&sc, &ctx).await.unwrap();
        let (graph, _) = engine.access().snapshot(10, 11).await.unwrap();
        let permute_id = graph.roots().first().unwrap().task_id;
        let branches = engine.permute_expand(&sc, &ctx, permute_id).await.unwrap();
        assert_eq!(branches, 3);
    }
}
