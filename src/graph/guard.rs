//! # Graph Mutation Guard
//!
//! Per-document mutual exclusion: one async mutex per distinct graph or
//! task-state document id, created on first use and evictable once the
//! owning exec context reaches a terminal state, so a long-lived dispatcher
//! does not accumulate locks forever.
//!
//! Lock ordering is a contract every caller follows: when both documents
//! are needed, the graph lock is acquired first, the task-state lock
//! second. Critical sections never perform worker-facing I/O, only
//! in-memory computation plus the store's read-modify-write-replace, so
//! their duration stays short and bounded.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use super::execution_graph::ExecutionGraph;
use super::store::{modify_document, DocumentId, GraphStore};
use super::task_state_table::TaskStateTable;
use crate::error::Result;

/// Arena of per-document-id mutexes.
///
/// Graph and task-state documents live in separate id spaces, so a single
/// arena keyed by document id covers both without collision.
#[derive(Debug, Default)]
pub struct GraphMutationGuard {
    locks: DashMap<DocumentId, Arc<Mutex<()>>>,
}

impl GraphMutationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the mutex for one document, creating it on first use.
    pub async fn acquire(&self, id: DocumentId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the arena entry for a terminal context's document. A holder of
    /// an already-acquired guard keeps its own reference alive.
    pub fn evict(&self, id: DocumentId) {
        self.locks.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Guard plus store: the only path through which graph-shape and
/// state-table changes happen.
pub struct GuardedGraphAccess {
    guard: GraphMutationGuard,
    store: Arc<dyn GraphStore>,
    conflict_retries: u32,
}

impl GuardedGraphAccess {
    pub fn new(store: Arc<dyn GraphStore>, conflict_retries: u32) -> Self {
        Self {
            guard: GraphMutationGuard::new(),
            store,
            conflict_retries,
        }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Exclusive read-modify-write of one execution graph document.
    pub async fn with_graph<R, F>(&self, graph_id: DocumentId, apply: F) -> Result<R>
    where
        F: FnMut(&mut ExecutionGraph) -> Result<R>,
    {
        let _lock = self.guard.acquire(graph_id).await;
        modify_document::<ExecutionGraph, R, F>(
            self.store.as_ref(),
            graph_id,
            self.conflict_retries,
            apply,
        )
        .await
    }

    /// Exclusive read-modify-write of one task-state document.
    pub async fn with_task_state<R, F>(&self, task_state_id: DocumentId, apply: F) -> Result<R>
    where
        F: FnMut(&mut TaskStateTable) -> Result<R>,
    {
        let _lock = self.guard.acquire(task_state_id).await;
        modify_document::<TaskStateTable, R, F>(
            self.store.as_ref(),
            task_state_id,
            self.conflict_retries,
            apply,
        )
        .await
    }

    /// Exclusive read-modify-write of both documents as one atomic unit.
    /// Graph lock outer, task-state lock inner. Fixed order, every caller.
    pub async fn with_graph_and_state<R, F>(
        &self,
        graph_id: DocumentId,
        task_state_id: DocumentId,
        mut apply: F,
    ) -> Result<R>
    where
        F: FnMut(&mut ExecutionGraph, &mut TaskStateTable) -> Result<R>,
    {
        let _graph_lock = self.guard.acquire(graph_id).await;
        let _state_lock = self.guard.acquire(task_state_id).await;

        let graph_doc = self.store.load(graph_id).await.map_err(crate::error::ConductorError::from)?;
        let state_doc = self
            .store
            .load(task_state_id)
            .await
            .map_err(crate::error::ConductorError::from)?;

        let graph_before = graph_doc.body.clone();
        let mut graph: ExecutionGraph =
            serde_json::from_value(graph_doc.body).map_err(super::store::StoreError::from)?;
        let mut table: TaskStateTable =
            serde_json::from_value(state_doc.body).map_err(super::store::StoreError::from)?;

        let out = apply(&mut graph, &mut table)?;

        let graph_body = serde_json::to_value(&graph).map_err(super::store::StoreError::from)?;
        let state_body = serde_json::to_value(&table).map_err(super::store::StoreError::from)?;
        self.store
            .replace(graph_id, graph_body, graph_doc.version)
            .await
            .map_err(crate::error::ConductorError::from)?;
        if let Err(error) = self
            .store
            .replace(task_state_id, state_body, state_doc.version)
            .await
        {
            // restore the graph so the pair never lands half-written
            self.restore_graph(graph_id, graph_before).await;
            return Err(crate::error::ConductorError::from(error));
        }
        Ok(out)
    }

    async fn restore_graph(&self, graph_id: DocumentId, body: serde_json::Value) {
        match self.store.load(graph_id).await {
            Ok(current) => {
                if let Err(error) = self.store.replace(graph_id, body, current.version).await {
                    warn!(graph_id, %error, "graph rollback failed after state write conflict");
                }
            }
            Err(error) => {
                warn!(graph_id, %error, "graph reload failed after state write conflict");
            }
        }
    }

    /// Read-only snapshot of both documents, taken under both locks so the
    /// pair is mutually consistent.
    pub async fn snapshot(
        &self,
        graph_id: DocumentId,
        task_state_id: DocumentId,
    ) -> Result<(ExecutionGraph, TaskStateTable)> {
        let _graph_lock = self.guard.acquire(graph_id).await;
        let _state_lock = self.guard.acquire(task_state_id).await;
        let graph_doc = self.store.load(graph_id).await.map_err(crate::error::ConductorError::from)?;
        let state_doc = self
            .store
            .load(task_state_id)
            .await
            .map_err(crate::error::ConductorError::from)?;
        let graph: ExecutionGraph =
            serde_json::from_value(graph_doc.body).map_err(super::store::StoreError::from)?;
        let table: TaskStateTable =
            serde_json::from_value(state_doc.body).map_err(super::store::StoreError::from)?;
        Ok((graph, table))
    }

    /// Release arena entries for a terminal context.
    pub fn evict_context(&self, graph_id: DocumentId, task_state_id: DocumentId) {
        self.guard.evict(graph_id);
        self.guard.evict(task_state_id);
    }

    pub fn lock_count(&self) -> usize {
        self.guard.len()
    }
}
