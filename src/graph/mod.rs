//! # Execution Graph Engine
//!
//! The data structure and concurrency discipline that let many independent
//! workers complete tasks concurrently while the dispatcher safely mutates
//! a live, potentially growing DAG.
//!
//! ## Architecture
//!
//! - [`ExecutionGraph`]: adjacency-list DAG for one pipeline run, with
//!   descendant queries, edge insertion, and vertex removal.
//! - [`TaskStateTable`]: task id -> {state, tries}; derives per-task
//!   readiness and whole-run completion.
//! - [`GraphMutationGuard`]: per-document async mutex arena; every
//!   structural change is a read-modify-write-replace performed while the
//!   document's lock is held, so mutation of one logical graph is strictly
//!   serialized without database-level row locking.
//! - [`store::GraphStore`]: the storage contract (versioned load/replace);
//!   the store's compare-and-swap is a safety net for multi-process
//!   deployments, never the primary discipline.

pub mod execution_graph;
pub mod guard;
pub mod store;
pub mod task_state_table;

pub use execution_graph::{ExecutionGraph, GraphError, TaskVertex};
pub use guard::{GraphMutationGuard, GuardedGraphAccess};
pub use store::{DocumentId, GraphStore, InMemoryGraphStore, StoreError, VersionedDocument};
pub use task_state_table::{RunStatus, TaskStateRow, TaskStateTable};
