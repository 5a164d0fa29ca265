//! # Conductor Core
//!
//! Core engine of a dispatcher/processor workflow system: a dispatcher
//! turns declarative pipeline templates into execution graphs of tasks,
//! mutates those graphs while they run (including permutation fan-out that
//! clones sub-graphs per variant combination), and coordinates a fleet of
//! polling worker processors over a pull-based protocol.
//!
//! ## Architecture
//!
//! - **models** - templates, running contexts, tasks, variables, function
//!   descriptors
//! - **graph** - the execution DAG, per-task state table, versioned store
//!   contract, and the mutation guard all writes go through
//! - **production** - static task production plus dynamic permutation
//!   fan-out and the closed internal-function registry
//! - **dispatcher** - context lifecycle, keep-alive/liveness, task
//!   assignment, completion handling
//! - **processor** - worker-side core slots and the dispatcher requestor
//! - **transfer** - checksummed variable payload movement and signed
//!   function distribution
//! - **protocol** - the serialized documents both sides exchange
//!
//! Workers never push: all flow is processor-initiated polling, so the
//! dispatcher holds no connection state and a worker behind NAT works
//! unchanged.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use conductor_core::models::{Process, ProcessLogic, SkipPolicy, SourceCode};
//! use conductor_core::{ConductorConfig, Dispatcher, ExecContextState, InMemoryGraphStore};
//!
//! # tokio_test::block_on(async {
//! let dispatcher = Dispatcher::new(
//!     Arc::new(InMemoryGraphStore::new()),
//!     &ConductorConfig::default(),
//! );
//! let source_code = Arc::new(SourceCode {
//!     id: 1,
//!     uid: "hello-1.0".into(),
//!     processes: vec![Process {
//!         code: "greet".into(),
//!         name: "greet".into(),
//!         function_code: "fn.greet".into(),
//!         logic: ProcessLogic::Sequential,
//!         inputs: vec![],
//!         outputs: vec![],
//!         tries_after_error: 1,
//!         condition: None,
//!         skip_policy: SkipPolicy::Execute,
//!         metas: vec![],
//!         sub_processes: vec![],
//!     }],
//!     inline: Default::default(),
//! });
//! let context = dispatcher.start_source_code(source_code).await.unwrap();
//! assert_eq!(context.state, ExecContextState::Started);
//! # });
//! ```

pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod graph;
pub mod logging;
pub mod models;
pub mod processor;
pub mod production;
pub mod protocol;
pub mod state_machine;
pub mod transfer;

pub use config::ConductorConfig;
pub use dispatcher::Dispatcher;
pub use error::{ConductorError, Result};
pub use graph::{ExecutionGraph, GraphStore, GuardedGraphAccess, InMemoryGraphStore, TaskStateTable};
pub use models::{ExecContext, SourceCode, Task, TaskContextId};
pub use production::TaskProductionEngine;
pub use state_machine::{ExecContextState, TaskExecState};
