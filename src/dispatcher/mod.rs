//! # Dispatcher
//!
//! The coordinating side of the engine: exec-context lifecycle, processor
//! registration and liveness, task assignment, and completion handling.
//!
//! ## Architecture
//!
//! [`Dispatcher`] wires the sub-services over one shared id space, task and
//! variable registry, and guarded graph access. Processors talk to it over
//! two channels: the keep-alive channel ([`KeepAliveService`]) carries
//! identity and liveness, the task channel ([`Dispatcher::exchange`])
//! carries completion reports and work requests.

pub mod assignment;
pub mod completion;
pub mod context;
pub mod keep_alive;
pub mod service;

pub use assignment::{AssignedSlot, AssignmentLedger, TaskAssignmentService};
pub use completion::TaskCompletionHandler;
pub use context::ExecContextService;
pub use keep_alive::{KeepAliveService, ProcessorRecord};
pub use service::Dispatcher;
