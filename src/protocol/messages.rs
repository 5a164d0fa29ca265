//! Processor/dispatcher exchange documents.

use serde::{Deserialize, Serialize};

use crate::models::{FunctionDescriptor, TaskId};

/// Periodic heartbeat from a processor. Carries identity when the
/// processor has one; a blank report means the processor is asking to be
/// registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepAliveRequest {
    pub processor: ProcessorReport,
    #[serde(default)]
    pub cores: Vec<CoreReport>,
    /// Digests of function artifacts the processor already holds verified.
    #[serde(default)]
    pub held_function_digests: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorReport {
    #[serde(default)]
    pub processor_id: Option<i64>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub hostname: String,
    /// Capability codes this processor's environment provides.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// One worker core as the processor sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreReport {
    pub code: String,
    #[serde(default)]
    pub core_id: Option<i64>,
    /// Task the core is currently working on, if any.
    #[serde(default)]
    pub current_task: Option<TaskId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeepAliveResponse {
    /// Present when the dispatcher (re)assigned identity; the processor
    /// must adopt it and discard its previous one.
    #[serde(default)]
    pub assignment: Option<ProcessorAssignment>,
    #[serde(default)]
    pub core_assignments: Vec<CoreAssignment>,
    /// Descriptors of functions the processor is missing and should
    /// download and install.
    #[serde(default)]
    pub function_deltas: Vec<FunctionDescriptor>,
    #[serde(default)]
    pub commands: Vec<DispatcherCommand>,
}

/// Administrative command carried in a keep-alive response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherCommand {
    /// The reported identity is dead; adopt the assignment carried in the
    /// same response and resend anything still in flight.
    ReRegister,
    /// Nothing is runnable; stop asking for tasks until a later
    /// keep-alive arrives without this command.
    GoIdle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorAssignment {
    pub processor_id: i64,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreAssignment {
    pub code: String,
    pub core_id: i64,
}

/// Task-channel request: completion reports plus an optional ask for new
/// work. Results and the ask travel together so one round trip both
/// reports and refills a core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorRequest {
    pub processor_id: i64,
    pub session_id: String,
    #[serde(default)]
    pub results: Vec<TaskResultReport>,
    #[serde(default)]
    pub task_request: Option<TaskRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResultReport {
    pub task_id: TaskId,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub core_code: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatcherResponse {
    /// Task ids whose results were applied, so the processor may drop them
    /// from its resend queue.
    #[serde(default)]
    pub accepted_results: Vec<TaskId>,
    #[serde(default)]
    pub assigned_task: Option<AssignedTask>,
    /// Set when the session is stale; the processor must re-register over
    /// the keep-alive channel before asking again.
    #[serde(default)]
    pub unknown_session: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignedTask {
    pub task_id: TaskId,
    pub exec_context_id: i64,
    /// Versioned task-params document, see
    /// [`decode_task_params`](crate::protocol::decode_task_params).
    pub params: String,
}
