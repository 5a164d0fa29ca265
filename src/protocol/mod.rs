//! # Wire Protocol
//!
//! Serialized documents exchanged between processor and dispatcher, plus
//! the versioned task-params codec. Transport is out of scope here; these
//! are the payloads whatever transport carries.

pub mod messages;
pub mod params_version;

pub use messages::{
    AssignedTask, CoreAssignment, CoreReport, DispatcherCommand, DispatcherResponse,
    KeepAliveRequest, KeepAliveResponse, ProcessorAssignment, ProcessorReport, ProcessorRequest,
    TaskRequest, TaskResultReport,
};
pub use params_version::{decode_task_params, encode_task_params, ParamsVersionError};
