//! # Processor
//!
//! The worker-side half of the engine: core slots, the requestor that
//! talks to dispatchers, and the verified function cache those parts
//! share. Actual function execution is environment-specific and plugs in
//! behind the requestor; this module handles coordination only.

pub mod cores;
pub mod requestor;

pub use cores::{CoreSlot, CoreSlots};
pub use requestor::{DispatcherLink, ProcessorRequestor};
