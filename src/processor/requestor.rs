//! # Dispatcher Requestor
//!
//! The processor side of both channels: periodic keep-alive exchanges and
//! the task channel that reports results and asks for work.
//!
//! ## Key Features
//!
//! - Single-flight ticks: each tick tries to take the in-flight lock and
//!   drops itself when the previous exchange has not returned yet, so a
//!   slow dispatcher never piles up overlapping requests.
//! - At-least-once results: completion reports stay queued until the
//!   dispatcher acknowledges them in `accepted_results`.
//! - Identity adoption: whatever the dispatcher assigns over keep-alive
//!   replaces the local identity wholesale; an `unknown_session` reply
//!   discards it and the next heartbeat re-registers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::models::FunctionDescriptor;
use crate::protocol::{
    AssignedTask, DispatcherCommand, DispatcherResponse, KeepAliveRequest, KeepAliveResponse,
    ProcessorAssignment, ProcessorReport, ProcessorRequest, TaskRequest, TaskResultReport,
};
use crate::transfer::{ProcessorFunctionCache, SignatureVerifier, TransferError};

use super::cores::CoreSlots;

/// Transport to one dispatcher endpoint.
#[async_trait]
pub trait DispatcherLink: Send + Sync {
    async fn keep_alive(
        &self,
        request: KeepAliveRequest,
    ) -> std::result::Result<KeepAliveResponse, TransferError>;

    async fn exchange(
        &self,
        request: ProcessorRequest,
    ) -> std::result::Result<DispatcherResponse, TransferError>;
}

pub struct ProcessorRequestor {
    link: Arc<dyn DispatcherLink>,
    cores: Arc<CoreSlots>,
    functions: Arc<ProcessorFunctionCache>,
    verifier: Option<SignatureVerifier>,
    hostname: String,
    capabilities: Vec<String>,
    identity: Mutex<Option<ProcessorAssignment>>,
    pending_results: Mutex<Vec<TaskResultReport>>,
    pending_functions: Mutex<Vec<FunctionDescriptor>>,
    idle: AtomicBool,
    in_flight: tokio::sync::Mutex<()>,
}

impl ProcessorRequestor {
    pub fn new(
        link: Arc<dyn DispatcherLink>,
        cores: Arc<CoreSlots>,
        functions: Arc<ProcessorFunctionCache>,
        verifier: Option<SignatureVerifier>,
        hostname: impl Into<String>,
        capabilities: Vec<String>,
    ) -> Self {
        Self {
            link,
            cores,
            functions,
            verifier,
            hostname: hostname.into(),
            capabilities,
            identity: Mutex::new(None),
            pending_results: Mutex::new(Vec::new()),
            pending_functions: Mutex::new(Vec::new()),
            idle: AtomicBool::new(false),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    pub fn identity(&self) -> Option<ProcessorAssignment> {
        self.identity.lock().clone()
    }

    pub fn cores(&self) -> &Arc<CoreSlots> {
        &self.cores
    }

    /// Queue a completion report; it is resent until acknowledged.
    pub fn report_result(&self, report: TaskResultReport) {
        self.cores.release(report.task_id);
        self.pending_results.lock().push(report);
    }

    pub fn pending_result_count(&self) -> usize {
        self.pending_results.lock().len()
    }

    /// One keep-alive exchange: send identity and core state, adopt
    /// whatever comes back.
    #[instrument(skip(self))]
    pub async fn heartbeat(&self) -> Result<()> {
        let identity = self.identity();
        let request = KeepAliveRequest {
            processor: ProcessorReport {
                processor_id: identity.as_ref().map(|i| i.processor_id),
                session_id: identity.map(|i| i.session_id),
                hostname: self.hostname.clone(),
                capabilities: self.capabilities.clone(),
            },
            cores: self.cores.reports(),
            held_function_digests: self.functions.held_digests(),
        };
        let response = self.link.keep_alive(request).await?;
        if let Some(assignment) = response.assignment {
            info!(
                processor_id = assignment.processor_id,
                "adopting dispatcher-assigned identity"
            );
            *self.identity.lock() = Some(assignment);
        }
        self.cores.adopt_assignments(&response.core_assignments);
        if !response.function_deltas.is_empty() {
            debug!(
                missing = response.function_deltas.len(),
                "dispatcher reports missing functions"
            );
            self.pending_functions.lock().extend(response.function_deltas);
        }
        // the hold lasts exactly until a heartbeat arrives without it
        let idle = response.commands.contains(&DispatcherCommand::GoIdle);
        if idle != self.idle.swap(idle, Ordering::Relaxed) {
            info!(idle, "dispatcher toggled the task-request hold");
        }
        Ok(())
    }

    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Relaxed)
    }

    /// Descriptors the dispatcher reported as missing; the host downloads
    /// their bytes and hands both to [`install_function`](Self::install_function).
    pub fn take_function_deltas(&self) -> Vec<FunctionDescriptor> {
        std::mem::take(&mut *self.pending_functions.lock())
    }

    /// One task-channel tick. Returns a newly assigned task, if any.
    /// Overlapping ticks are dropped rather than queued.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<Option<AssignedTask>> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("previous exchange still in flight, tick dropped");
            return Ok(None);
        };
        let Some(identity) = self.identity() else {
            debug!("no identity yet, waiting for keep-alive");
            return Ok(None);
        };

        let results = self.pending_results.lock().clone();
        let idle_core = if self.is_idle() {
            None
        } else {
            self.cores.idle_core()
        };
        let request = ProcessorRequest {
            processor_id: identity.processor_id,
            session_id: identity.session_id,
            results,
            task_request: idle_core.map(|core_code| TaskRequest {
                core_code,
                capabilities: self.capabilities.clone(),
            }),
        };
        let asked_core = request
            .task_request
            .as_ref()
            .map(|ask| ask.core_code.clone());

        let response = self.link.exchange(request).await?;
        if response.unknown_session {
            warn!("session no longer known, discarding identity");
            *self.identity.lock() = None;
            return Ok(None);
        }

        self.pending_results
            .lock()
            .retain(|r| !response.accepted_results.contains(&r.task_id));

        if let (Some(task), Some(core_code)) = (&response.assigned_task, asked_core) {
            self.cores.bind(&core_code, task.task_id);
        }
        Ok(response.assigned_task)
    }

    /// Verify and cache downloaded function bytes before anything may
    /// execute them.
    pub fn install_function(
        &self,
        descriptor: &FunctionDescriptor,
        bytes: Vec<u8>,
    ) -> std::result::Result<(), TransferError> {
        self.functions
            .install(descriptor, bytes, self.verifier.as_ref())
    }

    pub fn functions(&self) -> &Arc<ProcessorFunctionCache> {
        &self.functions
    }

    /// Drive both channels until the task is cancelled. Errors are logged
    /// and the loop keeps going; a dispatcher outage is survivable.
    pub async fn run(self: Arc<Self>, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(error) = self.heartbeat().await {
                warn!(%error, "keep-alive exchange failed");
                continue;
            }
            if let Err(error) = self.tick().await {
                warn!(%error, "task exchange failed");
            }
        }
    }
}
