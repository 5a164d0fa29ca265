//! # Keep-Alive Protocol
//!
//! Processor registration and liveness. A processor arrives with no
//! identity and is assigned a processor id plus a session id on its first
//! heartbeat; every later heartbeat refreshes the session. A heartbeat
//! carrying an id the dispatcher does not recognize (a dispatcher restart,
//! or an evicted record) gets a fresh identity assigned, which the
//! processor must adopt wholesale.
//!
//! Records that go quiet past the configured timeout are evicted; their
//! in-flight tasks are released back to ready by the assignment ledger.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{info, instrument, warn};

use crate::models::IdGenerator;
use crate::protocol::{
    CoreAssignment, CoreReport, DispatcherCommand, KeepAliveRequest, KeepAliveResponse,
    ProcessorAssignment,
};

/// What the dispatcher remembers about one processor.
#[derive(Debug, Clone)]
pub struct ProcessorRecord {
    pub processor_id: i64,
    pub session_id: String,
    pub hostname: String,
    pub capabilities: Vec<String>,
    pub last_seen: DateTime<Utc>,
    /// Core code -> assigned core id.
    pub cores: HashMap<String, i64>,
}

pub struct KeepAliveService {
    ids: Arc<IdGenerator>,
    processors: DashMap<i64, ProcessorRecord>,
    timeout: Duration,
}

impl KeepAliveService {
    pub fn new(ids: Arc<IdGenerator>, timeout_secs: u64) -> Self {
        Self {
            ids,
            processors: DashMap::new(),
            timeout: Duration::seconds(timeout_secs as i64),
        }
    }

    /// Handle one heartbeat.
    #[instrument(skip(self, request), fields(hostname = %request.processor.hostname))]
    pub fn process(&self, request: KeepAliveRequest) -> KeepAliveResponse {
        let refreshed = request
            .processor
            .processor_id
            .zip(request.processor.session_id.clone())
            .and_then(|(id, session)| {
                let mut record = self.processors.get_mut(&id)?;
                if record.session_id != session {
                    return None;
                }
                record.last_seen = Utc::now();
                record.capabilities = request.processor.capabilities.clone();
                Some(assign_cores(&self.ids, &mut record, &request.cores))
            });

        match refreshed {
            Some(core_assignments) => KeepAliveResponse {
                assignment: None,
                core_assignments,
                function_deltas: vec![],
                commands: vec![],
            },
            None => {
                let mut commands = vec![];
                if request.processor.processor_id.is_some() {
                    warn!(
                        stale_processor_id = ?request.processor.processor_id,
                        "heartbeat with unknown identity, reassigning"
                    );
                    commands.push(DispatcherCommand::ReRegister);
                }
                let mut record = ProcessorRecord {
                    processor_id: self.ids.next_id(),
                    session_id: uuid::Uuid::new_v4().to_string(),
                    hostname: request.processor.hostname.clone(),
                    capabilities: request.processor.capabilities.clone(),
                    last_seen: Utc::now(),
                    cores: HashMap::new(),
                };
                let core_assignments = assign_cores(&self.ids, &mut record, &request.cores);
                let assignment = ProcessorAssignment {
                    processor_id: record.processor_id,
                    session_id: record.session_id.clone(),
                };
                info!(processor_id = record.processor_id, "processor registered");
                self.processors.insert(record.processor_id, record);
                KeepAliveResponse {
                    assignment: Some(assignment),
                    core_assignments,
                    function_deltas: vec![],
                    commands,
                }
            }
        }
    }

    /// Whether this (processor, session) pair is currently valid.
    pub fn validate_session(&self, processor_id: i64, session_id: &str) -> bool {
        self.processors
            .get(&processor_id)
            .is_some_and(|r| r.session_id == session_id)
    }

    pub fn record(&self, processor_id: i64) -> Option<ProcessorRecord> {
        self.processors.get(&processor_id).map(|r| r.clone())
    }

    /// Evict processors that have been quiet past the timeout. Returns the
    /// evicted ids so the caller can release their assignments.
    pub fn evict_stale(&self, now: DateTime<Utc>) -> Vec<i64> {
        let deadline = now - self.timeout;
        let stale: Vec<i64> = self
            .processors
            .iter()
            .filter(|r| r.last_seen < deadline)
            .map(|r| r.processor_id)
            .collect();
        for id in &stale {
            self.processors.remove(id);
            warn!(processor_id = id, "processor evicted after silence");
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

/// Ensure every reported core has an id, reusing ids across heartbeats so
/// a core keeps its identity for as long as the processor does.
fn assign_cores(
    ids: &IdGenerator,
    record: &mut ProcessorRecord,
    reported: &[CoreReport],
) -> Vec<CoreAssignment> {
    reported
        .iter()
        .map(|core| {
            let core_id = *record
                .cores
                .entry(core.code.clone())
                .or_insert_with(|| ids.next_id());
            CoreAssignment {
                code: core.code.clone(),
                core_id,
            }
        })
        .collect()
}
