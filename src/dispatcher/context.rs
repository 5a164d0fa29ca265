//! Exec-context lifecycle management.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, instrument};

use crate::error::{ConductorError, Result};
use crate::models::{ExecContext, ExecContextId, IdGenerator, SourceCode};
use crate::models::exec_context::VariableFlags;
use crate::state_machine::{check_context_transition, ExecContextState};

struct ContextEntry {
    context: ExecContext,
    source_code: Arc<SourceCode>,
}

/// Registry of running exec contexts and their lifecycle transitions.
///
/// Production and completion read contexts through here; the lifecycle
/// state decides whether results are accepted and whether tasks may be
/// offered.
pub struct ExecContextService {
    ids: Arc<IdGenerator>,
    contexts: DashMap<ExecContextId, ContextEntry>,
}

impl ExecContextService {
    pub fn new(ids: Arc<IdGenerator>) -> Self {
        Self {
            ids,
            contexts: DashMap::new(),
        }
    }

    /// Mint a fresh context for one source code, in state `None`. Graph and
    /// state-table document ids are allocated here; the documents
    /// themselves are created by static production.
    #[instrument(skip(self, source_code), fields(source_code = %source_code.uid))]
    pub fn create(&self, source_code: Arc<SourceCode>) -> Result<ExecContext> {
        source_code
            .validate()
            .map_err(ConductorError::Configuration)?;
        let context = ExecContext::new(
            self.ids.next_id(),
            source_code.id,
            self.ids.next_id(),
            self.ids.next_id(),
        );
        info!(exec_context_id = context.id, "exec context created");
        self.contexts.insert(
            context.id,
            ContextEntry {
                context: context.clone(),
                source_code,
            },
        );
        Ok(context)
    }

    pub fn get(&self, id: ExecContextId) -> Result<(ExecContext, Arc<SourceCode>)> {
        self.contexts
            .get(&id)
            .map(|e| (e.context.clone(), Arc::clone(&e.source_code)))
            .ok_or(ConductorError::ExecContextNotFound(id))
    }

    pub fn state(&self, id: ExecContextId) -> Result<ExecContextState> {
        self.contexts
            .get(&id)
            .map(|e| e.context.state)
            .ok_or(ConductorError::ExecContextNotFound(id))
    }

    /// Apply a lifecycle transition, validated against the closed table.
    pub fn transition(&self, id: ExecContextId, to: ExecContextState) -> Result<()> {
        let mut entry = self
            .contexts
            .get_mut(&id)
            .ok_or(ConductorError::ExecContextNotFound(id))?;
        check_context_transition(id, entry.context.state, to)?;
        info!(exec_context_id = id, from = %entry.context.state, to = %to, "exec context transition");
        entry.context.state = to;
        Ok(())
    }

    /// Update the read-mostly init/nullified flags for one variable name.
    pub fn set_variable_flags(
        &self,
        id: ExecContextId,
        name: &str,
        flags: VariableFlags,
    ) -> Result<()> {
        let mut entry = self
            .contexts
            .get_mut(&id)
            .ok_or(ConductorError::ExecContextNotFound(id))?;
        entry.context.variable_state.insert(name.to_string(), flags);
        Ok(())
    }

    /// Ids of contexts currently accepting work, oldest first.
    pub fn started_ids(&self) -> Vec<ExecContextId> {
        let mut ids: Vec<ExecContextId> = self
            .contexts
            .iter()
            .filter(|e| e.context.state == ExecContextState::Started)
            .map(|e| e.context.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn remove(&self, id: ExecContextId) -> Option<ExecContext> {
        self.contexts.remove(&id).map(|(_, e)| e.context)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
