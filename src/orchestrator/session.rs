//! Per-session conversation state

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::llm::{Message, Role, ToolCall};

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    AwaitingUser,
    QueryingModel,
    ExecutingTools,
    Done,
    Failed,
}

impl SessionState {
    fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            // Done and Failed end a turn; the next user message starts a new one
            (AwaitingUser | Done | Failed, QueryingModel) => true,
            (QueryingModel, ExecutingTools | Done) => true,
            (ExecutingTools, QueryingModel) => true,
            // a turn future dropped before reaching Done or Failed
            (QueryingModel | ExecutingTools, AwaitingUser) => true,
            (_, Failed) => true,
            _ => false,
        }
    }
}

/// A conversation: append-only transcript plus loop bookkeeping
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    transcript: Vec<Message>,
    state: SessionState,
    resolved: HashSet<String>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            transcript: Vec::new(),
            state: SessionState::AwaitingUser,
            resolved: HashSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a call id already has a recorded result
    pub fn is_resolved(&self, call_id: &str) -> bool {
        self.resolved.contains(call_id)
    }

    /// Calls issued by the model that have no result yet
    ///
    /// Empty between turns unless a turn was dropped mid-batch.
    pub fn unresolved_calls(&self) -> Vec<&ToolCall> {
        self.transcript
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .flat_map(|m| m.tool_calls.iter())
            .filter(|c| !self.resolved.contains(&c.id))
            .collect()
    }

    pub(crate) fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            error!(
                "Session {}: invalid transition {:?} -> {:?}",
                self.id, self.state, next
            );
        }
        debug!("Session {}: state {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }

    pub(crate) fn append(&mut self, message: Message) {
        if let (Role::Tool, Some(call_id)) = (message.role, message.tool_call_id.as_ref()) {
            self.resolved.insert(call_id.clone());
        }
        self.transcript.push(message);
    }
}
