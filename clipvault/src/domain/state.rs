//! Ingestion attempt state machine.

use serde::Serialize;

use crate::{Error, Result};

/// States an ingestion attempt moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IngestState {
    Resolving,
    Fetching,
    Remuxing,
    Thumbnailing,
    Publishing,
    Deciding,
    Committed,
    Aborted,
}

impl IngestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolving => "Resolving",
            Self::Fetching => "Fetching",
            Self::Remuxing => "Remuxing",
            Self::Thumbnailing => "Thumbnailing",
            Self::Publishing => "Publishing",
            Self::Deciding => "Deciding",
            Self::Committed => "Committed",
            Self::Aborted => "Aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }

    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: IngestState) -> bool {
        use IngestState::*;
        match (self, target) {
            // Direct uploads skip fetching
            (Resolving, Fetching | Remuxing) => true,
            (Fetching, Remuxing) => true,
            // Nothing left to publish after a total remux failure
            (Remuxing, Thumbnailing | Deciding) => true,
            (Thumbnailing, Publishing) => true,
            (Publishing, Deciding) => true,
            (Deciding, Committed) => true,
            // Timeouts and failed commits abort from anywhere non-terminal
            (from, Aborted) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for IngestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current state of one attempt and the path it took.
#[derive(Debug, Clone)]
pub struct StateTracker {
    current: IngestState,
    history: Vec<IngestState>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            current: IngestState::Resolving,
            history: vec![IngestState::Resolving],
        }
    }

    pub fn current(&self) -> IngestState {
        self.current
    }

    pub fn history(&self) -> &[IngestState] {
        &self.history
    }

    /// Move to `target`, rejecting illegal transitions.
    pub fn transition(&mut self, target: IngestState) -> Result<()> {
        if !self.current.can_transition_to(target) {
            return Err(Error::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            });
        }
        tracing::debug!(from = %self.current, to = %target, "Ingestion state transition");
        self.current = target;
        self.history.push(target);
        Ok(())
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}
