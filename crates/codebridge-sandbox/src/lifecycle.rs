//! Run state machine.
//!
//! `Created → Started → {Completed | TimedOut | ResourceExceeded | Crashed} → CleanedUp`,
//! with `CleanedUp` reachable from every state. Anything else is rejected.

use codebridge_core::RunStatus;
use serde::Serialize;

use crate::SandboxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Created,
    Started,
    Completed,
    TimedOut,
    ResourceExceeded,
    Crashed,
    CleanedUp,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::TimedOut | RunState::ResourceExceeded | RunState::Crashed
        )
    }

    pub fn can_transition_to(&self, to: RunState) -> bool {
        match (self, to) {
            (RunState::CleanedUp, _) => false,
            (_, RunState::CleanedUp) => true,
            (RunState::Created, RunState::Started) => true,
            (RunState::Started, t) => t.is_terminal(),
            _ => false,
        }
    }
}

impl From<RunStatus> for RunState {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Completed => RunState::Completed,
            RunStatus::TimedOut => RunState::TimedOut,
            RunStatus::ResourceExceeded => RunState::ResourceExceeded,
            RunStatus::Crashed => RunState::Crashed,
        }
    }
}

/// Tracks one run's state; every change goes through [`RunLifecycle::advance`].
#[derive(Debug)]
pub struct RunLifecycle {
    run_id: String,
    state: RunState,
}

impl RunLifecycle {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            state: RunState::Created,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn advance(&mut self, to: RunState) -> Result<(), SandboxError> {
        if !self.state.can_transition_to(to) {
            return Err(SandboxError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::trace!(run_id = %self.run_id, from = ?self.state, to = ?to, "run transition");
        self.state = to;
        Ok(())
    }
}
