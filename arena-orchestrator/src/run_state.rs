//! Per-run state machine for a single slot

use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Lifecycle of one run: `Idle -> Running -> {Completed | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Idle => write!(f, "idle"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Illegal state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunStateError {
    #[error("cannot {action} a run that is {status}")]
    InvalidTransition {
        action: &'static str,
        status: RunStatus,
    },
}

/// State of one run of one slot.
///
/// A terminal state is a sink. Running the slot again replaces the whole
/// `RunState` instead of resetting this one.
#[derive(Debug, Clone)]
pub struct RunState {
    status: RunStatus,
    accumulated_text: String,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    error: Option<String>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::idle()
    }
}

impl RunState {
    /// State of a slot that has never run
    pub fn idle() -> Self {
        Self {
            status: RunStatus::Idle,
            accumulated_text: String::new(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Fresh state for a run starting now
    pub fn started() -> Self {
        Self {
            status: RunStatus::Running,
            accumulated_text: String::new(),
            started_at: Some(Instant::now()),
            finished_at: None,
            error: None,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<Instant> {
        self.finished_at
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Wall time between start and the terminal transition
    pub fn elapsed(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end.saturating_duration_since(start)),
            _ => None,
        }
    }

    /// Append streamed text; only valid while running
    pub fn append(&mut self, text: &str) -> Result<(), RunStateError> {
        self.require_running("append to")?;
        self.accumulated_text.push_str(text);
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), RunStateError> {
        self.require_running("complete")?;
        self.finished_at = Some(Instant::now());
        self.status = RunStatus::Completed;
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), RunStateError> {
        self.require_running("fail")?;
        self.finished_at = Some(Instant::now());
        self.error = Some(message.into());
        self.status = RunStatus::Failed;
        Ok(())
    }

    fn require_running(&self, action: &'static str) -> Result<(), RunStateError> {
        if self.status == RunStatus::Running {
            Ok(())
        } else {
            Err(RunStateError::InvalidTransition {
                action,
                status: self.status,
            })
        }
    }
}
