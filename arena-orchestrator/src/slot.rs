//! Model slots: one configured backend instance under comparison

use crate::backend::BackendConfig;
use crate::run_state::{RunState, RunStatus};
use parking_lot::Mutex;
use std::fmt;
use tracing::warn;

/// Position of a slot in the run log: which group, which column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId {
    pub group: usize,
    pub index: usize,
}

impl SlotId {
    pub fn new(group: usize, index: usize) -> Self {
        Self { group, index }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}/s{}", self.group, self.index)
    }
}

/// A backend configuration plus the state of its current run.
///
/// The config is fixed for the lifetime of the slot; later runs get a
/// cloned slot rather than a mutated one.
#[derive(Debug)]
pub struct ModelSlot {
    id: SlotId,
    config: BackendConfig,
    state: Mutex<RunState>,
}

impl ModelSlot {
    pub fn new(id: SlotId, config: BackendConfig) -> Self {
        Self {
            id,
            config,
            state: Mutex::new(RunState::idle()),
        }
    }

    /// Same config, fresh idle state, new position
    pub fn respawn(&self, id: SlotId) -> Self {
        Self::new(id, self.config.clone())
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn status(&self) -> RunStatus {
        self.state.lock().status()
    }

    pub fn is_running(&self) -> bool {
        self.status() == RunStatus::Running
    }

    /// Copy of the current run state
    pub fn snapshot(&self) -> RunState {
        self.state.lock().clone()
    }

    /// Claim the slot for a new run.
    ///
    /// Returns `None` when a run is already in flight. Otherwise installs a
    /// fresh running state and returns the guard that owns it until it
    /// reaches a terminal state.
    pub fn try_begin(&self) -> Option<RunGuard<'_>> {
        let mut state = self.state.lock();
        if state.status() == RunStatus::Running {
            return None;
        }
        *state = RunState::started();
        Some(RunGuard { slot: self })
    }
}

/// Exclusive handle on a slot's running state.
///
/// Dropping the guard while the state is still running fails the run, so a
/// slot can never stay locked after its runner goes away.
#[derive(Debug)]
pub struct RunGuard<'a> {
    slot: &'a ModelSlot,
}

impl RunGuard<'_> {
    pub fn slot(&self) -> &ModelSlot {
        self.slot
    }

    /// Append streamed text and return the accumulated output
    pub fn append(&self, text: &str) -> String {
        let mut state = self.slot.state.lock();
        if let Err(e) = state.append(text) {
            warn!(slot = %self.slot.id, error = %e, "Dropping streamed text");
        }
        state.accumulated_text().to_string()
    }

    pub fn complete(self) -> RunState {
        let mut state = self.slot.state.lock();
        if let Err(e) = state.complete() {
            warn!(slot = %self.slot.id, error = %e, "Ignoring completion");
        }
        state.clone()
    }

    pub fn fail(self, message: impl Into<String>) -> RunState {
        let mut state = self.slot.state.lock();
        if let Err(e) = state.fail(message) {
            warn!(slot = %self.slot.id, error = %e, "Ignoring failure");
        }
        state.clone()
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.slot.state.lock();
        if state.status() == RunStatus::Running {
            warn!(slot = %self.slot.id, "Run dropped before finishing");
            let _ = state.fail("run aborted before completion");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot() -> ModelSlot {
        ModelSlot::new(SlotId::new(0, 0), BackendConfig::ollama("llama3"))
    }

    #[test]
    fn test_second_begin_is_refused_while_running() {
        let slot = slot();
        let guard = slot.try_begin().unwrap();
        assert!(slot.is_running());
        assert!(slot.try_begin().is_none());

        guard.append("partial");
        let state = guard.complete();
        assert_eq!(state.status(), RunStatus::Completed);
        assert_eq!(state.accumulated_text(), "partial");
        assert!(!slot.is_running());
    }

    #[test]
    fn test_new_run_replaces_terminal_state() {
        let slot = slot();
        let first = slot.try_begin().unwrap().fail("boom");
        assert_eq!(first.status(), RunStatus::Failed);

        let guard = slot.try_begin().unwrap();
        let current = slot.snapshot();
        assert_eq!(current.status(), RunStatus::Running);
        assert!(current.error().is_none());
        drop(guard);

        // the earlier snapshot is untouched
        assert_eq!(first.error(), Some("boom"));
    }

    #[test]
    fn test_dropped_guard_releases_slot() {
        let slot = slot();
        {
            let guard = slot.try_begin().unwrap();
            guard.append("half");
        }
        let state = slot.snapshot();
        assert_eq!(state.status(), RunStatus::Failed);
        assert_eq!(state.error(), Some("run aborted before completion"));
        assert!(slot.try_begin().is_some());
    }

    #[test]
    fn test_clone_keeps_config_and_resets_state() {
        let original = slot();
        original.try_begin().unwrap().complete();

        let clone = original.respawn(SlotId::new(1, 0));
        assert_eq!(clone.config(), original.config());
        assert_eq!(clone.status(), RunStatus::Idle);
        assert_eq!(original.status(), RunStatus::Completed);
        assert_eq!(clone.id().to_string(), "g1/s0");
    }
}
