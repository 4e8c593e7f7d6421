//! Multi-slot run orchestration

use crate::backend::BackendConfig;
use crate::observer::RunObserver;
use crate::run_state::RunStatus;
use crate::runner::{RunOutcome, TestInvocation, TestRunner};
use crate::slot::{ModelSlot, SlotId};
use futures::future::join_all;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors that prevent a run from starting
#[derive(Error, Debug, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("No models configured, add at least one slot first")]
    NoSlots,

    #[error("Input is empty")]
    EmptyInput,
}

/// How the slots of one run are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// One slot at a time, in slot order; each runner finishes before the
    /// next one sends its request
    #[default]
    Sequential,
    /// All slots of the run stream at once
    Concurrent,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" | "seq" => Ok(ExecutionMode::Sequential),
            "concurrent" | "parallel" => Ok(ExecutionMode::Concurrent),
            other => Err(format!(
                "unknown execution mode '{}' (expected sequential or concurrent)",
                other
            )),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Concurrent => write!(f, "concurrent"),
        }
    }
}

/// One row of slots in the run log
#[derive(Debug)]
pub struct RunGroup {
    index: usize,
    slots: Vec<Arc<ModelSlot>>,
    invocation: Option<TestInvocation>,
}

impl RunGroup {
    fn new(index: usize) -> Self {
        Self {
            index,
            slots: Vec::new(),
            invocation: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn slots(&self) -> &[Arc<ModelSlot>] {
        &self.slots
    }

    /// The invocation this group was last run with
    pub fn invocation(&self) -> Option<&TestInvocation> {
        self.invocation.as_ref()
    }

    fn has_started(&self) -> bool {
        self.slots.iter().any(|s| s.status() != RunStatus::Idle)
    }

    fn mount_info(&self) -> Vec<(SlotId, BackendConfig)> {
        self.slots
            .iter()
            .map(|s| (s.id(), s.config().clone()))
            .collect()
    }
}

/// Result of one slot within a run
#[derive(Debug, Clone)]
pub struct SlotReport {
    pub slot: SlotId,
    pub config: BackendConfig,
    pub outcome: RunOutcome,
}

/// Result of [`Orchestrator::execute_run`]
#[derive(Debug, Clone)]
pub struct RunReport {
    pub group: usize,
    /// Whether the run created a new group of cloned slots
    pub cloned: bool,
    pub slots: Vec<SlotReport>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn count(&self, status: RunStatus) -> usize {
        self.slots
            .iter()
            .filter_map(|r| r.outcome.state())
            .filter(|s| s.status() == status)
            .count()
    }
}

/// Owns the run log and fans each run out to one [`TestRunner`] per slot
pub struct Orchestrator {
    runner: TestRunner,
    mode: ExecutionMode,
    groups: Vec<RunGroup>,
}

impl Orchestrator {
    pub fn new(runner: TestRunner) -> Self {
        Self {
            runner,
            mode: ExecutionMode::default(),
            groups: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// All groups in creation order; group 0 holds the base slots
    pub fn groups(&self) -> &[RunGroup] {
        &self.groups
    }

    /// Base slots, the ones later runs are cloned from
    pub fn base_slots(&self) -> &[Arc<ModelSlot>] {
        self.groups.first().map(|g| g.slots()).unwrap_or(&[])
    }

    /// Whether any slot in any group has ever started a run
    pub fn has_history(&self) -> bool {
        self.groups.iter().any(RunGroup::has_started)
    }

    /// Register a backend. New slots always join group 0.
    pub fn add_slot(&mut self, config: BackendConfig) -> Arc<ModelSlot> {
        if self.groups.is_empty() {
            self.groups.push(RunGroup::new(0));
        }
        let base = &mut self.groups[0];
        let id = SlotId::new(0, base.slots.len());
        let slot = Arc::new(ModelSlot::new(id, config));
        info!(slot = %id, backend = %slot.config(), "Added slot");
        base.slots.push(Arc::clone(&slot));
        slot
    }

    /// Run `invocation` across every base slot.
    ///
    /// The first run uses the base slots in place. Once any run has started,
    /// each call clones the base slots into a new group so earlier results
    /// stay as they were. A failing slot never affects its siblings.
    pub async fn execute_run(
        &mut self,
        invocation: &TestInvocation,
        observer: &dyn RunObserver,
        cancel: &CancellationToken,
    ) -> Result<RunReport, OrchestratorError> {
        if self.base_slots().is_empty() {
            return Err(OrchestratorError::NoSlots);
        }
        let input = invocation.input.trim();
        if input.is_empty() {
            return Err(OrchestratorError::EmptyInput);
        }
        let invocation = TestInvocation::new(input, invocation.title.clone());

        let cloned = self.has_history();
        let group_index = if cloned {
            self.clone_base_group()
        } else {
            0
        };

        let group = &mut self.groups[group_index];
        group.invocation = Some(invocation.clone());
        observer.on_group(group.index, &group.mount_info());
        let slots = group.slots.clone();

        info!(
            group = group_index,
            slots = slots.len(),
            mode = %self.mode,
            cloned,
            "Starting run"
        );
        let start = Instant::now();

        let outcomes = match self.mode {
            ExecutionMode::Sequential => {
                let mut outcomes = Vec::with_capacity(slots.len());
                for slot in &slots {
                    outcomes.push(self.dispatch(slot, &invocation, observer, cancel).await);
                }
                outcomes
            }
            ExecutionMode::Concurrent => {
                join_all(
                    slots
                        .iter()
                        .map(|slot| self.dispatch(slot, &invocation, observer, cancel)),
                )
                .await
            }
        };

        let report = RunReport {
            group: group_index,
            cloned,
            slots: slots
                .iter()
                .zip(outcomes)
                .map(|(slot, outcome)| SlotReport {
                    slot: slot.id(),
                    config: slot.config().clone(),
                    outcome,
                })
                .collect(),
            elapsed: start.elapsed(),
        };

        info!(
            group = group_index,
            completed = report.count(RunStatus::Completed),
            failed = report.count(RunStatus::Failed),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Run finished"
        );

        Ok(report)
    }

    async fn dispatch(
        &self,
        slot: &ModelSlot,
        invocation: &TestInvocation,
        observer: &dyn RunObserver,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        if slot.is_running() {
            warn!(slot = %slot.id(), "Slot still running from an earlier dispatch, skipping");
            return RunOutcome::Skipped;
        }
        debug!(slot = %slot.id(), "Dispatching");
        self.runner.run(slot, invocation, observer, cancel).await
    }

    /// Append a group of fresh clones of the base slots, returning its index
    fn clone_base_group(&mut self) -> usize {
        let index = self.groups.len();
        let mut group = RunGroup::new(index);
        group.slots = self
            .base_slots()
            .iter()
            .enumerate()
            .map(|(i, slot)| Arc::new(slot.respawn(SlotId::new(index, i))))
            .collect();
        debug!(group = index, slots = group.slots.len(), "Cloned base slots");
        self.groups.push(group);
        index
    }
}
