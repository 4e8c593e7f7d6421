//! Display surface for runs
//!
//! The orchestrator and runners never render anything themselves. They
//! report what a card should show through [`RunObserver`], keyed by
//! [`SlotId`]. Every method defaults to doing nothing.

use crate::backend::BackendConfig;
use crate::run_state::RunStatus;
use crate::slot::SlotId;

/// Kind of message appended to a slot's transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Title,
    Input,
    Error,
}

impl MessageKind {
    pub fn label(&self) -> &'static str {
        match self {
            MessageKind::Title => "Test",
            MessageKind::Input => "Input",
            MessageKind::Error => "Error",
        }
    }
}

pub trait RunObserver: Send + Sync {
    /// A group of slots was mounted (group 0 on first use, one per later run)
    fn on_group(&self, _group: usize, _slots: &[(SlotId, BackendConfig)]) {}

    fn on_title(&self, _slot: SlotId, _title: &str) {}

    fn on_message(&self, _slot: SlotId, _kind: MessageKind, _content: &str) {}

    /// Latest accumulated output; the surface should show it and scroll to
    /// the end
    fn on_output(&self, _slot: SlotId, _accumulated: &str) {}

    fn on_metrics(&self, _slot: SlotId, _text: &str) {}

    fn on_status(&self, _slot: SlotId, _status: RunStatus) {}
}

/// Observer that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl RunObserver for NullObserver {}
