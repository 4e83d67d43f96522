use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ListenerPhase {
    Accepting = 0,
    Draining = 1,
}

/// Admission state shared by every worker and the shutdown path.
#[derive(Debug, Clone)]
pub struct ListenerState {
    phase: Arc<AtomicU8>,
}

impl ListenerState {
    pub fn new() -> Self {
        ListenerState {
            phase: Arc::new(AtomicU8::new(ListenerPhase::Accepting as u8)),
        }
    }

    pub fn phase(&self) -> ListenerPhase {
        match self.phase.load(Ordering::Acquire) {
            0 => ListenerPhase::Accepting,
            _ => ListenerPhase::Draining,
        }
    }

    #[inline]
    pub fn is_accepting_new_work(&self) -> bool {
        self.phase() == ListenerPhase::Accepting
    }

    /// Returns `true` only for the call that performed the transition.
    pub fn flip_to_draining(&self) -> bool {
        let previous = self
            .phase
            .swap(ListenerPhase::Draining as u8, Ordering::AcqRel);

        previous == ListenerPhase::Accepting as u8
    }
}

impl Default for ListenerState {
    fn default() -> Self {
        ListenerState::new()
    }
}
