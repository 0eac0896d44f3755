//! Per-core dispatch state.

use crate::types::{CoreId, ProcessId};

/// One CPU core slot.
#[derive(Debug)]
pub struct CoreSlot {
    /// Core ID.
    pub id: CoreId,
    /// Id of the currently bound process, or None if idle.
    pub current: Option<ProcessId>,
    /// Consecutive ticks the bound process has held this core.
    pub quantum: u32,
}

impl CoreSlot {
    pub fn new(id: CoreId) -> Self {
        CoreSlot {
            id,
            current: None,
            quantum: 0,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }
}
