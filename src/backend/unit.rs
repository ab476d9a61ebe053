//! Common pieces of every backend functional unit.
//!
//! A unit's cycle is split in two:
//!
//! - **Admission**: the dispatcher offers a decoded instruction with
//!   [`BackendUnit::admit`]. The unit applies its own per-cycle rule and
//!   either queues it (`true`) or rejects it (`false`). A rejected
//!   instruction stays with the issuing wait gate and is offered again on a
//!   later cycle.
//! - **Drain**: once per cycle the backend calls [`BackendUnit::drain`],
//!   which executes whatever was admitted.

use crate::arch::NUM_THREADS;
use crate::decode::Instruction;
use crate::error::{Result, SimError};
use crate::schema::Opcode;

use super::Shared;

/// An admitted instruction and the thread that issued it.
#[derive(Debug, Clone)]
pub struct Pending {
    pub inst: Instruction,
    pub thread: usize,
}

/// Admission and execution counters of one unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitStats {
    /// Instructions admitted
    pub accepted: u64,
    /// Offers rejected by the admission rule
    pub rejected: u64,
    /// Instructions executed
    pub executed: u64,
    /// Cycles spent stalled or blocked
    pub stall_cycles: u64,
}

impl UnitStats {
    pub fn record_offer(&mut self, accepted: bool) {
        if accepted {
            self.accepted += 1;
        } else {
            self.rejected += 1;
        }
    }
}

/// Instructions admitted this cycle and not yet drained.
#[derive(Debug, Clone, Default)]
pub struct PendingQueue {
    entries: Vec<Pending>,
}

impl PendingQueue {
    pub fn push(&mut self, inst: Instruction, thread: usize) {
        self.entries.push(Pending { inst, thread });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pending> {
        self.entries.iter()
    }

    pub fn has_thread(&self, thread: usize) -> bool {
        self.entries.iter().any(|p| p.thread == thread)
    }

    pub fn count_of(&self, opcode: Opcode) -> usize {
        self.entries.iter().filter(|p| p.inst.opcode() == opcode).count()
    }

    /// Whether any pending instruction has one of `opcodes`.
    pub fn contains_any(&self, opcodes: &[Opcode]) -> bool {
        self.entries.iter().any(|p| opcodes.contains(&p.inst.opcode()))
    }

    /// Default admission: at most one pending instruction per thread.
    pub fn admit_one_per_thread(&mut self, inst: Instruction, thread: usize) -> bool {
        if self.has_thread(thread) {
            return false;
        }
        self.push(inst, thread);
        true
    }

    /// Remove and return everything, in admission order.
    pub fn take(&mut self) -> Vec<Pending> {
        std::mem::take(&mut self.entries)
    }

    /// Remove the oldest entry.
    pub fn pop_front(&mut self) -> Option<Pending> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Per-thread in-flight status of the units other units depend on.
///
/// Taken at the start of the drain phase so units can consult each other
/// without holding references to one another.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InflightView {
    pub unpackers: [[bool; NUM_THREADS]; 2],
    pub packer: [bool; NUM_THREADS],
    pub matrix: [bool; NUM_THREADS],
    pub vector: [bool; NUM_THREADS],
    pub mover_busy: bool,
}

/// A backend functional unit.
pub trait BackendUnit {
    /// Unit name for logs and statistics.
    fn name(&self) -> &'static str;

    /// Offer an instruction; returns whether it was admitted.
    fn admit(&mut self, inst: Instruction, thread: usize) -> Result<bool>;

    /// Execute admitted instructions.
    fn drain(&mut self, shared: &mut Shared, view: &InflightView) -> Result<()>;

    /// Whether the unit holds unfinished work from `thread`.
    fn has_inflight_from(&self, thread: usize) -> bool;

    fn stats(&self) -> &UnitStats;

    /// Return to power-on state.
    fn reset(&mut self);
}

/// Error for an instruction routed to a unit that has no handler for it.
pub(crate) fn unhandled(inst: &Instruction, unit: &'static str) -> SimError {
    SimError::UnsupportedOperation {
        mnemonic: inst.opcode().mnemonic(),
        detail: format!("{} is not executed by the {} unit", inst.name(), unit),
    }
}
