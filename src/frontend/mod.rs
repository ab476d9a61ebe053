//! Per-thread instruction frontend.
//!
//! Each issuing thread owns a three-stage pipeline joined by FIFOs of raw
//! instruction words:
//!
//! ```text
//! push ──► [mop fifo] ─► MOP expander ─► [replay fifo] ─► replay expander
//!                                                             │
//!          backend ◄─ wait gate ◄─ [gate fifo] ◄──────────────┘
//! ```
//!
//! Every stage handles at most one word per cycle, in the order MOP
//! expander, replay expander, wait gate, so a word pushed before a cycle
//! can reach the backend within that cycle. Expansion output is not
//! bounded; only the intake FIFO applies back-pressure.

mod mop;
mod replay;
mod wait_gate;

pub use mop::{is_nop, MopExpander};
pub use replay::ReplayExpander;
pub use wait_gate::WaitGate;

use std::collections::VecDeque;

use crate::backend::{Backend, GateSignal};
use crate::decode::{opcode_byte, Decoder};
use crate::error::{Result, SimError};

pub struct Frontend {
    thread: usize,
    decoder: Decoder,
    intake_depth: usize,
    mop_fifo: VecDeque<u32>,
    replay_fifo: VecDeque<u32>,
    gate_fifo: VecDeque<u32>,
    mop: MopExpander,
    replay: ReplayExpander,
    gate: WaitGate,
}

impl Frontend {
    pub fn new(thread: usize, decoder: Decoder, intake_depth: usize) -> Self {
        Self {
            thread,
            decoder,
            intake_depth: intake_depth.max(1),
            mop_fifo: VecDeque::new(),
            replay_fifo: VecDeque::new(),
            gate_fifo: VecDeque::new(),
            mop: MopExpander::default(),
            replay: ReplayExpander::default(),
            gate: WaitGate::default(),
        }
    }

    pub fn thread(&self) -> usize {
        self.thread
    }

    /// Accept an instruction word from the control core.
    ///
    /// Unrecognised words are rejected with [`SimError::UnknownOpcode`]. A
    /// full intake returns [`SimError::CapacityExceeded`]; the same word
    /// should be pushed again on a later cycle.
    pub fn push_instruction(&mut self, word: u32) -> Result<()> {
        if !self.decoder.is_recognised(word) {
            return Err(SimError::UnknownOpcode {
                opcode: opcode_byte(word),
                word,
            });
        }
        if self.mop_fifo.len() >= self.intake_depth {
            return Err(SimError::CapacityExceeded {
                queue: "instruction intake",
                thread: self.thread,
            });
        }
        self.mop_fifo.push_back(word);
        Ok(())
    }

    /// Run the three stages for one cycle.
    pub fn advance(&mut self, backend: &mut Backend) -> Result<()> {
        if let Some(word) = self.mop_fifo.pop_front() {
            let inst = self.decoder.decode(word)?;
            self.mop.process(&inst, &mut self.replay_fifo)?;
        }
        if let Some(word) = self.replay_fifo.pop_front() {
            self.replay.process(word, &self.decoder, &mut self.gate_fifo)?;
        }
        self.gate.step(self.thread, &mut self.gate_fifo, &self.decoder, backend)
    }

    /// Deliver a backend notification addressed to this thread.
    pub fn apply_signal(&mut self, signal: GateSignal) {
        match signal {
            GateSignal::MutexAcquired { .. } => self.gate.inform_mutex_acquired(),
            GateSignal::SetBackendStall { .. } => self.gate.set_backend_stall(),
            GateSignal::ClearBackendStall { .. } => self.gate.clear_backend_stall(),
            GateSignal::LatchWait { wait, .. } => self.gate.latch(wait),
        }
    }

    /// Memory-mapped write into the MOP config window.
    pub fn write_mop_config(&mut self, offset: u64, value: u32) -> Result<()> {
        self.mop.write_config(offset, value)
    }

    /// Whether any FIFO still holds a word.
    pub fn has_inflight_instructions(&self) -> bool {
        !self.mop_fifo.is_empty() || !self.replay_fifo.is_empty() || !self.gate_fifo.is_empty()
    }

    /// Whether the MOP expander has work queued.
    pub fn mop_expander_busy(&self) -> bool {
        !self.mop_fifo.is_empty()
    }

    pub fn mop_expander(&self) -> &MopExpander {
        &self.mop
    }

    pub fn replay_expander(&self) -> &ReplayExpander {
        &self.replay
    }

    pub fn wait_gate(&self) -> &WaitGate {
        &self.gate
    }

    /// Words waiting in the (mop, replay, gate) FIFOs.
    pub fn fifo_levels(&self) -> (usize, usize, usize) {
        (self.mop_fifo.len(), self.replay_fifo.len(), self.gate_fifo.len())
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.thread, self.decoder.clone(), self.intake_depth);
    }
}
