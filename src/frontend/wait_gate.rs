//! Wait gate: the last frontend stage.
//!
//! Offers the instruction at the head of the thread's gate FIFO to the
//! backend once per cycle and pops it only when the backend accepts it.
//! The gate holds back issue in three situations:
//!
//! - an ATGETM has been accepted and the mutex has not been granted yet,
//! - a backend unit (FLUSHDMA) has asked the thread to stall,
//! - a latched STALLWAIT/SEMWAIT blocks the head instruction's class and
//!   its condition is not yet met.
//!
//! Releasing a latched wait costs one cycle in which nothing issues.

use std::collections::VecDeque;

use crate::backend::{Backend, LatchedWait, WaitKind};
use crate::bits::{nth_bit, set_bits};
use crate::decode::Decoder;
use crate::error::Result;
use crate::schema::{ExResource, Opcode};

/// STALLWAIT condition bits the gate evaluates.
const STALL_CONDITIONS: u32 = 15;

/// Semaphores a SEMWAIT selector can name.
const SEMAPHORE_SELECT_WIDTH: u32 = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitGate {
    mutex_stall: bool,
    backend_stall: bool,
    latched: Option<LatchedWait>,
    /// The latched wait is blocking the head instruction
    waiting: bool,
    issued: u64,
    stall_cycles: u64,
}

impl WaitGate {
    pub fn inform_mutex_acquired(&mut self) {
        self.mutex_stall = false;
    }

    pub fn set_backend_stall(&mut self) {
        self.backend_stall = true;
    }

    pub fn clear_backend_stall(&mut self) {
        self.backend_stall = false;
    }

    /// Latch a wait condition, replacing any previous one.
    pub fn latch(&mut self, wait: LatchedWait) {
        self.latched = Some(wait);
    }

    pub fn latched(&self) -> Option<&LatchedWait> {
        self.latched.as_ref()
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn is_stalled(&self) -> bool {
        self.mutex_stall || self.backend_stall
    }

    /// Instructions accepted by the backend since reset.
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Cycles in which a waiting head instruction did not issue.
    pub fn stall_cycles(&self) -> u64 {
        self.stall_cycles
    }

    /// Run one cycle for `thread`.
    pub fn step(
        &mut self,
        thread: usize,
        fifo: &mut VecDeque<u32>,
        decoder: &Decoder,
        backend: &mut Backend,
    ) -> Result<()> {
        if self.is_stalled() {
            if !fifo.is_empty() {
                self.stall_cycles += 1;
            }
            return Ok(());
        }

        let head = match fifo.front() {
            Some(&word) => Some(decoder.decode(word)?),
            None => None,
        };

        if let Some(wait) = self.latched {
            if self.waiting {
                if condition_met(&wait, thread, backend)? {
                    log::debug!("Thread {} released from {:?}", thread, wait.kind);
                    self.waiting = false;
                    self.latched = None;
                    return Ok(());
                }
            } else if let Some(inst) = &head {
                self.waiting = inst.ex_resource().blocked_by(wait.block_mask);
            }
        }

        if self.waiting {
            self.stall_cycles += 1;
            return Ok(());
        }

        let Some(inst) = head else {
            return Ok(());
        };
        if inst.ex_resource() == ExResource::Math && backend.math_operands_pending(inst.opcode()) {
            self.stall_cycles += 1;
            return Ok(());
        }

        let is_atgetm = inst.opcode() == Opcode::AtGetM;
        if backend.issue(inst, thread)? {
            fifo.pop_front();
            self.issued += 1;
            if is_atgetm {
                self.mutex_stall = true;
            }
        }
        Ok(())
    }
}

/// Whether a latched wait is satisfied.
///
/// SEMWAIT bit 0 waits while a semaphore is zero, bit 1 while it is at its
/// maximum; every selected semaphore must pass. STALLWAIT needs every set
/// condition bit to hold.
fn condition_met(wait: &LatchedWait, thread: usize, backend: &Backend) -> Result<bool> {
    match wait.kind {
        WaitKind::Semaphore { sem_mask } => {
            for index in set_bits(sem_mask, SEMAPHORE_SELECT_WIDTH) {
                let sem = backend.semaphore(index)?;
                if nth_bit(wait.condition_mask, 0) && sem.value == 0 {
                    return Ok(false);
                }
                if nth_bit(wait.condition_mask, 1) && sem.value >= sem.max {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        WaitKind::Stall => Ok(set_bits(wait.condition_mask, STALL_CONDITIONS)
            .all(|cond| backend.stall_condition_met(thread, cond as u32))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::GateSignal;
    use crate::config::Diagnostics;
    use crate::memory::SparseMemory;
    use crate::schema::Schemas;

    struct Rig {
        gate: WaitGate,
        fifo: VecDeque<u32>,
        decoder: Decoder,
        backend: Backend,
    }

    impl Rig {
        fn new() -> Self {
            let schemas = Schemas::builtin().unwrap();
            let backend = Backend::new(&schemas, Box::new(SparseMemory::new()), Diagnostics::default());
            Self {
                gate: WaitGate::default(),
                fifo: VecDeque::new(),
                decoder: backend.decoder().clone(),
                backend,
            }
        }

        fn push(&mut self, name: &str, args: &[(&str, u32)]) {
            let word = self.decoder.schema().encode(name, args).unwrap();
            self.fifo.push_back(word);
        }

        /// One cycle: gate, backend, then signals for thread 0.
        fn cycle(&mut self) {
            self.gate.step(0, &mut self.fifo, &self.decoder, &mut self.backend).unwrap();
            for signal in self.backend.tick().unwrap() {
                match signal {
                    GateSignal::MutexAcquired { thread: 0 } => self.gate.inform_mutex_acquired(),
                    GateSignal::SetBackendStall { thread: 0 } => self.gate.set_backend_stall(),
                    GateSignal::ClearBackendStall { thread: 0 } => self.gate.clear_backend_stall(),
                    GateSignal::LatchWait { thread: 0, wait } => self.gate.latch(wait),
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn test_issues_in_order_and_pops_on_accept() {
        let mut rig = Rig::new();
        rig.push("SEMINIT", &[("sem_sel", 1), ("init_value", 0), ("max_value", 2)]);
        rig.push("SEMPOST", &[("sem_sel", 1)]);
        rig.cycle();
        assert_eq!(rig.fifo.len(), 1);
        rig.cycle();
        assert!(rig.fifo.is_empty());
        assert_eq!(rig.backend.semaphore(0).unwrap().value, 1);
        assert_eq!(rig.gate.issued(), 2);
    }

    #[test]
    fn test_rejected_instruction_is_retried() {
        let mut rig = Rig::new();
        // Another thread occupies the packer slot of thread 0.
        let pacr = rig.decoder.decode(rig.decoder.schema().encode("PACR", &[]).unwrap()).unwrap();
        assert!(rig.backend.issue(pacr, 0).unwrap());
        rig.push("PACR", &[]);
        rig.gate.step(0, &mut rig.fifo, &rig.decoder, &mut rig.backend).unwrap();
        assert_eq!(rig.fifo.len(), 1);
        rig.backend.tick().unwrap();
        rig.cycle();
        assert!(rig.fifo.is_empty());
    }

    #[test]
    fn test_stallwait_blocks_matching_class_until_condition() {
        let mut rig = Rig::new();
        // Wait for the vector unit, holding back math.
        rig.push("SFPNOP", &[]);
        rig.push("STALLWAIT", &[("wait_res", 1 << 14), ("stall_res", 1 << 6)]);
        rig.push("ZEROACC", &[("clear_mode", 3)]);
        rig.cycle();
        rig.cycle();
        assert!(rig.gate.latched().is_some());

        // Head is ZEROACC: the latch engages, the SFPNOP has drained so the
        // condition holds next cycle, and release costs that cycle.
        rig.cycle();
        assert!(rig.gate.is_waiting());
        assert_eq!(rig.fifo.len(), 1);
        rig.cycle();
        assert!(!rig.gate.is_waiting());
        assert!(rig.gate.latched().is_none());
        assert_eq!(rig.fifo.len(), 1);
        rig.cycle();
        assert!(rig.fifo.is_empty());
    }

    #[test]
    fn test_latch_ignores_unblocked_classes() {
        let mut rig = Rig::new();
        rig.gate.latch(LatchedWait::stall(1 << 7, 1 << 6));
        rig.push("SEMPOST", &[("sem_sel", 1)]);
        rig.cycle();
        assert!(rig.fifo.is_empty());
        assert!(!rig.gate.is_waiting());
        assert!(rig.gate.latched().is_some());
    }

    #[test]
    fn test_semwait_on_zero_semaphore() {
        let mut rig = Rig::new();
        rig.gate.latch(LatchedWait::semaphores(0b11, 0b01, 1 << 1));
        rig.push("SEMPOST", &[("sem_sel", 1)]);
        for _ in 0..3 {
            rig.cycle();
        }
        assert!(rig.gate.is_waiting());
        assert_eq!(rig.fifo.len(), 1);

        // Semaphore 1 is still zero after 0 is posted directly.
        rig.backend.shared_mut().semaphores.post(0).unwrap();
        rig.cycle();
        assert!(rig.gate.is_waiting());

        rig.backend.shared_mut().semaphores.post(1).unwrap();
        rig.cycle();
        assert!(!rig.gate.is_waiting());
        rig.cycle();
        assert!(rig.fifo.is_empty());
        assert_eq!(rig.backend.semaphore(0).unwrap().value, 2);
    }

    #[test]
    fn test_semwait_full_condition() {
        let mut rig = Rig::new();
        rig.backend.shared_mut().semaphores.init(3, 1, 1).unwrap();
        let wait = LatchedWait::semaphores(1 << 3, 0b10, 1 << 1);
        assert!(!condition_met(&wait, 0, &rig.backend).unwrap());
        rig.backend.shared_mut().semaphores.take(3).unwrap();
        assert!(condition_met(&wait, 0, &rig.backend).unwrap());
        // No semaphore selected: nothing to wait for.
        let none = LatchedWait::semaphores(0, 0b01, 1 << 1);
        assert!(condition_met(&none, 0, &rig.backend).unwrap());
    }

    #[test]
    fn test_atgetm_stalls_until_granted() {
        let mut rig = Rig::new();
        rig.push("ATGETM", &[("mutex_index", 2)]);
        rig.push("SEMPOST", &[("sem_sel", 1)]);
        rig.cycle();
        assert!(!rig.gate.is_stalled());
        assert_eq!(rig.backend.mutex_holder(2), Some(0));
        rig.cycle();
        assert!(rig.fifo.is_empty());
    }

    #[test]
    fn test_backend_stall_holds_issue() {
        let mut rig = Rig::new();
        rig.gate.set_backend_stall();
        rig.push("SEMPOST", &[("sem_sel", 1)]);
        rig.cycle();
        rig.cycle();
        assert_eq!(rig.fifo.len(), 1);
        assert_eq!(rig.gate.stall_cycles(), 2);
        rig.gate.clear_backend_stall();
        rig.cycle();
        assert!(rig.fifo.is_empty());
    }

    #[test]
    fn test_math_waits_for_operands() {
        let mut rig = Rig::new();
        rig.push("ELWADD", &[]);
        // Both Src banks start out owned by the unpackers.
        rig.cycle();
        assert_eq!(rig.fifo.len(), 1);
        assert!(rig.backend.math_operands_pending(Opcode::ElwAdd));
    }
}
