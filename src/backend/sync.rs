//! Sync unit: mutexes, semaphores and wait latching.

use crate::arch::{MAX_MUTEX_OPS_PER_CYCLE, NUM_MUTEXES, NUM_SEMAPHORES, RESERVED_MUTEX, SEMAPHORE_MAX_VALUE};
use crate::bits::set_bits;
use crate::decode::Instruction;
use crate::error::{Result, SimError};
use crate::schema::Opcode;

use super::unit::{unhandled, BackendUnit, InflightView, Pending, PendingQueue, UnitStats};
use super::{GateSignal, Shared};

/// Condition mask STALLWAIT and SEMWAIT fall back to when none is given.
const DEFAULT_CONDITION_MASK: u32 = 0x7F;

/// Block mask used when none is given: hold back math instructions.
const DEFAULT_BLOCK_MASK: u32 = 1 << 6;

const MUTEX_OPS: &[Opcode] = &[Opcode::AtGetM, Opcode::AtRelM];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Semaphore {
    pub value: u8,
    pub max: u8,
}

/// The eight 4-bit semaphores.
#[derive(Debug, Clone, Default)]
pub struct SemaphoreFile {
    sems: [Semaphore; NUM_SEMAPHORES],
}

impl SemaphoreFile {
    pub fn get(&self, index: usize) -> Result<Semaphore> {
        self.sems.get(index).copied().ok_or(SimError::IndexOutOfRange {
            space: "semaphore",
            index,
            limit: NUM_SEMAPHORES,
        })
    }

    fn slot(&mut self, index: usize) -> Result<&mut Semaphore> {
        self.sems.get_mut(index).ok_or(SimError::IndexOutOfRange {
            space: "semaphore",
            index,
            limit: NUM_SEMAPHORES,
        })
    }

    pub fn init(&mut self, index: usize, value: u8, max: u8) -> Result<()> {
        *self.slot(index)? = Semaphore {
            value: value & SEMAPHORE_MAX_VALUE,
            max: max & SEMAPHORE_MAX_VALUE,
        };
        Ok(())
    }

    /// Increment, saturating at 15.
    pub fn post(&mut self, index: usize) -> Result<()> {
        let sem = self.slot(index)?;
        if sem.value < SEMAPHORE_MAX_VALUE {
            sem.value += 1;
        }
        Ok(())
    }

    /// Decrement, saturating at 0.
    pub fn take(&mut self, index: usize) -> Result<()> {
        let sem = self.slot(index)?;
        if sem.value > 0 {
            sem.value -= 1;
        }
        Ok(())
    }

    /// Memory-mapped write: bit 0 set takes, clear posts.
    pub fn mmio_write(&mut self, index: usize, value: u32) -> Result<()> {
        if value & 1 != 0 {
            self.take(index)
        } else {
            self.post(index)
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// What a latched wait is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    /// STALLWAIT: each set condition bit must hold
    Stall,
    /// SEMWAIT on the semaphores selected by `sem_mask`
    Semaphore { sem_mask: u32 },
}

/// Wait condition handed to a thread's wait gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatchedWait {
    pub kind: WaitKind,
    pub condition_mask: u32,
    /// Which instruction classes are held back while waiting
    pub block_mask: u32,
}

impl LatchedWait {
    pub fn stall(condition_mask: u32, block_mask: u32) -> Self {
        Self {
            kind: WaitKind::Stall,
            condition_mask,
            block_mask,
        }
    }

    pub fn semaphores(sem_mask: u32, condition_mask: u32, block_mask: u32) -> Self {
        Self {
            kind: WaitKind::Semaphore { sem_mask },
            condition_mask,
            block_mask,
        }
    }
}

fn mutex_slot(index: u32) -> Result<usize> {
    let slot = index as usize;
    if slot == RESERVED_MUTEX || slot >= NUM_MUTEXES {
        return Err(SimError::InvalidMutex { index });
    }
    Ok(slot)
}

#[derive(Debug, Default)]
pub struct SyncUnit {
    pending: PendingQueue,
    /// Holder of each mutex
    mutexes: [Option<usize>; NUM_MUTEXES],
    /// ATGETMs waiting for a mutex, as (thread, index)
    waiters: Vec<(usize, usize)>,
    stats: UnitStats,
}

impl SyncUnit {
    pub fn holder(&self, index: usize) -> Option<usize> {
        self.mutexes.get(index).copied().flatten()
    }

    pub fn waiters(&self) -> &[(usize, usize)] {
        &self.waiters
    }

    fn admit_mutex_op(&mut self, inst: Instruction, thread: usize) -> Result<bool> {
        let index = inst.arg("mutex_index")?;
        if self.pending.len() >= MAX_MUTEX_OPS_PER_CYCLE {
            return Ok(false);
        }
        for queued in self.pending.iter().filter(|p| MUTEX_OPS.contains(&p.inst.opcode())) {
            if queued.inst.arg("mutex_index")? == index {
                return Ok(false);
            }
        }
        self.pending.push(inst, thread);
        Ok(true)
    }

    fn grant(&mut self, shared: &mut Shared, thread: usize, slot: usize) {
        log::debug!("Thread {} acquired mutex {}", thread, slot);
        self.mutexes[slot] = Some(thread);
        shared.signal(GateSignal::MutexAcquired { thread });
    }

    fn execute(&mut self, shared: &mut Shared, inst: &Instruction, thread: usize) -> Result<()> {
        match inst.opcode() {
            Opcode::AtGetM => {
                let slot = mutex_slot(inst.arg("mutex_index")?)?;
                match self.mutexes[slot] {
                    Some(holder) if holder != thread => {
                        log::debug!("Thread {} blocked on mutex {} held by {}", thread, slot, holder);
                        self.waiters.push((thread, slot));
                    }
                    _ => self.grant(shared, thread, slot),
                }
            }
            Opcode::AtRelM => {
                let slot = mutex_slot(inst.arg("mutex_index")?)?;
                if self.mutexes[slot] == Some(thread) {
                    self.mutexes[slot] = None;
                }
            }
            Opcode::SemInit => {
                let value = inst.arg("init_value")? as u8;
                let max = inst.arg("max_value")? as u8;
                for sem in set_bits(inst.arg("sem_sel")?, NUM_SEMAPHORES as u32) {
                    shared.semaphores.init(sem, value, max)?;
                }
            }
            Opcode::SemPost => {
                for sem in set_bits(inst.arg("sem_sel")?, NUM_SEMAPHORES as u32) {
                    shared.semaphores.post(sem)?;
                }
            }
            Opcode::SemGet => {
                for sem in set_bits(inst.arg("sem_sel")?, NUM_SEMAPHORES as u32) {
                    shared.semaphores.take(sem)?;
                }
            }
            Opcode::StallWait => {
                let condition = inst.arg("wait_res")?;
                let block = inst.arg("stall_res")?;
                let wait = LatchedWait::stall(
                    if condition == 0 { DEFAULT_CONDITION_MASK } else { condition },
                    if block == 0 { DEFAULT_BLOCK_MASK } else { block },
                );
                shared.signal(GateSignal::LatchWait { thread, wait });
            }
            Opcode::SemWait => {
                let condition = inst.arg("wait_sem_cond")?;
                let block = match inst.arg("stall_res")? {
                    0 => DEFAULT_BLOCK_MASK,
                    mask => mask,
                };
                let wait = if condition == 0 {
                    LatchedWait::stall(DEFAULT_CONDITION_MASK, block)
                } else {
                    LatchedWait::semaphores(inst.arg("sem_sel")?, condition, block)
                };
                shared.signal(GateSignal::LatchWait { thread, wait });
            }
            _ => return Err(unhandled(inst, self.name())),
        }
        Ok(())
    }

    fn resolve_waiters(&mut self, shared: &mut Shared) {
        let mut still_waiting = Vec::with_capacity(self.waiters.len());
        for (thread, slot) in std::mem::take(&mut self.waiters) {
            match self.mutexes[slot] {
                Some(holder) if holder != thread => still_waiting.push((thread, slot)),
                _ => self.grant(shared, thread, slot),
            }
        }
        self.waiters = still_waiting;
    }
}

impl BackendUnit for SyncUnit {
    fn name(&self) -> &'static str {
        "sync"
    }

    fn admit(&mut self, inst: Instruction, thread: usize) -> Result<bool> {
        let accepted = if MUTEX_OPS.contains(&inst.opcode()) {
            self.admit_mutex_op(inst, thread)?
        } else if self.pending.is_empty() {
            self.pending.push(inst, thread);
            true
        } else {
            false
        };
        self.stats.record_offer(accepted);
        Ok(accepted)
    }

    fn drain(&mut self, shared: &mut Shared, _view: &InflightView) -> Result<()> {
        for Pending { inst, thread } in self.pending.take() {
            self.execute(shared, &inst, thread)?;
            self.stats.executed += 1;
        }
        if !self.waiters.is_empty() {
            self.stats.stall_cycles += 1;
            self.resolve_waiters(shared);
        }
        Ok(())
    }

    fn has_inflight_from(&self, thread: usize) -> bool {
        self.pending.has_thread(thread)
    }

    fn stats(&self) -> &UnitStats {
        &self.stats
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_semaphores_saturate() {
        let mut sems = SemaphoreFile::default();
        sems.take(2).unwrap();
        assert_eq!(sems.get(2).unwrap().value, 0);
        for _ in 0..20 {
            sems.post(2).unwrap();
        }
        assert_eq!(sems.get(2).unwrap().value, 15);
        assert!(sems.get(8).is_err());
    }

    #[test]
    fn test_mutex_admission_limits() {
        let mut be = backend();
        assert!(issue(&mut be, 0, "ATGETM", &[("mutex_index", 1)]));
        // Same mutex twice in one cycle is refused
        assert!(!issue(&mut be, 1, "ATGETM", &[("mutex_index", 1)]));
        assert!(issue(&mut be, 1, "ATGETM", &[("mutex_index", 2)]));
        assert!(issue(&mut be, 2, "ATRELM", &[("mutex_index", 3)]));
        // Fourth mutex op this cycle is refused
        assert!(!issue(&mut be, 2, "ATGETM", &[("mutex_index", 4)]));
        // Other sync ops wait for the mutex ops to drain
        assert!(!issue(&mut be, 0, "SEMPOST", &[("sem_sel", 1)]));
        be.tick().unwrap();
        assert!(issue(&mut be, 0, "SEMPOST", &[("sem_sel", 1)]));
        assert!(!issue(&mut be, 1, "SEMPOST", &[("sem_sel", 2)]));
        // A queued semaphore op does not hold back mutex ops
        assert!(issue(&mut be, 1, "ATGETM", &[("mutex_index", 5)]));
        assert!(!issue(&mut be, 2, "ATRELM", &[("mutex_index", 5)]));
        assert!(issue(&mut be, 2, "ATRELM", &[("mutex_index", 6)]));
        assert!(!issue(&mut be, 2, "ATGETM", &[("mutex_index", 7)]));
        be.tick().unwrap();
        assert_eq!(be.semaphore(0).unwrap().value, 1);
        assert_eq!(be.mutex_holder(5), Some(1));
    }

    #[test]
    fn test_contended_mutex_hands_over_on_release() {
        let mut be = backend();
        assert!(issue(&mut be, 0, "ATGETM", &[("mutex_index", 3)]));
        let signals = be.tick().unwrap();
        assert_eq!(signals, vec![GateSignal::MutexAcquired { thread: 0 }]);
        assert_eq!(be.mutex_holder(3), Some(0));

        assert!(issue(&mut be, 1, "ATGETM", &[("mutex_index", 3)]));
        assert!(be.tick().unwrap().is_empty());
        assert_eq!(be.mutex_waiters(), &[(1, 3)]);

        // Non-holder release is ignored
        assert!(issue(&mut be, 2, "ATRELM", &[("mutex_index", 3)]));
        assert!(be.tick().unwrap().is_empty());
        assert_eq!(be.mutex_holder(3), Some(0));

        assert!(issue(&mut be, 0, "ATRELM", &[("mutex_index", 3)]));
        let signals = be.tick().unwrap();
        assert_eq!(signals, vec![GateSignal::MutexAcquired { thread: 1 }]);
        assert_eq!(be.mutex_holder(3), Some(1));
        assert!(be.mutex_waiters().is_empty());
    }

    #[test]
    fn test_every_granted_waiter_is_removed() {
        let mut be = backend();
        for (thread, index) in [(0, 1), (0, 2)] {
            assert!(issue(&mut be, thread, "ATGETM", &[("mutex_index", index)]));
        }
        be.tick().unwrap();
        assert!(issue(&mut be, 1, "ATGETM", &[("mutex_index", 1)]));
        assert!(issue(&mut be, 2, "ATGETM", &[("mutex_index", 2)]));
        be.tick().unwrap();
        assert_eq!(be.mutex_waiters().len(), 2);

        assert!(issue(&mut be, 0, "ATRELM", &[("mutex_index", 1)]));
        assert!(issue(&mut be, 0, "ATRELM", &[("mutex_index", 2)]));
        let signals = be.tick().unwrap();
        assert_eq!(signals.len(), 2);
        assert!(be.mutex_waiters().is_empty());
    }

    #[test]
    fn test_reserved_mutex_is_an_error() {
        let mut be = backend();
        assert!(issue(&mut be, 0, "ATGETM", &[("mutex_index", 0)]));
        assert!(matches!(be.tick(), Err(SimError::InvalidMutex { index: 0 })));
    }

    #[test]
    fn test_seminit_and_semget() {
        let mut be = backend();
        assert!(issue(&mut be, 0, "SEMINIT", &[("sem_sel", 0b101), ("init_value", 2), ("max_value", 4)]));
        be.tick().unwrap();
        assert_eq!(be.semaphore(0).unwrap(), Semaphore { value: 2, max: 4 });
        assert_eq!(be.semaphore(2).unwrap(), Semaphore { value: 2, max: 4 });
        assert_eq!(be.semaphore(1).unwrap(), Semaphore::default());

        for _ in 0..3 {
            assert!(issue(&mut be, 0, "SEMGET", &[("sem_sel", 0b1)]));
            be.tick().unwrap();
        }
        assert_eq!(be.semaphore(0).unwrap().value, 0);
    }

    #[test]
    fn test_wait_latching_defaults() {
        let mut be = backend();
        assert!(issue(&mut be, 1, "STALLWAIT", &[]));
        let signals = be.tick().unwrap();
        assert_eq!(
            signals,
            vec![GateSignal::LatchWait {
                thread: 1,
                wait: LatchedWait::stall(0x7F, 1 << 6),
            }]
        );

        assert!(issue(&mut be, 2, "SEMWAIT", &[("wait_sem_cond", 1), ("sem_sel", 0b10), ("stall_res", 1)]));
        let signals = be.tick().unwrap();
        assert_eq!(
            signals,
            vec![GateSignal::LatchWait {
                thread: 2,
                wait: LatchedWait::semaphores(0b10, 1, 1),
            }]
        );

        // No condition falls back to a plain stall wait
        assert!(issue(&mut be, 0, "SEMWAIT", &[("sem_sel", 0b10)]));
        let signals = be.tick().unwrap();
        assert_eq!(
            signals,
            vec![GateSignal::LatchWait {
                thread: 0,
                wait: LatchedWait::stall(0x7F, 1 << 6),
            }]
        );
    }
}
