//! The Tensix coprocessor: three frontends feeding one backend.
//!
//! [`Coprocessor`] is the clockable component a device model registers.
//! Each cycle it runs every thread's frontend in thread order, ticks the
//! backend, then delivers the backend's wait-gate signals to their threads.
//!
//! # Memory-mapped access
//!
//! Accesses name the core performing them, since the same address means
//! different things to different cores:
//!
//! | Window | BRISC | TRISC n |
//! |--------|-------|---------|
//! | `0xFFE40000 + t * 0x10000` | push to thread t | `0xFFE40000` pushes to thread n |
//! | `0xFFB80000` (MOP config) | - | thread n's MOP config |
//! | GPRs, semaphores, config, TDMA | shared | shared |

use crate::arch::mmio::{INSTRUCTION_BASE, INSTRUCTION_STRIDE, INSTRUCTION_WINDOW, MOP_CFG_BASE};
use crate::arch::{MOP_CFG_WORDS, NUM_THREADS};
use crate::backend::{Backend, GateSignal, UnitStats};
use crate::clock::{Clockable, Resettable};
use crate::config::{Config, Diagnostics, DEFAULT_FIFO_DEPTH};
use crate::error::{Result, SimError};
use crate::frontend::Frontend;
use crate::memory::AddressableMemory;
use crate::schema::Schemas;

/// The core performing a memory-mapped access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Core {
    /// The tile's management core
    Brisc,
    /// One of the three instruction-issuing cores
    Trisc(usize),
}

/// Counters for one thread's frontend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadStats {
    pub issued: u64,
    pub stall_cycles: u64,
    pub mops_expanded: u64,
}

pub struct Coprocessor {
    backend: Backend,
    frontends: Vec<Frontend>,
    cycle: u64,
}

impl Coprocessor {
    pub fn new(
        schemas: &Schemas,
        memory: Box<dyn AddressableMemory>,
        diagnostics: Diagnostics,
        fifo_depth: usize,
    ) -> Self {
        let backend = Backend::new(schemas, memory, diagnostics);
        let frontends = (0..NUM_THREADS)
            .map(|thread| Frontend::new(thread, backend.decoder().clone(), fifo_depth))
            .collect();
        Self {
            backend,
            frontends,
            cycle: 0,
        }
    }

    /// Build from a loaded configuration, reading any schema files it names.
    pub fn from_config(config: &Config, memory: Box<dyn AddressableMemory>) -> Result<Self> {
        let schemas = config.schemas()?;
        Ok(Self::new(&schemas, memory, config.diagnostics, config.fifo_depth()))
    }

    /// Built-in schemas, default FIFO depth, no diagnostics.
    pub fn with_memory(memory: Box<dyn AddressableMemory>) -> Result<Self> {
        let schemas = Schemas::builtin()?;
        Ok(Self::new(&schemas, memory, Diagnostics::default(), DEFAULT_FIFO_DEPTH))
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut Backend {
        &mut self.backend
    }

    pub fn frontend(&self, thread: usize) -> Result<&Frontend> {
        self.frontends.get(thread).ok_or(SimError::InvalidThread(thread))
    }

    fn frontend_mut(&mut self, thread: usize) -> Result<&mut Frontend> {
        self.frontends.get_mut(thread).ok_or(SimError::InvalidThread(thread))
    }

    /// Cycles run since construction or reset.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Push an instruction word into `thread`'s intake.
    pub fn push_instruction(&mut self, thread: usize, word: u32) -> Result<()> {
        self.frontend_mut(thread)?.push_instruction(word)
    }

    /// Run one cycle.
    pub fn step(&mut self) -> Result<()> {
        for frontend in self.frontends.iter_mut() {
            frontend.advance(&mut self.backend)?;
        }
        for signal in self.backend.tick()? {
            self.deliver(signal)?;
        }
        self.cycle += 1;
        Ok(())
    }

    fn deliver(&mut self, signal: GateSignal) -> Result<()> {
        let thread = match signal {
            GateSignal::MutexAcquired { thread }
            | GateSignal::SetBackendStall { thread }
            | GateSignal::ClearBackendStall { thread }
            | GateSignal::LatchWait { thread, .. } => thread,
        };
        log::trace!("Cycle {}: {:?}", self.cycle, signal);
        self.frontend_mut(thread)?.apply_signal(signal);
        Ok(())
    }

    /// Whether any frontend FIFO or backend unit still holds work.
    pub fn has_inflight_instructions(&self) -> bool {
        self.frontends.iter().any(|f| f.has_inflight_instructions()) || self.backend.has_inflight_instructions()
    }

    /// Step until nothing is in flight, returning the cycles taken.
    ///
    /// A thread parked on a mutex or wait latch with nothing queued counts
    /// as idle. Gives up after `max_cycles`.
    pub fn run_until_idle(&mut self, max_cycles: u64) -> Result<u64> {
        let start = self.cycle;
        while self.has_inflight_instructions() {
            if self.cycle - start >= max_cycles {
                log::warn!("Still busy after {} cycles", max_cycles);
                break;
            }
            self.step()?;
        }
        Ok(self.cycle - start)
    }

    // --- memory-mapped access ---

    fn instruction_thread(core: Core, address: u64) -> Option<usize> {
        match core {
            Core::Trisc(thread) => {
                (address >= INSTRUCTION_BASE && address < INSTRUCTION_BASE + INSTRUCTION_WINDOW).then_some(thread)
            }
            Core::Brisc => {
                let end = INSTRUCTION_BASE + NUM_THREADS as u64 * INSTRUCTION_STRIDE;
                (address >= INSTRUCTION_BASE && address < end)
                    .then(|| ((address - INSTRUCTION_BASE) / INSTRUCTION_STRIDE) as usize)
            }
        }
    }

    fn mop_config_offset(core: Core, address: u64) -> Option<(usize, u64)> {
        match core {
            Core::Trisc(thread) if address >= MOP_CFG_BASE => {
                let offset = address - MOP_CFG_BASE;
                (offset < MOP_CFG_WORDS as u64 * 4).then_some((thread, offset))
            }
            _ => None,
        }
    }

    /// 32-bit write by `core`.
    pub fn mmio_write(&mut self, core: Core, address: u64, value: u32) -> Result<()> {
        if let Some(thread) = Self::instruction_thread(core, address) {
            return self.push_instruction(thread, value);
        }
        if let Some((thread, offset)) = Self::mop_config_offset(core, address) {
            return self.frontend_mut(thread)?.write_mop_config(offset, value);
        }
        self.backend.mmio_write(address, value)
    }

    /// 32-bit read by `core`. The instruction and MOP config windows are
    /// write-only.
    pub fn mmio_read(&mut self, core: Core, address: u64) -> Result<u32> {
        if Self::instruction_thread(core, address).is_some() || Self::mop_config_offset(core, address).is_some() {
            return Err(SimError::UnsupportedOperation {
                mnemonic: "read",
                detail: format!("0x{:08X} is write-only", address),
            });
        }
        self.backend.mmio_read(address)
    }

    // --- statistics ---

    pub fn thread_stats(&self, thread: usize) -> Result<ThreadStats> {
        let frontend = self.frontend(thread)?;
        let gate = frontend.wait_gate();
        Ok(ThreadStats {
            issued: gate.issued(),
            stall_cycles: gate.stall_cycles(),
            mops_expanded: frontend.mop_expander().expanded(),
        })
    }

    pub fn unit_stats(&self) -> Vec<(&'static str, UnitStats)> {
        self.backend.unit_stats()
    }
}

impl Clockable for Coprocessor {
    fn advance(&mut self, cycle: u64) -> Result<()> {
        if cycle != self.cycle {
            log::trace!("Coprocessor at local cycle {} driven as cycle {}", self.cycle, cycle);
        }
        self.step()
    }
}

impl Resettable for Coprocessor {
    fn reset(&mut self) {
        self.backend.reset();
        for frontend in self.frontends.iter_mut() {
            frontend.reset();
        }
        self.cycle = 0;
    }
}
