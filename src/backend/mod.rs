//! Backend dispatcher and functional units.
//!
//! The backend owns every functional unit plus the architectural state
//! they share. Units never hold references to one another or to the
//! frontends:
//!
//! - **State** lives in [`Shared`], handed to each unit's drain phase.
//! - **Cross-unit status** (is unpacker 1 busy for thread 2?) is read from
//!   an [`InflightView`] snapshot taken at the start of the drain phase.
//! - **Callbacks into a thread's wait gate** are queued as [`GateSignal`]s
//!   and applied by the owner once the backend has ticked.
//!
//! # Cycle structure
//!
//! 1. Each frontend's wait gate calls [`Backend::issue`] (admission).
//! 2. [`Backend::tick`] drains every unit in a fixed order: config, sync,
//!    scalar, misc, mover, matrix, vector, unpacker 0, unpacker 1, packer.
//! 3. The returned signals are delivered to the wait gates.

mod config_unit;
mod matrix;
mod misc;
mod mover;
mod packer;
mod scalar;
mod sync;
pub mod tdma;
mod unit;
mod unpacker;
mod vector;

pub use config_unit::ConfigUnit;
pub use matrix::MatrixUnit;
pub use misc::MiscUnit;
pub use mover::{MoverUnit, XmovDirection};
pub use packer::PackerUnit;
pub use scalar::ScalarUnit;
pub use sync::{LatchedWait, Semaphore, SemaphoreFile, SyncUnit, WaitKind};
pub use tdma::{TdmaCommand, TdmaInterface};
pub use unit::{BackendUnit, InflightView, Pending, PendingQueue, UnitStats};
pub use unpacker::UnpackerUnit;
pub use vector::VectorUnit;

use byteorder::{ByteOrder, LittleEndian};

use crate::arch::mmio::{
    CONFIG_BASE, GPR_BASE, GPR_THREAD_STRIDE, SEMAPHORE_BASE, TDMA_BASE, TDMA_SIZE,
};
use crate::arch::{
    CFG_BANK_WORDS, GPRS_PER_THREAD, NUM_CFG_BANKS, NUM_SEMAPHORES, NUM_THREADS, SRC_BANKS,
    THD_STATE_SIZE,
};
use crate::bits::nth_bit;
use crate::config::Diagnostics;
use crate::decode::{Decoder, Instruction};
use crate::error::{Result, SimError};
use crate::memory::{AddressableMemory, MemoryError};
use crate::schema::{ExResource, Opcode, Schemas};
use crate::state::{AdcThread, ConfigStore, DstRegister, GprFile, Rwc, SrcClient, SrcRegister};

/// Size of the backend configuration window.
pub const CONFIG_WINDOW: u64 = 0x1_0000;

/// 32-bit words visible through the configuration window: both general
/// banks followed by every thread's config.
pub const CONFIG_WINDOW_WORDS: usize = NUM_CFG_BANKS * CFG_BANK_WORDS + NUM_THREADS * THD_STATE_SIZE;

/// Notification from a backend unit to one thread's wait gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateSignal {
    /// ATGETM succeeded; the thread may issue again
    MutexAcquired { thread: usize },
    /// A unit holds the thread until further notice (FLUSHDMA)
    SetBackendStall { thread: usize },
    /// Release a stall set by [`GateSignal::SetBackendStall`]
    ClearBackendStall { thread: usize },
    /// Latch a STALLWAIT/SEMWAIT condition
    LatchWait { thread: usize, wait: LatchedWait },
}

/// Which SrcA/SrcB bank each side is currently using.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BankPointers {
    /// Bank the matrix unit reads SrcA from
    pub matrix_a: usize,
    /// Bank the matrix unit reads SrcB from
    pub matrix_b: usize,
    /// Bank each unpacker writes (0 writes SrcA, 1 writes SrcB)
    pub unpacker: [usize; 2],
    /// Row offset each unpacker writes at, per thread
    pub unpacker_row: [[u32; NUM_THREADS]; 2],
}

/// Architectural state shared by all backend units.
pub struct Shared {
    pub config: ConfigStore,
    pub gprs: GprFile,
    pub rwc: [Rwc; NUM_THREADS],
    pub adc: [AdcThread; NUM_THREADS],
    pub src_a: [SrcRegister; SRC_BANKS],
    pub src_b: [SrcRegister; SRC_BANKS],
    pub dst: DstRegister,
    pub banks: BankPointers,
    pub semaphores: SemaphoreFile,
    pub tdma: TdmaInterface,
    pub memory: Box<dyn AddressableMemory>,
    pub diagnostics: Diagnostics,
    signals: Vec<GateSignal>,
}

impl Shared {
    fn new(schemas: &Schemas, memory: Box<dyn AddressableMemory>, diagnostics: Diagnostics) -> Self {
        Self {
            config: ConfigStore::new(schemas.config.clone()).with_tracing(diagnostics.config_writes),
            gprs: GprFile::default(),
            rwc: [Rwc::default(); NUM_THREADS],
            adc: [AdcThread::default(); NUM_THREADS],
            src_a: Default::default(),
            src_b: Default::default(),
            dst: DstRegister::default(),
            banks: BankPointers::default(),
            semaphores: SemaphoreFile::default(),
            tdma: TdmaInterface::default(),
            memory,
            diagnostics,
            signals: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.config.reset();
        self.gprs.reset();
        self.rwc = [Rwc::default(); NUM_THREADS];
        self.adc = [AdcThread::default(); NUM_THREADS];
        self.src_a = Default::default();
        self.src_b = Default::default();
        self.dst.reset();
        self.banks = BankPointers::default();
        self.semaphores.reset();
        self.tdma.reset();
        self.signals.clear();
    }

    /// Queue a notification for a wait gate.
    pub fn signal(&mut self, signal: GateSignal) {
        self.signals.push(signal);
    }

    fn take_signals(&mut self) -> Vec<GateSignal> {
        std::mem::take(&mut self.signals)
    }

    /// Src register written by unpacker `id`, at the bank it currently targets.
    pub fn unpacker_src(&mut self, id: usize) -> &mut SrcRegister {
        let bank = self.banks.unpacker[id];
        if id == 0 {
            &mut self.src_a[bank]
        } else {
            &mut self.src_b[bank]
        }
    }

    /// Hand the matrix unit's current SrcA bank back to the unpackers
    /// (unless disabled for the thread) and advance to the other bank.
    pub fn flip_matrix_src_a(&mut self, thread: usize) -> Result<()> {
        if self.config.thread_value(thread, "CLR_DVALID_SrcA_Disable")? == 0 {
            self.src_a[self.banks.matrix_a].allowed_client = SrcClient::Unpackers;
        }
        self.banks.matrix_a ^= 1;
        Ok(())
    }

    /// SrcB counterpart of [`Shared::flip_matrix_src_a`].
    pub fn flip_matrix_src_b(&mut self, thread: usize) -> Result<()> {
        if self.config.thread_value(thread, "CLR_DVALID_SrcB_Disable")? == 0 {
            self.src_b[self.banks.matrix_b].allowed_client = SrcClient::Unpackers;
        }
        self.banks.matrix_b ^= 1;
        Ok(())
    }

    // --- bus access ---

    /// Write through the tile's address space.
    ///
    /// The configuration and TDMA windows are decoded here; everything
    /// else goes to the addressable-memory capability.
    pub fn bus_write(&mut self, address: u64, bytes: &[u8]) -> Result<()> {
        if in_window(address, CONFIG_BASE, CONFIG_WINDOW) {
            return self.write_config_bytes(address - CONFIG_BASE, bytes);
        }
        if in_window(address, TDMA_BASE, TDMA_SIZE) {
            if bytes.len() != 4 {
                return Err(MemoryError::BadLength { address, len: bytes.len() }.into());
            }
            return self.tdma.write(address - TDMA_BASE, LittleEndian::read_u32(bytes));
        }
        self.memory.write(address, bytes)?;
        Ok(())
    }

    /// Read through the tile's address space.
    pub fn bus_read(&mut self, address: u64, size: usize) -> Result<Vec<u8>> {
        if in_window(address, CONFIG_BASE, CONFIG_WINDOW) {
            let offset = address - CONFIG_BASE;
            return (0..size as u64)
                .map(|i| {
                    let byte = offset + i;
                    let word = self.config_window_word((byte / 4) as usize, address)?;
                    Ok((word >> ((byte % 4) * 8)) as u8)
                })
                .collect();
        }
        if in_window(address, TDMA_BASE, TDMA_SIZE) {
            let mut bytes = vec![0u8; 4];
            LittleEndian::write_u32(&mut bytes, self.tdma.read(address - TDMA_BASE)?);
            bytes.truncate(size);
            return Ok(bytes);
        }
        Ok(self.memory.read(address, size)?)
    }

    pub fn bus_write_u32(&mut self, address: u64, value: u32) -> Result<()> {
        let mut bytes = [0u8; 4];
        LittleEndian::write_u32(&mut bytes, value);
        self.bus_write(address, &bytes)
    }

    pub fn bus_read_u32(&mut self, address: u64) -> Result<u32> {
        Ok(LittleEndian::read_u32(&self.bus_read(address, 4)?))
    }

    fn config_window_word(&self, index: usize, address: u64) -> Result<u32> {
        let banks_end = NUM_CFG_BANKS * CFG_BANK_WORDS;
        if index < banks_end {
            self.config.bank_word(index / CFG_BANK_WORDS, index % CFG_BANK_WORDS)
        } else if index < CONFIG_WINDOW_WORDS {
            let index = index - banks_end;
            self.config.thread_word(index / THD_STATE_SIZE, index % THD_STATE_SIZE)
        } else {
            Err(SimError::UnmappedAddress { address })
        }
    }

    fn write_config_bytes(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let banks_end = NUM_CFG_BANKS * CFG_BANK_WORDS;
        let mut pos = 0;
        while pos < bytes.len() {
            let byte = offset + pos as u64;
            let address = CONFIG_BASE + byte;
            let index = (byte / 4) as usize;
            if index >= CONFIG_WINDOW_WORDS {
                return Err(SimError::UnmappedAddress { address });
            }
            if index >= banks_end {
                return Err(SimError::ReadOnlyRegister { address });
            }

            let lane = (byte % 4) as usize;
            let take = (4 - lane).min(bytes.len() - pos);
            let (bank, word) = (index / CFG_BANK_WORDS, index % CFG_BANK_WORDS);
            let mut raw = [0u8; 4];
            LittleEndian::write_u32(&mut raw, self.config.bank_word(bank, word)?);
            raw[lane..lane + take].copy_from_slice(&bytes[pos..pos + take]);
            self.config.set_bank_word(bank, word, LittleEndian::read_u32(&raw))?;
            pos += take;
        }
        Ok(())
    }
}

fn in_window(address: u64, base: u64, size: u64) -> bool {
    address >= base && address < base + size
}

/// Math instructions that read SrcA.
const MATH_READS_SRC_A: &[Opcode] = &[
    Opcode::MvMul,
    Opcode::DotPv,
    Opcode::GaPool,
    Opcode::GmPool,
    Opcode::ElwMul,
    Opcode::ElwAdd,
    Opcode::ElwSub,
    Opcode::MovA2D,
];

/// Math instructions that read SrcB.
const MATH_READS_SRC_B: &[Opcode] = &[
    Opcode::MvMul,
    Opcode::DotPv,
    Opcode::GaPool,
    Opcode::GmPool,
    Opcode::ElwMul,
    Opcode::ElwAdd,
    Opcode::ElwSub,
    Opcode::MovB2D,
];

/// The coprocessor backend.
pub struct Backend {
    decoder: Decoder,
    shared: Shared,
    config_unit: ConfigUnit,
    sync: SyncUnit,
    scalar: ScalarUnit,
    misc: MiscUnit,
    mover: MoverUnit,
    matrix: MatrixUnit,
    vector: VectorUnit,
    unpackers: [UnpackerUnit; 2],
    packer: PackerUnit,
}

impl Backend {
    pub fn new(schemas: &Schemas, memory: Box<dyn AddressableMemory>, diagnostics: Diagnostics) -> Self {
        Self {
            decoder: Decoder::new(schemas.instructions.clone()),
            shared: Shared::new(schemas, memory, diagnostics),
            config_unit: ConfigUnit::default(),
            sync: SyncUnit::default(),
            scalar: ScalarUnit::default(),
            misc: MiscUnit::default(),
            mover: MoverUnit::default(),
            matrix: MatrixUnit::default(),
            vector: VectorUnit::default(),
            unpackers: [UnpackerUnit::new(0), UnpackerUnit::new(1)],
            packer: PackerUnit::default(),
        }
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn shared(&self) -> &Shared {
        &self.shared
    }

    pub fn shared_mut(&mut self) -> &mut Shared {
        &mut self.shared
    }

    /// Admission: route an instruction to its unit.
    ///
    /// Returns whether it was accepted; a rejected instruction must be
    /// offered again on a later cycle. Frontend-only instructions are
    /// accepted and dropped.
    pub fn issue(&mut self, inst: Instruction, thread: usize) -> Result<bool> {
        if thread >= NUM_THREADS {
            return Err(SimError::InvalidThread(thread));
        }
        let report = self.shared.diagnostics.issued_instructions;
        let resource = inst.ex_resource();
        let text = if report { Some(inst.to_string()) } else { None };

        let unit: &mut dyn BackendUnit = match resource {
            ExResource::None => return Ok(true),
            ExResource::Math => &mut self.matrix,
            ExResource::Sfpu => &mut self.vector,
            ExResource::Thcon => &mut self.scalar,
            ExResource::Sync => &mut self.sync,
            ExResource::Xmov => &mut self.mover,
            ExResource::Tdma => &mut self.misc,
            ExResource::Cfg => &mut self.config_unit,
            ExResource::Pack => &mut self.packer,
            ExResource::Unpack => {
                let id = nth_bit(inst.raw(), crate::arch::UNPACKER_SELECT_BIT) as usize;
                &mut self.unpackers[id]
            }
            ExResource::Unknown => {
                return Err(SimError::UnroutableInstruction {
                    mnemonic: inst.name().to_string(),
                    resource: inst.def().resource_tag.clone(),
                })
            }
        };

        let name = unit.name();
        let accepted = unit.admit(inst, thread)?;
        if let Some(text) = text {
            if accepted {
                log::info!("Issued {} to {} from thread {}", text, name, thread);
            } else {
                log::info!("{} rejected {} from thread {}", name, text, thread);
            }
        }
        Ok(accepted)
    }

    /// Drain phase: execute everything admitted this cycle.
    ///
    /// Returns the wait-gate notifications raised while draining.
    pub fn tick(&mut self) -> Result<Vec<GateSignal>> {
        let view = self.inflight_view();
        let shared = &mut self.shared;
        self.config_unit.drain(shared, &view)?;
        self.sync.drain(shared, &view)?;
        self.scalar.drain(shared, &view)?;
        self.misc.drain(shared, &view)?;
        self.mover.drain(shared, &view)?;
        self.matrix.drain(shared, &view)?;
        self.vector.drain(shared, &view)?;
        for unpacker in self.unpackers.iter_mut() {
            unpacker.drain(shared, &view)?;
        }
        self.packer.drain(shared, &view)?;
        Ok(shared.take_signals())
    }

    /// Snapshot of per-thread in-flight status.
    pub fn inflight_view(&self) -> InflightView {
        let mut view = InflightView::default();
        for thread in 0..NUM_THREADS {
            for (id, unpacker) in self.unpackers.iter().enumerate() {
                view.unpackers[id][thread] = unpacker.has_inflight_from(thread);
            }
            view.packer[thread] = self.packer.has_inflight_from(thread);
            view.matrix[thread] = self.matrix.has_inflight_from(thread);
            view.vector[thread] = self.vector.has_inflight_from(thread);
        }
        view.mover_busy = self.mover_outstanding();
        view
    }

    /// Whether the mover has queued XMOVs or TDMA commands.
    pub fn mover_outstanding(&self) -> bool {
        self.mover.has_outstanding() || self.shared.tdma.pending() > 0
    }

    /// Whether any unit holds work from any thread.
    pub fn has_inflight_instructions(&self) -> bool {
        let units = self.units();
        (0..NUM_THREADS).any(|t| units.iter().any(|u| u.has_inflight_from(t))) || self.mover_outstanding()
    }

    // --- wait-gate queries ---

    /// Evaluate one STALLWAIT condition bit for `thread`.
    pub fn stall_condition_met(&self, thread: usize, condition: u32) -> bool {
        let banks = &self.shared.banks;
        match condition {
            0 | 13 => true,
            1 => !self.unpackers[0].has_inflight_from(thread),
            2 => !self.unpackers[1].has_inflight_from(thread),
            3..=6 => !self.packer.has_inflight_from(thread),
            7 => !self.matrix.has_inflight_from(thread),
            8 => self.shared.src_a[banks.unpacker[0]].allowed_client == SrcClient::Unpackers,
            9 => self.shared.src_b[banks.unpacker[1]].allowed_client == SrcClient::Unpackers,
            10 => self.shared.src_a[banks.matrix_a].allowed_client == SrcClient::MatrixUnit,
            11 => self.shared.src_b[banks.matrix_b].allowed_client == SrcClient::MatrixUnit,
            12 => !self.mover_outstanding(),
            14 => !self.vector.has_inflight_from(thread),
            _ => true,
        }
    }

    pub fn semaphore(&self, index: usize) -> Result<Semaphore> {
        self.shared.semaphores.get(index)
    }

    /// Whether a math instruction must wait because a Src bank it reads
    /// is still owned by the unpackers.
    pub fn math_operands_pending(&self, opcode: Opcode) -> bool {
        let banks = &self.shared.banks;
        if MATH_READS_SRC_A.contains(&opcode)
            && self.shared.src_a[banks.matrix_a].allowed_client == SrcClient::Unpackers
        {
            return true;
        }
        MATH_READS_SRC_B.contains(&opcode)
            && self.shared.src_b[banks.matrix_b].allowed_client == SrcClient::Unpackers
    }

    pub fn mutex_holder(&self, index: usize) -> Option<usize> {
        self.sync.holder(index)
    }

    /// Threads waiting on a mutex, as (thread, index) pairs in arrival order.
    pub fn mutex_waiters(&self) -> &[(usize, usize)] {
        self.sync.waiters()
    }

    // --- memory-mapped registers ---

    /// Read a 32-bit register in the GPR, semaphore, config or TDMA window.
    pub fn mmio_read(&mut self, address: u64) -> Result<u32> {
        if let Some((thread, index)) = gpr_slot(address) {
            return self.shared.gprs.get(thread, index);
        }
        if let Some(index) = semaphore_slot(address) {
            return Ok(self.shared.semaphores.get(index)?.value as u32);
        }
        if in_window(address, CONFIG_BASE, CONFIG_WINDOW) || in_window(address, TDMA_BASE, TDMA_SIZE) {
            return self.shared.bus_read_u32(address);
        }
        Err(SimError::UnmappedAddress { address })
    }

    /// Write a 32-bit register in the GPR, semaphore, config or TDMA window.
    pub fn mmio_write(&mut self, address: u64, value: u32) -> Result<()> {
        if let Some((thread, index)) = gpr_slot(address) {
            return self.shared.gprs.set(thread, index, value);
        }
        if let Some(index) = semaphore_slot(address) {
            return self.shared.semaphores.mmio_write(index, value);
        }
        if in_window(address, CONFIG_BASE, CONFIG_WINDOW) || in_window(address, TDMA_BASE, TDMA_SIZE) {
            return self.shared.bus_write_u32(address, value);
        }
        Err(SimError::UnmappedAddress { address })
    }

    /// Whether `address` falls in a window [`Backend::mmio_read`] decodes.
    pub fn claims(address: u64) -> bool {
        gpr_slot(address).is_some()
            || semaphore_slot(address).is_some()
            || in_window(address, CONFIG_BASE, CONFIG_WINDOW)
            || in_window(address, TDMA_BASE, TDMA_SIZE)
    }

    // --- statistics and reset ---

    fn units(&self) -> [&dyn BackendUnit; 10] {
        [
            &self.config_unit,
            &self.sync,
            &self.scalar,
            &self.misc,
            &self.mover,
            &self.matrix,
            &self.vector,
            &self.unpackers[0],
            &self.unpackers[1],
            &self.packer,
        ]
    }

    /// Per-unit admission and execution counters.
    pub fn unit_stats(&self) -> Vec<(&'static str, UnitStats)> {
        self.units().iter().map(|u| (u.name(), *u.stats())).collect()
    }

    /// Return every unit and all shared state to power-on values.
    ///
    /// Schemas and the memory capability are kept.
    pub fn reset(&mut self) {
        self.shared.reset();
        self.config_unit.reset();
        self.sync.reset();
        self.scalar.reset();
        self.misc.reset();
        self.mover.reset();
        self.matrix.reset();
        self.vector.reset();
        for unpacker in self.unpackers.iter_mut() {
            unpacker.reset();
        }
        self.packer.reset();
    }
}

fn gpr_slot(address: u64) -> Option<(usize, usize)> {
    let size = NUM_THREADS as u64 * GPR_THREAD_STRIDE;
    if !in_window(address, GPR_BASE, size) || address % 4 != 0 {
        return None;
    }
    let offset = address - GPR_BASE;
    let thread = (offset / GPR_THREAD_STRIDE) as usize;
    let index = ((offset % GPR_THREAD_STRIDE) / 4) as usize;
    debug_assert!(index < GPRS_PER_THREAD);
    Some((thread, index))
}

fn semaphore_slot(address: u64) -> Option<usize> {
    if !in_window(address, SEMAPHORE_BASE, NUM_SEMAPHORES as u64 * 4) || address % 4 != 0 {
        return None;
    }
    Some(((address - SEMAPHORE_BASE) / 4) as usize)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::memory::SparseMemory;

    pub fn backend() -> Backend {
        let schemas = Schemas::builtin().unwrap();
        Backend::new(&schemas, Box::new(SparseMemory::new()), Diagnostics::default())
    }

    pub fn decode(backend: &Backend, word: u32) -> Instruction {
        backend.decoder().decode(word).unwrap()
    }

    /// Encode through the schema by mnemonic.
    pub fn encode(backend: &Backend, name: &str, args: &[(&str, u32)]) -> Instruction {
        let word = backend.decoder().schema().encode(name, args).unwrap();
        decode(backend, word)
    }

    pub fn issue(backend: &mut Backend, thread: usize, name: &str, args: &[(&str, u32)]) -> bool {
        let inst = encode(backend, name, args);
        backend.issue(inst, thread).unwrap()
    }
}
