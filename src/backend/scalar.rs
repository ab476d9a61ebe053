//! Scalar unit (THCON): GPR arithmetic, GPR to config/ADC moves, and
//! GPR loads and stores against L1, MMIO and the Src registers.
//!
//! The unit stalls in two situations, and admits nothing while stalled:
//!
//! - FLUSHDMA found unpacker or packer work outstanding for the thread.
//!   The issuing thread's wait gate is held until that work drains.
//! - A STOREIND into SrcA/SrcB found the target bank owned by the matrix
//!   unit. The store is retried every cycle until the bank is handed back.

use crate::arch::mmio::REGFILE_BASE;
use crate::arch::{GLOBAL_CFGREG_BASE_ADDR32, L1_SIZE, NUM_THREADS, THCON_CFGREG_BASE_ADDR32};
use crate::bits::{get_bits, nth_bit};
use crate::decode::Instruction;
use crate::error::{Result, SimError};
use crate::schema::Opcode;
use crate::state::{Dim, SrcClient};

use super::unit::{unhandled, BackendUnit, InflightView, Pending, PendingQueue, UnitStats};
use super::{GateSignal, Shared};

/// Lowest MMIO address STOREIND may target.
const STOREIND_MMIO_FLOOR: u32 = 0xFFB1_1000;

/// Rows of a Src bank one thread addresses without the override.
const SRC_WINDOW_ROWS: u32 = 16;

/// STOREIND to SrcA addresses rows from this offset.
const SRC_A_ROW_BIAS: i64 = 4;

/// Offset register increments selected by AutoIncSpec.
const AUTO_INCREMENTS: [u32; 4] = [0, 2, 4, 16];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SrcStore {
    addr_reg: usize,
    data_reg: usize,
    auto_inc: u32,
    offset_reg: usize,
    to_src_b: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stall {
    /// FLUSHDMA waiting for the selected units to go idle
    Flush { thread: usize, mask: u32 },
    /// STOREIND waiting for Src bank ownership
    SrcWrite { thread: usize, store: SrcStore },
}

impl Stall {
    fn thread(&self) -> usize {
        match *self {
            Stall::Flush { thread, .. } | Stall::SrcWrite { thread, .. } => thread,
        }
    }
}

#[derive(Debug, Default)]
pub struct ScalarUnit {
    pending: PendingQueue,
    stall: Option<Stall>,
    stats: UnitStats,
}

/// Expand the low half of a GPR into a Src datum.
fn bf16_lo(x: u32) -> u32 {
    ((x & 0x8000) << 3) | ((x & 0x7F00) << 3) | (x & 0xFF)
}

/// Expand the high half of a GPR into a Src datum.
fn bf16_hi(x: u32) -> u32 {
    ((x >> 31) << 18) | (((x >> 23) & 0xFF) << 11) | ((x >> 16) & 0x7F)
}

/// Whether FLUSHDMA should keep waiting: bits 1-3 of `mask` select
/// unpacker 0, unpacker 1 and the packer.
fn flush_blocked(view: &InflightView, thread: usize, mask: u32) -> bool {
    (nth_bit(mask, 1) && view.unpackers[0][thread])
        || (nth_bit(mask, 2) && view.unpackers[1][thread])
        || (nth_bit(mask, 3) && view.packer[thread])
}

fn check_l1(address: u32) -> Result<u64> {
    if address >= L1_SIZE {
        return Err(SimError::IndexOutOfRange {
            space: "L1 address",
            index: address as usize,
            limit: L1_SIZE as usize,
        });
    }
    Ok(address as u64)
}

fn gpr(shared: &Shared, thread: usize, index: impl TryInto<usize>) -> Result<u32> {
    let index = index.try_into().unwrap_or(usize::MAX);
    shared.gprs.get(thread, index)
}

fn set_gpr(shared: &mut Shared, thread: usize, index: u32, value: u32) -> Result<()> {
    shared.gprs.set(thread, index as usize, value)
}

fn auto_increment(shared: &mut Shared, thread: usize, offset_reg: usize, spec: u32) -> Result<()> {
    let value = shared.gprs.get(thread, offset_reg)?;
    shared
        .gprs
        .set(thread, offset_reg, value.wrapping_add(AUTO_INCREMENTS[(spec & 3) as usize]))
}

/// L1 address formed from a 16-byte-unit base register plus a byte offset
/// register.
fn indirect_l1_address(shared: &Shared, thread: usize, addr_reg: u32, offset_reg: usize) -> Result<u64> {
    let base = gpr(shared, thread, addr_reg)?.wrapping_mul(16);
    check_l1(base.wrapping_add(shared.gprs.get(thread, offset_reg)?))
}

impl ScalarUnit {
    fn execute(&mut self, shared: &mut Shared, view: &InflightView, inst: &Instruction, thread: usize) -> Result<()> {
        match inst.opcode() {
            Opcode::SetDmaReg => self.set_dma_reg(shared, inst, thread)?,
            Opcode::FlushDma => {
                let mask = match inst.arg("FlushSpec")? {
                    0 => 0xF,
                    mask => mask,
                };
                if flush_blocked(view, thread, mask) {
                    log::debug!("FLUSHDMA stalls thread {} (mask {:#x})", thread, mask);
                    self.stall = Some(Stall::Flush { thread, mask });
                    shared.signal(GateSignal::SetBackendStall { thread });
                }
            }
            Opcode::AddDmaReg
            | Opcode::SubDmaReg
            | Opcode::MulDmaReg
            | Opcode::CmpDmaReg
            | Opcode::BitwopDmaReg
            | Opcode::ShiftDmaReg => self.dma_reg_arith(shared, inst, thread)?,
            Opcode::Reg2Flop => self.reg_to_flop(shared, inst, thread)?,
            Opcode::StoreReg => {
                let address = REGFILE_BASE.wrapping_add(inst.arg("RegAddr")? << 2);
                let value = gpr(shared, thread, inst.arg("TdmaDataRegIndex")?)?;
                shared.bus_write_u32(address as u64, value)?;
            }
            Opcode::LoadInd => self.load_indirect(shared, inst, thread)?,
            Opcode::StoreInd => self.store_indirect(shared, inst, thread)?,
            Opcode::AtSwap => {
                let address = check_l1(gpr(shared, thread, inst.arg("AddrRegIndex")?)?.wrapping_mul(16))?;
                let data = inst.arg("DataRegIndex")?;
                let first = if inst.arg("MemHierSel")? != 0 { data } else { data & 0x3C };
                let mut words = [0u32; 4];
                for (i, word) in words.iter_mut().enumerate() {
                    *word = gpr(shared, thread, first as usize + i)?;
                }
                let mask = inst.arg("SwapMask")?;
                for half in 0..8 {
                    if nth_bit(mask, half) {
                        let word = words[(half / 2) as usize];
                        let value = if half % 2 == 0 { word & 0xFFFF } else { word >> 16 };
                        let bytes = (value as u16).to_le_bytes();
                        shared.bus_write(address + half as u64 * 2, &bytes)?;
                    }
                }
            }
            _ => return Err(unhandled(inst, self.name())),
        }
        Ok(())
    }

    fn set_dma_reg(&mut self, shared: &mut Shared, inst: &Instruction, thread: usize) -> Result<()> {
        if inst.arg("SetSignalsMode")? != 0 {
            return Err(SimError::UnsupportedOperation {
                mnemonic: "SETDMAREG",
                detail: "only SetSignalsMode 0 is modelled".to_string(),
            });
        }
        let value = (inst.arg("Payload_SigSel")? | (inst.arg("Payload_SigSelSize")? << 14)) & 0xFFFF;
        let half = inst.arg("RegIndex16b")?;
        let reg = half / 2;
        let old = gpr(shared, thread, reg)?;
        let new = if half & 1 != 0 {
            (old & 0xFFFF) | (value << 16)
        } else {
            (old & 0xFFFF_0000) | value
        };
        set_gpr(shared, thread, reg, new)
    }

    fn dma_reg_arith(&mut self, shared: &mut Shared, inst: &Instruction, thread: usize) -> Result<()> {
        let op = inst.opcode();
        let a = gpr(shared, thread, inst.arg("OpARegIndex")?)?;
        let b_field = inst.arg("OpBRegIndex")?;
        let b = if inst.arg("OpBisConst")? != 0 {
            b_field
        } else {
            gpr(shared, thread, b_field)?
        };
        let unsupported = |mode: u32| SimError::UnsupportedOperation {
            mnemonic: op.mnemonic(),
            detail: format!("OpSel {}", mode),
        };

        let result = match op {
            Opcode::AddDmaReg => a.wrapping_add(b),
            Opcode::SubDmaReg => a.wrapping_sub(b),
            Opcode::MulDmaReg => (a & 0xFFFF).wrapping_mul(b & 0xFFFF),
            Opcode::CmpDmaReg => {
                let hit = match inst.arg("OpSel")? {
                    0 => a > b,
                    1 => a < b,
                    2 => a == b,
                    mode => return Err(unsupported(mode)),
                };
                hit as u32
            }
            Opcode::BitwopDmaReg => match inst.arg("OpSel")? {
                0 => a & b,
                1 => a | b,
                2 => a ^ b,
                mode => return Err(unsupported(mode)),
            },
            Opcode::ShiftDmaReg => match inst.arg("OpSel")? {
                0 => a << (b & 0x1F),
                1 => a >> (b & 0x1F),
                mode => return Err(unsupported(mode)),
            },
            _ => return Err(unhandled(inst, self.name())),
        };
        set_gpr(shared, thread, inst.arg("ResultRegIndex")?, result)
    }

    fn reg_to_flop(&mut self, shared: &mut Shared, inst: &Instruction, thread: usize) -> Result<()> {
        let flop = inst.arg("FlopIndex")?;
        let limit = (GLOBAL_CFGREG_BASE_ADDR32 - THCON_CFGREG_BASE_ADDR32) as u32;
        if flop >= limit {
            return Err(SimError::IndexOutOfRange {
                space: "THCON config register",
                index: flop as usize,
                limit: limit as usize,
            });
        }
        let reg = inst.arg("RegIndex")?;
        let target = inst.arg("TargetSel")?;
        let size = inst.arg("SizeSel")?;

        if target == 0 {
            let bank = shared.config.state_id(thread)?;
            let word = THCON_CFGREG_BASE_ADDR32 + flop as usize;
            let count = if size == 0 { 4 } else { 1 };
            for i in 0..count {
                let value = gpr(shared, thread, reg as usize + i)?;
                shared.config.set_bank_word(bank, word + i, value)?;
            }
            return Ok(());
        }

        let dim = Dim::from_index(get_bits(flop, 0, 1));
        let to_carry = nth_bit(flop, 2);
        let group = get_bits(flop, 3, 4) as usize;
        let channel = get_bits(flop, 5, 5) as usize;
        let shift8 = inst.arg("ByteOffset")?;

        let raw = gpr(shared, thread, reg)?;
        let value = match size {
            0 => 0,
            1 if shift8 != 0 => 0,
            1 => raw,
            2 => match shift8 {
                0 => raw & 0xFFFF,
                2 => raw >> 16,
                _ => 0,
            },
            _ => (raw >> (8 * shift8)) & 0xFF,
        };

        let target_thread = if nth_bit(target, 0) {
            inst.arg("ContextId_2")? as usize
        } else {
            thread
        };
        if target_thread >= NUM_THREADS {
            return Ok(());
        }
        let Some(adc) = shared.adc[target_thread].group_mut(group) else {
            return Ok(());
        };
        let channel = &mut adc.channels[channel];
        if to_carry {
            channel.set_cr(dim, value);
        } else {
            channel.set_value(dim, value);
        }
        if shared.diagnostics.packing {
            log::info!("REG2FLOP ADC[{}] group {} {:?} = {:#x}", target_thread, group, dim, value);
        }
        Ok(())
    }

    fn load_indirect(&mut self, shared: &mut Shared, inst: &Instruction, thread: usize) -> Result<()> {
        let size = inst.arg("SizeSel")?;
        let data = inst.arg("DataRegIndex")? & if size != 0 { 0x3F } else { 0x3C };
        let offset_reg = inst.arg("OffsetIndex")? as usize * 2;
        let address = indirect_l1_address(shared, thread, inst.arg("AddrRegIndex")?, offset_reg)?;
        auto_increment(shared, thread, offset_reg, inst.arg("AutoIncSpec")?)?;

        match size {
            0 => {
                let base = address & !15;
                for i in 0..4u32 {
                    let value = shared.bus_read_u32(base + i as u64 * 4)?;
                    set_gpr(shared, thread, data + i, value)?;
                }
            }
            1 => {
                let value = shared.bus_read_u32(address & !3)?;
                set_gpr(shared, thread, data, value)?;
            }
            2 => {
                let bytes = shared.bus_read(address & !1, 2)?;
                let low = u16::from_le_bytes([bytes[0], bytes[1]]) as u32;
                let old = gpr(shared, thread, data)?;
                set_gpr(shared, thread, data, (old & 0xFFFF_0000) | low)?;
            }
            _ => {
                let bytes = shared.bus_read(address, 1)?;
                let old = gpr(shared, thread, data)?;
                set_gpr(shared, thread, data, (old & 0xFFFF_FF00) | bytes[0] as u32)?;
            }
        }
        Ok(())
    }

    fn store_indirect(&mut self, shared: &mut Shared, inst: &Instruction, thread: usize) -> Result<()> {
        let addr_reg = inst.arg("AddrRegIndex")?;
        let data_reg = inst.arg("DataRegIndex")?;
        let auto_inc = inst.arg("AutoIncSpec")?;
        let offset_reg = inst.arg("OffsetIndex")? as usize * 2;
        let reg_size = inst.arg("RegSizeSel")?;
        let size_sel = inst.arg("SizeSel")?;

        if inst.arg("MemHierSel")? != 0 {
            let size = ((size_sel << 1) | reg_size) & 3;
            let data = data_reg & if size != 0 { 0x3F } else { 0x3C };
            let address = indirect_l1_address(shared, thread, addr_reg, offset_reg)?;
            auto_increment(shared, thread, offset_reg, auto_inc)?;

            match size {
                0 => {
                    let base = address & !15;
                    for i in 0..4u32 {
                        let value = gpr(shared, thread, data + i)?;
                        shared.bus_write_u32(base + i as u64 * 4, value)?;
                    }
                }
                1 => {
                    let value = gpr(shared, thread, data)?;
                    shared.bus_write_u32(address & !3, value)?;
                }
                2 => {
                    let value = gpr(shared, thread, data)? as u16;
                    shared.bus_write(address & !1, &value.to_le_bytes())?;
                }
                _ => {
                    let value = gpr(shared, thread, data)? as u8;
                    shared.bus_write(address, &[value])?;
                }
            }
        } else if size_sel == 1 {
            let offset = shared.gprs.get(thread, offset_reg)?;
            let word = gpr(shared, thread, addr_reg)?.wrapping_add(offset >> 4);
            let address = REGFILE_BASE + (word & 0x000F_FFFC);
            if address < STOREIND_MMIO_FLOOR {
                return Err(SimError::UnmappedAddress { address: address as u64 });
            }
            let value = gpr(shared, thread, data_reg)?;
            shared.bus_write_u32(address as u64, value)?;
            auto_increment(shared, thread, offset_reg, auto_inc)?;
        } else {
            let store = SrcStore {
                addr_reg: addr_reg as usize,
                data_reg: data_reg as usize,
                auto_inc,
                offset_reg,
                to_src_b: reg_size != 0,
            };
            self.write_src(shared, thread, store)?;
        }
        Ok(())
    }

    /// Write four datums from two GPRs into the unpacker-side Src bank.
    ///
    /// If the bank is owned by the matrix unit nothing is written and the
    /// unit stalls with the store pending.
    fn write_src(&mut self, shared: &mut Shared, thread: usize, store: SrcStore) -> Result<()> {
        let first = store.data_reg & 0x3C;
        let lo = shared.gprs.get(thread, first)?;
        let hi = shared.gprs.get(thread, first + 1)?;
        let datums = [bf16_lo(lo), bf16_hi(lo), bf16_lo(hi), bf16_hi(hi)];

        let offset = shared.gprs.get(thread, store.offset_reg)?;
        let address = shared.gprs.get(thread, store.addr_reg)?.wrapping_add(offset >> 4);
        if address & 0xF_0000 != 0 {
            return Err(SimError::UnmappedAddress { address: address as u64 });
        }

        let side = if store.to_src_b { 1 } else { 0 };
        let bank = shared.banks.unpacker[side];
        let client = if store.to_src_b {
            shared.src_b[bank].allowed_client
        } else {
            shared.src_a[bank].allowed_client
        };
        if client != SrcClient::Unpackers {
            self.stall = Some(Stall::SrcWrite { thread, store });
            return Ok(());
        }
        auto_increment(shared, thread, store.offset_reg, store.auto_inc)?;

        let column0 = ((address & 3) * 4) as usize;
        let row = if store.to_src_b {
            let row = address >> 2;
            if row >= SRC_WINDOW_ROWS {
                return Err(SimError::IndexOutOfRange {
                    space: "SrcB row",
                    index: row as usize,
                    limit: SRC_WINDOW_ROWS as usize,
                });
            }
            row + shared.banks.unpacker_row[1][thread]
        } else {
            let row = (address >> 2) as i64 - SRC_A_ROW_BIAS;
            if row < 0 {
                return Ok(());
            }
            let row = row as u32;
            let limit = if shared.config.thread_value(thread, "SRCA_SET_SetOvrdWithAddr")? != 0 {
                crate::arch::SRC_ROWS as u32
            } else {
                SRC_WINDOW_ROWS
            };
            if row >= limit {
                return Err(SimError::IndexOutOfRange {
                    space: "SrcA row",
                    index: row as usize,
                    limit: limit as usize,
                });
            }
            if limit == SRC_WINDOW_ROWS {
                row + shared.banks.unpacker_row[0][thread]
            } else {
                row
            }
        };

        let src = if store.to_src_b {
            &mut shared.src_b[bank]
        } else {
            &mut shared.src_a[bank]
        };
        for (i, datum) in datums.iter().enumerate() {
            src.set(row as usize, column0 + i, *datum);
        }
        Ok(())
    }

    /// Advance a stall by one cycle. Returns whether the unit is free to
    /// execute admitted instructions this cycle.
    fn service_stall(&mut self, shared: &mut Shared, view: &InflightView) -> Result<bool> {
        let Some(stall) = self.stall else {
            return Ok(true);
        };
        self.stats.stall_cycles += 1;
        match stall {
            Stall::Flush { thread, mask } => {
                if !flush_blocked(view, thread, mask) {
                    self.stall = None;
                    shared.signal(GateSignal::ClearBackendStall { thread });
                }
            }
            Stall::SrcWrite { thread, store } => {
                self.stall = None;
                self.write_src(shared, thread, store)?;
            }
        }
        Ok(false)
    }
}

impl BackendUnit for ScalarUnit {
    fn name(&self) -> &'static str {
        "scalar"
    }

    fn admit(&mut self, inst: Instruction, thread: usize) -> Result<bool> {
        let accepted = self.stall.is_none() && self.pending.admit_one_per_thread(inst, thread);
        self.stats.record_offer(accepted);
        Ok(accepted)
    }

    fn drain(&mut self, shared: &mut Shared, view: &InflightView) -> Result<()> {
        if !self.service_stall(shared, view)? {
            return Ok(());
        }
        let mut queue = self.pending.take().into_iter();
        while let Some(Pending { inst, thread }) = queue.next() {
            self.execute(shared, view, &inst, thread)?;
            self.stats.executed += 1;
            if self.stall.is_some() {
                // Whatever was admitted behind the stalling instruction waits
                for rest in queue.by_ref() {
                    self.pending.push(rest.inst, rest.thread);
                }
            }
        }
        Ok(())
    }

    fn has_inflight_from(&self, thread: usize) -> bool {
        self.pending.has_thread(thread) || self.stall.map(|s| s.thread()) == Some(thread)
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

    fn set(be: &mut super::super::Backend, thread: usize, reg: usize, value: u32) {
        be.shared_mut().gprs.set(thread, reg, value).unwrap();
    }

    fn get(be: &super::super::Backend, thread: usize, reg: usize) -> u32 {
        be.shared().gprs.get(thread, reg).unwrap()
    }

    #[test]
    fn test_bf16_expansion() {
        assert_eq!(bf16_lo(0x0000_8000), 0x4_0000);
        assert_eq!(bf16_lo(0x0000_7F12), 0x3_F812);
        assert_eq!(bf16_hi(0x8000_0000), 0x4_0000);
        assert_eq!(bf16_hi(0x3F80_0000), 0x7F << 11);
    }

    #[test]
    fn test_setdmareg_halves() {
        let mut be = backend();
        set(&mut be, 1, 3, 0x1234_5678);
        assert!(issue(&mut be, 1, "SETDMAREG", &[("RegIndex16b", 7), ("Payload_SigSel", 0xBEEF & 0x3FFF), ("Payload_SigSelSize", 0xBEEF >> 14)]));
        be.tick().unwrap();
        assert_eq!(get(&be, 1, 3), 0xBEEF_5678);

        assert!(issue(&mut be, 1, "SETDMAREG", &[("RegIndex16b", 6), ("Payload_SigSel", 0x42)]));
        be.tick().unwrap();
        assert_eq!(get(&be, 1, 3), 0xBEEF_0042);
    }

    #[test]
    fn test_dmareg_arithmetic() {
        let mut be = backend();
        set(&mut be, 0, 1, 0xFFFF_FFFF);
        set(&mut be, 0, 2, 2);
        assert!(issue(&mut be, 0, "ADDDMAREG", &[("OpARegIndex", 1), ("OpBRegIndex", 2), ("ResultRegIndex", 3)]));
        be.tick().unwrap();
        assert_eq!(get(&be, 0, 3), 1);

        assert!(issue(&mut be, 0, "SUBDMAREG", &[("OpARegIndex", 2), ("OpBRegIndex", 5), ("ResultRegIndex", 4), ("OpBisConst", 1)]));
        be.tick().unwrap();
        assert_eq!(get(&be, 0, 4), 0xFFFF_FFFD);

        set(&mut be, 0, 5, 0x1_0003);
        assert!(issue(&mut be, 0, "MULDMAREG", &[("OpARegIndex", 5), ("OpBRegIndex", 7), ("ResultRegIndex", 6), ("OpBisConst", 1)]));
        be.tick().unwrap();
        assert_eq!(get(&be, 0, 6), 21);

        assert!(issue(&mut be, 0, "CMPDMAREG", &[("OpARegIndex", 2), ("OpBRegIndex", 2), ("ResultRegIndex", 7), ("OpSel", 2), ("OpBisConst", 1)]));
        be.tick().unwrap();
        assert_eq!(get(&be, 0, 7), 1);

        assert!(issue(&mut be, 0, "SHIFTDMAREG", &[("OpARegIndex", 2), ("OpBRegIndex", 33), ("ResultRegIndex", 8), ("OpBisConst", 1)]));
        be.tick().unwrap();
        assert_eq!(get(&be, 0, 8), 4);

        assert!(issue(&mut be, 0, "BITWOPDMAREG", &[("OpARegIndex", 1), ("OpBRegIndex", 2), ("ResultRegIndex", 9), ("OpSel", 2)]));
        be.tick().unwrap();
        assert_eq!(get(&be, 0, 9), 0xFFFF_FFFD);

        assert!(issue(&mut be, 0, "BITWOPDMAREG", &[("OpSel", 3)]));
        assert!(matches!(be.tick(), Err(SimError::UnsupportedOperation { .. })));
    }

    #[test]
    fn test_reg2flop_config_and_adc() {
        let mut be = backend();
        set(&mut be, 0, 4, 0xAABB_CCDD);
        assert!(issue(&mut be, 0, "REG2FLOP", &[("RegIndex", 4), ("FlopIndex", 24), ("SizeSel", 1)]));
        be.tick().unwrap();
        assert_eq!(be.shared().config.bank_word(0, 52 + 24).unwrap(), 0xAABB_CCDD);

        // Byte 1 into unpacker 1, channel 1, Z carry of thread 2
        let flop = 2 | (1 << 2) | (1 << 3) | (1 << 5);
        assert!(issue(
            &mut be,
            0,
            "REG2FLOP",
            &[("RegIndex", 4), ("FlopIndex", flop), ("TargetSel", 1), ("SizeSel", 3), ("ByteOffset", 1), ("ContextId_2", 2)]
        ));
        be.tick().unwrap();
        let channel = be.shared().adc[2].unpackers[1].channels[1];
        assert_eq!(channel.z_cr, 0xCC);
        assert_eq!(channel.z, 0);

        assert!(issue(&mut be, 0, "REG2FLOP", &[("FlopIndex", 100)]));
        assert!(matches!(be.tick(), Err(SimError::IndexOutOfRange { .. })));
    }

    #[test]
    fn test_loadind_and_storeind_l1() {
        let mut be = backend();
        // Base 0x10 (x16 = 0x100), offset register 2 holds 4
        set(&mut be, 0, 0, 0x10);
        set(&mut be, 0, 2, 4);
        set(&mut be, 0, 8, 0xCAFE_F00D);
        assert!(issue(&mut be, 0, "STOREIND", &[("AddrRegIndex", 0), ("DataRegIndex", 8), ("OffsetIndex", 1), ("MemHierSel", 1), ("RegSizeSel", 1), ("AutoIncSpec", 2)]));
        be.tick().unwrap();
        assert_eq!(be.shared_mut().memory.read_u32(0x104).unwrap(), 0xCAFE_F00D);
        assert_eq!(get(&be, 0, 2), 8);

        assert!(issue(&mut be, 0, "LOADIND", &[("AddrRegIndex", 0), ("DataRegIndex", 9), ("OffsetIndex", 1), ("SizeSel", 3)]));
        be.tick().unwrap();
        // 8-bit load from 0x108, which is still zero
        assert_eq!(get(&be, 0, 9), 0);

        set(&mut be, 0, 2, 5);
        assert!(issue(&mut be, 0, "LOADIND", &[("AddrRegIndex", 0), ("DataRegIndex", 9), ("OffsetIndex", 1), ("SizeSel", 1)]));
        be.tick().unwrap();
        assert_eq!(get(&be, 0, 9), 0xCAFE_F00D);

        set(&mut be, 0, 0, L1_SIZE / 16);
        assert!(issue(&mut be, 0, "LOADIND", &[("AddrRegIndex", 0), ("SizeSel", 1)]));
        assert!(be.tick().is_err());
    }

    #[test]
    fn test_storereg_and_storeind_reach_tdma() {
        let mut be = backend();
        set(&mut be, 0, 1, 0x40);
        // TDMA parameter 1: 0xFFB11004 = 0xFFB00000 + (0x4401 << 2)
        assert!(issue(&mut be, 0, "STOREREG", &[("RegAddr", 0x4401), ("TdmaDataRegIndex", 1)]));
        be.tick().unwrap();
        assert_eq!(be.shared().tdma.params()[1], 0x40);

        set(&mut be, 0, 3, 0x11008);
        assert!(issue(&mut be, 0, "STOREIND", &[("AddrRegIndex", 3), ("DataRegIndex", 1), ("SizeSel", 1)]));
        be.tick().unwrap();
        assert_eq!(be.shared().tdma.params()[2], 0x40);

        set(&mut be, 0, 3, 0x100);
        assert!(issue(&mut be, 0, "STOREIND", &[("AddrRegIndex", 3), ("DataRegIndex", 1), ("SizeSel", 1)]));
        assert!(matches!(be.tick(), Err(SimError::UnmappedAddress { .. })));
    }

    #[test]
    fn test_atswap_halves() {
        let mut be = backend();
        set(&mut be, 0, 0, 2);
        set(&mut be, 0, 4, 0x2222_1111);
        set(&mut be, 0, 5, 0x4444_3333);
        assert!(issue(&mut be, 0, "ATSWAP", &[("AddrRegIndex", 0), ("DataRegIndex", 5), ("SwapMask", 0b0110)]));
        be.tick().unwrap();
        let mem = &mut be.shared_mut().memory;
        assert_eq!(mem.read_u32(0x20).unwrap(), 0x2222_0000);
        assert_eq!(mem.read_u32(0x24).unwrap(), 0x0000_3333);
    }

    #[test]
    fn test_src_store_stalls_until_bank_released() {
        let mut be = backend();
        be.shared_mut().src_b[0].allowed_client = SrcClient::MatrixUnit;
        set(&mut be, 0, 8, 0x0000_8000);
        set(&mut be, 0, 0, 1);
        assert!(issue(&mut be, 0, "STOREIND", &[("AddrRegIndex", 0), ("DataRegIndex", 8), ("OffsetIndex", 1), ("RegSizeSel", 1), ("AutoIncSpec", 3)]));
        be.tick().unwrap();
        // Nothing written, offset untouched, unit refuses new work
        assert_eq!(be.shared().src_b[0].get(0, 4), 0);
        assert_eq!(get(&be, 0, 2), 0);
        assert!(!issue(&mut be, 1, "SETDMAREG", &[]));

        be.shared_mut().src_b[0].allowed_client = SrcClient::Unpackers;
        be.tick().unwrap();
        assert_eq!(be.shared().src_b[0].get(0, 4), 0x4_0000);
        assert_eq!(get(&be, 0, 2), 16);
        assert!(issue(&mut be, 1, "SETDMAREG", &[]));
    }

    #[test]
    fn test_flushdma_holds_thread_until_unpacker_drains() {
        let mut be = backend();
        // Block unpacker 0 on thread 1 with a zero-src that needs the bank
        be.shared_mut().src_a[0].allowed_client = SrcClient::MatrixUnit;
        assert!(issue(&mut be, 1, "UNPACR_NOP", &[("NoOp", 1)]));
        be.tick().unwrap();

        assert!(issue(&mut be, 1, "FLUSHDMA", &[("FlushSpec", 0b0010)]));
        let signals = be.tick().unwrap();
        assert!(signals.contains(&GateSignal::SetBackendStall { thread: 1 }));
        assert!(be.tick().unwrap().is_empty());

        be.shared_mut().src_a[0].allowed_client = SrcClient::Unpackers;
        be.tick().unwrap();
        let signals = be.tick().unwrap();
        assert_eq!(signals, vec![GateSignal::ClearBackendStall { thread: 1 }]);
    }
}
