//! Matrix unit (FPU).
//!
//! Arithmetic on Src/Dst values is not modelled. The unit keeps the
//! bookkeeping the rest of the pipeline observes: which Dst rows hold
//! defined data, the per-thread RWCs, and the SrcA/SrcB bank handshake
//! with the unpackers.

use crate::arch::{DST_ROWS, SRC_BANKS};
use crate::bits::{get_bits, nth_bit};
use crate::decode::Instruction;
use crate::error::Result;
use crate::schema::Opcode;
use crate::state::SrcClient;

use super::unit::{unhandled, BackendUnit, InflightView, Pending, PendingQueue, UnitStats};
use super::Shared;

const ZEROACC_ONE_ROW: u32 = 0;
const ZEROACC_16_ROWS: u32 = 1;
const ZEROACC_HALF: u32 = 2;
const ZEROACC_ALL: u32 = 3;

/// Fill value for SrcA when ZEROSRC asks for negative infinity.
const SRC_A_NEG_INF: u32 = 0xFFFF_FFFF;

#[derive(Debug, Default)]
pub struct MatrixUnit {
    pending: PendingQueue,
    stats: UnitStats,
}

/// First Dst row the issuing thread addresses: instruction offset plus
/// the thread's math offset, its Dst counter and the bank's write base.
fn dst_base_row(shared: &Shared, thread: usize, dst: u32) -> Result<usize> {
    let cfg = &shared.config;
    let offset = cfg.thread_value(thread, "DEST_TARGET_REG_CFG_MATH_Offset")?;
    let base = cfg.active_value(thread, "DEST_REGW_BASE_Base")?;
    Ok((dst + offset + shared.rwc[thread].dst + base) as usize)
}

impl MatrixUnit {
    fn execute(&self, shared: &mut Shared, inst: &Instruction, thread: usize) -> Result<()> {
        match inst.opcode() {
            Opcode::ZeroAcc => self.zero_acc(shared, inst, thread),
            Opcode::ZeroSrc => self.zero_src(shared, inst),
            Opcode::ClearDvalid => self.clear_dvalid(shared, inst, thread),
            Opcode::SetRwc => self.set_rwc(shared, inst, thread),
            Opcode::IncRwc => {
                let cr = inst.arg("rwc_cr")?;
                let rwc = &mut shared.rwc[thread];
                let (a, b, d) = (inst.arg("rwc_a")?, inst.arg("rwc_b")?, inst.arg("rwc_d")?);
                if nth_bit(cr, 0) {
                    rwc.set_src_a_cr(rwc.src_a_cr + a);
                    rwc.src_a = rwc.src_a_cr;
                } else {
                    rwc.set_src_a(rwc.src_a + a);
                }
                if nth_bit(cr, 1) {
                    rwc.set_src_b_cr(rwc.src_b_cr + b);
                    rwc.src_b = rwc.src_b_cr;
                } else {
                    rwc.set_src_b(rwc.src_b + b);
                }
                if nth_bit(cr, 2) {
                    rwc.set_dst_cr(rwc.dst_cr + d);
                    rwc.dst = rwc.dst_cr;
                } else {
                    rwc.set_dst(rwc.dst + d);
                }
                Ok(())
            }
            Opcode::MovA2D | Opcode::MovB2D => {
                let eight_rows = nth_bit(inst.arg("instr_mod")?, 1);
                let row = dst_base_row(shared, thread, inst.arg("dst")?)?;
                let (row, count) = if eight_rows { (row & 0x3F8, 8) } else { (row & 0x3FF, 1) };
                self.define_rows(shared, row, count);
                self.advance(shared, inst, thread)
            }
            Opcode::MvMul | Opcode::DotPv | Opcode::GmPool | Opcode::GaPool => {
                let broadcast = inst.arg("instr_mod19")? != 0;
                let count = if broadcast { 7 } else { 8 };
                let row = dst_base_row(shared, thread, inst.arg("dst")?)? & (DST_ROWS - count);
                self.define_rows(shared, row, count);
                self.flip_banks(shared, thread, inst.arg("clear_dvalid")?)?;
                self.advance(shared, inst, thread)
            }
            Opcode::ElwMul | Opcode::ElwAdd | Opcode::ElwSub => {
                let row = dst_base_row(shared, thread, inst.arg("dst")?)? & 0x3F8;
                self.define_rows(shared, row, 8);
                self.flip_banks(shared, thread, inst.arg("clear_dvalid")?)?;
                self.advance(shared, inst, thread)
            }
            _ => Err(unhandled(inst, self.name())),
        }
    }

    fn define_rows(&self, shared: &mut Shared, first: usize, count: usize) {
        for row in first..first + count {
            shared.dst.mark_defined(row);
        }
        if shared.diagnostics.fpu {
            log::info!("FPU wrote dst rows {}..{}", first, first + count);
        }
    }

    /// Apply the instruction's address mod to the issuing thread's RWCs.
    fn advance(&self, shared: &mut Shared, inst: &Instruction, thread: usize) -> Result<()> {
        let addr_mod = inst.arg("addr_mode")?;
        let Shared { rwc, config, .. } = shared;
        rwc[thread].apply_addr_mod(config, thread, addr_mod, true)
    }

    /// Bit 0 releases the current SrcA bank, bit 1 the current SrcB bank.
    fn flip_banks(&self, shared: &mut Shared, thread: usize, mask: u32) -> Result<()> {
        if nth_bit(mask, 0) {
            shared.flip_matrix_src_a(thread)?;
        }
        if nth_bit(mask, 1) {
            shared.flip_matrix_src_b(thread)?;
        }
        Ok(())
    }

    fn zero_acc(&self, shared: &mut Shared, inst: &Instruction, thread: usize) -> Result<()> {
        let clear_mode = inst.arg("clear_mode")?;
        let mode = get_bits(clear_mode, 0, 1);
        let dst_32b = nth_bit(clear_mode, 2);
        let imm = inst.arg("dst")?;

        match mode {
            ZEROACC_ONE_ROW => {
                let row = dst_base_row(shared, thread, imm)?;
                let wide = shared.config.active_value(thread, "ALU_ACC_CTRL_Fp32_enabled")? == 1
                    || shared.config.active_value(thread, "ALU_ACC_CTRL_INT8_math_enabled")? == 1;
                if wide {
                    shared.dst.mark_undefined_32b(row);
                } else {
                    shared.dst.mark_undefined(row);
                }
            }
            ZEROACC_16_ROWS => {
                let block = (imm & 0xFF) as usize;
                if dst_32b {
                    if block < 32 {
                        (0..16).for_each(|i| shared.dst.mark_undefined_32b(block * 16 + i));
                    }
                } else if block < 64 {
                    (0..16).for_each(|i| shared.dst.mark_undefined(block * 16 + i));
                }
            }
            ZEROACC_HALF => {
                let half = DST_ROWS / 2;
                let first = if imm & 1 != 0 { half } else { 0 };
                (first..first + half).for_each(|row| shared.dst.mark_undefined(row));
            }
            // ZEROACC_ALL
            _ => (0..DST_ROWS).for_each(|row| shared.dst.mark_undefined(row)),
        }
        if shared.diagnostics.fpu {
            log::info!("FPU zeroacc mode {} imm {} by thread {}", mode, imm, thread);
        }

        if mode == ZEROACC_ONE_ROW || mode == ZEROACC_16_ROWS {
            let addr_mod = inst.arg("AddrMode")? & 0x3;
            let Shared { rwc, config, .. } = shared;
            rwc[thread].apply_addr_mod(config, thread, addr_mod, true)?;
        }
        Ok(())
    }

    fn zero_src(&self, shared: &mut Shared, inst: &Instruction) -> Result<()> {
        let src_mask = inst.arg("src_mask")?;
        let both_banks = inst.arg("bank_mask")? != 0;
        let matrix_bank = inst.arg("write_mode")? != 0;
        let fill_a = if inst.arg("zero_val")? != 0 { SRC_A_NEG_INF } else { 0 };

        let select = |matrix: usize, unpacker: usize| -> [bool; SRC_BANKS] {
            let mut banks = [both_banks; SRC_BANKS];
            if !both_banks {
                banks[if matrix_bank { matrix } else { unpacker }] = true;
            }
            banks
        };
        let banks = shared.banks;
        if nth_bit(src_mask, 0) {
            let selected = select(banks.matrix_a, banks.unpacker[0]);
            for (bank, _) in selected.iter().enumerate().filter(|(_, s)| **s) {
                shared.src_a[bank].fill(fill_a);
            }
        }
        if nth_bit(src_mask, 1) {
            let selected = select(banks.matrix_b, banks.unpacker[1]);
            for (bank, _) in selected.iter().enumerate().filter(|(_, s)| **s) {
                shared.src_b[bank].fill(0);
            }
        }
        Ok(())
    }

    fn clear_dvalid(&self, shared: &mut Shared, inst: &Instruction, thread: usize) -> Result<()> {
        let reset = inst.arg("reset")?;
        if nth_bit(reset, 0) {
            shared.banks.matrix_a = 0;
            shared.banks.matrix_b = 0;
            shared.banks.unpacker = [0; 2];
            for src in shared.src_a.iter_mut().chain(shared.src_b.iter_mut()) {
                src.allowed_client = SrcClient::Unpackers;
            }
            return Ok(());
        }

        let keep_reading = nth_bit(reset, 1);
        let mask = inst.arg("cleardvalid")?;
        if nth_bit(mask, 0) {
            shared.src_a[shared.banks.matrix_a].allowed_client = SrcClient::Unpackers;
            if !keep_reading {
                shared.banks.matrix_a ^= 1;
            }
        }
        if nth_bit(mask, 1) {
            shared.src_b[shared.banks.matrix_b].allowed_client = SrcClient::Unpackers;
            if !keep_reading {
                shared.banks.matrix_b ^= 1;
            }
        }
        if shared.diagnostics.fpu {
            log::info!("FPU cleardvalid 0x{:x} by thread {}", mask, thread);
        }
        Ok(())
    }

    fn set_rwc(&self, shared: &mut Shared, inst: &Instruction, thread: usize) -> Result<()> {
        let enables = inst.arg("BitMask")?;
        let cr = inst.arg("rwc_cr")?;
        let rwc = &mut shared.rwc[thread];

        if nth_bit(enables, 0) {
            let mut value = inst.arg("rwc_a")?;
            if nth_bit(cr, 0) {
                value += rwc.src_a_cr;
            }
            rwc.set_src_a(value);
            rwc.set_src_a_cr(value);
        }
        if nth_bit(enables, 1) {
            let mut value = inst.arg("rwc_b")?;
            if nth_bit(cr, 1) {
                value += rwc.src_b_cr;
            }
            rwc.set_src_b(value);
            rwc.set_src_b_cr(value);
        }
        let c_to_cr = nth_bit(cr, 3);
        if nth_bit(enables, 2) || c_to_cr {
            let mut value = inst.arg("rwc_d")?;
            if c_to_cr {
                value += rwc.dst;
            } else if nth_bit(cr, 2) {
                value += rwc.dst_cr;
            }
            rwc.set_dst(value);
            rwc.set_dst_cr(value);
        }
        if nth_bit(enables, 3) {
            rwc.fidelity_phase = 0;
        }

        self.flip_banks(shared, thread, inst.arg("clear_ab_vld")?)
    }
}

impl BackendUnit for MatrixUnit {
    fn name(&self) -> &'static str {
        "matrix"
    }

    fn admit(&mut self, inst: Instruction, thread: usize) -> Result<bool> {
        let accepted = self.pending.admit_one_per_thread(inst, thread);
        self.stats.record_offer(accepted);
        Ok(accepted)
    }

    fn drain(&mut self, shared: &mut Shared, _view: &InflightView) -> Result<()> {
        for Pending { inst, thread } in self.pending.take() {
            self.execute(shared, &inst, thread)?;
            self.stats.executed += 1;
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
