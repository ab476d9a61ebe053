//! Unpacker units. Unpacker 0 feeds SrcA, unpacker 1 feeds SrcB.
//!
//! Data conversion from L1 is not modelled. The units implement the parts
//! of UNPACR and UNPACR_NOP that other units observe:
//!
//! - the SrcA/SrcB bank handshake with the matrix unit,
//! - the per-thread context counters,
//! - the ADC walk and Src row pointer after each unpack.
//!
//! An instruction that needs a bank still owned by the matrix unit blocks
//! the unit. While blocked it admits nothing and retries that instruction
//! every cycle.

use crate::arch::NUM_THREADS;
use crate::bits::{get_bits, nth_bit};
use crate::decode::Instruction;
use crate::error::{Result, SimError};
use crate::schema::Opcode;
use crate::state::{Dim, SrcClient};

use super::unit::{unhandled, BackendUnit, InflightView, Pending, PendingQueue, UnitStats};
use super::Shared;

/// Fill value for SrcA when a zeroing UNPACR_NOP asks for negative infinity.
const SRC_A_NEG_INF: u32 = 0xFFFF_FFFF;

/// Outcome of executing one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Done,
    Blocked,
}

#[derive(Debug)]
pub struct UnpackerUnit {
    id: usize,
    pending: PendingQueue,
    /// Instruction waiting for its Src bank to come back
    blocked: Option<Pending>,
    context_counter: [u32; NUM_THREADS],
    stats: UnitStats,
}

impl UnpackerUnit {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            pending: PendingQueue::default(),
            blocked: None,
            context_counter: [0; NUM_THREADS],
            stats: UnitStats::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.is_some()
    }

    fn unsupported(&self, detail: String) -> SimError {
        let mnemonic = if self.id == 0 { "UNPACR (unpacker 0)" } else { "UNPACR (unpacker 1)" };
        SimError::UnsupportedOperation { mnemonic, detail }
    }

    /// Thread config field suffixed with this unpacker's index.
    fn field(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.id)
    }

    fn src_set_base(&self, shared: &Shared, thread: usize) -> Result<u32> {
        let name = if self.id == 0 { "SRCA_SET_Base" } else { "SRCB_SET_Base" };
        Ok(shared.config.thread_value(thread, name)? << 4)
    }

    fn context_limit(&self, shared: &Shared, thread: usize) -> Result<u32> {
        let name = format!("THCON_SEC{}_REG2_Context_count", self.id);
        Ok(1 << shared.config.active_value(thread, &name)?)
    }

    /// Owner of the bank this unpacker writes.
    fn own_bank_client(&self, shared: &mut Shared) -> SrcClient {
        shared.unpacker_src(self.id).allowed_client
    }

    fn execute(&mut self, shared: &mut Shared, inst: &Instruction, thread: usize) -> Result<Progress> {
        match inst.opcode() {
            Opcode::UnpacrNop => self.unpacr_nop(shared, inst, thread),
            Opcode::Unpacr => {
                if inst.arg("SearchCacheFlush")? != 0 {
                    return Ok(Progress::Done);
                }
                if inst.arg("CfgContextCntInc")? != 0 {
                    let limit = self.context_limit(shared, thread)?;
                    if self.context_counter[thread] >= limit {
                        self.context_counter[thread] = 0;
                    }
                    return Ok(Progress::Done);
                }
                self.unpack(shared, inst, thread)
            }
            _ => Err(unhandled(inst, self.name())),
        }
    }

    fn unpacr_nop(&mut self, shared: &mut Shared, inst: &Instruction, thread: usize) -> Result<Progress> {
        let op = inst.arg("NoOp")?;
        if op & 0x3 == 0x1 {
            return self.zero_src(shared, op);
        }
        match op & 0x7 {
            // Occupy the unit for a cycle
            0x2 => {}
            // Hand the current bank to the matrix unit
            0x7 => {
                let base = self.src_set_base(shared, thread)?;
                shared.unpacker_src(self.id).allowed_client = SrcClient::MatrixUnit;
                shared.banks.unpacker[self.id] ^= 1;
                shared.banks.unpacker_row[self.id][thread] = base;
            }
            mode => return Err(self.unsupported(format!("UNPACR_NOP mode {:#x}", mode))),
        }
        Ok(Progress::Done)
    }

    fn zero_src(&mut self, shared: &mut Shared, op: u32) -> Result<Progress> {
        let neg_inf = nth_bit(op, 2);
        let both_banks = nth_bit(op, 3);
        let wait_like_unpacr = nth_bit(op, 4);

        let own_bank = shared.banks.unpacker[self.id];
        let checked = if wait_like_unpacr {
            own_bank
        } else if self.id == 0 {
            shared.banks.matrix_a
        } else {
            shared.banks.matrix_b
        };
        let srcs = if self.id == 0 { &mut shared.src_a } else { &mut shared.src_b };
        if srcs[checked].allowed_client != SrcClient::Unpackers {
            return Ok(Progress::Blocked);
        }

        let fill = if self.id == 0 && neg_inf { SRC_A_NEG_INF } else { 0 };
        for (bank, src) in srcs.iter_mut().enumerate() {
            if both_banks || bank == own_bank {
                src.fill(fill);
            }
        }
        Ok(Progress::Done)
    }

    fn unpack(&mut self, shared: &mut Shared, inst: &Instruction, thread: usize) -> Result<Progress> {
        if self.own_bank_client(shared) != SrcClient::Unpackers {
            return Ok(Progress::Blocked);
        }

        let multi_context = inst.arg("OvrdThreadId")? != 0;
        let auto_context = inst.arg("AutoIncContextID")? != 0;
        let (context, adc_thread) = if multi_context {
            let base = if auto_context {
                self.context_counter[thread]
            } else {
                inst.arg("CfgContextId")?
            };
            let offset = shared
                .config
                .thread_value(thread, &self.field("UNPACK_MISC_CFG_CfgContextOffset_"))?;
            let adc_thread = inst.arg("AddrCntContextId")? as usize;
            if adc_thread >= NUM_THREADS {
                return Err(self.unsupported(format!("address counter context {}", adc_thread)));
            }
            let context = base + offset;
            if self.id == 1 && context >= 2 {
                return Err(self.unsupported(format!("config context {}", context)));
            }
            (context, adc_thread)
        } else {
            (0, thread)
        };

        if multi_context && auto_context {
            let next = context + 1;
            let limit = self.context_limit(shared, thread)?;
            self.context_counter[thread] = if next >= limit { 0 } else { next };
        }

        let addr_mode = inst.arg("AddrMode")?;
        let increments = [
            (0, Dim::Z, get_bits(addr_mode, 0, 1)),
            (0, Dim::Y, get_bits(addr_mode, 2, 3)),
            (1, Dim::Z, get_bits(addr_mode, 4, 5)),
            (1, Dim::Y, get_bits(addr_mode, 6, 7)),
        ];
        for target in 0..NUM_THREADS {
            if target != thread && target != adc_thread {
                continue;
            }
            let group = &mut shared.adc[target].unpackers[self.id];
            for &(channel, dim, inc) in increments.iter() {
                group.channels[channel].add(dim, inc);
            }
        }

        let base = self.src_set_base(shared, thread)?;
        if inst.arg("SetDatValid")? != 0 {
            shared.unpacker_src(self.id).flip_allowed_client();
            shared.banks.unpacker[self.id] ^= 1;
            shared.banks.unpacker_row[self.id][thread] = base;
        } else {
            let row = &mut shared.banks.unpacker_row[self.id][thread];
            *row = row.wrapping_add(16 + base);
        }

        if shared.diagnostics.packing {
            log::info!(
                "Unpacker {}: thread {} context {} adc thread {} bank {}",
                self.id,
                thread,
                context,
                adc_thread,
                shared.banks.unpacker[self.id]
            );
        }
        Ok(Progress::Done)
    }
}

impl BackendUnit for UnpackerUnit {
    fn name(&self) -> &'static str {
        if self.id == 0 {
            "unpacker0"
        } else {
            "unpacker1"
        }
    }

    fn admit(&mut self, inst: Instruction, thread: usize) -> Result<bool> {
        let accepted = self.blocked.is_none() && self.pending.admit_one_per_thread(inst, thread);
        self.stats.record_offer(accepted);
        Ok(accepted)
    }

    fn drain(&mut self, shared: &mut Shared, _view: &InflightView) -> Result<()> {
        if let Some(Pending { inst, thread }) = self.blocked.take() {
            match self.execute(shared, &inst, thread)? {
                Progress::Done => self.stats.executed += 1,
                Progress::Blocked => {
                    self.stats.stall_cycles += 1;
                    self.blocked = Some(Pending { inst, thread });
                }
            }
            return Ok(());
        }

        while let Some(Pending { inst, thread }) = self.pending.pop_front() {
            match self.execute(shared, &inst, thread)? {
                Progress::Done => self.stats.executed += 1,
                Progress::Blocked => {
                    log::debug!("{} blocked on {} from thread {}", self.name(), inst, thread);
                    self.stats.stall_cycles += 1;
                    self.blocked = Some(Pending { inst, thread });
                    break;
                }
            }
        }
        Ok(())
    }

    fn has_inflight_from(&self, thread: usize) -> bool {
        self.pending.has_thread(thread) || self.blocked.as_ref().is_some_and(|p| p.thread == thread)
    }

    fn stats(&self) -> &UnitStats {
        &self.stats
    }

    fn reset(&mut self) {
        *self = Self::new(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    const SELECT_1: (&str, u32) = ("Unpack_block_selection", 1);

    #[test]
    fn test_give_bank_to_matrix_unit() {
        let mut be = backend();
        be.shared_mut().config.set_thread_value(1, "SRCB_SET_Base", 2).unwrap();
        assert!(issue(&mut be, 1, "UNPACR_NOP", &[("NoOp", 7), SELECT_1]));
        be.tick().unwrap();
        let shared = be.shared();
        assert_eq!(shared.src_b[0].allowed_client, SrcClient::MatrixUnit);
        assert_eq!(shared.banks.unpacker, [0, 1]);
        assert_eq!(shared.banks.unpacker_row[1][1], 32);
        assert!(!be.math_operands_pending(Opcode::MovB2D));
    }

    #[test]
    fn test_unpack_advances_adc_and_row() {
        let mut be = backend();
        be.shared_mut().config.set_thread_value(0, "SRCA_SET_Base", 1).unwrap();
        // ch0 Z += 1, ch0 Y += 2, ch1 Z += 3, ch1 Y += 0
        let addr_mode = 1 | (2 << 2) | (3 << 4);
        assert!(issue(&mut be, 0, "UNPACR", &[("AddrMode", addr_mode)]));
        be.tick().unwrap();
        let group = be.shared().adc[0].unpackers[0];
        assert_eq!((group.channels[0].z, group.channels[0].y), (1, 2));
        assert_eq!((group.channels[1].z, group.channels[1].y), (3, 0));
        assert_eq!(be.shared().adc[0].unpackers[1], Default::default());
        assert_eq!(be.shared().banks.unpacker_row[0][0], 32);

        // SetDatValid hands the bank over and resets the row
        assert!(issue(&mut be, 0, "UNPACR", &[("SetDatValid", 1)]));
        be.tick().unwrap();
        let shared = be.shared();
        assert_eq!(shared.src_a[0].allowed_client, SrcClient::MatrixUnit);
        assert_eq!(shared.banks.unpacker[0], 1);
        assert_eq!(shared.banks.unpacker_row[0][0], 16);
    }

    #[test]
    fn test_blocked_unpack_retries_until_bank_returns() {
        let mut be = backend();
        be.shared_mut().src_a[0].allowed_client = SrcClient::MatrixUnit;
        assert!(issue(&mut be, 2, "UNPACR", &[("AddrMode", 1)]));
        be.tick().unwrap();
        assert!(be.unpackers[0].is_blocked());
        assert!(!issue(&mut be, 0, "UNPACR_NOP", &[("NoOp", 2)]));
        assert!(!be.stall_condition_met(2, 1));
        be.tick().unwrap();
        assert_eq!(be.shared().adc[2].unpackers[0].channels[0].z, 0);

        // Matrix unit releases the bank
        be.shared_mut().src_a[0].allowed_client = SrcClient::Unpackers;
        be.tick().unwrap();
        assert!(!be.unpackers[0].is_blocked());
        assert_eq!(be.shared().adc[2].unpackers[0].channels[0].z, 1);
        assert!(be.stall_condition_met(2, 1));
        assert!(be.unpackers[0].stats().stall_cycles >= 2);
    }

    #[test]
    fn test_zero_src_modes() {
        let mut be = backend();
        for bank in 0..2 {
            be.shared_mut().src_a[bank].fill(7);
            be.shared_mut().src_b[bank].fill(7);
        }
        // SrcA, own bank only, negative infinity
        assert!(issue(&mut be, 0, "UNPACR_NOP", &[("NoOp", 0b00101)]));
        be.tick().unwrap();
        assert_eq!(be.shared().src_a[0].get(5, 5), SRC_A_NEG_INF);
        assert_eq!(be.shared().src_a[1].get(5, 5), 7);

        // SrcB both banks; negative infinity is SrcA only
        assert!(issue(&mut be, 0, "UNPACR_NOP", &[("NoOp", 0b01101), SELECT_1]));
        be.tick().unwrap();
        assert_eq!(be.shared().src_b[0].get(1, 1), 0);
        assert_eq!(be.shared().src_b[1].get(1, 1), 0);

        // Waits on the matrix unit's bank unless told to wait like UNPACR
        be.shared_mut().banks.matrix_a = 1;
        be.shared_mut().src_a[1].allowed_client = SrcClient::MatrixUnit;
        assert!(issue(&mut be, 0, "UNPACR_NOP", &[("NoOp", 0b10001)]));
        be.tick().unwrap();
        assert!(!be.unpackers[0].is_blocked());
        assert!(issue(&mut be, 0, "UNPACR_NOP", &[("NoOp", 0b00001)]));
        be.tick().unwrap();
        assert!(be.unpackers[0].is_blocked());
    }

    #[test]
    fn test_context_counter_and_adc_override() {
        let mut be = backend();
        be.shared_mut().config.set_bank_value(0, "THCON_SEC0_REG2_Context_count", 1).unwrap();
        let args = [("OvrdThreadId", 1), ("AutoIncContextID", 1), ("AddrCntContextId", 2), ("AddrMode", 1)];
        for _ in 0..3 {
            assert!(issue(&mut be, 0, "UNPACR", &args));
            be.tick().unwrap();
        }
        // Limit is 2 contexts: 0 -> 1 -> 0 -> 1
        assert_eq!(be.unpackers[0].context_counter[0], 1);
        // Both the issuer and the named ADC thread advance
        assert_eq!(be.shared().adc[0].unpackers[0].channels[0].z, 3);
        assert_eq!(be.shared().adc[2].unpackers[0].channels[0].z, 3);
        assert_eq!(be.shared().adc[1].unpackers[0].channels[0].z, 0);

        assert!(issue(&mut be, 1, "UNPACR", &[("OvrdThreadId", 1), ("AddrCntContextId", 3)]));
        assert!(matches!(be.tick(), Err(SimError::UnsupportedOperation { .. })));
    }

    #[test]
    fn test_unsupported_nop_mode() {
        let mut be = backend();
        assert!(issue(&mut be, 0, "UNPACR_NOP", &[("NoOp", 4)]));
        assert!(matches!(be.tick(), Err(SimError::UnsupportedOperation { .. })));
    }
}
